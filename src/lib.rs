//! gcmd - command dispatch and execution framework for Google Cloud
//!
//! A command tree of groups and leaves is walked from `argv`; the chosen
//! leaf gets its flags parsed, resource arguments resolved against the
//! collection registry and an [`context::AppContext`] carrying the
//! configuration, an authenticated HTTP client and the console. Its output
//! is printed through the formatting layer, and long-running operations
//! are waited on.
//!
//! # Module Structure
//!
//! - [`cli`] - Argument model, command tree and the dispatcher
//! - [`config`] - Properties, named configurations and the environment
//! - [`console`] - Terminal I/O, prompts and progress trackers
//! - [`context`] - Per-invocation state handed to commands
//! - [`gcp`] - Credentials and the layered HTTP transport
//! - [`resource`] - Collection registry, resource references and paging
//! - [`output`] - Filters, projections and printers
//! - [`operations`] - Long-running operation pollers and the waiter
//! - [`iam`] - IAM policy editing helpers
//! - [`parallel`] - Bounded concurrent execution
//! - [`surface`] - The shipped commands

pub mod backoff;
pub mod cli;
pub mod config;
pub mod console;
pub mod context;
pub mod error;
pub mod gcp;
pub mod iam;
pub mod operations;
pub mod output;
pub mod parallel;
pub mod resource;
pub mod surface;

pub use error::{Error, Result};

/// Name of the binary, used in messages and the dotted command path.
pub const TOOL_NAME: &str = "gcmd";

/// Version injected at compile time via GCMD_VERSION (set by CI/CD),
/// or the crate version for local builds.
pub const VERSION: &str = match option_env!("GCMD_VERSION") {
    Some(v) => v,
    None => env!("CARGO_PKG_VERSION"),
};
