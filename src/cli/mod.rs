//! Command-line framework
//!
//! # Module Structure
//!
//! - [`args`] - Argument definitions, value types and the parsed namespace
//! - [`tree`] - Groups, leaves, release tracks and the `Command` trait
//! - [`parser`] - Flattening leaf arguments into `clap` and typing values
//! - [`dispatcher`] - Tree walk, parsing passes, filters, run and output

pub mod args;
pub mod dispatcher;
pub mod parser;
pub mod tree;

pub use args::{ArgDef, ArgType, ArgValue, Namespace, ResourceArgSpec};
pub use dispatcher::{Credentials, Dispatcher, Failure, Services};
pub use tree::{Command, CommandNode, CommandOutput, PendingOperation, ReleaseTrack};
