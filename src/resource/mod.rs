//! Resource abstraction layer
//!
//! Collections are data: the registry loads their URI templates from an
//! embedded JSON manifest, so adding a collection needs no code change.
//!
//! # Architecture
//!
//! - [`registry`] - Loads collection definitions and endpoint overrides
//! - [`reference`] - Parses identifiers into [`ResourceRef`]s and formats them back
//! - [`pager`] - Lazy iteration over paginated list endpoints
//!
//! # Example
//!
//! ```ignore
//! use gcmd::resource::{ParseContext, Registry};
//!
//! let registry = Registry::builtin()?;
//! let vm = registry.parse(
//!     "compute.instances",
//!     "//compute.googleapis.com/projects/p/zones/z/instances/i",
//!     &ParseContext::default(),
//! )?;
//! assert_eq!(vm.relative_name(), "projects/p/zones/z/instances/i");
//! ```

pub mod pager;
pub mod reference;
pub mod registry;

pub use pager::{list, ListRequest, PageSource};
pub use reference::{ParseContext, ResourceRef};
pub use registry::{Collection, Registry};
