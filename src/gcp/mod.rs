//! GCP API interaction module
//!
//! Boundary between the framework and the services: credentials, the
//! layered HTTP transport and a JSON client on top of it.
//!
//! # Module Structure
//!
//! - [`auth`] - Token sources and the account store
//! - [`http`] - Transport stages (headers, retry, error classification, send)
//! - [`client`] - JSON client used by commands
//!
//! # Example
//!
//! ```ignore
//! use gcmd::gcp::{client::ApiClient, http};
//!
//! async fn example() -> gcmd::Result<()> {
//!     let transport = http::default_transport(std::time::Duration::from_secs(300), false)?;
//!     let client = ApiClient::new(transport);
//!     let project = client.get("https://cloudresourcemanager.googleapis.com/v1/projects/my-project").await?;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod client;
pub mod http;
