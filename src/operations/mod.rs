//! Long-running operations
//!
//! Services answer mutating calls with an operation resource that flips to
//! done once. Two shapes exist:
//!
//! - Google LRO (`name`, `done`, `error`, `response`), polled at
//!   `<base>/<name>`
//! - Compute operations (`status == DONE`, `error.errors[]`,
//!   `targetLink`), polled at their `selfLink`
//!
//! [`waiter::wait`] drives either through an [`OperationPoller`].

pub mod waiter;

pub use waiter::{wait, Waiter};

use crate::error::{Error, Result};
use crate::gcp::client::ApiClient;
use async_trait::async_trait;
use serde_json::Value;

/// What a waiter needs to find an operation again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationRef {
    /// Short name shown to the user.
    pub name: String,
    /// URL polled with GET.
    pub url: String,
}

impl OperationRef {
    /// Reference to an LRO returned by a service rooted at `base_url`.
    pub fn from_lro(operation: &Value, base_url: &str) -> Result<Self> {
        let name = operation
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Internal("operation has no name".to_string()))?;
        let short = name.rsplit('/').next().unwrap_or(name).to_string();
        let base = base_url.trim_end_matches('/');
        Ok(Self {
            name: short,
            url: format!("{base}/{name}"),
        })
    }

    /// Reference to a Compute operation through its self link.
    pub fn from_compute(operation: &Value) -> Result<Self> {
        let url = operation
            .get("selfLink")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Internal("operation has no selfLink".to_string()))?;
        let name = operation
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_else(|| url.rsplit('/').next().unwrap_or(url));
        Ok(Self {
            name: name.to_string(),
            url: url.to_string(),
        })
    }
}

/// Operation service seam.
#[async_trait]
pub trait OperationPoller: Send + Sync {
    /// Fetch the current state of the operation.
    async fn poll(&self, operation: &OperationRef) -> Result<Value>;

    fn is_done(&self, operation: &Value) -> bool;

    /// Server-provided failure message of a done operation.
    fn error_message(&self, operation: &Value) -> Option<String>;

    /// What the command returns once the operation succeeded.
    async fn result(&self, operation: &Value) -> Result<Value>;
}

/// Poller for Google LRO resources.
pub struct LroPoller {
    client: ApiClient,
    /// Return the embedded `response` instead of the operation.
    use_response: bool,
}

impl LroPoller {
    pub fn new(client: ApiClient) -> Self {
        Self {
            client,
            use_response: false,
        }
    }

    pub fn returning_response(mut self) -> Self {
        self.use_response = true;
        self
    }
}

#[async_trait]
impl OperationPoller for LroPoller {
    async fn poll(&self, operation: &OperationRef) -> Result<Value> {
        self.client.get(&operation.url).await
    }

    fn is_done(&self, operation: &Value) -> bool {
        operation.get("done").and_then(Value::as_bool).unwrap_or(false)
    }

    fn error_message(&self, operation: &Value) -> Option<String> {
        let error = operation.get("error")?;
        Some(
            error
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string()),
        )
    }

    async fn result(&self, operation: &Value) -> Result<Value> {
        if self.use_response {
            if let Some(response) = operation.get("response") {
                return Ok(response.clone());
            }
        }
        Ok(operation.clone())
    }
}

/// Poller for Compute Engine operations.
pub struct ComputePoller {
    client: ApiClient,
    /// Fetch `targetLink` once the operation is done.
    fetch_target: bool,
}

impl ComputePoller {
    pub fn new(client: ApiClient) -> Self {
        Self {
            client,
            fetch_target: false,
        }
    }

    pub fn fetching_target(mut self) -> Self {
        self.fetch_target = true;
        self
    }
}

#[async_trait]
impl OperationPoller for ComputePoller {
    async fn poll(&self, operation: &OperationRef) -> Result<Value> {
        self.client.get(&operation.url).await
    }

    fn is_done(&self, operation: &Value) -> bool {
        operation.get("status").and_then(Value::as_str) == Some("DONE")
    }

    fn error_message(&self, operation: &Value) -> Option<String> {
        let errors = operation.get("error")?.get("errors")?.as_array()?;
        let messages: Vec<&str> = errors
            .iter()
            .filter_map(|e| e.get("message").and_then(Value::as_str))
            .collect();
        if messages.is_empty() {
            return None;
        }
        Some(messages.join("\n"))
    }

    async fn result(&self, operation: &Value) -> Result<Value> {
        match operation.get("targetLink").and_then(Value::as_str) {
            Some(target) if self.fetch_target => self.client.get(target).await,
            _ => Ok(operation.clone()),
        }
    }
}
