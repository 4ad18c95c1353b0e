//! API client
//!
//! JSON convenience layer over a composed transport. Every service call made
//! by a command goes through an [`ApiClient`].

use super::http::{HttpRequest, HttpSend};
use crate::error::Result;
use reqwest::Method;
use serde_json::Value;
use std::sync::Arc;

/// JSON REST client bound to one invocation's transport chain.
#[derive(Clone)]
pub struct ApiClient {
    transport: Arc<dyn HttpSend>,
}

impl ApiClient {
    pub fn new(transport: Arc<dyn HttpSend>) -> Self {
        Self { transport }
    }

    /// Send a prepared request and decode the JSON response.
    pub async fn execute(&self, request: HttpRequest) -> Result<Value> {
        self.transport.send(request).await?.json()
    }

    /// Make a GET request to a GCP API
    pub async fn get(&self, url: &str) -> Result<Value> {
        self.execute(HttpRequest::new(Method::GET, url)).await
    }

    /// GET with query parameters.
    pub async fn get_with_query(&self, url: &str, query: &[(String, String)]) -> Result<Value> {
        let mut request = HttpRequest::new(Method::GET, url);
        request.query.extend_from_slice(query);
        self.execute(request).await
    }

    /// Make a POST request to a GCP API
    pub async fn post(&self, url: &str, body: Option<Value>) -> Result<Value> {
        let mut request = HttpRequest::new(Method::POST, url);
        request.body = body;
        self.execute(request).await
    }

    /// PATCH with an optional `updateMask`.
    pub async fn patch(&self, url: &str, body: Value, update_mask: Option<&str>) -> Result<Value> {
        let mut request = HttpRequest::new(Method::PATCH, url).json(body);
        if let Some(mask) = update_mask {
            request = request.query("updateMask", mask);
        }
        self.execute(request).await
    }

    /// Replace a resource.
    pub async fn put(&self, url: &str, body: Value) -> Result<Value> {
        self.execute(HttpRequest::new(Method::PUT, url).json(body))
            .await
    }

    /// Make a DELETE request to a GCP API
    pub async fn delete(&self, url: &str) -> Result<Value> {
        self.execute(HttpRequest::new(Method::DELETE, url)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gcp::http::HttpResponse;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct Echo(Mutex<Vec<HttpRequest>>);

    #[async_trait]
    impl HttpSend for Echo {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
            let body = match request.method {
                Method::DELETE => String::new(),
                _ => serde_json::json!({"method": request.method.as_str()}).to_string(),
            };
            self.0.lock().unwrap().push(request);
            Ok(HttpResponse { status: 200, body })
        }
    }

    #[tokio::test]
    async fn test_verbs_and_empty_bodies() {
        let echo = Arc::new(Echo(Mutex::new(Vec::new())));
        let client = ApiClient::new(echo.clone());
        assert_eq!(client.get("http://x").await.unwrap()["method"], "GET");
        assert_eq!(client.delete("http://x").await.unwrap(), Value::Null);
        client
            .patch("http://x", serde_json::json!({}), Some("bindings,etag"))
            .await
            .unwrap();
        let seen = echo.0.lock().unwrap();
        assert_eq!(seen[2].query, vec![("updateMask".to_string(), "bindings,etag".to_string())]);
    }
}
