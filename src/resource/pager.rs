//! List pager
//!
//! One lazy stream over any paginated list endpoint. Pages are fetched
//! only as the consumer pulls items, following `nextPageToken` until the
//! server stops returning one or the total limit is reached.

use crate::console::Console;
use crate::error::{Error, Result};
use crate::gcp::client::ApiClient;
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use serde_json::Value;
use std::sync::Arc;

/// Warning code Compute attaches to empty scopes of an aggregated list.
const NO_RESULTS_ON_PAGE: &str = "NO_RESULTS_ON_PAGE";

/// Fetches one page given the list URL and query.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch_page(&self, url: &str, query: &[(String, String)]) -> Result<Value>;
}

#[async_trait]
impl PageSource for ApiClient {
    async fn fetch_page(&self, url: &str, query: &[(String, String)]) -> Result<Value> {
        self.get_with_query(url, query).await
    }
}

/// Description of a list call.
#[derive(Debug, Clone)]
pub struct ListRequest {
    pub url: String,
    /// Extra query parameters sent with every page.
    pub query: Vec<(String, String)>,
    /// Response field holding the items (`items`, `buckets`, `projects`, ...).
    pub items_field: String,
    /// Query parameter carrying the page size (`pageSize`, or `maxResults` for Compute).
    pub page_size_param: String,
    pub page_token_param: String,
    pub next_page_token_field: String,
    /// Batch size hint.
    pub page_size: Option<usize>,
    /// Total number of items to emit.
    pub limit: Option<usize>,
    /// `items` is a map of scope -> `{ <items_field>: [...] }` (Compute aggregated lists).
    pub aggregated: bool,
}

impl ListRequest {
    pub fn new(url: impl Into<String>, items_field: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            query: Vec::new(),
            items_field: items_field.into(),
            page_size_param: "pageSize".to_string(),
            page_token_param: "pageToken".to_string(),
            next_page_token_field: "nextPageToken".to_string(),
            page_size: None,
            limit: None,
            aggregated: false,
        }
    }

    /// Compute style: `maxResults` for the page size.
    pub fn compute(url: impl Into<String>) -> Self {
        let mut request = Self::new(url, "items");
        request.page_size_param = "maxResults".to_string();
        request
    }

    /// Compute aggregated list; items are grouped by scope.
    pub fn compute_aggregated(url: impl Into<String>, items_field: impl Into<String>) -> Self {
        let mut request = Self::compute(url);
        request.items_field = items_field.into();
        request.aggregated = true;
        request
    }

    pub fn query(mut self, name: &str, value: impl Into<String>) -> Self {
        self.query.push((name.to_string(), value.into()));
        self
    }

    pub fn page_size(mut self, page_size: Option<usize>) -> Self {
        self.page_size = page_size.filter(|&n| n > 0);
        self
    }

    pub fn limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }

    /// Page size to request given how many items may still be emitted.
    fn request_size(&self, remaining: Option<usize>) -> Option<usize> {
        match (self.page_size, remaining) {
            (Some(size), Some(remaining)) => Some(size.min(remaining)),
            (Some(size), None) => Some(size),
            (None, Some(remaining)) => Some(remaining),
            (None, None) => None,
        }
    }
}

/// Items and continuation extracted from one response.
#[derive(Debug, Default)]
pub struct Page {
    pub items: Vec<Value>,
    pub next_token: Option<String>,
    pub unreachable: Vec<String>,
}

/// Split one list response into items, the next token and unreachable locations.
pub fn extract_page(request: &ListRequest, response: &Value) -> Page {
    let mut page = Page {
        next_token: response
            .get(&request.next_page_token_field)
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .map(str::to_string),
        ..Page::default()
    };

    if let Some(unreachable) = response.get("unreachable").and_then(Value::as_array) {
        page.unreachable.extend(
            unreachable
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string),
        );
    }

    if request.aggregated {
        flatten_aggregated(response, &request.items_field, &mut page);
    } else if let Some(items) = response.get(&request.items_field).and_then(Value::as_array) {
        page.items.extend(items.iter().cloned());
    }
    page
}

/// Flatten `items.{scope}.{field}` into one list, in scope order.
fn flatten_aggregated(response: &Value, field: &str, page: &mut Page) {
    let Some(scopes) = response.get("items").and_then(Value::as_object) else {
        return;
    };
    for (scope, entry) in scopes {
        if let Some(items) = entry.get(field).and_then(Value::as_array) {
            page.items.extend(items.iter().cloned());
        }
        if let Some(warning) = entry.get("warning") {
            let code = warning.get("code").and_then(Value::as_str).unwrap_or_default();
            if code != NO_RESULTS_ON_PAGE {
                let message = warning.get("message").and_then(Value::as_str).unwrap_or(code);
                page.unreachable.push(format!("{scope}: {message}"));
            }
        }
    }
}

struct PagerState {
    source: Arc<dyn PageSource>,
    request: ListRequest,
    console: Console,
    next_token: Option<String>,
    remaining: Option<usize>,
    finished: bool,
}

async fn next_page(mut state: PagerState) -> Result<Option<(Vec<Value>, PagerState)>> {
    if state.finished || state.remaining == Some(0) {
        return Ok(None);
    }

    let mut query = state.request.query.clone();
    if let Some(size) = state.request.request_size(state.remaining) {
        query.push((state.request.page_size_param.clone(), size.to_string()));
    }
    if let Some(token) = &state.next_token {
        query.push((state.request.page_token_param.clone(), token.clone()));
    }

    tracing::debug!("Fetching page of {} (token: {:?})", state.request.url, state.next_token);
    let response = state.source.fetch_page(&state.request.url, &query).await?;
    let mut page = extract_page(&state.request, &response);

    if !page.unreachable.is_empty() {
        let message = format!(
            "The following locations were unreachable: {}",
            page.unreachable.join(", ")
        );
        if let Err(e) = state.console.warn(&message) {
            tracing::warn!("{} ({})", message, e);
        }
    }

    if let Some(remaining) = state.remaining.as_mut() {
        page.items.truncate(*remaining);
        *remaining -= page.items.len();
    }
    state.finished = page.next_token.is_none();
    state.next_token = page.next_token;

    Ok(Some((page.items, state)))
}

/// Lazy stream of items. Emits exactly the server's items in server order,
/// truncated to the request's limit.
pub fn list(source: Arc<dyn PageSource>, request: ListRequest, console: Console) -> BoxStream<'static, Result<Value>> {
    let state = PagerState {
        source,
        remaining: request.limit,
        request,
        console,
        next_token: None,
        finished: false,
    };

    stream::try_unfold(state, next_page)
        .map_ok(|items| stream::iter(items.into_iter().map(Ok::<Value, Error>)))
        .try_flatten()
        .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    struct Pages {
        pages: Vec<Value>,
        calls: Mutex<Vec<Vec<(String, String)>>>,
    }

    #[async_trait]
    impl PageSource for Pages {
        async fn fetch_page(&self, _url: &str, query: &[(String, String)]) -> Result<Value> {
            let mut calls = self.calls.lock().unwrap();
            let index = calls.len();
            calls.push(query.to_vec());
            Ok(self.pages.get(index).cloned().unwrap_or(json!({})))
        }
    }

    fn pages(pages: Vec<Value>) -> Arc<Pages> {
        Arc::new(Pages {
            pages,
            calls: Mutex::new(Vec::new()),
        })
    }

    fn names(items: &[Value]) -> Vec<&str> {
        items.iter().map(|i| i["name"].as_str().unwrap()).collect()
    }

    #[tokio::test]
    async fn test_follows_page_tokens() {
        let source = pages(vec![
            json!({"items": [{"name": "a"}, {"name": "b"}], "nextPageToken": "t1"}),
            json!({"items": [{"name": "c"}]}),
        ]);
        let (console, _) = Console::captured("", false);
        let items: Vec<Value> = list(source.clone(), ListRequest::new("u", "items"), console)
            .try_collect()
            .await
            .unwrap();
        assert_eq!(names(&items), vec!["a", "b", "c"]);
        let calls = source.calls.lock().unwrap();
        assert_eq!(calls[1], vec![("pageToken".to_string(), "t1".to_string())]);
    }

    #[tokio::test]
    async fn test_unreachable_warning_does_not_stop_listing() {
        let source = pages(vec![
            json!({"items": [{"name": "a"}], "unreachable": ["zones/z"], "nextPageToken": "t1"}),
            json!({"items": [{"name": "b"}]}),
        ]);
        let (console, _) = Console::captured("", false);
        let items: Vec<Value> = list(source, ListRequest::new("u", "items"), console.with_broken_err())
            .try_collect()
            .await
            .unwrap();
        assert_eq!(names(&items), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_page_size_never_exceeds_remaining_limit() {
        let source = pages(vec![
            json!({"items": [{"name": "a"}, {"name": "b"}], "nextPageToken": "t1"}),
            json!({"items": [{"name": "c"}, {"name": "d"}], "nextPageToken": "t2"}),
        ]);
        let (console, _) = Console::captured("", false);
        let request = ListRequest::new("u", "items").page_size(Some(2)).limit(Some(3));
        let items: Vec<Value> = list(source.clone(), request, console).try_collect().await.unwrap();
        assert_eq!(names(&items), vec!["a", "b", "c"]);

        let calls = source.calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert!(calls[0].contains(&("pageSize".to_string(), "2".to_string())));
        assert!(calls[1].contains(&("pageSize".to_string(), "1".to_string())));
    }

    #[tokio::test]
    async fn test_unreachable_is_a_warning() {
        let source = pages(vec![json!({"items": [{"name": "a"}], "unreachable": ["us-east1"]})]);
        let (console, captured) = Console::captured("", false);
        let items: Vec<Value> = list(source, ListRequest::new("u", "items"), console)
            .try_collect()
            .await
            .unwrap();
        assert_eq!(items.len(), 1);
        assert!(captured.err.contents().contains("WARNING: The following locations were unreachable: us-east1"));
    }

    #[tokio::test]
    async fn test_lazy_fetching() {
        let source = pages(vec![
            json!({"items": [{"name": "a"}], "nextPageToken": "t1"}),
            json!({"items": [{"name": "b"}]}),
        ]);
        let (console, _) = Console::captured("", false);
        let mut stream = list(source.clone(), ListRequest::new("u", "items"), console);
        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first["name"], "a");
        assert_eq!(source.calls.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_flatten_aggregated() {
        let response = json!({
            "items": {
                "zones/us-central1-a": {"instances": [{"name": "vm-1"}]},
                "zones/us-east1-b": {"warning": {"code": "NO_RESULTS_ON_PAGE", "message": "none"}},
                "zones/asia-east1-a": {"warning": {"code": "UNREACHABLE", "message": "zone down"}},
                "zones/europe-west1-b": {"instances": [{"name": "vm-2"}]}
            }
        });
        let request = ListRequest::compute_aggregated("u", "instances");
        let page = extract_page(&request, &response);
        assert_eq!(names(&page.items), vec!["vm-1", "vm-2"]);
        assert_eq!(page.unreachable, vec!["zones/asia-east1-a: zone down"]);
        assert!(page.next_token.is_none());
    }
}
