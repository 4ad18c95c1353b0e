//! Application context
//!
//! Everything a command needs from the invocation: effective
//! configuration, the resource registry, the console, and the HTTP
//! transport. Built once by the dispatcher, adjusted by group filters,
//! then handed to the leaf by reference.

use crate::cli::tree::ReleaseTrack;
use crate::config::{Config, Environment};
use crate::console::scoped::Editor;
use crate::console::Console;
use crate::error::Result;
use crate::gcp::auth::TokenSource;
use crate::gcp::client::ApiClient;
use crate::gcp::http::{user_agent, HttpSend, QuotaProject, RequestHeaders};
use crate::output::OutputOptions;
use crate::parallel::CancelFlag;
use crate::resource::{self, ListRequest, Registry};
use futures::stream::BoxStream;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Per-invocation state passed to group filters and leaves.
pub struct AppContext {
    pub config: Config,
    pub registry: Registry,
    pub console: Console,
    pub track: ReleaseTrack,
    /// Command names from the root to the leaf, without the tool name.
    pub command_path: Vec<String>,
    pub invocation_id: Uuid,
    pub output: OutputOptions,
    pub page_size: Option<usize>,
    /// `--async`: return operations without waiting.
    pub run_async: bool,
    pub editor: Arc<dyn Editor>,
    pub cancel: CancelFlag,
    transport: Arc<dyn HttpSend>,
    tokens: Option<Arc<dyn TokenSource>>,
    quota_project_disabled: bool,
}

impl AppContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Config,
        registry: Registry,
        console: Console,
        track: ReleaseTrack,
        command_path: Vec<String>,
        output: OutputOptions,
        editor: Arc<dyn Editor>,
        transport: Arc<dyn HttpSend>,
        tokens: Option<Arc<dyn TokenSource>>,
    ) -> Self {
        Self {
            config,
            registry,
            console,
            track,
            command_path,
            invocation_id: Uuid::new_v4(),
            output,
            page_size: None,
            run_async: false,
            editor,
            cancel: CancelFlag::new(),
            transport,
            tokens,
            quota_project_disabled: false,
        }
    }

    pub fn env(&self) -> &Environment {
        self.config.env()
    }

    /// `gcmd.compute.instances.list`
    pub fn command_path_dotted(&self) -> String {
        std::iter::once(crate::TOOL_NAME)
            .chain(self.command_path.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(".")
    }

    /// Stop sending `X-Goog-User-Project` for this invocation. Used by
    /// groups whose APIs reject the header.
    pub fn disable_quota_project(&mut self) {
        tracing::debug!("Quota project disabled for {}", self.command_path_dotted());
        self.quota_project_disabled = true;
    }

    /// `core/project`, required.
    pub fn project(&self) -> Result<String> {
        self.config.require("core", "project")
    }

    /// Client for one API call chain, carrying this invocation's headers.
    pub fn client(&self) -> Result<ApiClient> {
        let quota_project = if self.quota_project_disabled {
            None
        } else {
            let current = self.config.project()?;
            QuotaProject::from_config(&self.config)?
                .and_then(|q| q.header_value(current.as_deref()))
        };
        let headers = RequestHeaders::new(
            self.transport.clone(),
            self.tokens.clone(),
            user_agent(&self.command_path_dotted(), &self.invocation_id),
            quota_project,
        );
        Ok(ApiClient::new(Arc::new(headers)))
    }

    /// Base URL of an API after endpoint overrides.
    pub fn base_url(&self, api: &str) -> Result<String> {
        self.registry
            .base_url(api)
            .ok_or_else(|| crate::error::Error::Internal(format!("no collection registered for API {api}")))
    }

    /// Lazy list with `--page-size` and, when safe, `--limit` pushed down.
    pub fn list(&self, request: ListRequest) -> Result<BoxStream<'static, Result<Value>>> {
        let request = request
            .page_size(self.page_size)
            .limit(self.output.server_limit());
        tracing::debug!("Listing {} (page size {:?}, limit {:?})", request.url, request.page_size, request.limit);
        Ok(resource::list(Arc::new(self.client()?), request, self.console.clone()))
    }

    /// `--timeout` given to a command, or the waiter default.
    pub fn operation_timeout(&self, timeout: Option<Duration>) -> Duration {
        timeout.unwrap_or(crate::operations::waiter::DEFAULT_TIMEOUT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::scoped::ExternalEditor;
    use crate::gcp::http::{HttpRequest, HttpResponse, QUOTA_PROJECT_HEADER};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<HttpRequest>>,
    }

    #[async_trait]
    impl HttpSend for Recorder {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
            self.seen.lock().unwrap().push(request);
            Ok(HttpResponse {
                status: 200,
                body: json!({}).to_string(),
            })
        }
    }

    fn context(pairs: &[(&str, &str)], transport: Arc<Recorder>) -> AppContext {
        let env = Environment::from_pairs(pairs.iter().copied());
        let (console, _) = Console::captured("", false);
        AppContext::new(
            Config::in_memory(env),
            Registry::builtin().unwrap(),
            console,
            ReleaseTrack::Ga,
            vec!["compute".to_string(), "instances".to_string(), "list".to_string()],
            OutputOptions::single(None).unwrap(),
            Arc::new(ExternalEditor::new("true")),
            transport,
            None,
        )
    }

    fn header(request: &HttpRequest, name: &str) -> Option<String> {
        request
            .headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.clone())
    }

    #[test]
    fn test_dotted_path() {
        let ctx = context(&[], Arc::new(Recorder::default()));
        assert_eq!(ctx.command_path_dotted(), "gcmd.compute.instances.list");
    }

    #[tokio::test]
    async fn test_quota_project_header() {
        let transport = Arc::new(Recorder::default());
        let ctx = context(&[("CLOUDSDK_BILLING_QUOTA_PROJECT", "billing-proj")], transport.clone());
        ctx.client().unwrap().get("https://x/a").await.unwrap();

        let seen = transport.seen.lock().unwrap();
        assert_eq!(header(&seen[0], QUOTA_PROJECT_HEADER).as_deref(), Some("billing-proj"));
        assert!(header(&seen[0], "user-agent")
            .unwrap()
            .contains("command/gcmd.compute.instances.list"));
    }

    #[tokio::test]
    async fn test_quota_project_sentinels_and_disable() {
        let transport = Arc::new(Recorder::default());
        let ctx = context(&[("CLOUDSDK_BILLING_QUOTA_PROJECT", "LEGACY")], transport.clone());
        ctx.client().unwrap().get("https://x/a").await.unwrap();

        let mut ctx = context(
            &[
                ("CLOUDSDK_BILLING_QUOTA_PROJECT", "CURRENT_PROJECT"),
                ("CLOUDSDK_CORE_PROJECT", "my-project"),
            ],
            transport.clone(),
        );
        ctx.client().unwrap().get("https://x/b").await.unwrap();
        ctx.disable_quota_project();
        ctx.client().unwrap().get("https://x/c").await.unwrap();

        let seen = transport.seen.lock().unwrap();
        assert_eq!(header(&seen[0], QUOTA_PROJECT_HEADER), None);
        assert_eq!(header(&seen[1], QUOTA_PROJECT_HEADER).as_deref(), Some("my-project"));
        assert_eq!(header(&seen[2], QUOTA_PROJECT_HEADER), None);
    }

    #[test]
    fn test_project_required() {
        let ctx = context(&[], Arc::new(Recorder::default()));
        assert!(ctx.project().is_err());
    }
}
