//! Operation waiter
//!
//! Polls until the operation is done, sleeping 1s, 2s, 4s, ... capped at
//! 10s (±20% jitter) between polls. A spinner tracks the wait on stderr.

use super::{OperationPoller, OperationRef};
use crate::backoff::Backoff;
use crate::console::progress::ProgressTracker;
use crate::console::Console;
use crate::error::{Error, Result};
use serde_json::Value;
use std::time::Duration;
use tokio::time::Instant;

/// Default `--timeout` for operation waits.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Polling policy for one wait.
#[derive(Debug, Clone)]
pub struct Waiter {
    backoff: Backoff,
    timeout: Duration,
}

impl Default for Waiter {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

impl Waiter {
    pub fn new(timeout: Duration) -> Self {
        Self {
            backoff: Backoff::default(),
            timeout,
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Poll `operation` until done. `initial` is the operation as returned by
    /// the mutating call; a done one is not polled again.
    pub async fn wait(
        &self,
        poller: &dyn OperationPoller,
        operation: &OperationRef,
        initial: Option<Value>,
        console: &Console,
    ) -> Result<Value> {
        let deadline = Instant::now() + self.timeout;
        let mut backoff = self.backoff.clone();
        let mut tracker = ProgressTracker::start(
            console,
            format!("Waiting for operation [{}] to complete", operation.name),
        )?;

        let mut current = initial.filter(|op| poller.is_done(op));
        let mut polls = 0u32;
        let done = loop {
            if let Some(op) = current.take() {
                break op;
            }
            let op = poller.poll(operation).await?;
            polls += 1;
            tracing::debug!("Polled operation {} ({} polls)", operation.name, polls);
            if poller.is_done(&op) {
                break op;
            }

            let now = Instant::now();
            if now >= deadline {
                tracker.fail()?;
                return Err(Error::Timeout {
                    operation: operation.name.clone(),
                    seconds: self.timeout.as_secs(),
                });
            }
            tracker.tick()?;
            let delay = backoff.next_delay().min(deadline - now);
            tokio::time::sleep(delay).await;
        };

        if let Some(message) = poller.error_message(&done) {
            tracker.fail()?;
            return Err(Error::Operation(message));
        }
        tracker.finish("done.")?;
        console.status(&format!(
            "Operation [{}] finished successfully.",
            operation.name
        ))?;
        poller.result(&done).await
    }
}

/// Wait with the default policy and `timeout`.
pub async fn wait(
    poller: &dyn OperationPoller,
    operation: &OperationRef,
    timeout: Duration,
    console: &Console,
) -> Result<Value> {
    Waiter::new(timeout).wait(poller, operation, None, console).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    struct Scripted {
        states: Mutex<Vec<Value>>,
        polls: Mutex<Vec<Instant>>,
    }

    impl Scripted {
        fn new(states: Vec<Value>) -> Self {
            Self {
                states: Mutex::new(states.into_iter().rev().collect()),
                polls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl OperationPoller for Scripted {
        async fn poll(&self, _operation: &OperationRef) -> Result<Value> {
            self.polls.lock().unwrap().push(Instant::now());
            let mut states = self.states.lock().unwrap();
            Ok(if states.len() > 1 {
                states.pop().unwrap()
            } else {
                states[0].clone()
            })
        }

        fn is_done(&self, operation: &Value) -> bool {
            operation["done"] == json!(true)
        }

        fn error_message(&self, operation: &Value) -> Option<String> {
            operation["error"]["message"].as_str().map(str::to_string)
        }

        async fn result(&self, operation: &Value) -> Result<Value> {
            Ok(operation["response"].clone())
        }
    }

    fn op() -> OperationRef {
        OperationRef {
            name: "op".to_string(),
            url: "https://x/operations/op".to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_until_done() {
        let poller = Scripted::new(vec![json!({"done": false}), json!({"done": true, "response": {"ok": 1}})]);
        let (console, captured) = Console::captured("", false);
        let waiter = Waiter::default().with_backoff(Backoff::default().without_jitter());
        let result = waiter.wait(&poller, &op(), None, &console).await.unwrap();
        assert_eq!(result, json!({"ok": 1}));

        let polls = poller.polls.lock().unwrap();
        assert_eq!(polls.len(), 2);
        assert_eq!(polls[1] - polls[0], Duration::from_secs(1));
        let err = captured.err.contents();
        assert!(err.contains("Waiting for operation [op] to complete...done."));
        assert!(err.contains("Operation [op] finished successfully."));
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_doubles_to_cap() {
        let mut states = vec![json!({"done": false}); 6];
        states.push(json!({"done": true}));
        let poller = Scripted::new(states);
        let (console, _) = Console::captured("", false);
        let waiter = Waiter::default().with_backoff(Backoff::default().without_jitter());
        waiter.wait(&poller, &op(), None, &console).await.unwrap();

        let polls = poller.polls.lock().unwrap();
        let gaps: Vec<u64> = polls.windows(2).map(|w| (w[1] - w[0]).as_secs()).collect();
        assert_eq!(gaps, vec![1, 2, 4, 8, 10, 10]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_overshoots_by_at_most_one_interval() {
        let poller = Scripted::new(vec![json!({"done": false})]);
        let (console, captured) = Console::captured("", false);
        let start = Instant::now();
        let waiter = Waiter::new(Duration::from_secs(30)).with_backoff(Backoff::default().without_jitter());
        let err = waiter.wait(&poller, &op(), None, &console).await.unwrap_err();
        assert!(matches!(err, Error::Timeout { seconds: 30, .. }));
        assert!(Instant::now() - start <= Duration::from_secs(30 + 10));
        assert!(captured.err.contents().contains("failed."));
    }

    #[tokio::test(start_paused = true)]
    async fn test_operation_error_is_verbatim() {
        let poller = Scripted::new(vec![json!({"done": true, "error": {"message": "Duplicate name in schema: T."}})]);
        let (console, _) = Console::captured("", false);
        let err = Waiter::default().wait(&poller, &op(), None, &console).await.unwrap_err();
        assert_eq!(err.to_string(), "Duplicate name in schema: T.");
    }

    #[tokio::test(start_paused = true)]
    async fn test_done_initial_operation_is_not_polled() {
        let poller = Scripted::new(vec![json!({"done": false})]);
        let (console, _) = Console::captured("", false);
        let initial = json!({"done": true, "response": "r"});
        let result = Waiter::default()
            .wait(&poller, &op(), Some(initial), &console)
            .await
            .unwrap();
        assert_eq!(result, json!("r"));
        assert!(poller.polls.lock().unwrap().is_empty());
    }
}
