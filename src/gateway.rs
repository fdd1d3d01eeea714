//! Manual trigger: shared-secret check in front of [`TaskRunner::run`].

use std::sync::Arc;

use axum::http::StatusCode;
use serde_json::{json, Value};
use tracing::{error, info, warn};

use crate::storage::format_instant;
use crate::task::{panic_message, RunOutcome, TaskResult, TaskRunner, Trigger};

/// Response to a manual trigger request, independent of the HTTP layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerResponse {
    /// The task ran; `result` says whether it succeeded.
    Triggered(TaskResult),
    /// The token did not match the configured secret.
    Unauthorized,
    /// A run was already in progress.
    Busy,
    /// The run faulted unexpectedly.
    Fault(String),
}

impl TriggerResponse {
    pub fn status(&self) -> StatusCode {
        match self {
            TriggerResponse::Triggered(_) => StatusCode::OK,
            TriggerResponse::Unauthorized => StatusCode::UNAUTHORIZED,
            TriggerResponse::Busy => StatusCode::CONFLICT,
            TriggerResponse::Fault(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn body(&self) -> Value {
        match self {
            TriggerResponse::Triggered(result) => {
                let message = if result.success {
                    "Job triggered successfully"
                } else {
                    "Job triggered, but the task reported a failure"
                };
                json!({
                    "success": true,
                    "message": message,
                    "timestamp": format_instant(&result.timestamp),
                    "result": result,
                })
            }
            TriggerResponse::Unauthorized => json!({ "error": "Unauthorized" }),
            TriggerResponse::Busy => json!({
                "success": false,
                "error": "Job already running",
                "message": "A run is already in progress, try again once it finishes",
            }),
            TriggerResponse::Fault(message) => json!({
                "success": false,
                "error": "Failed to trigger job",
                "message": message,
            }),
        }
    }
}

pub struct TriggerGateway {
    runner: Arc<TaskRunner>,
    secret: Option<String>,
}

impl TriggerGateway {
    /// An empty secret is treated as no secret.
    pub fn new(runner: Arc<TaskRunner>, secret: Option<String>) -> Self {
        let secret = secret.filter(|s| !s.is_empty());
        if secret.is_none() {
            warn!("no trigger secret configured, manual triggers are unauthenticated");
        }
        Self { runner, secret }
    }

    pub fn requires_token(&self) -> bool {
        self.secret.is_some()
    }

    fn authorize(&self, token: Option<&str>) -> bool {
        match (&self.secret, token) {
            (None, _) => true,
            (Some(expected), Some(supplied)) => tokens_match(expected, supplied),
            (Some(_), None) => false,
        }
    }

    /// Validate `token` and, if authorized, run the task to completion.
    pub async fn handle(&self, token: Option<&str>) -> TriggerResponse {
        if !self.authorize(token) {
            warn!(token_supplied = token.is_some(), "manual trigger rejected");
            return TriggerResponse::Unauthorized;
        }

        let runner = self.runner.clone();
        let run = tokio::spawn(async move { runner.run(Trigger::Manual).await });

        match run.await {
            Ok(RunOutcome::Finished(result)) => {
                info!(success = result.success, at = %format_instant(&result.timestamp), "manual trigger completed");
                TriggerResponse::Triggered(result)
            }
            Ok(RunOutcome::Busy) => TriggerResponse::Busy,
            Err(e) => {
                let message = if e.is_panic() {
                    panic_message(e.into_panic())
                } else {
                    e.to_string()
                };
                error!(%message, "manual trigger faulted");
                TriggerResponse::Fault(message)
            }
        }
    }
}

/// Exact comparison whose running time does not depend on where the inputs
/// first differ.
fn tokens_match(expected: &str, supplied: &str) -> bool {
    let (a, b) = (expected.as_bytes(), supplied.as_bytes());
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{LastRun, LogEntry, MemoryStateStore, StateStore, StoreError};

    fn gateway(secret: Option<&str>) -> (TriggerGateway, Arc<MemoryStateStore>) {
        let store = Arc::new(MemoryStateStore::new());
        let runner = Arc::new(TaskRunner::with_heartbeat(store.clone()));
        (TriggerGateway::new(runner, secret.map(String::from)), store)
    }

    #[test]
    fn test_tokens_match_is_exact() {
        assert!(tokens_match("abc123", "abc123"));
        assert!(!tokens_match("abc123", "abc124"));
        assert!(!tokens_match("abc123", "abc12"));
        assert!(!tokens_match("abc123", "ABC123"));
        assert!(!tokens_match("abc123", ""));
    }

    #[tokio::test]
    async fn test_wrong_or_missing_token_is_unauthorized() {
        let (gw, store) = gateway(Some("abc123"));
        assert!(gw.requires_token());

        for token in [Some("nope"), Some(""), Some("abc1234"), None] {
            let resp = gw.handle(token).await;
            assert_eq!(resp, TriggerResponse::Unauthorized);
            assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
            assert_eq!(resp.body(), json!({ "error": "Unauthorized" }));
        }

        assert!(store.read_log().await.unwrap().is_empty());
        assert_eq!(store.last_run().await, LastRun::Never);
    }

    #[tokio::test]
    async fn test_matching_token_runs_task() {
        let (gw, store) = gateway(Some("abc123"));
        let resp = gw.handle(Some("abc123")).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let body = resp.body();
        assert_eq!(body["success"], true);
        assert_eq!(body["message"], "Job triggered successfully");
        assert_eq!(body["result"]["success"], true);
        assert_eq!(body["timestamp"], body["result"]["timestamp"]);

        assert_eq!(store.read_log().await.unwrap().len(), 1);
        assert_eq!(
            store.last_run().await.to_string(),
            body["timestamp"].as_str().unwrap()
        );
    }

    #[tokio::test]
    async fn test_no_secret_or_empty_secret_allows_anyone() {
        for secret in [None, Some("")] {
            let (gw, store) = gateway(secret);
            assert!(!gw.requires_token());
            assert_eq!(gw.handle(None).await.status(), StatusCode::OK);
            assert_eq!(gw.handle(Some("anything")).await.status(), StatusCode::OK);
            assert_eq!(store.read_log().await.unwrap().len(), 2);
        }
    }

    #[tokio::test]
    async fn test_task_failure_is_still_a_200() {
        let (gw, store) = gateway(None);
        store.set_fail_writes(true);

        let resp = gw.handle(None).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = resp.body();
        assert_eq!(body["success"], true);
        assert_eq!(body["result"]["success"], false);
        assert!(body["result"]["detail"].is_string());
    }

    #[test]
    fn test_fault_and_busy_bodies() {
        let fault = TriggerResponse::Fault("boom".to_string());
        assert_eq!(fault.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            fault.body(),
            json!({ "success": false, "error": "Failed to trigger job", "message": "boom" })
        );

        let busy = TriggerResponse::Busy;
        assert_eq!(busy.status(), StatusCode::CONFLICT);
        assert_eq!(busy.body()["success"], false);
        assert_eq!(busy.body()["error"], "Job already running");
    }

    /// Store whose last-run write panics, so the fault escapes the runner.
    struct ExplodingStore(MemoryStateStore);

    #[async_trait::async_trait]
    impl StateStore for ExplodingStore {
        async fn record_run(&self, _at: chrono::DateTime<chrono::Utc>) -> Result<(), StoreError> {
            panic!("record_run exploded");
        }

        async fn last_run(&self) -> LastRun {
            self.0.last_run().await
        }

        async fn append_log(&self, entry: &LogEntry) -> Result<(), StoreError> {
            self.0.append_log(entry).await
        }

        async fn read_log(&self) -> Result<Vec<LogEntry>, StoreError> {
            self.0.read_log().await
        }
    }

    #[tokio::test]
    async fn test_runner_fault_becomes_500() {
        let runner = Arc::new(TaskRunner::with_heartbeat(Arc::new(ExplodingStore(
            MemoryStateStore::new(),
        ))));
        let gw = TriggerGateway::new(runner.clone(), None);

        let resp = gw.handle(None).await;
        assert_eq!(resp, TriggerResponse::Fault("record_run exploded".to_string()));
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!runner.is_running());
    }
}
