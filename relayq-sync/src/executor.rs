/// Executor abstraction for dispatching queued requests
///
/// Performs the actual network call for one request and reports success,
/// failure, or conflict. The mock implementation records its calls for
/// tests, in the manner of a scripted transport; the HTTP implementation
/// (behind the `http` feature) maps transport faults and status classes
/// onto the error taxonomy.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;

use relayq_core::{Error, HttpMethod, QueuedRequest};

/// Result of dispatching one request
#[derive(Debug)]
pub enum ExecuteOutcome {
    /// Backend accepted the mutation
    Success(Value),
    /// Call failed; retryability follows `Error::is_retryable`
    Failure(Error),
    /// Backend reported a version mismatch; `server_state` is its snapshot
    Conflict { server_state: Option<Value> },
}

#[async_trait]
pub trait Executor: Send + Sync {
    /// Dispatch one request. `force` asks the backend to bypass its version
    /// check (client-wins resubmission).
    async fn execute(&self, request: &QueuedRequest, force: bool) -> ExecuteOutcome;
}

/// One call observed by the mock executor
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub method: HttpMethod,
    pub url: String,
    pub payload: Value,
    pub idempotency_key: String,
    pub force: bool,
}

/// Scripted executor for tests
///
/// Pops pre-loaded outcomes in order; once the script is exhausted every
/// call succeeds. All calls are recorded for assertion.
#[derive(Default)]
pub struct MockExecutor {
    script: Mutex<VecDeque<ExecuteOutcome>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl MockExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the next outcome to return
    pub fn push_outcome(&self, outcome: ExecuteOutcome) {
        self.script.lock().push_back(outcome);
    }

    /// Queue `n` retryable network failures
    pub fn push_network_failures(&self, n: usize) {
        let mut script = self.script.lock();
        for _ in 0..n {
            script.push_back(ExecuteOutcome::Failure(Error::Network(
                "simulated connection failure".to_string(),
            )));
        }
    }

    /// Calls observed so far
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl Executor for MockExecutor {
    async fn execute(&self, request: &QueuedRequest, force: bool) -> ExecuteOutcome {
        self.calls.lock().push(RecordedCall {
            method: request.method,
            url: request.url.clone(),
            payload: request.payload.clone(),
            idempotency_key: request.metadata.idempotency_key.clone(),
            force,
        });

        self.script
            .lock()
            .pop_front()
            .unwrap_or_else(|| ExecuteOutcome::Success(serde_json::json!({ "status": "synced" })))
    }
}

#[cfg(feature = "http")]
pub use self::http::HttpExecutor;

#[cfg(feature = "http")]
mod http {
    use super::*;
    use relayq_core::Result;
    use std::time::Duration;

    /// Executor backed by an authenticated HTTP client
    pub struct HttpExecutor {
        client: reqwest::Client,
        base_url: String,
        auth_token: Option<String>,
    }

    impl HttpExecutor {
        pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
            let client = reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .map_err(|e| Error::Internal(format!("http client: {}", e)))?;
            Ok(Self {
                client,
                base_url: base_url.into(),
                auth_token: None,
            })
        }

        /// Attach a bearer token to every outgoing call
        pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
            self.auth_token = Some(token.into());
            self
        }

        fn method_for(method: HttpMethod) -> reqwest::Method {
            match method {
                HttpMethod::Get => reqwest::Method::GET,
                HttpMethod::Post => reqwest::Method::POST,
                HttpMethod::Put => reqwest::Method::PUT,
                HttpMethod::Patch => reqwest::Method::PATCH,
                HttpMethod::Delete => reqwest::Method::DELETE,
            }
        }
    }

    #[async_trait]
    impl Executor for HttpExecutor {
        async fn execute(&self, request: &QueuedRequest, force: bool) -> ExecuteOutcome {
            let url = format!(
                "{}{}",
                self.base_url.trim_end_matches('/'),
                request.url
            );

            let mut builder = self
                .client
                .request(Self::method_for(request.method), &url)
                .header("Idempotency-Key", &request.metadata.idempotency_key)
                .json(&request.payload);

            if force {
                builder = builder.header("X-Conflict-Override", "true");
            }
            if let Some(token) = &self.auth_token {
                builder = builder.bearer_auth(token);
            }

            let response = match builder.send().await {
                Ok(response) => response,
                Err(e) => {
                    return ExecuteOutcome::Failure(Error::Network(e.to_string()));
                }
            };

            let status = response.status();
            if status == reqwest::StatusCode::CONFLICT {
                let server_state = response.json::<Value>().await.ok();
                return ExecuteOutcome::Conflict { server_state };
            }
            if status.is_success() {
                let body = response.json::<Value>().await.unwrap_or(Value::Null);
                return ExecuteOutcome::Success(body);
            }

            let message = response.text().await.unwrap_or_default();
            if status.is_server_error() {
                ExecuteOutcome::Failure(Error::Network(format!("HTTP {}: {}", status, message)))
            } else {
                ExecuteOutcome::Failure(Error::Server {
                    status: status.as_u16(),
                    message,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relayq_core::{
        now_ms, Action, ConflictStrategy, EntityType, Priority, RequestId, RequestMetadata,
        RequestStatus,
    };

    fn request() -> QueuedRequest {
        QueuedRequest {
            id: RequestId::new(),
            entity_type: EntityType::Order,
            action: Action::Create,
            method: HttpMethod::Post,
            url: "/api/v1/orders".to_string(),
            payload: serde_json::json!({"id": "order-1"}),
            priority: Priority::High,
            status: RequestStatus::Pending,
            dependencies: Vec::new(),
            conflict_strategy: ConflictStrategy::ServerWins,
            metadata: RequestMetadata::new(1, now_ms()),
            checksum: String::new(),
        }
    }

    #[tokio::test]
    async fn test_mock_executor_scripted_then_default() {
        let executor = MockExecutor::new();
        executor.push_network_failures(1);

        let outcome = executor.execute(&request(), false).await;
        assert!(matches!(outcome, ExecuteOutcome::Failure(Error::Network(_))));

        let outcome = executor.execute(&request(), false).await;
        assert!(matches!(outcome, ExecuteOutcome::Success(_)));
        assert_eq!(executor.call_count(), 2);
    }

    #[tokio::test]
    async fn test_mock_executor_records_calls() {
        let executor = MockExecutor::new();
        let req = request();

        executor.execute(&req, true).await;

        let calls = executor.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].method, HttpMethod::Post);
        assert_eq!(calls[0].url, "/api/v1/orders");
        assert_eq!(calls[0].payload, req.payload);
        assert_eq!(calls[0].idempotency_key, req.metadata.idempotency_key);
        assert!(calls[0].force);
    }
}
