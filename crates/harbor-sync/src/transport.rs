//! Transport abstraction for talking to the remote collection.
//!
//! A transport performs exactly one request per call and classifies the
//! result into one of four outcomes. It never fails: connectivity problems,
//! timeouts and error statuses are all values of [`RemoteOutcome`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{Result, SyncError};

/// Header carrying the real verb when PUT and DELETE are tunnelled over POST.
pub const METHOD_OVERRIDE_HEADER: &str = "X-HTTP-Method-Override";

/// HTTP verb of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Post,
    Get,
    Put,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Post => "POST",
            Method::Get => "GET",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        }
    }

    fn to_reqwest(self) -> reqwest::Method {
        match self {
            Method::Post => reqwest::Method::POST,
            Method::Get => reqwest::Method::GET,
            Method::Put => reqwest::Method::PUT,
            Method::Delete => reqwest::Method::DELETE,
        }
    }
}

/// A fully resolved request.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportRequest {
    pub method: Method,
    pub url: String,
    /// Query-string parameters, appended in order.
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    /// JSON body text.
    pub body: Option<String>,
    pub timeout: Duration,
}

impl TransportRequest {
    pub fn new(method: Method, url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            method,
            url: url.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
            timeout,
        }
    }

    /// Value of a header, matched case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Tunnel PUT and DELETE through POST for servers that only accept
    /// GET and POST. Other verbs are left alone.
    pub fn emulate_http(mut self) -> Self {
        if matches!(self.method, Method::Put | Method::Delete) {
            self.headers.push((
                METHOD_OVERRIDE_HEADER.to_string(),
                self.method.as_str().to_string(),
            ));
            self.method = Method::Post;
        }
        self
    }
}

/// A successful response.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteResponse {
    pub status: u16,
    pub body: String,
}

impl RemoteResponse {
    /// Parse the body. An empty body parses as `None`.
    pub fn json(&self) -> std::result::Result<Option<Value>, serde_json::Error> {
        if self.body.trim().is_empty() {
            return Ok(None);
        }
        serde_json::from_str(&self.body).map(Some)
    }
}

/// Details of a failed call.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteFailure {
    /// HTTP status, when a response arrived at all.
    pub status: Option<u16>,
    pub body: Option<String>,
    pub reason: String,
}

impl From<RemoteFailure> for SyncError {
    fn from(f: RemoteFailure) -> Self {
        SyncError::Remote {
            status: f.status,
            body: f.body,
            reason: f.reason,
        }
    }
}

/// The four ways a remote call can end.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteOutcome {
    /// 2xx with a body.
    Success(RemoteResponse),
    /// 304: nothing new, but the server answered.
    NotModified,
    /// No connectivity; no request was attempted.
    Offline,
    /// Error status, timeout or other failure.
    Error(RemoteFailure),
}

/// Transport trait for performing remote calls.
///
/// Implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait Transport: Send + Sync {
    /// Perform one request.
    async fn call(&self, request: TransportRequest) -> RemoteOutcome;
}

/// reqwest-backed HTTP transport.
///
/// Connectivity is tracked with a shared flag the host flips as the
/// network comes and goes. While it is down every call is `Offline`
/// without touching the network. A request that is attempted and cannot
/// connect is an `Error`.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    online: Arc<AtomicBool>,
}

impl HttpTransport {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .build()
            .map_err(|e| SyncError::Transport(e.to_string()))?;
        Ok(Self::with_client(client))
    }

    /// Use a preconfigured client (proxies, TLS roots, default headers).
    pub fn with_client(client: Client) -> Self {
        Self {
            client,
            online: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn call(&self, request: TransportRequest) -> RemoteOutcome {
        if !self.is_online() {
            debug!(url = %request.url, "offline, skipping remote call");
            return RemoteOutcome::Offline;
        }

        let mut builder = self
            .client
            .request(request.method.to_reqwest(), &request.url)
            .timeout(request.timeout);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = match builder.send().await {
            Ok(response) => response,
            Err(e) => {
                let reason = if e.is_timeout() {
                    format!("timed out after {:?}", request.timeout)
                } else if e.is_connect() {
                    format!("connection failed: {}", e)
                } else {
                    e.to_string()
                };
                warn!(url = %request.url, method = request.method.as_str(), %reason, "request failed");
                return RemoteOutcome::Error(RemoteFailure {
                    status: None,
                    body: None,
                    reason,
                });
            }
        };

        let status = response.status();
        if status == reqwest::StatusCode::NOT_MODIFIED {
            return RemoteOutcome::NotModified;
        }

        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                return RemoteOutcome::Error(RemoteFailure {
                    status: Some(status.as_u16()),
                    body: None,
                    reason: format!("failed to read body: {}", e),
                })
            }
        };

        if status.is_success() {
            RemoteOutcome::Success(RemoteResponse {
                status: status.as_u16(),
                body,
            })
        } else {
            warn!(
                url = %request.url,
                method = request.method.as_str(),
                status = status.as_u16(),
                "server returned an error status"
            );
            RemoteOutcome::Error(RemoteFailure {
                status: Some(status.as_u16()),
                reason: status
                    .canonical_reason()
                    .unwrap_or("unexpected status")
                    .to_string(),
                body: Some(body),
            })
        }
    }
}

/// A scripted in-memory transport for testing.
///
/// Answers calls from a queue of canned outcomes and records every request.
/// An empty queue answers `Offline`.
pub mod memory {
    use super::*;
    use std::collections::VecDeque;
    use tokio::sync::Mutex;

    #[derive(Default)]
    pub struct ScriptedTransport {
        outcomes: Mutex<VecDeque<RemoteOutcome>>,
        requests: Mutex<Vec<TransportRequest>>,
    }

    impl ScriptedTransport {
        pub fn new() -> Self {
            Self::default()
        }

        /// Queue the outcome of the next unanswered call.
        pub async fn push(&self, outcome: RemoteOutcome) {
            self.outcomes.lock().await.push_back(outcome);
        }

        /// Queue a 200 response with a JSON body.
        pub async fn push_json(&self, body: Value) {
            self.push(RemoteOutcome::Success(RemoteResponse {
                status: 200,
                body: body.to_string(),
            }))
            .await;
        }

        /// Every request seen so far, oldest first.
        pub async fn requests(&self) -> Vec<TransportRequest> {
            self.requests.lock().await.clone()
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn call(&self, request: TransportRequest) -> RemoteOutcome {
            self.requests.lock().await.push(request);
            self.outcomes
                .lock()
                .await
                .pop_front()
                .unwrap_or(RemoteOutcome::Offline)
        }
    }
}
