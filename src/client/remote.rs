//! Remote API Client
//!
//! The seam between the sync engine and the hosted backend. The engine only
//! sees [`RemoteApi`]; [`HttpRemote`] speaks the per-collection REST dialect:
//!
//! - `GET    /<collection>?limit=&offset=&fields=&category=&upcoming=`
//! - `POST   /<collection>`
//! - `PATCH  /<collection>/<id>`
//! - `DELETE /<collection>/<id>`
//!
//! Every failure is reported as a [`RemoteError`] whose [`RemoteErrorKind`]
//! is decided here, from the HTTP status and the backend's error code. The
//! replay loop decides retry-vs-abandon from the kind alone.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use thiserror::Error;

use crate::client::config::Config;
use crate::shared::records::{Collection, Mutation};

/// Classified remote failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteErrorKind {
    /// Could not reach the backend
    Network,
    /// No response within the deadline
    Timeout,
    /// 5xx or otherwise transient backend failure
    Server,
    /// Throttled by the backend
    RateLimited,
    /// Missing or rejected credential
    Unauthorized,
    /// Authenticated but not allowed
    PermissionDenied,
    /// Row-level access policy rejected the write
    PolicyViolation,
    /// Backend business rules rejected the request
    Rejected,
    /// Response body did not have the expected shape
    Decode,
}

impl RemoteErrorKind {
    /// Whether retrying the same request could succeed
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            RemoteErrorKind::Unauthorized
                | RemoteErrorKind::PermissionDenied
                | RemoteErrorKind::PolicyViolation
                | RemoteErrorKind::Rejected
        )
    }
}

impl fmt::Display for RemoteErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RemoteErrorKind::Network => "network",
            RemoteErrorKind::Timeout => "timeout",
            RemoteErrorKind::Server => "server",
            RemoteErrorKind::RateLimited => "rate limited",
            RemoteErrorKind::Unauthorized => "unauthorized",
            RemoteErrorKind::PermissionDenied => "permission denied",
            RemoteErrorKind::PolicyViolation => "policy violation",
            RemoteErrorKind::Rejected => "rejected",
            RemoteErrorKind::Decode => "decode",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{kind} error: {message}")]
pub struct RemoteError {
    pub kind: RemoteErrorKind,
    pub message: String,
}

impl RemoteError {
    pub fn new(kind: RemoteErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Network, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Timeout, message)
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::PermissionDenied, message)
    }

    pub fn is_recoverable(&self) -> bool {
        self.kind.is_recoverable()
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            RemoteErrorKind::Timeout
        } else if err.is_decode() {
            RemoteErrorKind::Decode
        } else {
            RemoteErrorKind::Network
        };
        Self::new(kind, err.to_string())
    }
}

/// Passthrough query parameters for a read
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchQuery {
    pub limit: Option<u32>,
    pub offset: u32,
    pub fields: Option<Vec<String>>,
    pub category: Option<String>,
    pub upcoming_only: bool,
}

impl FetchQuery {
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(limit) = self.limit {
            pairs.push(("limit", limit.to_string()));
        }
        if self.offset > 0 {
            pairs.push(("offset", self.offset.to_string()));
        }
        if let Some(fields) = self.fields.as_ref().filter(|f| !f.is_empty()) {
            pairs.push(("fields", fields.join(",")));
        }
        if let Some(category) = &self.category {
            pairs.push(("category", category.clone()));
        }
        if self.upcoming_only {
            pairs.push(("upcoming", "true".to_string()));
        }
        pairs
    }
}

/// One page of records from a read
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchPage {
    pub records: Vec<Value>,
    /// Total matching rows, when the backend reports it
    pub total_count: Option<u64>,
}

/// The remote system of record
#[async_trait]
pub trait RemoteApi: Send + Sync {
    async fn fetch(&self, collection: Collection, query: &FetchQuery) -> Result<FetchPage, RemoteError>;

    /// Execute one write. Returns the record as stored remotely when the
    /// backend sends a representation back.
    async fn apply(&self, mutation: &Mutation) -> Result<Option<Value>, RemoteError>;
}

/// Error body returned by the backend
#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Map an HTTP status and optional backend error code to a failure kind
pub fn classify_status(status: u16, code: Option<&str>) -> RemoteErrorKind {
    match code {
        // insufficient_privilege, raised by row-level security
        Some("42501") => return RemoteErrorKind::PolicyViolation,
        // raise_exception from a backend function or trigger
        Some("P0001") => return RemoteErrorKind::Rejected,
        Some(code) if code.starts_with("PGRST3") => return RemoteErrorKind::Unauthorized,
        _ => {}
    }

    match status {
        401 => RemoteErrorKind::Unauthorized,
        403 => RemoteErrorKind::PermissionDenied,
        408 => RemoteErrorKind::Timeout,
        429 => RemoteErrorKind::RateLimited,
        500..=599 => RemoteErrorKind::Server,
        400..=499 => RemoteErrorKind::Rejected,
        _ => RemoteErrorKind::Server,
    }
}

/// Parse `Content-Range: 0-19/57` (or `*/57`) into the total count
pub fn parse_content_range(value: &str) -> Option<u64> {
    let (_, total) = value.rsplit_once('/')?;
    total.trim().parse().ok()
}

/// HTTP adapter for the remote API
#[derive(Debug, Clone)]
pub struct HttpRemote {
    client: Client,
    base_url: Url,
    token: Option<String>,
}

impl HttpRemote {
    pub fn new(config: &Config) -> Result<Self, RemoteError> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| RemoteError::network(format!("failed to build HTTP client: {e}")))?;
        let base_url = Url::parse(config.server_url())
            .map_err(|e| RemoteError::new(RemoteErrorKind::Rejected, format!("invalid server URL: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(RemoteError::new(
                RemoteErrorKind::Rejected,
                format!("server URL cannot carry a path: {base_url}"),
            ));
        }

        Ok(Self {
            client,
            base_url,
            token: config.get_token().cloned(),
        })
    }

    /// Record ids are pushed as single path segments, so `/`, `?` and `#`
    /// inside an id are percent-encoded rather than reshaping the URL.
    fn url(&self, collection: Collection, id: Option<&str>) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(collection.as_str());
            if let Some(id) = id {
                segments.push(id);
            }
        }
        url
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Turn a non-success response into a classified error
    async fn check(response: Response) -> Result<Response, RemoteError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let parsed: Option<ErrorBody> = serde_json::from_str(&body).ok();
        let code = parsed.as_ref().and_then(|b| b.code.clone());
        let message = parsed
            .and_then(|b| b.message)
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| if body.is_empty() { status.to_string() } else { body });

        let kind = classify_status(status.as_u16(), code.as_deref());
        Err(RemoteError::new(kind, format!("{} {}", status.as_u16(), message)))
    }

    /// First record of a write response, if the backend returned one
    async fn representation(response: Response) -> Result<Option<Value>, RemoteError> {
        if response.status() == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        let body = response.text().await?;
        if body.trim().is_empty() {
            return Ok(None);
        }
        let value: Value =
            serde_json::from_str(&body).map_err(|e| RemoteError::new(RemoteErrorKind::Decode, e.to_string()))?;
        Ok(match value {
            Value::Array(mut rows) if !rows.is_empty() => Some(rows.swap_remove(0)),
            Value::Array(_) | Value::Null => None,
            other => Some(other),
        })
    }
}

#[async_trait]
impl RemoteApi for HttpRemote {
    async fn fetch(&self, collection: Collection, query: &FetchQuery) -> Result<FetchPage, RemoteError> {
        let request = self
            .client
            .get(self.url(collection, None))
            .query(&query.query_pairs())
            .header("Prefer", "count=exact");

        let response = Self::check(self.authorize(request).send().await?).await?;

        let headers = response.headers();
        let total_count = headers
            .get("Content-Range")
            .and_then(|h| h.to_str().ok())
            .and_then(parse_content_range)
            .or_else(|| {
                headers
                    .get("X-Total-Count")
                    .and_then(|h| h.to_str().ok())
                    .and_then(|v| v.trim().parse().ok())
            });

        let records: Vec<Value> = response.json().await?;
        tracing::debug!(%collection, count = records.len(), ?total_count, "fetched remote page");
        Ok(FetchPage { records, total_count })
    }

    async fn apply(&self, mutation: &Mutation) -> Result<Option<Value>, RemoteError> {
        let collection = mutation.collection();
        let payload = mutation
            .payload()
            .map_err(|e| RemoteError::new(RemoteErrorKind::Rejected, e.to_string()))?;

        let request = match mutation {
            Mutation::CreateEvent(_) | Mutation::CreateUser(_) => {
                self.client.post(self.url(collection, None)).json(&payload)
            }
            Mutation::UpdateEvent(_) | Mutation::UpdateUser(_) => self
                .client
                .patch(self.url(collection, Some(mutation.record_id())))
                .json(&payload),
            Mutation::DeleteEvent(_) | Mutation::DeleteUser(_) => {
                self.client.delete(self.url(collection, Some(mutation.record_id())))
            }
        };
        let request = request.header("Prefer", "return=representation");

        let response = Self::check(self.authorize(request).send().await?).await?;
        Self::representation(response).await
    }
}
