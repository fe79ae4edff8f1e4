//! Remote API client.
//!
//! ```text
//! SyncEngine ──► RemoteClient ──► Transport (HttpTransport / test double)
//!                    │  timeout, retry, status classification
//!                    ▼
//!               envelope::normalize ──► NormalizedResponse
//! ```
//!
//! Everything above this module sees one canonical response shape and one
//! error type; the backend's envelope variations stop here.

mod client;
mod envelope;
mod transport;
mod wire;

pub use client::*;
pub use envelope::*;
pub use transport::*;
pub use wire::*;

use serde_json::Value;
use thiserror::Error;

use crate::error::ErrorCategory;

/// Remote failures, before the engine folds them into outcomes.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RemoteError {
    #[error("Request timed out")]
    Timeout,

    #[error("No connection: {0}")]
    NoConnection(String),

    #[error("HTTP {status}: {message}")]
    Http4xx { status: u16, message: String },

    #[error("Server error {status}: {message}")]
    Http5xx { status: u16, message: String },

    #[error("Unreadable response: {0}")]
    Parse(String),

    /// HTTP 200 carrying `success: false` or `status: "error"`.
    #[error("Rejected by server: {message}")]
    Rejected { message: String },
}

impl RemoteError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            RemoteError::NoConnection(_) => ErrorCategory::Connectivity,
            RemoteError::Http4xx { .. } | RemoteError::Rejected { .. } => {
                ErrorCategory::RemoteRejection
            }
            RemoteError::Timeout | RemoteError::Http5xx { .. } | RemoteError::Parse(_) => {
                ErrorCategory::TransientServer
            }
        }
    }

    /// Worth another attempt within the same request.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RemoteError::Timeout | RemoteError::NoConnection(_) | RemoteError::Http5xx { .. }
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, RemoteError::Http4xx { status: 404, .. })
    }

    /// The server's own wording, for rejections.
    pub fn server_message(&self) -> Option<&str> {
        match self {
            RemoteError::Http4xx { message, .. } | RemoteError::Rejected { message } => {
                Some(message)
            }
            _ => None,
        }
    }
}

pub type RemoteResult<T> = Result<T, RemoteError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        }
    }
}

/// A request relative to the configured base URL.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn with_query(mut self, key: &str, value: impl ToString) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn query_value(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Status and body as received.
#[derive(Debug, Clone, PartialEq)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

impl RawResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn json(status: u16, body: &Value) -> Self {
        Self::new(status, body.to_string())
    }
}
