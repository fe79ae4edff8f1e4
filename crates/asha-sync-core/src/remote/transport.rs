//! Request transport.

use async_trait::async_trait;
use reqwest::{Client, Url};
use thiserror::Error;
use tracing::debug;

use super::{ApiRequest, Method, RawResponse, RemoteError};
use crate::config::SyncConfig;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("timed out")]
    Timeout,

    #[error("{0}")]
    NoConnection(String),
}

impl From<TransportError> for RemoteError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Timeout => RemoteError::Timeout,
            TransportError::NoConnection(reason) => RemoteError::NoConnection(reason),
        }
    }
}

/// Sends one request and returns the raw response. Status codes are not
/// interpreted here.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &ApiRequest) -> Result<RawResponse, TransportError>;
}

/// HTTP transport over reqwest.
pub struct HttpTransport {
    client: Client,
    base_url: Url,
}

impl HttpTransport {
    pub fn new(config: &SyncConfig) -> Result<Self, RemoteError> {
        let mut base = config.base_url.trim().to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base)
            .map_err(|e| RemoteError::Parse(format!("invalid base URL {}: {}", base, e)))?;
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| RemoteError::NoConnection(e.to_string()))?;

        Ok(Self { client, base_url })
    }

    pub fn url_for(&self, request: &ApiRequest) -> Result<Url, TransportError> {
        let mut url = self
            .base_url
            .join(request.path.trim_start_matches('/'))
            .map_err(|e| TransportError::NoConnection(format!("bad path {}: {}", request.path, e)))?;
        if !request.query.is_empty() {
            url.query_pairs_mut().extend_pairs(request.query.iter());
        }
        Ok(url)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &ApiRequest) -> Result<RawResponse, TransportError> {
        let url = self.url_for(request)?;
        let request_id = uuid::Uuid::new_v4().to_string();
        debug!(method = request.method.as_str(), %url, %request_id, "Sending request");

        let builder = match request.method {
            Method::Get => self.client.get(url),
            Method::Post => self.client.post(url),
            Method::Put => self.client.put(url),
            Method::Delete => self.client.delete(url),
        };
        let builder = builder.header("X-Request-Id", request_id);
        let builder = match &request.body {
            Some(body) => builder.json(body),
            None => builder,
        };

        let response = builder.send().await.map_err(map_reqwest_error)?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(map_reqwest_error)?;

        Ok(RawResponse { status, body })
    }
}

fn map_reqwest_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout
    } else {
        TransportError::NoConnection(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_joins_path_and_query() {
        let config = SyncConfig {
            base_url: "https://api.example.org/asha_api".into(),
            ..SyncConfig::default()
        };
        let transport = HttpTransport::new(&config).unwrap();

        let request = ApiRequest::new(Method::Get, "/patients.php").with_query("asha_id", "A 1");
        let url = transport.url_for(&request).unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.example.org/asha_api/patients.php?asha_id=A+1"
        );
    }
}
