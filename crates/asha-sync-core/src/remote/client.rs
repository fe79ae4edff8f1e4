//! Typed remote calls with timeout, retry and response classification.

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{debug, warn};

use super::{
    normalize, ApiRequest, Method, NormalizedResponse, RawResponse, RemoteError, RemoteResult,
    Transport,
};
use crate::config::SyncConfig;
use crate::models::EntityKind;

/// Remote API client over an injected transport.
#[derive(Clone)]
pub struct RemoteClient {
    transport: Arc<dyn Transport>,
    config: SyncConfig,
}

impl RemoteClient {
    pub fn new(transport: Arc<dyn Transport>, config: SyncConfig) -> Self {
        Self { transport, config }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Send `request`, retrying transient failures with exponential backoff.
    ///
    /// Each attempt is bounded by the configured timeout.
    pub async fn execute(&self, request: &ApiRequest) -> RemoteResult<Value> {
        let mut attempt = 0;
        loop {
            let result = match tokio::time::timeout(
                self.config.request_timeout(),
                self.transport.send(request),
            )
            .await
            {
                Err(_) => Err(RemoteError::Timeout),
                Ok(Err(e)) => Err(e.into()),
                Ok(Ok(raw)) => classify(raw),
            };

            match result {
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    attempt += 1;
                    let delay = self.config.backoff(attempt);
                    warn!(
                        method = request.method.as_str(),
                        path = %request.path,
                        attempt,
                        error = %e,
                        "Retrying request in {:?}",
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                other => return other,
            }
        }
    }

    /// Create a row. The response usually names the new server id.
    pub async fn create(&self, kind: EntityKind, body: Value) -> RemoteResult<NormalizedResponse> {
        let request = ApiRequest::new(Method::Post, kind.endpoint()).with_body(self.stamp(body));
        debug!(kind = %kind, "Remote create");
        normalize(kind, self.execute(&request).await?)
    }

    pub async fn update(
        &self,
        kind: EntityKind,
        server_id: i64,
        body: Value,
    ) -> RemoteResult<NormalizedResponse> {
        let mut body = self.stamp(body);
        if let Some(obj) = body.as_object_mut() {
            obj.insert("id".into(), json!(server_id));
            obj.insert("server_id".into(), json!(server_id));
        }
        let request = if self.config.method_override {
            if let Some(obj) = body.as_object_mut() {
                obj.insert("_method".into(), json!("PUT"));
            }
            ApiRequest::new(Method::Post, kind.endpoint()).with_body(body)
        } else {
            ApiRequest::new(Method::Put, kind.endpoint())
                .with_query("id", server_id)
                .with_body(body)
        };
        debug!(kind = %kind, server_id, "Remote update");
        normalize(kind, self.execute(&request).await?)
    }

    pub async fn delete(&self, kind: EntityKind, server_id: i64) -> RemoteResult<NormalizedResponse> {
        let request = if self.config.method_override {
            ApiRequest::new(Method::Post, kind.endpoint()).with_body(json!({
                "_method": "DELETE",
                "id": server_id,
                "server_id": server_id,
            }))
        } else {
            ApiRequest::new(Method::Delete, kind.endpoint()).with_query("id", server_id)
        };
        debug!(kind = %kind, server_id, "Remote delete");
        normalize(kind, self.execute(&request).await?)
    }

    /// Fetch rows of `kind`, optionally for one patient.
    pub async fn list(
        &self,
        kind: EntityKind,
        parent_server_id: Option<i64>,
    ) -> RemoteResult<NormalizedResponse> {
        let mut request = ApiRequest::new(Method::Get, kind.endpoint());
        if let Some(asha_id) = &self.config.asha_id {
            request = request.with_query("asha_id", asha_id);
        }
        if let Some(patient_id) = parent_server_id {
            request = request.with_query("patient_id", patient_id);
        }
        debug!(kind = %kind, ?parent_server_id, "Remote list");
        normalize(kind, self.execute(&request).await?)
    }

    /// Add the worker id to a write body if configured and absent.
    fn stamp(&self, mut body: Value) -> Value {
        if let (Some(asha_id), Some(obj)) = (&self.config.asha_id, body.as_object_mut()) {
            obj.entry("asha_id").or_insert_with(|| json!(asha_id));
        }
        body
    }
}

/// Map a raw response to JSON or an error by status and body shape.
pub fn classify(raw: RawResponse) -> RemoteResult<Value> {
    let body = raw.body.trim();
    match raw.status {
        200..=299 => {
            if !(body.starts_with('{') || body.starts_with('[')) {
                let preview: String = body.chars().take(80).collect();
                return Err(RemoteError::Parse(format!("non-JSON body: {}", preview)));
            }
            serde_json::from_str(body).map_err(|e| RemoteError::Parse(e.to_string()))
        }
        400..=499 => Err(RemoteError::Http4xx {
            status: raw.status,
            message: body_message(body)
                .unwrap_or_else(|| format!("Request failed with HTTP {}", raw.status)),
        }),
        500..=599 => Err(RemoteError::Http5xx {
            status: raw.status,
            message: body_message(body).unwrap_or_default(),
        }),
        other => Err(RemoteError::Parse(format!("unexpected HTTP status {}", other))),
    }
}

fn body_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    ["message", "error"]
        .iter()
        .find_map(|key| value.get(*key).and_then(Value::as_str))
        .map(str::to_string)
}
