//! Remote Gateway: configurable list and create requests against an incident
//! service of unknown schema.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use uwan_core::field_value::lookup_path;
use uwan_core::normalize::normalize_all;
use uwan_core::{CallbackError, IncidentRecord};

use crate::config::{RemoteConfig, RequestConfig};
use crate::error::EngineError;
use crate::http::{HttpMethod, HttpRequest, Transport};

pub type RecordTransform = Arc<dyn Fn(Value) -> Result<Value, CallbackError> + Send + Sync>;
pub type BodyBuilder = Arc<dyn Fn() -> Result<Value, CallbackError> + Send + Sync>;

/// Code-level hooks that TOML cannot express.
#[derive(Clone, Default)]
pub struct RemoteHooks {
    /// Applied to each fetched record before normalization.
    pub incoming: Option<RecordTransform>,
    /// Applied to the canonical record JSON before a push.
    pub outgoing: Option<RecordTransform>,
    pub list_body: Option<BodyBuilder>,
}

impl RemoteHooks {
    pub fn with_incoming<F>(mut self, f: F) -> Self
    where
        F: Fn(Value) -> Result<Value, CallbackError> + Send + Sync + 'static,
    {
        self.incoming = Some(Arc::new(f));
        self
    }

    pub fn with_outgoing<F>(mut self, f: F) -> Self
    where
        F: Fn(Value) -> Result<Value, CallbackError> + Send + Sync + 'static,
    {
        self.outgoing = Some(Arc::new(f));
        self
    }

    pub fn with_list_body<F>(mut self, f: F) -> Self
    where
        F: Fn() -> Result<Value, CallbackError> + Send + Sync + 'static,
    {
        self.list_body = Some(Arc::new(f));
        self
    }
}

impl fmt::Debug for RemoteHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteHooks")
            .field("incoming", &self.incoming.is_some())
            .field("outgoing", &self.outgoing.is_some())
            .field("list_body", &self.list_body.is_some())
            .finish()
    }
}

pub struct RemoteGateway<T> {
    transport: T,
    config: RemoteConfig,
    hooks: RemoteHooks,
}

impl<T: Transport> RemoteGateway<T> {
    pub fn new(transport: T, config: RemoteConfig, hooks: RemoteHooks) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(Self {
            transport,
            config,
            hooks,
        })
    }

    pub fn config(&self) -> &RemoteConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Malformed payloads degrade to an empty list. Only transport failures and
    /// non-2xx statuses are errors.
    pub async fn fetch_remote_incidents(&self) -> Result<Vec<IncidentRecord>, EngineError> {
        let mut request = build_request(&self.config.list, self.config.list_method());
        if let Some(builder) = &self.hooks.list_body {
            let body = builder().map_err(EngineError::Transform)?;
            attach_payload(&mut request, body);
        }

        let response = self.transport.send(request).await?;
        if !response.is_success() {
            return Err(EngineError::RemoteStatus {
                context: "Remote fetch",
                status: response.status,
            });
        }

        let payload: Value = match serde_json::from_str(&response.body) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(error = %e, "remote incident payload is not valid JSON");
                return Ok(Vec::new());
            }
        };

        let items = extract_collection(&payload, self.config.response_path.as_deref());
        let transformed: Vec<Value> = match &self.hooks.incoming {
            Some(transform) => items
                .into_iter()
                .filter_map(|raw| match transform(raw) {
                    Ok(value) => Some(value),
                    Err(e) => {
                        tracing::warn!(error = %e, "incoming transform failed, dropping record");
                        None
                    }
                })
                .collect(),
            None => items,
        };

        let records = normalize_all(&transformed, &self.config.field_map);
        tracing::debug!(fetched = transformed.len(), kept = records.len(), "fetched remote incidents");
        Ok(records)
    }

    pub async fn push_incident_to_remote(&self, record: &IncidentRecord) -> Result<(), EngineError> {
        let mut payload = record.to_json();
        if let Some(transform) = &self.hooks.outgoing {
            payload = transform(payload).map_err(EngineError::Transform)?;
        }

        let mut request = build_request(&self.config.create, self.config.create_method());
        attach_payload(&mut request, payload);

        let response = self.transport.send(request).await?;
        if !response.is_success() {
            return Err(EngineError::RemoteStatus {
                context: "Remote push",
                status: response.status,
            });
        }
        tracing::debug!(id = %record.id, "pushed incident");
        Ok(())
    }
}

fn build_request(config: &RequestConfig, method: HttpMethod) -> HttpRequest {
    let mut request = HttpRequest::new(method, config.endpoint.clone());
    request.headers = config.headers.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
    request.query = config.query.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
    request
}

fn attach_payload(request: &mut HttpRequest, payload: Value) {
    if request.method == HttpMethod::Get {
        request.query.extend(query_pairs(&payload));
    } else {
        request.body = Some(payload);
    }
}

/// Scalars verbatim, nested values as JSON text, nulls omitted. Non-object
/// payloads carry no parameters.
pub fn query_pairs(payload: &Value) -> Vec<(String, String)> {
    let Some(object) = payload.as_object() else {
        return Vec::new();
    };
    object
        .iter()
        .filter_map(|(key, value)| {
            let text = match value {
                Value::Null => return None,
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            Some((key.clone(), text))
        })
        .collect()
}

/// The configured response path wins; otherwise a `data` field, otherwise the
/// root itself. Anything that is not an array is an empty collection.
pub fn extract_collection(payload: &Value, response_path: Option<&str>) -> Vec<Value> {
    let collection = match response_path {
        Some(path) => lookup_path(payload, path),
        None => payload.get("data").or(Some(payload)),
    };
    match collection {
        Some(Value::Array(items)) => items.clone(),
        _ => {
            tracing::warn!(?response_path, "remote payload has no incident array");
            Vec::new()
        }
    }
}
