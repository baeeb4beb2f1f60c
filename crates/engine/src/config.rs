//! TOML configuration with environment overrides.
//!
//! Only data lives here. Function-valued hooks (transforms, body builders,
//! callback resolvers) are attached in code through [`crate::gateway::RemoteHooks`].

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use uwan_core::{FieldMap, LatLng, Role};

use crate::error::EngineError;
use crate::http::HttpMethod;

pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_RETRY_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_ROUTING_ENDPOINT: &str = "https://api.openrouteservice.org/v2/directions";
pub const DEFAULT_ROUTING_PROFILE: &str = "driving-car";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub role: Role,
    pub storage_path: Option<PathBuf>,
    pub remote: Option<RemoteConfig>,
    pub routing: RoutingConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RequestConfig {
    pub endpoint: String,
    pub method: Option<HttpMethod>,
    pub headers: BTreeMap<String, String>,
    pub query: BTreeMap<String, String>,
}

impl RequestConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Default::default()
        }
    }

    pub fn with_method(mut self, method: HttpMethod) -> Self {
        self.method = Some(method);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(name.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub list: RequestConfig,
    pub create: RequestConfig,
    /// Dot path to the record collection in list responses.
    pub response_path: Option<String>,
    pub poll_interval_secs: u64,
    pub retry_interval_secs: u64,
    /// Poll even for roles that cannot manage data.
    pub poll_all_roles: bool,
    pub field_map: FieldMap,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            list: RequestConfig::default(),
            create: RequestConfig::default(),
            response_path: None,
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            retry_interval_secs: DEFAULT_RETRY_INTERVAL_SECS,
            poll_all_roles: false,
            field_map: FieldMap::default(),
        }
    }
}

impl RemoteConfig {
    pub fn new(list: RequestConfig, create: RequestConfig) -> Self {
        Self {
            list,
            create,
            ..Default::default()
        }
    }

    pub fn list_method(&self) -> HttpMethod {
        self.list.method.unwrap_or(HttpMethod::Get)
    }

    pub fn create_method(&self) -> HttpMethod {
        self.create.method.unwrap_or(HttpMethod::Post)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_secs)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.list.endpoint.trim().is_empty() {
            return Err(EngineError::Configuration("remote list endpoint is not configured".into()));
        }
        if self.create.endpoint.trim().is_empty() {
            return Err(EngineError::Configuration("remote create endpoint is not configured".into()));
        }
        if self.poll_interval_secs == 0 || self.retry_interval_secs == 0 {
            return Err(EngineError::Configuration("sync intervals must be at least one second".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ResponderConfig {
    pub use_geolocation: bool,
    pub location: Option<LatLng>,
}

impl Default for ResponderConfig {
    fn default() -> Self {
        Self {
            use_geolocation: true,
            location: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    pub api_key: String,
    pub profile: String,
    pub endpoint: String,
    pub responder: ResponderConfig,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            profile: DEFAULT_ROUTING_PROFILE.to_string(),
            endpoint: DEFAULT_ROUTING_ENDPOINT.to_string(),
            responder: ResponderConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Pretty,
    #[default]
    Compact,
    Json,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub filter: Option<String>,
    pub format: LogFormat,
}

pub fn from_toml_str(contents: &str) -> Result<AppConfig, EngineError> {
    toml::from_str(contents).map_err(|e| EngineError::Configuration(format!("failed to parse config: {e}")))
}

/// Read a config file and apply environment overrides.
pub fn load(path: &Path) -> Result<AppConfig, EngineError> {
    let contents = fs::read_to_string(path)
        .map_err(|e| EngineError::Configuration(format!("failed to read {}: {e}", path.display())))?;
    let mut config = toml::from_str(&contents)
        .map_err(|e| EngineError::Configuration(format!("failed to parse {}: {e}", path.display())))?;
    apply_env_overrides(&mut config);
    Ok(config)
}

/// Like [`load`], but a missing or broken file falls back to defaults.
pub fn load_or_default(path: Option<&Path>) -> AppConfig {
    let loaded = match path {
        Some(path) if path.exists() => load(path),
        _ => {
            let mut config = AppConfig::default();
            apply_env_overrides(&mut config);
            return config;
        }
    };
    loaded.unwrap_or_else(|e| {
        tracing::warn!("config load failed, using defaults: {e}");
        let mut config = AppConfig::default();
        apply_env_overrides(&mut config);
        config
    })
}

pub fn apply_env_overrides(config: &mut AppConfig) {
    if let Ok(raw) = std::env::var("UWAN_ROLE") {
        let trimmed = raw.trim();
        match trimmed.to_ascii_lowercase().as_str() {
            "admin" | "user" => config.role = Role::parse_lenient(trimmed),
            "" => {}
            _ => tracing::warn!("invalid UWAN_ROLE {trimmed:?}, ignoring"),
        }
    }

    if let Ok(raw) = std::env::var("UWAN_STORAGE_PATH") {
        let trimmed = raw.trim();
        if !trimmed.is_empty() {
            config.storage_path = Some(PathBuf::from(trimmed));
        }
    }

    if let Ok(raw) = std::env::var("UWAN_ORS_API_KEY") {
        let trimmed = raw.trim();
        if !trimmed.is_empty() {
            config.routing.api_key = trimmed.to_string();
        }
    }

    if let Ok(raw) = std::env::var("UWAN_LOG") {
        let trimmed = raw.trim();
        if !trimmed.is_empty() {
            config.logging.filter = Some(trimmed.to_string());
        }
    }
}
