use serde::{Deserialize, Serialize};

use crate::error::StorageError;

/// Per-role display preferences.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoleSettings {
    pub base_layer_title: Option<String>,
    pub hover_popups: bool,
    pub highlight: bool,
    pub legend: bool,
}

impl Default for RoleSettings {
    fn default() -> Self {
        Self {
            base_layer_title: None,
            hover_popups: false,
            highlight: false,
            legend: true,
        }
    }
}

impl RoleSettings {
    /// Stored keys override defaults; missing keys keep them.
    pub fn from_stored(raw: &str) -> Result<Self, StorageError> {
        Ok(serde_json::from_str(raw)?)
    }
}
