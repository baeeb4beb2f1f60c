//! Local Store: the incident list and pending-sync queue as JSON arrays in
//! key-value storage.

use serde_json::Value;
use uwan_core::{FieldMap, IncidentRecord, Role, normalize::normalize_all};

use crate::error::StorageError;
use crate::settings::RoleSettings;
use crate::traits::KeyValueStorage;

pub const INCIDENTS_KEY: &str = "project-uwan-incidents";
pub const PENDING_SYNC_KEY: &str = "project-uwan-pending-sync";
pub const MAX_INCIDENTS_STORED: usize = 500;

pub fn settings_key(role: Role) -> String {
    format!("project-uwan-settings-{}", role.as_str())
}

/// Sort newest first (stable for equal timestamps) and drop the oldest records
/// beyond `max`.
pub fn retain_newest(records: &mut Vec<IncidentRecord>, max: usize) {
    records.sort_by_key(|r| std::cmp::Reverse(r.sort_key()));
    records.truncate(max);
}

pub struct LocalStore<S> {
    storage: S,
    field_map: FieldMap,
    max_records: usize,
}

impl<S: KeyValueStorage> LocalStore<S> {
    pub fn new(storage: S) -> Self {
        Self {
            storage,
            field_map: FieldMap::default(),
            max_records: MAX_INCIDENTS_STORED,
        }
    }

    /// Field map for raw records arriving from outside. Persisted records are
    /// canonical and are always read back with the built-in map.
    pub fn with_field_map(mut self, field_map: FieldMap) -> Self {
        self.field_map = field_map;
        self
    }

    pub fn with_max_records(mut self, max_records: usize) -> Self {
        self.max_records = max_records;
        self
    }

    pub fn max_records(&self) -> usize {
        self.max_records
    }

    pub fn field_map(&self) -> &FieldMap {
        &self.field_map
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut S {
        &mut self.storage
    }

    /// Stored incidents, newest first. Anything unreadable yields an empty list.
    pub fn load(&self) -> Vec<IncidentRecord> {
        self.load_key(INCIDENTS_KEY)
    }

    /// Persist the full incident set. Failures are logged; the in-memory set
    /// stays authoritative.
    pub fn save(&mut self, records: &[IncidentRecord]) {
        let capped = &records[..records.len().min(self.max_records)];
        if let Err(e) = self.write_key(INCIDENTS_KEY, capped) {
            tracing::warn!(error = %e, "unable to store incident reports");
        }
    }

    pub fn load_pending_queue(&self) -> Vec<IncidentRecord> {
        self.load_key(PENDING_SYNC_KEY)
    }

    /// An empty queue removes the key.
    pub fn save_pending_queue(&mut self, queue: &[IncidentRecord]) {
        let result = if queue.is_empty() {
            self.storage.remove(PENDING_SYNC_KEY)
        } else {
            self.write_key(PENDING_SYNC_KEY, queue)
        };
        if let Err(e) = result {
            tracing::warn!(error = %e, "unable to store pending sync queue");
        }
    }

    pub fn load_settings(&self, role: Role) -> RoleSettings {
        let key = settings_key(role);
        match self.storage.get(&key) {
            Ok(Some(raw)) => RoleSettings::from_stored(&raw).unwrap_or_else(|e| {
                tracing::warn!(role = role.as_str(), error = %e, "unable to load stored settings");
                RoleSettings::default()
            }),
            Ok(None) => RoleSettings::default(),
            Err(e) => {
                tracing::warn!(role = role.as_str(), error = %e, "unable to load stored settings");
                RoleSettings::default()
            }
        }
    }

    pub fn save_settings(&mut self, role: Role, settings: &RoleSettings) {
        let result = serde_json::to_string(settings)
            .map_err(StorageError::from)
            .and_then(|json| self.storage.set(&settings_key(role), &json));
        if let Err(e) = result {
            tracing::warn!(role = role.as_str(), error = %e, "unable to persist settings");
        }
    }

    fn load_key(&self, key: &str) -> Vec<IncidentRecord> {
        let raw = match self.storage.get(key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Vec::new(),
            Err(e) => {
                tracing::warn!(key, error = %e, "unable to read stored incidents");
                return Vec::new();
            }
        };
        match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Array(items)) => normalize_all(&items, &FieldMap::default()),
            Ok(_) => {
                tracing::warn!(key, "stored incidents are not an array");
                Vec::new()
            }
            Err(e) => {
                tracing::warn!(key, error = %e, "stored incidents are not valid JSON");
                Vec::new()
            }
        }
    }

    fn write_key(&mut self, key: &str, records: &[IncidentRecord]) -> Result<(), StorageError> {
        let json = serde_json::to_string(records)?;
        self.storage.set(key, &json)
    }
}
