use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use serde_json::{Value, json};
use uwan_core::{IncidentId, IncidentRecord, IncidentStatus, Role};
use uwan_engine::scheduler::SchedulerSettings;
use uwan_engine::{
    EngineError, IncidentObserver, RemoteConfig, RemoteGateway, RemoteHooks, RequestConfig, SyncEngine, SyncScheduler,
};
use uwan_storage::{KeyValueStorage, LocalStore, SqliteStorage, StorageError};

use crate::ScriptedTransport;

pub const LIST_ENDPOINT: &str = "https://remote.test/api/incidents";
pub const CREATE_ENDPOINT: &str = "https://remote.test/api/incidents/create";

pub type TestEngine<S = SqliteStorage> = SyncEngine<S, ScriptedTransport>;

/// Remembers every observer callback.
#[derive(Default)]
pub struct RecordingObserver {
    changes: RefCell<Vec<Vec<IncidentId>>>,
    notified: RefCell<Vec<IncidentRecord>>,
}

impl RecordingObserver {
    pub fn change_count(&self) -> usize {
        self.changes.borrow().len()
    }

    /// Ids of the set passed to the latest `incidents_changed`.
    pub fn last_change(&self) -> Vec<String> {
        self.changes
            .borrow()
            .last()
            .map(|ids| ids.iter().map(|id| id.to_string()).collect())
            .unwrap_or_default()
    }

    pub fn notified_ids(&self) -> Vec<String> {
        self.notified.borrow().iter().map(|r| r.id.to_string()).collect()
    }

    pub fn notified(&self) -> Vec<IncidentRecord> {
        self.notified.borrow().clone()
    }
}

impl IncidentObserver for RecordingObserver {
    fn incidents_changed(&self, incidents: &[IncidentRecord]) {
        self.changes
            .borrow_mut()
            .push(incidents.iter().map(|r| r.id.clone()).collect());
    }

    fn new_incident(&self, incident: &IncidentRecord) {
        self.notified.borrow_mut().push(incident.clone());
    }
}

/// Storage whose writes always fail; reads fail too when `fail_reads` is set.
#[derive(Debug, Default)]
pub struct FailingStorage {
    pub fail_reads: bool,
    seeded: HashMap<String, String>,
}

impl FailingStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unreadable() -> Self {
        Self {
            fail_reads: true,
            ..Default::default()
        }
    }

    pub fn seed(mut self, key: &str, value: &str) -> Self {
        self.seeded.insert(key.to_string(), value.to_string());
        self
    }
}

impl KeyValueStorage for FailingStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        if self.fail_reads {
            return Err(StorageError::Unavailable(format!("read of {key} refused")));
        }
        Ok(self.seeded.get(key).cloned())
    }

    fn set(&mut self, key: &str, _value: &str) -> Result<(), StorageError> {
        Err(StorageError::Unavailable(format!("write of {key} refused")))
    }

    fn remove(&mut self, key: &str) -> Result<(), StorageError> {
        Err(StorageError::Unavailable(format!("remove of {key} refused")))
    }
}

pub fn remote_config() -> RemoteConfig {
    RemoteConfig::new(RequestConfig::new(LIST_ENDPOINT), RequestConfig::new(CREATE_ENDPOINT))
}

/// One client: engine on in-memory SQLite, scripted remote, recording observer.
pub struct TestClient<S = SqliteStorage> {
    pub engine: Rc<TestEngine<S>>,
    pub transport: ScriptedTransport,
    pub observer: Rc<RecordingObserver>,
}

impl TestClient<SqliteStorage> {
    /// No remote sync configured.
    pub fn offline(role: Role) -> Result<Self, EngineError> {
        let store = LocalStore::new(SqliteStorage::open_in_memory()?);
        Ok(Self::build(role, store, ScriptedTransport::new(), None))
    }

    pub fn online(role: Role) -> Result<Self, EngineError> {
        Self::with_remote(role, remote_config(), RemoteHooks::default())
    }

    pub fn with_remote(role: Role, remote: RemoteConfig, hooks: RemoteHooks) -> Result<Self, EngineError> {
        let store = LocalStore::new(SqliteStorage::open_in_memory()?).with_field_map(remote.field_map.clone());
        Self::with_store(role, store, Some((remote, hooks)))
    }
}

impl<S: KeyValueStorage + 'static> TestClient<S> {
    pub fn with_store(
        role: Role,
        store: LocalStore<S>,
        remote: Option<(RemoteConfig, RemoteHooks)>,
    ) -> Result<Self, EngineError> {
        let transport = ScriptedTransport::new();
        let gateway = match remote {
            Some((config, hooks)) => Some(RemoteGateway::new(transport.clone(), config, hooks)?),
            None => None,
        };
        Ok(Self::build(role, store, transport, gateway))
    }

    fn build(
        role: Role,
        store: LocalStore<S>,
        transport: ScriptedTransport,
        gateway: Option<RemoteGateway<ScriptedTransport>>,
    ) -> Self {
        let observer = Rc::new(RecordingObserver::default());
        let engine = SyncEngine::new(role, store, gateway).with_observer(observer.clone());
        Self {
            engine: Rc::new(engine),
            transport,
            observer,
        }
    }

    pub fn scheduler(&self) -> SyncScheduler<S, ScriptedTransport> {
        SyncScheduler::new(Rc::clone(&self.engine))
    }

    pub fn scheduler_with(&self, settings: SchedulerSettings) -> SyncScheduler<S, ScriptedTransport> {
        SyncScheduler::with_settings(Rc::clone(&self.engine), settings)
    }

    pub fn incident_ids(&self) -> Vec<String> {
        self.engine.incidents().iter().map(|r| r.id.to_string()).collect()
    }

    pub fn pending_ids(&self) -> Vec<String> {
        self.engine.pending_queue().iter().map(|r| r.id.to_string()).collect()
    }
}

pub fn incident(id: &str, timestamp: &str) -> IncidentRecord {
    IncidentRecord::new(id.into(), IncidentStatus::NeedHelp, timestamp)
}

pub fn incident_at(id: &str, timestamp: &str, lat: f64, lng: f64) -> IncidentRecord {
    let mut record = incident(id, timestamp);
    record.location = uwan_core::Location::new(lat, lng, None);
    record
}

pub fn raw_incident(id: &str, timestamp: &str) -> Value {
    json!({"id": id, "timestamp": timestamp, "status": "need_help"})
}
