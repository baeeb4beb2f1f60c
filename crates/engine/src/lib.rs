pub mod config;
pub mod error;
pub mod gateway;
pub mod http;
pub mod navigation;
pub mod observer;
pub mod reconcile;
pub mod routing;
pub mod scheduler;
pub mod telemetry;

pub use config::{AppConfig, RemoteConfig, RequestConfig, RoutingConfig};
pub use error::{EngineError, TransportError};
pub use gateway::{RemoteGateway, RemoteHooks};
pub use http::{HttpMethod, HttpRequest, HttpResponse, ReqwestTransport, Transport};
pub use observer::{IncidentObserver, NoopObserver};
pub use scheduler::{ScheduledTask, SchedulerState, SyncScheduler};

use std::cell::{Cell, Ref, RefCell};
use std::collections::HashSet;
use std::rc::Rc;

use serde_json::Value;
use uwan_core::normalize::normalize_all;
use uwan_core::{IncidentId, IncidentRecord, Role, RoleProfile, canonicalize};
use uwan_storage::{KeyValueStorage, LocalStore, RoleSettings, SqliteStorage, retain_newest};

use crate::reconcile::{merge_incidents, should_replace};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertOptions {
    pub trigger_notifications: bool,
}

impl UpsertOptions {
    pub fn notify() -> Self {
        Self {
            trigger_notifications: true,
        }
    }

    pub fn silent() -> Self {
        Self::default()
    }
}

#[derive(Debug, Default)]
pub struct UpsertOutcome {
    pub added: Vec<IncidentRecord>,
    pub updated: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Remote sync is not configured; the report lives locally only.
    Recorded,
    Synced,
    /// Stored locally and queued for retry.
    SavedNotSynced { reason: String },
    /// Missing id or timestamp; nothing was stored.
    Rejected,
}

impl SubmitOutcome {
    pub fn feedback(&self) -> &'static str {
        match self {
            Self::Recorded => "Thank you! Your status has been recorded.",
            Self::Synced => "Thank you! Your status has been recorded and shared.",
            Self::SavedNotSynced { .. } => "Saved locally. We will sync your status when the connection returns.",
            Self::Rejected => "Unable to save this report.",
        }
    }

    pub fn is_synced(&self) -> bool {
        matches!(self, Self::Synced)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Disabled,
    InFlight,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Skipped(SkipReason),
    Synced { fetched: usize, added: usize },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushOutcome {
    pub pushed: usize,
    pub failed: usize,
    /// Entries whose id already had a push in flight.
    pub skipped: usize,
    pub remaining: usize,
}

/// Clears the single-flight flag when the fetch finishes, however it finishes.
struct SyncFlight<'a>(&'a Cell<bool>);

impl<'a> SyncFlight<'a> {
    fn claim(flag: &'a Cell<bool>) -> Option<Self> {
        if flag.replace(true) {
            return None;
        }
        Some(Self(flag))
    }
}

impl Drop for SyncFlight<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

struct PushClaim<'a> {
    set: &'a RefCell<HashSet<IncidentId>>,
    id: IncidentId,
}

impl<'a> PushClaim<'a> {
    fn claim(set: &'a RefCell<HashSet<IncidentId>>, id: &IncidentId) -> Option<Self> {
        if !set.borrow_mut().insert(id.clone()) {
            return None;
        }
        Some(Self { set, id: id.clone() })
    }
}

impl Drop for PushClaim<'_> {
    fn drop(&mut self) {
        self.set.borrow_mut().remove(&self.id);
    }
}

/// Owns the in-memory incident set and pending queue for one client.
///
/// Shared through `Rc` on a single-threaded runtime. No `RefCell` borrow is
/// held across an `.await`.
pub struct SyncEngine<S, T> {
    profile: RoleProfile,
    store: RefCell<LocalStore<S>>,
    gateway: Option<RemoteGateway<T>>,
    incidents: RefCell<Vec<IncidentRecord>>,
    pending: RefCell<Vec<IncidentRecord>>,
    sync_in_flight: Cell<bool>,
    pushes_in_flight: RefCell<HashSet<IncidentId>>,
    observer: Rc<dyn IncidentObserver>,
}

impl<T: Transport> SyncEngine<SqliteStorage, T> {
    /// Wire an engine from configuration: SQLite at `storage_path` (in-memory
    /// when unset) and a remote gateway when `[remote]` is present.
    pub fn from_config(config: &AppConfig, transport: T, hooks: RemoteHooks) -> Result<Self, EngineError> {
        let storage = match &config.storage_path {
            Some(path) => {
                let path = path.to_str().ok_or_else(|| {
                    EngineError::Configuration(format!("storage path {} is not valid UTF-8", path.display()))
                })?;
                SqliteStorage::open(path)?
            }
            None => SqliteStorage::open_in_memory()?,
        };

        let mut store = LocalStore::new(storage);
        let gateway = match &config.remote {
            Some(remote) => {
                store = store.with_field_map(remote.field_map.clone());
                Some(RemoteGateway::new(transport, remote.clone(), hooks)?)
            }
            None => None,
        };
        Ok(Self::new(config.role, store, gateway))
    }
}

impl<S: KeyValueStorage, T: Transport> SyncEngine<S, T> {
    pub fn new(role: Role, store: LocalStore<S>, gateway: Option<RemoteGateway<T>>) -> Self {
        let mut incidents = store.load();
        retain_newest(&mut incidents, store.max_records());
        let pending = store.load_pending_queue();
        tracing::info!(
            role = role.as_str(),
            incidents = incidents.len(),
            pending = pending.len(),
            remote = gateway.is_some(),
            "sync engine ready"
        );
        Self {
            profile: role.profile(),
            store: RefCell::new(store),
            gateway,
            incidents: RefCell::new(incidents),
            pending: RefCell::new(pending),
            sync_in_flight: Cell::new(false),
            pushes_in_flight: RefCell::new(HashSet::new()),
            observer: Rc::new(NoopObserver),
        }
    }

    pub fn with_observer(mut self, observer: Rc<dyn IncidentObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn role(&self) -> Role {
        self.profile.role
    }

    pub fn profile(&self) -> RoleProfile {
        self.profile
    }

    pub fn is_sync_enabled(&self) -> bool {
        self.gateway.is_some()
    }

    pub fn gateway(&self) -> Option<&RemoteGateway<T>> {
        self.gateway.as_ref()
    }

    pub fn incidents(&self) -> Vec<IncidentRecord> {
        self.incidents.borrow().clone()
    }

    pub fn incident(&self, id: &IncidentId) -> Option<IncidentRecord> {
        self.incidents.borrow().iter().find(|r| &r.id == id).cloned()
    }

    pub fn pending_queue(&self) -> Vec<IncidentRecord> {
        self.pending.borrow().clone()
    }

    pub fn is_syncing(&self) -> bool {
        self.sync_in_flight.get()
    }

    pub fn local_store(&self) -> Ref<'_, LocalStore<S>> {
        self.store.borrow()
    }

    pub fn settings(&self) -> RoleSettings {
        self.store.borrow().load_settings(self.profile.role)
    }

    pub fn save_settings(&self, settings: &RoleSettings) {
        self.store.borrow_mut().save_settings(self.profile.role, settings);
    }

    /// Merge a batch of typed records, persist, and notify the observer.
    /// Records are canonicalized first; those without an id or timestamp are
    /// dropped.
    pub fn upsert(&self, records: Vec<IncidentRecord>, options: UpsertOptions) -> UpsertOutcome {
        let total = records.len();
        let records: Vec<_> = records.iter().filter_map(canonicalize).collect();
        if records.len() < total {
            tracing::warn!(dropped = total - records.len(), "dropping incidents without id or timestamp");
        }
        self.merge(records, options)
    }

    /// Normalize raw JSON records with the store's field map, then merge.
    pub fn upsert_raw(&self, raws: &[Value], options: UpsertOptions) -> UpsertOutcome {
        let records = normalize_all(raws, self.store.borrow().field_map());
        self.merge(records, options)
    }

    fn merge(&self, records: Vec<IncidentRecord>, options: UpsertOptions) -> UpsertOutcome {
        if records.is_empty() {
            return UpsertOutcome::default();
        }
        let max = self.store.borrow().max_records();
        let result = merge_incidents(&self.incidents.borrow(), records, max);
        let snapshot = result.records.clone();
        *self.incidents.borrow_mut() = result.records;
        self.store.borrow_mut().save(&snapshot);

        tracing::debug!(added = result.added.len(), updated = result.updated, total = snapshot.len(), "merged incidents");
        self.observer.incidents_changed(&snapshot);
        if options.trigger_notifications && self.profile.can_manage_data {
            for incident in &result.added {
                self.observer.new_incident(incident);
            }
        }

        UpsertOutcome {
            added: result.added,
            updated: result.updated,
        }
    }

    /// Local add is immediate. With remote sync the record is pushed inline;
    /// on failure it is queued for retry and the outcome says so.
    pub async fn submit(&self, record: IncidentRecord) -> SubmitOutcome {
        let Some(record) = canonicalize(&record) else {
            tracing::warn!("rejecting submission without id or timestamp");
            return SubmitOutcome::Rejected;
        };
        self.merge(vec![record.clone()], UpsertOptions::notify());
        let Some(gateway) = &self.gateway else {
            return SubmitOutcome::Recorded;
        };

        let Some(claim) = PushClaim::claim(&self.pushes_in_flight, &record.id) else {
            tracing::debug!(id = %record.id, "push already in flight, queueing");
            self.enqueue_pending(record);
            return SubmitOutcome::SavedNotSynced {
                reason: "a push for this report is already in progress".into(),
            };
        };
        let result = gateway.push_incident_to_remote(&record).await;
        drop(claim);

        match result {
            Ok(()) => {
                self.remove_pending_if_same(&record);
                self.flush_pending().await;
                SubmitOutcome::Synced
            }
            Err(e) => {
                tracing::warn!(id = %record.id, error = %e, "push failed, queued for retry");
                self.enqueue_pending(record);
                SubmitOutcome::SavedNotSynced { reason: e.to_string() }
            }
        }
    }

    /// Fetch the remote set and merge it. Notifications are suppressed for the
    /// initial load. A fetch already in flight makes this a no-op.
    pub async fn sync_remote(&self, initial: bool) -> Result<SyncOutcome, EngineError> {
        let Some(gateway) = &self.gateway else {
            return Ok(SyncOutcome::Skipped(SkipReason::Disabled));
        };
        let Some(_flight) = SyncFlight::claim(&self.sync_in_flight) else {
            tracing::debug!("remote sync already in flight, skipping");
            return Ok(SyncOutcome::Skipped(SkipReason::InFlight));
        };

        let remote = gateway.fetch_remote_incidents().await?;
        let fetched = remote.len();
        self.drop_superseded_pending(&remote);
        let options = UpsertOptions {
            trigger_notifications: !initial,
        };
        let outcome = self.merge(remote, options);
        Ok(SyncOutcome::Synced {
            fetched,
            added: outcome.added.len(),
        })
    }

    /// Retry every queued push once. Failures stay queued.
    pub async fn flush_pending(&self) -> FlushOutcome {
        let mut outcome = FlushOutcome::default();
        let Some(gateway) = &self.gateway else {
            outcome.remaining = self.pending.borrow().len();
            return outcome;
        };

        let queue = self.pending_queue();
        for record in queue {
            let Some(claim) = PushClaim::claim(&self.pushes_in_flight, &record.id) else {
                outcome.skipped += 1;
                continue;
            };
            let result = gateway.push_incident_to_remote(&record).await;
            drop(claim);
            match result {
                Ok(()) => {
                    self.remove_pending_if_same(&record);
                    outcome.pushed += 1;
                }
                Err(e) if e.is_network() => {
                    tracing::warn!(id = %record.id, error = %e, "pending push failed");
                    outcome.failed += 1;
                }
                Err(e) => {
                    tracing::error!(id = %record.id, error = %e, "pending push rejected before sending");
                    outcome.failed += 1;
                }
            }
        }

        outcome.remaining = self.pending.borrow().len();
        if outcome.pushed > 0 || outcome.failed > 0 {
            tracing::info!(pushed = outcome.pushed, failed = outcome.failed, remaining = outcome.remaining, "flushed pending queue");
        }
        outcome
    }

    /// At most one entry per id; a newer copy replaces the queued one.
    pub fn enqueue_pending(&self, record: IncidentRecord) {
        let snapshot = {
            let mut pending = self.pending.borrow_mut();
            match pending.iter_mut().find(|r| r.id == record.id) {
                Some(existing) => *existing = record,
                None => pending.push(record),
            }
            pending.clone()
        };
        self.store.borrow_mut().save_pending_queue(&snapshot);
    }

    fn remove_pending_if_same(&self, pushed: &IncidentRecord) {
        let snapshot = {
            let mut pending = self.pending.borrow_mut();
            let before = pending.len();
            pending.retain(|r| r != pushed);
            if pending.len() == before {
                return;
            }
            pending.clone()
        };
        self.store.borrow_mut().save_pending_queue(&snapshot);
    }

    /// A remote copy at least as recent as the queued one means the push
    /// already landed.
    fn drop_superseded_pending(&self, remote: &[IncidentRecord]) {
        let snapshot = {
            let mut pending = self.pending.borrow_mut();
            let before = pending.len();
            pending.retain(|queued| {
                !remote
                    .iter()
                    .any(|r| r.id == queued.id && should_replace(queued, r))
            });
            if pending.len() == before {
                return;
            }
            tracing::debug!(dropped = before - pending.len(), "remote copies superseded pending entries");
            pending.clone()
        };
        self.store.borrow_mut().save_pending_queue(&snapshot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::HttpResponse;
    use uwan_core::IncidentStatus;

    /// Transport that must never be reached.
    struct NoTransport;

    impl Transport for NoTransport {
        async fn send(&self, _request: HttpRequest) -> Result<HttpResponse, TransportError> {
            Err(TransportError("offline".into()))
        }
    }

    fn engine(role: Role) -> SyncEngine<SqliteStorage, NoTransport> {
        let store = LocalStore::new(SqliteStorage::open_in_memory().unwrap());
        SyncEngine::new(role, store, None)
    }

    fn record(id: &str, ts: &str) -> IncidentRecord {
        IncidentRecord::new(id.into(), IncidentStatus::NeedHelp, ts)
    }

    #[test]
    fn upsert_persists_and_reports_added() {
        let engine = engine(Role::Admin);
        let outcome = engine.upsert(
            vec![record("a", "2024-01-01T00:00:00.000Z"), record("b", "2024-01-02T00:00:00.000Z")],
            UpsertOptions::silent(),
        );
        assert_eq!(outcome.added.len(), 2);
        let ids: Vec<_> = engine.incidents().iter().map(|r| r.id.to_string()).collect();
        assert_eq!(ids, vec!["b", "a"]);
        assert_eq!(engine.local_store().load().len(), 2);

        let outcome = engine.upsert(vec![record("a", "2024-01-03T00:00:00.000Z")], UpsertOptions::silent());
        assert!(outcome.added.is_empty());
        assert_eq!(outcome.updated, 1);
    }

    #[test]
    fn upsert_raw_drops_rejects() {
        let engine = engine(Role::Admin);
        let raws = vec![
            serde_json::json!({"id": "a", "createdAt": 1_704_067_200_000_i64}),
            serde_json::json!({"id": "no-time"}),
        ];
        let outcome = engine.upsert_raw(&raws, UpsertOptions::silent());
        assert_eq!(outcome.added.len(), 1);
        assert_eq!(engine.incidents()[0].timestamp, "2024-01-01T00:00:00.000Z");
    }

    #[test]
    fn enqueue_keeps_one_entry_per_id() {
        let engine = engine(Role::Admin);
        engine.enqueue_pending(record("a", "2024-01-01T00:00:00.000Z"));
        engine.enqueue_pending(record("a", "2024-01-02T00:00:00.000Z"));
        let pending = engine.pending_queue();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].timestamp, "2024-01-02T00:00:00.000Z");
        assert_eq!(engine.local_store().load_pending_queue(), pending);
    }

    #[test]
    fn engine_reloads_persisted_state() {
        let mut store = LocalStore::new(SqliteStorage::open_in_memory().unwrap());
        store.save(&[record("a", "2024-01-01T00:00:00.000Z")]);
        store.save_pending_queue(&[record("a", "2024-01-01T00:00:00.000Z")]);
        let engine: SyncEngine<_, NoTransport> = SyncEngine::new(Role::User, store, None);
        assert_eq!(engine.incidents().len(), 1);
        assert_eq!(engine.pending_queue().len(), 1);
        assert!(!engine.profile().can_manage_data);
    }

    #[test]
    fn in_flight_guards_release_on_drop() {
        let flag = Cell::new(false);
        {
            let _first = SyncFlight::claim(&flag).unwrap();
            assert!(SyncFlight::claim(&flag).is_none());
        }
        assert!(!flag.get());

        let set = RefCell::new(HashSet::new());
        let id = IncidentId::from("a");
        {
            let _claim = PushClaim::claim(&set, &id).unwrap();
            assert!(PushClaim::claim(&set, &id).is_none());
            assert!(PushClaim::claim(&set, &IncidentId::from("b")).is_some());
        }
        assert!(set.borrow().is_empty());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn offline_submit_records_locally() {
        let engine = engine(Role::Admin);
        let outcome = engine.submit(record("a", "2024-01-01T00:00:00Z")).await;
        assert_eq!(outcome, SubmitOutcome::Recorded);
        assert_eq!(engine.incidents().len(), 1);
        assert!(engine.pending_queue().is_empty());
        assert_eq!(
            engine.sync_remote(false).await.unwrap(),
            SyncOutcome::Skipped(SkipReason::Disabled)
        );
    }
}
