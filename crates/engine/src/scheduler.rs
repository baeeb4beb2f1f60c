//! Sync Scheduler: startup load, periodic polling, pending-queue retry and
//! lifecycle triggers.
//!
//! Tasks are spawned with `spawn_local`, so every method that starts a loop
//! must run inside a `tokio::task::LocalSet`.

use std::future::Future;
use std::rc::Rc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use uwan_core::IncidentRecord;
use uwan_storage::KeyValueStorage;

use crate::config::{DEFAULT_POLL_INTERVAL_SECS, DEFAULT_RETRY_INTERVAL_SECS};
use crate::http::Transport;
use crate::{SubmitOutcome, SyncEngine, SyncOutcome};

/// A recurring local task with its own cancellation handle.
///
/// Stopping prevents further ticks. A tick already running completes.
pub struct ScheduledTask {
    name: &'static str,
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl ScheduledTask {
    /// First tick fires one `period` after spawning.
    pub fn every<F, Fut>(name: &'static str, period: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + 'static,
        Fut: Future<Output = ()> + 'static,
    {
        let (shutdown, mut stopped) = watch::channel(false);
        let handle = tokio::task::spawn_local(async move {
            let mut interval = time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    changed = stopped.changed() => {
                        if changed.is_err() || *stopped.borrow() {
                            break;
                        }
                    }
                    _ = interval.tick() => tick().await,
                }
            }
            tracing::debug!(task = name, "scheduled task stopped");
        });
        tracing::debug!(task = name, period_ms = period.as_millis() as u64, "scheduled task started");
        Self {
            name,
            shutdown,
            handle,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        self.stop();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerSettings {
    pub poll_interval: Duration,
    pub retry_interval: Duration,
    pub poll_all_roles: bool,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            retry_interval: Duration::from_secs(DEFAULT_RETRY_INTERVAL_SECS),
            poll_all_roles: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running,
    Stopped,
}

pub struct SyncScheduler<S, T> {
    engine: Rc<SyncEngine<S, T>>,
    settings: SchedulerSettings,
    state: SchedulerState,
    poll_task: Option<ScheduledTask>,
    retry_task: Option<ScheduledTask>,
}

impl<S, T> SyncScheduler<S, T>
where
    S: KeyValueStorage + 'static,
    T: Transport + 'static,
{
    /// Intervals come from the engine's remote config when there is one.
    pub fn new(engine: Rc<SyncEngine<S, T>>) -> Self {
        let settings = engine
            .gateway()
            .map(|gateway| {
                let config = gateway.config();
                SchedulerSettings {
                    poll_interval: config.poll_interval(),
                    retry_interval: config.retry_interval(),
                    poll_all_roles: config.poll_all_roles,
                }
            })
            .unwrap_or_default();
        Self::with_settings(engine, settings)
    }

    pub fn with_settings(engine: Rc<SyncEngine<S, T>>, settings: SchedulerSettings) -> Self {
        Self {
            engine,
            settings,
            state: SchedulerState::Idle,
            poll_task: None,
            retry_task: None,
        }
    }

    pub fn engine(&self) -> &Rc<SyncEngine<S, T>> {
        &self.engine
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn is_polling(&self) -> bool {
        self.poll_task.is_some()
    }

    pub fn is_retrying(&self) -> bool {
        self.retry_task.is_some()
    }

    /// Initial load with notifications suppressed, then flush whatever was
    /// queued by an earlier session, then start polling.
    pub async fn start(&mut self) {
        if self.state != SchedulerState::Idle {
            return;
        }
        self.state = SchedulerState::Running;
        if !self.engine.is_sync_enabled() {
            tracing::info!("remote sync not configured, running local only");
            return;
        }

        if let Err(e) = self.engine.sync_remote(true).await {
            tracing::warn!(error = %e, "initial remote sync failed");
        }
        let flushed = self.engine.flush_pending().await;
        if flushed.remaining > 0 {
            self.ensure_retry_loop();
        }

        if self.settings.poll_all_roles || self.engine.profile().can_manage_data {
            self.start_polling();
        } else {
            tracing::debug!(role = self.engine.role().as_str(), "polling disabled for role");
        }
    }

    pub async fn submit(&mut self, record: IncidentRecord) -> SubmitOutcome {
        let outcome = self.engine.submit(record).await;
        if matches!(outcome, SubmitOutcome::SavedNotSynced { .. }) && self.state != SchedulerState::Stopped {
            self.ensure_retry_loop();
        }
        outcome
    }

    pub async fn connectivity_restored(&mut self) {
        tracing::info!("connectivity restored, syncing");
        self.sync_now().await;
    }

    pub async fn visibility_changed(&mut self, visible: bool) {
        if visible {
            tracing::debug!("visible again, syncing");
            self.sync_now().await;
        }
    }

    /// Fetch and flush immediately, outside the timers.
    pub async fn sync_now(&mut self) {
        if self.state != SchedulerState::Running || !self.engine.is_sync_enabled() {
            return;
        }
        if let Err(e) = self.engine.sync_remote(false).await {
            tracing::warn!(error = %e, "remote sync failed");
        }
        let flushed = self.engine.flush_pending().await;
        if flushed.remaining > 0 {
            self.ensure_retry_loop();
        }
    }

    /// Stop both timers. Requests already in flight still finish.
    pub fn teardown(&mut self) {
        for task in [self.poll_task.take(), self.retry_task.take()].into_iter().flatten() {
            task.stop();
        }
        self.state = SchedulerState::Stopped;
        tracing::info!("sync scheduler stopped");
    }

    fn start_polling(&mut self) {
        if self.poll_task.is_some() {
            return;
        }
        let engine = Rc::clone(&self.engine);
        self.poll_task = Some(ScheduledTask::every("poll", self.settings.poll_interval, move || {
            let engine = Rc::clone(&engine);
            async move {
                match engine.sync_remote(false).await {
                    Ok(SyncOutcome::Synced { fetched, added }) => {
                        tracing::debug!(fetched, added, "poll complete");
                    }
                    Ok(SyncOutcome::Skipped(reason)) => tracing::debug!(?reason, "poll skipped"),
                    Err(e) => tracing::warn!(error = %e, "poll failed"),
                }
            }
        }));
    }

    /// Started lazily on the first failed push; runs until teardown.
    fn ensure_retry_loop(&mut self) {
        if self.retry_task.is_some() {
            return;
        }
        let engine = Rc::clone(&self.engine);
        self.retry_task = Some(ScheduledTask::every("retry", self.settings.retry_interval, move || {
            let engine = Rc::clone(&engine);
            async move {
                if engine.pending_queue().is_empty() {
                    return;
                }
                engine.flush_pending().await;
            }
        }));
    }
}
