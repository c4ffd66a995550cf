//! Reconciliation scheduler: runs bulk sweeps as background jobs.
//!
//! Sweeps are owned by the scheduler, not by the field that asked for them,
//! so they outlive the field and cannot be cancelled once started. Queued
//! sweeps are de-duplicated by [`SweepKey`], and two sweeps with the same key
//! never run at the same time.

use std::collections::{HashMap, HashSet, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::FutureExt;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use tagsync_core::defaults;
use tagsync_core::logging::{component, subsystem};
use tagsync_core::{DocumentStore, Error, Result};

use crate::sweep::{sync_references, SweepKey, SweepOutcome, SweepRequest};

/// Configuration for the sweep scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Whether the scheduler accepts and runs sweeps.
    pub enabled: bool,
    /// Maximum number of sweeps running at once.
    pub max_concurrent_sweeps: usize,
    /// Maximum number of queued (not yet running) sweeps.
    pub queue_capacity: usize,
    /// Number of finished job statuses kept for [`SchedulerHandle::status`].
    pub status_retention: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_concurrent_sweeps: defaults::SCHEDULER_MAX_CONCURRENT,
            queue_capacity: defaults::SCHEDULER_QUEUE_CAPACITY,
            status_retention: defaults::SCHEDULER_STATUS_RETENTION,
        }
    }
}

impl SchedulerConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `TAGSYNC_SCHEDULER_ENABLED` | `true` | Enable/disable sweeps |
    /// | `TAGSYNC_MAX_CONCURRENT_SWEEPS` | `2` | Max concurrent sweeps |
    /// | `TAGSYNC_SCHEDULER_QUEUE` | `64` | Max queued sweeps |
    pub fn from_env() -> Self {
        let enabled = std::env::var("TAGSYNC_SCHEDULER_ENABLED")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);

        let max_concurrent_sweeps = std::env::var("TAGSYNC_MAX_CONCURRENT_SWEEPS")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(defaults::SCHEDULER_MAX_CONCURRENT)
            .max(1);

        let queue_capacity = std::env::var("TAGSYNC_SCHEDULER_QUEUE")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(defaults::SCHEDULER_QUEUE_CAPACITY)
            .max(1);

        Self {
            enabled,
            max_concurrent_sweeps,
            queue_capacity,
            status_retention: defaults::SCHEDULER_STATUS_RETENTION,
        }
    }

    /// Set maximum concurrent sweeps.
    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent_sweeps = max.max(1);
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    pub fn with_status_retention(mut self, retention: usize) -> Self {
        self.status_retention = retention;
        self
    }

    /// Enable or disable the scheduler.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// Lifecycle state of one sweep job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Completed { outcome: SweepOutcome },
    Failed { error: String },
}

impl JobStatus {
    /// Completed or failed.
    pub fn is_settled(&self) -> bool {
        matches!(self, JobStatus::Completed { .. } | JobStatus::Failed { .. })
    }
}

/// Event emitted by the scheduler.
#[derive(Debug, Clone)]
pub enum SchedulerEvent {
    SchedulerStarted,
    SchedulerStopped,
    SweepQueued { job_id: Uuid, key: SweepKey },
    SweepStarted { job_id: Uuid, key: SweepKey },
    SweepCompleted {
        job_id: Uuid,
        key: SweepKey,
        outcome: SweepOutcome,
    },
    SweepFailed {
        job_id: Uuid,
        key: SweepKey,
        error: String,
    },
}

impl SchedulerEvent {
    pub fn job_id(&self) -> Option<Uuid> {
        match self {
            SchedulerEvent::SweepQueued { job_id, .. }
            | SchedulerEvent::SweepStarted { job_id, .. }
            | SchedulerEvent::SweepCompleted { job_id, .. }
            | SchedulerEvent::SweepFailed { job_id, .. } => Some(*job_id),
            SchedulerEvent::SchedulerStarted | SchedulerEvent::SchedulerStopped => None,
        }
    }

    /// True for completion and failure events.
    pub fn is_settlement(&self) -> bool {
        matches!(
            self,
            SchedulerEvent::SweepCompleted { .. } | SchedulerEvent::SweepFailed { .. }
        )
    }
}

#[derive(Debug, Default)]
struct StatusTable {
    statuses: HashMap<Uuid, JobStatus>,
    finished: VecDeque<Uuid>,
}

impl StatusTable {
    fn set(&mut self, job_id: Uuid, status: JobStatus, retention: usize) {
        let settled = status.is_settled();
        self.statuses.insert(job_id, status);
        if settled {
            self.finished.push_back(job_id);
            while self.finished.len() > retention {
                if let Some(expired) = self.finished.pop_front() {
                    self.statuses.remove(&expired);
                }
            }
        }
    }
}

#[derive(Debug, Default)]
struct SchedulerState {
    accepting: bool,
    pending: HashMap<SweepKey, (Uuid, SweepRequest)>,
    order: VecDeque<SweepKey>,
    running: HashSet<SweepKey>,
    table: StatusTable,
}

impl SchedulerState {
    /// Oldest queued sweep whose key is not already running.
    fn next_runnable(&mut self) -> Option<(Uuid, SweepRequest)> {
        let position = self
            .order
            .iter()
            .position(|key| !self.running.contains(key))?;
        let key = self.order.remove(position)?;
        let (job_id, request) = self.pending.remove(&key)?;
        self.running.insert(key);
        Some((job_id, request))
    }
}

struct Shared {
    config: SchedulerConfig,
    state: Mutex<SchedulerState>,
    event_tx: broadcast::Sender<SchedulerEvent>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: SchedulerEvent) {
        let _ = self.event_tx.send(event);
    }

    fn settle(&self, job_id: Uuid, key: SweepKey, result: Result<SweepOutcome>) {
        let retention = self.config.status_retention;
        let event = match result {
            Ok(outcome) => {
                self.lock()
                    .table
                    .set(job_id, JobStatus::Completed { outcome }, retention);
                SchedulerEvent::SweepCompleted {
                    job_id,
                    key,
                    outcome,
                }
            }
            Err(e) => {
                error!(
                    subsystem = subsystem::JOBS,
                    component = component::SCHEDULER,
                    %job_id,
                    sweep = %key,
                    error = %e,
                    "Sweep failed"
                );
                let error = e.to_string();
                self.lock().table.set(
                    job_id,
                    JobStatus::Failed {
                        error: error.clone(),
                    },
                    retention,
                );
                SchedulerEvent::SweepFailed { job_id, key, error }
            }
        };
        self.emit(event);
    }
}

/// Handle for submitting sweeps to, and controlling, a running scheduler.
#[derive(Clone)]
pub struct SchedulerHandle {
    shared: Arc<Shared>,
    wake_tx: mpsc::Sender<()>,
    shutdown_tx: mpsc::Sender<()>,
}

impl SchedulerHandle {
    /// Queue a sweep and return its job id.
    ///
    /// If a sweep with the same key is already queued (not yet running), its
    /// job id is returned instead and no new job is created.
    pub fn submit(&self, request: SweepRequest) -> Result<Uuid> {
        let key = request.key();
        let job_id = {
            let mut state = self.shared.lock();
            if !state.accepting {
                return Err(Error::Scheduler("scheduler is not running".to_string()));
            }
            if let Some((existing, _)) = state.pending.get(&key) {
                debug!(
                    subsystem = subsystem::JOBS,
                    component = component::SCHEDULER,
                    job_id = %existing,
                    sweep = %key,
                    "Sweep already queued, de-duplicated"
                );
                return Ok(*existing);
            }
            if state.pending.len() >= self.shared.config.queue_capacity {
                return Err(Error::Scheduler(format!(
                    "sweep queue is full ({} pending)",
                    state.pending.len()
                )));
            }

            let job_id = Uuid::now_v7();
            state.pending.insert(key.clone(), (job_id, request));
            state.order.push_back(key.clone());
            let retention = self.shared.config.status_retention;
            state.table.set(job_id, JobStatus::Queued, retention);
            job_id
        };

        self.shared.emit(SchedulerEvent::SweepQueued { job_id, key });
        // a full wake channel already guarantees another pass
        let _ = self.wake_tx.try_send(());
        Ok(job_id)
    }

    /// Queue a sweep and wait until it settles.
    pub async fn submit_and_wait(&self, request: SweepRequest) -> Result<SweepOutcome> {
        let mut events = self.events();
        let job_id = self.submit(request)?;
        loop {
            if let Some(status) = self.status(job_id) {
                match status {
                    JobStatus::Completed { outcome } => return Ok(outcome),
                    JobStatus::Failed { error } => return Err(Error::Scheduler(error)),
                    JobStatus::Queued | JobStatus::Running => {}
                }
            }
            match events.recv().await {
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(Error::Scheduler(
                        "scheduler stopped before the sweep settled".to_string(),
                    ))
                }
            }
        }
    }

    /// Current status of a job, if it is known (finished jobs are retained
    /// up to the configured limit).
    pub fn status(&self, job_id: Uuid) -> Option<JobStatus> {
        self.shared.lock().table.statuses.get(&job_id).cloned()
    }

    /// Number of queued sweeps that have not started.
    pub fn pending_count(&self) -> usize {
        self.shared.lock().pending.len()
    }

    /// Get a receiver for scheduler events.
    pub fn events(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.shared.event_tx.subscribe()
    }

    /// Signal the scheduler to shut down gracefully.
    ///
    /// Running sweeps finish; queued sweeps are failed.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| Error::Internal("Failed to send shutdown signal".into()))?;
        Ok(())
    }
}

/// Runs [`sync_references`] jobs against one store.
pub struct SweepScheduler {
    store: Arc<dyn DocumentStore>,
    config: SchedulerConfig,
}

impl SweepScheduler {
    pub fn new(store: Arc<dyn DocumentStore>, config: SchedulerConfig) -> Self {
        Self { store, config }
    }

    /// Start the scheduler and return a handle for control.
    pub fn start(self) -> SchedulerHandle {
        let (event_tx, _) = broadcast::channel(defaults::EVENT_BUS_CAPACITY);
        let (wake_tx, wake_rx) = mpsc::channel(self.config.queue_capacity.max(1));
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let shared = Arc::new(Shared {
            state: Mutex::new(SchedulerState {
                accepting: self.config.enabled,
                ..SchedulerState::default()
            }),
            config: self.config,
            event_tx,
        });

        if shared.config.enabled {
            let runner = Runner {
                store: self.store,
                shared: shared.clone(),
            };
            tokio::spawn(runner.run(wake_rx, shutdown_rx));
        } else {
            info!(
                subsystem = subsystem::JOBS,
                component = component::SCHEDULER,
                "Sweep scheduler is disabled, not starting"
            );
        }

        SchedulerHandle {
            shared,
            wake_tx,
            shutdown_tx,
        }
    }
}

struct Runner {
    store: Arc<dyn DocumentStore>,
    shared: Arc<Shared>,
}

impl Runner {
    #[instrument(skip_all, fields(subsystem = subsystem::JOBS, component = component::SCHEDULER))]
    async fn run(self, mut wake_rx: mpsc::Receiver<()>, mut shutdown_rx: mpsc::Receiver<()>) {
        let max_concurrent = self.shared.config.max_concurrent_sweeps.max(1);
        info!(max_concurrent, "Sweep scheduler started");
        self.shared.emit(SchedulerEvent::SchedulerStarted);

        let mut tasks: JoinSet<(Uuid, SweepKey, Result<SweepOutcome>)> = JoinSet::new();

        loop {
            while tasks.len() < max_concurrent {
                let Some((job_id, request)) = self.shared.lock().next_runnable() else {
                    break;
                };
                let key = request.key();
                let retention = self.shared.config.status_retention;
                self.shared
                    .lock()
                    .table
                    .set(job_id, JobStatus::Running, retention);
                debug!(%job_id, sweep = %key, "Starting sweep");
                self.shared.emit(SchedulerEvent::SweepStarted {
                    job_id,
                    key: key.clone(),
                });

                let store = self.store.clone();
                tasks.spawn(async move {
                    let result = AssertUnwindSafe(sync_references(store.as_ref(), &request))
                        .catch_unwind()
                        .await
                        .unwrap_or_else(|_| {
                            Err(Error::Internal("sweep task panicked".to_string()))
                        });
                    (job_id, key, result)
                });
            }

            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Sweep scheduler received shutdown signal");
                    break;
                }
                Some(()) = wake_rx.recv() => {}
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    self.finish(joined);
                }
            }
        }

        // stop accepting, fail what never started, let running sweeps finish
        let abandoned: Vec<(Uuid, SweepKey)> = {
            let mut state = self.shared.lock();
            state.accepting = false;
            state.order.clear();
            state
                .pending
                .drain()
                .map(|(key, (job_id, _))| (job_id, key))
                .collect()
        };
        for (job_id, key) in abandoned {
            warn!(%job_id, sweep = %key, "Dropping queued sweep on shutdown");
            self.shared.settle(
                job_id,
                key,
                Err(Error::Scheduler("scheduler stopped".to_string())),
            );
        }
        while let Some(joined) = tasks.join_next().await {
            self.finish(joined);
        }

        self.shared.emit(SchedulerEvent::SchedulerStopped);
        info!("Sweep scheduler stopped");
    }

    fn finish(
        &self,
        joined: std::result::Result<(Uuid, SweepKey, Result<SweepOutcome>), tokio::task::JoinError>,
    ) {
        match joined {
            Ok((job_id, key, result)) => {
                self.shared.lock().running.remove(&key);
                self.shared.settle(job_id, key, result);
            }
            Err(join_error) => {
                error!(error = ?join_error, "Sweep task was cancelled");
            }
        }
    }
}
