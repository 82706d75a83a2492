//! Trigger registry: one tokio task per enabled schedule.
//!
//! Each trigger sleeps until its next fire time, then spawns the run on its
//! own task, so stopping or replacing a trigger never cancels a run that
//! already started.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use harvest_core::error::{HarvestError, Result};
use harvest_core::types::{RunSummary, ScheduledTask};
use parking_lot::{Mutex, RwLock};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::schedule::CronSchedule;
use crate::store::TaskStore;

/// Whatever a trigger invokes when it fires.
#[async_trait]
pub trait TaskRunner: Send + Sync {
    async fn run_task(&self, task_id: &str) -> RunSummary;
}

/// Counts runs that were spawned and have not finished yet.
#[derive(Default)]
pub struct RunTracker {
    active: AtomicUsize,
    idle: Notify,
}

/// Held by a spawned run; dropping it marks the run finished.
pub struct RunTicket(Arc<RunTracker>);

impl RunTracker {
    pub fn begin(self: &Arc<Self>) -> RunTicket {
        self.active.fetch_add(1, Ordering::SeqCst);
        RunTicket(self.clone())
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Resolve once no tracked run is left.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.active() == 0 {
                return;
            }
            notified.await;
        }
    }
}

impl Drop for RunTicket {
    fn drop(&mut self) {
        if self.0.active.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

struct TriggerEntry {
    schedule: String,
    next_fire: Arc<Mutex<Option<DateTime<Utc>>>>,
    handle: JoinHandle<()>,
}

pub struct TriggerRegistry {
    store: Arc<TaskStore>,
    runner: Arc<dyn TaskRunner>,
    entries: RwLock<HashMap<String, TriggerEntry>>,
    running: AtomicBool,
    runs: Arc<RunTracker>,
}

impl TriggerRegistry {
    pub fn new(store: Arc<TaskStore>, runner: Arc<dyn TaskRunner>) -> Self {
        Self {
            store,
            runner,
            entries: RwLock::new(HashMap::new()),
            running: AtomicBool::new(false),
            runs: Arc::new(RunTracker::default()),
        }
    }

    /// Runs spawned by triggers (and by anyone else sharing the tracker).
    pub fn runs(&self) -> &Arc<RunTracker> {
        &self.runs
    }

    /// Register a trigger for every enabled task. Individual failures are
    /// logged and skipped. Returns how many triggers were registered.
    pub fn start(&self) -> usize {
        self.running.store(true, Ordering::SeqCst);

        let mut registered = 0;
        for task in self.store.get_all().into_iter().filter(|t| t.enabled) {
            match self.register(&task) {
                Ok(next) => {
                    registered += 1;
                    tracing::debug!(task_id = %task.id, "next fire at {next}");
                }
                Err(e) => {
                    tracing::warn!(task_id = %task.id, task = %task.name, "could not register trigger: {e}");
                }
            }
        }
        tracing::info!("⏰ Scheduler started with {registered} trigger(s)");
        registered
    }

    /// Stop all future firings. Runs already in flight finish on their own.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let drained: Vec<(String, TriggerEntry)> = self.entries.write().drain().collect();
        for (_, entry) in &drained {
            entry.handle.abort();
        }
        tracing::info!("Scheduler stopped ({} trigger(s) removed)", drained.len());
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Create (or replace) the trigger for `task` and persist its next fire
    /// time. Returns that fire time.
    ///
    /// Fails with `Registration` when the registry is stopped, or when the
    /// stored record is gone or disabled by the time the trigger would be
    /// inserted.
    pub fn register(&self, task: &ScheduledTask) -> Result<DateTime<Utc>> {
        let schedule = CronSchedule::parse(&task.schedule)?;
        if !self.is_running() {
            return Err(HarvestError::registration("scheduler is not running"));
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| HarvestError::registration(format!("no async runtime for trigger: {e}")))?;
        let first = schedule.next_from_now().ok_or_else(|| {
            HarvestError::registration(format!(
                "schedule '{}' has no upcoming occurrence",
                task.schedule
            ))
        })?;

        // Store I/O happens before the registry lock is taken
        if !self.store.advance_next_run(&task.id, first)? {
            return Err(HarvestError::registration(format!("task '{}' is disabled", task.id)));
        }

        let mut entries = self.entries.write();
        // stop() and delete may have raced the store write above
        if !self.is_running() {
            return Err(HarvestError::registration("scheduler stopped during registration"));
        }
        match self.store.get_by_id(&task.id) {
            Ok(stored) if stored.enabled => {}
            Ok(_) => {
                return Err(HarvestError::registration(format!("task '{}' was disabled", task.id)));
            }
            Err(e) => return Err(HarvestError::registration(format!("task '{}' is gone: {e}", task.id))),
        }

        let next_fire = Arc::new(Mutex::new(Some(first)));
        let handle = runtime.spawn(trigger_loop(
            task.id.clone(),
            schedule,
            first,
            self.store.clone(),
            self.runner.clone(),
            self.runs.clone(),
            next_fire.clone(),
        ));

        let entry = TriggerEntry {
            schedule: task.schedule.clone(),
            next_fire,
            handle,
        };
        if let Some(old) = entries.insert(task.id.clone(), entry) {
            old.handle.abort();
            tracing::debug!(task_id = %task.id, "replaced trigger ({})", old.schedule);
        }
        drop(entries);

        tracing::info!(task_id = %task.id, task = %task.name, schedule = %task.schedule, "trigger registered");
        Ok(first)
    }

    /// Remove the trigger for `task_id`, if any.
    pub fn unregister(&self, task_id: &str) -> bool {
        let removed = self.entries.write().remove(task_id);
        match removed {
            Some(entry) => {
                entry.handle.abort();
                tracing::info!(task_id, "trigger unregistered");
                true
            }
            None => false,
        }
    }

    pub fn is_registered(&self, task_id: &str) -> bool {
        self.entries.read().contains_key(task_id)
    }

    pub fn next_fire(&self, task_id: &str) -> Option<DateTime<Utc>> {
        self.entries.read().get(task_id).and_then(|e| *e.next_fire.lock())
    }

    pub fn registered_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.entries.read().keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl Drop for TriggerRegistry {
    fn drop(&mut self) {
        for entry in self.entries.get_mut().values() {
            entry.handle.abort();
        }
    }
}

async fn trigger_loop(
    task_id: String,
    schedule: CronSchedule,
    first: DateTime<Utc>,
    store: Arc<TaskStore>,
    runner: Arc<dyn TaskRunner>,
    runs: Arc<RunTracker>,
    next_fire: Arc<Mutex<Option<DateTime<Utc>>>>,
) {
    let mut next = first;
    loop {
        let delay = (next - Utc::now()).to_std().unwrap_or_default();
        tokio::time::sleep(delay).await;

        tracing::info!(task_id = %task_id, "⏰ trigger fired");
        let run_runner = runner.clone();
        let run_id = task_id.clone();
        let ticket = runs.begin();
        tokio::spawn(async move {
            let _ticket = ticket;
            run_runner.run_task(&run_id).await;
        });

        // Step from the previous fire time, not the clock, so one tick
        // never fires twice.
        let Some(following) = schedule.next_after(next.max(Utc::now())) else {
            tracing::warn!(task_id = %task_id, "schedule has no further occurrences, trigger ends");
            *next_fire.lock() = None;
            return;
        };
        next = following;
        *next_fire.lock() = Some(next);
        let id = task_id.clone();
        match store.blocking(move |s| s.advance_next_run(&id, next)).await {
            Ok(_) => {}
            Err(e) if e.is_not_found() => {
                tracing::warn!(task_id = %task_id, "task no longer exists, trigger ends");
                *next_fire.lock() = None;
                return;
            }
            Err(e) => tracing::warn!(task_id = %task_id, "failed to persist next run time: {e}"),
        }
    }
}
