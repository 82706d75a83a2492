//! Scheduler engine: public facade keeping the store and the triggers in step.

use std::sync::Arc;
use std::time::Duration;

use harvest_core::config::{CONFIG_OWNER, TaskSeed};
use harvest_core::error::{HarvestError, Result};
use harvest_core::types::{RunSummary, ScheduledTask, TaskDraft};
use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crate::pipeline::Pipeline;
use crate::registry::TriggerRegistry;
use crate::schedule;
use crate::store::TaskStore;

pub struct SchedulerEngine {
    store: Arc<TaskStore>,
    pipeline: Arc<Pipeline>,
    registry: TriggerRegistry,
    /// Held across persist → unregister → register so the stored `enabled`
    /// flag and the trigger map always move together.
    lifecycle: Mutex<()>,
}

impl SchedulerEngine {
    pub fn new(store: Arc<TaskStore>, pipeline: Arc<Pipeline>) -> Self {
        let registry = TriggerRegistry::new(store.clone(), pipeline.clone());
        Self { store, pipeline, registry, lifecycle: Mutex::new(()) }
    }

    pub fn store(&self) -> &TaskStore {
        &self.store
    }

    pub fn registry(&self) -> &TriggerRegistry {
        &self.registry
    }

    /// Register triggers for every enabled task. Returns how many were registered.
    pub fn start(&self) -> usize {
        let _lifecycle = self.lifecycle.lock();
        self.registry.start()
    }

    /// Stop all triggers. Runs already started keep going; see [`Self::drain`].
    pub fn stop(&self) {
        let _lifecycle = self.lifecycle.lock();
        self.registry.stop();
    }

    /// Wait up to `grace` for every started run to finish.
    /// Returns `false` if some were still going when the time ran out.
    pub async fn drain(&self, grace: Duration) -> bool {
        let runs = self.registry.runs();
        if runs.active() == 0 {
            return true;
        }
        tracing::info!("Waiting for {} run(s) to finish", runs.active());
        match tokio::time::timeout(grace, runs.wait_idle()).await {
            Ok(()) => true,
            Err(_) => {
                tracing::warn!("{} run(s) still in flight after {:?}", runs.active(), grace);
                false
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.registry.is_running()
    }

    /// Validate, persist and (when enabled and running) schedule a new task.
    ///
    /// If the trigger cannot be registered the record is deleted again and
    /// the registration error is returned.
    pub fn create_task(&self, draft: TaskDraft) -> Result<ScheduledTask> {
        let task = ScheduledTask::from_draft(draft);
        validate(&task)?;

        let _lifecycle = self.lifecycle.lock();
        let created = self.store.create(task)?;
        tracing::info!(task_id = %created.id, task = %created.name, schedule = %created.schedule, "task created");

        if created.enabled && self.is_running() {
            if let Err(e) = self.registry.register(&created) {
                tracing::error!(task_id = %created.id, "trigger registration failed, rolling back: {e}");
                if let Err(rollback) = self.store.delete(&created.id) {
                    tracing::error!(task_id = %created.id, "rollback failed, task left unscheduled: {rollback}");
                }
                return Err(into_registration(e));
            }
        }
        self.store.get_by_id(&created.id)
    }

    /// Replace a task's definition and reschedule it.
    pub fn update_task(&self, task: ScheduledTask) -> Result<ScheduledTask> {
        let _lifecycle = self.lifecycle.lock();
        self.update_locked(task)
    }

    fn update_locked(&self, task: ScheduledTask) -> Result<ScheduledTask> {
        validate(&task)?;
        let updated = self.store.update(&task)?;
        self.reschedule(&updated)?;
        tracing::info!(task_id = %updated.id, task = %updated.name, enabled = updated.enabled, "task updated");
        self.store.get_by_id(&updated.id)
    }

    /// Unregister and delete. Unknown ids are `NotFound`.
    pub fn delete_task(&self, id: &str) -> Result<()> {
        let _lifecycle = self.lifecycle.lock();
        let task = self.store.get_by_id(id)?;
        self.registry.unregister(id);
        self.store.delete(id)?;
        tracing::info!(task_id = %id, task = %task.name, "task deleted");
        Ok(())
    }

    pub fn toggle_task(&self, id: &str, enabled: bool) -> Result<ScheduledTask> {
        let _lifecycle = self.lifecycle.lock();
        let mut task = self.store.get_by_id(id)?;
        task.enabled = enabled;
        self.update_locked(task)
    }

    /// Start a run of `id` in the background and return at once.
    ///
    /// Runs alongside any scheduled firing; the overlap policy applies.
    pub fn run_task_now(&self, id: &str) -> Result<JoinHandle<RunSummary>> {
        let task = self.store.get_by_id(id)?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| HarvestError::Other(format!("no async runtime: {e}")))?;

        tracing::info!(task_id = %task.id, task = %task.name, "manual run requested");
        let pipeline = self.pipeline.clone();
        let ticket = self.registry.runs().begin();
        Ok(runtime.spawn(async move {
            let _ticket = ticket;
            pipeline.run(&task).await
        }))
    }

    /// Find a task by full id or by a unique id prefix.
    pub fn resolve_id(&self, id_or_prefix: &str) -> Result<String> {
        let wanted = id_or_prefix.trim();
        if wanted.is_empty() {
            return Err(HarvestError::validation("task id is required"));
        }
        if self.store.get_by_id(wanted).is_ok() {
            return Ok(wanted.to_string());
        }
        let matches: Vec<String> = self
            .store
            .get_all()
            .into_iter()
            .map(|t| t.id)
            .filter(|id| id.starts_with(wanted))
            .collect();
        match matches.as_slice() {
            [] => Err(HarvestError::not_found(wanted)),
            [one] => Ok(one.clone()),
            many => Err(HarvestError::validation(format!(
                "task id prefix '{wanted}' matches {} tasks",
                many.len()
            ))),
        }
    }

    pub fn list_tasks(&self) -> Vec<ScheduledTask> {
        self.store.get_all()
    }

    pub fn get_task(&self, id: &str) -> Result<ScheduledTask> {
        self.store.get_by_id(id)
    }

    pub fn get_tasks_by_owner(&self, owner_id: &str) -> Vec<ScheduledTask> {
        self.store.get_by_owner(owner_id)
    }

    /// Create config-declared tasks whose name is not taken yet.
    /// Existing tasks are never touched. Returns how many were created.
    pub fn seed_tasks(&self, seeds: &[TaskSeed]) -> usize {
        let existing: Vec<String> = self
            .store
            .get_by_owner(CONFIG_OWNER)
            .into_iter()
            .map(|t| t.name)
            .collect();

        let mut created = 0;
        for seed in seeds {
            if existing.iter().any(|n| n == seed.name.trim()) {
                continue;
            }
            match self.create_task(seed.to_draft()) {
                Ok(task) => {
                    created += 1;
                    tracing::info!(task_id = %task.id, "seeded task '{}' from config", task.name);
                }
                Err(e) => tracing::warn!("skipping config task '{}': {e}", seed.name),
            }
        }
        created
    }

    fn reschedule(&self, task: &ScheduledTask) -> Result<()> {
        self.registry.unregister(&task.id);
        if !task.enabled || !self.is_running() {
            if !task.enabled && task.next_run_at.is_some() {
                self.store.update_next_run_time(&task.id, None)?;
            }
            return Ok(());
        }
        self.registry.register(task).map(|_| ()).map_err(|e| {
            tracing::error!(task_id = %task.id, task = %task.name, "task left unscheduled after update: {e}");
            into_registration(e)
        })
    }
}

fn validate(task: &ScheduledTask) -> Result<()> {
    task.validate_fields()?;
    schedule::validate(&task.schedule)
}

/// Failures after the schedule was already validated are registration
/// failures, except store writes, which keep their persistence kind.
fn into_registration(e: HarvestError) -> HarvestError {
    match e {
        HarvestError::Registration(_) => e,
        e if e.kind() == "persistence" => e,
        other => HarvestError::registration(other.to_string()),
    }
}
