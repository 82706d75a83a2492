//! Task store: JSON file persistence with an in-memory index.
//!
//! Every mutation is write-through: the change is applied to a copy of the
//! index, the copy is flushed to `scheduled_tasks.json` (temp file + rename),
//! and only then swapped in. A failed flush leaves memory untouched.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use harvest_core::error::{HarvestError, Result};
use harvest_core::types::{RunSummary, ScheduledTask, TaskStatus};
use parking_lot::{Mutex, RwLock};

pub const STORE_FILE: &str = "scheduled_tasks.json";

type TaskMap = HashMap<String, ScheduledTask>;

/// Durable storage for task definitions.
pub struct TaskStore {
    path: PathBuf,
    tasks: RwLock<TaskMap>,
    /// Serializes copy → flush → swap so concurrent writers never lose updates.
    writer: Mutex<()>,
}

impl TaskStore {
    /// Open (or create) the store inside `dir`.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir).map_err(|e| {
            HarvestError::persistence(format!("create data dir {}: {e}", dir.display()))
        })?;
        let path = dir.join(STORE_FILE);

        let mut tasks = TaskMap::new();
        if path.exists() {
            let content = std::fs::read_to_string(&path).map_err(|e| {
                HarvestError::persistence(format!("read {}: {e}", path.display()))
            })?;
            if !content.trim().is_empty() {
                let records: Vec<ScheduledTask> = serde_json::from_str(&content).map_err(|e| {
                    HarvestError::persistence(format!("parse {}: {e}", path.display()))
                })?;
                for task in records {
                    tasks.insert(task.id.clone(), task);
                }
            }
        }

        // A record can only be Running while this process runs it
        let mut recovered = 0;
        for task in tasks.values_mut() {
            if task.status == TaskStatus::Running {
                task.status = TaskStatus::Idle;
                recovered += 1;
            }
        }

        let store = Self {
            path,
            tasks: RwLock::new(TaskMap::new()),
            writer: Mutex::new(()),
        };
        if recovered > 0 {
            tracing::warn!("Reset {recovered} task(s) left running by a previous process");
            store.flush(&tasks)?;
        }
        *store.tasks.write() = tasks;

        tracing::debug!("Task store opened at {} ({} tasks)", store.path.display(), store.len());
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.tasks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.read().is_empty()
    }

    /// Insert a new task. Assigns an id when empty and stamps both timestamps.
    pub fn create(&self, mut task: ScheduledTask) -> Result<ScheduledTask> {
        if task.id.is_empty() {
            task.id = uuid::Uuid::new_v4().to_string();
        }
        let now = Utc::now();
        task.created_at = now;
        task.updated_at = now;

        self.mutate(|map| {
            if map.contains_key(&task.id) {
                return Err(HarvestError::validation(format!("task id '{}' already exists", task.id)));
            }
            map.insert(task.id.clone(), task.clone());
            Ok(task)
        })
    }

    /// Replace the user-editable definition of an existing task.
    ///
    /// Identity, counters, status and run timestamps stay as stored.
    pub fn update(&self, task: &ScheduledTask) -> Result<ScheduledTask> {
        self.mutate(|map| {
            let stored = map
                .get_mut(&task.id)
                .ok_or_else(|| HarvestError::not_found(&task.id))?;
            stored.apply_definition(task);
            stored.updated_at = Utc::now();
            Ok(stored.clone())
        })
    }

    /// Remove a task. Absent ids are not an error.
    pub fn delete(&self, id: &str) -> Result<()> {
        if !self.tasks.read().contains_key(id) {
            return Ok(());
        }
        self.mutate(|map| {
            map.remove(id);
            Ok(())
        })
    }

    pub fn get_by_id(&self, id: &str) -> Result<ScheduledTask> {
        self.tasks
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| HarvestError::not_found(id))
    }

    /// All tasks, oldest first.
    pub fn get_all(&self) -> Vec<ScheduledTask> {
        let mut tasks: Vec<ScheduledTask> = self.tasks.read().values().cloned().collect();
        sort_tasks(&mut tasks);
        tasks
    }

    pub fn get_by_owner(&self, owner_id: &str) -> Vec<ScheduledTask> {
        let mut tasks: Vec<ScheduledTask> = self
            .tasks
            .read()
            .values()
            .filter(|t| t.owner_id == owner_id)
            .cloned()
            .collect();
        sort_tasks(&mut tasks);
        tasks
    }

    pub fn update_last_run_time(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        self.modify(id, |task| task.last_run_at = Some(at))
    }

    pub fn update_next_run_time(&self, id: &str, at: Option<DateTime<Utc>>) -> Result<()> {
        self.modify(id, |task| task.next_run_at = at)
    }

    /// Persist the following fire time of a trigger, but only while the task
    /// is still enabled. Returns whether anything was written.
    pub fn advance_next_run(&self, id: &str, at: DateTime<Utc>) -> Result<bool> {
        self.mutate(|map| {
            let task = map.get_mut(id).ok_or_else(|| HarvestError::not_found(id))?;
            if !task.enabled {
                return Ok(false);
            }
            task.next_run_at = Some(at);
            task.updated_at = Utc::now();
            Ok(true)
        })
    }

    /// Run `f` on the blocking pool. Writes flush to disk under the writer
    /// lock, so async callers go through here instead of calling directly.
    pub async fn blocking<T, F>(self: &Arc<Self>, f: F) -> Result<T>
    where
        F: FnOnce(&TaskStore) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || f(&store))
            .await
            .map_err(|e| HarvestError::persistence(format!("store task failed: {e}")))?
    }

    /// Start of a run: `Running` plus `lastRunAt`.
    pub fn mark_running(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        self.modify(id, |task| {
            task.status = TaskStatus::Running;
            task.last_run_at = Some(at);
        })
    }

    /// End of a run that got a file listing. Settles status and bumps counters.
    pub fn record_run(&self, id: &str, summary: &RunSummary) -> Result<ScheduledTask> {
        self.mutate(|map| {
            let task = map.get_mut(id).ok_or_else(|| HarvestError::not_found(id))?;
            task.status = summary.outcome.settled_status();
            if summary.counts_as_run() {
                task.run_count += 1;
            }
            match summary.dispatch_success() {
                Some(true) => task.success_count += 1,
                Some(false) => task.failure_count += 1,
                None => {}
            }
            task.last_run_summary = Some(summary.clone());
            task.updated_at = Utc::now();
            Ok(task.clone())
        })
    }

    /// End of a run that failed before anything was discovered.
    /// Counters are left alone.
    pub fn mark_failed(&self, id: &str, summary: &RunSummary) -> Result<()> {
        self.modify(id, |task| {
            task.status = TaskStatus::Error;
            task.last_run_summary = Some(summary.clone());
        })
    }

    fn modify(&self, id: &str, f: impl FnOnce(&mut ScheduledTask)) -> Result<()> {
        self.mutate(|map| {
            let task = map.get_mut(id).ok_or_else(|| HarvestError::not_found(id))?;
            f(task);
            task.updated_at = Utc::now();
            Ok(())
        })
    }

    fn mutate<T>(&self, f: impl FnOnce(&mut TaskMap) -> Result<T>) -> Result<T> {
        let _writer = self.writer.lock();
        let mut next = self.tasks.read().clone();
        let out = f(&mut next)?;
        self.flush(&next)?;
        *self.tasks.write() = next;
        Ok(out)
    }

    fn flush(&self, tasks: &TaskMap) -> Result<()> {
        let mut records: Vec<&ScheduledTask> = tasks.values().collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));

        let json = serde_json::to_vec_pretty(&records)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)
            .map_err(|e| HarvestError::persistence(format!("write {}: {e}", tmp.display())))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| {
            HarvestError::persistence(format!("rename to {}: {e}", self.path.display()))
        })?;
        Ok(())
    }
}

fn sort_tasks(tasks: &mut [ScheduledTask]) {
    tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use harvest_core::types::{RunOutcome, TaskDraft};

    fn draft(name: &str, owner: &str) -> ScheduledTask {
        ScheduledTask::from_draft(TaskDraft {
            name: name.into(),
            path: "/media/tv".into(),
            schedule: "0 2 * * *".into(),
            lookback_window: 24,
            video_only: true,
            preview_only: false,
            enabled: true,
            owner_id: owner.into(),
        })
    }

    #[test]
    fn test_create_assigns_id_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let store = TaskStore::open(dir.path()).unwrap();

        let task = store.create(draft("nightly", "u1")).unwrap();
        assert!(!task.id.is_empty());
        assert_eq!(store.len(), 1);
        assert!(store.path().exists());

        let raw = std::fs::read_to_string(store.path()).unwrap();
        let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert!(json.is_array());
        assert_eq!(json[0]["name"], "nightly");
        assert_eq!(json[0]["lookbackWindow"], 24);
    }

    #[test]
    fn test_ids_are_unique() {
        let dir = tempfile::tempdir().unwrap();
        let store = TaskStore::open(dir.path()).unwrap();
        let a = store.create(draft("a", "u1")).unwrap();
        let b = store.create(draft("b", "u1")).unwrap();
        assert_ne!(a.id, b.id);

        let mut dup = draft("c", "u1");
        dup.id = a.id.clone();
        assert!(store.create(dup).is_err());
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_update_requires_existing() {
        let dir = tempfile::tempdir().unwrap();
        let store = TaskStore::open(dir.path()).unwrap();

        let mut ghost = draft("ghost", "u1");
        ghost.id = "missing".into();
        assert!(store.update(&ghost).unwrap_err().is_not_found());
    }

    #[test]
    fn test_update_keeps_runtime_fields() {
        let dir = tempfile::tempdir().unwrap();
        let store = TaskStore::open(dir.path()).unwrap();
        let created = store.create(draft("nightly", "u1")).unwrap();

        let mut summary = RunSummary::new(RunOutcome::Completed);
        summary.file_count = 2;
        store.record_run(&created.id, &summary).unwrap();

        // Caller holds a stale copy with zero counters
        let mut edited = created.clone();
        edited.schedule = "30 3 * * *".into();
        let updated = store.update(&edited).unwrap();

        assert_eq!(updated.schedule, "30 3 * * *");
        assert_eq!(updated.run_count, 1);
        assert_eq!(updated.success_count, 1);
        assert_eq!(updated.created_at, created.created_at);
        assert!(updated.updated_at >= created.updated_at);
    }

    #[test]
    fn test_delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = TaskStore::open(dir.path()).unwrap();
        let task = store.create(draft("nightly", "u1")).unwrap();

        store.delete(&task.id).unwrap();
        store.delete(&task.id).unwrap();
        assert!(store.get_by_id(&task.id).unwrap_err().is_not_found());
    }

    #[test]
    fn test_get_by_owner() {
        let dir = tempfile::tempdir().unwrap();
        let store = TaskStore::open(dir.path()).unwrap();
        store.create(draft("a", "alice")).unwrap();
        store.create(draft("b", "bob")).unwrap();
        store.create(draft("c", "alice")).unwrap();

        let names: Vec<String> = store.get_by_owner("alice").into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["a", "c"]);
        assert!(store.get_by_owner("carol").is_empty());
    }

    #[test]
    fn test_record_run_counters() {
        let dir = tempfile::tempdir().unwrap();
        let store = TaskStore::open(dir.path()).unwrap();
        let task = store.create(draft("nightly", "u1")).unwrap();

        store.mark_running(&task.id, Utc::now()).unwrap();
        assert_eq!(store.get_by_id(&task.id).unwrap().status, TaskStatus::Running);

        store.record_run(&task.id, &RunSummary::new(RunOutcome::Empty)).unwrap();
        let mut failed = RunSummary::failed("backend down");
        failed.file_count = 3;
        failed.failed = 3;
        let after = store.record_run(&task.id, &failed).unwrap();

        assert_eq!(after.run_count, 2);
        assert_eq!(after.success_count, 0);
        assert_eq!(after.failure_count, 1);
        assert_eq!(after.status, TaskStatus::Error);
        assert_eq!(after.last_run_summary.unwrap().failed, 3);
    }

    #[test]
    fn test_mark_failed_leaves_counters() {
        let dir = tempfile::tempdir().unwrap();
        let store = TaskStore::open(dir.path()).unwrap();
        let task = store.create(draft("nightly", "u1")).unwrap();

        store.mark_failed(&task.id, &RunSummary::failed("listing failed")).unwrap();
        let after = store.get_by_id(&task.id).unwrap();
        assert_eq!(after.status, TaskStatus::Error);
        assert_eq!(after.run_count, 0);
        assert_eq!(after.failure_count, 0);
    }

    #[test]
    fn test_reload_reproduces_records() {
        let dir = tempfile::tempdir().unwrap();
        let before = {
            let store = TaskStore::open(dir.path()).unwrap();
            let a = store.create(draft("a", "u1")).unwrap();
            store.create(draft("b", "u2")).unwrap();
            store.update_next_run_time(&a.id, Some(Utc::now())).unwrap();
            store.get_all()
        };

        let reopened = TaskStore::open(dir.path()).unwrap();
        assert_eq!(reopened.get_all(), before);
    }

    #[test]
    fn test_running_reset_on_open() {
        let dir = tempfile::tempdir().unwrap();
        let id = {
            let store = TaskStore::open(dir.path()).unwrap();
            let task = store.create(draft("a", "u1")).unwrap();
            store.mark_running(&task.id, Utc::now()).unwrap();
            task.id
        };

        let reopened = TaskStore::open(dir.path()).unwrap();
        assert_eq!(reopened.get_by_id(&id).unwrap().status, TaskStatus::Idle);

        // The reset was flushed as well
        let raw = std::fs::read_to_string(reopened.path()).unwrap();
        assert!(!raw.contains("\"Running\""));
    }

    #[test]
    fn test_failed_flush_leaves_memory_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let store = TaskStore::open(dir.path()).unwrap();
        let kept = store.create(draft("kept", "u1")).unwrap();

        // A directory squatting on the temp path makes every write fail
        std::fs::create_dir(store.path().with_extension("json.tmp")).unwrap();

        let err = store.create(draft("lost", "u1")).unwrap_err();
        assert_eq!(err.kind(), "persistence");
        assert_eq!(store.len(), 1);

        assert!(store.delete(&kept.id).is_err());
        assert!(store.get_by_id(&kept.id).is_ok());
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(STORE_FILE), "{not json").unwrap();
        let err = TaskStore::open(dir.path()).err().unwrap();
        assert_eq!(err.kind(), "persistence");
    }

    #[test]
    fn test_advance_next_run_skips_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let store = TaskStore::open(dir.path()).unwrap();
        let task = store.create(draft("nightly", "u1")).unwrap();
        let at = Utc::now() + chrono::Duration::hours(1);

        assert!(store.advance_next_run(&task.id, at).unwrap());
        assert_eq!(store.get_by_id(&task.id).unwrap().next_run_at, Some(at));

        let mut off = store.get_by_id(&task.id).unwrap();
        off.enabled = false;
        store.update(&off).unwrap();
        store.update_next_run_time(&task.id, None).unwrap();

        assert!(!store.advance_next_run(&task.id, at).unwrap());
        assert!(store.get_by_id(&task.id).unwrap().next_run_at.is_none());
        assert!(store.advance_next_run("missing", at).unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_blocking_writes_from_async_context() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(TaskStore::open(dir.path()).unwrap());
        let task = store.create(draft("nightly", "u1")).unwrap();

        let id = task.id.clone();
        store.blocking(move |s| s.mark_running(&id, Utc::now())).await.unwrap();
        assert_eq!(store.get_by_id(&task.id).unwrap().status, TaskStatus::Running);

        let err = store.blocking(|s| s.mark_running("missing", Utc::now())).await.unwrap_err();
        assert!(err.is_not_found());
    }
}
