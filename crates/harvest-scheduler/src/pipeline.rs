//! Run pipeline: discover → filter → dispatch → notify for one task.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use harvest_core::config::{OverlapPolicy, SchedulerConfig};
use harvest_core::error::{HarvestError, Result};
use harvest_core::traits::{DownloadDispatcher, FileProvider, Notifier};
use harvest_core::types::{
    CompletionExtra, DownloadRequest, FileBrief, FileListing, FileQuery, RunOutcome, RunSummary,
    ScheduledTask, TaskCompletion, TaskFailure,
};
use parking_lot::Mutex;

use crate::notify::format_duration;
use crate::registry::TaskRunner;
use crate::store::TaskStore;

/// Tunables for a pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub overlap: OverlapPolicy,
    pub provider_timeout: Duration,
    pub dispatch_timeout: Duration,
    pub preview_sample_size: usize,
    pub notify_empty: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from(&SchedulerConfig::default())
    }
}

impl From<&SchedulerConfig> for PipelineSettings {
    fn from(cfg: &SchedulerConfig) -> Self {
        Self {
            overlap: cfg.overlap,
            provider_timeout: Duration::from_secs(cfg.provider_timeout_secs),
            dispatch_timeout: Duration::from_secs(cfg.dispatch_timeout_secs),
            preview_sample_size: cfg.preview_sample_size,
            notify_empty: cfg.notify_empty,
        }
    }
}

/// What happens to a non-empty listing.
enum Dispatch<'a> {
    /// Report only.
    Preview { sample: usize },
    /// Hand every file to the download backend as one batch.
    Downloads(&'a dyn DownloadDispatcher),
}

/// Marks a task as in flight until dropped.
struct RunGuard<'a> {
    in_flight: &'a Mutex<HashSet<String>>,
    task_id: String,
}

impl<'a> RunGuard<'a> {
    fn acquire(in_flight: &'a Mutex<HashSet<String>>, task_id: &str) -> Option<Self> {
        if !in_flight.lock().insert(task_id.to_string()) {
            return None;
        }
        Some(Self { in_flight, task_id: task_id.to_string() })
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.in_flight.lock().remove(&self.task_id);
    }
}

pub struct Pipeline {
    store: Arc<TaskStore>,
    provider: Arc<dyn FileProvider>,
    dispatcher: Arc<dyn DownloadDispatcher>,
    notifier: Arc<dyn Notifier>,
    settings: PipelineSettings,
    in_flight: Mutex<HashSet<String>>,
}

impl Pipeline {
    pub fn new(
        store: Arc<TaskStore>,
        provider: Arc<dyn FileProvider>,
        dispatcher: Arc<dyn DownloadDispatcher>,
        notifier: Arc<dyn Notifier>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            store,
            provider,
            dispatcher,
            notifier,
            settings,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn is_in_flight(&self, task_id: &str) -> bool {
        self.in_flight.lock().contains(task_id)
    }

    /// Execute one run of `task`. Never returns an error: every failure ends
    /// in the returned summary, the task record and a notification.
    pub async fn run(&self, task: &ScheduledTask) -> RunSummary {
        let _guard = match self.settings.overlap {
            OverlapPolicy::Allow => None,
            OverlapPolicy::Skip => match RunGuard::acquire(&self.in_flight, &task.id) {
                Some(guard) => Some(guard),
                None => {
                    tracing::info!(task_id = %task.id, task = %task.name, "previous run still in flight, skipping");
                    return RunSummary::skipped();
                }
            },
        };

        let started = Instant::now();
        let now = Utc::now();
        let id = task.id.clone();
        match self.store.blocking(move |s| s.mark_running(&id, now)).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                tracing::warn!(task_id = %task.id, "task no longer exists, run dropped");
                return RunSummary::skipped();
            }
            Err(e) => tracing::warn!(task_id = %task.id, "could not mark task running: {e}"),
        }
        tracing::info!(task_id = %task.id, task = %task.name, path = %task.path, "▶️ run started");

        let query = FileQuery::lookback(&task.path, now, task.lookback(), task.video_only);
        let listing = match self.discover(&query).await {
            Ok(listing) => listing,
            Err(e) => return self.fail_discovery(task, e, started).await,
        };

        if listing.is_empty() {
            return self.finish_empty(task, started).await;
        }

        let strategy = if task.preview_only {
            Dispatch::Preview { sample: self.settings.preview_sample_size }
        } else {
            Dispatch::Downloads(self.dispatcher.as_ref())
        };
        self.dispatch(task, listing, strategy, started).await
    }

    async fn discover(&self, query: &FileQuery) -> Result<FileListing> {
        let limit = self.settings.provider_timeout;
        match tokio::time::timeout(limit, self.provider.files_by_time_range(query)).await {
            Ok(result) => result,
            Err(_) => Err(HarvestError::Timeout(format!(
                "file provider '{}' did not answer within {}",
                self.provider.name(),
                format_duration(limit)
            ))),
        }
    }

    async fn fail_discovery(&self, task: &ScheduledTask, error: HarvestError, started: Instant) -> RunSummary {
        tracing::error!(task_id = %task.id, task = %task.name, "file discovery failed: {error}");
        let summary = finish(RunSummary::failed(error.to_string()), started);
        let (id, failed) = (task.id.clone(), summary.clone());
        if let Err(e) = self.store.blocking(move |s| s.mark_failed(&id, &failed)).await {
            tracing::warn!(task_id = %task.id, "could not record failed run: {e}");
        }
        self.send_failure(task, error.to_string()).await;
        summary
    }

    async fn finish_empty(&self, task: &ScheduledTask, started: Instant) -> RunSummary {
        let summary = finish(RunSummary::new(RunOutcome::Empty), started);
        self.settle(task, &summary).await;
        tracing::info!(task_id = %task.id, task = %task.name, "no new files in the last {}h", task.lookback_window);
        if self.settings.notify_empty {
            let message = Some("No new files in the scan window".to_string());
            self.send_completion(task, &summary, Vec::new(), message).await;
        }
        summary
    }

    async fn dispatch(
        &self,
        task: &ScheduledTask,
        listing: FileListing,
        strategy: Dispatch<'_>,
        started: Instant,
    ) -> RunSummary {
        let file_count = listing.files.len();

        let dispatcher = match strategy {
            Dispatch::Preview { sample } => {
                let mut summary = RunSummary::new(RunOutcome::Preview);
                summary.file_count = file_count;
                summary.total_size = listing.summary.total_size;
                let summary = finish(summary, started);
                self.settle(task, &summary).await;

                let examples = listing.files.iter().take(sample).map(brief).collect();
                let message = format!(
                    "Preview only: {file_count} file(s) ({} video), nothing queued",
                    listing.summary.video_files
                );
                tracing::info!(task_id = %task.id, files = file_count, "🔍 preview run finished");
                self.send_completion(task, &summary, examples, Some(message)).await;
                return summary;
            }
            Dispatch::Downloads(dispatcher) => dispatcher,
        };

        let requests: Vec<DownloadRequest> = listing.files.iter().map(DownloadRequest::for_file).collect();
        let limit = self.settings.dispatch_timeout;
        let batch = match tokio::time::timeout(limit, dispatcher.create_batch_download(&requests)).await {
            Ok(result) => result,
            Err(_) => Err(HarvestError::Timeout(format!(
                "download dispatcher '{}' did not answer within {}",
                dispatcher.name(),
                format_duration(limit)
            ))),
        };

        let batch = match batch {
            Ok(batch) => batch,
            Err(e) => {
                tracing::error!(task_id = %task.id, files = file_count, "batch dispatch failed: {e}");
                let mut summary = RunSummary::failed(e.to_string());
                summary.file_count = file_count;
                summary.failed = file_count;
                let summary = finish(summary, started);
                self.settle(task, &summary).await;
                self.send_failure(task, e.to_string()).await;
                return summary;
            }
        };

        // Item rejections are per-file results, not a collaborator failure:
        // the run still reports its counts through a completion.
        if batch.success_count == 0 {
            let first_error = batch
                .results
                .iter()
                .find_map(|r| r.error.clone())
                .unwrap_or_else(|| "no downloads accepted".into());
            let error = format!("all {file_count} download(s) failed, first error: {first_error}");
            tracing::error!(task_id = %task.id, "{error}");

            let mut summary = RunSummary::failed(error.clone());
            summary.file_count = file_count;
            summary.failed = batch.failure_count.max(file_count);
            let summary = finish(summary, started);
            self.settle(task, &summary).await;
            self.send_completion(task, &summary, Vec::new(), Some(error)).await;
            return summary;
        }

        let outcome = if batch.failure_count == 0 {
            RunOutcome::Completed
        } else {
            RunOutcome::PartiallyCompleted
        };
        let mut summary = RunSummary::new(outcome);
        summary.file_count = file_count;
        summary.succeeded = batch.success_count;
        summary.failed = batch.failure_count;
        summary.total_size = batch.accepted_size();
        let summary = finish(summary, started);
        self.settle(task, &summary).await;

        tracing::info!(
            task_id = %task.id,
            task = %task.name,
            succeeded = summary.succeeded,
            failed = summary.failed,
            "✅ queued {} of {file_count} file(s) in {}",
            summary.succeeded,
            format_duration(Duration::from_millis(summary.duration_ms))
        );

        let examples = batch
            .results
            .iter()
            .filter(|r| r.is_success())
            .take(self.settings.preview_sample_size)
            .map(|r| FileBrief { name: r.request.filename.clone(), size: r.request.size })
            .collect();
        let message = (batch.failure_count > 0)
            .then(|| format!("{} download(s) were rejected", batch.failure_count));
        self.send_completion(task, &summary, examples, message).await;
        summary
    }

    /// Write the run result back to the task record.
    async fn settle(&self, task: &ScheduledTask, summary: &RunSummary) {
        let (id, result) = (task.id.clone(), summary.clone());
        if let Err(e) = self.store.blocking(move |s| s.record_run(&id, &result)).await {
            tracing::warn!(task_id = %task.id, outcome = %summary.outcome, "could not record run: {e}");
        }
    }

    async fn send_completion(
        &self,
        task: &ScheduledTask,
        summary: &RunSummary,
        examples: Vec<FileBrief>,
        message: Option<String>,
    ) {
        let completion = TaskCompletion {
            task_id: task.id.clone(),
            task_name: task.name.clone(),
            outcome: summary.outcome,
            file_count: summary.file_count,
            succeeded: summary.succeeded,
            failed: summary.failed,
            total_size: summary.total_size,
            duration: Duration::from_millis(summary.duration_ms),
            extra: CompletionExtra {
                path: task.path.clone(),
                lookback_window: task.lookback_window,
                examples,
                message,
            },
        };
        if let Err(e) = self.notifier.notify_task_complete(&completion).await {
            tracing::warn!(task_id = %task.id, "completion notification failed: {e}");
        }
    }

    async fn send_failure(&self, task: &ScheduledTask, error: String) {
        let failure = TaskFailure {
            task_id: task.id.clone(),
            task_name: task.name.clone(),
            error,
        };
        if let Err(e) = self.notifier.notify_task_failed(&failure).await {
            tracing::warn!(task_id = %task.id, "failure notification failed: {e}");
        }
    }
}

#[async_trait]
impl TaskRunner for Pipeline {
    /// Trigger entry point: runs the current stored definition.
    async fn run_task(&self, task_id: &str) -> RunSummary {
        match self.store.get_by_id(task_id) {
            Ok(task) if task.enabled => self.run(&task).await,
            Ok(_) => {
                tracing::debug!(task_id, "task disabled, firing ignored");
                RunSummary::skipped()
            }
            Err(e) => {
                tracing::warn!(task_id, "firing for unknown task: {e}");
                RunSummary::skipped()
            }
        }
    }
}

fn brief(file: &harvest_core::types::RemoteFile) -> FileBrief {
    FileBrief { name: file.name.clone(), size: file.size }
}

fn finish(mut summary: RunSummary, started: Instant) -> RunSummary {
    summary.duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    summary.finished_at = Utc::now();
    summary
}
