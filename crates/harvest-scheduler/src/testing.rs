//! Recording collaborators for unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use harvest_core::error::{HarvestError, Result};
use harvest_core::traits::{DownloadDispatcher, FileProvider, Notifier};
use harvest_core::types::{
    BatchDownloadResult, DownloadHandle, DownloadItemResult, DownloadRequest, FileListing, FileQuery,
    RemoteFile, RunOutcome, RunSummary, TaskCompletion, TaskDraft, TaskFailure,
};
use parking_lot::Mutex;
use tokio::sync::Semaphore;

use crate::registry::TaskRunner;

pub fn task_draft(name: &str) -> TaskDraft {
    TaskDraft {
        name: name.into(),
        path: "/media/tv".into(),
        schedule: "0 2 * * *".into(),
        lookback_window: 24,
        video_only: true,
        preview_only: false,
        enabled: true,
        owner_id: "u1".into(),
    }
}

pub fn video(name: &str, size: u64) -> RemoteFile {
    RemoteFile {
        name: name.into(),
        path: format!("/media/tv/{name}"),
        size,
        modified: Utc::now(),
        source_url: format!("http://nas.local/d/media/tv/{name}"),
        destination_dir: "/downloads/tv".into(),
        is_video: true,
    }
}

/// Provider returning a fixed listing, or an error.
#[derive(Default)]
pub struct MockProvider {
    files: Mutex<Vec<RemoteFile>>,
    error: Mutex<Option<String>>,
    queries: Mutex<Vec<FileQuery>>,
    /// When set, each call waits for a permit before answering.
    gate: Option<Arc<Semaphore>>,
}

impl MockProvider {
    pub fn with_files(files: Vec<RemoteFile>) -> Self {
        Self { files: Mutex::new(files), ..Default::default() }
    }

    pub fn failing(error: &str) -> Self {
        Self { error: Mutex::new(Some(error.into())), ..Default::default() }
    }

    pub fn gated(files: Vec<RemoteFile>, gate: Arc<Semaphore>) -> Self {
        Self { files: Mutex::new(files), gate: Some(gate), ..Default::default() }
    }

    pub fn calls(&self) -> usize {
        self.queries.lock().len()
    }

    pub fn queries(&self) -> Vec<FileQuery> {
        self.queries.lock().clone()
    }
}

#[async_trait]
impl FileProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn files_by_time_range(&self, query: &FileQuery) -> Result<FileListing> {
        self.queries.lock().push(query.clone());
        if let Some(gate) = &self.gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        if let Some(err) = self.error.lock().clone() {
            return Err(HarvestError::provider(err));
        }
        let files: Vec<RemoteFile> = self
            .files
            .lock()
            .iter()
            .filter(|f| !query.video_only || f.is_video)
            .cloned()
            .collect();
        Ok(FileListing::from_files(files))
    }
}

/// Dispatcher that rejects a configured set of filenames.
#[derive(Default)]
pub struct MockDispatcher {
    reject: HashSet<String>,
    batch_error: Option<String>,
    submitted: Mutex<Vec<DownloadRequest>>,
    batches: AtomicUsize,
}

impl MockDispatcher {
    pub fn rejecting(names: &[&str]) -> Self {
        Self { reject: names.iter().map(|n| n.to_string()).collect(), ..Default::default() }
    }

    pub fn failing_batch(error: &str) -> Self {
        Self { batch_error: Some(error.into()), ..Default::default() }
    }

    pub fn batches(&self) -> usize {
        self.batches.load(Ordering::SeqCst)
    }

    pub fn submitted(&self) -> Vec<DownloadRequest> {
        self.submitted.lock().clone()
    }
}

#[async_trait]
impl DownloadDispatcher for MockDispatcher {
    fn name(&self) -> &str {
        "mock"
    }

    async fn create_download(&self, request: &DownloadRequest) -> Result<DownloadHandle> {
        self.submitted.lock().push(request.clone());
        if self.reject.contains(&request.filename) {
            return Err(HarvestError::dispatch(format!("rejected {}", request.filename)));
        }
        Ok(DownloadHandle {
            id: format!("gid-{}", request.filename),
            filename: request.filename.clone(),
            directory: request.directory.clone(),
        })
    }

    async fn create_batch_download(&self, requests: &[DownloadRequest]) -> Result<BatchDownloadResult> {
        self.batches.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = &self.batch_error {
            return Err(HarvestError::dispatch(err.clone()));
        }
        let mut results = Vec::with_capacity(requests.len());
        for request in requests {
            results.push(match self.create_download(request).await {
                Ok(handle) => DownloadItemResult::ok(request.clone(), handle),
                Err(e) => DownloadItemResult::err(request.clone(), e.to_string()),
            });
        }
        Ok(BatchDownloadResult::from_results(results))
    }
}

/// Notifier that keeps everything it was sent.
#[derive(Default)]
pub struct RecordingNotifier {
    completions: Mutex<Vec<TaskCompletion>>,
    failures: Mutex<Vec<TaskFailure>>,
}

impl RecordingNotifier {
    pub fn completions(&self) -> Vec<TaskCompletion> {
        self.completions.lock().clone()
    }

    pub fn failures(&self) -> Vec<TaskFailure> {
        self.failures.lock().clone()
    }

    pub fn total(&self) -> usize {
        self.completions.lock().len() + self.failures.lock().len()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    fn name(&self) -> &str {
        "recording"
    }

    async fn notify_task_complete(&self, completion: &TaskCompletion) -> Result<()> {
        self.completions.lock().push(completion.clone());
        Ok(())
    }

    async fn notify_task_failed(&self, failure: &TaskFailure) -> Result<()> {
        self.failures.lock().push(failure.clone());
        Ok(())
    }
}

/// Runner that only counts invocations per task.
#[derive(Default)]
pub struct CountingRunner {
    runs: Mutex<HashMap<String, usize>>,
}

impl CountingRunner {
    pub fn count(&self, task_id: &str) -> usize {
        self.runs.lock().get(task_id).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.runs.lock().values().sum()
    }
}

#[async_trait]
impl TaskRunner for CountingRunner {
    async fn run_task(&self, task_id: &str) -> RunSummary {
        *self.runs.lock().entry(task_id.to_string()).or_default() += 1;
        RunSummary::new(RunOutcome::Completed)
    }
}
