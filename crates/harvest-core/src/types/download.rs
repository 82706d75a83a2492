//! Download requests and batch results.

use serde::{Deserialize, Serialize};

use super::file::RemoteFile;

/// One file to hand to the download backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DownloadRequest {
    pub url: String,
    pub filename: String,
    pub directory: String,
    #[serde(default)]
    pub size: u64,
}

impl DownloadRequest {
    pub fn for_file(file: &RemoteFile) -> Self {
        Self {
            url: file.source_url.clone(),
            filename: file.name.clone(),
            directory: file.destination_dir.clone(),
            size: file.size,
        }
    }
}

/// Backend handle for an accepted download.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DownloadHandle {
    pub id: String,
    pub filename: String,
    pub directory: String,
}

/// Per-item outcome inside a batch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DownloadItemResult {
    pub request: DownloadRequest,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handle: Option<DownloadHandle>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DownloadItemResult {
    pub fn ok(request: DownloadRequest, handle: DownloadHandle) -> Self {
        Self { request, handle: Some(handle), error: None }
    }

    pub fn err(request: DownloadRequest, error: impl Into<String>) -> Self {
        Self { request, handle: None, error: Some(error.into()) }
    }

    pub fn is_success(&self) -> bool {
        self.handle.is_some() && self.error.is_none()
    }
}

/// Result of a batch submission.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BatchDownloadResult {
    pub results: Vec<DownloadItemResult>,
    pub success_count: usize,
    pub failure_count: usize,
}

impl BatchDownloadResult {
    pub fn from_results(results: Vec<DownloadItemResult>) -> Self {
        let success_count = results.iter().filter(|r| r.is_success()).count();
        let failure_count = results.len() - success_count;
        Self { results, success_count, failure_count }
    }

    /// Total size of the items that were accepted.
    pub fn accepted_size(&self) -> u64 {
        self.results
            .iter()
            .filter(|r| r.is_success())
            .map(|r| r.request.size)
            .sum()
    }
}
