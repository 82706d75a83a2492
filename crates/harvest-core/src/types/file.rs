//! Remote file listings returned by a file provider.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A file discovered under a task's remote path.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RemoteFile {
    pub name: String,
    /// Full path in the remote tree.
    pub path: String,
    pub size: u64,
    pub modified: DateTime<Utc>,
    /// URL the downloader fetches from.
    pub source_url: String,
    /// Destination directory, precomputed by the provider.
    pub destination_dir: String,
    #[serde(default)]
    pub is_video: bool,
}

/// Time-window query against a remote tree.
#[derive(Debug, Clone, PartialEq)]
pub struct FileQuery {
    pub path: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub video_only: bool,
}

impl FileQuery {
    /// Build the `[now - lookback, now]` window for a path.
    pub fn lookback(path: impl Into<String>, now: DateTime<Utc>, lookback: chrono::Duration, video_only: bool) -> Self {
        Self {
            path: path.into(),
            start: now - lookback,
            end: now,
            video_only,
        }
    }

    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        t >= self.start && t <= self.end
    }
}

/// Aggregate numbers for a listing.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileSummary {
    pub total_files: usize,
    pub total_size: u64,
    pub video_files: usize,
}

/// Files plus their summary.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FileListing {
    pub files: Vec<RemoteFile>,
    pub summary: FileSummary,
}

impl FileListing {
    pub fn from_files(files: Vec<RemoteFile>) -> Self {
        let summary = FileSummary {
            total_files: files.len(),
            total_size: files.iter().map(|f| f.size).sum(),
            video_files: files.iter().filter(|f| f.is_video).count(),
        };
        Self { files, summary }
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}
