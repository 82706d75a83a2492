//! aria2 input-file dispatcher.
//!
//! Appends entries in aria2's `--input-file` format, so a running
//! `aria2c --input-file=… --save-session=…` (or the next start of one)
//! picks them up:
//!
//! ```text
//! file:///mnt/remote/tv/show/s01e01.mkv
//!   gid=3f2a9c0d1e4b5a67
//!   dir=/downloads/tv/show
//!   out=s01e01.mkv
//! ```

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use harvest_core::config::{HarvestConfig, expand_path};
use harvest_core::error::{HarvestError, Result};
use harvest_core::traits::DownloadDispatcher;
use harvest_core::types::{BatchDownloadResult, DownloadHandle, DownloadItemResult, DownloadRequest};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

pub struct Aria2InputFileDispatcher {
    path: PathBuf,
    /// Keeps entries from concurrent runs from interleaving.
    write_lock: Mutex<()>,
}

impl Aria2InputFileDispatcher {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), write_lock: Mutex::new(()) }
    }

    pub fn from_config(config: &HarvestConfig) -> Self {
        Self::new(expand_path(&config.download.input_file))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn append(&self, text: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| HarvestError::dispatch(format!("open {}: {e}", self.path.display())))?;
        file.write_all(text.as_bytes())
            .await
            .map_err(|e| HarvestError::dispatch(format!("write {}: {e}", self.path.display())))?;
        file.flush().await?;
        Ok(())
    }
}

/// aria2 gids are 16 hex digits.
fn new_gid() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..16].to_string()
}

fn check(request: &DownloadRequest) -> Result<()> {
    if request.url.trim().is_empty() {
        return Err(HarvestError::dispatch("download request has no URL"));
    }
    if request.filename.trim().is_empty() {
        return Err(HarvestError::dispatch(format!("download request for {} has no filename", request.url)));
    }
    if request.filename.contains('/') || has_line_break(&request.filename) {
        return Err(HarvestError::dispatch(format!("invalid filename '{}'", request.filename.escape_debug())));
    }
    // A line break would start a new entry or option in the input file
    if has_line_break(&request.url) || has_line_break(&request.directory) {
        return Err(HarvestError::dispatch(format!(
            "line break in download request for '{}'",
            request.filename.escape_debug()
        )));
    }
    Ok(())
}

fn has_line_break(s: &str) -> bool {
    s.contains(['\n', '\r'])
}

fn entry(request: &DownloadRequest, gid: &str) -> String {
    let mut text = format!("{}\n  gid={gid}\n", request.url.trim());
    if !request.directory.is_empty() {
        text.push_str(&format!("  dir={}\n", request.directory));
    }
    text.push_str(&format!("  out={}\n", request.filename));
    text
}

fn handle(request: &DownloadRequest, gid: String) -> DownloadHandle {
    DownloadHandle {
        id: gid,
        filename: request.filename.clone(),
        directory: request.directory.clone(),
    }
}

#[async_trait]
impl DownloadDispatcher for Aria2InputFileDispatcher {
    fn name(&self) -> &str {
        "aria2-input-file"
    }

    async fn create_download(&self, request: &DownloadRequest) -> Result<DownloadHandle> {
        check(request)?;
        let gid = new_gid();
        self.append(&entry(request, &gid)).await?;
        tracing::debug!(gid = %gid, file = %request.filename, "queued download");
        Ok(handle(request, gid))
    }

    /// Invalid requests fail individually; the valid ones are written in a
    /// single append. A failed write fails the whole batch.
    async fn create_batch_download(&self, requests: &[DownloadRequest]) -> Result<BatchDownloadResult> {
        let mut text = String::new();
        let mut results = Vec::with_capacity(requests.len());
        for request in requests {
            match check(request) {
                Ok(()) => {
                    let gid = new_gid();
                    text.push_str(&entry(request, &gid));
                    results.push(DownloadItemResult::ok(request.clone(), handle(request, gid)));
                }
                Err(e) => {
                    tracing::warn!(file = %request.filename, "download rejected: {e}");
                    results.push(DownloadItemResult::err(request.clone(), e.to_string()));
                }
            }
        }

        if !text.is_empty() {
            self.append(&text).await?;
        }
        let batch = BatchDownloadResult::from_results(results);
        tracing::info!(
            "📥 Queued {} download(s) in {} ({} rejected)",
            batch.success_count,
            self.path.display(),
            batch.failure_count
        );
        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(name: &str) -> DownloadRequest {
        DownloadRequest {
            url: format!("file:///mnt/remote/tv/{name}"),
            filename: name.into(),
            directory: "/downloads/tv".into(),
            size: 42,
        }
    }

    #[tokio::test]
    async fn test_single_download_appends_entry() {
        let dir = tempfile::tempdir().unwrap();
        let dispatcher = Aria2InputFileDispatcher::new(dir.path().join("queue/aria2.input"));

        let h = dispatcher.create_download(&request("a.mkv")).await.unwrap();
        assert_eq!(h.id.len(), 16);

        let text = std::fs::read_to_string(dispatcher.path()).unwrap();
        assert!(text.starts_with("file:///mnt/remote/tv/a.mkv\n"));
        assert!(text.contains(&format!("  gid={}\n", h.id)));
        assert!(text.contains("  dir=/downloads/tv\n"));
        assert!(text.ends_with("  out=a.mkv\n"));
    }

    #[tokio::test]
    async fn test_batch_counts_invalid_items() {
        let dir = tempfile::tempdir().unwrap();
        let dispatcher = Aria2InputFileDispatcher::new(dir.path().join("aria2.input"));

        let mut no_url = request("b.mkv");
        no_url.url.clear();
        let mut no_name = request("c.mkv");
        no_name.filename.clear();

        let batch = dispatcher
            .create_batch_download(&[request("a.mkv"), no_url, no_name, request("d.mkv")])
            .await
            .unwrap();
        assert_eq!(batch.success_count, 2);
        assert_eq!(batch.failure_count, 2);
        assert_eq!(batch.accepted_size(), 84);
        assert!(!batch.results[1].is_success());

        let text = std::fs::read_to_string(dispatcher.path()).unwrap();
        assert_eq!(text.matches("  out=").count(), 2);

        // A second batch appends rather than truncates
        dispatcher.create_batch_download(&[request("e.mkv")]).await.unwrap();
        let text = std::fs::read_to_string(dispatcher.path()).unwrap();
        assert_eq!(text.matches("  out=").count(), 3);
    }

    #[tokio::test]
    async fn test_line_breaks_cannot_inject_options() {
        let dir = tempfile::tempdir().unwrap();
        let dispatcher = Aria2InputFileDispatcher::new(dir.path().join("aria2.input"));

        let mut bad_dir = request("a.mkv");
        bad_dir.directory = "/dl/show\n  out=../../etc/evil".into();
        let mut bad_url = request("b.mkv");
        bad_url.url = "file:///x\r\n  dir=/etc".into();
        let mut bad_name = request("c.mkv");
        bad_name.filename = "c.mkv\r".into();

        let batch = dispatcher
            .create_batch_download(&[bad_dir.clone(), bad_url, bad_name, request("d.mkv")])
            .await
            .unwrap();
        assert_eq!(batch.success_count, 1);
        assert_eq!(batch.failure_count, 3);

        let text = std::fs::read_to_string(dispatcher.path()).unwrap();
        assert!(!text.contains("evil"));
        assert!(!text.contains("/etc"));
        assert_eq!(text.matches("  out=").count(), 1);

        assert_eq!(dispatcher.create_download(&bad_dir).await.unwrap_err().kind(), "dispatch");
    }

    #[tokio::test]
    async fn test_unwritable_target_fails_batch() {
        let dir = tempfile::tempdir().unwrap();
        // The target path is a directory
        let dispatcher = Aria2InputFileDispatcher::new(dir.path());
        let err = dispatcher.create_batch_download(&[request("a.mkv")]).await.unwrap_err();
        assert_eq!(err.kind(), "dispatch");
    }
}
