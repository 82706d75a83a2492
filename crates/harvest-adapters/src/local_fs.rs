//! Local directory provider: treats a mounted mirror as the remote tree.

use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use harvest_core::config::{HarvestConfig, expand_path};
use harvest_core::error::{HarvestError, Result};
use harvest_core::traits::FileProvider;
use harvest_core::types::{FileListing, FileQuery, RemoteFile};

const MAX_DEPTH: usize = 32;

#[derive(Debug, Clone)]
pub struct LocalDirProvider {
    root: PathBuf,
    download_base: PathBuf,
    video_extensions: Vec<String>,
}

impl LocalDirProvider {
    pub fn new(root: impl Into<PathBuf>, download_base: impl Into<PathBuf>, video_extensions: Vec<String>) -> Self {
        Self {
            root: root.into(),
            download_base: download_base.into(),
            video_extensions: video_extensions.into_iter().map(|e| e.to_lowercase()).collect(),
        }
    }

    pub fn from_config(config: &HarvestConfig) -> Self {
        Self::new(
            expand_path(&config.source.root),
            expand_path(&config.download.base_dir),
            config.source.video_extensions.clone(),
        )
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn is_video(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| self.video_extensions.iter().any(|v| v.eq_ignore_ascii_case(e)))
            .unwrap_or(false)
    }

    /// Resolve a task path under the root, refusing `..` escapes.
    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path.trim_start_matches('/'));
        if relative.components().any(|c| matches!(c, Component::ParentDir)) {
            return Err(HarvestError::provider(format!("path '{path}' escapes the source root")));
        }
        Ok(self.root.join(relative))
    }

    fn scan(&self, query: &FileQuery) -> Result<FileListing> {
        let base = self.resolve(&query.path)?;
        if !base.is_dir() {
            return Err(HarvestError::provider(format!(
                "source directory {} does not exist",
                base.display()
            )));
        }

        let mut found = Vec::new();
        walk(&base, 0, &mut found);

        let mut files = Vec::new();
        for (path, modified, size) in found {
            if !query.contains(modified) {
                continue;
            }
            let is_video = self.is_video(&path);
            if query.video_only && !is_video {
                continue;
            }
            files.push(self.remote_file(&path, modified, size, is_video)?);
        }
        files.sort_by(|a, b| a.path.cmp(&b.path));

        tracing::debug!("Scanned {}: {} file(s) in window", base.display(), files.len());
        Ok(FileListing::from_files(files))
    }

    fn remote_file(&self, path: &Path, modified: DateTime<Utc>, size: u64, is_video: bool) -> Result<RemoteFile> {
        let relative = path.strip_prefix(&self.root).unwrap_or(path);
        let destination = match relative.parent() {
            Some(parent) => self.download_base.join(parent),
            None => self.download_base.clone(),
        };
        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()?.join(path)
        };
        let source_url = url::Url::from_file_path(&absolute)
            .map_err(|_| HarvestError::provider(format!("cannot build file URL for {}", absolute.display())))?;

        Ok(RemoteFile {
            name: path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default(),
            path: format!("/{}", relative.to_string_lossy()),
            size,
            modified,
            source_url: source_url.to_string(),
            destination_dir: destination.to_string_lossy().to_string(),
            is_video,
        })
    }
}

#[async_trait]
impl FileProvider for LocalDirProvider {
    fn name(&self) -> &str {
        "local"
    }

    async fn files_by_time_range(&self, query: &FileQuery) -> Result<FileListing> {
        let provider = self.clone();
        let query = query.clone();
        tokio::task::spawn_blocking(move || provider.scan(&query))
            .await
            .map_err(|e| HarvestError::provider(format!("scan task failed: {e}")))?
    }
}

/// Collect regular files with their mtime and size. Hidden entries are skipped.
fn walk(dir: &Path, depth: usize, out: &mut Vec<(PathBuf, DateTime<Utc>, u64)>) {
    if depth > MAX_DEPTH {
        return;
    }
    let entries = match std::fs::read_dir(dir) {
        Ok(e) => e,
        Err(e) => {
            tracing::warn!("Cannot read {}: {e}", dir.display());
            return;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }
        let Ok(meta) = entry.metadata() else { continue };
        if meta.is_dir() {
            walk(&path, depth + 1, out);
        } else if meta.is_file() {
            let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            out.push((path, DateTime::<Utc>::from(modified), meta.len()));
        }
    }
}
