//! File provider trait: lists files in a remote tree.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{FileListing, FileQuery};

/// Source of newly modified files.
///
/// The returned listing must already honour `query.video_only`.
#[async_trait]
pub trait FileProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Files under `query.path` modified within `[query.start, query.end]`.
    async fn files_by_time_range(&self, query: &FileQuery) -> Result<FileListing>;
}
