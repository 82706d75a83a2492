//! Download dispatcher trait: hands requests to a download backend.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{BatchDownloadResult, DownloadHandle, DownloadItemResult, DownloadRequest};

#[async_trait]
pub trait DownloadDispatcher: Send + Sync {
    fn name(&self) -> &str;

    /// Submit a single download.
    async fn create_download(&self, request: &DownloadRequest) -> Result<DownloadHandle>;

    /// Submit a batch. Per-item failures are reported in the result, not as
    /// an error; `Err` means the batch as a whole could not be submitted.
    async fn create_batch_download(&self, requests: &[DownloadRequest]) -> Result<BatchDownloadResult> {
        let mut results = Vec::with_capacity(requests.len());
        for request in requests {
            match self.create_download(request).await {
                Ok(handle) => results.push(DownloadItemResult::ok(request.clone(), handle)),
                Err(e) => {
                    tracing::warn!(file = %request.filename, "download rejected: {e}");
                    results.push(DownloadItemResult::err(request.clone(), e.to_string()));
                }
            }
        }
        Ok(BatchDownloadResult::from_results(results))
    }
}
