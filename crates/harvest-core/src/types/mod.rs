//! Shared data model.

pub mod download;
pub mod file;
pub mod notification;
pub mod task;

pub use download::{BatchDownloadResult, DownloadHandle, DownloadItemResult, DownloadRequest};
pub use file::{FileListing, FileQuery, FileSummary, RemoteFile};
pub use notification::{CompletionExtra, FileBrief, TaskCompletion, TaskFailure};
pub use task::{RunOutcome, RunSummary, ScheduledTask, TaskDraft, TaskStatus, MAX_LOOKBACK_HOURS};
