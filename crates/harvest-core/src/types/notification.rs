//! Payloads handed to notifiers at the end of a run.

use serde::{Deserialize, Serialize};

use super::task::RunOutcome;

/// Short description of a file included in a notification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileBrief {
    pub name: String,
    pub size: u64,
}

/// Completion notice for a run that did not fail.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskCompletion {
    pub task_id: String,
    pub task_name: String,
    pub outcome: RunOutcome,
    pub file_count: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub total_size: u64,
    pub duration: std::time::Duration,
    pub extra: CompletionExtra,
}

/// Context carried alongside a completion.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CompletionExtra {
    pub path: String,
    pub lookback_window: u32,
    /// First few files of the listing (preview) or of the accepted downloads.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub examples: Vec<FileBrief>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Failure notice.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskFailure {
    pub task_id: String,
    pub task_name: String,
    pub error: String,
}
