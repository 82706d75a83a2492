//! Scheduled task definition and run bookkeeping.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{HarvestError, Result};

/// Upper bound for the lookback window (one year, in hours).
pub const MAX_LOOKBACK_HOURS: u32 = 8760;

/// Lifecycle state of a task.
///
/// `Running` only while a pipeline invocation for the task is in flight.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum TaskStatus {
    #[default]
    Idle,
    Running,
    Error,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Idle => write!(f, "idle"),
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Error => write!(f, "error"),
        }
    }
}

/// How a single run ended.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// Every dispatched item was accepted downstream.
    Completed,
    /// Some items failed, at least one succeeded.
    PartiallyCompleted,
    /// The scan window contained no matching files.
    Empty,
    /// Preview mode: summary only, nothing dispatched.
    Preview,
    /// Discovery or dispatch failed.
    Failed,
    /// A previous run of the same task was still in flight.
    Skipped,
}

impl RunOutcome {
    /// Status the task settles in after a run with this outcome.
    pub fn settled_status(self) -> TaskStatus {
        match self {
            RunOutcome::Failed => TaskStatus::Error,
            _ => TaskStatus::Idle,
        }
    }
}

impl std::fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunOutcome::Completed => "completed",
            RunOutcome::PartiallyCompleted => "partially completed",
            RunOutcome::Empty => "empty",
            RunOutcome::Preview => "preview",
            RunOutcome::Failed => "failed",
            RunOutcome::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// Result of one pipeline run, also kept on the task as `lastRunSummary`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub outcome: RunOutcome,
    pub file_count: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub total_size: u64,
    pub duration_ms: u64,
    pub finished_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunSummary {
    pub fn new(outcome: RunOutcome) -> Self {
        Self {
            outcome,
            file_count: 0,
            succeeded: 0,
            failed: 0,
            total_size: 0,
            duration_ms: 0,
            finished_at: Utc::now(),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::new(RunOutcome::Failed)
        }
    }

    pub fn skipped() -> Self {
        Self::new(RunOutcome::Skipped)
    }

    /// Whether this run counts towards `runCount`. Skipped runs and runs
    /// that never got a file listing do not.
    pub fn counts_as_run(&self) -> bool {
        match self.outcome {
            RunOutcome::Skipped => false,
            RunOutcome::Failed => self.file_count > 0,
            _ => true,
        }
    }

    /// Whether this run settles the dispatch counters as a success.
    /// `None` when the run issued no downloads.
    pub fn dispatch_success(&self) -> Option<bool> {
        match self.outcome {
            RunOutcome::Completed | RunOutcome::PartiallyCompleted => Some(true),
            RunOutcome::Failed if self.file_count > 0 => Some(false),
            _ => None,
        }
    }
}

/// Caller-supplied task definition used to create a task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskDraft {
    pub name: String,
    pub path: String,
    pub schedule: String,
    pub lookback_window: u32,
    #[serde(default)]
    pub video_only: bool,
    #[serde(default)]
    pub preview_only: bool,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub owner_id: String,
}

fn default_true() -> bool { true }

/// A durable scheduled task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledTask {
    pub id: String,
    pub name: String,
    /// Root of the remote tree to scan.
    pub path: String,
    /// 5-field cron expression.
    pub schedule: String,
    /// Scan window in hours, counted back from "now".
    pub lookback_window: u32,
    pub video_only: bool,
    pub preview_only: bool,
    pub enabled: bool,
    pub owner_id: String,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub last_run_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub next_run_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub run_count: u64,
    #[serde(default)]
    pub success_count: u64,
    #[serde(default)]
    pub failure_count: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run_summary: Option<RunSummary>,
}

impl ScheduledTask {
    /// Build a fresh task from a draft. The id is left empty for the store to assign.
    pub fn from_draft(draft: TaskDraft) -> Self {
        let now = Utc::now();
        Self {
            id: String::new(),
            name: draft.name.trim().to_string(),
            path: draft.path.trim().to_string(),
            schedule: draft.schedule.trim().to_string(),
            lookback_window: draft.lookback_window,
            video_only: draft.video_only,
            preview_only: draft.preview_only,
            enabled: draft.enabled,
            owner_id: draft.owner_id,
            status: TaskStatus::Idle,
            last_run_at: None,
            next_run_at: None,
            run_count: 0,
            success_count: 0,
            failure_count: 0,
            created_at: now,
            updated_at: now,
            last_run_summary: None,
        }
    }

    /// Scan window length.
    pub fn lookback(&self) -> chrono::Duration {
        chrono::Duration::hours(i64::from(self.lookback_window))
    }

    /// Check the required fields. The schedule expression itself is parsed
    /// by the scheduler; here it only has to be present.
    pub fn validate_fields(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(HarvestError::validation("task name is required"));
        }
        if self.path.trim().is_empty() {
            return Err(HarvestError::validation("task path is required"));
        }
        if self.schedule.trim().is_empty() {
            return Err(HarvestError::validation("schedule expression is required"));
        }
        if self.lookback_window == 0 || self.lookback_window > MAX_LOOKBACK_HOURS {
            return Err(HarvestError::validation(format!(
                "lookback window must be 1-{MAX_LOOKBACK_HOURS} hours, got {}",
                self.lookback_window
            )));
        }
        Ok(())
    }

    /// Copy the user-editable definition from `other`, keeping identity,
    /// counters and run state untouched.
    pub fn apply_definition(&mut self, other: &ScheduledTask) {
        self.name = other.name.clone();
        self.path = other.path.clone();
        self.schedule = other.schedule.clone();
        self.lookback_window = other.lookback_window;
        self.video_only = other.video_only;
        self.preview_only = other.preview_only;
        self.enabled = other.enabled;
        self.owner_id = other.owner_id.clone();
    }
}
