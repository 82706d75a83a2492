//! # Harvest Scheduler
//!
//! Cron-driven discovery of newly modified remote files, turned into
//! download batches.
//!
//! ## Design Principles
//! - Single process, no external broker
//! - File-based persistence (JSON), written through on every change
//! - Tokio timers only, one sleeping task per enabled schedule
//! - A run never takes the scheduler down; failures end in a notification
//!
//! ## Architecture
//! ```text
//! SchedulerEngine (facade)
//!   ├── TaskStore        scheduled_tasks.json ⇄ in-memory index
//!   ├── TriggerRegistry  task id → tokio trigger loop
//!   │     └── on fire → Pipeline::run
//!   └── Pipeline
//!         ├── FileProvider        files modified in [now - lookback, now]
//!         ├── DownloadDispatcher  one batch per run (skipped in preview)
//!         └── Notifier → NotifyRouter
//!                         ├── TracingNotifier
//!                         └── WebhookNotifier
//! ```

pub mod engine;
pub mod notify;
pub mod pipeline;
pub mod registry;
pub mod schedule;
pub mod store;

#[cfg(test)]
mod testing;

pub use engine::SchedulerEngine;
pub use notify::{NotifyRouter, TracingNotifier, WebhookNotifier};
pub use pipeline::{Pipeline, PipelineSettings};
pub use registry::{RunTracker, TaskRunner, TriggerRegistry};
pub use schedule::CronSchedule;
pub use store::TaskStore;
