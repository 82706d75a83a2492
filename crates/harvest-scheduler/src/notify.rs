//! Notification routing and rendering.
//!
//! The pipeline talks to a single [`Notifier`]; in practice that is a
//! [`NotifyRouter`] fanning out to the log and an optional webhook.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use harvest_core::error::{HarvestError, Result};
use harvest_core::traits::Notifier;
use harvest_core::types::{RunOutcome, TaskCompletion, TaskFailure};

/// Human-readable byte count (`1.5 GB`).
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}

/// Short duration string (`850ms`, `12.3s`, `2m 5s`, `1h 3m`).
pub fn format_duration(d: Duration) -> String {
    let ms = d.as_millis();
    if ms < 1000 {
        return format!("{ms}ms");
    }
    let secs = d.as_secs();
    if secs < 60 {
        return format!("{:.1}s", d.as_secs_f64());
    }
    if secs < 3600 {
        return format!("{}m {}s", secs / 60, secs % 60);
    }
    format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
}

pub fn completion_title(c: &TaskCompletion) -> &'static str {
    match c.outcome {
        RunOutcome::Preview => "🔍 Preview",
        RunOutcome::Empty => "💤 Nothing new",
        RunOutcome::PartiallyCompleted => "⚠️ Task partially completed",
        RunOutcome::Failed => "❌ No downloads accepted",
        _ => "✅ Task completed",
    }
}

pub fn render_completion(c: &TaskCompletion) -> String {
    let mut lines = vec![
        completion_title(c).to_string(),
        format!("Task: {} ({})", c.task_name, c.task_id),
        format!("Path: {} (last {}h)", c.extra.path, c.extra.lookback_window),
        format!("Files: {}", c.file_count),
    ];
    if matches!(c.outcome, RunOutcome::Completed | RunOutcome::PartiallyCompleted | RunOutcome::Failed) {
        lines.push(format!("Queued: {} ok, {} failed", c.succeeded, c.failed));
    }
    lines.push(format!("Size: {}", format_size(c.total_size)));
    lines.push(format!("Took: {}", format_duration(c.duration)));
    if let Some(msg) = &c.extra.message {
        lines.push(msg.clone());
    }
    if !c.extra.examples.is_empty() {
        lines.push(String::new());
        for f in &c.extra.examples {
            lines.push(format!("• {} ({})", f.name, format_size(f.size)));
        }
        if c.file_count > c.extra.examples.len() {
            lines.push(format!("… and {} more", c.file_count - c.extra.examples.len()));
        }
    }
    lines.join("\n")
}

pub fn render_failure(f: &TaskFailure) -> String {
    format!("❌ Task failed\nTask: {} ({})\nError: {}", f.task_name, f.task_id, f.error)
}

/// Fans notifications out to every configured notifier.
///
/// Per-channel failures are logged and swallowed; a broken webhook must not
/// turn a successful run into a failed one.
#[derive(Default)]
pub struct NotifyRouter {
    notifiers: Vec<Arc<dyn Notifier>>,
}

impl NotifyRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifiers.push(notifier);
        self
    }

    pub fn len(&self) -> usize {
        self.notifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notifiers.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.notifiers.iter().map(|n| n.name()).collect()
    }
}

#[async_trait]
impl Notifier for NotifyRouter {
    fn name(&self) -> &str {
        "router"
    }

    async fn notify_task_complete(&self, completion: &TaskCompletion) -> Result<()> {
        let sends = self.notifiers.iter().map(|n| async move {
            (n.name(), n.notify_task_complete(completion).await)
        });
        for (name, result) in futures::future::join_all(sends).await {
            if let Err(e) = result {
                tracing::warn!(notifier = name, task_id = %completion.task_id, "notification failed: {e}");
            }
        }
        Ok(())
    }

    async fn notify_task_failed(&self, failure: &TaskFailure) -> Result<()> {
        let sends = self.notifiers.iter().map(|n| async move {
            (n.name(), n.notify_task_failed(failure).await)
        });
        for (name, result) in futures::future::join_all(sends).await {
            if let Err(e) = result {
                tracing::warn!(notifier = name, task_id = %failure.task_id, "notification failed: {e}");
            }
        }
        Ok(())
    }
}

/// Writes notifications to the log.
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    fn name(&self) -> &str {
        "log"
    }

    async fn notify_task_complete(&self, completion: &TaskCompletion) -> Result<()> {
        tracing::info!(
            task_id = %completion.task_id,
            outcome = %completion.outcome,
            files = completion.file_count,
            "{}",
            render_completion(completion)
        );
        Ok(())
    }

    async fn notify_task_failed(&self, failure: &TaskFailure) -> Result<()> {
        tracing::warn!(task_id = %failure.task_id, "{}", render_failure(failure));
        Ok(())
    }
}

/// POSTs a JSON payload per notification to a fixed URL.
pub struct WebhookNotifier {
    url: String,
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .unwrap_or_default();
        Self { url: url.into(), client }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn post(&self, body: serde_json::Value) -> Result<()> {
        let resp = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| HarvestError::Notify(format!("webhook send failed: {e}")))?;
        if !resp.status().is_success() {
            return Err(HarvestError::Notify(format!("webhook returned {}", resp.status())));
        }
        Ok(())
    }
}

pub fn completion_payload(c: &TaskCompletion) -> serde_json::Value {
    let level = match c.outcome {
        RunOutcome::PartiallyCompleted => "warning",
        RunOutcome::Failed => "error",
        _ => "success",
    };
    serde_json::json!({
        "event": "task_complete",
        "level": level,
        "title": completion_title(c),
        "text": render_completion(c),
        "task_id": c.task_id,
        "task_name": c.task_name,
        "outcome": c.outcome,
        "file_count": c.file_count,
        "succeeded": c.succeeded,
        "failed": c.failed,
        "total_size": c.total_size,
        "duration_ms": c.duration.as_millis() as u64,
        "extra": c.extra,
    })
}

pub fn failure_payload(f: &TaskFailure) -> serde_json::Value {
    serde_json::json!({
        "event": "task_failed",
        "level": "error",
        "title": "❌ Task failed",
        "text": render_failure(f),
        "task_id": f.task_id,
        "task_name": f.task_name,
        "error": f.error,
    })
}

#[async_trait]
impl Notifier for WebhookNotifier {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn notify_task_complete(&self, completion: &TaskCompletion) -> Result<()> {
        self.post(completion_payload(completion)).await
    }

    async fn notify_task_failed(&self, failure: &TaskFailure) -> Result<()> {
        self.post(failure_payload(failure)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingNotifier;
    use harvest_core::types::{CompletionExtra, FileBrief};

    fn completion(outcome: RunOutcome) -> TaskCompletion {
        TaskCompletion {
            task_id: "t1".into(),
            task_name: "nightly".into(),
            outcome,
            file_count: 3,
            succeeded: 3,
            failed: 0,
            total_size: 3 * 1024 * 1024,
            duration: Duration::from_millis(1500),
            extra: CompletionExtra {
                path: "/tv".into(),
                lookback_window: 24,
                examples: vec![FileBrief { name: "a.mkv".into(), size: 1024 }],
                message: None,
            },
        }
    }

    struct Broken;

    #[async_trait]
    impl Notifier for Broken {
        fn name(&self) -> &str { "broken" }
        async fn notify_task_complete(&self, _: &TaskCompletion) -> Result<()> {
            Err(HarvestError::Notify("down".into()))
        }
        async fn notify_task_failed(&self, _: &TaskFailure) -> Result<()> {
            Err(HarvestError::Notify("down".into()))
        }
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0), "0 B");
        assert_eq!(format_size(1023), "1023 B");
        assert_eq!(format_size(1536), "1.5 KB");
        assert_eq!(format_size(5 * 1024 * 1024 * 1024), "5.0 GB");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_millis(850)), "850ms");
        assert_eq!(format_duration(Duration::from_millis(12_300)), "12.3s");
        assert_eq!(format_duration(Duration::from_secs(125)), "2m 5s");
        assert_eq!(format_duration(Duration::from_secs(3780)), "1h 3m");
    }

    #[test]
    fn test_render_completion() {
        let text = render_completion(&completion(RunOutcome::Completed));
        assert!(text.starts_with("✅"));
        assert!(text.contains("Files: 3"));
        assert!(text.contains("3.0 MB"));
        assert!(text.contains("… and 2 more"));

        let preview = render_completion(&completion(RunOutcome::Preview));
        assert!(preview.starts_with("🔍"));
        assert!(!preview.contains("Queued"));

        let rejected = render_completion(&completion(RunOutcome::Failed));
        assert!(rejected.starts_with("❌"));
        assert!(rejected.contains("Queued:"));
        assert_eq!(completion_payload(&completion(RunOutcome::Failed))["level"], "error");
    }

    #[test]
    fn test_payloads() {
        let p = completion_payload(&completion(RunOutcome::PartiallyCompleted));
        assert_eq!(p["event"], "task_complete");
        assert_eq!(p["level"], "warning");
        assert_eq!(p["outcome"], "partially_completed");
        assert_eq!(p["duration_ms"], 1500);

        let f = failure_payload(&TaskFailure {
            task_id: "t1".into(),
            task_name: "nightly".into(),
            error: "boom".into(),
        });
        assert_eq!(f["event"], "task_failed");
        assert!(f["text"].as_str().unwrap().contains("boom"));
    }

    #[tokio::test]
    async fn test_router_fans_out_and_swallows_errors() {
        let recorder = Arc::new(RecordingNotifier::default());
        let router = NotifyRouter::new()
            .with(Arc::new(Broken))
            .with(Arc::new(TracingNotifier))
            .with(recorder.clone());
        assert_eq!(router.names(), vec!["broken", "log", "recording"]);

        router.notify_task_complete(&completion(RunOutcome::Completed)).await.unwrap();
        router
            .notify_task_failed(&TaskFailure {
                task_id: "t1".into(),
                task_name: "nightly".into(),
                error: "boom".into(),
            })
            .await
            .unwrap();

        assert_eq!(recorder.completions().len(), 1);
        assert_eq!(recorder.failures().len(), 1);
    }

    #[tokio::test]
    async fn test_webhook_unreachable_is_notify_error() {
        let hook = WebhookNotifier::new("http://127.0.0.1:9/hook");
        let err = hook
            .notify_task_complete(&completion(RunOutcome::Completed))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "notify");
    }
}
