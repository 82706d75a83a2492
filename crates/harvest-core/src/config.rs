//! Harvest configuration: `~/.harvest/config.toml`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{HarvestError, Result};
use crate::types::TaskDraft;

/// Owner id given to tasks seeded from the config file.
pub const CONFIG_OWNER: &str = "config";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarvestConfig {
    /// Directory holding `scheduled_tasks.json`.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub download: DownloadConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// `pretty` or `json`.
    #[serde(default = "default_log_format")]
    pub format: String,
}

/// What to do when a task fires while its previous run is still going.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OverlapPolicy {
    /// Skip the new run and log it.
    #[default]
    Skip,
    /// Let runs of the same task overlap.
    Allow,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Start triggers when serving.
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub overlap: OverlapPolicy,
    #[serde(default = "default_provider_timeout")]
    pub provider_timeout_secs: u64,
    #[serde(default = "default_dispatch_timeout")]
    pub dispatch_timeout_secs: u64,
    /// Files listed in a preview notification.
    #[serde(default = "default_preview_sample")]
    pub preview_sample_size: usize,
    /// Send a notification when a run finds nothing.
    #[serde(default = "default_true")]
    pub notify_empty: bool,
    #[serde(default)]
    pub tasks: Vec<TaskSeed>,
}

/// A task declared in the config file, created on first `serve`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskSeed {
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub schedule: String,
    pub path: String,
    #[serde(default = "default_lookback")]
    pub lookback_window: u32,
    #[serde(default)]
    pub video_only: bool,
    #[serde(default)]
    pub preview_only: bool,
}

impl TaskSeed {
    pub fn to_draft(&self) -> TaskDraft {
        TaskDraft {
            name: self.name.clone(),
            path: self.path.clone(),
            schedule: self.schedule.clone(),
            lookback_window: self.lookback_window,
            video_only: self.video_only,
            preview_only: self.preview_only,
            enabled: self.enabled,
            owner_id: CONFIG_OWNER.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Local mirror of the remote tree.
    #[serde(default = "default_source_root")]
    pub root: String,
    #[serde(default = "default_video_extensions")]
    pub video_extensions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadConfig {
    #[serde(default = "default_download_dir")]
    pub base_dir: String,
    /// aria2 input file that receives queued downloads.
    #[serde(default = "default_input_file")]
    pub input_file: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    #[serde(default)]
    pub webhook_url: Option<String>,
    /// Also write notifications to the log.
    #[serde(default = "default_true")]
    pub log: bool,
}

fn default_true() -> bool { true }
fn default_data_dir() -> String { "~/.harvest/data".into() }
fn default_log_level() -> String { "info".into() }
fn default_log_format() -> String { "pretty".into() }
fn default_provider_timeout() -> u64 { 120 }
fn default_dispatch_timeout() -> u64 { 300 }
fn default_preview_sample() -> usize { 10 }
fn default_lookback() -> u32 { 24 }
fn default_source_root() -> String { "/mnt/remote".into() }
fn default_download_dir() -> String { "~/Downloads/harvest".into() }
fn default_input_file() -> String { "~/.harvest/aria2.input".into() }

fn default_video_extensions() -> Vec<String> {
    ["mp4", "mkv", "avi", "mov", "wmv", "flv", "webm", "m4v", "ts", "rmvb"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            log: LogConfig::default(),
            scheduler: SchedulerConfig::default(),
            source: SourceConfig::default(),
            download: DownloadConfig::default(),
            notify: NotifyConfig::default(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self { level: default_log_level(), format: default_log_format() }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            overlap: OverlapPolicy::default(),
            provider_timeout_secs: default_provider_timeout(),
            dispatch_timeout_secs: default_dispatch_timeout(),
            preview_sample_size: default_preview_sample(),
            notify_empty: true,
            tasks: vec![],
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self { root: default_source_root(), video_extensions: default_video_extensions() }
    }
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self { base_dir: default_download_dir(), input_file: default_input_file() }
    }
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self { webhook_url: None, log: true }
    }
}

impl HarvestConfig {
    /// Harvest home directory (`~/.harvest`).
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".harvest")
    }

    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Load from the default path, falling back to defaults when absent.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::default_path())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::default_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| HarvestError::config(format!("serialize config: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.scheduler.provider_timeout_secs == 0 || self.scheduler.dispatch_timeout_secs == 0 {
            return Err(HarvestError::config("scheduler timeouts must be > 0"));
        }
        if !matches!(self.log.format.as_str(), "pretty" | "json") {
            return Err(HarvestError::config(format!(
                "log.format must be 'pretty' or 'json', got '{}'",
                self.log.format
            )));
        }
        Ok(())
    }

    pub fn data_path(&self) -> PathBuf {
        expand_path(&self.data_dir)
    }
}

/// Expand `~` and environment variables in a configured path.
pub fn expand_path(p: &str) -> PathBuf {
    match shellexpand::full(p) {
        Ok(expanded) => PathBuf::from(expanded.as_ref()),
        Err(_) => PathBuf::from(shellexpand::tilde(p).as_ref()),
    }
}
