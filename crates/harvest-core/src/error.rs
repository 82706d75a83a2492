//! Unified error types for Harvest.

use thiserror::Error;

/// Result type alias using HarvestError.
pub type Result<T> = std::result::Result<T, HarvestError>;

#[derive(Error, Debug)]
pub enum HarvestError {
    // Task definition errors
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Task not found: {0}")]
    NotFound(String),

    // Store errors
    #[error("Persistence error: {0}")]
    Persistence(String),

    // Trigger errors
    #[error("Registration error: {0}")]
    Registration(String),

    // Collaborator errors
    #[error("File provider error: {0}")]
    Provider(String),

    #[error("Download dispatch error: {0}")]
    Dispatch(String),

    #[error("Notification error: {0}")]
    Notify(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    // Config errors
    #[error("Configuration error: {0}")]
    Config(String),

    // General errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("{0}")]
    Other(String),
}

impl HarvestError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound(id.into())
    }

    pub fn persistence(msg: impl Into<String>) -> Self {
        Self::Persistence(msg.into())
    }

    pub fn registration(msg: impl Into<String>) -> Self {
        Self::Registration(msg.into())
    }

    pub fn provider(msg: impl Into<String>) -> Self {
        Self::Provider(msg.into())
    }

    pub fn dispatch(msg: impl Into<String>) -> Self {
        Self::Dispatch(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Short, stable label for the class of failure.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::NotFound(_) => "not_found",
            Self::Persistence(_) | Self::Io(_) | Self::Json(_) => "persistence",
            Self::Registration(_) => "registration",
            Self::Provider(_) => "provider",
            Self::Dispatch(_) => "dispatch",
            Self::Notify(_) => "notify",
            Self::Timeout(_) => "timeout",
            Self::Config(_) | Self::Toml(_) => "config",
            Self::Other(_) => "other",
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = HarvestError::Validation("bad cron".into());
        assert!(err.to_string().contains("bad cron"));
    }

    #[test]
    fn test_error_constructors() {
        let e1 = HarvestError::validation("test");
        assert!(matches!(e1, HarvestError::Validation(_)));

        let e2 = HarvestError::persistence("test");
        assert!(matches!(e2, HarvestError::Persistence(_)));

        let e3 = HarvestError::registration("test");
        assert!(matches!(e3, HarvestError::Registration(_)));

        let e4 = HarvestError::not_found("abc");
        assert!(e4.is_not_found());
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(HarvestError::validation("x").kind(), "validation");
        assert_eq!(HarvestError::persistence("x").kind(), "persistence");
        assert_eq!(HarvestError::registration("x").kind(), "registration");
        assert_eq!(HarvestError::Timeout("x".into()).kind(), "timeout");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only");
        let err: HarvestError = io_err.into();
        assert!(matches!(err, HarvestError::Io(_)));
        assert_eq!(err.kind(), "persistence");
    }
}
