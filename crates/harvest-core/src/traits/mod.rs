//! Collaborator traits consumed by the scheduler.

pub mod dispatcher;
pub mod notifier;
pub mod provider;

pub use dispatcher::DownloadDispatcher;
pub use notifier::Notifier;
pub use provider::FileProvider;
