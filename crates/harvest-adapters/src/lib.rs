//! # Harvest Adapters
//!
//! In-process collaborators for the scheduler:
//! - [`LocalDirProvider`] lists recently modified files under a mounted mirror
//! - [`Aria2InputFileDispatcher`] queues downloads in an aria2 input file

pub mod aria2;
pub mod local_fs;

pub use aria2::Aria2InputFileDispatcher;
pub use local_fs::LocalDirProvider;
