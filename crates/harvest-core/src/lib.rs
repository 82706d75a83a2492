//! # Harvest Core
//!
//! Shared types, collaborator traits, configuration and errors for Harvest.
//! The scheduler and the adapters both build on this crate; it has no
//! runtime of its own.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::HarvestConfig;
pub use error::{HarvestError, Result};
