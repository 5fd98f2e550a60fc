// Partition Service - cluster partition table assignment, publication and migration
// Core library module

pub mod clustering;
pub mod config;
pub mod error;

pub use config::PartitionServiceConfig;
pub use error::{PartitionError, Result};

/// Crate version, surfaced for startup banners and diagnostics.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
