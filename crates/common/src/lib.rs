//! Simcast Common Utilities
//!
//! Shared infrastructure for all simcast crates:
//! - Error types and result aliases
//! - Virtual-time clock utilities for export pacing
//! - Tracing/logging initialization
//! - Configuration loading

pub mod clock;
pub mod config;
pub mod error;
pub mod logging;

pub use clock::*;
pub use config::*;
pub use error::*;
