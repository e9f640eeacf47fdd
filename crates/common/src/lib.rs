//! clipforge Common Utilities
//!
//! Shared infrastructure for all clipforge crates:
//! - Error types and result aliases
//! - Clock and frame-budget utilities for the export loop
//! - Tracing/logging initialization
//! - Configuration loading

pub mod clock;
pub mod config;
pub mod error;
pub mod logging;

pub use clock::*;
pub use config::*;
pub use error::*;
