//! CEUSLab Common Utilities
//!
//! Shared infrastructure for all CEUSLab crates:
//! - Error taxonomy and result aliases
//! - Frame clock: frame-rate resolution and time axes
//! - Tracing/logging initialization
//! - Configuration loading

pub mod clock;
pub mod config;
pub mod error;
pub mod logging;

pub use clock::*;
pub use config::*;
pub use error::*;
