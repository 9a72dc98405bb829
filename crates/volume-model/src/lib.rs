//! CEUSLab Volume Model
//!
//! Defines the core data contracts shared by the analysis pipeline:
//! - **Volume:** Decoded multi-frame pixel data `(T, H, W, C)`
//! - **Region:** Ultrasound region geometry and the B-mode / CEUS split
//! - **ROI:** Caller-owned region-of-interest session
//! - **TIC:** Time-intensity curves with a caller-toggled inclusion mask
//!
//! Everything here is plain data. No type holds process-wide state.

pub mod region;
pub mod roi;
pub mod tic;
pub mod volume;

pub use region::*;
pub use roi::*;
pub use tic::*;
pub use volume::*;
