//! CEUSLab Analysis Core
//!
//! Perfusion analysis of contrast-enhanced ultrasound clips:
//! - **Classification:** split a clip into its contrast and B-mode stacks
//! - **Events:** flash and washout detection
//! - **Registration:** sub-pixel phase-correlation motion compensation
//! - **Preprocessing:** normalization, log compression, denoising, baseline removal
//! - **TICs:** ROI rasterization and time-intensity curves
//! - **Smoothing and fitting:** LOESS and multi-start kinetic model fits
//! - **Metrics:** AUC, MTT, peak, time-to-peak, rise slope
//!
//! This crate is pure computation with no I/O and no platform dependencies.
//! All inputs are data; all outputs are data.

pub mod classify;
pub mod events;
pub mod export;
pub mod filters;
pub mod fitting;
pub mod linalg;
pub mod loess;
pub mod metrics;
pub mod pipeline;
pub mod preprocess;
pub mod registration;
pub mod tic;

pub use classify::classify_regions;
pub use events::{detect_flash, FlashConfig, FlashDetection};
pub use fitting::{fit_models, FitRequest, FitResult, KineticModel, ModelFits};
pub use loess::{loess_smooth, LoessConfig};
pub use metrics::{compute_metrics, MetricSet};
pub use pipeline::{analyze, AnalysisReport, AnalysisRequest, RoiAnalysis, Stages};
pub use preprocess::{preprocess_ceus, PreprocessConfig};
pub use registration::{motion_compensate, Registration, RegistrationConfig};
pub use tic::{extract_tic, rasterize, Mask};
