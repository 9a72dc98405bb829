//! Error types shared across CEUSLab crates.

use std::path::PathBuf;

/// Top-level error type for CEUSLab operations.
///
/// Structural variants (`InputShape`, `EmptyVideo`) abort a whole request.
/// The others are scoped to one ROI or one model and are reported next to
/// the results that did succeed.
#[derive(Debug, thiserror::Error)]
pub enum CeusError {
    #[error("Input shape error: {message}")]
    InputShape { message: String },

    #[error("Empty video: {message}")]
    EmptyVideo { message: String },

    #[error("Invalid ROI '{label}': {message}")]
    InvalidRoi { label: String, message: String },

    #[error("Insufficient data for {context}: need at least {needed} points, got {got}")]
    InsufficientData {
        context: String,
        needed: usize,
        got: usize,
    },

    #[error("Fit diverged for model {model}: all {starts} starts failed")]
    FitDiverged { model: String, starts: usize },

    #[error("Metric {metric} is not a number")]
    NotANumber { metric: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("File not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using CeusError.
pub type CeusResult<T> = Result<T, CeusError>;

impl CeusError {
    pub fn input_shape(msg: impl Into<String>) -> Self {
        Self::InputShape {
            message: msg.into(),
        }
    }

    pub fn empty_video(msg: impl Into<String>) -> Self {
        Self::EmptyVideo {
            message: msg.into(),
        }
    }

    pub fn invalid_roi(label: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::InvalidRoi {
            label: label.into(),
            message: msg.into(),
        }
    }

    pub fn insufficient_data(context: impl Into<String>, needed: usize, got: usize) -> Self {
        Self::InsufficientData {
            context: context.into(),
            needed,
            got,
        }
    }

    pub fn fit_diverged(model: impl Into<String>, starts: usize) -> Self {
        Self::FitDiverged {
            model: model.into(),
            starts,
        }
    }

    pub fn not_a_number(metric: impl Into<String>) -> Self {
        Self::NotANumber {
            metric: metric.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Whether this error aborts the whole analysis request.
    ///
    /// Per-ROI and per-model failures return `false`.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::InputShape { .. } | Self::EmptyVideo { .. } | Self::Config { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structural_classification() {
        assert!(CeusError::empty_video("no frames").is_structural());
        assert!(CeusError::input_shape("bad channels").is_structural());
        assert!(!CeusError::invalid_roi("ROI_1", "too small").is_structural());
        assert!(!CeusError::fit_diverged("gamma", 50).is_structural());
        assert!(!CeusError::insufficient_data("loess", 3, 2).is_structural());
    }

    #[test]
    fn test_messages_name_the_context() {
        let err = CeusError::insufficient_data("kinetic fit", 5, 2);
        assert_eq!(
            err.to_string(),
            "Insufficient data for kinetic fit: need at least 5 points, got 2"
        );

        let err = CeusError::invalid_roi("liver", "zero area");
        assert_eq!(err.to_string(), "Invalid ROI 'liver': zero area");
    }
}
