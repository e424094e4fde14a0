//! Custom error types for the application.
//!
//! This module defines the primary error type, `SnapError`, shared by the
//! sequencer, the snapshot differencer, the cube aggregator and the review
//! path. Using the `thiserror` crate, it gives every failure the operator can
//! see a distinct, matchable variant.
//!
//! ## Error Hierarchy
//!
//! - **`DeviceNotFound`**: discovery could not locate the wavelength source or
//!   the trigger. Blocks the run from starting.
//! - **`Transport`**: a write to an endpoint failed mid-run. The run is aborted
//!   as a whole; there is no resume-from-step.
//! - **`CountMismatch`**: the number of new output folders differs from the
//!   number of shots the recipe fired.
//! - **`DimensionMismatch`**: two cubes that should be summed have different
//!   shapes.
//! - **`NotReady`**: aggregation was requested before the run finished.
//!
//! The remaining variants cover configuration, file formats and the session
//! state machine. `Io` and `Config` are created with `#[from]` so the `?`
//! operator works across the crate.

use std::path::PathBuf;
use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, SnapError>;

/// Which of the two hardware endpoints an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum EndpointKind {
    /// The tunable light source accepting `gowave` commands.
    Source,
    /// The microcontroller firing the camera trigger.
    Trigger,
}

impl std::fmt::Display for EndpointKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EndpointKind::Source => write!(f, "wavelength source"),
            EndpointKind::Trigger => write!(f, "trigger"),
        }
    }
}

#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum SnapError {
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("No {0} found during device discovery")]
    DeviceNotFound(EndpointKind),

    #[error("Communication with {kind} failed: {message}")]
    Transport { kind: EndpointKind, message: String },

    #[error("Expected {expected} new output folders but found {found}")]
    CountMismatch { expected: usize, found: usize },

    #[error("Cube dimensions differ in group '{group}': expected {expected:?}, found {found:?}")]
    DimensionMismatch {
        group: String,
        expected: (usize, usize, usize),
        found: (usize, usize, usize),
    },

    #[error("Aggregation is not ready: {0}")]
    NotReady(String),

    #[error("Run cancelled after {shots_fired} shots")]
    Cancelled { shots_fired: usize },

    #[error("Invalid recipe: {0}")]
    InvalidRecipe(String),

    #[error("Invalid session transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Folder name '{0}' does not follow the project_date_wavelength_shot convention")]
    FolderName(String),

    #[error("Cube format error in {path}: {message}")]
    CubeFormat { path: PathBuf, message: String },

    #[error("Band {band} is out of range for a cube with {bands} bands")]
    BandOutOfRange { band: usize, bands: usize },

    #[error("Image encoding error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Nothing selected to sum")]
    EmptySelection,

    #[error("No entry {index} in a collection of {len}")]
    UnknownEntry { index: usize, len: usize },

    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),
}

impl From<figment::Error> for SnapError {
    fn from(value: figment::Error) -> Self {
        SnapError::Config(Box::new(value))
    }
}

impl SnapError {
    /// Build a cube format error for `path`.
    pub fn cube_format(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        SnapError::CubeFormat {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Whether the operator can retry without changing anything on disk or in
    /// the recipe.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SnapError::Transport { .. }
                | SnapError::DeviceNotFound(_)
                | SnapError::Cancelled { .. }
                | SnapError::NotReady(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_mismatch_reports_both_counts() {
        let err = SnapError::CountMismatch {
            expected: 3,
            found: 2,
        };
        let msg = err.to_string();
        assert!(msg.contains('3'));
        assert!(msg.contains('2'));
    }

    #[test]
    fn transport_names_the_endpoint() {
        let err = SnapError::Transport {
            kind: EndpointKind::Trigger,
            message: "port vanished".into(),
        };
        assert_eq!(
            err.to_string(),
            "Communication with trigger failed: port vanished"
        );
        assert!(err.is_retryable());
    }

    #[test]
    fn dimension_mismatch_is_not_retryable() {
        let err = SnapError::DimensionMismatch {
            group: "500".into(),
            expected: (10, 10, 5),
            found: (10, 12, 5),
        };
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("'500'"));
    }
}
