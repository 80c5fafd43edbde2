//! Incremental determinant and inverse maintenance.
//!
//! A [`DetManip`] holds a square matrix `M[i][j] = f(x_i, y_j)` built from
//! two ordered argument lists and a [`Kernel`] `f`. It keeps `M⁻¹` and
//! `det M` up to date while rows and columns are inserted, removed or
//! replaced, in O(N²) per edit instead of O(N³). Every edit is a two-phase
//! transaction: a `try_*` call returns the determinant ratio of the edit, and
//! the caller then either commits it with [`DetManip::complete_operation`] or
//! drops it with [`DetManip::reject_last_try`].

pub mod algebra;
pub mod driver;
pub mod engine;
pub mod kernel;
pub mod provenance;
pub mod store;

// Re-exporting the main types for easier access by callers.
pub use engine::{ConsistencyReport, DetManip};
pub use kernel::{Kernel, Matrix, Vector};

// --- Errors ---

/// Failures of the determinant engine. All of them are recoverable: the
/// engine state is left as it was after the last commit.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DetManipError {
    /// Out-of-range, repeated or mismatched indices for an edit.
    #[error("invalid indices for {operation}: {detail}")]
    InvalidIndices {
        operation: &'static str,
        detail: String,
    },

    /// Argument access beyond the current size.
    #[error("index {index} out of range for size {size}")]
    IndexOutOfRange { index: usize, size: usize },

    /// A `try_*` call was made while another proposal is still pending.
    #[error("an operation is already pending; complete or reject it first")]
    OperationAlreadyPending,

    /// `complete_operation` was called with nothing pending.
    #[error("no pending operation to complete")]
    NoPendingOperation,

    /// The edit would make the matrix singular (pivot at or below the
    /// singular threshold, or not finite).
    #[error("degenerate matrix in {operation}: pivot modulus {modulus:e}")]
    DegenerateMatrix {
        operation: &'static str,
        modulus: f64,
    },

    /// Row and column argument lists of different lengths.
    #[error("shape mismatch: {rows} row arguments, {cols} column arguments")]
    ShapeMismatch { rows: usize, cols: usize },

    /// Rejected configuration values.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// JSON encoding or decoding of journals and snapshots.
    #[error("serialization error: {0}")]
    Serialization(String),
}

// --- Configuration ---

/// Numerical settings of one engine instance.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(default)]
pub struct DetManipConfig {
    /// Rows/columns reserved up front; the buffers double beyond it.
    pub initial_capacity: usize,
    /// A pivot (Schur complement, minor, capacitance determinant) whose
    /// modulus is not above this value makes the edit degenerate.
    pub singular_threshold: f64,
    /// A pivot whose modulus is not above this fraction of the terms it was
    /// computed from (before they cancel) makes the edit degenerate.
    pub relative_threshold: f64,
    /// Commits between two drift checks against a full recomputation;
    /// 0 disables the check.
    pub n_operations_before_check: usize,
    /// Inverse deviation above which a drift check logs a warning.
    pub precision_warning: f64,
    /// Inverse deviation above which a drift check logs an error.
    pub precision_error: f64,
}

impl Default for DetManipConfig {
    fn default() -> Self {
        DetManipConfig {
            initial_capacity: 16,
            singular_threshold: 0.0,
            relative_threshold: 1e-10,
            n_operations_before_check: 100,
            precision_warning: 1e-8,
            precision_error: 1e-5,
        }
    }
}

impl DetManipConfig {
    /// Checks that thresholds are usable.
    pub fn validate(&self) -> Result<(), DetManipError> {
        if !(self.singular_threshold >= 0.0) {
            return Err(DetManipError::InvalidConfig(format!(
                "singular_threshold must be non-negative, got {}",
                self.singular_threshold
            )));
        }
        if !(0.0..1.0).contains(&self.relative_threshold) {
            return Err(DetManipError::InvalidConfig(format!(
                "relative_threshold must lie in [0, 1), got {}",
                self.relative_threshold
            )));
        }
        if !(self.precision_warning > 0.0 && self.precision_error > 0.0) {
            return Err(DetManipError::InvalidConfig(
                "precision thresholds must be positive".to_string(),
            ));
        }
        if self.precision_warning > self.precision_error {
            return Err(DetManipError::InvalidConfig(format!(
                "precision_warning ({}) exceeds precision_error ({})",
                self.precision_warning, self.precision_error
            )));
        }
        Ok(())
    }

    /// The pivot test every proposal applies.
    pub fn pivot_tolerance(&self) -> kernel::PivotTolerance {
        kernel::PivotTolerance {
            absolute: self.singular_threshold,
            relative: self.relative_threshold,
        }
    }

    /// Parses and validates a configuration from a JSON string. Missing
    /// fields take their default values.
    pub fn from_json(json_str: &str) -> Result<Self, DetManipError> {
        let config: DetManipConfig = serde_json::from_str(json_str)
            .map_err(|e| DetManipError::InvalidConfig(format!("Failed to parse configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Serializes the configuration to a JSON string.
    pub fn to_json(&self) -> Result<String, DetManipError> {
        serde_json::to_string_pretty(self)
            .map_err(|e| DetManipError::InvalidConfig(format!("Failed to serialize configuration: {}", e)))
    }
}
