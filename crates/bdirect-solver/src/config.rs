//! Solver settings and direct-solver control options.
//!
//! `SolverSettings` is the dictionary read from the case: whether to dump the
//! centralized system, under which file prefix, and whether to report
//! residuals. `ControlOptions` is the control structure handed to the direct
//! solver with the initialize job.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SolverError};

/// Matrix symmetry declared to the direct solver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MatrixSymmetry {
    /// General unsymmetric matrix (LU with partial pivoting)
    Unsymmetric,
    /// Symmetric positive definite (Cholesky)
    PositiveDefinite,
    /// General symmetric (LU, symmetry not exploited)
    GeneralSymmetric,
}

impl Default for MatrixSymmetry {
    fn default() -> Self {
        MatrixSymmetry::Unsymmetric
    }
}

impl MatrixSymmetry {
    /// Numeric code used by the job protocol (0, 1, 2).
    pub fn code(&self) -> i32 {
        match self {
            MatrixSymmetry::Unsymmetric => 0,
            MatrixSymmetry::PositiveDefinite => 1,
            MatrixSymmetry::GeneralSymmetric => 2,
        }
    }
}

/// Control options passed to the direct solver at initialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct ControlOptions {
    /// Declared symmetry of the centralized matrix
    pub symmetry: MatrixSymmetry,
    /// Diagnostic verbosity of the backend, 0 (silent) to 4 (everything)
    pub verbosity: u8,
    /// Pivots with |u_ii| <= tolerance * max|u_jj| are treated as zero. The
    /// default 0.0 only rejects exact zero pivots, so badly scaled but
    /// nonsingular matrices still factorize.
    pub null_pivot_tolerance: f64,
    /// Upper bound on factor storage in MiB (`None` = unlimited)
    pub memory_limit_mb: Option<usize>,
}

impl Default for ControlOptions {
    fn default() -> Self {
        Self {
            symmetry: MatrixSymmetry::Unsymmetric,
            verbosity: 0,
            null_pivot_tolerance: 0.0,
            memory_limit_mb: None,
        }
    }
}

impl ControlOptions {
    pub fn validate(&self) -> Result<()> {
        if self.verbosity > 4 {
            return Err(SolverError::Config(format!(
                "control.verbosity must be in 0..=4, got {}",
                self.verbosity
            )));
        }
        if !self.null_pivot_tolerance.is_finite() || self.null_pivot_tolerance < 0.0 {
            return Err(SolverError::Config(format!(
                "control.nullPivotTolerance must be finite and non-negative, got {}",
                self.null_pivot_tolerance
            )));
        }
        if self.memory_limit_mb == Some(0) {
            return Err(SolverError::Config(
                "control.memoryLimitMb must be positive when set".into(),
            ));
        }
        Ok(())
    }
}

/// Recognized solver settings.
///
/// The three top-level keys are mandatory; `control` may be omitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SolverSettings {
    /// Write the centralized system to disk before it is solved
    pub dump_complete_system: bool,
    /// File-name prefix for dumps
    pub dump_file_prefix: String,
    /// Log initial and final residuals after every solve
    pub print_residuals: bool,
    #[serde(default)]
    pub control: ControlOptions,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            dump_complete_system: false,
            dump_file_prefix: "linearSystem".to_string(),
            print_residuals: false,
            control: ControlOptions::default(),
        }
    }
}

impl SolverSettings {
    /// Parse and validate settings from a JSON dictionary.
    pub fn from_json_str(text: &str) -> Result<Self> {
        let settings: SolverSettings =
            serde_json::from_str(text).map_err(|err| SolverError::Config(err.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.dump_complete_system && self.dump_file_prefix.trim().is_empty() {
            return Err(SolverError::Config(
                "dumpFilePrefix must not be empty when dumpCompleteSystem is enabled".into(),
            ));
        }
        self.control.validate()
    }
}
