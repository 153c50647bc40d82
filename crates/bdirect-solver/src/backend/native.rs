//! Native direct backend using nalgebra and nalgebra-sparse.
//!
//! This is the default backend when no external solver library is linked.
//! The centralized triplets are summed into a dense matrix (duplicates
//! accumulate) and factorized once:
//! - LU with partial pivoting for unsymmetric and general symmetric matrices
//! - Cholesky when the control options declare the matrix positive definite
//!
//! The factors stay alive until the next analyze+factorize or terminate job,
//! so any number of solve jobs can reuse them.

use nalgebra::linalg::{Cholesky, LU};
use nalgebra::{DMatrix, DVector, Dyn};
use nalgebra_sparse::CooMatrix;
use tracing::debug;

use super::traits::*;
use crate::config::{ControlOptions, MatrixSymmetry};

enum Factors {
    Lu(LU<f64, Dyn, Dyn>),
    Cholesky(Cholesky<f64, Dyn>),
}

/// Native solver backend.
///
/// Suitable for small-to-medium systems (up to a few thousand unknowns);
/// factor storage is dense.
#[derive(Default)]
pub struct NativeBackend {
    control: Option<ControlOptions>,
    factors: Option<Factors>,
    order: usize,
}

impl NativeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether factors from a successful analyze+factorize job are held.
    pub fn is_factorized(&self) -> bool {
        self.factors.is_some()
    }

    fn analyze_factorize(&mut self, matrix: &SparseTripletsF64) -> JobStatus {
        let Some(control) = self.control.as_ref() else {
            return JobStatus::INVALID_JOB_SEQUENCE;
        };
        self.factors = None;

        let n = matrix.nrows;
        let checked = check_triplets(matrix);
        if checked.is_failure() {
            return checked;
        }
        if let Some(limit_mb) = control.memory_limit_mb {
            let needed = n.checked_mul(n).and_then(|e| e.checked_mul(std::mem::size_of::<f64>()));
            if needed.is_none_or(|bytes| bytes > limit_mb.saturating_mul(1024 * 1024)) {
                return JobStatus::OUT_OF_MEMORY;
            }
        }

        let coo = match CooMatrix::try_from_triplets(
            n,
            n,
            matrix.row_indices.clone(),
            matrix.col_indices.clone(),
            matrix.values.clone(),
        ) {
            Ok(coo) => coo,
            Err(err) => {
                debug!(backend = self.name(), %err, "rejected triplets");
                return JobStatus::MALFORMED_INPUT;
            }
        };
        let dense = DMatrix::from(&coo);
        let factors = match control.symmetry {
            MatrixSymmetry::PositiveDefinite => match Cholesky::new(dense) {
                Some(chol) => Factors::Cholesky(chol),
                None => return JobStatus::NUMERICALLY_SINGULAR,
            },
            MatrixSymmetry::Unsymmetric | MatrixSymmetry::GeneralSymmetric => {
                let lu = dense.lu();
                let pivots = lu.u().diagonal().map(f64::abs);
                let largest = pivots.max();
                let threshold = control.null_pivot_tolerance * largest;
                if largest == 0.0 || pivots.iter().any(|&p| p <= threshold) {
                    return JobStatus::NUMERICALLY_SINGULAR;
                }
                Factors::Lu(lu)
            }
        };

        if control.verbosity > 0 {
            debug!(
                backend = self.name(),
                order = n,
                entries = matrix.nnz(),
                symmetry = control.symmetry.code(),
                "factorization complete"
            );
        }
        self.factors = Some(factors);
        self.order = n;
        JobStatus::OK
    }

    fn solve(&mut self, rhs: &mut [f64]) -> JobStatus {
        let Some(factors) = self.factors.as_ref() else {
            return JobStatus::INVALID_JOB_SEQUENCE;
        };
        if rhs.len() != self.order || rhs.iter().any(|v| !v.is_finite()) {
            return JobStatus::MALFORMED_INPUT;
        }

        let mut b = DVector::from_column_slice(rhs);
        let solved = match factors {
            Factors::Lu(lu) => lu.solve_mut(&mut b),
            Factors::Cholesky(chol) => {
                chol.solve_mut(&mut b);
                true
            }
        };
        if !solved || b.iter().any(|v| !v.is_finite()) {
            return JobStatus::NUMERICALLY_SINGULAR;
        }
        rhs.copy_from_slice(b.as_slice());
        JobStatus::OK
    }
}

impl DirectBackend for NativeBackend {
    fn name(&self) -> &str {
        "native-nalgebra"
    }

    fn execute(&mut self, request: JobRequest<'_>) -> JobStatus {
        match request {
            JobRequest::Initialize { control } => {
                self.control = Some(control.clone());
                self.factors = None;
                self.order = 0;
                JobStatus::OK
            }
            JobRequest::AnalyzeFactorize { matrix } => self.analyze_factorize(matrix),
            JobRequest::Solve { rhs } => self.solve(rhs),
            JobRequest::Terminate => {
                if self.control.is_none() {
                    return JobStatus::INVALID_JOB_SEQUENCE;
                }
                self.control = None;
                self.factors = None;
                self.order = 0;
                JobStatus::OK
            }
        }
    }
}
