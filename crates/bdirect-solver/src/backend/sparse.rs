//! Sparse direct backend using faer's sparse LU.
//!
//! The centralized triplets are compressed to CSC (duplicates accumulate)
//! and factorized with fill-reducing ordering. The factors stay alive until
//! the next analyze+factorize or terminate job, so solve jobs only run the
//! triangular solves. Storage grows with the factor fill, not with `n²`.
//!
//! After factorizing, a solve against a ones vector checks the pivots: an
//! exact zero pivot leaves a non-finite entry. `nullPivotTolerance` only
//! applies to the dense backend. Every declared symmetry is factorized with
//! LU.

use faer::prelude::*;
use faer::sparse::linalg::solvers::Lu;
use faer::sparse::{SparseColMat, Triplet};
use tracing::debug;

use super::traits::*;
use crate::config::ControlOptions;

/// Bytes per stored entry: value plus row index.
const ENTRY_BYTES: usize = std::mem::size_of::<f64>() + std::mem::size_of::<usize>();

#[derive(Default)]
pub struct SparseLuBackend {
    control: Option<ControlOptions>,
    lu: Option<Lu<usize, f64>>,
    order: usize,
}

impl SparseLuBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_factorized(&self) -> bool {
        self.lu.is_some()
    }

    fn analyze_factorize(&mut self, matrix: &SparseTripletsF64) -> JobStatus {
        let Some(control) = self.control.as_ref() else {
            return JobStatus::INVALID_JOB_SEQUENCE;
        };
        self.lu = None;

        let checked = check_triplets(matrix);
        if checked.is_failure() {
            return checked;
        }
        let n = matrix.nrows;
        if let Some(limit_mb) = control.memory_limit_mb {
            let needed = matrix.nnz().checked_mul(ENTRY_BYTES);
            if needed.is_none_or(|bytes| bytes > limit_mb.saturating_mul(1024 * 1024)) {
                return JobStatus::OUT_OF_MEMORY;
            }
        }

        let triplets: Vec<Triplet<usize, usize, f64>> = matrix
            .row_indices
            .iter()
            .zip(&matrix.col_indices)
            .zip(&matrix.values)
            .map(|((&r, &c), &v)| Triplet::new(r, c, v))
            .collect();
        let csc = match SparseColMat::<usize, f64>::try_new_from_triplets(n, n, &triplets) {
            Ok(csc) => csc,
            Err(err) => {
                debug!(backend = self.name(), ?err, "rejected triplets");
                return JobStatus::MALFORMED_INPUT;
            }
        };
        let lu = match csc.sp_lu() {
            Ok(lu) => lu,
            Err(err) => {
                debug!(backend = self.name(), ?err, "factorization failed");
                return JobStatus::NUMERICALLY_SINGULAR;
            }
        };

        let ones = lu.solve(faer::Mat::<f64>::from_fn(n, 1, |_, _| 1.0));
        if (0..n).any(|i| !ones[(i, 0)].is_finite()) {
            return JobStatus::NUMERICALLY_SINGULAR;
        }

        if control.verbosity > 0 {
            debug!(
                backend = self.name(),
                order = n,
                entries = matrix.nnz(),
                symmetry = control.symmetry.code(),
                "factorization complete"
            );
        }
        self.lu = Some(lu);
        self.order = n;
        JobStatus::OK
    }

    fn solve(&mut self, rhs: &mut [f64]) -> JobStatus {
        let Some(lu) = self.lu.as_ref() else {
            return JobStatus::INVALID_JOB_SEQUENCE;
        };
        if rhs.len() != self.order || rhs.iter().any(|v| !v.is_finite()) {
            return JobStatus::MALFORMED_INPUT;
        }

        let x = lu.solve(faer::Mat::<f64>::from_fn(self.order, 1, |i, _| rhs[i]));
        if (0..self.order).any(|i| !x[(i, 0)].is_finite()) {
            return JobStatus::NUMERICALLY_SINGULAR;
        }
        for (i, slot) in rhs.iter_mut().enumerate() {
            *slot = x[(i, 0)];
        }
        JobStatus::OK
    }
}

impl DirectBackend for SparseLuBackend {
    fn name(&self) -> &str {
        "sparse-lu-faer"
    }

    fn execute(&mut self, request: JobRequest<'_>) -> JobStatus {
        match request {
            JobRequest::Initialize { control } => {
                self.control = Some(control.clone());
                self.lu = None;
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
                self.lu = None;
                self.order = 0;
                JobStatus::OK
            }
        }
    }
}
