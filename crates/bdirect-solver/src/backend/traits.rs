//! Job protocol between the driver and the opaque direct solver.
//!
//! A backend is a persistent instance driven by a fixed sequence of job
//! requests: initialize, analyze+factorize, any number of solves, terminate.
//! Every request returns a status code; negative codes are unrecoverable.

use std::fmt;

use crate::config::ControlOptions;

/// Sparse matrix in COO (coordinate/triplet) format.
///
/// This is the interchange format between the assembler and the direct
/// solver. Duplicate `(row, col)` entries are legal and are summed by the
/// solver, never merged here.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SparseTripletsF64 {
    pub nrows: usize,
    pub ncols: usize,
    pub row_indices: Vec<usize>,
    pub col_indices: Vec<usize>,
    pub values: Vec<f64>,
}

impl SparseTripletsF64 {
    pub fn new(nrows: usize, ncols: usize) -> Self {
        Self {
            nrows,
            ncols,
            ..Default::default()
        }
    }

    /// Number of stored entries, duplicates included.
    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn push(&mut self, row: usize, col: usize, value: f64) {
        self.row_indices.push(row);
        self.col_indices.push(col);
        self.values.push(value);
    }

    pub fn clear(&mut self) {
        self.row_indices.clear();
        self.col_indices.clear();
        self.values.clear();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Job {
    Initialize,
    AnalyzeFactorize,
    Solve,
    Terminate,
}

impl Job {
    /// Numeric job code of the protocol.
    pub fn code(&self) -> i32 {
        match self {
            Job::Initialize => -1,
            Job::AnalyzeFactorize => 4,
            Job::Solve => 3,
            Job::Terminate => -2,
        }
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Job::Initialize => "initialize",
            Job::AnalyzeFactorize => "analyze+factorize",
            Job::Solve => "solve",
            Job::Terminate => "terminate",
        };
        write!(f, "{name}")
    }
}

/// A job request together with the data it operates on.
#[derive(Debug)]
pub enum JobRequest<'a> {
    Initialize { control: &'a ControlOptions },
    AnalyzeFactorize { matrix: &'a SparseTripletsF64 },
    /// `rhs` is overwritten in place with the solution.
    Solve { rhs: &'a mut [f64] },
    Terminate,
}

impl JobRequest<'_> {
    pub fn job(&self) -> Job {
        match self {
            JobRequest::Initialize { .. } => Job::Initialize,
            JobRequest::AnalyzeFactorize { .. } => Job::AnalyzeFactorize,
            JobRequest::Solve { .. } => Job::Solve,
            JobRequest::Terminate => Job::Terminate,
        }
    }
}

/// Status returned by a job request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobStatus(pub i32);

impl JobStatus {
    pub const OK: JobStatus = JobStatus(0);
    /// The matrix has no entries.
    pub const EMPTY_MATRIX: JobStatus = JobStatus(-2);
    /// Job requested out of sequence (e.g. solve before factorize).
    pub const INVALID_JOB_SEQUENCE: JobStatus = JobStatus(-3);
    /// A row or column holds no entry at all.
    pub const STRUCTURALLY_SINGULAR: JobStatus = JobStatus(-6);
    /// Zero pivot, or a positive-definite factorization broke down.
    pub const NUMERICALLY_SINGULAR: JobStatus = JobStatus(-10);
    /// Factor storage would exceed the configured memory limit.
    pub const OUT_OF_MEMORY: JobStatus = JobStatus(-13);
    /// Matrix order is zero or the matrix is not square.
    pub const ORDER_OUT_OF_RANGE: JobStatus = JobStatus(-16);
    /// Index out of range, non-finite value or mismatched RHS length.
    pub const MALFORMED_INPUT: JobStatus = JobStatus(-22);

    pub fn is_failure(&self) -> bool {
        self.0 < 0
    }

    pub fn describe(&self) -> &'static str {
        describe_status(&self.0)
    }
}

pub fn describe_status(status: &i32) -> &'static str {
    match *status {
        0 => "success",
        -2 => "matrix has no entries",
        -3 => "invalid job sequence",
        -6 => "matrix is structurally singular",
        -10 => "matrix is numerically singular",
        -13 => "factorization exceeds memory limit",
        -16 => "matrix order out of range",
        -22 => "malformed input",
        s if s < 0 => "unrecoverable solver failure",
        _ => "completed with warnings",
    }
}

/// Input checks shared by every backend's analysis phase: order, finiteness,
/// index range, and at least one stored entry in every row and column.
pub fn check_triplets(matrix: &SparseTripletsF64) -> JobStatus {
    let n = matrix.nrows;
    if n == 0 || matrix.ncols != n {
        return JobStatus::ORDER_OUT_OF_RANGE;
    }
    if matrix.is_empty() {
        return JobStatus::EMPTY_MATRIX;
    }
    if matrix.row_indices.len() != matrix.nnz()
        || matrix.col_indices.len() != matrix.nnz()
        || matrix.values.iter().any(|v| !v.is_finite())
        || matrix.row_indices.iter().chain(&matrix.col_indices).any(|&i| i >= n)
    {
        return JobStatus::MALFORMED_INPUT;
    }

    let mut row_seen = vec![false; n];
    let mut col_seen = vec![false; n];
    for (&r, &c) in matrix.row_indices.iter().zip(&matrix.col_indices) {
        row_seen[r] = true;
        col_seen[c] = true;
    }
    if row_seen.iter().chain(&col_seen).any(|seen| !seen) {
        return JobStatus::STRUCTURALLY_SINGULAR;
    }
    JobStatus::OK
}

/// An opaque direct sparse solver instance.
///
/// Implementations own whatever internal allocations the factorization needs;
/// they are released by the terminate job. Callers never run jobs directly but
/// go through [`crate::session::SolverSession`], which enforces the sequence.
pub trait DirectBackend {
    /// Human-readable name of this backend.
    fn name(&self) -> &str;

    fn execute(&mut self, request: JobRequest<'_>) -> JobStatus;
}

impl<B: DirectBackend + ?Sized> DirectBackend for Box<B> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn execute(&mut self, request: JobRequest<'_>) -> JobStatus {
        (**self).execute(request)
    }
}
