//! Error types for the solver bridge.

use bdirect_io::IoError;

use crate::backend::{Job, JobStatus, describe_status};
use crate::session::SessionState;

pub type Result<T> = std::result::Result<T, SolverError>;

/// Every failure here is fatal for the logical system: nothing is retried and
/// no partial solution is written back.
#[derive(Debug, thiserror::Error)]
pub enum SolverError {
    /// Missing or inconsistent settings, detected before any solver resource exists.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The block system itself is malformed (lengths, cell references).
    #[error("invalid block system: {0}")]
    InvalidSystem(String),

    /// The global numbering contract was violated.
    #[error("indexing error: {0}")]
    Indexing(String),

    #[error("assembly error: {0}")]
    Assembly(String),

    /// A job request returned a negative status.
    #[error("{job} job failed with status {status}: {}", describe_status(.status))]
    Job { job: Job, status: i32 },

    #[error("cannot run {job} job while the solver is {state}")]
    InvalidState { job: Job, state: SessionState },

    #[error("communication error on rank {rank}: {detail}")]
    Communication { rank: usize, detail: String },

    #[error("dump error: {0}")]
    Io(#[from] IoError),
}

impl SolverError {
    pub(crate) fn comm(rank: usize, detail: impl Into<String>) -> Self {
        SolverError::Communication {
            rank,
            detail: detail.into(),
        }
    }

    /// Status code to propagate to the other ranks when this error aborts a job.
    pub fn status_code(&self) -> i32 {
        match self {
            SolverError::Job { status, .. } => *status,
            SolverError::InvalidState { .. } => JobStatus::INVALID_JOB_SEQUENCE.0,
            _ => JobStatus::MALFORMED_INPUT.0,
        }
    }
}
