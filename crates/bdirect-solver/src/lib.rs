//! Bridge from a partitioned block-coupled finite-volume system to a
//! centralized direct sparse solver.
//!
//! Each rank owns one partition: a 2x2 diagonal block per cell, upper and
//! lower 2x2 blocks per interior face, optional couplings to cells on other
//! ranks, and a two-component source per cell. [`SolverDriver`] assembles
//! the partition into COO triplets under a global numbering, gathers them on
//! the root, drives the direct solver through its job protocol and scatters
//! the solution back.
//!
//! ```no_run
//! use bdirect_solver::{Block, BlockSystem, BlockVector, SerialComm, SolverDriver, SolverSettings};
//!
//! let mut system = BlockSystem::new(vec![Block::identity()], vec![BlockVector::new(3.0, 5.0)])?;
//! let settings = SolverSettings::default();
//! let mut driver = SolverDriver::with_default_backend(&system, SerialComm, settings)?;
//! driver.full_solve(&mut system)?;
//! assert_eq!(system.solution()[0], BlockVector::new(3.0, 5.0));
//! driver.close()?;
//! # Ok::<(), bdirect_solver::SolverError>(())
//! ```

pub mod assembly;
pub mod backend;
pub mod comm;
pub mod config;
pub mod distribution;
pub mod driver;
pub mod dump;
pub mod error;
pub mod indexing;
#[cfg(feature = "mpi")]
pub mod mpi_comm;
pub mod residual;
pub mod session;
pub mod system;

pub use assembly::MatrixAssembler;
#[cfg(feature = "sparse-lu")]
pub use backend::SparseLuBackend;
pub use backend::{
    DirectBackend, Job, JobRequest, JobStatus, NativeBackend, SparseTripletsF64, check_triplets,
    default_backend, describe_status,
};
pub use comm::{Collective, Communicator, LocalComm, Message, ROOT, SerialComm};
pub use config::{ControlOptions, MatrixSymmetry, SolverSettings};
pub use distribution::DistributionCoordinator;
pub use driver::SolverDriver;
pub use dump::Dumper;
pub use error::{Result, SolverError};
pub use indexing::{
    BLOCK_SIZE, DumpHook, IndexingStrategy, ParallelNumbering, SerialNumbering, Topology,
    select_strategy,
};
#[cfg(feature = "mpi")]
pub use mpi_comm::MpiComm;
pub use residual::{ResidualEvaluator, ResidualPair, compute_residual};
pub use session::{SessionState, SolverSession};
pub use system::{Block, BlockSystem, BlockVector, BoundaryContribution, InterfaceEdge};
