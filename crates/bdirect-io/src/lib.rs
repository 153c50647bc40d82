//! File formats for the block direct-solver bridge.
//!
//! - **Dumps**: the centralized triplet matrix and right-hand side handed to
//!   the direct solver, written as `<prefix>_matrix.json` / `<prefix>_rhs.json`
//!   and reloadable bit-for-bit.
//! - **Cases**: JSON descriptions of partitioned block-coupled systems used by
//!   `bdirect-cli`.

pub mod case;
pub mod dump;
pub mod error;

pub use case::{
    BlockData, BoundaryCase, CaseFile, FaceCase, InterfaceCase, PartitionCase, VectorData,
    load_case, save_case,
};
pub use dump::{
    DUMP_SCHEMA_VERSION, MatrixDump, RhsDump, load_matrix_dump, load_rhs_dump, matrix_dump_path,
    rhs_dump_path, save_matrix_dump, save_rhs_dump,
};
pub use error::{IoError, Result};
