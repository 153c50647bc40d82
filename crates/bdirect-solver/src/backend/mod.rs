//! Direct-solver backend layer.
//!
//! The driver talks to the direct solver only through the job protocol in
//! [`traits`]: initialize, analyze+factorize, solve, terminate. The solver
//! itself is opaque; any library that can be driven by that sequence can sit
//! behind [`DirectBackend`].
//!
//! # Backends
//!
//! - **Sparse LU** (default, `--features sparse-lu`): faer's sparse LU. Pure
//!   Rust, factor storage proportional to the fill.
//! - **Native**: dense LU / Cholesky through nalgebra, with duplicate
//!   triplets summed by nalgebra-sparse. The fallback when `sparse-lu` is
//!   disabled; suitable for a few thousand unknowns.
//!
//! # Architecture
//!
//! ```text
//! BlockSystem (2x2 blocks per cell and face)
//!         │
//!         ▼
//! MatrixAssembler (COO triplets + RHS, global numbering)
//!         │
//!         ▼
//! DistributionCoordinator (gather on root)
//!         │
//!         ▼
//! SolverSession ── job protocol ──▶ DirectBackend
//!                                    ┌────┴────┐
//!                                    ▼         ▼
//!                                 Sparse LU  Native
//! ```

pub mod native;
#[cfg(feature = "sparse-lu")]
pub mod sparse;
pub mod traits;

pub use native::NativeBackend;
#[cfg(feature = "sparse-lu")]
pub use sparse::SparseLuBackend;
pub use traits::*;

/// Returns the default direct backend based on enabled features.
///
/// With `sparse-lu` (the default): returns `SparseLuBackend`.
/// Without: returns `NativeBackend`.
pub fn default_backend() -> Box<dyn DirectBackend> {
    #[cfg(feature = "sparse-lu")]
    {
        Box::new(SparseLuBackend::new())
    }
    #[cfg(not(feature = "sparse-lu"))]
    {
        Box::new(NativeBackend::new())
    }
}
