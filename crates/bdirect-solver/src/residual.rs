//! Normalized residual over interior coefficients.
//!
//! For each component the residual is
//!
//! ```text
//!            Σ |b - A x|
//! r = ------------------------------------
//!     Σ (|A x - A x̄| + |b - A x̄|) + 1e-20
//! ```
//!
//! where `x̄` is the global average of `x` and both sums run over all ranks.
//! `A` is restricted to diagonal blocks and interior faces: boundary
//! contributions and interface couplings are left out, so the
//! value measures how well the direct solve satisfied the assembled interior
//! system.

use tracing::info;

use crate::comm::{Collective, Communicator};
use crate::error::{Result, SolverError};
use crate::system::{BlockSystem, BlockVector};

const SMALL: f64 = 1e-20;

/// Initial and final residual of the most recent solve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResidualPair {
    pub initial: BlockVector,
    pub final_residual: BlockVector,
}

impl Default for ResidualPair {
    fn default() -> Self {
        Self {
            initial: BlockVector::zeros(),
            final_residual: BlockVector::zeros(),
        }
    }
}

#[derive(Debug, Default)]
pub struct ResidualEvaluator {
    residuals: ResidualPair,
    print: bool,
}

impl ResidualEvaluator {
    pub fn new(print: bool) -> Self {
        Self {
            residuals: ResidualPair::default(),
            print,
        }
    }

    pub fn residuals(&self) -> ResidualPair {
        self.residuals
    }

    pub fn initial(&self) -> BlockVector {
        self.residuals.initial
    }

    pub fn final_residual(&self) -> BlockVector {
        self.residuals.final_residual
    }

    /// Residual of the system's current solution, stored as the initial one.
    pub fn evaluate_initial<C: Communicator>(
        &mut self,
        system: &BlockSystem,
        comm: &C,
    ) -> Result<BlockVector> {
        let r = compute_residual(system.solution(), system.source(), system, comm)?;
        self.residuals.initial = r;
        Ok(r)
    }

    /// Residual of the freshly written solution, stored as the final one.
    pub fn evaluate_final<C: Communicator>(
        &mut self,
        system: &BlockSystem,
        comm: &C,
    ) -> Result<BlockVector> {
        let r = compute_residual(system.solution(), system.source(), system, comm)?;
        self.residuals.final_residual = r;
        Ok(r)
    }

    /// Logs both residuals on the root when reporting is enabled and returns
    /// the pair that was logged.
    pub fn report<C: Communicator>(&self, comm: &C) -> Option<ResidualPair> {
        if !self.print || !comm.is_root() {
            return None;
        }
        let ResidualPair {
            initial,
            final_residual,
        } = self.residuals;
        info!(
            initial_0 = initial[0],
            initial_1 = initial[1],
            final_0 = final_residual[0],
            final_1 = final_residual[1],
            "direct solve residuals"
        );
        Some(self.residuals)
    }
}

/// Collective. Every rank passes its own partition.
pub fn compute_residual<C: Communicator>(
    x: &[BlockVector],
    b: &[BlockVector],
    system: &BlockSystem,
    comm: &C,
) -> Result<BlockVector> {
    let n = system.n_cells();
    if x.len() != n || b.len() != n {
        return Err(SolverError::InvalidSystem(format!(
            "residual needs {n} entries, got x: {}, b: {}",
            x.len(),
            b.len()
        )));
    }

    let local_sum = x.iter().fold(BlockVector::zeros(), |acc, xi| acc + xi);
    let totals = comm.all_reduce_sum(&[local_sum[0], local_sum[1], n as f64])?;
    let x_ref = if totals[2] > 0.0 {
        BlockVector::new(totals[0] / totals[2], totals[1] / totals[2])
    } else {
        BlockVector::zeros()
    };

    let ax = system.interior_product(x)?;
    let p_a = system.interior_product(&vec![x_ref; n])?;

    let mut residual = BlockVector::zeros();
    let mut normalization = BlockVector::zeros();
    for i in 0..n {
        residual += (b[i] - ax[i]).abs();
        normalization += (ax[i] - p_a[i]).abs() + (b[i] - p_a[i]).abs();
    }
    let sums = comm.all_reduce_sum(&[
        residual[0],
        residual[1],
        normalization[0],
        normalization[1],
    ])?;

    Ok(BlockVector::new(
        sums[0] / (sums[2] + SMALL),
        sums[1] / (sums[3] + SMALL),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::{LocalComm, SerialComm};
    use crate::system::{Block, BoundaryContribution};
    use std::thread;

    fn identity_cell(rhs: BlockVector) -> BlockSystem {
        BlockSystem::new(vec![Block::identity()], vec![rhs]).unwrap()
    }

    #[test]
    fn exact_solution_has_zero_residual() {
        let system = identity_cell(BlockVector::new(3.0, 5.0));
        let x = [BlockVector::new(3.0, 5.0)];
        let r = compute_residual(&x, system.source(), &system, &SerialComm).unwrap();
        assert!(r.norm() < 1e-14);
    }

    #[test]
    fn zero_guess_normalizes_to_one() {
        let system = identity_cell(BlockVector::new(3.0, 5.0));
        let r = compute_residual(system.solution(), system.source(), &system, &SerialComm).unwrap();
        assert!((r[0] - 1.0).abs() < 1e-12);
        assert!((r[1] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn boundary_contributions_are_ignored() {
        // interior: [2 0; 0 2] x = [2, 4]  =>  x = [1, 2]
        let mut system = BlockSystem::new(
            vec![Block::new(2.0, 0.0, 0.0, 2.0)],
            vec![BlockVector::new(2.0, 4.0)],
        )
        .unwrap()
        .with_boundaries(vec![BoundaryContribution {
            cell: 0,
            internal_coeff: Block::new(1e6, -3.0, 7.0, 1e6),
            boundary_source: BlockVector::new(-1e6, 1e6),
        }])
        .unwrap();
        system.set_solution(vec![BlockVector::new(1.0, 2.0)]).unwrap();

        let mut evaluator = ResidualEvaluator::new(false);
        let r = evaluator.evaluate_final(&system, &SerialComm).unwrap();
        assert!(r.norm() < 1e-14);
        assert_eq!(evaluator.final_residual(), r);
        assert_eq!(evaluator.initial(), BlockVector::zeros());
    }

    #[test]
    fn report_is_silent_when_disabled() {
        let system = identity_cell(BlockVector::new(3.0, 5.0));
        let mut evaluator = ResidualEvaluator::new(false);
        evaluator.evaluate_initial(&system, &SerialComm).unwrap();
        assert_eq!(evaluator.report(&SerialComm), None);

        let mut evaluator = ResidualEvaluator::new(true);
        evaluator.evaluate_initial(&system, &SerialComm).unwrap();
        let logged = evaluator.report(&SerialComm).expect("enabled on the root");
        assert_eq!(logged.initial, evaluator.initial());
    }

    #[test]
    fn report_comes_from_the_root_only() {
        let comms = LocalComm::group(2);
        let reports: Vec<Option<ResidualPair>> = thread::scope(|scope| {
            let handles: Vec<_> = comms
                .into_iter()
                .map(|comm| {
                    scope.spawn(move || {
                        let system = identity_cell(BlockVector::new(1.0, 2.0));
                        let mut evaluator = ResidualEvaluator::new(true);
                        evaluator.evaluate_initial(&system, &comm).unwrap();
                        evaluator.report(&comm)
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        let root = reports[0].expect("root logs the residuals");
        assert!((root.initial[0] - 1.0).abs() < 1e-12);
        assert_eq!(reports[1], None);
    }

    #[test]
    fn mismatched_lengths_are_rejected() {
        let system =
            BlockSystem::new(vec![Block::identity(); 2], vec![BlockVector::zeros(); 2]).unwrap();
        let err = compute_residual(&[BlockVector::zeros()], system.source(), &system, &SerialComm);
        assert!(matches!(err, Err(SolverError::InvalidSystem(_))));
    }
}
