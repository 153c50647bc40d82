//! Centralizing local buffers on the root and handing the solution back.
//!
//! Every method here is collective: all ranks call them in the same order,
//! including ranks whose result is `None`.

use crate::backend::{Job, SparseTripletsF64};
use crate::comm::{Collective, Communicator, ROOT};
use crate::error::{Result, SolverError};
use crate::indexing::{BLOCK_SIZE, Topology};
use crate::system::{BlockSystem, BlockVector};

pub struct DistributionCoordinator<C: Communicator> {
    comm: C,
    topology: Topology,
    rows_per_rank: Vec<usize>,
}

impl<C: Communicator> DistributionCoordinator<C> {
    pub fn new(comm: C, topology: Topology, rows_per_rank: Vec<usize>) -> Result<Self> {
        if rows_per_rank.len() != comm.size() {
            return Err(SolverError::comm(
                comm.rank(),
                format!("{} row counts for a group of {} ranks", rows_per_rank.len(), comm.size()),
            ));
        }
        Ok(Self {
            comm,
            topology,
            rows_per_rank,
        })
    }

    pub fn comm(&self) -> &C {
        &self.comm
    }

    pub fn is_root(&self) -> bool {
        self.comm.is_root()
    }

    pub fn local_rows(&self) -> usize {
        self.rows_per_rank[self.comm.rank()]
    }

    /// Concatenates every rank's triplets on the root, in rank order.
    ///
    /// Only the root validates the gathered arrays; pass the result through
    /// [`all_ok`](Self::all_ok) before the next collective.
    pub fn centralize_matrix(&self, local: SparseTripletsF64) -> Result<Option<SparseTripletsF64>> {
        if self.topology == Topology::Serial {
            return Ok(Some(local));
        }
        let rows = self.comm.gather_indices(&local.row_indices)?;
        let cols = self.comm.gather_indices(&local.col_indices)?;
        let values = self.comm.gather_values(&local.values)?;
        let (Some(rows), Some(cols), Some(values)) = (rows, cols, values) else {
            return Ok(None);
        };

        let mut central = SparseTripletsF64::new(local.nrows, local.ncols);
        for ((r, c), v) in rows.into_iter().zip(cols).zip(values) {
            if r.len() != c.len() || r.len() != v.len() {
                return Err(SolverError::Assembly(format!(
                    "gathered triplet arrays differ in length: {} rows, {} cols, {} values",
                    r.len(),
                    c.len(),
                    v.len()
                )));
            }
            central.row_indices.extend(r);
            central.col_indices.extend(c);
            central.values.extend(v);
        }
        Ok(Some(central))
    }

    /// Concatenates every rank's RHS on the root. Rank order is global row order.
    /// Validated on the root only, like [`centralize_matrix`](Self::centralize_matrix).
    pub fn centralize_rhs(&self, local: Vec<f64>) -> Result<Option<Vec<f64>>> {
        if self.topology == Topology::Serial {
            return Ok(Some(local));
        }
        let Some(parts) = self.comm.gather_values(&local)? else {
            return Ok(None);
        };
        let central: Vec<f64> = parts.into_iter().flatten().collect();
        let expected: usize = self.rows_per_rank.iter().sum();
        if central.len() != expected {
            return Err(SolverError::Assembly(format!(
                "centralized RHS has {} entries, expected {expected}",
                central.len()
            )));
        }
        Ok(Some(central))
    }

    /// Splits the root's solution into per-rank slices; every rank gets its own.
    pub fn distribute_solution(&self, central: Option<Vec<f64>>) -> Result<Vec<f64>> {
        let local = match self.topology {
            Topology::Serial => central
                .ok_or_else(|| SolverError::comm(self.comm.rank(), "no solution to write back"))?,
            Topology::Parallel => {
                let parts = match central {
                    Some(mut solution) if self.is_root() => {
                        let mut parts = Vec::with_capacity(self.rows_per_rank.len());
                        for &rows in self.rows_per_rank.iter().rev() {
                            if rows > solution.len() {
                                return Err(SolverError::comm(
                                    ROOT,
                                    "solution shorter than the global row count",
                                ));
                            }
                            parts.push(solution.split_off(solution.len() - rows));
                        }
                        parts.reverse();
                        Some(parts)
                    }
                    _ => None,
                };
                self.comm.scatter_values(parts)?
            }
        };
        if local.len() != self.local_rows() {
            return Err(SolverError::comm(
                self.comm.rank(),
                format!(
                    "received {} solution entries, expected {}",
                    local.len(),
                    self.local_rows()
                ),
            ));
        }
        Ok(local)
    }

    /// Writes `solution(cell, component) = buffer[2 * cell + component]`.
    pub fn scatter_solution(&self, buffer: &[f64], system: &mut BlockSystem) -> Result<()> {
        if buffer.len() != BLOCK_SIZE * system.n_cells() {
            return Err(SolverError::InvalidSystem(format!(
                "solution buffer has {} entries for {} cells",
                buffer.len(),
                system.n_cells()
            )));
        }
        for (slot, pair) in system.solution_mut().iter_mut().zip(buffer.chunks_exact(BLOCK_SIZE)) {
            *slot = BlockVector::new(pair[0], pair[1]);
        }
        Ok(())
    }

    /// Makes the root's job outcome every rank's outcome. Other ranks pass
    /// `Ok(())`; they return `SolverError::Job` carrying the root's status.
    pub fn agree(&self, job: Job, outcome: Result<()>) -> Result<()> {
        let status = if self.is_root() {
            Some(outcome.as_ref().err().map_or(0, SolverError::status_code))
        } else {
            None
        };
        let status = self.comm.broadcast_status(status)?;
        if self.is_root() {
            outcome
        } else if status < 0 {
            Err(SolverError::Job { job, status })
        } else {
            Ok(())
        }
    }

    /// Fails on every rank when any rank failed a local step, so that no rank
    /// enters the next collective alone. Passes `outcome` through otherwise.
    pub fn all_ok<T>(&self, stage: &str, outcome: Result<T>) -> Result<T> {
        let flag = if outcome.is_err() { 1.0 } else { 0.0 };
        let failed = self.comm.all_reduce_sum(&[flag])?;
        let failed = failed.first().copied().unwrap_or(0.0);
        match outcome {
            Err(err) => Err(err),
            Ok(_) if failed > 0.0 => Err(SolverError::comm(
                self.comm.rank(),
                format!("{failed} rank(s) failed during {stage}"),
            )),
            Ok(value) => Ok(value),
        }
    }
}
