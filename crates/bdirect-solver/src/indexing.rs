//! Global numbering of block unknowns.
//!
//! Cell `c` of rank `r` owns the two consecutive global rows
//! `2 * (offset[r] + c)` and `2 * (offset[r] + c) + 1`, where `offset[r]` is
//! the number of cells on lower ranks. Concatenating the ranks' RHS buffers in
//! rank order therefore yields the centralized RHS in global row order.
//!
//! The strategy is chosen once from the run topology:
//! - [`SerialNumbering`]: one rank, global index == local index.
//! - [`ParallelNumbering`]: partition offsets from an all-gather of cell
//!   counts, plus the global cell number on the far side of every interface
//!   edge, obtained by swapping global cell numbers with each neighbour rank.

use std::collections::BTreeMap;
use std::ops::Range;

use crate::comm::{Collective, Communicator};
use crate::error::{Result, SolverError};
use crate::system::BlockSystem;

/// Scalar components per cell.
pub const BLOCK_SIZE: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topology {
    Serial,
    Parallel,
}

impl Topology {
    pub fn from_size(size: usize) -> Self {
        if size > 1 { Topology::Parallel } else { Topology::Serial }
    }
}

/// How the centralized system reaches the dump files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DumpHook {
    /// Local buffers already are the centralized system.
    Direct,
    /// Only the root holds the gathered system; the others wait for it.
    GatherThenWrite,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SerialNumbering {
    n_cells: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParallelNumbering {
    rank: usize,
    /// Prefix sums of cell counts, one entry per rank plus the total.
    offsets: Vec<usize>,
    /// Remote global cell for each interface edge, in edge order.
    interface_cells: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum IndexingStrategy {
    Serial(SerialNumbering),
    Parallel(ParallelNumbering),
}

/// Picks the numbering for `topology`. Collective for `Topology::Parallel`.
pub fn select_strategy<C: Communicator>(
    topology: Topology,
    system: &BlockSystem,
    comm: &C,
) -> Result<IndexingStrategy> {
    match topology {
        Topology::Serial => {
            if comm.size() != 1 {
                return Err(SolverError::Indexing(format!(
                    "serial numbering requested on a group of {} ranks",
                    comm.size()
                )));
            }
            if !system.interfaces().is_empty() {
                return Err(SolverError::Indexing(
                    "serial run cannot have inter-process interface edges".into(),
                ));
            }
            Ok(IndexingStrategy::Serial(SerialNumbering {
                n_cells: system.n_cells(),
            }))
        }
        Topology::Parallel => {
            ParallelNumbering::build(system, comm).map(IndexingStrategy::Parallel)
        }
    }
}

impl ParallelNumbering {
    fn build<C: Communicator>(system: &BlockSystem, comm: &C) -> Result<Self> {
        let rank = comm.rank();
        let counts = comm.all_gather_count(system.n_cells())?;
        let mut offsets = Vec::with_capacity(counts.len() + 1);
        offsets.push(0);
        for count in &counts {
            offsets.push(offsets[offsets.len() - 1] + count);
        }
        let my_offset = offsets[rank];

        // Interface edges grouped per neighbour, keeping face order.
        let mut by_neighbour: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for (edge, iface) in system.interfaces().iter().enumerate() {
            if iface.neighbour_rank >= comm.size() || iface.neighbour_rank == rank {
                return Err(SolverError::Indexing(format!(
                    "interface edge {edge} points at invalid rank {}",
                    iface.neighbour_rank
                )));
            }
            by_neighbour.entry(iface.neighbour_rank).or_default().push(edge);
        }

        let mut interface_cells = vec![0; system.interfaces().len()];
        for (&peer, edges) in &by_neighbour {
            let mine: Vec<usize> = edges
                .iter()
                .map(|&e| my_offset + system.interfaces()[e].cell)
                .collect();
            let theirs = comm.exchange_indices(peer, &mine)?;
            if theirs.len() != edges.len() {
                return Err(SolverError::Indexing(format!(
                    "rank {rank} has {} interface edges toward rank {peer}, which reports {}",
                    edges.len(),
                    theirs.len()
                )));
            }
            let peer_cells = offsets[peer]..offsets[peer + 1];
            for (&edge, remote) in edges.iter().zip(theirs) {
                if !peer_cells.contains(&remote) {
                    return Err(SolverError::Indexing(format!(
                        "rank {peer} sent global cell {remote} outside its range {peer_cells:?}"
                    )));
                }
                interface_cells[edge] = remote;
            }
        }

        Ok(Self {
            rank,
            offsets,
            interface_cells,
        })
    }

    pub fn offsets(&self) -> &[usize] {
        &self.offsets
    }
}

impl IndexingStrategy {
    pub fn topology(&self) -> Topology {
        match self {
            IndexingStrategy::Serial(_) => Topology::Serial,
            IndexingStrategy::Parallel(_) => Topology::Parallel,
        }
    }

    pub fn dump_hook(&self) -> DumpHook {
        match self {
            IndexingStrategy::Serial(_) => DumpHook::Direct,
            IndexingStrategy::Parallel(_) => DumpHook::GatherThenWrite,
        }
    }

    /// Cells of this rank's partition when the numbering was built.
    pub fn local_cells(&self) -> usize {
        match self {
            IndexingStrategy::Serial(s) => s.n_cells,
            IndexingStrategy::Parallel(p) => p.offsets[p.rank + 1] - p.offsets[p.rank],
        }
    }

    fn cell_offset(&self) -> usize {
        match self {
            IndexingStrategy::Serial(_) => 0,
            IndexingStrategy::Parallel(p) => p.offsets[p.rank],
        }
    }

    /// Total cells over all ranks.
    pub fn n_global_cells(&self) -> usize {
        match self {
            IndexingStrategy::Serial(s) => s.n_cells,
            IndexingStrategy::Parallel(p) => p.offsets.last().copied().unwrap_or(0),
        }
    }

    /// Order of the centralized matrix.
    pub fn n_global_rows(&self) -> usize {
        BLOCK_SIZE * self.n_global_cells()
    }

    /// Global rows owned by this rank.
    pub fn owned_rows(&self) -> Range<usize> {
        let start = BLOCK_SIZE * self.cell_offset();
        start..start + BLOCK_SIZE * self.local_cells()
    }

    /// Rows owned by every rank, in rank order.
    pub fn rows_per_rank(&self) -> Vec<usize> {
        match self {
            IndexingStrategy::Serial(s) => vec![BLOCK_SIZE * s.n_cells],
            IndexingStrategy::Parallel(p) => p
                .offsets
                .windows(2)
                .map(|w| BLOCK_SIZE * (w[1] - w[0]))
                .collect(),
        }
    }

    /// First global row of a local cell's block.
    pub fn cell_row(&self, cell: usize) -> Result<usize> {
        if cell >= self.local_cells() {
            return Err(SolverError::Indexing(format!(
                "cell {cell} out of range for a partition of {} cells",
                self.local_cells()
            )));
        }
        Ok(BLOCK_SIZE * (self.cell_offset() + cell))
    }

    /// First global rows of the owner and neighbour blocks of an interior face.
    pub fn face_rows(&self, system: &BlockSystem, face: usize) -> Result<(usize, usize)> {
        if face >= system.n_faces() {
            return Err(SolverError::Indexing(format!(
                "face {face} out of range for {} interior faces",
                system.n_faces()
            )));
        }
        let owner = self.cell_row(system.owner()[face])?;
        let neighbour = self.cell_row(system.neighbour()[face])?;
        Ok((owner, neighbour))
    }

    /// Local row and remote column of an interface edge.
    pub fn interface_rows(&self, system: &BlockSystem, edge: usize) -> Result<(usize, usize)> {
        match self {
            IndexingStrategy::Serial(_) => Err(SolverError::Indexing(
                "serial numbering has no interface edges".into(),
            )),
            IndexingStrategy::Parallel(p) => {
                let iface = system.interfaces().get(edge).ok_or_else(|| {
                    SolverError::Indexing(format!("interface edge {edge} does not exist"))
                })?;
                let remote = p.interface_cells.get(edge).copied().ok_or_else(|| {
                    SolverError::Indexing(format!("interface edge {edge} was not resolved"))
                })?;
                Ok((self.cell_row(iface.cell)?, BLOCK_SIZE * remote))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::{LocalComm, SerialComm};
    use crate::system::{Block, BlockVector, InterfaceEdge};
    use std::thread;

    fn cells(n: usize) -> BlockSystem {
        BlockSystem::new(vec![Block::identity(); n], vec![BlockVector::zeros(); n]).unwrap()
    }

    #[test]
    fn topology_follows_group_size() {
        assert_eq!(Topology::from_size(1), Topology::Serial);
        assert_eq!(Topology::from_size(4), Topology::Parallel);
    }

    #[test]
    fn serial_index_equals_local_index() {
        let system = cells(3)
            .with_symmetric_faces(vec![0, 1], vec![1, 2], vec![Block::identity(); 2])
            .unwrap();
        let strategy = select_strategy(Topology::Serial, &system, &SerialComm).unwrap();
        assert_eq!(strategy.cell_row(2).unwrap(), 4);
        assert_eq!(strategy.face_rows(&system, 1).unwrap(), (2, 4));
        assert_eq!(strategy.n_global_rows(), 6);
        assert_eq!(strategy.owned_rows(), 0..6);
        assert_eq!(strategy.local_cells(), 3);
        assert_eq!(strategy.dump_hook(), DumpHook::Direct);
        assert!(strategy.cell_row(3).is_err());
    }

    #[test]
    fn serial_rejects_interfaces() {
        let system = cells(1)
            .with_interfaces(vec![InterfaceEdge {
                cell: 0,
                neighbour_rank: 1,
                coeff: Block::identity(),
            }])
            .unwrap();
        assert!(select_strategy(Topology::Serial, &system, &SerialComm).is_err());
    }

    #[test]
    fn parallel_offsets_and_interface_columns() {
        // rank 0: 2 cells, rank 1: 3 cells; cell 1 of rank 0 touches cell 0 of rank 1
        let comms = LocalComm::group(2);
        let strategies: Vec<IndexingStrategy> = thread::scope(|scope| {
            let handles: Vec<_> = comms
                .into_iter()
                .map(|comm| {
                    scope.spawn(move || {
                        let (n, cell) = if comm.rank() == 0 { (2, 1) } else { (3, 0) };
                        let system = cells(n)
                            .with_interfaces(vec![InterfaceEdge {
                                cell,
                                neighbour_rank: 1 - comm.rank(),
                                coeff: Block::identity(),
                            }])
                            .unwrap();
                        let strategy = select_strategy(Topology::Parallel, &system, &comm).unwrap();
                        (strategy.interface_rows(&system, 0).unwrap(), strategy)
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|h| {
                    let (rows, strategy) = h.join().unwrap();
                    assert_eq!(strategy.topology(), Topology::Parallel);
                    if strategy.owned_rows().start == 0 {
                        assert_eq!(rows, (2, 4));
                    } else {
                        assert_eq!(rows, (4, 2));
                    }
                    strategy
                })
                .collect()
        });

        assert_eq!(strategies[0].owned_rows(), 0..4);
        assert_eq!(strategies[1].owned_rows(), 4..10);
        assert_eq!(strategies[1].cell_row(2).unwrap(), 8);
        assert_eq!(strategies[0].n_global_rows(), 10);
        assert_eq!(strategies[0].rows_per_rank(), vec![4, 6]);
        assert_eq!(strategies[1].dump_hook(), DumpHook::GatherThenWrite);
    }
}
