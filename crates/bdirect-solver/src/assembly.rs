//! Triplet assembly of the local block matrix.
//!
//! Every 2x2 block placed at global block origin `(r, c)` contributes the four
//! entries `(r + i, c + j, B[(i, j)])`. After a full assembly a rank holds
//! `4 * (cells + 2 * faces + interface_edges)` triplets: one block per cell,
//! two per interior face (owner row / neighbour column and the mirror), one
//! per interface edge. Entries are appended, never merged.

use crate::backend::SparseTripletsF64;
use crate::error::{Result, SolverError};
use crate::indexing::{BLOCK_SIZE, IndexingStrategy};
use crate::system::{Block, BlockSystem};

pub struct MatrixAssembler {
    strategy: IndexingStrategy,
    triplets: SparseTripletsF64,
    rhs: Vec<f64>,
}

impl MatrixAssembler {
    pub fn new(strategy: IndexingStrategy) -> Self {
        let n = strategy.n_global_rows();
        Self {
            strategy,
            triplets: SparseTripletsF64::new(n, n),
            rhs: Vec::new(),
        }
    }

    /// Triplet count of a full assembly of `system`.
    pub fn expected_len(system: &BlockSystem) -> usize {
        let blocks = system.n_cells() + 2 * system.n_faces() + system.interfaces().len();
        BLOCK_SIZE * BLOCK_SIZE * blocks
    }

    pub fn strategy(&self) -> &IndexingStrategy {
        &self.strategy
    }

    pub fn triplets(&self) -> &SparseTripletsF64 {
        &self.triplets
    }

    pub fn rhs(&self) -> &[f64] {
        &self.rhs
    }

    pub fn rhs_mut(&mut self) -> &mut Vec<f64> {
        &mut self.rhs
    }

    /// Empties the triplet and RHS buffers, keeping their capacity.
    pub fn reset(&mut self) {
        self.triplets.clear();
        self.rhs.clear();
    }

    /// Hands the assembled triplets over, leaving an empty buffer of the same order.
    pub fn take_triplets(&mut self) -> SparseTripletsF64 {
        let n = self.strategy.n_global_rows();
        std::mem::replace(&mut self.triplets, SparseTripletsF64::new(n, n))
    }

    pub fn append_entry(&mut self, row: usize, col: usize, value: f64) {
        self.triplets.push(row, col, value);
    }

    fn append_block(&mut self, row: usize, col: usize, block: &Block) -> Result<()> {
        let n = self.triplets.nrows;
        if row + BLOCK_SIZE > n || col + BLOCK_SIZE > n {
            return Err(SolverError::Assembly(format!(
                "block at ({row}, {col}) exceeds the global order {n}"
            )));
        }
        for i in 0..BLOCK_SIZE {
            for j in 0..BLOCK_SIZE {
                self.append_entry(row + i, col + j, block[(i, j)]);
            }
        }
        Ok(())
    }

    pub fn assemble_diagonal(&mut self, system: &BlockSystem) -> Result<()> {
        for (cell, block) in system.diag().iter().enumerate() {
            let row = self.strategy.cell_row(cell)?;
            self.append_block(row, row, block)?;
        }
        Ok(())
    }

    pub fn assemble_off_diagonal(&mut self, system: &BlockSystem) -> Result<()> {
        for face in 0..system.n_faces() {
            let (owner, neighbour) = self.strategy.face_rows(system, face)?;
            self.append_block(owner, neighbour, &system.upper()[face])?;
            self.append_block(neighbour, owner, &system.lower()[face])?;
        }
        Ok(())
    }

    /// Couplings to cells on other ranks: one block per interface edge, in
    /// this rank's rows.
    pub fn assemble_interfaces(&mut self, system: &BlockSystem) -> Result<()> {
        for (edge, iface) in system.interfaces().iter().enumerate() {
            let (row, col) = self.strategy.interface_rows(system, edge)?;
            self.append_block(row, col, &iface.coeff)?;
        }
        Ok(())
    }

    /// Copies the two-component source of every cell into the RHS buffer,
    /// `rhs[2 * cell + component]`.
    pub fn collect_rhs(&mut self, system: &BlockSystem) {
        self.rhs.clear();
        self.rhs.reserve(BLOCK_SIZE * system.n_cells());
        for b in system.source() {
            self.rhs.extend_from_slice(b.as_slice());
        }
    }

    /// Diagonal, interior faces and interface edges, in that order.
    pub fn assemble_all(&mut self, system: &BlockSystem) -> Result<()> {
        self.assemble_diagonal(system)?;
        self.assemble_off_diagonal(system)?;
        self.assemble_interfaces(system)?;
        let expected = Self::expected_len(system);
        if self.triplets.nnz() != expected {
            return Err(SolverError::Assembly(format!(
                "assembled {} triplets, expected {expected}",
                self.triplets.nnz()
            )));
        }
        Ok(())
    }
}
