//! Per-partition block-coupled linear system.
//!
//! Each cell carries a two-component unknown. The matrix is stored the way a
//! finite-volume discretization produces it: one 2x2 diagonal block per cell
//! and, for every interior face, an `upper` block (owner row, neighbour
//! column) and a `lower` block (neighbour row, owner column).

use bdirect_io::{BlockData, PartitionCase, VectorData};
use nalgebra::{Matrix2, Vector2};

use crate::error::{Result, SolverError};

pub type Block = Matrix2<f64>;
pub type BlockVector = Vector2<f64>;

/// Face shared with a cell owned by another rank.
///
/// `coeff` couples this cell's row to the remote cell's column. Interface
/// edges toward the same neighbour rank are listed in the same face order on
/// both sides.
#[derive(Debug, Clone, PartialEq)]
pub struct InterfaceEdge {
    pub cell: usize,
    pub neighbour_rank: usize,
    pub coeff: Block,
}

/// Boundary-condition contribution of one boundary face.
///
/// Carried for completeness of the discretized system. Neither the assembled
/// matrix nor the residual reads it.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundaryContribution {
    pub cell: usize,
    pub internal_coeff: Block,
    pub boundary_source: BlockVector,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BlockSystem {
    diag: Vec<Block>,
    upper: Vec<Block>,
    lower: Vec<Block>,
    owner: Vec<usize>,
    neighbour: Vec<usize>,
    source: Vec<BlockVector>,
    solution: Vec<BlockVector>,
    interfaces: Vec<InterfaceEdge>,
    boundaries: Vec<BoundaryContribution>,
}

impl BlockSystem {
    /// System with diagonal blocks only; the solution starts at zero.
    pub fn new(diag: Vec<Block>, source: Vec<BlockVector>) -> Result<Self> {
        if diag.len() != source.len() {
            return Err(SolverError::InvalidSystem(format!(
                "{} diagonal blocks but {} source entries",
                diag.len(),
                source.len()
            )));
        }
        let n_cells = diag.len();
        Ok(Self {
            diag,
            upper: Vec::new(),
            lower: Vec::new(),
            owner: Vec::new(),
            neighbour: Vec::new(),
            source,
            solution: vec![BlockVector::zeros(); n_cells],
            interfaces: Vec::new(),
            boundaries: Vec::new(),
        })
    }

    /// Adds interior faces with explicit upper and lower blocks.
    pub fn with_faces(
        mut self,
        owner: Vec<usize>,
        neighbour: Vec<usize>,
        upper: Vec<Block>,
        lower: Vec<Block>,
    ) -> Result<Self> {
        let n_faces = owner.len();
        if neighbour.len() != n_faces || upper.len() != n_faces || lower.len() != n_faces {
            return Err(SolverError::InvalidSystem(format!(
                "face arrays differ in length: owner {}, neighbour {}, upper {}, lower {}",
                n_faces,
                neighbour.len(),
                upper.len(),
                lower.len()
            )));
        }
        for (face, (&o, &n)) in owner.iter().zip(neighbour.iter()).enumerate() {
            if o >= self.n_cells() || n >= self.n_cells() || o == n {
                return Err(SolverError::InvalidSystem(format!(
                    "face {face} connects cells {o} and {n} in a partition of {} cells",
                    self.n_cells()
                )));
            }
        }
        self.owner = owner;
        self.neighbour = neighbour;
        self.upper = upper;
        self.lower = lower;
        Ok(self)
    }

    /// Adds interior faces whose lower blocks are the transposed upper blocks.
    pub fn with_symmetric_faces(
        self,
        owner: Vec<usize>,
        neighbour: Vec<usize>,
        upper: Vec<Block>,
    ) -> Result<Self> {
        let lower = upper.iter().map(|b| b.transpose()).collect();
        self.with_faces(owner, neighbour, upper, lower)
    }

    pub fn with_interfaces(mut self, interfaces: Vec<InterfaceEdge>) -> Result<Self> {
        if let Some(bad) = interfaces.iter().find(|e| e.cell >= self.n_cells()) {
            return Err(SolverError::InvalidSystem(format!(
                "interface edge references cell {} in a partition of {} cells",
                bad.cell,
                self.n_cells()
            )));
        }
        self.interfaces = interfaces;
        Ok(self)
    }

    pub fn with_boundaries(mut self, boundaries: Vec<BoundaryContribution>) -> Result<Self> {
        if let Some(bad) = boundaries.iter().find(|b| b.cell >= self.n_cells()) {
            return Err(SolverError::InvalidSystem(format!(
                "boundary contribution references cell {} in a partition of {} cells",
                bad.cell,
                self.n_cells()
            )));
        }
        self.boundaries = boundaries;
        Ok(self)
    }

    /// Builds the partition described by a case file entry.
    pub fn from_case(case: &PartitionCase) -> Result<Self> {
        let diag = case.diag.iter().map(block_from).collect();
        let source = case.source.iter().map(vector_from).collect();
        let mut system = BlockSystem::new(diag, source)?;

        let owner = case.faces.iter().map(|f| f.owner).collect();
        let neighbour = case.faces.iter().map(|f| f.neighbour).collect();
        let upper: Vec<Block> = case.faces.iter().map(|f| block_from(&f.upper)).collect();
        let lower = case
            .faces
            .iter()
            .zip(upper.iter())
            .map(|(f, u)| f.lower.as_ref().map(block_from).unwrap_or_else(|| u.transpose()))
            .collect();
        system = system.with_faces(owner, neighbour, upper, lower)?;

        let interfaces = case
            .interfaces
            .iter()
            .map(|i| InterfaceEdge {
                cell: i.cell,
                neighbour_rank: i.neighbour_rank,
                coeff: block_from(&i.coeff),
            })
            .collect();
        let boundaries = case
            .boundaries
            .iter()
            .map(|b| BoundaryContribution {
                cell: b.cell,
                internal_coeff: block_from(&b.internal_coeff),
                boundary_source: vector_from(&b.boundary_source),
            })
            .collect();
        system = system.with_interfaces(interfaces)?.with_boundaries(boundaries)?;

        if let Some(init) = &case.initial_solution {
            let init: Vec<BlockVector> = init.iter().map(vector_from).collect();
            system.set_solution(init)?;
        }
        Ok(system)
    }

    pub fn n_cells(&self) -> usize {
        self.diag.len()
    }

    /// Number of interior faces.
    pub fn n_faces(&self) -> usize {
        self.owner.len()
    }

    pub fn diag(&self) -> &[Block] {
        &self.diag
    }

    pub fn upper(&self) -> &[Block] {
        &self.upper
    }

    pub fn lower(&self) -> &[Block] {
        &self.lower
    }

    pub fn owner(&self) -> &[usize] {
        &self.owner
    }

    pub fn neighbour(&self) -> &[usize] {
        &self.neighbour
    }

    pub fn source(&self) -> &[BlockVector] {
        &self.source
    }

    pub fn solution(&self) -> &[BlockVector] {
        &self.solution
    }

    pub fn interfaces(&self) -> &[InterfaceEdge] {
        &self.interfaces
    }

    pub fn boundaries(&self) -> &[BoundaryContribution] {
        &self.boundaries
    }

    /// Replaces the right-hand side, leaving the matrix untouched.
    pub fn set_source(&mut self, source: Vec<BlockVector>) -> Result<()> {
        if source.len() != self.n_cells() {
            return Err(SolverError::InvalidSystem(format!(
                "source has {} entries, expected {}",
                source.len(),
                self.n_cells()
            )));
        }
        self.source = source;
        Ok(())
    }

    pub fn set_solution(&mut self, solution: Vec<BlockVector>) -> Result<()> {
        if solution.len() != self.n_cells() {
            return Err(SolverError::InvalidSystem(format!(
                "solution has {} entries, expected {}",
                solution.len(),
                self.n_cells()
            )));
        }
        self.solution = solution;
        Ok(())
    }

    pub(crate) fn solution_mut(&mut self) -> &mut [BlockVector] {
        &mut self.solution
    }

    /// `A x` restricted to diagonal blocks and interior faces. `x` needs one
    /// entry per cell.
    pub fn interior_product(&self, x: &[BlockVector]) -> Result<Vec<BlockVector>> {
        if x.len() != self.n_cells() {
            return Err(SolverError::InvalidSystem(format!(
                "product needs {} entries, got {}",
                self.n_cells(),
                x.len()
            )));
        }
        let mut ax: Vec<BlockVector> =
            self.diag.iter().zip(x.iter()).map(|(d, xi)| d * xi).collect();
        for face in 0..self.n_faces() {
            let o = self.owner[face];
            let n = self.neighbour[face];
            ax[o] += self.upper[face] * x[n];
            ax[n] += self.lower[face] * x[o];
        }
        Ok(ax)
    }
}

pub(crate) fn block_from(data: &BlockData) -> Block {
    Block::new(data[0][0], data[0][1], data[1][0], data[1][1])
}

pub(crate) fn vector_from(data: &VectorData) -> BlockVector {
    BlockVector::new(data[0], data[1])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain(n: usize) -> BlockSystem {
        let diag = vec![Block::new(4.0, 1.0, 0.5, 3.0); n];
        let source = (0..n).map(|i| BlockVector::new(i as f64, 1.0)).collect();
        let owner: Vec<usize> = (0..n - 1).collect();
        let neighbour: Vec<usize> = (1..n).collect();
        let upper = vec![Block::new(-1.0, 0.2, 0.0, -1.0); n - 1];
        BlockSystem::new(diag, source)
            .and_then(|s| s.with_symmetric_faces(owner, neighbour, upper))
            .expect("chain system should be valid")
    }

    #[test]
    fn symmetric_faces_store_transposed_lower() {
        let system = chain(3);
        assert_eq!(system.n_faces(), 2);
        assert_eq!(system.lower()[0], system.upper()[0].transpose());
    }

    #[test]
    fn rejects_face_to_missing_cell() {
        let err = BlockSystem::new(vec![Block::identity(); 2], vec![BlockVector::zeros(); 2])
            .and_then(|s| s.with_symmetric_faces(vec![0], vec![2], vec![Block::identity()]))
            .expect_err("cell 2 does not exist");
        assert!(matches!(err, SolverError::InvalidSystem(_)));
    }

    #[test]
    fn interior_product_matches_dense_multiply() {
        let system = chain(3);
        let x = vec![
            BlockVector::new(1.0, -1.0),
            BlockVector::new(0.5, 2.0),
            BlockVector::new(-3.0, 0.25),
        ];
        let ax = system.interior_product(&x).unwrap();

        let mut dense = nalgebra::DMatrix::<f64>::zeros(6, 6);
        for (i, d) in system.diag().iter().enumerate() {
            dense.fixed_view_mut::<2, 2>(2 * i, 2 * i).copy_from(d);
        }
        for f in 0..system.n_faces() {
            let (o, n) = (system.owner()[f], system.neighbour()[f]);
            dense.fixed_view_mut::<2, 2>(2 * o, 2 * n).copy_from(&system.upper()[f]);
            dense.fixed_view_mut::<2, 2>(2 * n, 2 * o).copy_from(&system.lower()[f]);
        }
        let flat = nalgebra::DVector::from_iterator(6, x.iter().flat_map(|v| [v[0], v[1]]));
        let expected = dense * flat;
        for i in 0..3 {
            assert!((ax[i][0] - expected[2 * i]).abs() < 1e-12);
            assert!((ax[i][1] - expected[2 * i + 1]).abs() < 1e-12);
        }
    }

    #[test]
    fn interior_product_rejects_short_vector() {
        let system = chain(3);
        let err = system
            .interior_product(&[BlockVector::zeros(); 2])
            .expect_err("one entry per cell");
        assert!(matches!(err, SolverError::InvalidSystem(_)));
    }

    #[test]
    fn from_case_reads_row_major_blocks() {
        let case: PartitionCase = serde_json::from_str(
            r#"{"diag": [[[1.0, 2.0], [3.0, 4.0]]], "source": [[5.0, 6.0]],
                "initialSolution": [[0.5, 0.5]]}"#,
        )
        .expect("partition should parse");
        let system = BlockSystem::from_case(&case).expect("system should build");
        assert_eq!(system.diag()[0][(0, 1)], 2.0);
        assert_eq!(system.diag()[0][(1, 0)], 3.0);
        assert_eq!(system.solution()[0], BlockVector::new(0.5, 0.5));
    }
}
