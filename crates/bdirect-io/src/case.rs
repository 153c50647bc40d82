//! Case files describing a partitioned block-coupled system.
//!
//! A case lists one entry per partition. Blocks are written row-major as
//! `[[a00, a01], [a10, a11]]`, vectors as `[c0, c1]`.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{IoError, Result};

pub type BlockData = [[f64; 2]; 2];
pub type VectorData = [f64; 2];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CaseFile {
    pub partitions: Vec<PartitionCase>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PartitionCase {
    pub diag: Vec<BlockData>,
    pub source: Vec<VectorData>,
    #[serde(default)]
    pub faces: Vec<FaceCase>,
    #[serde(default)]
    pub interfaces: Vec<InterfaceCase>,
    #[serde(default)]
    pub boundaries: Vec<BoundaryCase>,
    #[serde(default)]
    pub initial_solution: Option<Vec<VectorData>>,
}

/// Interior face between two cells of the same partition.
///
/// `upper` couples the owner row to the neighbour column. When `lower` is
/// absent the transpose of `upper` is used.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FaceCase {
    pub owner: usize,
    pub neighbour: usize,
    pub upper: BlockData,
    #[serde(default)]
    pub lower: Option<BlockData>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InterfaceCase {
    pub cell: usize,
    pub neighbour_rank: usize,
    pub coeff: BlockData,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BoundaryCase {
    pub cell: usize,
    pub internal_coeff: BlockData,
    pub boundary_source: VectorData,
}

impl CaseFile {
    pub fn validate(&self) -> Result<()> {
        if self.partitions.is_empty() {
            return Err(IoError::InvalidData("case has no partitions".into()));
        }
        for (rank, part) in self.partitions.iter().enumerate() {
            if part.diag.len() != part.source.len() {
                return Err(IoError::InvalidData(format!(
                    "partition {rank}: {} diagonal blocks but {} source entries",
                    part.diag.len(),
                    part.source.len()
                )));
            }
            if let Some(init) = &part.initial_solution
                && init.len() != part.diag.len()
            {
                return Err(IoError::InvalidData(format!(
                    "partition {rank}: initial solution has {} entries, expected {}",
                    init.len(),
                    part.diag.len()
                )));
            }
            for iface in &part.interfaces {
                if iface.neighbour_rank >= self.partitions.len() || iface.neighbour_rank == rank {
                    return Err(IoError::InvalidData(format!(
                        "partition {rank}: interface to invalid rank {}",
                        iface.neighbour_rank
                    )));
                }
            }
        }
        Ok(())
    }
}

pub fn load_case(path: impl AsRef<Path>) -> Result<CaseFile> {
    let bytes = fs::read(path)?;
    let case: CaseFile = serde_json::from_slice(&bytes)?;
    case.validate()?;
    Ok(case)
}

pub fn save_case(path: impl AsRef<Path>, case: &CaseFile) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(case)?;
    fs::write(path, bytes)?;
    Ok(())
}
