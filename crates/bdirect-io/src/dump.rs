use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{IoError, Result};

pub const DUMP_SCHEMA_VERSION: u32 = 1;

/// Centralized triplet matrix exactly as it was handed to the direct solver.
///
/// Entries keep their assembly order; duplicate `(row, col)` pairs are not
/// merged.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MatrixDump {
    pub schema_version: u32,
    pub created: String,
    pub n_rows: usize,
    pub row_indices: Vec<usize>,
    pub col_indices: Vec<usize>,
    pub values: Vec<f64>,
}

impl MatrixDump {
    pub fn new(
        n_rows: usize,
        row_indices: Vec<usize>,
        col_indices: Vec<usize>,
        values: Vec<f64>,
    ) -> Self {
        Self {
            schema_version: DUMP_SCHEMA_VERSION,
            created: timestamp(),
            n_rows,
            row_indices,
            col_indices,
            values,
        }
    }

    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    /// Checks that the three triplet arrays agree in length and every index
    /// lies inside the declared order.
    pub fn validate(&self) -> Result<()> {
        if self.row_indices.len() != self.values.len()
            || self.col_indices.len() != self.values.len()
        {
            return Err(IoError::InvalidData(format!(
                "triplet arrays differ in length: {} rows, {} cols, {} values",
                self.row_indices.len(),
                self.col_indices.len(),
                self.values.len()
            )));
        }
        if let Some(bad) = self
            .row_indices
            .iter()
            .chain(self.col_indices.iter())
            .find(|&&idx| idx >= self.n_rows)
        {
            return Err(IoError::InvalidData(format!(
                "index {bad} out of range for order {}",
                self.n_rows
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RhsDump {
    pub schema_version: u32,
    pub created: String,
    pub values: Vec<f64>,
}

impl RhsDump {
    pub fn new(values: Vec<f64>) -> Self {
        Self {
            schema_version: DUMP_SCHEMA_VERSION,
            created: timestamp(),
            values,
        }
    }
}

fn timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

fn suffixed(prefix: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(prefix.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

/// `<prefix>_matrix.json`
pub fn matrix_dump_path(prefix: impl AsRef<Path>) -> PathBuf {
    suffixed(prefix.as_ref(), "_matrix.json")
}

/// `<prefix>_rhs.json`
pub fn rhs_dump_path(prefix: impl AsRef<Path>) -> PathBuf {
    suffixed(prefix.as_ref(), "_rhs.json")
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    let bytes = serde_json::to_vec_pretty(value)?;
    fs::write(path, bytes)?;
    Ok(())
}

pub fn save_matrix_dump(prefix: impl AsRef<Path>, dump: &MatrixDump) -> Result<PathBuf> {
    dump.validate()?;
    let path = matrix_dump_path(prefix);
    write_json(&path, dump)?;
    Ok(path)
}

pub fn load_matrix_dump(prefix: impl AsRef<Path>) -> Result<MatrixDump> {
    let bytes = fs::read(matrix_dump_path(prefix))?;
    let dump: MatrixDump = serde_json::from_slice(&bytes)?;
    dump.validate()?;
    Ok(dump)
}

pub fn save_rhs_dump(prefix: impl AsRef<Path>, dump: &RhsDump) -> Result<PathBuf> {
    let path = rhs_dump_path(prefix);
    write_json(&path, dump)?;
    Ok(path)
}

pub fn load_rhs_dump(prefix: impl AsRef<Path>) -> Result<RhsDump> {
    let bytes = fs::read(rhs_dump_path(prefix))?;
    Ok(serde_json::from_slice(&bytes)?)
}
