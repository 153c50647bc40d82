//! Diagnostic dump of the centralized system.
//!
//! The files are written exactly as the solver receives the data: triplets in
//! centralized order with duplicates preserved, followed by the RHS. How the
//! data reaches the writer depends on the strategy's [`DumpHook`]:
//! `Direct` writes the local buffers, `GatherThenWrite` writes on the root and
//! then broadcasts the outcome so no rank moves on before the files exist.

use std::path::{Path, PathBuf};

use bdirect_io::{MatrixDump, RhsDump, save_matrix_dump, save_rhs_dump};
use tracing::debug;

use crate::backend::SparseTripletsF64;
use crate::comm::{Collective, Communicator};
use crate::config::SolverSettings;
use crate::error::{Result, SolverError};
use crate::indexing::DumpHook;

#[derive(Debug, Clone)]
pub struct Dumper {
    enabled: bool,
    prefix: PathBuf,
}

impl Dumper {
    pub fn new(enabled: bool, prefix: impl Into<PathBuf>) -> Self {
        Self {
            enabled,
            prefix: prefix.into(),
        }
    }

    pub fn from_settings(settings: &SolverSettings) -> Self {
        Self::new(settings.dump_complete_system, &settings.dump_file_prefix)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn prefix(&self) -> &Path {
        &self.prefix
    }

    /// Writes matrix and RHS. Collective for `GatherThenWrite`; a no-op when
    /// dumping is disabled. The data is `Some` wherever it was centralized.
    pub fn dump_centralized_system<C: Communicator>(
        &self,
        hook: DumpHook,
        matrix: Option<&SparseTripletsF64>,
        rhs: Option<&[f64]>,
        comm: &C,
    ) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        self.through_hook(hook, comm, || {
            let matrix = matrix.ok_or_else(|| missing("matrix"))?;
            let rhs = rhs.ok_or_else(|| missing("right-hand side"))?;
            self.write_matrix(matrix)?;
            self.write_rhs(rhs)
        })
    }

    /// Writes only the RHS, for solves that reuse an earlier factorization.
    pub fn dump_centralized_rhs<C: Communicator>(
        &self,
        hook: DumpHook,
        rhs: Option<&[f64]>,
        comm: &C,
    ) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        self.through_hook(hook, comm, || {
            self.write_rhs(rhs.ok_or_else(|| missing("right-hand side"))?)
        })
    }

    fn through_hook<C, F>(&self, hook: DumpHook, comm: &C, write: F) -> Result<()>
    where
        C: Communicator,
        F: FnOnce() -> Result<()>,
    {
        match hook {
            DumpHook::Direct => write(),
            DumpHook::GatherThenWrite => {
                if comm.is_root() {
                    let outcome = write();
                    let status = outcome.as_ref().err().map_or(0, SolverError::status_code);
                    comm.broadcast_status(Some(status))?;
                    outcome
                } else {
                    match comm.broadcast_status(None)? {
                        0 => Ok(()),
                        _ => Err(SolverError::comm(
                            comm.rank(),
                            "root failed to write the system dump",
                        )),
                    }
                }
            }
        }
    }

    fn write_matrix(&self, matrix: &SparseTripletsF64) -> Result<()> {
        let dump = MatrixDump::new(
            matrix.nrows,
            matrix.row_indices.clone(),
            matrix.col_indices.clone(),
            matrix.values.clone(),
        );
        let path = save_matrix_dump(&self.prefix, &dump)?;
        debug!(path = %path.display(), entries = dump.nnz(), "matrix dumped");
        Ok(())
    }

    fn write_rhs(&self, rhs: &[f64]) -> Result<()> {
        let path = save_rhs_dump(&self.prefix, &RhsDump::new(rhs.to_vec()))?;
        debug!(path = %path.display(), entries = rhs.len(), "rhs dumped");
        Ok(())
    }
}

fn missing(what: &str) -> SolverError {
    SolverError::Assembly(format!("no centralized {what} to dump on this rank"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::SerialComm;
    use bdirect_io::{load_matrix_dump, load_rhs_dump, matrix_dump_path};

    #[test]
    fn disabled_dumper_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path().join("sys");
        let dumper = Dumper::new(false, &prefix);
        dumper
            .dump_centralized_system(DumpHook::Direct, None, None, &SerialComm)
            .unwrap();
        assert!(!matrix_dump_path(&prefix).exists());
    }

    #[test]
    fn direct_hook_writes_matrix_and_rhs() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path().join("sys");
        let dumper = Dumper::new(true, &prefix);
        let mut matrix = SparseTripletsF64::new(2, 2);
        matrix.push(0, 0, 0.1);
        matrix.push(0, 0, 0.2);
        matrix.push(1, 1, 1.0 / 3.0);
        dumper
            .dump_centralized_system(
                DumpHook::Direct,
                Some(&matrix),
                Some(&[3.0, 5.0]),
                &SerialComm,
            )
            .unwrap();

        let reloaded = load_matrix_dump(&prefix).unwrap();
        assert_eq!(reloaded.row_indices, matrix.row_indices);
        assert_eq!(reloaded.values, matrix.values);
        assert_eq!(load_rhs_dump(&prefix).unwrap().values, vec![3.0, 5.0]);
    }

    #[test]
    fn rhs_only_dump_leaves_matrix_alone() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path().join("rhs_only");
        let dumper = Dumper::new(true, &prefix);
        dumper
            .dump_centralized_rhs(DumpHook::Direct, Some(&[1.5]), &SerialComm)
            .unwrap();
        assert!(!matrix_dump_path(&prefix).exists());
        assert_eq!(load_rhs_dump(&prefix).unwrap().values, vec![1.5]);
    }
}
