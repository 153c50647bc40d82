//! The solver bridge seen by one rank.
//!
//! `SolverDriver` ties the pieces together for one logical block system:
//!
//! ```text
//! full_solve:                    solve_with_existing_factorization:
//!   reset buffers                  collect RHS
//!   assemble diag / faces / ifc    initial residual
//!   collect RHS                    centralize RHS (+ dump)
//!   initial residual               solve
//!   centralize (+ dump)            scatter solution, final residual
//!   factorize
//!   solve
//!   scatter solution, final residual
//! ```
//!
//! Every public pipeline method is collective. Only the root holds the
//! centralized buffers and the [`SolverSession`]; the job outcome is
//! broadcast so all ranks fail together with the root's status.

use tracing::{debug, info};

use crate::assembly::MatrixAssembler;
use crate::backend::{DirectBackend, Job, SparseTripletsF64, default_backend};
use crate::comm::Communicator;
use crate::config::SolverSettings;
use crate::distribution::DistributionCoordinator;
use crate::dump::Dumper;
use crate::error::{Result, SolverError};
use crate::indexing::{IndexingStrategy, Topology, select_strategy};
use crate::residual::{ResidualEvaluator, ResidualPair};
use crate::session::{SessionState, SolverSession};
use crate::system::{BlockSystem, BlockVector};

pub struct SolverDriver<C: Communicator, B: DirectBackend> {
    settings: SolverSettings,
    assembler: MatrixAssembler,
    distribution: DistributionCoordinator<C>,
    residuals: ResidualEvaluator,
    dumper: Dumper,
    /// Root only.
    session: Option<SolverSession<B>>,
    /// Centralized triplets, root only.
    matrix: Option<SparseTripletsF64>,
    /// Centralized RHS, overwritten with the solution by the solve job. Root only.
    rhs: Option<Vec<f64>>,
    /// Session state as agreed by all ranks.
    state: SessionState,
}

impl<C: Communicator> SolverDriver<C, Box<dyn DirectBackend>> {
    /// Driver over the default direct backend.
    pub fn with_default_backend(
        system: &BlockSystem,
        comm: C,
        settings: SolverSettings,
    ) -> Result<Self> {
        Self::new(system, comm, default_backend(), settings)
    }
}

impl<C: Communicator, B: DirectBackend> SolverDriver<C, B> {
    /// Validates the settings, builds the global numbering and opens the
    /// solver session on the root. `backend` is only used on the root.
    pub fn new(
        system: &BlockSystem,
        comm: C,
        backend: B,
        settings: SolverSettings,
    ) -> Result<Self> {
        settings.validate()?;

        let topology = Topology::from_size(comm.size());
        let strategy = select_strategy(topology, system, &comm)?;
        debug!(
            rank = comm.rank(),
            ?topology,
            global_rows = strategy.n_global_rows(),
            owned = ?strategy.owned_rows(),
            "global numbering ready"
        );
        let distribution = DistributionCoordinator::new(comm, topology, strategy.rows_per_rank())?;

        let (session, opened) = if distribution.is_root() {
            match SolverSession::open(backend, &settings.control) {
                Ok(session) => (Some(session), Ok(())),
                Err(err) => (None, Err(err)),
            }
        } else {
            (None, Ok(()))
        };
        distribution.agree(Job::Initialize, opened)?;

        Ok(Self {
            assembler: MatrixAssembler::new(strategy),
            distribution,
            residuals: ResidualEvaluator::new(settings.print_residuals),
            dumper: Dumper::from_settings(&settings),
            settings,
            session,
            matrix: None,
            rhs: None,
            state: SessionState::Ready,
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn settings(&self) -> &SolverSettings {
        &self.settings
    }

    pub fn strategy(&self) -> &IndexingStrategy {
        self.assembler.strategy()
    }

    pub fn comm(&self) -> &C {
        self.distribution.comm()
    }

    /// Centralized triplets of the last assembly; `None` off the root.
    pub fn centralized_matrix(&self) -> Option<&SparseTripletsF64> {
        self.matrix.as_ref()
    }

    pub fn initial_residual(&self) -> BlockVector {
        self.residuals.initial()
    }

    pub fn final_residual(&self) -> BlockVector {
        self.residuals.final_residual()
    }

    pub fn residuals(&self) -> ResidualPair {
        self.residuals.residuals()
    }

    /// Logs the residual pair on the root when `printResiduals` is set.
    pub fn print_residuals(&self) -> Option<ResidualPair> {
        self.residuals.report(self.distribution.comm())
    }

    /// Assembles, factorizes and solves from scratch, then writes the solution
    /// into `system`.
    pub fn full_solve(&mut self, system: &mut BlockSystem) -> Result<()> {
        self.require(Job::AnalyzeFactorize, &[SessionState::Ready, SessionState::Factorized])?;
        self.assemble(system)?;
        self.factorize()?;
        self.solve()?;
        self.scatter_solution(system)
    }

    /// Solves for the current source of `system` with the factors of the last
    /// [`full_solve`](Self::full_solve). The matrix must not have changed
    /// since then; that is not checked.
    pub fn solve_with_existing_factorization(&mut self, system: &mut BlockSystem) -> Result<()> {
        self.require(Job::Solve, &[SessionState::Factorized])?;
        let sized = self.check_cells(system);
        self.distribution.all_ok("right-hand side collection", sized)?;
        self.assembler.collect_rhs(system);
        self.residuals.evaluate_initial(system, self.distribution.comm())?;

        let local = std::mem::take(self.assembler.rhs_mut());
        let central = self.distribution.centralize_rhs(local);
        self.rhs = self.distribution.all_ok("centralization", central)?;
        self.dumper.dump_centralized_rhs(
            self.assembler.strategy().dump_hook(),
            self.rhs.as_deref(),
            self.distribution.comm(),
        )?;

        self.solve()?;
        self.scatter_solution(system)
    }

    /// Local assembly into fresh buffers, initial residual, centralization on
    /// the root and the optional dump.
    pub fn assemble(&mut self, system: &BlockSystem) -> Result<()> {
        self.assembler.reset();
        self.matrix = None;
        self.rhs = None;

        let assembled = self
            .check_cells(system)
            .and_then(|()| self.assembler.assemble_all(system));
        self.assembler.collect_rhs(system);
        self.distribution.all_ok("assembly", assembled)?;
        debug!(
            rank = self.distribution.comm().rank(),
            entries = self.assembler.triplets().nnz(),
            "local assembly complete"
        );

        self.residuals.evaluate_initial(system, self.distribution.comm())?;

        let local = self.assembler.take_triplets();
        let central = self.distribution.centralize_matrix(local);
        self.matrix = self.distribution.all_ok("centralization", central)?;
        let local_rhs = std::mem::take(self.assembler.rhs_mut());
        let central = self.distribution.centralize_rhs(local_rhs);
        self.rhs = self.distribution.all_ok("centralization", central)?;

        self.dumper.dump_centralized_system(
            self.assembler.strategy().dump_hook(),
            self.matrix.as_ref(),
            self.rhs.as_deref(),
            self.distribution.comm(),
        )
    }

    /// Analyze+factorize of the centralized triplets.
    pub fn factorize(&mut self) -> Result<()> {
        self.require(Job::AnalyzeFactorize, &[SessionState::Ready, SessionState::Factorized])?;
        let outcome = match self.session.as_mut() {
            Some(session) => match self.matrix.as_ref() {
                Some(matrix) => session.analyze_factorize(matrix),
                None => Err(SolverError::Assembly("no centralized matrix to factorize".into())),
            },
            None => Ok(()),
        };
        self.state = SessionState::Ready;
        self.distribution.agree(Job::AnalyzeFactorize, outcome)?;
        self.state = SessionState::Factorized;
        if let Some(matrix) = self.matrix.as_ref() {
            info!(order = matrix.nrows, entries = matrix.nnz(), "matrix factorized");
        }
        Ok(())
    }

    /// Overwrites the centralized RHS with the solution.
    pub fn solve(&mut self) -> Result<()> {
        self.require(Job::Solve, &[SessionState::Factorized])?;
        let outcome = match self.session.as_mut() {
            Some(session) => match self.rhs.as_mut() {
                Some(rhs) => session.solve(rhs),
                None => Err(SolverError::Assembly(
                    "no centralized right-hand side to solve".into(),
                )),
            },
            None => Ok(()),
        };
        self.distribution.agree(Job::Solve, outcome)
    }

    /// Hands each rank its slice of the solution, writes it into `system` and
    /// evaluates the final residual.
    pub fn scatter_solution(&mut self, system: &mut BlockSystem) -> Result<()> {
        let local = self.distribution.distribute_solution(self.rhs.take())?;
        self.distribution.scatter_solution(&local, system)?;
        *self.assembler.rhs_mut() = local;
        self.residuals.evaluate_final(system, self.distribution.comm())?;
        self.print_residuals();
        Ok(())
    }

    /// Runs the terminate job on the root and reports its outcome on every
    /// rank. Dropping the driver instead terminates without reporting.
    pub fn close(mut self) -> Result<()> {
        let outcome = match self.session.take() {
            Some(session) => session.close(),
            None => Ok(()),
        };
        self.state = SessionState::Terminated;
        self.distribution.agree(Job::Terminate, outcome)
    }

    /// The numbering only covers the partition the driver was built with.
    fn check_cells(&self, system: &BlockSystem) -> Result<()> {
        let expected = self.assembler.strategy().local_cells();
        if system.n_cells() != expected {
            return Err(SolverError::InvalidSystem(format!(
                "partition has {} cells, the global numbering was built for {expected}",
                system.n_cells()
            )));
        }
        Ok(())
    }

    fn require(&self, job: Job, allowed: &[SessionState]) -> Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(SolverError::InvalidState { job, state: self.state })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::SerialComm;
    use crate::session::tests::RecordingBackend;
    use crate::system::Block;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn identity_cell(rhs: [f64; 2]) -> BlockSystem {
        single_cell(Block::identity(), rhs)
    }

    fn single_cell(block: Block, rhs: [f64; 2]) -> BlockSystem {
        BlockSystem::new(vec![block], vec![BlockVector::new(rhs[0], rhs[1])]).unwrap()
    }

    fn default_driver(system: &BlockSystem) -> SolverDriver<SerialComm, Box<dyn DirectBackend>> {
        SolverDriver::with_default_backend(system, SerialComm, SolverSettings::default()).unwrap()
    }

    fn recording_driver(
        system: &BlockSystem,
    ) -> (SolverDriver<SerialComm, RecordingBackend>, Rc<RefCell<Vec<Job>>>) {
        let (backend, log) = RecordingBackend::new();
        let driver = SolverDriver::new(system, SerialComm, backend, SolverSettings::default());
        (driver.unwrap(), log)
    }

    #[test]
    fn single_identity_cell_round_trips() {
        let mut system = identity_cell([3.0, 5.0]);
        let mut driver = default_driver(&system);
        driver.full_solve(&mut system).unwrap();
        assert!((system.solution()[0][0] - 3.0).abs() < 1e-12);
        assert!((system.solution()[0][1] - 5.0).abs() < 1e-12);
        assert!(driver.final_residual().norm() < 1e-12);
        assert!((driver.initial_residual()[0] - 1.0).abs() < 1e-12);
        assert_eq!(driver.state(), SessionState::Factorized);
        assert_eq!(driver.print_residuals(), None);
    }

    #[test]
    fn residuals_are_reported_when_enabled() {
        let mut system = identity_cell([3.0, 5.0]);
        let settings = SolverSettings {
            print_residuals: true,
            ..Default::default()
        };
        let mut driver = SolverDriver::with_default_backend(&system, SerialComm, settings).unwrap();
        driver.full_solve(&mut system).unwrap();
        assert_eq!(driver.print_residuals(), Some(driver.residuals()));
    }

    #[test]
    fn reuse_before_factorization_is_rejected() {
        let mut system = identity_cell([1.0, 1.0]);
        let (mut driver, log) = recording_driver(&system);
        let err = driver
            .solve_with_existing_factorization(&mut system)
            .expect_err("nothing factorized");
        assert!(matches!(err, SolverError::InvalidState { job: Job::Solve, .. }));
        assert_eq!(system.solution()[0], BlockVector::zeros());
        drop(driver);
        assert_eq!(*log.borrow(), vec![Job::Initialize, Job::Terminate]);
    }

    #[test]
    fn invalid_settings_never_open_a_session() {
        let system = identity_cell([1.0, 1.0]);
        let (backend, log) = RecordingBackend::new();
        let settings = SolverSettings {
            dump_complete_system: true,
            dump_file_prefix: String::new(),
            ..Default::default()
        };
        let err = SolverDriver::new(&system, SerialComm, backend, settings)
            .err()
            .expect("empty prefix");
        assert!(matches!(err, SolverError::Config(_)));
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn singular_matrix_leaves_solution_untouched() {
        let mut system = single_cell(Block::new(1.0, 1.0, 1.0, 1.0), [1.0, 2.0]);
        let mut driver = default_driver(&system);
        let err = driver.full_solve(&mut system).expect_err("singular block");
        assert_eq!(err.status_code(), -10);
        assert_eq!(system.solution()[0], BlockVector::zeros());
        assert_eq!(driver.state(), SessionState::Ready);
    }

    #[test]
    fn resized_partition_is_rejected_before_any_job() {
        let system = identity_cell([1.0, 1.0]);
        let (mut driver, log) = recording_driver(&system);
        let mut larger =
            BlockSystem::new(vec![Block::identity(); 2], vec![BlockVector::zeros(); 2]).unwrap();
        let err = driver.full_solve(&mut larger).expect_err("numbering covers one cell");
        assert!(matches!(err, SolverError::InvalidSystem(_)));
        assert_eq!(driver.state(), SessionState::Ready);
        assert_eq!(*log.borrow(), vec![Job::Initialize]);
    }

    #[test]
    fn badly_scaled_block_is_not_singular() {
        // diag(1, 1e-15) is nonsingular; x = [1, 1]
        let mut system = single_cell(Block::new(1.0, 0.0, 0.0, 1e-15), [1.0, 1e-15]);
        let mut driver = default_driver(&system);
        driver.full_solve(&mut system).unwrap();
        assert!((system.solution()[0][0] - 1.0).abs() < 1e-12);
        assert!((system.solution()[0][1] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn close_terminates_once() {
        let mut system = identity_cell([2.0, 4.0]);
        let (mut driver, log) = recording_driver(&system);
        driver.full_solve(&mut system).unwrap();
        driver.solve_with_existing_factorization(&mut system).unwrap();
        driver.close().unwrap();
        assert_eq!(
            *log.borrow(),
            vec![Job::Initialize, Job::AnalyzeFactorize, Job::Solve, Job::Solve, Job::Terminate]
        );
    }
}
