//! Owned solver resource with a checked job sequence.
//!
//! ```text
//! Uninitialized ──open──▶ Ready ──analyze_factorize──▶ Factorized ──solve──▶ Factorized
//!                           │                              │
//!                           └────────── close/drop ────────┴──▶ Terminated
//! ```
//!
//! The terminate job runs exactly once: either through [`SolverSession::close`]
//! or, on every other exit path including unwinding, from `Drop`.

use std::fmt;

use tracing::{debug, warn};

use crate::backend::{DirectBackend, Job, JobRequest, JobStatus, SparseTripletsF64};
use crate::config::ControlOptions;
use crate::error::{Result, SolverError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Ready,
    Factorized,
    Terminated,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Uninitialized => "uninitialized",
            SessionState::Ready => "ready",
            SessionState::Factorized => "factorized",
            SessionState::Terminated => "terminated",
        };
        write!(f, "{name}")
    }
}

pub struct SolverSession<B: DirectBackend> {
    backend: B,
    state: SessionState,
}

impl<B: DirectBackend> SolverSession<B> {
    /// Runs the initialize job. If it fails no instance exists, so nothing is
    /// terminated afterwards.
    pub fn open(backend: B, control: &ControlOptions) -> Result<Self> {
        let mut session = Self {
            backend,
            state: SessionState::Uninitialized,
        };
        session.run(JobRequest::Initialize { control })?;
        session.state = SessionState::Ready;
        Ok(session)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Combined analysis and numerical factorization. Allowed again after a
    /// previous factorization; a failure leaves the session `Ready` with no
    /// usable factors.
    pub fn analyze_factorize(&mut self, matrix: &SparseTripletsF64) -> Result<()> {
        self.require(Job::AnalyzeFactorize, &[SessionState::Ready, SessionState::Factorized])?;
        self.state = SessionState::Ready;
        self.run(JobRequest::AnalyzeFactorize { matrix })?;
        self.state = SessionState::Factorized;
        Ok(())
    }

    /// Overwrites `rhs` with the solution. The factors are kept.
    pub fn solve(&mut self, rhs: &mut [f64]) -> Result<()> {
        self.require(Job::Solve, &[SessionState::Factorized])?;
        self.run(JobRequest::Solve { rhs })
    }

    /// Terminates now and reports the terminate status.
    pub fn close(mut self) -> Result<()> {
        self.terminate()
    }

    fn terminate(&mut self) -> Result<()> {
        match self.state {
            SessionState::Ready | SessionState::Factorized => {
                self.state = SessionState::Terminated;
                self.run(JobRequest::Terminate)
            }
            SessionState::Uninitialized | SessionState::Terminated => Ok(()),
        }
    }

    fn require(&self, job: Job, allowed: &[SessionState]) -> Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(SolverError::InvalidState {
                job,
                state: self.state,
            })
        }
    }

    fn run(&mut self, request: JobRequest<'_>) -> Result<()> {
        let job = request.job();
        let status = self.backend.execute(request);
        debug!(
            backend = self.backend.name(),
            %job,
            code = job.code(),
            status = status.0,
            "job finished"
        );
        if status.is_failure() {
            return Err(SolverError::Job { job, status: status.0 });
        }
        if status != JobStatus::OK {
            warn!(
                backend = self.backend.name(),
                %job,
                status = status.0,
                "job completed with warnings"
            );
        }
        Ok(())
    }
}

impl<B: DirectBackend> Drop for SolverSession<B> {
    fn drop(&mut self) {
        if let Err(err) = self.terminate() {
            warn!(backend = self.backend.name(), %err, "terminate job failed during drop");
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::backend::NativeBackend;
    use std::cell::RefCell;
    use std::rc::Rc;

    /// Native backend that logs every job it receives.
    pub(crate) struct RecordingBackend {
        inner: NativeBackend,
        pub(crate) log: Rc<RefCell<Vec<Job>>>,
        pub(crate) fail_on: Option<(Job, i32)>,
    }

    impl RecordingBackend {
        pub(crate) fn new() -> (Self, Rc<RefCell<Vec<Job>>>) {
            let log = Rc::new(RefCell::new(Vec::new()));
            let backend = Self {
                inner: NativeBackend::new(),
                log: Rc::clone(&log),
                fail_on: None,
            };
            (backend, log)
        }
    }

    impl DirectBackend for RecordingBackend {
        fn name(&self) -> &str {
            "recording"
        }

        fn execute(&mut self, request: JobRequest<'_>) -> JobStatus {
            let job = request.job();
            self.log.borrow_mut().push(job);
            match self.fail_on {
                Some((failing, status)) if failing == job => JobStatus(status),
                _ => self.inner.execute(request),
            }
        }
    }

    fn identity(n: usize) -> SparseTripletsF64 {
        let mut t = SparseTripletsF64::new(n, n);
        for i in 0..n {
            t.push(i, i, 1.0);
        }
        t
    }

    #[test]
    fn open_then_drop_terminates_once() {
        let (backend, log) = RecordingBackend::new();
        let session = SolverSession::open(backend, &ControlOptions::default()).unwrap();
        assert_eq!(session.state(), SessionState::Ready);
        drop(session);
        assert_eq!(*log.borrow(), vec![Job::Initialize, Job::Terminate]);
    }

    #[test]
    fn close_terminates_once_and_drop_does_not_repeat() {
        let (backend, log) = RecordingBackend::new();
        let mut session = SolverSession::open(backend, &ControlOptions::default()).unwrap();
        session.analyze_factorize(&identity(2)).unwrap();
        session.close().unwrap();
        let terminates = log.borrow().iter().filter(|&&j| j == Job::Terminate).count();
        assert_eq!(terminates, 1);
    }

    #[test]
    fn solve_before_factorize_is_rejected_without_a_job() {
        let (backend, log) = RecordingBackend::new();
        let mut session = SolverSession::open(backend, &ControlOptions::default()).unwrap();
        let mut rhs = vec![1.0, 2.0];
        let err = session.solve(&mut rhs).expect_err("not factorized yet");
        assert!(matches!(
            err,
            SolverError::InvalidState {
                job: Job::Solve,
                state: SessionState::Ready
            }
        ));
        assert_eq!(*log.borrow(), vec![Job::Initialize]);
    }

    #[test]
    fn repeated_solves_reuse_factorization() {
        let (backend, log) = RecordingBackend::new();
        let mut session = SolverSession::open(backend, &ControlOptions::default()).unwrap();
        session.analyze_factorize(&identity(2)).unwrap();
        let mut a = vec![3.0, 5.0];
        let mut b = vec![-1.0, 0.5];
        session.solve(&mut a).unwrap();
        session.solve(&mut b).unwrap();
        assert_eq!(a, vec![3.0, 5.0]);
        assert_eq!(b, vec![-1.0, 0.5]);
        assert_eq!(session.state(), SessionState::Factorized);
        let factorizations = log.borrow().iter().filter(|&&j| j == Job::AnalyzeFactorize).count();
        assert_eq!(factorizations, 1);
    }

    #[test]
    fn failed_factorization_reports_status_and_blocks_solve() {
        let (mut backend, log) = RecordingBackend::new();
        backend.fail_on = Some((Job::AnalyzeFactorize, -10));
        let mut session = SolverSession::open(backend, &ControlOptions::default()).unwrap();
        let err = session.analyze_factorize(&identity(2)).expect_err("forced failure");
        assert_eq!(err.status_code(), -10);
        assert_eq!(session.state(), SessionState::Ready);
        assert!(session.solve(&mut [0.0, 0.0]).is_err());
        drop(session);
        assert_eq!(log.borrow().last(), Some(&Job::Terminate));
    }

    #[test]
    fn failed_initialize_never_terminates() {
        let (mut backend, log) = RecordingBackend::new();
        backend.fail_on = Some((Job::Initialize, -13));
        let err = SolverSession::open(backend, &ControlOptions::default())
            .err()
            .expect("forced failure");
        assert!(matches!(err, SolverError::Job { job: Job::Initialize, status: -13 }));
        assert_eq!(*log.borrow(), vec![Job::Initialize]);
    }
}
