//! Shared helpers: in-memory rank groups and partitioned chain systems.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use bdirect_solver::{
    Block, BlockSystem, BlockVector, BoundaryContribution, Communicator, DirectBackend,
    InterfaceEdge, Job, JobRequest, JobStatus, LocalComm, NativeBackend, SolverDriver,
    SolverSettings,
};

/// Runs `f` once per rank of an in-memory group, each on its own thread, and
/// returns the results in rank order.
pub fn run_ranks<T, F>(size: usize, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(LocalComm) -> T + Sync,
{
    let comms = LocalComm::group_with_timeout(size, Duration::from_secs(20));
    thread::scope(|scope| {
        let handles: Vec<_> = comms
            .into_iter()
            .map(|comm| {
                let f = &f;
                scope.spawn(move || f(comm))
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().expect("rank thread panicked"))
            .collect()
    })
}

pub fn diag_block() -> Block {
    Block::new(4.0, 1.0, 0.5, 3.0)
}

pub fn upper_block() -> Block {
    Block::new(-1.0, 0.2, 0.0, -1.0)
}

pub fn lower_block() -> Block {
    Block::new(-0.5, 0.0, 0.1, -1.0)
}

pub fn source(global_cell: usize) -> BlockVector {
    BlockVector::new(global_cell as f64 + 1.0, 1.0 - 0.5 * global_cell as f64)
}

/// One partition of a 1-D chain whose cells are split over ranks by `counts`.
///
/// Faces inside a partition are interior faces; the face between the last
/// cell of rank `r` and the first cell of rank `r + 1` becomes one interface
/// edge on each side. The first global cell carries a boundary contribution
/// with nonsense coefficients.
pub fn chain_partition(counts: &[usize], rank: usize) -> BlockSystem {
    let offset: usize = counts[..rank].iter().sum();
    let n = counts[rank];

    let diag = vec![diag_block(); n];
    let src = (0..n).map(|c| source(offset + c)).collect();
    let owner: Vec<usize> = (0..n.saturating_sub(1)).collect();
    let neighbour: Vec<usize> = (1..n).collect();
    let faces = owner.len();

    let mut interfaces = Vec::new();
    if rank > 0 && n > 0 {
        interfaces.push(InterfaceEdge {
            cell: 0,
            neighbour_rank: rank - 1,
            coeff: lower_block(),
        });
    }
    if rank + 1 < counts.len() && n > 0 {
        interfaces.push(InterfaceEdge {
            cell: n - 1,
            neighbour_rank: rank + 1,
            coeff: upper_block(),
        });
    }

    let mut boundaries = Vec::new();
    if rank == 0 && n > 0 {
        boundaries.push(BoundaryContribution {
            cell: 0,
            internal_coeff: Block::new(1e8, -7.0, 3.0, -1e8),
            boundary_source: BlockVector::new(-1e9, 1e9),
        });
    }

    BlockSystem::new(diag, src)
        .and_then(|s| {
            let upper = vec![upper_block(); faces];
            let lower = vec![lower_block(); faces];
            s.with_faces(owner, neighbour, upper, lower)
        })
        .and_then(|s| s.with_interfaces(interfaces))
        .and_then(|s| s.with_boundaries(boundaries))
        .expect("chain partition should be valid")
}

/// The whole chain on a single rank.
pub fn chain(n: usize) -> BlockSystem {
    chain_partition(&[n], 0)
}

/// Driver over the default backend with default settings.
pub fn default_driver<C: Communicator>(
    system: &BlockSystem,
    comm: C,
) -> SolverDriver<C, Box<dyn DirectBackend>> {
    SolverDriver::with_default_backend(system, comm, SolverSettings::default())
        .expect("driver should open")
}

/// Native backend that records the jobs it receives.
pub struct RecordingBackend {
    inner: NativeBackend,
    pub log: Arc<Mutex<Vec<Job>>>,
}

impl RecordingBackend {
    pub fn new() -> (Self, Arc<Mutex<Vec<Job>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let backend = Self {
            inner: NativeBackend::new(),
            log: Arc::clone(&log),
        };
        (backend, log)
    }
}

impl DirectBackend for RecordingBackend {
    fn name(&self) -> &str {
        "recording"
    }

    fn execute(&mut self, request: JobRequest<'_>) -> JobStatus {
        self.log.lock().expect("job log poisoned").push(request.job());
        self.inner.execute(request)
    }
}

pub fn assert_close(a: BlockVector, b: BlockVector, tol: f64) {
    assert!(
        (a - b).amax() < tol,
        "expected {:?} and {:?} to agree within {}",
        a,
        b,
        tol
    );
}
