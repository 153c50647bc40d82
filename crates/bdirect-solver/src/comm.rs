//! Message passing between cooperating ranks.
//!
//! `Communicator` is the point-to-point primitive. Every blocking collective
//! the pipeline relies on lives in [`Collective`], so call sites state
//! explicitly where all ranks must meet. Collectives must be entered by every
//! rank in the same order; the root is always rank 0.
//!
//! Two communicators ship with the crate:
//! - [`SerialComm`]: a single rank, every collective is the identity.
//! - [`LocalComm`]: an in-memory group of ranks connected by channels, one
//!   per thread, used to run partitioned systems deterministically.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

use crate::error::{Result, SolverError};

/// Rank holding the centralized system and the solver resource.
pub const ROOT: usize = 0;

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Indices(Vec<usize>),
    Values(Vec<f64>),
    Status(i32),
}

impl Message {
    fn kind(&self) -> &'static str {
        match self {
            Message::Indices(_) => "indices",
            Message::Values(_) => "values",
            Message::Status(_) => "status",
        }
    }
}

pub trait Communicator {
    fn rank(&self) -> usize;
    fn size(&self) -> usize;
    fn send(&self, dest: usize, message: Message) -> Result<()>;
    /// Blocks until the next message from `source` arrives.
    fn recv(&self, source: usize) -> Result<Message>;

    fn is_root(&self) -> bool {
        self.rank() == ROOT
    }
}

/// Blocking collectives built on point-to-point messages.
pub trait Collective: Communicator {
    fn recv_indices(&self, source: usize) -> Result<Vec<usize>> {
        match self.recv(source)? {
            Message::Indices(v) => Ok(v),
            other => Err(unexpected(self.rank(), source, "indices", &other)),
        }
    }

    fn recv_values(&self, source: usize) -> Result<Vec<f64>> {
        match self.recv(source)? {
            Message::Values(v) => Ok(v),
            other => Err(unexpected(self.rank(), source, "values", &other)),
        }
    }

    fn recv_status(&self, source: usize) -> Result<i32> {
        match self.recv(source)? {
            Message::Status(s) => Ok(s),
            other => Err(unexpected(self.rank(), source, "status", &other)),
        }
    }

    /// Collects every rank's slice on the root, ordered by rank.
    fn gather_indices(&self, local: &[usize]) -> Result<Option<Vec<Vec<usize>>>> {
        if !self.is_root() {
            self.send(ROOT, Message::Indices(local.to_vec()))?;
            return Ok(None);
        }
        let mut parts = Vec::with_capacity(self.size());
        parts.push(local.to_vec());
        for source in 1..self.size() {
            parts.push(self.recv_indices(source)?);
        }
        Ok(Some(parts))
    }

    fn gather_values(&self, local: &[f64]) -> Result<Option<Vec<Vec<f64>>>> {
        if !self.is_root() {
            self.send(ROOT, Message::Values(local.to_vec()))?;
            return Ok(None);
        }
        let mut parts = Vec::with_capacity(self.size());
        parts.push(local.to_vec());
        for source in 1..self.size() {
            parts.push(self.recv_values(source)?);
        }
        Ok(Some(parts))
    }

    /// Root hands part `r` to rank `r`; every rank returns its own part.
    /// Non-root ranks pass `None`.
    fn scatter_values(&self, parts: Option<Vec<Vec<f64>>>) -> Result<Vec<f64>> {
        if !self.is_root() {
            return self.recv_values(ROOT);
        }
        let mut parts =
            parts.ok_or_else(|| SolverError::comm(self.rank(), "root scattered no data"))?;
        if parts.len() != self.size() {
            return Err(SolverError::comm(
                self.rank(),
                format!("scatter needs {} parts, got {}", self.size(), parts.len()),
            ));
        }
        let rest = parts.split_off(1);
        for (offset, part) in rest.into_iter().enumerate() {
            self.send(offset + 1, Message::Values(part))?;
        }
        Ok(parts.pop().unwrap_or_default())
    }

    /// Every rank learns every rank's count.
    fn all_gather_count(&self, count: usize) -> Result<Vec<usize>> {
        let gathered = self.gather_indices(&[count])?;
        let counts = match gathered {
            Some(parts) => {
                let counts: Vec<usize> = parts.into_iter().flatten().collect();
                for dest in 1..self.size() {
                    self.send(dest, Message::Indices(counts.clone()))?;
                }
                counts
            }
            None => self.recv_indices(ROOT)?,
        };
        if counts.len() != self.size() {
            return Err(SolverError::comm(
                self.rank(),
                format!("all-gather returned {} counts for {} ranks", counts.len(), self.size()),
            ));
        }
        Ok(counts)
    }

    /// Root's status reaches every rank. Non-root ranks pass `None`.
    fn broadcast_status(&self, status: Option<i32>) -> Result<i32> {
        if !self.is_root() {
            return self.recv_status(ROOT);
        }
        let status =
            status.ok_or_else(|| SolverError::comm(self.rank(), "root broadcast no status"))?;
        for dest in 1..self.size() {
            self.send(dest, Message::Status(status))?;
        }
        Ok(status)
    }

    /// Element-wise sum over all ranks, returned on every rank.
    fn all_reduce_sum(&self, local: &[f64]) -> Result<Vec<f64>> {
        let total = match self.gather_values(local)? {
            Some(parts) => {
                let mut total = vec![0.0; local.len()];
                for part in &parts {
                    if part.len() != total.len() {
                        return Err(SolverError::comm(
                            self.rank(),
                            format!("reduce length mismatch: {} vs {}", part.len(), total.len()),
                        ));
                    }
                    for (t, v) in total.iter_mut().zip(part) {
                        *t += v;
                    }
                }
                for dest in 1..self.size() {
                    self.send(dest, Message::Values(total.clone()))?;
                }
                total
            }
            None => self.recv_values(ROOT)?,
        };
        Ok(total)
    }

    /// Swaps index lists with `peer`; both sides must call.
    fn exchange_indices(&self, peer: usize, local: &[usize]) -> Result<Vec<usize>> {
        self.send(peer, Message::Indices(local.to_vec()))?;
        self.recv_indices(peer)
    }

    fn barrier(&self) -> Result<()> {
        let status = if self.is_root() { Some(0) } else { None };
        self.gather_indices(&[])?;
        self.broadcast_status(status)?;
        Ok(())
    }
}

impl<C: Communicator + ?Sized> Collective for C {}

fn unexpected(rank: usize, source: usize, wanted: &str, got: &Message) -> SolverError {
    SolverError::comm(
        rank,
        format!("expected {wanted} from rank {source}, received {}", got.kind()),
    )
}

/// Single-rank communicator.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialComm;

impl Communicator for SerialComm {
    fn rank(&self) -> usize {
        ROOT
    }

    fn size(&self) -> usize {
        1
    }

    fn send(&self, dest: usize, _message: Message) -> Result<()> {
        Err(SolverError::comm(ROOT, format!("serial run has no rank {dest}")))
    }

    fn recv(&self, source: usize) -> Result<Message> {
        Err(SolverError::comm(ROOT, format!("serial run has no rank {source}")))
    }
}

type Envelope = (usize, Message);

/// In-memory rank of a [`LocalComm::group`].
///
/// Messages from one source arrive in the order they were sent. A receive
/// that waits longer than the timeout fails instead of blocking forever, so
/// a rank that died surfaces as a communication error on its peers.
pub struct LocalComm {
    rank: usize,
    peers: Vec<Sender<Envelope>>,
    inbox: Receiver<Envelope>,
    pending: RefCell<VecDeque<Envelope>>,
    timeout: Duration,
}

impl LocalComm {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

    /// Creates `size` connected ranks; hand one to each thread.
    pub fn group(size: usize) -> Vec<LocalComm> {
        Self::group_with_timeout(size, Self::DEFAULT_TIMEOUT)
    }

    pub fn group_with_timeout(size: usize, timeout: Duration) -> Vec<LocalComm> {
        let (senders, receivers): (Vec<_>, Vec<_>) = (0..size).map(|_| mpsc::channel()).unzip();
        receivers
            .into_iter()
            .enumerate()
            .map(|(rank, inbox)| LocalComm {
                rank,
                peers: senders.clone(),
                inbox,
                pending: RefCell::new(VecDeque::new()),
                timeout,
            })
            .collect()
    }
}

impl Communicator for LocalComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.peers.len()
    }

    fn send(&self, dest: usize, message: Message) -> Result<()> {
        let peer = self.peers.get(dest).ok_or_else(|| {
            SolverError::comm(
                self.rank,
                format!("no rank {dest} in group of {}", self.size()),
            )
        })?;
        peer.send((self.rank, message))
            .map_err(|_| SolverError::comm(self.rank, format!("rank {dest} has shut down")))
    }

    fn recv(&self, source: usize) -> Result<Message> {
        if source >= self.size() {
            return Err(SolverError::comm(
                self.rank,
                format!("no rank {source} in group of {}", self.size()),
            ));
        }
        {
            let mut pending = self.pending.borrow_mut();
            if let Some(pos) = pending.iter().position(|(from, _)| *from == source) {
                if let Some((_, message)) = pending.remove(pos) {
                    return Ok(message);
                }
            }
        }
        loop {
            match self.inbox.recv_timeout(self.timeout) {
                Ok((from, message)) if from == source => return Ok(message),
                Ok(envelope) => self.pending.borrow_mut().push_back(envelope),
                Err(RecvTimeoutError::Timeout) => {
                    return Err(SolverError::comm(
                        self.rank,
                        format!("timed out waiting for rank {source}"),
                    ));
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(SolverError::comm(self.rank, "communicator group disconnected"));
                }
            }
        }
    }
}
