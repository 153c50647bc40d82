//! [`Communicator`] over an MPI communicator, one rank per process.
//!
//! Each [`Message`] kind travels under its own tag, so `recv` matches the next
//! message from a rank and decodes it by tag. Indices are widened to `u64` on
//! the wire.
//!
//! ```ignore
//! let universe = mpi::initialize().expect("MPI already initialized");
//! let comm = MpiComm::new(universe.world());
//! let mut driver = SolverDriver::with_default_backend(&system, comm, settings)?;
//! ```

use mpi::point_to_point::{Destination, Source};
use mpi::topology::SimpleCommunicator;
use mpi::traits::Communicator as MpiCommunicator;

use crate::comm::{Communicator, Message};
use crate::error::{Result, SolverError};

const TAG_INDICES: i32 = 11;
const TAG_VALUES: i32 = 12;
const TAG_STATUS: i32 = 13;

fn tag_of(message: &Message) -> i32 {
    match message {
        Message::Indices(_) => TAG_INDICES,
        Message::Values(_) => TAG_VALUES,
        Message::Status(_) => TAG_STATUS,
    }
}

pub struct MpiComm {
    world: SimpleCommunicator,
}

impl MpiComm {
    pub fn new(world: SimpleCommunicator) -> Self {
        Self { world }
    }

    fn check_rank(&self, peer: usize) -> Result<i32> {
        if peer >= self.size() {
            return Err(SolverError::comm(
                self.rank(),
                format!("rank {peer} outside a group of {}", self.size()),
            ));
        }
        Ok(peer as i32)
    }
}

impl Communicator for MpiComm {
    fn rank(&self) -> usize {
        self.world.rank() as usize
    }

    fn size(&self) -> usize {
        self.world.size() as usize
    }

    fn send(&self, dest: usize, message: Message) -> Result<()> {
        let process = self.world.process_at_rank(self.check_rank(dest)?);
        let tag = tag_of(&message);
        match message {
            Message::Indices(indices) => {
                let wide: Vec<u64> = indices.iter().map(|&i| i as u64).collect();
                process.send_with_tag(&wide[..], tag);
            }
            Message::Values(values) => process.send_with_tag(&values[..], tag),
            Message::Status(status) => process.send_with_tag(&status, tag),
        }
        Ok(())
    }

    fn recv(&self, source: usize) -> Result<Message> {
        let process = self.world.process_at_rank(self.check_rank(source)?);
        let (incoming, status) = process.matched_probe();
        match status.tag() {
            TAG_INDICES => {
                let (wide, _) = incoming.matched_receive_vec::<u64>();
                Ok(Message::Indices(wide.into_iter().map(|i| i as usize).collect()))
            }
            TAG_VALUES => {
                let (values, _) = incoming.matched_receive_vec::<f64>();
                Ok(Message::Values(values))
            }
            TAG_STATUS => {
                let (status, _) = incoming.matched_receive::<i32>();
                Ok(Message::Status(status))
            }
            tag => {
                let _ = incoming.matched_receive_vec::<u8>();
                Err(SolverError::comm(
                    self.rank(),
                    format!("unexpected message tag {tag} from rank {source}"),
                ))
            }
        }
    }
}
