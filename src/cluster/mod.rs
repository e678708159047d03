//! Keeps the element stores of a master process and its slaves identical.
//!
//! Only the master touches files and runs extractions. Everything it
//! produces travels over a [`MulticastPipe`] as name frames, parameters and
//! geometry, and every slave rebuilds the same elements in the same order.

use serde::{Deserialize, Serialize};

mod pipe;
mod protocol;
mod replicator;

pub use pipe::{channel_group, ChannelPipe, ChannelStream, MulticastPipe, PipeError, StreamPipe};
pub use protocol::{read_name, write_end, write_name, ProtocolState};
pub use replicator::{ClusterReplicator, ReplayContext, ReplayOutcome, ReplicationError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Master,
    Slave,
}
