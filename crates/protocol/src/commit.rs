//! Consensus markers carried opaquely by the transport stage

use std::fmt;

/// Identifier of one replicated write, assigned by the consensus layer
///
/// The transport never interprets it beyond equality and ordering; it is
/// stamped on every request so the receiver can deduplicate and order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct CommitId {
    /// Times the source node has rebooted
    pub reboot_times: u32,
    /// Times the pipe task has restarted since the last reboot
    pub restart_times: u32,
    /// Position of the write in the replication stream
    pub replicate_index: u64,
}

impl CommitId {
    #[inline]
    pub const fn new(reboot_times: u32, restart_times: u32, replicate_index: u64) -> Self {
        Self {
            reboot_times,
            restart_times,
            replicate_index,
        }
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}-{}",
            self.reboot_times, self.restart_times, self.replicate_index
        )
    }
}

/// Replica set a transfer is scoped to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ConsensusGroupId(pub i32);

impl fmt::Display for ConsensusGroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "group:{}", self.0)
    }
}

/// Monotonically comparable replication progress marker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ProgressIndex(pub u64);

impl fmt::Display for ProgressIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
