//! The leader-election collaborator, consumed through a narrow interface.
//!
//! The cluster needs exactly one node running the cross-node maintenance
//! tasks at a time. Which node that is gets decided by an arbiter; the
//! election mechanism itself is somebody else's problem - the event loop
//! only ever asks "who is the arbiter" and, when consensus looks broken,
//! "try to establish a new one".

use thiserror::Error;
use vecmesh_core::Addr;

/// Arbiter consultation failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ArbiterError {
    /// No consensus could be obtained; the guarded task skips this
    /// iteration.
    #[error("arbiter consensus unavailable")]
    ConsensusUnavailable,

    /// The arbiter service could not be reached.
    #[error("arbiter transport error: {0}")]
    Transport(String),
}

/// The narrow interface the event loop consumes.
#[tonic::async_trait]
pub trait ArbiterClient: Send + Sync {
    /// The currently elected arbiter address.
    async fn arbiter(&self) -> Result<Addr, ArbiterError>;

    /// Attempts to force a fresh election, retrying up to `retries` times.
    /// Returns true when consensus was (re-)established.
    async fn try_force_new_arbiter(&self, retries: u32) -> bool;
}

/// Deterministic arbiter used by the bootstrap and the test harness: the
/// lowest address in the member list wins. Always in consensus.
#[derive(Debug, Clone)]
pub struct StaticArbiter {
    members: Vec<Addr>,
}

impl StaticArbiter {
    pub fn new(mut members: Vec<Addr>) -> Self {
        members.sort();
        Self { members }
    }
}

#[tonic::async_trait]
impl ArbiterClient for StaticArbiter {
    async fn arbiter(&self) -> Result<Addr, ArbiterError> {
        self.members
            .first()
            .cloned()
            .ok_or(ArbiterError::ConsensusUnavailable)
    }

    async fn try_force_new_arbiter(&self, _retries: u32) -> bool {
        !self.members.is_empty()
    }
}

// =============================================================================
// Tests
// =============================================================================
