//! Awaitable result of a dial attempt.

use libp2p::PeerId;
use tokio::sync::watch;

use crate::registry::{ConnectionState, StateWatch};

/// Subscription to the outcome of one dial attempt
///
/// Every caller interested in the same attempt gets an equivalent outcome,
/// whether it started the dial or lost the race to do so.
#[derive(Debug)]
pub struct DialOutcome {
    peer_id: PeerId,
    attempt: u64,
    watch: Option<watch::Receiver<StateWatch>>,
}

impl DialOutcome {
    pub(crate) fn new(
        peer_id: PeerId,
        attempt: u64,
        watch: Option<watch::Receiver<StateWatch>>,
    ) -> Self {
        Self { peer_id, attempt, watch }
    }

    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    pub fn attempt(&self) -> u64 {
        self.attempt
    }

    /// Resolve once the attempt leaves `Dialing`, yielding the state it left to
    pub async fn wait(self) -> ConnectionState {
        let Some(mut watch) = self.watch else {
            return ConnectionState::Unknown;
        };
        let attempt = self.attempt;
        let settled = watch
            .wait_for(|w| w.attempt != attempt || w.state != ConnectionState::Dialing)
            .await
            .map(|w| w.state);
        settled.unwrap_or(ConnectionState::Unknown)
    }
}
