use tokio::sync::broadcast;

use crate::identity::PeerIdentity;

/// Default number of events buffered per subscriber.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Inbound lifecycle notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    /// An inbound channel finished its handshake.
    ChannelConnected { peer: PeerIdentity, channel_id: u64 },
    /// An inbound channel closed.
    ChannelClosed { peer: PeerIdentity, channel_id: u64 },
    /// The first channel of a peer connected.
    PeerConnected { peer: PeerIdentity },
    /// The last channel of a peer closed.
    PeerDisconnected { peer: PeerIdentity },
}

impl PeerEvent {
    pub fn peer(&self) -> &PeerIdentity {
        match self {
            PeerEvent::ChannelConnected { peer, .. }
            | PeerEvent::ChannelClosed { peer, .. }
            | PeerEvent::PeerConnected { peer }
            | PeerEvent::PeerDisconnected { peer } => peer,
        }
    }
}

/// Broadcast bus for [`PeerEvent`]s.
///
/// Publishing never blocks; slow subscribers observe `RecvError::Lagged`.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PeerEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PeerEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: PeerEvent) {
        tracing::debug!(peer = %event.peer().instance_id(), ?event, "peer event");
        // No subscribers is not an error.
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}
