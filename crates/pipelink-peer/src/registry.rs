use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::broadcast;

use crate::events::{EventBus, PeerEvent};
use crate::identity::PeerIdentity;
use crate::inbound::InboundChannel;

/// A connected peer and its live inbound channels.
///
/// The channel list is copy-on-write: readers take a snapshot and never
/// block writers for longer than a pointer swap.
pub struct Client {
    peer: PeerIdentity,
    channels: RwLock<Arc<[Arc<InboundChannel>]>>,
}

impl Client {
    fn new(peer: PeerIdentity) -> Self {
        Self {
            peer,
            channels: RwLock::new(Arc::from(Vec::new())),
        }
    }

    pub fn peer(&self) -> &PeerIdentity {
        &self.peer
    }

    /// Snapshot of the live channels.
    pub fn channels(&self) -> Arc<[Arc<InboundChannel>]> {
        Arc::clone(&self.channels.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn channel_count(&self) -> usize {
        self.channels.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn push(&self, channel: Arc<InboundChannel>) {
        let mut guard = self.channels.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = guard.to_vec();
        next.push(channel);
        *guard = Arc::from(next);
    }

    /// Remove `channel`; returns the number of channels left, or `None`
    /// when it was not registered here.
    fn remove(&self, channel: &InboundChannel) -> Option<usize> {
        let mut guard = self.channels.write().unwrap_or_else(PoisonError::into_inner);
        let index = guard
            .iter()
            .position(|c| std::ptr::eq(Arc::as_ptr(c), channel))?;
        let mut next = guard.to_vec();
        next.remove(index);
        let left = next.len();
        *guard = Arc::from(next);
        Some(left)
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("peer", &self.peer.instance_id())
            .field("channels", &self.channel_count())
            .finish()
    }
}

/// Connected peers keyed by instance id (`pipe@host`).
///
/// Lock order is registry map first, then a client's channel list.
/// Events are published while the registry lock is held so subscribers see
/// connect and disconnect in the same order the map changed.
pub struct ClientRegistry {
    clients: RwLock<HashMap<String, Arc<Client>>>,
    events: EventBus,
}

impl ClientRegistry {
    pub fn new(events: EventBus) -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PeerEvent> {
        self.events.subscribe()
    }

    /// Register a new inbound channel for `peer`.
    ///
    /// `build` receives whether this is the peer's first live channel.
    pub(crate) fn register_with<F>(
        &self,
        peer: PeerIdentity,
        build: F,
    ) -> (Arc<Client>, Arc<InboundChannel>)
    where
        F: FnOnce(bool) -> Arc<InboundChannel>,
    {
        let key = peer.instance_id();
        let mut clients = self.write_clients();

        let (client, first) = match clients.get(&key) {
            Some(client) => (Arc::clone(client), false),
            None => {
                let client = Arc::new(Client::new(peer.clone()));
                clients.insert(key, Arc::clone(&client));
                (client, true)
            }
        };

        let channel = build(first);
        client.push(Arc::clone(&channel));

        self.events.publish(PeerEvent::ChannelConnected {
            peer: peer.clone(),
            channel_id: channel.id(),
        });
        if first {
            tracing::info!(peer = %peer, "peer connected");
            self.events.publish(PeerEvent::PeerConnected { peer });
        }
        (client, channel)
    }

    /// Remove `channel`. Returns the peer when this was its last channel.
    pub(crate) fn unregister(&self, channel: &InboundChannel) -> Option<PeerIdentity> {
        let peer = channel.peer();
        let key = peer.instance_id();
        let mut clients = self.write_clients();

        let client = clients.get(&key).cloned()?;
        let left = client.remove(channel)?;

        self.events.publish(PeerEvent::ChannelClosed {
            peer: peer.clone(),
            channel_id: channel.id(),
        });
        if left > 0 {
            return None;
        }

        clients.remove(&key);
        tracing::info!(peer = %peer, "peer disconnected");
        self.events.publish(PeerEvent::PeerDisconnected { peer: peer.clone() });
        Some(peer.clone())
    }

    pub fn get(&self, instance_id: &str) -> Option<Arc<Client>> {
        self.read_clients().get(instance_id).cloned()
    }

    /// Snapshot of every connected peer.
    pub fn clients(&self) -> Vec<Arc<Client>> {
        self.read_clients().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.read_clients().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read_clients().is_empty()
    }

    /// Ask every inbound channel to close. Channels unregister themselves
    /// as their receive loops exit.
    pub fn close_all(&self) {
        for client in self.clients() {
            for channel in client.channels().iter() {
                channel.close();
            }
        }
    }

    fn read_clients(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<Client>>> {
        self.clients.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_clients(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<Client>>> {
        self.clients.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for ClientRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientRegistry")
            .field("clients", &self.len())
            .finish()
    }
}
