use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use pipelink_frame::Deadline;
use pipelink_transport::PipeEndpoint;
use serde_json::Value;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::{PeerError, Result};
use crate::outbound::{ConnectSettings, OutboundChannel};

/// Point-in-time pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub capacity: usize,
    /// Channels alive, borrowed or idle.
    pub live: usize,
    pub idle: usize,
    /// Channels created over the pool's lifetime.
    pub created: u64,
}

/// Bounded set of outbound channels to one endpoint.
///
/// At most `capacity` channels exist at once. A borrower takes an idle
/// channel, or creates one when none is idle, and waits for a returned
/// channel when the pool is at capacity. Channels that suffered a
/// connection-fatal fault or a timeout are discarded, never returned.
pub struct ChannelPool {
    endpoint: PipeEndpoint,
    settings: Arc<ConnectSettings>,
    capacity: usize,
    permits: Arc<Semaphore>,
    idle: Mutex<Vec<Arc<OutboundChannel>>>,
    live: AtomicUsize,
    created: AtomicU64,
    closed: AtomicBool,
}

impl ChannelPool {
    pub fn new(endpoint: PipeEndpoint, settings: Arc<ConnectSettings>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            endpoint,
            settings,
            capacity,
            permits: Arc::new(Semaphore::new(capacity)),
            idle: Mutex::new(Vec::with_capacity(capacity)),
            live: AtomicUsize::new(0),
            created: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    pub fn endpoint(&self) -> &PipeEndpoint {
        &self.endpoint
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            capacity: self.capacity,
            live: self.live.load(Ordering::Acquire),
            idle: self.idle_list().len(),
            created: self.created.load(Ordering::Acquire),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Borrow a connected channel, waiting up to `deadline` for capacity.
    pub async fn borrow(&self, deadline: Deadline) -> Result<PooledChannel<'_>> {
        let permit = deadline
            .run(Arc::clone(&self.permits).acquire_owned())
            .await
            .map_err(|elapsed| PeerError::Timeout(elapsed.0))?
            .map_err(|_| self.unavailable("pool closed"))?;
        if self.is_closed() {
            return Err(self.unavailable("pool closed"));
        }

        if let Some(channel) = self.take_idle() {
            return Ok(PooledChannel::new(self, channel, permit));
        }

        let id = self.created.fetch_add(1, Ordering::AcqRel) + 1;
        self.live.fetch_add(1, Ordering::AcqRel);
        let channel = OutboundChannel::new(id, self.endpoint.clone(), Arc::clone(&self.settings));
        let mut lease = PooledChannel::new(self, Arc::new(channel), permit);
        if let Err(err) = lease.channel().connect(deadline).await {
            tracing::debug!(endpoint = %self.endpoint, error = %err, "pool factory failed");
            lease.discard();
            return Err(err);
        }
        tracing::debug!(endpoint = %self.endpoint, channel = id, "pool created channel");
        Ok(lease)
    }

    /// Borrow, run one request, and return or discard the channel.
    ///
    /// The lease stays marked for discard while the call is in flight, so a
    /// caller that drops this future mid-call never hands a half-used
    /// channel to the next borrower.
    pub async fn request(&self, payload: &[u8], deadline: Deadline) -> Result<Option<Value>> {
        let mut lease = self.borrow(deadline).await?;
        lease.discard();
        let result = lease.channel().request(payload, deadline).await;
        match &result {
            Err(err) if err.is_connection_fatal() || err.is_timeout() => {}
            _ => lease.keep(),
        }
        result
    }

    /// Like [`ChannelPool::request`], discarding the reply value.
    pub async fn send(&self, payload: &[u8], deadline: Deadline) -> Result<()> {
        self.request(payload, deadline).await.map(|_| ())
    }

    /// Close idle channels and refuse further borrows. Borrowed channels are
    /// dropped when their lease ends; waiting borrowers fail immediately.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.permits.close();
        let drained: Vec<Arc<OutboundChannel>> = std::mem::take(&mut *self.idle_list());
        for channel in drained {
            channel.close().await;
            self.live.fetch_sub(1, Ordering::AcqRel);
        }
        tracing::debug!(endpoint = %self.endpoint, "pool closed");
    }

    fn take_idle(&self) -> Option<Arc<OutboundChannel>> {
        let mut idle = self.idle_list();
        while let Some(channel) = idle.pop() {
            if !channel.is_closed() {
                return Some(channel);
            }
            self.live.fetch_sub(1, Ordering::AcqRel);
        }
        None
    }

    fn give_back(&self, channel: Arc<OutboundChannel>, discard: bool) {
        if discard || channel.is_closed() || self.is_closed() {
            self.live.fetch_sub(1, Ordering::AcqRel);
            tracing::debug!(endpoint = %self.endpoint, channel = channel.id(), "pool discarded channel");
            return;
        }
        self.idle_list().push(channel);
    }

    fn idle_list(&self) -> MutexGuard<'_, Vec<Arc<OutboundChannel>>> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn unavailable(&self, reason: &str) -> PeerError {
        PeerError::ChannelUnavailable {
            endpoint: self.endpoint.instance_id(),
            reason: reason.to_string(),
        }
    }
}

impl std::fmt::Debug for ChannelPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelPool")
            .field("endpoint", &self.endpoint)
            .field("stats", &self.stats())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// A borrowed channel. Dropping the lease returns the channel to the pool,
/// or discards it when marked or closed.
pub struct PooledChannel<'a> {
    pool: &'a ChannelPool,
    channel: Arc<OutboundChannel>,
    discard: bool,
    _permit: OwnedSemaphorePermit,
}

impl<'a> PooledChannel<'a> {
    fn new(pool: &'a ChannelPool, channel: Arc<OutboundChannel>, permit: OwnedSemaphorePermit) -> Self {
        Self {
            pool,
            channel,
            discard: false,
            _permit: permit,
        }
    }

    pub fn channel(&self) -> &OutboundChannel {
        &self.channel
    }

    /// Do not return this channel to the pool.
    pub fn discard(&mut self) {
        self.discard = true;
    }

    fn keep(&mut self) {
        self.discard = false;
    }
}

impl std::fmt::Debug for PooledChannel<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledChannel")
            .field("endpoint", &self.pool.endpoint)
            .field("channel", &self.channel.id())
            .field("discard", &self.discard)
            .finish()
    }
}

impl Drop for PooledChannel<'_> {
    fn drop(&mut self) {
        self.pool.give_back(Arc::clone(&self.channel), self.discard);
    }
}
