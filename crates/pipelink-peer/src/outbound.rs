use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use pipelink_frame::{
    Deadline, Envelope, FrameConfig, FrameError, FrameReader, FrameWriter, Timeout,
};
use pipelink_transport::{PipeEndpoint, PipeNamespace, PipeStream};
use serde_json::Value;
use tokio::io::{ReadHalf, WriteHalf};
use tokio::sync::{Mutex, MutexGuard};

use crate::error::{PeerError, Result};
use crate::handshake::handshake_client;
use crate::identity::ProcessIdentity;

const CLOSE_GRACE: Duration = Duration::from_millis(250);

/// Everything an outbound channel needs to open and authenticate a stream.
#[derive(Debug, Clone)]
pub struct ConnectSettings {
    pub namespace: PipeNamespace,
    pub identity: ProcessIdentity,
    /// Our own listening pipe, announced in the handshake.
    pub local_pipe: String,
    pub connect_timeout: Timeout,
    pub max_payload_size: usize,
    pub max_handshake_payload: usize,
}

struct Wire {
    reader: FrameReader<ReadHalf<PipeStream>>,
    writer: FrameWriter<WriteHalf<PipeStream>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    AwaitingReply,
}

enum ChannelState {
    Unconnected,
    Connected { wire: Wire, phase: Phase },
    Closed,
}

/// One logical connection to a remote endpoint.
///
/// Calls are serialised by an async mutex: one request is in flight per
/// channel and its reply is read before the next request is written. A call
/// whose future is dropped mid-flight leaves the channel `AwaitingReply`;
/// the next call finds it in that state and closes the channel.
pub struct OutboundChannel {
    id: u64,
    endpoint: PipeEndpoint,
    settings: Arc<ConnectSettings>,
    state: Mutex<ChannelState>,
    closed: AtomicBool,
}

impl OutboundChannel {
    pub fn new(id: u64, endpoint: PipeEndpoint, settings: Arc<ConnectSettings>) -> Self {
        Self {
            id,
            endpoint,
            settings,
            state: Mutex::new(ChannelState::Unconnected),
            closed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn endpoint(&self) -> &PipeEndpoint {
        &self.endpoint
    }

    /// Whether the channel was torn down. Closed channels are never reused.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Open the stream and run the handshake. A no-op when already connected.
    pub async fn connect(&self, deadline: Deadline) -> Result<()> {
        let mut state = self.lock(deadline).await?;
        match *state {
            ChannelState::Connected {
                phase: Phase::Idle, ..
            } => Ok(()),
            ChannelState::Connected {
                phase: Phase::AwaitingReply,
                ..
            } => {
                self.teardown(&mut state);
                Err(self.unavailable("previous call abandoned mid-flight"))
            }
            ChannelState::Closed => Err(self.unavailable("channel closed")),
            ChannelState::Unconnected => {
                let wire = self.establish(deadline).await?;
                *state = ChannelState::Connected {
                    wire,
                    phase: Phase::Idle,
                };
                Ok(())
            }
        }
    }

    /// Write one request and wait for its reply value.
    pub async fn request(&self, payload: &[u8], deadline: Deadline) -> Result<Option<Value>> {
        let envelope = self.call(payload, deadline).await?;
        Ok(envelope.into_result()?)
    }

    /// Write one request and wait for its acknowledgement, discarding the
    /// reply value.
    pub async fn send(&self, payload: &[u8], deadline: Deadline) -> Result<()> {
        self.request(payload, deadline).await.map(|_| ())
    }

    /// Close the channel, telling the peer with the close sentinel when the
    /// stream is idle.
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        if let ChannelState::Connected {
            wire,
            phase: Phase::Idle,
        } = &mut *state
        {
            let _ = wire.writer.write_close(Deadline::after(CLOSE_GRACE)).await;
        }
        self.teardown(&mut state);
    }

    async fn call(&self, payload: &[u8], deadline: Deadline) -> Result<Envelope> {
        let mut state = self.lock(deadline).await?;
        if matches!(*state, ChannelState::Unconnected) {
            let wire = self.establish(deadline).await?;
            *state = ChannelState::Connected {
                wire,
                phase: Phase::Idle,
            };
        }

        let outcome = match &mut *state {
            ChannelState::Connected {
                wire,
                phase: phase @ Phase::Idle,
            } => self.exchange(wire, phase, payload, deadline).await,
            ChannelState::Connected { .. } => {
                tracing::warn!(
                    endpoint = %self.endpoint,
                    channel = self.id,
                    "previous call abandoned mid-flight, closing channel"
                );
                Err(self.unavailable("previous call abandoned mid-flight"))
            }
            ChannelState::Closed | ChannelState::Unconnected => {
                Err(self.unavailable("channel closed"))
            }
        };

        if let Err(err) = &outcome {
            if err.is_connection_fatal() || err.is_timeout() {
                self.teardown(&mut state);
            }
        }
        outcome
    }

    /// Write the request and read one reply. A malformed reply is retried
    /// once on the same connection.
    async fn exchange(
        &self,
        wire: &mut Wire,
        phase: &mut Phase,
        payload: &[u8],
        deadline: Deadline,
    ) -> Result<Envelope> {
        let mut retried = false;
        loop {
            *phase = Phase::AwaitingReply;
            if let Err(err) = wire.writer.write_frame(payload, deadline).await {
                if !err.is_connection_fatal() && !err.is_timeout() {
                    // Rejected before anything hit the wire.
                    *phase = Phase::Idle;
                }
                return Err(self.classify(err));
            }

            let frame = wire
                .reader
                .read_frame(deadline)
                .await
                .map_err(|err| self.classify(err))?;
            *phase = Phase::Idle;

            match Envelope::decode(&frame) {
                Ok(envelope) => return Ok(envelope),
                Err(err) if !retried => {
                    tracing::debug!(
                        endpoint = %self.endpoint,
                        channel = self.id,
                        error = %err,
                        "malformed reply, retrying once"
                    );
                    retried = true;
                }
                Err(err) => return Err(PeerError::Protocol(err.to_string())),
            }
        }
    }

    async fn establish(&self, deadline: Deadline) -> Result<Wire> {
        let settings = &self.settings;
        let deadline = deadline.min(Deadline::new(settings.connect_timeout));

        let stream = deadline
            .run(settings.namespace.connect(&self.endpoint))
            .await
            .map_err(|elapsed| PeerError::Timeout(elapsed.0))?
            .map_err(|err| self.unavailable(err.to_string()))?;

        let config = FrameConfig {
            max_payload_size: settings.max_payload_size,
            ..FrameConfig::default()
        };
        let (read_half, write_half) = tokio::io::split(stream);
        let mut wire = Wire {
            reader: FrameReader::with_config(read_half, config.clone()),
            writer: FrameWriter::with_config(write_half, config),
        };

        // On failure `wire` is dropped here, closing the stream.
        handshake_client(
            &mut wire.reader,
            &mut wire.writer,
            self.endpoint.name(),
            &settings.identity,
            &settings.local_pipe,
            settings.max_handshake_payload,
            deadline,
        )
        .await?;

        tracing::debug!(endpoint = %self.endpoint, channel = self.id, "outbound channel connected");
        Ok(wire)
    }

    async fn lock(&self, deadline: Deadline) -> Result<MutexGuard<'_, ChannelState>> {
        deadline
            .run(self.state.lock())
            .await
            .map_err(|elapsed| PeerError::Timeout(elapsed.0))
    }

    fn teardown(&self, state: &mut ChannelState) {
        if !matches!(state, ChannelState::Closed) {
            tracing::debug!(endpoint = %self.endpoint, channel = self.id, "outbound channel closed");
        }
        *state = ChannelState::Closed;
        self.closed.store(true, Ordering::Release);
    }

    fn classify(&self, err: FrameError) -> PeerError {
        match err {
            FrameError::TimedOut(budget) => PeerError::Timeout(budget),
            err if err.is_connection_fatal() => self.unavailable(err.to_string()),
            err => PeerError::Frame(err),
        }
    }

    fn unavailable(&self, reason: impl Into<String>) -> PeerError {
        PeerError::ChannelUnavailable {
            endpoint: self.endpoint.instance_id(),
            reason: reason.into(),
        }
    }
}

impl std::fmt::Debug for OutboundChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboundChannel")
            .field("id", &self.id)
            .field("endpoint", &self.endpoint)
            .field("closed", &self.is_closed())
            .finish()
    }
}
