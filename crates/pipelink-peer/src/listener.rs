use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use pipelink_frame::{Deadline, FrameConfig, FrameReader, FrameWriter, Timeout};
use pipelink_transport::{PipeListener, PipeStream};
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::ListenerScheduling;
use crate::error::{PeerError, Result};
use crate::handshake::handshake_server;
use crate::inbound::{InboundChannel, InboundShared, InboundTimeouts};

const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Observable accept loop state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Idle,
    WaitingForConnection,
    Handshaking,
    /// The last connection was handed to its receive loop.
    Dispatched,
    Stopped,
}

/// Settings applied to every accepted connection.
#[derive(Debug, Clone)]
pub(crate) struct ListenerSettings {
    pub pipe_name: String,
    pub connect_timeout: Timeout,
    pub max_payload_size: usize,
    pub max_handshake_payload: usize,
    pub timeouts: InboundTimeouts,
}

struct AcceptLoop {
    listener: PipeListener,
    settings: ListenerSettings,
    shared: Arc<InboundShared>,
    permits: Arc<Semaphore>,
    shutdown: CancellationToken,
    state: watch::Sender<ListenerState>,
    next_channel_id: AtomicU64,
}

enum Join {
    Task(JoinHandle<()>),
    Thread(std::thread::JoinHandle<()>),
}

/// Handle to a running accept loop.
pub struct ListenerHandle {
    state: watch::Receiver<ListenerState>,
    shutdown: CancellationToken,
    join: Option<Join>,
}

impl ListenerHandle {
    pub fn state(&self) -> ListenerState {
        *self.state.borrow()
    }

    /// Subscribe to state changes.
    pub fn watch_state(&self) -> watch::Receiver<ListenerState> {
        self.state.clone()
    }

    /// Stop accepting. Inbound channels stop with it.
    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    /// Stop and wait for the accept loop to exit.
    pub async fn join(mut self) {
        self.stop();
        match self.join.take() {
            Some(Join::Task(task)) => {
                let _ = task.await;
            }
            Some(Join::Thread(thread)) => {
                let _ = tokio::task::spawn_blocking(move || thread.join()).await;
            }
            None => {}
        }
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl std::fmt::Debug for ListenerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerHandle")
            .field("state", &self.state())
            .finish()
    }
}

/// Start the accept loop for `listener`.
///
/// Must be called from within a Tokio runtime. `Dedicated` scheduling needs
/// a multi-threaded runtime: its thread only blocks on the runtime handle.
pub(crate) fn spawn_listener(
    listener: PipeListener,
    settings: ListenerSettings,
    shared: Arc<InboundShared>,
    max_inbound_connections: usize,
    scheduling: ListenerScheduling,
    shutdown: CancellationToken,
) -> Result<ListenerHandle> {
    let handle = tokio::runtime::Handle::try_current()
        .map_err(|_| PeerError::InvalidConfig("listener requires a Tokio runtime".into()))?;

    let (state_tx, state_rx) = watch::channel(ListenerState::Idle);
    let pipe_name = settings.pipe_name.clone();
    let accept = AcceptLoop {
        listener,
        settings,
        shared,
        permits: Arc::new(Semaphore::new(max_inbound_connections)),
        shutdown: shutdown.clone(),
        state: state_tx,
        next_channel_id: AtomicU64::new(1),
    };

    let join = match scheduling {
        ListenerScheduling::Shared => Join::Task(handle.spawn(accept.run())),
        ListenerScheduling::Dedicated => {
            let thread = std::thread::Builder::new()
                .name(format!("pipelink-listen-{pipe_name}"))
                .spawn(move || handle.block_on(accept.run()))
                .map_err(pipelink_transport::TransportError::Io)?;
            Join::Thread(thread)
        }
    };

    tracing::info!(pipe = %pipe_name, ?scheduling, "listening");
    Ok(ListenerHandle {
        state: state_rx,
        shutdown,
        join: Some(join),
    })
}

impl AcceptLoop {
    async fn run(self) {
        loop {
            self.state.send_replace(ListenerState::WaitingForConnection);

            let permit = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                permit = Arc::clone(&self.permits).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let accepted = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                accepted = self.listener.accept() => accepted,
            };
            let stream = match accepted {
                Ok(stream) => stream,
                Err(err) => {
                    tracing::warn!(pipe = %self.settings.pipe_name, error = %err, "accept failed");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                    continue;
                }
            };

            self.state.send_replace(ListenerState::Handshaking);
            match self.admit(stream, permit).await {
                Ok(()) => {
                    self.state.send_replace(ListenerState::Dispatched);
                }
                Err(PeerError::Shutdown) => break,
                Err(err) => {
                    tracing::warn!(
                        pipe = %self.settings.pipe_name,
                        error = %err,
                        "rejected inbound connection"
                    );
                }
            }
        }

        self.state.send_replace(ListenerState::Stopped);
        tracing::info!(pipe = %self.settings.pipe_name, "listener stopped");
    }

    /// Handshake `stream`, register it and start its receive loop.
    async fn admit(&self, stream: PipeStream, permit: OwnedSemaphorePermit) -> Result<()> {
        let settings = &self.settings;
        let config = FrameConfig {
            max_payload_size: settings.max_payload_size,
            ..FrameConfig::default()
        };
        let (read_half, write_half) = tokio::io::split(stream);
        let mut reader = FrameReader::with_config(read_half, config.clone());
        let mut writer = FrameWriter::with_config(write_half, config);

        let handshake = handshake_server(
            &mut reader,
            &mut writer,
            &settings.pipe_name,
            settings.max_handshake_payload,
            Deadline::new(settings.connect_timeout),
        );
        let peer = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => return Err(PeerError::Shutdown),
            peer = handshake => peer?,
        };

        let id = self.next_channel_id.fetch_add(1, Ordering::Relaxed);
        let timeouts = settings.timeouts;
        let token = self.shutdown.child_token();
        let (_client, channel) = self.shared.registry.register_with(peer.clone(), |first| {
            Arc::new(InboundChannel::new(id, peer, first, writer, timeouts, token))
        });

        tracing::debug!(
            peer = %channel.peer(),
            channel = id,
            first = channel.is_first(),
            "inbound channel open"
        );
        tokio::spawn(channel.run(reader, Arc::clone(&self.shared), permit));
        Ok(())
    }
}
