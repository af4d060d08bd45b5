use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use pipelink_frame::{
    Deadline, Envelope, FrameError, FrameReader, FrameWriter, Timeout, CODE_INTERNAL_ERROR,
};
use pipelink_transport::PipeStream;
use tokio::io::{ReadHalf, WriteHalf};
use tokio::sync::{Mutex, OwnedSemaphorePermit};
use tokio_util::sync::CancellationToken;
use tokio_util::task::AbortOnDropHandle;

use crate::error::{PeerError, Result};
use crate::handler::{RequestContext, RequestHandler};
use crate::identity::PeerIdentity;
use crate::manager::ChannelManager;
use crate::registry::ClientRegistry;

const CLOSE_GRACE: Duration = Duration::from_millis(250);

/// State shared by every inbound channel of a service.
pub(crate) struct InboundShared {
    pub registry: Arc<ClientRegistry>,
    pub manager: Arc<ChannelManager>,
    pub handler: Arc<dyn RequestHandler>,
}

/// Timeouts applied to one inbound channel.
#[derive(Debug, Clone, Copy)]
pub(crate) struct InboundTimeouts {
    pub receive: Timeout,
    pub send: Timeout,
}

/// The writer, plus which request it may still answer.
struct ReplySlot {
    writer: FrameWriter<WriteHalf<PipeStream>>,
    seq: u64,
    replied: bool,
    /// A reply write failed; the stream is unusable.
    faulted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CloseReason {
    PeerClosed,
    IdleTimeout,
    ReadFault,
    ReplyFault,
    Local,
}

impl CloseReason {
    fn as_str(self) -> &'static str {
        match self {
            CloseReason::PeerClosed => "peer closed",
            CloseReason::IdleTimeout => "receive timeout",
            CloseReason::ReadFault => "read fault",
            CloseReason::ReplyFault => "reply failed",
            CloseReason::Local => "closed locally",
        }
    }
}

/// One accepted connection from a peer.
///
/// A receive loop reads one request, runs the handler and writes exactly one
/// reply before reading the next request.
pub struct InboundChannel {
    id: u64,
    peer: PeerIdentity,
    first: bool,
    timeouts: InboundTimeouts,
    slot: Mutex<ReplySlot>,
    shutdown: CancellationToken,
    handled: AtomicU64,
}

impl InboundChannel {
    pub(crate) fn new(
        id: u64,
        peer: PeerIdentity,
        first: bool,
        writer: FrameWriter<WriteHalf<PipeStream>>,
        timeouts: InboundTimeouts,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            id,
            peer,
            first,
            timeouts,
            slot: Mutex::new(ReplySlot {
                writer,
                seq: 0,
                replied: true,
                faulted: false,
            }),
            shutdown,
            handled: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn peer(&self) -> &PeerIdentity {
        &self.peer
    }

    /// Whether this was the peer's first channel. The first channel never
    /// times out on receive.
    pub fn is_first(&self) -> bool {
        self.first
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Requests dispatched so far.
    pub fn requests_handled(&self) -> u64 {
        self.handled.load(Ordering::Relaxed)
    }

    /// Stop the receive loop. The channel unregisters itself.
    pub fn close(&self) {
        self.shutdown.cancel();
    }

    fn receive_deadline(&self) -> Deadline {
        if self.first {
            Deadline::never()
        } else {
            Deadline::new(self.timeouts.receive)
        }
    }

    pub(crate) async fn run(
        self: Arc<Self>,
        mut reader: FrameReader<ReadHalf<PipeStream>>,
        shared: Arc<InboundShared>,
        permit: OwnedSemaphorePermit,
    ) -> CloseReason {
        let mut reason = self.receive_loop(&mut reader, &shared).await;
        {
            let mut slot = self.slot.lock().await;
            if slot.faulted {
                reason = CloseReason::ReplyFault;
            } else if reason == CloseReason::Local {
                let _ = slot.writer.write_close(Deadline::after(CLOSE_GRACE)).await;
            }
        }
        tracing::debug!(
            peer = %self.peer.instance_id(),
            channel = self.id,
            reason = reason.as_str(),
            handled = self.requests_handled(),
            "inbound channel closed"
        );

        self.shutdown.cancel();
        drop(reader);

        if let Some(peer) = shared.registry.unregister(&self) {
            match peer.endpoint() {
                Ok(endpoint) => {
                    shared.manager.reset_pool(&endpoint).await;
                }
                Err(err) => tracing::warn!(peer = %peer, error = %err, "cannot reset pool"),
            }
        }
        drop(permit);
        reason
    }

    async fn receive_loop(
        self: &Arc<Self>,
        reader: &mut FrameReader<ReadHalf<PipeStream>>,
        shared: &InboundShared,
    ) -> CloseReason {
        loop {
            let frame = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return CloseReason::Local,
                frame = reader.read_frame(self.receive_deadline()) => frame,
            };

            let payload = match frame {
                Ok(payload) => payload,
                Err(FrameError::ConnectionClosed) => return CloseReason::PeerClosed,
                Err(FrameError::TimedOut(_)) => return CloseReason::IdleTimeout,
                Err(err) => {
                    tracing::warn!(
                        peer = %self.peer.instance_id(),
                        channel = self.id,
                        error = %err,
                        "inbound read failed"
                    );
                    return CloseReason::ReadFault;
                }
            };

            let dispatched = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return CloseReason::Local,
                result = self.dispatch(payload, shared) => result,
            };
            if let Err(err) = dispatched {
                tracing::warn!(
                    peer = %self.peer.instance_id(),
                    channel = self.id,
                    error = %err,
                    "closing inbound channel"
                );
                return CloseReason::ReplyFault;
            }
        }
    }

    async fn dispatch(self: &Arc<Self>, payload: Bytes, shared: &InboundShared) -> Result<()> {
        let seq = {
            let mut slot = self.slot.lock().await;
            slot.seq += 1;
            slot.replied = false;
            slot.seq
        };
        self.handled.fetch_add(1, Ordering::Relaxed);

        let ctx = RequestContext::new(Arc::clone(self), payload, seq);
        let handler = Arc::clone(&shared.handler);
        // Dropping this future (channel closed mid-request) aborts the handler.
        let outcome =
            AbortOnDropHandle::new(tokio::spawn(async move { handler.handle(ctx).await })).await;

        let envelope = match outcome {
            Ok(Ok(value)) => Envelope::ok(value),
            Ok(Err(err)) => Envelope::error(err.code, err.message),
            Err(join_err) => {
                tracing::error!(
                    peer = %self.peer.instance_id(),
                    channel = self.id,
                    panicked = join_err.is_panic(),
                    "request handler did not complete"
                );
                Envelope::error(CODE_INTERNAL_ERROR, "request handler failed")
            }
        };

        let failed = !envelope.is_ok();
        match self.write_reply(seq, envelope).await {
            Err(PeerError::AlreadyReplied) => {
                if failed {
                    tracing::warn!(
                        peer = %self.peer.instance_id(),
                        channel = self.id,
                        seq,
                        "handler failed after replying; error not sent"
                    );
                }
                Ok(())
            }
            other => other,
        }
    }

    /// Write the reply for request `seq`, at most once.
    pub(crate) async fn write_reply(&self, seq: u64, envelope: Envelope) -> Result<()> {
        let mut bytes = envelope.encode()?;

        let mut slot = self.slot.lock().await;
        if slot.seq != seq || slot.replied {
            return Err(PeerError::AlreadyReplied);
        }
        slot.replied = true;

        let max = slot.writer.config().max_payload_size;
        if bytes.len() > max {
            tracing::warn!(
                peer = %self.peer.instance_id(),
                channel = self.id,
                size = bytes.len(),
                max,
                "reply too large, answering with an error"
            );
            bytes = Envelope::error(
                CODE_INTERNAL_ERROR,
                format!("reply of {} bytes exceeds the {max} byte limit", bytes.len()),
            )
            .encode()?;
        }

        if let Err(err) = slot
            .writer
            .write_frame(&bytes, Deadline::new(self.timeouts.send))
            .await
        {
            slot.faulted = true;
            self.shutdown.cancel();
            return Err(PeerError::ReplyFailed(err));
        }
        Ok(())
    }
}

impl std::fmt::Debug for InboundChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InboundChannel")
            .field("id", &self.id)
            .field("peer", &self.peer.instance_id())
            .field("first", &self.first)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use pipelink_frame::{Timeout, CODE_NOT_FOUND};
    use serde_json::{json, Value};
    use tokio::sync::Semaphore;

    use super::*;
    use crate::events::{EventBus, PeerEvent};
    use crate::handler::HandlerError;
    use crate::outbound::ConnectSettings;

    type ClientWire = (
        FrameReader<ReadHalf<PipeStream>>,
        FrameWriter<WriteHalf<PipeStream>>,
    );

    fn deadline() -> Deadline {
        Deadline::after(Duration::from_secs(5))
    }

    fn manager() -> Arc<ChannelManager> {
        let settings = Arc::new(ConnectSettings {
            namespace: pipelink_transport::PipeNamespace::with_local_host(
                "/tmp/plin-unused",
                "node-a",
            ),
            identity: crate::identity::ProcessIdentity::new("tester", "0.1.0", "node-a"),
            local_pipe: "svc".to_string(),
            connect_timeout: Timeout::secs(1),
            max_payload_size: pipelink_frame::DEFAULT_MAX_PAYLOAD,
            max_handshake_payload: 1024,
        });
        Arc::new(ChannelManager::new(settings, 1))
    }

    fn start(
        handler: impl RequestHandler,
        receive: Timeout,
    ) -> (ClientWire, Arc<ClientRegistry>, Arc<InboundChannel>) {
        let (wire, registry, channel, _run) = launch(handler, receive);
        (wire, registry, channel)
    }

    /// Start one inbound channel over a socket pair and return the client
    /// end, the registry and the receive loop's task.
    fn launch(
        handler: impl RequestHandler,
        receive: Timeout,
    ) -> (
        ClientWire,
        Arc<ClientRegistry>,
        Arc<InboundChannel>,
        tokio::task::JoinHandle<CloseReason>,
    ) {
        let (server, client) = PipeStream::pair().unwrap();
        let (sr, sw) = tokio::io::split(server);
        let (cr, cw) = tokio::io::split(client);

        let registry = Arc::new(ClientRegistry::new(EventBus::default()));
        let shared = Arc::new(InboundShared {
            registry: Arc::clone(&registry),
            manager: manager(),
            handler: Arc::new(handler),
        });
        let peer = PeerIdentity::parse_handshake("/node-b/client/1.0/caller").unwrap();
        let timeouts = InboundTimeouts {
            receive,
            send: Timeout::secs(5),
        };
        let (_client, channel) = registry.register_with(peer, |first| {
            Arc::new(InboundChannel::new(
                1,
                PeerIdentity::parse_handshake("/node-b/client/1.0/caller").unwrap(),
                first,
                FrameWriter::new(sw),
                timeouts,
                CancellationToken::new(),
            ))
        });
        let permit = Arc::new(Semaphore::new(1)).try_acquire_owned().unwrap();
        let run = tokio::spawn(channel.clone().run(FrameReader::new(sr), shared, permit));

        ((FrameReader::new(cr), FrameWriter::new(cw)), registry, channel, run)
    }

    async fn call(wire: &mut ClientWire, request: Value) -> Envelope {
        let bytes = serde_json::to_vec(&request).unwrap();
        wire.1.write_frame(&bytes, deadline()).await.unwrap();
        let reply = wire.0.read_frame(deadline()).await.unwrap();
        Envelope::decode(&reply).unwrap()
    }

    #[tokio::test]
    async fn handler_value_becomes_reply() {
        let (mut wire, _registry, channel) = start(
            |ctx: RequestContext| async move {
                let request: Value = ctx.json()?;
                Ok::<_, HandlerError>(Some(request["data"].clone()))
            },
            Timeout::Infinite,
        );

        let reply = call(&mut wire, json!({"op": "echo", "data": "hi"})).await;
        assert_eq!(reply, Envelope::ok(Some(json!("hi"))));
        let reply = call(&mut wire, json!({"op": "echo", "data": 2})).await;
        assert_eq!(reply.value, Some(json!(2)));
        assert_eq!(channel.requests_handled(), 2);
    }

    #[tokio::test]
    async fn handler_error_becomes_error_envelope() {
        let (mut wire, _registry, _channel) = start(
            |_ctx: RequestContext| async move {
                Err::<Option<Value>, _>(HandlerError::not_found("not found"))
            },
            Timeout::Infinite,
        );

        let reply = call(&mut wire, json!({})).await;
        assert_eq!(reply.code, CODE_NOT_FOUND);
        assert_eq!(reply.message.as_deref(), Some("not found"));
    }

    #[tokio::test]
    async fn bad_json_is_400() {
        let (mut wire, _registry, _channel) = start(
            |ctx: RequestContext| async move {
                let _: Value = ctx.json()?;
                Ok::<_, HandlerError>(None)
            },
            Timeout::Infinite,
        );

        wire.1.write_frame(b"{not json", deadline()).await.unwrap();
        let reply = Envelope::decode(&wire.0.read_frame(deadline()).await.unwrap()).unwrap();
        assert_eq!(reply.code, 400);
    }

    #[tokio::test]
    async fn explicit_reply_then_error_writes_one_reply() {
        let (mut wire, _registry, _channel) = start(
            |ctx: RequestContext| async move {
                ctx.reply(Some(json!("early"))).await?;
                assert!(matches!(
                    ctx.reply(Some(json!("twice"))).await,
                    Err(PeerError::AlreadyReplied)
                ));
                Err::<Option<Value>, _>(HandlerError::internal("failed after replying"))
            },
            Timeout::Infinite,
        );

        let reply = call(&mut wire, json!(1)).await;
        assert_eq!(reply.value, Some(json!("early")));

        // The next read must see the next request's reply, not a stray error.
        let reply = call(&mut wire, json!(2)).await;
        assert_eq!(reply.value, Some(json!("early")));
    }

    #[tokio::test]
    async fn panicking_handler_gets_500() {
        let (mut wire, _registry, _channel) = start(
            |ctx: RequestContext| async move {
                let n: i64 = ctx.json()?;
                if n == 0 {
                    panic!("boom");
                }
                Ok::<_, HandlerError>(Some(json!(n)))
            },
            Timeout::Infinite,
        );

        let reply = call(&mut wire, json!(0)).await;
        assert_eq!(reply.code, CODE_INTERNAL_ERROR);
        let reply = call(&mut wire, json!(5)).await;
        assert_eq!(reply.value, Some(json!(5)));
    }

    #[tokio::test]
    async fn peer_close_unregisters_and_publishes() {
        let (wire, registry, channel) = start(
            |_ctx: RequestContext| async move { Ok::<_, HandlerError>(None) },
            Timeout::Infinite,
        );
        assert_eq!(registry.len(), 1);
        assert!(channel.is_first());

        let mut registry_rx = registry.subscribe();
        let (_reader, mut writer) = wire;
        writer.write_close(deadline()).await.unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), registry_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(event, PeerEvent::ChannelClosed { channel_id: 1, .. }));
        let event = registry_rx.recv().await.unwrap();
        assert!(matches!(event, PeerEvent::PeerDisconnected { .. }));
        assert!(registry.is_empty());
        assert!(channel.is_closed());
    }

    #[tokio::test]
    async fn first_channel_ignores_receive_timeout() {
        let (mut wire, _registry, channel) = start(
            |_ctx: RequestContext| async move { Ok::<_, HandlerError>(Some(json!("awake"))) },
            Timeout::millis(20),
        );
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!channel.is_closed());
        let reply = call(&mut wire, json!(null)).await;
        assert_eq!(reply.value, Some(json!("awake")));
    }

    #[tokio::test]
    async fn local_close_sends_sentinel() {
        let (mut wire, registry, channel) = start(
            |_ctx: RequestContext| async move { Ok::<_, HandlerError>(None) },
            Timeout::Infinite,
        );
        channel.close();
        let err = wire.0.read_frame(deadline()).await.unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));

        tokio::time::timeout(Duration::from_secs(5), async {
            while !registry.is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn close_aborts_in_flight_handler() {
        let (mut wire, registry, channel) = start(
            |_ctx: RequestContext| async move {
                std::future::pending::<()>().await;
                Ok::<_, HandlerError>(None)
            },
            Timeout::Infinite,
        );
        let bytes = serde_json::to_vec(&json!("stuck")).unwrap();
        wire.1.write_frame(&bytes, deadline()).await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            while channel.requests_handled() == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        channel.close();
        let err = wire.0.read_frame(deadline()).await.unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));

        // Once the handler is gone, nothing but this test holds the channel.
        tokio::time::timeout(Duration::from_secs(5), async {
            while !registry.is_empty() || Arc::strong_count(&channel) > 1 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("handler task should be aborted");
    }

    #[tokio::test]
    async fn failed_explicit_reply_closes_as_reply_fault() {
        let (mut wire, registry, _channel, run) = launch(
            |ctx: RequestContext| async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                assert!(matches!(
                    ctx.reply(Some(json!("late"))).await,
                    Err(PeerError::ReplyFailed(_))
                ));
                Ok::<_, HandlerError>(None)
            },
            Timeout::Infinite,
        );
        let bytes = serde_json::to_vec(&json!(1)).unwrap();
        wire.1.write_frame(&bytes, deadline()).await.unwrap();
        drop(wire);

        let reason = tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reason, CloseReason::ReplyFault);
        assert!(registry.is_empty());
    }
}
