//! Pooled request/reply peers over local pipes.
//!
//! A [`PipeService`] is one process's presence on the pipe network:
//!
//! - Outbound: [`ChannelManager`] keeps one bounded [`ChannelPool`] of
//!   [`OutboundChannel`]s per remote endpoint. Every call writes one request
//!   frame and reads exactly one reply [`Envelope`](pipelink_frame::Envelope).
//! - Inbound: the listener accepts connections one at a time, runs the
//!   handshake, registers each channel with the [`ClientRegistry`] and hands
//!   it to a receive loop that calls your [`RequestHandler`].
//!
//! Every operation is bounded by a single [`Deadline`](pipelink_frame::Deadline).
//! A timed-out or broken channel is torn down, never reused.

pub mod config;
pub mod error;
pub mod events;
pub mod handler;
pub mod handshake;
pub mod identity;
pub mod inbound;
pub mod listener;
pub mod manager;
pub mod outbound;
pub mod pool;
pub mod registry;
pub mod service;

pub use config::{ListenerScheduling, ServiceConfig};
pub use error::{PeerError, Result};
pub use events::{EventBus, PeerEvent, DEFAULT_EVENT_CAPACITY};
pub use handler::{HandlerError, HandlerFuture, HandlerResult, RequestContext, RequestHandler};
pub use handshake::{handshake_client, handshake_server, DEFAULT_MAX_HANDSHAKE_PAYLOAD};
pub use identity::{PeerIdentity, ProcessIdentity};
pub use inbound::InboundChannel;
pub use listener::{ListenerHandle, ListenerState};
pub use manager::ChannelManager;
pub use outbound::{ConnectSettings, OutboundChannel};
pub use pool::{ChannelPool, PoolStats, PooledChannel};
pub use registry::{Client, ClientRegistry};
pub use service::PipeService;
