use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use pipelink_frame::{Envelope, CODE_BAD_REQUEST, CODE_INTERNAL_ERROR, CODE_NOT_FOUND};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{PeerError, Result};
use crate::identity::PeerIdentity;
use crate::inbound::InboundChannel;

/// Failure returned by a request handler; sent back as a non-200 envelope.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{code}: {message}")]
pub struct HandlerError {
    pub code: i32,
    pub message: String,
}

impl HandlerError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(CODE_BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(CODE_NOT_FOUND, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(CODE_INTERNAL_ERROR, message)
    }
}

impl From<PeerError> for HandlerError {
    fn from(err: PeerError) -> Self {
        match err {
            PeerError::Application { code, message } => Self::new(code, message),
            other => Self::internal(other.to_string()),
        }
    }
}

/// What a handler resolves to: a reply value, or an error envelope.
pub type HandlerResult = std::result::Result<Option<Value>, HandlerError>;

pub type HandlerFuture = Pin<Box<dyn Future<Output = HandlerResult> + Send>>;

/// Application callback invoked for every inbound request.
///
/// Implemented for any `Fn(RequestContext) -> impl Future<Output = HandlerResult>`.
pub trait RequestHandler: Send + Sync + 'static {
    fn handle(&self, ctx: RequestContext) -> HandlerFuture;
}

impl<F, Fut> RequestHandler for F
where
    F: Fn(RequestContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn handle(&self, ctx: RequestContext) -> HandlerFuture {
        Box::pin(self(ctx))
    }
}

/// One inbound request.
///
/// The handler may reply explicitly with [`RequestContext::reply`]; when it
/// does not, its return value becomes the reply. At most one reply is ever
/// written per request.
pub struct RequestContext {
    channel: Arc<InboundChannel>,
    payload: Bytes,
    seq: u64,
}

impl RequestContext {
    pub(crate) fn new(channel: Arc<InboundChannel>, payload: Bytes, seq: u64) -> Self {
        Self {
            channel,
            payload,
            seq,
        }
    }

    /// Raw request bytes.
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Request decoded as JSON. Undecodable payloads map to a 400 error.
    pub fn json<T: DeserializeOwned>(&self) -> std::result::Result<T, HandlerError> {
        serde_json::from_slice(&self.payload)
            .map_err(|err| HandlerError::bad_request(format!("invalid request payload: {err}")))
    }

    pub fn channel(&self) -> &Arc<InboundChannel> {
        &self.channel
    }

    pub fn peer(&self) -> &PeerIdentity {
        self.channel.peer()
    }

    /// Position of this request on its channel, starting at 1.
    pub fn sequence(&self) -> u64 {
        self.seq
    }

    /// Write the success reply now.
    pub async fn reply(&self, value: Option<Value>) -> Result<()> {
        self.channel.write_reply(self.seq, Envelope::ok(value)).await
    }

    /// Write an error reply now.
    pub async fn reply_error(&self, code: i32, message: impl Into<String>) -> Result<()> {
        self.channel
            .write_reply(self.seq, Envelope::error(code, message))
            .await
    }
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("channel", &self.channel.id())
            .field("peer", &self.channel.peer().instance_id())
            .field("seq", &self.seq)
            .field("payload_len", &self.payload.len())
            .finish()
    }
}
