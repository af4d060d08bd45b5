//! Length-prefixed message framing for pipelink.
//!
//! Every message on a pipe is a frame:
//! - A 4-byte little-endian payload length
//! - `length` bytes of payload
//!
//! Length 0 never carries data: it is the close sentinel. Payloads are
//! written in chunks no larger than the transport's single-operation limit
//! (64 KiB) and flushed after every chunk. Every blocking step takes a
//! [`Deadline`] computed once per logical operation.
//!
//! Replies are always wrapped in an [`Envelope`].

pub mod codec;
pub mod deadline;
pub mod envelope;
pub mod error;
pub mod reader;
pub mod writer;

pub use codec::{
    decode_frame, encode_frame, FrameConfig, DEFAULT_MAX_PAYLOAD, HEADER_SIZE, MAX_CHUNK_SIZE,
};
pub use deadline::{Deadline, Elapsed, ParseTimeoutError, Timeout};
pub use envelope::{
    decode_payload, encode_payload, Envelope, RemoteError, CODE_BAD_REQUEST,
    CODE_INTERNAL_ERROR, CODE_NOT_FOUND, CODE_OK, ENVELOPE_VERSION,
};
pub use error::{FrameError, Result};
pub use reader::FrameReader;
pub use writer::FrameWriter;
