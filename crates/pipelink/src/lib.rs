//! Pooled request/reply messaging over named pipes and local sockets.
//!
//! # Crate Structure
//!
//! - [`transport`]: pipe endpoints, local socket and named pipe streams
//! - [`frame`]: length-prefixed framing, deadlines and reply envelopes
//! - [`peer`]: handshake, channel pools, listener and [`PipeService`](peer::PipeService)
//!   (behind the `peer` feature)

/// Re-export transport types.
pub mod transport {
    pub use pipelink_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use pipelink_frame::*;
}

/// Re-export peer types (requires `peer` feature).
#[cfg(feature = "peer")]
pub mod peer {
    pub use pipelink_peer::*;
}
