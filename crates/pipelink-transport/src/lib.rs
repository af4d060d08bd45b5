//! Local pipe transport for pipelink.
//!
//! Provides one stream type over the platform's pipe mechanism:
//! - Unix domain sockets (Linux/macOS), one socket file per pipe name
//! - Named pipes (Windows), including `\\host\pipe\name` for remote hosts
//!
//! This is the lowest layer of pipelink. Everything else builds on top of
//! the [`PipeStream`] type and the [`PipeNamespace`] resolver provided here.

pub mod endpoint;
pub mod error;
pub mod namespace;
pub mod stream;

#[cfg(unix)]
pub mod uds;

#[cfg(windows)]
pub mod named_pipe;

pub use endpoint::{validate_host_name, validate_pipe_name, PipeEndpoint, MAX_NAME_LEN};
pub use error::{Result, TransportError};
pub use namespace::{local_host_name, PipeNamespace, LOCAL_HOST};
pub use stream::{PeerCredentials, PipeStream};

#[cfg(unix)]
pub use uds::PipeListener;

#[cfg(windows)]
pub use named_pipe::PipeListener;
