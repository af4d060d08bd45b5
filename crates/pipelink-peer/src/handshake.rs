//! Identity exchange performed once per connection.
//!
//! ```text
//! server                                client
//!   │ ── frame: own pipe name ────────────▶ │  verify == target name
//!   │ ◀─ frame: /host/app/version/pipe ──── │
//! ```
//!
//! Both frames are raw UTF-8 and bounded by `max_handshake_payload`; the
//! reader's regular payload limit is restored once the exchange succeeds.

use pipelink_frame::{Deadline, FrameError, FrameReader, FrameWriter};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::{PeerError, Result};
use crate::identity::{PeerIdentity, ProcessIdentity};

/// Default ceiling for a handshake frame.
pub const DEFAULT_MAX_HANDSHAKE_PAYLOAD: usize = 16 * 1024;

/// Client side: verify the server's name, then announce ourselves.
pub async fn handshake_client<R, W>(
    reader: &mut FrameReader<R>,
    writer: &mut FrameWriter<W>,
    expected_name: &str,
    local: &ProcessIdentity,
    local_pipe: &str,
    max_handshake_payload: usize,
    deadline: Deadline,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let runtime_limit = reader.config().max_payload_size;
    reader.set_max_payload_size(max_handshake_payload);

    let frame = reader
        .read_frame(deadline)
        .await
        .map_err(|err| handshake_fault("reading server name", err))?;
    let announced = std::str::from_utf8(&frame)
        .map_err(|_| PeerError::HandshakeFailed("server name is not valid UTF-8".into()))?;
    if announced != expected_name {
        return Err(PeerError::HandshakeFailed(format!(
            "connected to '{announced}', expected '{expected_name}'"
        )));
    }

    writer
        .write_frame(local.handshake_string(local_pipe).as_bytes(), deadline)
        .await
        .map_err(|err| handshake_fault("sending identity", err))?;

    reader.set_max_payload_size(runtime_limit);
    Ok(())
}

/// Server side: announce our name, then read and parse the client identity.
pub async fn handshake_server<R, W>(
    reader: &mut FrameReader<R>,
    writer: &mut FrameWriter<W>,
    own_name: &str,
    max_handshake_payload: usize,
    deadline: Deadline,
) -> Result<PeerIdentity>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let runtime_limit = reader.config().max_payload_size;
    reader.set_max_payload_size(max_handshake_payload);

    writer
        .write_frame(own_name.as_bytes(), deadline)
        .await
        .map_err(|err| handshake_fault("sending server name", err))?;

    let frame = reader
        .read_frame(deadline)
        .await
        .map_err(|err| handshake_fault("reading client identity", err))?;
    let raw = std::str::from_utf8(&frame)
        .map_err(|_| PeerError::HandshakeFailed("client identity is not valid UTF-8".into()))?;
    let peer = PeerIdentity::parse_handshake(raw)?;

    reader.set_max_payload_size(runtime_limit);
    Ok(peer)
}

fn handshake_fault(step: &str, err: FrameError) -> PeerError {
    match err {
        FrameError::TimedOut(budget) => PeerError::Timeout(budget),
        other => PeerError::HandshakeFailed(format!("{step}: {other}")),
    }
}
