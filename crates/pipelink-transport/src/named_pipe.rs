use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::net::windows::named_pipe::{ClientOptions, NamedPipeServer, ServerOptions};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::stream::PipeStream;

/// `ERROR_PIPE_BUSY`: every server instance is currently connected.
const ERROR_PIPE_BUSY: i32 = 231;
const BUSY_RETRY_DELAY: Duration = Duration::from_millis(20);

/// Pipe listener backed by a Windows named pipe (`\\.\pipe\<name>`).
///
/// One idle server instance is always kept open so clients can connect
/// while the previous connection is being handed off.
pub struct PipeListener {
    path: PathBuf,
    next: Mutex<NamedPipeServer>,
}

impl PipeListener {
    /// Create the first instance of the named pipe.
    pub fn bind(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let server = ServerOptions::new()
            .first_pipe_instance(true)
            .create(&path)
            .map_err(|source| TransportError::Bind {
                path: path.clone(),
                source,
            })?;
        info!(?path, "listening on named pipe");
        Ok(Self {
            path,
            next: Mutex::new(server),
        })
    }

    /// Accept the next incoming connection.
    pub async fn accept(&self) -> Result<PipeStream> {
        let mut next = self.next.lock().await;
        next.connect().await.map_err(TransportError::Accept)?;
        let fresh = ServerOptions::new()
            .create(&self.path)
            .map_err(TransportError::Accept)?;
        let connected = std::mem::replace(&mut *next, fresh);
        debug!(path = ?self.path, "accepted connection");
        Ok(PipeStream::from_pipe_server(connected))
    }

    /// Connect to a named pipe, waiting while all instances are busy.
    pub async fn connect(path: impl AsRef<Path>) -> Result<PipeStream> {
        let path = path.as_ref();
        loop {
            match ClientOptions::new().open(path) {
                Ok(client) => {
                    debug!(?path, "connected to named pipe");
                    return Ok(PipeStream::from_pipe_client(client));
                }
                Err(err) if err.raw_os_error() == Some(ERROR_PIPE_BUSY) => {
                    tokio::time::sleep(BUSY_RETRY_DELAY).await;
                }
                Err(source) => {
                    return Err(TransportError::Connect {
                        path: path.to_path_buf(),
                        source,
                    })
                }
            }
        }
    }

    /// The pipe path this listener serves.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Transport name for diagnostics.
    pub fn transport_name(&self) -> &'static str {
        "named-pipe"
    }
}

impl std::fmt::Debug for PipeListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipeListener")
            .field("path", &self.path)
            .finish()
    }
}
