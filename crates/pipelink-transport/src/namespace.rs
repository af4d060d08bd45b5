use std::path::{Path, PathBuf};

use crate::endpoint::{validate_host_name, validate_pipe_name, PipeEndpoint};
use crate::error::Result;
#[cfg(unix)]
use crate::error::TransportError;
use crate::stream::PipeStream;
use crate::PipeListener;

/// Host name that always denotes the local machine.
pub const LOCAL_HOST: &str = ".";

/// Maps `(host, pipe name)` endpoints onto platform pipe addresses.
///
/// On Unix every pipe is a socket file `{socket_dir}/{name}.sock` and only
/// local hosts are reachable. On Windows endpoints map to
/// `\\{host}\pipe\{name}`, which the OS routes across hosts.
#[derive(Debug, Clone)]
pub struct PipeNamespace {
    socket_dir: PathBuf,
    local_host: String,
}

impl PipeNamespace {
    /// Namespace rooted at `socket_dir`, using the detected local host name.
    pub fn new(socket_dir: impl Into<PathBuf>) -> Self {
        Self::with_local_host(socket_dir, local_host_name())
    }

    /// Namespace with an explicit local host name.
    pub fn with_local_host(socket_dir: impl Into<PathBuf>, local_host: impl Into<String>) -> Self {
        Self {
            socket_dir: socket_dir.into(),
            local_host: local_host.into(),
        }
    }

    /// `$XDG_RUNTIME_DIR/pipelink`, falling back to the temp directory.
    pub fn default_socket_dir() -> PathBuf {
        std::env::var_os("XDG_RUNTIME_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(std::env::temp_dir)
            .join("pipelink")
    }

    /// Directory holding socket files.
    pub fn socket_dir(&self) -> &Path {
        &self.socket_dir
    }

    /// The name this host announces in handshakes.
    pub fn local_host(&self) -> &str {
        &self.local_host
    }

    /// Whether `host` refers to this machine.
    pub fn is_local(&self, host: &str) -> bool {
        host == LOCAL_HOST
            || host.eq_ignore_ascii_case("localhost")
            || host.eq_ignore_ascii_case(&self.local_host)
    }

    /// Rewrite local aliases (`.`, `localhost`) to the announced host name,
    /// so the same peer always maps to the same key.
    pub fn canonicalize(&self, endpoint: &PipeEndpoint) -> PipeEndpoint {
        if self.is_local(endpoint.host()) && endpoint.host() != self.local_host {
            endpoint.with_host(&self.local_host)
        } else {
            endpoint.clone()
        }
    }

    /// Platform address of an endpoint.
    #[cfg(unix)]
    pub fn resolve(&self, endpoint: &PipeEndpoint) -> Result<PathBuf> {
        if !self.is_local(endpoint.host()) {
            return Err(TransportError::RemoteHostUnsupported {
                host: endpoint.host().to_string(),
            });
        }
        Ok(self.socket_path(endpoint.name()))
    }

    /// Platform address of an endpoint.
    #[cfg(windows)]
    pub fn resolve(&self, endpoint: &PipeEndpoint) -> Result<PathBuf> {
        let host = if self.is_local(endpoint.host()) {
            LOCAL_HOST
        } else {
            endpoint.host()
        };
        Ok(PathBuf::from(format!(r"\\{}\pipe\{}", host, endpoint.name())))
    }

    #[cfg(unix)]
    fn socket_path(&self, name: &str) -> PathBuf {
        self.socket_dir.join(format!("{name}.sock"))
    }

    /// Start listening on the local pipe `name`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn bind(&self, name: &str) -> Result<PipeListener> {
        validate_pipe_name(name)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;

            std::fs::DirBuilder::new()
                .recursive(true)
                .mode(0o700)
                .create(&self.socket_dir)
                .map_err(|source| TransportError::Bind {
                    path: self.socket_dir.clone(),
                    source,
                })?;
            PipeListener::bind(self.socket_path(name))
        }

        #[cfg(windows)]
        {
            PipeListener::bind(format!(r"\\.\pipe\{name}"))
        }
    }

    /// Open a raw stream to `endpoint`.
    pub async fn connect(&self, endpoint: &PipeEndpoint) -> Result<PipeStream> {
        let address = self.resolve(endpoint)?;
        PipeListener::connect(address).await
    }
}

impl Default for PipeNamespace {
    fn default() -> Self {
        Self::new(Self::default_socket_dir())
    }
}

/// Best-effort name of this machine, `localhost` when unavailable.
#[cfg(unix)]
pub fn local_host_name() -> String {
    let mut buf = [0u8; 256];
    // SAFETY: `buf` is a valid writable buffer of `buf.len()` bytes; gethostname
    // writes at most that many bytes.
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr().cast::<libc::c_char>(), buf.len()) };
    if rc == 0 {
        let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
        if let Ok(name) = std::str::from_utf8(&buf[..end]) {
            if validate_host_name(name).is_ok() {
                return name.to_string();
            }
        }
    }
    "localhost".to_string()
}

/// Best-effort name of this machine, `localhost` when unavailable.
#[cfg(windows)]
pub fn local_host_name() -> String {
    std::env::var("COMPUTERNAME")
        .ok()
        .filter(|name| validate_host_name(name).is_ok())
        .unwrap_or_else(|| "localhost".to_string())
}
