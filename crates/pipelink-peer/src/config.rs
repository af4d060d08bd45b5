use std::path::{Path, PathBuf};

use pipelink_frame::{Timeout, DEFAULT_MAX_PAYLOAD, HEADER_SIZE};
use pipelink_transport::{validate_pipe_name, PipeNamespace};
use serde::{Deserialize, Serialize};

use crate::error::{PeerError, Result};
use crate::handshake::DEFAULT_MAX_HANDSHAKE_PAYLOAD;

/// Where the accept loop runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListenerScheduling {
    /// A task on the ambient Tokio runtime.
    #[default]
    Shared,
    /// A dedicated, named OS thread driving the runtime handle. Requires a
    /// multi-threaded runtime.
    Dedicated,
}

/// Service configuration.
///
/// Loaded from JSON; every field is optional and falls back to
/// [`ServiceConfig::default`]. Timeouts use the text form (`"5s"`,
/// `"250ms"`, `"infinite"`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServiceConfig {
    /// Local pipe this service listens on and announces in handshakes.
    pub pipe_name: String,
    /// Socket directory (Unix). `None` selects the platform default.
    pub socket_dir: Option<PathBuf>,
    /// Concurrently open inbound channels.
    pub max_inbound_connections: usize,
    /// Pool capacity per remote endpoint.
    pub max_outbound_per_endpoint: usize,
    /// Budget for connect + handshake, both directions.
    pub connect_timeout: Timeout,
    /// Budget for a whole outbound call, and for writing a reply.
    pub send_timeout: Timeout,
    /// Idle limit for every inbound channel but a peer's first.
    pub receive_timeout: Timeout,
    pub max_payload_size: usize,
    pub max_handshake_payload: usize,
    pub listener_scheduling: ListenerScheduling,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            pipe_name: "pipelink".to_string(),
            socket_dir: None,
            max_inbound_connections: 64,
            max_outbound_per_endpoint: 16,
            connect_timeout: Timeout::secs(5),
            send_timeout: Timeout::secs(30),
            receive_timeout: Timeout::Infinite,
            max_payload_size: DEFAULT_MAX_PAYLOAD,
            max_handshake_payload: DEFAULT_MAX_HANDSHAKE_PAYLOAD,
            listener_scheduling: ListenerScheduling::Shared,
        }
    }
}

impl ServiceConfig {
    /// Default configuration for the given pipe name.
    pub fn named(pipe_name: impl Into<String>) -> Self {
        Self {
            pipe_name: pipe_name.into(),
            ..Self::default()
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|err| {
            PeerError::InvalidConfig(format!("cannot read {}: {err}", path.display()))
        })?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<()> {
        validate_pipe_name(&self.pipe_name)?;

        let invalid = |msg: &str| Err(PeerError::InvalidConfig(msg.to_string()));
        if self.max_inbound_connections == 0 {
            return invalid("max_inbound_connections must be at least 1");
        }
        if self.max_outbound_per_endpoint == 0 {
            return invalid("max_outbound_per_endpoint must be at least 1");
        }
        if self.max_payload_size == 0 || self.max_payload_size > u32::MAX as usize {
            return invalid("max_payload_size must be between 1 and 4 GiB");
        }
        if self.max_handshake_payload < HEADER_SIZE * 16 {
            return invalid("max_handshake_payload must be at least 64 bytes");
        }
        Ok(())
    }

    /// Socket directory after applying the platform default.
    pub fn resolved_socket_dir(&self) -> PathBuf {
        self.socket_dir
            .clone()
            .unwrap_or_else(PipeNamespace::default_socket_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = ServiceConfig::default();
        config.validate().unwrap();
        assert_eq!(config.max_inbound_connections, 64);
        assert_eq!(config.max_outbound_per_endpoint, 16);
        assert_eq!(config.receive_timeout, Timeout::Infinite);
    }

    #[test]
    fn json_overrides_and_defaults() {
        let config = ServiceConfig::from_json_str(
            r#"{
                "pipe_name": "billing",
                "socket_dir": "/tmp/pl",
                "send_timeout": "750ms",
                "receive_timeout": "2m",
                "listener_scheduling": "dedicated"
            }"#,
        )
        .unwrap();
        assert_eq!(config.pipe_name, "billing");
        assert_eq!(config.resolved_socket_dir(), PathBuf::from("/tmp/pl"));
        assert_eq!(config.send_timeout, Timeout::millis(750));
        assert_eq!(config.receive_timeout, Timeout::secs(120));
        assert_eq!(config.connect_timeout, Timeout::secs(5));
        assert_eq!(config.listener_scheduling, ListenerScheduling::Dedicated);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = ServiceConfig::from_json_str(r#"{"pipe": "x"}"#).unwrap_err();
        assert!(matches!(err, PeerError::Json(_)));
    }

    #[test]
    fn invalid_values_are_rejected() {
        let err = ServiceConfig::from_json_str(r#"{"max_inbound_connections": 0}"#).unwrap_err();
        assert!(matches!(err, PeerError::InvalidConfig(_)));

        let err = ServiceConfig::from_json_str(r#"{"pipe_name": "a/b"}"#).unwrap_err();
        assert!(matches!(err, PeerError::Transport(_)));

        let err = ServiceConfig::from_json_str(r#"{"send_timeout": "0s"}"#).unwrap_err();
        assert!(matches!(err, PeerError::Json(_)));
    }

    #[test]
    fn missing_file_is_config_error() {
        let err = ServiceConfig::from_json_file("/nonexistent/pipelink.json").unwrap_err();
        assert!(matches!(err, PeerError::InvalidConfig(_)));
    }
}
