use std::fmt;

use pipelink_transport::{
    local_host_name, validate_host_name, validate_pipe_name, PipeEndpoint, TransportError,
};

use crate::error::{PeerError, Result};

/// Who this process is, as announced in outbound handshakes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessIdentity {
    pub app_name: String,
    pub app_version: String,
    pub host_name: String,
}

impl ProcessIdentity {
    pub fn new(
        app_name: impl Into<String>,
        app_version: impl Into<String>,
        host_name: impl Into<String>,
    ) -> Self {
        Self {
            app_name: app_name.into(),
            app_version: app_version.into(),
            host_name: host_name.into(),
        }
    }

    /// Identity on this machine, using the detected host name.
    pub fn current(app_name: impl Into<String>, app_version: impl Into<String>) -> Self {
        Self::new(app_name, app_version, local_host_name())
    }

    /// `"/{host}/{app}/{version}/{local_pipe}"`.
    pub fn handshake_string(&self, local_pipe: &str) -> String {
        format!(
            "/{}/{}/{}/{}",
            self.host_name, self.app_name, self.app_version, local_pipe
        )
    }

    /// Reject identities that could not be parsed back by the accepting side.
    pub fn validate(&self) -> Result<()> {
        validate_host_name(&self.host_name)?;
        for (field, value) in [
            ("app name", &self.app_name),
            ("app version", &self.app_version),
        ] {
            if value.is_empty() || value.contains('/') {
                return Err(PeerError::InvalidConfig(format!(
                    "{field} '{value}' must be non-empty and must not contain '/'"
                )));
            }
        }
        Ok(())
    }
}

/// A remote process, as parsed from its handshake string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerIdentity {
    pub host_name: String,
    pub app_name: String,
    pub app_version: String,
    /// The pipe the remote process listens on.
    pub pipe_name: String,
}

impl PeerIdentity {
    /// Parse `"/{host}/{app}/{version}/{pipe}"`.
    pub fn parse_handshake(raw: &str) -> Result<Self> {
        let segments: Vec<&str> = raw.split('/').collect();
        let [lead, host, app, version, pipe] = segments.as_slice() else {
            return Err(malformed(raw, "expected 4 segments"));
        };
        if !lead.is_empty() {
            return Err(malformed(raw, "must start with '/'"));
        }
        if [host, app, version, pipe].iter().any(|s| s.is_empty()) {
            return Err(malformed(raw, "empty segment"));
        }
        validate_host_name(host).map_err(|err| malformed_name(raw, err))?;
        validate_pipe_name(pipe).map_err(|err| malformed_name(raw, err))?;

        Ok(Self {
            host_name: host.to_string(),
            app_name: app.to_string(),
            app_version: version.to_string(),
            pipe_name: pipe.to_string(),
        })
    }

    /// `AppInstanceId`: `"{pipe}@{host}"`.
    pub fn instance_id(&self) -> String {
        format!("{}@{}", self.pipe_name, self.host_name)
    }

    /// The endpoint this peer listens on.
    pub fn endpoint(&self) -> Result<PipeEndpoint> {
        Ok(PipeEndpoint::new(&self.host_name, &self.pipe_name)?)
    }
}

impl fmt::Display for PeerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({} {})",
            self.instance_id(),
            self.app_name,
            self.app_version
        )
    }
}

fn malformed(raw: &str, reason: &str) -> PeerError {
    PeerError::HandshakeFailed(format!("malformed handshake '{raw}': {reason}"))
}

fn malformed_name(raw: &str, err: TransportError) -> PeerError {
    PeerError::HandshakeFailed(format!("malformed handshake '{raw}': {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_string_roundtrip() {
        let me = ProcessIdentity::new("billing", "2.4.1", "node-a");
        let raw = me.handshake_string("billing-rpc");
        assert_eq!(raw, "/node-a/billing/2.4.1/billing-rpc");

        let peer = PeerIdentity::parse_handshake(&raw).unwrap();
        assert_eq!(peer.host_name, "node-a");
        assert_eq!(peer.app_name, "billing");
        assert_eq!(peer.app_version, "2.4.1");
        assert_eq!(peer.pipe_name, "billing-rpc");
        assert_eq!(peer.instance_id(), "billing-rpc@node-a");
        assert_eq!(peer.endpoint().unwrap().instance_id(), "billing-rpc@node-a");
    }

    #[test]
    fn wrong_segment_count_is_rejected() {
        for raw in [
            "",
            "/",
            "/node-a/app/1.0",
            "/node-a/app/1.0/pipe/extra",
            "node-a/app/1.0/pipe",
            "x/node-a/app/1.0",
        ] {
            let err = PeerIdentity::parse_handshake(raw).unwrap_err();
            assert!(matches!(err, PeerError::HandshakeFailed(_)), "{raw}");
        }
    }

    #[test]
    fn empty_segments_and_bad_names_are_rejected() {
        assert!(PeerIdentity::parse_handshake("/node-a//1.0/pipe").is_err());
        assert!(PeerIdentity::parse_handshake("/node-a/app/1.0/").is_err());
        assert!(PeerIdentity::parse_handshake("/node a/app/1.0/pipe").is_err());
        assert!(PeerIdentity::parse_handshake("/node-a/app/1.0/pi pe").is_err());
    }

    #[test]
    fn identity_validation() {
        assert!(ProcessIdentity::new("app", "1.0", "node-a").validate().is_ok());
        assert!(ProcessIdentity::new("a/b", "1.0", "node-a").validate().is_err());
        assert!(ProcessIdentity::new("app", "", "node-a").validate().is_err());
        assert!(ProcessIdentity::new("app", "1.0", "").validate().is_err());
    }
}
