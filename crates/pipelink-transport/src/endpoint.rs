use std::fmt;

use crate::error::{Result, TransportError};

/// Maximum length of a pipe or host name in bytes.
pub const MAX_NAME_LEN: usize = 128;

/// A remote pipe service: the host it runs on and the pipe name it listens on.
///
/// The `name@host` form ([`PipeEndpoint::instance_id`]) identifies one
/// running process instance and is used as the key for pools and peers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PipeEndpoint {
    host: String,
    name: String,
}

impl PipeEndpoint {
    /// Create an endpoint, validating both names.
    pub fn new(host: impl Into<String>, name: impl Into<String>) -> Result<Self> {
        let host = host.into();
        let name = name.into();
        validate_host_name(&host)?;
        validate_pipe_name(&name)?;
        Ok(Self { host, name })
    }

    /// Endpoint on the local host.
    pub fn local(name: impl Into<String>) -> Result<Self> {
        Self::new(crate::namespace::LOCAL_HOST, name)
    }

    /// Host the endpoint lives on.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Pipe name the endpoint listens on.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// `name@host`.
    pub fn instance_id(&self) -> String {
        format!("{}@{}", self.name, self.host)
    }

    pub(crate) fn with_host(&self, host: &str) -> Self {
        Self {
            host: host.to_string(),
            name: self.name.clone(),
        }
    }
}

impl fmt::Display for PipeEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.host)
    }
}

/// Validate a pipe name: non-empty ASCII alphanumerics, `-`, `_` or `.`.
pub fn validate_pipe_name(name: &str) -> Result<()> {
    validate("pipe", name, |c| {
        c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')
    })
}

/// Validate a host name. `.` denotes the local host.
pub fn validate_host_name(name: &str) -> Result<()> {
    validate("host", name, |c| {
        c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')
    })
}

fn validate(kind: &'static str, name: &str, allowed: impl Fn(char) -> bool) -> Result<()> {
    let reason = if name.is_empty() {
        Some("must not be empty")
    } else if name.len() > MAX_NAME_LEN {
        Some("longer than 128 bytes")
    } else if !name.chars().all(allowed) {
        Some("only ASCII letters, digits, '-', '_' and '.' are allowed")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(TransportError::InvalidName {
            kind,
            name: name.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_id_is_name_at_host() {
        let endpoint = PipeEndpoint::new("build-01", "svc").unwrap();
        assert_eq!(endpoint.instance_id(), "svc@build-01");
        assert_eq!(endpoint.to_string(), "svc@build-01");
    }

    #[test]
    fn rejects_separator_characters() {
        for bad in ["a/b", "a@b", "", "a b", "x\\y"] {
            let err = PipeEndpoint::new("host", bad).unwrap_err();
            assert!(matches!(err, TransportError::InvalidName { kind: "pipe", .. }));
        }
        assert!(PipeEndpoint::new("bad/host", "svc").is_err());
    }

    #[test]
    fn rejects_overlong_names() {
        let long = "a".repeat(MAX_NAME_LEN + 1);
        assert!(validate_pipe_name(&long).is_err());
        assert!(validate_pipe_name(&"a".repeat(MAX_NAME_LEN)).is_ok());
    }

    #[test]
    fn local_endpoint_uses_dot_host() {
        let endpoint = PipeEndpoint::local("svc").unwrap();
        assert_eq!(endpoint.host(), ".");
        assert_eq!(endpoint.name(), "svc");
    }
}
