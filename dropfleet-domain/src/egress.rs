//! Egress points (outbound proxies).

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::value_objects::DomainError;

/// An outbound proxy a worker's requests are routed through.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EgressPoint {
    /// Proxy scheme (`http` or `https`)
    pub scheme: String,
    /// Proxy host
    pub host: String,
    /// Proxy port
    pub port: u16,
    /// Optional basic-auth username
    pub username: Option<String>,
    /// Optional basic-auth password
    pub password: Option<String>,
}

impl EgressPoint {
    /// Parse one inventory line of the form `host:port:username:password`.
    ///
    /// # Errors
    /// Returns `DomainError::InvalidEgressPoint` when the line does not have
    /// exactly four fields or the port is not a number.
    pub fn parse_line(scheme: &str, line: &str) -> Result<Self, DomainError> {
        let parts: Vec<&str> = line.trim().split(':').map(str::trim).collect();
        let [host, port, username, password] = parts.as_slice() else {
            return Err(DomainError::InvalidEgressPoint(format!(
                "expected host:port:user:pass, got {} fields",
                parts.len()
            )));
        };

        let port = port
            .parse::<u16>()
            .map_err(|_| DomainError::InvalidEgressPoint(format!("bad port: {}", port)))?;

        Ok(Self {
            scheme: scheme.to_string(),
            host: host.to_string(),
            port,
            username: Some(username.to_string()).filter(|u| !u.is_empty()),
            password: Some(password.to_string()).filter(|p| !p.is_empty()),
        })
    }

    /// Parse a whole inventory, skipping malformed lines.
    pub fn parse_list(scheme: &str, text: &str) -> Vec<Self> {
        text.lines()
            .filter_map(|line| Self::parse_line(scheme, line).ok())
            .collect()
    }

    /// Proxy URL without credentials (credentials are applied separately).
    pub fn url(&self) -> String {
        format!("{}://{}:{}", self.scheme, self.host, self.port)
    }
}

impl fmt::Debug for EgressPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EgressPoint")
            .field("scheme", &self.scheme)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for EgressPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_line() {
        let point = EgressPoint::parse_line("http", "10.0.0.1:8080:alice:s3cret").unwrap();
        assert_eq!(point.host, "10.0.0.1");
        assert_eq!(point.port, 8080);
        assert_eq!(point.username.as_deref(), Some("alice"));
        assert_eq!(point.url(), "http://10.0.0.1:8080");
    }

    #[test]
    fn test_parse_list_skips_malformed_lines() {
        let text = "a.example:1:u:p\nbroken line\nb.example:notaport:u:p\n\nc.example:3:u:p\n";
        let points = EgressPoint::parse_list("http", text);
        let hosts: Vec<_> = points.iter().map(|p| p.host.as_str()).collect();
        assert_eq!(hosts, vec!["a.example", "c.example"]);
    }

    #[test]
    fn test_debug_hides_password() {
        let point = EgressPoint::parse_line("http", "h:1:u:hunter2").unwrap();
        assert!(!format!("{:?}", point).contains("hunter2"));
    }
}
