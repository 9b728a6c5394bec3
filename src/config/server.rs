// ABOUTME: Deployment target addressing for SSH connections.
// ABOUTME: Parses formats like "host", "user@host", "host:port", "user@host:port".

use serde::Deserialize;
use std::path::PathBuf;

/// Target as written in the config file; the user may still be missing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub user: Option<String>,
    /// Private key used for SSH and rsync.
    #[serde(default)]
    pub key: Option<PathBuf>,
}

fn default_port() -> u16 {
    22
}

impl ServerConfig {
    pub fn parse(s: &str) -> Result<Self, String> {
        let s = s.trim();
        if s.is_empty() {
            return Err("server address cannot be empty".to_string());
        }

        // Parse format: [user@]host[:port]
        let (user_part, rest) = if let Some(at_pos) = s.find('@') {
            (Some(&s[..at_pos]), &s[at_pos + 1..])
        } else {
            (None, s)
        };

        let (host, port) = if let Some(colon_pos) = rest.rfind(':') {
            let port_str = &rest[colon_pos + 1..];
            let port = port_str
                .parse::<u16>()
                .map_err(|_| format!("invalid port: {}", port_str))?;
            (&rest[..colon_pos], port)
        } else {
            (rest, 22)
        };

        if host.is_empty() {
            return Err("hostname cannot be empty".to_string());
        }
        if user_part == Some("") {
            return Err("user cannot be empty".to_string());
        }

        Ok(ServerConfig {
            host: host.to_string(),
            port,
            user: user_part.map(|s| s.to_string()),
            key: None,
        })
    }
}

/// `server:` accepts either a string or a mapping.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ServerEntry {
    Simple(String),
    Detailed(ServerConfig),
}

impl ServerEntry {
    pub fn into_server_config(self) -> Result<ServerConfig, String> {
        match self {
            ServerEntry::Simple(s) => ServerConfig::parse(&s),
            ServerEntry::Detailed(c) => Ok(c),
        }
    }
}

/// Fully resolved SSH target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTarget {
    pub host: String,
    pub port: u16,
    pub user: String,
    /// Credential handle: path to the private key. None means agent or default keys.
    pub key_path: Option<PathBuf>,
}

impl RemoteTarget {
    pub fn new(host: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: 22,
            user: user.into(),
            key_path: None,
        }
    }
}

impl std::fmt::Display for RemoteTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}:{}", self.user, self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_simple_host() {
        let server = ServerConfig::parse("example.com").unwrap();
        assert_eq!(server.host, "example.com");
        assert_eq!(server.port, 22);
        assert!(server.user.is_none());
    }

    #[test]
    fn parse_full_format() {
        let server = ServerConfig::parse("deploy@example.com:2222").unwrap();
        assert_eq!(server.host, "example.com");
        assert_eq!(server.port, 2222);
        assert_eq!(server.user, Some("deploy".to_string()));
    }

    #[test]
    fn parse_rejects_bad_input() {
        assert!(ServerConfig::parse("").is_err());
        assert!(ServerConfig::parse("example.com:ssh").is_err());
        assert!(ServerConfig::parse("@example.com").is_err());
        assert!(ServerConfig::parse("deploy@:22").is_err());
    }

    #[test]
    fn target_displays_as_ssh_address() {
        let mut target = RemoteTarget::new("203.0.113.7", "deploy");
        target.port = 2222;
        assert_eq!(target.to_string(), "deploy@203.0.113.7:2222");
    }
}
