//! Runtime configuration for a NetView server or client.

use crate::error::{NetViewError, NetViewResult};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// What happens when an object registers the same method name twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateMethodPolicy {
    /// Fail the second registration with `DuplicateMethod`.
    #[default]
    Reject,
    /// The later registration replaces the earlier one.
    Overwrite,
}

/// Top-level configuration, usually loaded from `~/.netview/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetConfig {
    /// Display name sent to the server during the handshake.
    pub nickname: String,
    /// Address the server listens on.
    pub listen_addr: SocketAddr,
    /// Address a client connects to.
    pub server_addr: SocketAddr,
    /// Maximum number of simultaneous client connections.
    pub max_connections: usize,
    /// Pre-shared key for the HMAC-authenticated handshake.
    pub shared_secret: String,
    /// Run the server without a network listener.
    pub offline_mode: bool,
    /// Whether newly registered objects accept client ownership requests.
    pub allow_client_authority_override: bool,
    /// Handling of duplicate method names on one object.
    pub duplicate_methods: DuplicateMethodPolicy,
    /// Number of recent dispatch failures kept for inspection.
    pub diagnostics_capacity: usize,
    /// Default tracing filter when `RUST_LOG` is unset.
    pub log_level: String,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            nickname: "player".to_string(),
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 7777)),
            server_addr: SocketAddr::from(([127, 0, 0, 1], 7777)),
            max_connections: 16,
            shared_secret: String::new(),
            offline_mode: false,
            allow_client_authority_override: true,
            duplicate_methods: DuplicateMethodPolicy::Reject,
            diagnostics_capacity: 256,
            log_level: "info".to_string(),
        }
    }
}

impl NetConfig {
    /// Reject values the runtime cannot work with.
    pub fn validate(&self) -> NetViewResult<()> {
        if self.max_connections == 0 {
            return Err(NetViewError::Config(
                "max_connections must be at least 1".to_string(),
            ));
        }
        if self.diagnostics_capacity == 0 {
            return Err(NetViewError::Config(
                "diagnostics_capacity must be at least 1".to_string(),
            ));
        }
        if self.nickname.trim().is_empty() {
            return Err(NetViewError::Config("nickname must not be empty".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = NetConfig::default();
        assert_eq!(config.max_connections, 16);
        assert!(config.allow_client_authority_override);
        assert_eq!(config.duplicate_methods, DuplicateMethodPolicy::Reject);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: NetConfig = toml::from_str(
            r#"
            nickname = "alice"
            max_connections = 4
            duplicate_methods = "overwrite"
            "#,
        )
        .unwrap();
        assert_eq!(config.nickname, "alice");
        assert_eq!(config.max_connections, 4);
        assert_eq!(config.duplicate_methods, DuplicateMethodPolicy::Overwrite);
        assert_eq!(config.diagnostics_capacity, 256);
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let config = NetConfig {
            max_connections: 0,
            ..NetConfig::default()
        };
        assert!(matches!(config.validate(), Err(NetViewError::Config(_))));
    }
}
