//! Validated daemon configuration.

use crate::session::{Role, SessionConfig};
use filesync_core::SharedSecret;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Default interval between initiator cycles.
pub const DEFAULT_CYCLE: Duration = Duration::from_secs(3);

/// Default WebSocket endpoint path (without the leading slash).
pub const DEFAULT_PATH: &str = "echo";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Sync root does not exist: {0}")]
    RootMissing(PathBuf),

    #[error("Sync root is not a directory: {0}")]
    RootNotDirectory(PathBuf),

    #[error("Token must not be empty")]
    EmptyToken,

    #[error("Cycle interval must be greater than zero")]
    ZeroCycle,
}

/// Where this process meets its peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// Accept connections on `addr`, upgrading only requests for `/path`
    Listen { addr: String, path: String },
    /// Dial `url`
    Connect { url: String },
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub root: PathBuf,
    pub secret: SharedSecret,
    pub cycle: Duration,
    pub endpoint: Endpoint,
}

impl SyncConfig {
    /// Build and validate a config.
    pub fn new(
        root: PathBuf,
        token: &str,
        cycle: Duration,
        endpoint: Endpoint,
    ) -> Result<Self, ConfigError> {
        let config = Self {
            root,
            secret: SharedSecret::new(token),
            cycle,
            endpoint,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.root.exists() {
            return Err(ConfigError::RootMissing(self.root.clone()));
        }
        if !self.root.is_dir() {
            return Err(ConfigError::RootNotDirectory(self.root.clone()));
        }
        if self.secret.as_str().is_empty() {
            return Err(ConfigError::EmptyToken);
        }
        if self.cycle.is_zero() {
            return Err(ConfigError::ZeroCycle);
        }
        Ok(())
    }

    pub fn role(&self) -> Role {
        match self.endpoint {
            Endpoint::Listen { .. } => Role::Responder,
            Endpoint::Connect { .. } => Role::Initiator,
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            role: self.role(),
            secret: self.secret.clone(),
            cycle: self.cycle,
        }
    }
}

/// Normalize a user-supplied endpoint path to `/path` form.
pub fn endpoint_path(path: &str) -> String {
    format!("/{}", path.trim_start_matches('/'))
}

/// URL the initiator dials, e.g. `ws://localhost:8088/echo`.
pub fn endpoint_url(addr: &str, path: &str) -> String {
    format!("ws://{}{}", addr, endpoint_path(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn listen() -> Endpoint {
        Endpoint::Listen {
            addr: "localhost:8088".to_string(),
            path: endpoint_path(DEFAULT_PATH),
        }
    }

    #[test]
    fn test_valid_config() {
        let dir = TempDir::new().unwrap();
        let config = SyncConfig::new(dir.path().to_path_buf(), "XXXXXXX", DEFAULT_CYCLE, listen())
            .unwrap();

        assert_eq!(config.role(), Role::Responder);
        let session = config.session_config();
        assert_eq!(session.role, Role::Responder);
        assert!(session.secret.verify("XXXXXXX"));
        assert_eq!(session.cycle, Duration::from_secs(3));
    }

    #[test]
    fn test_connect_is_initiator() {
        let dir = TempDir::new().unwrap();
        let endpoint = Endpoint::Connect {
            url: endpoint_url("localhost:8088", "echo"),
        };
        let config =
            SyncConfig::new(dir.path().to_path_buf(), "t", DEFAULT_CYCLE, endpoint).unwrap();
        assert_eq!(config.role(), Role::Initiator);
    }

    #[test]
    fn test_rejects_missing_root() {
        let dir = TempDir::new().unwrap();
        let err = SyncConfig::new(dir.path().join("nope"), "t", DEFAULT_CYCLE, listen()).unwrap_err();
        assert!(matches!(err, ConfigError::RootMissing(_)));
    }

    #[test]
    fn test_rejects_file_root() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("file.txt");
        std::fs::write(&file, b"x").unwrap();

        let err = SyncConfig::new(file, "t", DEFAULT_CYCLE, listen()).unwrap_err();
        assert!(matches!(err, ConfigError::RootNotDirectory(_)));
    }

    #[test]
    fn test_rejects_empty_token_and_zero_cycle() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().to_path_buf();

        assert!(matches!(
            SyncConfig::new(root.clone(), "", DEFAULT_CYCLE, listen()),
            Err(ConfigError::EmptyToken)
        ));
        assert!(matches!(
            SyncConfig::new(root, "t", Duration::ZERO, listen()),
            Err(ConfigError::ZeroCycle)
        ));
    }

    #[test]
    fn test_endpoint_url() {
        assert_eq!(endpoint_path("echo"), "/echo");
        assert_eq!(endpoint_path("/echo"), "/echo");
        assert_eq!(endpoint_url("localhost:8088", "echo"), "ws://localhost:8088/echo");
        assert_eq!(endpoint_url("127.0.0.1:9", "/a/b"), "ws://127.0.0.1:9/a/b");
    }
}
