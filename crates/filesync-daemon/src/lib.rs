//! filesync-daemon library: the native side of directory sync.
//!
//! This is a thin library layer over the daemon components,
//! allowing integration tests to drive servers and clients directly.

pub mod client;
pub mod config;
pub mod connection;
pub mod native_fs;
pub mod server;
pub mod session;

// Re-export key types for convenience
pub use client::run_client;
pub use config::{ConfigError, Endpoint, SyncConfig};
pub use connection::WsTransport;
pub use native_fs::NativeFs;
pub use server::SyncServer;
pub use session::{Role, SessionConfig, SessionEnd, SyncSession};
