//! filesync-core: Shared Rust library for bidirectional directory sync.
//!
//! This crate provides the runtime-agnostic pieces of the sync protocol:
//! - Catalogs of a directory tree with cached content hashes
//! - Reconciliation of two catalogs into push and delete sets
//! - The wire message format exchanged between peers
//! - FileSystem and Transport trait abstractions

pub mod auth;
pub mod catalog;
pub mod error;
pub mod fs;
pub mod hash;
pub mod protocol;
pub mod reconcile;
pub mod transport;

pub use auth::SharedSecret;
pub use catalog::{CatalogBuilder, FileCatalog, FileDescriptor};
pub use error::SyncError;
pub use fs::{FileEntry, FileStat, FileSystem, FsError, InMemoryFs};
pub use hash::{ContentHash, Fingerprint, HashCache};
pub use protocol::{Command, MAX_MESSAGE_SIZE, ProtocolError, SyncMessage};
pub use reconcile::{files_to_delete, files_to_push};
pub use transport::{MemoryTransport, Transport, TransportError};
