//! Wire messages exchanged by sync sessions.
//!
//! Every message is a single JSON object tagged by `cmd`:
//!
//! ```json
//! {"cmd":"checkToken","token":"..."}
//! {"cmd":"requestFiles","files":[{"path":"a.txt","modTime":1,"contentHash":[...]}]}
//! {"cmd":"writeFile","name":"a.txt","data":"aGk="}
//! {"cmd":"deleteFile","name":"a.txt"}
//! ```
//!
//! File contents travel as standard base64 strings.

use crate::catalog::FileCatalog;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Maximum message size (50MB) to prevent memory exhaustion from malicious peers.
pub const MAX_MESSAGE_SIZE: usize = 50 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Malformed message: {0}")]
    Malformed(String),

    #[error("Message exceeds max size ({size} > {max})")]
    TooLarge { size: usize, max: usize },

    #[error("Unexpected {0} message")]
    Unexpected(Command),

    #[error("Path escapes the sync root: {0:?}")]
    UnsafePath(String),

    #[error("Failed to encode message: {0}")]
    Encode(String),
}

pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Command tag of a [`SyncMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    CheckToken,
    RequestFiles,
    WriteFile,
    DeleteFile,
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Command::CheckToken => "checkToken",
            Command::RequestFiles => "requestFiles",
            Command::WriteFile => "writeFile",
            Command::DeleteFile => "deleteFile",
        };
        f.write_str(name)
    }
}

/// Messages exchanged during sync
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "camelCase")]
pub enum SyncMessage {
    /// First message from the initiator: authenticate the session
    CheckToken { token: String },

    /// "Here is my catalog; send me what I'm missing"
    RequestFiles { files: FileCatalog },

    /// Create or overwrite a file
    WriteFile {
        name: String,
        #[serde(default, with = "base64_bytes")]
        data: Vec<u8>,
    },

    /// Remove a file
    DeleteFile { name: String },
}

impl SyncMessage {
    pub fn check_token(token: impl Into<String>) -> Self {
        SyncMessage::CheckToken {
            token: token.into(),
        }
    }

    pub fn request_files(files: FileCatalog) -> Self {
        SyncMessage::RequestFiles { files }
    }

    pub fn write_file(name: impl Into<String>, data: Vec<u8>) -> Self {
        SyncMessage::WriteFile {
            name: name.into(),
            data,
        }
    }

    pub fn delete_file(name: impl Into<String>) -> Self {
        SyncMessage::DeleteFile { name: name.into() }
    }

    pub fn command(&self) -> Command {
        match self {
            SyncMessage::CheckToken { .. } => Command::CheckToken,
            SyncMessage::RequestFiles { .. } => Command::RequestFiles,
            SyncMessage::WriteFile { .. } => Command::WriteFile,
            SyncMessage::DeleteFile { .. } => Command::DeleteFile,
        }
    }

    /// Serialize to JSON bytes.
    ///
    /// Fails with [`ProtocolError::TooLarge`] when the result would be
    /// rejected by the receiving side's [`SyncMessage::decode`].
    pub fn encode(&self) -> Result<Vec<u8>> {
        let bytes = serde_json::to_vec(self).map_err(|e| ProtocolError::Encode(e.to_string()))?;
        if bytes.len() > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::TooLarge {
                size: bytes.len(),
                max: MAX_MESSAGE_SIZE,
            });
        }
        Ok(bytes)
    }

    /// Parse a message received from a peer.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::TooLarge {
                size: data.len(),
                max: MAX_MESSAGE_SIZE,
            });
        }
        serde_json::from_slice(data).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }
}

mod base64_bytes {
    use base64::{Engine, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

/// Validate a path received from a peer before touching the filesystem.
///
/// Accepts `/`-separated relative paths only: no leading slash, no
/// backslashes, no empty, `.` or `..` segments, no drive prefixes.
pub fn safe_relative_path(name: &str) -> Result<&str> {
    let unsafe_path = name.is_empty()
        || name.starts_with('/')
        || name.contains('\\')
        || name.split('/').next().is_some_and(is_drive_prefix)
        || name
            .split('/')
            .any(|segment| segment.is_empty() || segment == "." || segment == "..");

    if unsafe_path {
        Err(ProtocolError::UnsafePath(name.to_string()))
    } else {
        Ok(name)
    }
}

fn is_drive_prefix(segment: &str) -> bool {
    segment.len() == 2 && segment.ends_with(':')
}
