use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("unknown model \"{name}\" (valid: {})", .valid.join(", "))]
    UnknownModel { name: String, valid: Vec<String> },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("not a PNG file: {0}")]
    NotThisFormat(&'static str),
    #[error("tEXt chunk not found for key: {0}")]
    KeyNotFound(String),
    #[error("invalid tEXt key {0:?}: must be 1-79 bytes without NUL")]
    InvalidKey(String),
}

/// Why a structurally valid document was rejected as a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotASession {
    NotAnObject,
    MissingHistory,
    UnknownField(String),
}

impl std::fmt::Display for NotASession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotAnObject => write!(f, "document is not an object"),
            Self::MissingHistory => write!(f, "missing history field"),
            Self::UnknownField(field) => write!(f, "unknown field \"{field}\""),
        }
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("{} is not a banana session: {reason}", .path.display())]
    NotASession { path: PathBuf, reason: NotASession },
    #[error("{} declares {source}", .path.display())]
    UnknownModel {
        path: PathBuf,
        #[source]
        source: RegistryError,
    },
    #[error(
        "session was created with \"{declared}\" but -m is \"{requested}\"; pass -m {declared} to continue this session"
    )]
    ModelMismatch { declared: String, requested: String },
    #[error("session file {} already exists (use -f to overwrite)", .path.display())]
    AlreadyExists { path: PathBuf },
    #[error("failed to write session {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl SessionError {
    pub fn is_not_a_session(&self) -> bool {
        matches!(self, Self::NotASession { .. })
    }
}

#[derive(Debug, Error)]
pub enum InspectError {
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{} is not a PNG file (metadata is only embedded in PNG output)", .path.display())]
    NotPng { path: PathBuf },
    #[error("no banana metadata found in {}", .path.display())]
    NoRecord { path: PathBuf },
    #[error("failed to parse metadata in {}: {source}", .path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}
