use std::path::PathBuf;

use banana_contracts::error::{RegistryError, SessionError};
use thiserror::Error;

/// Failures reported by the generation backend. None of these are retried.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("prompt blocked (reason: {reason})")]
    Blocked { reason: String },
    #[error("no response from model; raw response:\n{raw}")]
    Empty { raw: String },
    #[error("model returned no image data")]
    NoImage,
    #[error("request failed: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("backend returned HTTP {status}: {body}")]
    Api { status: u16, body: String },
    #[error("malformed response: {0}")]
    Malformed(String),
}

#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("{0}")]
    InvalidInput(String),
    #[error("{0}")]
    NotFound(String),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("generation failed: {0}")]
    Service(#[from] ServiceError),
    #[error("failed to read input image {}: {source}", .path.display())]
    Input {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write output {}: {source}", .path.display())]
    Output {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// The artifact is on disk but its session is not.
    #[error("saved {} but {source}", .output.display())]
    SessionWrite {
        output: PathBuf,
        #[source]
        source: SessionError,
    },
}

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("{} is not a directory", .path.display())]
    NotADirectory { path: PathBuf },
    #[error("cannot read directory {}: {source}", .path.display())]
    ReadDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
