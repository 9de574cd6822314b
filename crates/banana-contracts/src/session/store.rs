use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::schema::{decode_session, DecodeError, Role, Session, Strictness, Turn};
use crate::error::{RegistryError, SessionError};
use crate::models::ModelRegistry;

pub const SESSION_SUFFIX: &str = ".session.json";

/// What a validated session file looks like from the outside.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub model: String,
    pub turns: usize,
    pub bytes: u64,
}

impl SessionInfo {
    pub fn model_label(&self) -> &str {
        if self.model.is_empty() {
            "legacy"
        } else {
            &self.model
        }
    }
}

/// The one place the output ↔ session filename relationship lives:
/// `dir/cat.png` pairs with `dir/cat.session.json`.
pub fn derive_path(output: &Path) -> PathBuf {
    output.with_extension(&SESSION_SUFFIX[1..])
}

pub fn read(path: &Path) -> Result<(Session, u64), SessionError> {
    read_with(path, Strictness::Lenient)
}

/// Like [`read`], but rejects documents with fields outside the session
/// schema and sessions naming a model the registry does not know.
pub fn validate(registry: &ModelRegistry, path: &Path) -> Result<SessionInfo, SessionError> {
    let (session, bytes) = read_with(path, Strictness::Strict)?;
    if !session.model.is_empty() && !registry.is_known(&session.model) {
        return Err(SessionError::UnknownModel {
            path: path.to_path_buf(),
            source: RegistryError::UnknownModel {
                name: session.model,
                valid: registry.valid_names(),
            },
        });
    }
    Ok(SessionInfo {
        turns: session.turn_count(),
        model: session.model,
        bytes,
    })
}

/// Reads a session for continuation with the canonical model `requested`.
/// The history comes back exactly as stored; replay filtering is the
/// caller's job.
pub fn load(
    registry: &ModelRegistry,
    path: &Path,
    requested: &str,
) -> Result<Session, SessionError> {
    let (session, _) = read(path)?;
    if session.model.is_empty() {
        debug!(path = %path.display(), "legacy session without model; skipping compatibility check");
        return Ok(session);
    }
    if !registry.is_compatible(&session.model, requested) {
        return Err(SessionError::ModelMismatch {
            declared: session.model,
            requested: requested.to_string(),
        });
    }
    Ok(session)
}

/// Writes `session` as a new file. An existing file is only replaced when
/// `overwrite` is set.
pub fn write_new(path: &Path, session: &Session, overwrite: bool) -> Result<(), SessionError> {
    let payload = serde_json::to_vec_pretty(session).map_err(|err| SessionError::Write {
        path: path.to_path_buf(),
        source: err.into(),
    })?;

    let mut options = OpenOptions::new();
    options.write(true);
    if overwrite {
        options.create(true).truncate(true);
    } else {
        options.create_new(true);
    }
    let mut file = options.open(path).map_err(|source| {
        if source.kind() == std::io::ErrorKind::AlreadyExists {
            SessionError::AlreadyExists {
                path: path.to_path_buf(),
            }
        } else {
            SessionError::Write {
                path: path.to_path_buf(),
                source,
            }
        }
    })?;
    file.write_all(&payload)
        .map_err(|source| SessionError::Write {
            path: path.to_path_buf(),
            source,
        })
}

/// Session files directly inside `dir`, sorted by name. The listing is a
/// snapshot taken once; files created afterwards are not picked up.
pub fn list_session_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name();
        if name.to_string_lossy().ends_with(SESSION_SUFFIX) {
            paths.push(entry.path());
        }
    }
    paths.sort();
    Ok(paths)
}

/// Model-authored turns, in order.
pub fn model_turns(history: &[Turn]) -> impl Iterator<Item = &Turn> {
    history
        .iter()
        .filter(|turn| turn.role == Role::Model)
}

fn read_with(path: &Path, strictness: Strictness) -> Result<(Session, u64), SessionError> {
    let io_err = |source| SessionError::Io {
        path: path.to_path_buf(),
        source,
    };
    let bytes = std::fs::metadata(path).map_err(io_err)?.len();
    let raw = std::fs::read(path).map_err(io_err)?;
    let session = decode_session(&raw, strictness).map_err(|err| match err {
        DecodeError::Syntax(source) | DecodeError::Shape(source) => SessionError::Parse {
            path: path.to_path_buf(),
            source,
        },
        DecodeError::NotASession(reason) => SessionError::NotASession {
            path: path.to_path_buf(),
            reason,
        },
    })?;
    Ok((session, bytes))
}
