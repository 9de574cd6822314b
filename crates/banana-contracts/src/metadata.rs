use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CodecError, InspectError};
use crate::png;
use crate::session::Turn;

pub const METADATA_VERSION: u32 = 1;
/// Reserved `tEXt` key the record is stored under.
pub const METADATA_KEY: &str = "banana";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataRecord {
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub model_id: String,
    #[serde(default)]
    pub ratio: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub size: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub session: String,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub prompts: Vec<PromptEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptEntry {
    pub role: String,
    pub text: String,
}

/// The run settings a record describes.
#[derive(Debug, Clone, Default)]
pub struct MetadataOptions {
    pub model: String,
    pub model_id: String,
    pub ratio: String,
    pub size: Option<String>,
    pub inputs: Vec<PathBuf>,
    pub session: Option<PathBuf>,
}

/// Assembles the record for one generation. Only file basenames are kept so
/// a shared image does not reveal the local directory layout.
pub fn build(options: &MetadataOptions, history: &[Turn]) -> MetadataRecord {
    let prompts = history
        .iter()
        .filter_map(|turn| {
            let text = turn.visible_text();
            (!text.is_empty()).then(|| PromptEntry {
                role: turn.role.as_str().to_string(),
                text,
            })
        })
        .collect();

    MetadataRecord {
        version: METADATA_VERSION,
        model: options.model.clone(),
        model_id: options.model_id.clone(),
        ratio: options.ratio.clone(),
        size: options.size.clone().unwrap_or_default(),
        inputs: options.inputs.iter().map(|path| basename(path)).collect(),
        session: options
            .session
            .as_deref()
            .map(basename)
            .unwrap_or_default(),
        timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        prompts,
    }
}

/// Human-readable rendering. Fields that were not set for this run are left
/// out instead of printed blank.
pub fn report(record: &MetadataRecord) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "version:   {}", record.version);
    if record.model_id.is_empty() {
        let _ = writeln!(out, "model:     {}", record.model);
    } else {
        let _ = writeln!(out, "model:     {} ({})", record.model, record.model_id);
    }
    if !record.ratio.is_empty() {
        let _ = writeln!(out, "ratio:     {}", record.ratio);
    }
    if !record.size.is_empty() {
        let _ = writeln!(out, "size:      {}", record.size);
    }
    if !record.timestamp.is_empty() {
        let _ = writeln!(out, "timestamp: {}", record.timestamp);
    }
    if !record.inputs.is_empty() {
        let _ = writeln!(out, "inputs:    {}", record.inputs.join(", "));
    }
    if !record.session.is_empty() {
        let _ = writeln!(out, "session:   {}", record.session);
    }
    if !record.prompts.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "prompts:");
        for (idx, prompt) in record.prompts.iter().enumerate() {
            let _ = writeln!(out, "  [{}] {}: {}", idx + 1, prompt.role, prompt.text);
        }
    }
    out
}

/// Stores `record` as JSON in a PNG text chunk.
pub fn embed(data: &[u8], record: &MetadataRecord) -> anyhow::Result<Vec<u8>> {
    let json = serde_json::to_string(record)?;
    Ok(png::set_text(data, METADATA_KEY, &json)?)
}

/// Reads the embedded record back out of an image file.
pub fn inspect(path: &Path) -> Result<MetadataRecord, InspectError> {
    let data = std::fs::read(path).map_err(|source| InspectError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    extract(&data).map_err(|err| match err {
        ExtractError::Codec(CodecError::NotThisFormat(_)) => InspectError::NotPng {
            path: path.to_path_buf(),
        },
        ExtractError::Codec(CodecError::KeyNotFound(_) | CodecError::InvalidKey(_)) => {
            InspectError::NoRecord {
                path: path.to_path_buf(),
            }
        }
        ExtractError::Decode(source) => InspectError::Decode {
            path: path.to_path_buf(),
            source,
        },
    })
}

#[derive(Debug)]
enum ExtractError {
    Codec(CodecError),
    Decode(serde_json::Error),
}

fn extract(data: &[u8]) -> Result<MetadataRecord, ExtractError> {
    let raw = png::get_text(data, METADATA_KEY).map_err(ExtractError::Codec)?;
    serde_json::from_str(&raw).map_err(ExtractError::Decode)
}

fn basename(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string_lossy().to_string())
}
