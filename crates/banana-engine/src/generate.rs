use std::fs;
use std::path::{Component, Path, PathBuf};

use banana_contracts::events::{record_optional, EventLog, RunEvent};
use banana_contracts::metadata::{self, MetadataOptions};
use banana_contracts::models::{ModelDefinition, ModelRegistry};
use banana_contracts::png;
use banana_contracts::session::{self, sanitize_for_resume, Part, Role, Session, Turn, Usage};
use tracing::{info, warn};

use crate::error::GenerateError;
use crate::gemini::{extract_result, GenerationRequest, ImageGenerator};
use crate::image_io::{
    ensure_png, extension_of, mime_from_path, INPUT_EXTENSIONS, MAX_INPUT_BYTES,
    OUTPUT_EXTENSIONS,
};

pub const VALID_RATIOS: &[&str] = &[
    "1:1", "2:3", "3:2", "3:4", "4:3", "4:5", "5:4", "9:16", "16:9", "21:9",
];
pub const VALID_SIZES: &[&str] = &["1K", "2K", "4K"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerateOptions {
    pub prompt: String,
    pub output: PathBuf,
    pub inputs: Vec<PathBuf>,
    /// Session to continue from. It is read, never modified.
    pub session: Option<PathBuf>,
    /// Where the new session goes; derived from `output` when unset.
    pub session_out: Option<PathBuf>,
    pub model: String,
    pub ratio: String,
    pub size: Option<String>,
    pub force: bool,
}

impl GenerateOptions {
    pub fn new(prompt: impl Into<String>, output: impl Into<PathBuf>) -> Self {
        Self {
            prompt: prompt.into(),
            output: output.into(),
            inputs: Vec::new(),
            session: None,
            session_out: None,
            model: "flash".to_string(),
            ratio: "1:1".to_string(),
            size: None,
            force: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationOutcome {
    pub output: PathBuf,
    pub output_bytes: u64,
    pub session: PathBuf,
    /// Visible commentary the model returned next to the image.
    pub text: String,
    pub metadata_embedded: bool,
}

/// Everything validation settled before any file is read or written.
#[derive(Debug)]
struct Plan<'a> {
    model: &'a ModelDefinition,
    size: Option<String>,
    session_out: PathBuf,
    input_mimes: Vec<&'static str>,
}

/// Runs one generation: validate, continue the source session if any, call
/// the generator once, then write the artifact and a new session next to it.
pub fn run_generation(
    registry: &ModelRegistry,
    generator: &dyn ImageGenerator,
    options: &GenerateOptions,
    events: Option<&EventLog>,
) -> Result<GenerationOutcome, GenerateError> {
    let result = plan(registry, options).and_then(|plan| {
        record_optional(
            events,
            RunEvent::GenerationStarted {
                model: plan.model.name.clone(),
                output: options.output.display().to_string(),
                session: options
                    .session
                    .as_ref()
                    .map(|path| path.display().to_string()),
            },
        );
        execute(registry, generator, options, &plan, events)
    });
    if let Err(err) = &result {
        record_optional(
            events,
            RunEvent::GenerationFailed {
                error: err.to_string(),
            },
        );
    }
    result
}

fn plan<'a>(
    registry: &'a ModelRegistry,
    options: &GenerateOptions,
) -> Result<Plan<'a>, GenerateError> {
    if options.prompt.trim().is_empty() {
        return Err(GenerateError::InvalidInput("prompt is required".to_string()));
    }
    let model = registry.resolve(&options.model)?;

    if !VALID_RATIOS.contains(&options.ratio.as_str()) {
        return Err(GenerateError::InvalidInput(format!(
            "invalid aspect ratio \"{}\" (valid: {})",
            options.ratio,
            VALID_RATIOS.join(", ")
        )));
    }

    let size = match options.size.as_deref() {
        None => None,
        Some(raw) => {
            let size = raw.trim().to_ascii_uppercase();
            if !VALID_SIZES.contains(&size.as_str()) {
                return Err(GenerateError::InvalidInput(format!(
                    "invalid size \"{raw}\" (valid: 1K, 2K, 4K)"
                )));
            }
            if !model.supports_size(&size) {
                return Err(GenerateError::InvalidInput(format!(
                    "size {size} is not supported by {} (supported: {})",
                    model.name,
                    model.sizes.join(", ")
                )));
            }
            Some(size)
        }
    };

    if options.inputs.len() > model.max_input_images {
        let mut message = format!(
            "{} accepts at most {} input images, got {}",
            model.name,
            model.max_input_images,
            options.inputs.len()
        );
        if model.family == "flash" {
            if let Ok(pro) = registry.resolve("pro") {
                if options.inputs.len() <= pro.max_input_images {
                    message.push_str(&format!(
                        "; use -m pro for up to {}",
                        pro.max_input_images
                    ));
                }
            }
        }
        return Err(GenerateError::InvalidInput(message));
    }

    let input_mimes = options
        .inputs
        .iter()
        .map(|path| check_input(path))
        .collect::<Result<Vec<&'static str>, GenerateError>>()?;

    let session_out = options
        .session_out
        .clone()
        .unwrap_or_else(|| session::derive_path(&options.output));

    if let Some(source) = options.session.as_deref() {
        if same_path(source, &options.output) {
            return Err(GenerateError::InvalidInput(format!(
                "output {} would overwrite the source session",
                options.output.display()
            )));
        }
        if same_path(source, &session_out) {
            return Err(GenerateError::InvalidInput(format!(
                "new session {} would overwrite the source session; pass --session-out or pick another -o",
                session_out.display()
            )));
        }
    }
    if same_path(&session_out, &options.output) {
        return Err(GenerateError::InvalidInput(format!(
            "session and output both point at {}",
            session_out.display()
        )));
    }
    let output_ext = extension_of(&options.output).unwrap_or_default();
    if !OUTPUT_EXTENSIONS.contains(&output_ext.as_str()) {
        return Err(GenerateError::InvalidInput(format!(
            "unsupported output format \"{}\" (use one of: {})",
            options.output.display(),
            OUTPUT_EXTENSIONS.join(", ")
        )));
    }
    check_parent_dir(&options.output)?;
    check_parent_dir(&session_out)?;

    if !options.force {
        for existing in [&options.output, &session_out] {
            if existing.exists() {
                return Err(GenerateError::InvalidInput(format!(
                    "{} already exists (use -f to overwrite)",
                    existing.display()
                )));
            }
        }
    }

    Ok(Plan {
        model,
        size,
        session_out,
        input_mimes,
    })
}

/// Whether two paths name the same file once `.`/`..` and the working
/// directory are resolved. Either file may not exist yet.
fn same_path(a: &Path, b: &Path) -> bool {
    resolve_path(a) == resolve_path(b)
}

fn resolve_path(path: &Path) -> PathBuf {
    if let Ok(resolved) = fs::canonicalize(path) {
        return resolved;
    }
    if let (Some(parent), Some(name)) = (path.parent(), path.file_name()) {
        let parent = if parent.as_os_str().is_empty() {
            Path::new(".")
        } else {
            parent
        };
        if let Ok(dir) = fs::canonicalize(parent) {
            return dir.join(name);
        }
    }
    lexical_clean(path)
}

/// Absolute form of `path` with `.` and `..` folded away, without touching
/// the filesystem beyond reading the working directory.
fn lexical_clean(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };
    let mut cleaned = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                cleaned.pop();
            }
            other => cleaned.push(other.as_os_str()),
        }
    }
    cleaned
}

fn check_input(path: &Path) -> Result<&'static str, GenerateError> {
    let meta = fs::metadata(path).map_err(|_| {
        GenerateError::NotFound(format!("input image not found: {}", path.display()))
    })?;
    let mime = mime_from_path(path).ok_or_else(|| {
        GenerateError::InvalidInput(format!(
            "unsupported input format: {} (use one of: {})",
            path.display(),
            INPUT_EXTENSIONS.join(", ")
        ))
    })?;
    if meta.len() > MAX_INPUT_BYTES {
        return Err(GenerateError::InvalidInput(format!(
            "input image {} is {:.1} MB; the limit is 7 MB",
            path.display(),
            meta.len() as f64 / (1024.0 * 1024.0)
        )));
    }
    Ok(mime)
}

fn check_parent_dir(path: &Path) -> Result<(), GenerateError> {
    let parent = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    if !parent.is_dir() {
        return Err(GenerateError::NotFound(format!(
            "directory does not exist: {}",
            parent.display()
        )));
    }
    Ok(())
}

fn execute(
    registry: &ModelRegistry,
    generator: &dyn ImageGenerator,
    options: &GenerateOptions,
    plan: &Plan<'_>,
    events: Option<&EventLog>,
) -> Result<GenerationOutcome, GenerateError> {
    let model = plan.model;

    let source = match options.session.as_deref() {
        Some(path) => Some(session::load(registry, path, &model.name)?),
        None => None,
    };
    let stored_history = source
        .as_ref()
        .map(|session| session.history.clone())
        .unwrap_or_default();
    let replay = sanitize_for_resume(&stored_history, model.resume_policy);

    let mut parts = vec![Part::text(options.prompt.clone())];
    for (path, mime) in options.inputs.iter().zip(&plan.input_mimes) {
        let bytes = fs::read(path).map_err(|source| GenerateError::Input {
            path: path.clone(),
            source,
        })?;
        parts.push(Part::image(*mime, &bytes));
    }
    let message = Turn::new(Role::User, parts);

    info!(
        generator = generator.name(),
        model = %model.name,
        inputs = options.inputs.len(),
        replayed = replay.len(),
        "generating"
    );
    let reply = generator.generate(&GenerationRequest {
        model_id: model.model_id.clone(),
        history: replay,
        message: message.clone(),
        aspect_ratio: options.ratio.clone(),
        image_size: plan.size.clone(),
    })?;
    let (text, image) = extract_result(&reply.turn)?;

    let mut history = stored_history;
    history.push(message);
    history.push(reply.turn);

    let record = metadata::build(
        &MetadataOptions {
            model: model.name.clone(),
            model_id: model.model_id.clone(),
            ratio: options.ratio.clone(),
            size: plan.size.clone(),
            inputs: options.inputs.clone(),
            session: options.session.clone(),
        },
        &history,
    );
    let (artifact, metadata_embedded) = finish_artifact(&options.output, image, &record);

    fs::write(&options.output, &artifact).map_err(|source| GenerateError::Output {
        path: options.output.clone(),
        source,
    })?;
    record_optional(
        events,
        RunEvent::ArtifactWritten {
            path: options.output.display().to_string(),
            bytes: artifact.len() as u64,
            metadata_embedded,
        },
    );

    let source_usage = source
        .as_ref()
        .and_then(|session| session.usage)
        .unwrap_or_default();
    let new_session = Session {
        model: model.name.clone(),
        size: plan.size.clone(),
        history,
        usage: Some(Usage::combine(source_usage, reply.usage)),
    };
    session::write_new(&plan.session_out, &new_session, options.force).map_err(|source| {
        GenerateError::SessionWrite {
            output: options.output.clone(),
            source,
        }
    })?;
    record_optional(
        events,
        RunEvent::SessionWritten {
            path: plan.session_out.display().to_string(),
            turns: new_session.turn_count(),
        },
    );

    Ok(GenerationOutcome {
        output: options.output.clone(),
        output_bytes: artifact.len() as u64,
        session: plan.session_out.clone(),
        text,
        metadata_embedded,
    })
}

/// Final artifact bytes. PNG outputs are normalized to PNG and carry the
/// metadata record; other formats are written as the backend sent them.
fn finish_artifact(
    output: &Path,
    image: Vec<u8>,
    record: &metadata::MetadataRecord,
) -> (Vec<u8>, bool) {
    let image = if extension_of(output).as_deref() == Some("png") {
        match ensure_png(&image) {
            Ok(converted) => converted,
            Err(err) => {
                warn!("keeping image as returned: {err:#}");
                image
            }
        }
    } else {
        image
    };

    if !png::has_signature(&image) {
        warn!(
            output = %output.display(),
            "output is not PNG; skipping metadata embedding"
        );
        return (image, false);
    }
    match metadata::embed(&image, record) {
        Ok(embedded) => (embedded, true),
        Err(err) => {
            warn!("failed to embed metadata: {err:#}");
            (image, false)
        }
    }
}
