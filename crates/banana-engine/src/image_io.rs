use std::io::Cursor;
use std::path::Path;

use anyhow::{Context, Result};
use banana_contracts::png;
use image::ImageFormat;

/// Inline request payloads above this are rejected before any network call.
pub const MAX_INPUT_BYTES: u64 = 7 * 1024 * 1024;

pub const INPUT_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp", "heic", "heif"];
pub const OUTPUT_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp"];

pub fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
}

/// MIME type sent with an input image, by extension.
pub fn mime_from_path(path: &Path) -> Option<&'static str> {
    match extension_of(path)?.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "heic" => Some("image/heic"),
        "heif" => Some("image/heif"),
        _ => None,
    }
}

/// PNG bytes for `data`. Data that already is PNG is returned untouched;
/// anything else is decoded and re-encoded.
pub fn ensure_png(data: &[u8]) -> Result<Vec<u8>> {
    if png::has_signature(data) {
        return Ok(data.to_vec());
    }
    let decoded = image::load_from_memory(data).context("failed to decode generated image")?;
    let mut out = Cursor::new(Vec::new());
    decoded
        .write_to(&mut out, ImageFormat::Png)
        .context("failed to re-encode generated image as PNG")?;
    Ok(out.into_inner())
}
