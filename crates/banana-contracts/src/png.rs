//! Minimal PNG chunk walker for embedding `tEXt` records.
//!
//! Only the chunk framing is understood: a big-endian length, a four byte
//! type, the payload and a CRC-32 over type + payload. Pixel data is never
//! decoded, so inserting a record leaves the image itself untouched.

use crate::error::CodecError;

pub const SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

const TEXT_CHUNK: &[u8; 4] = b"tEXt";
// length + type
const CHUNK_HEADER_LEN: usize = 8;
const CRC_LEN: usize = 4;
const MAX_KEY_LEN: usize = 79;

pub fn has_signature(data: &[u8]) -> bool {
    data.starts_with(&SIGNATURE)
}

/// Returns a copy of `data` with a `key NUL value` text chunk spliced in
/// right after the header chunk. Bytes before and after the insertion point
/// are preserved.
pub fn set_text(data: &[u8], key: &str, value: &str) -> Result<Vec<u8>, CodecError> {
    // the key ends at the first NUL, so one inside it could never be read back
    if key.is_empty() || key.len() > MAX_KEY_LEN || key.contains('\0') {
        return Err(CodecError::InvalidKey(key.to_string()));
    }
    if !has_signature(data) {
        return Err(CodecError::NotThisFormat("missing PNG signature"));
    }
    let Some(header_len) = read_u32(data, SIGNATURE.len()) else {
        return Err(CodecError::NotThisFormat("PNG too short"));
    };
    let insert_at = (header_len as usize)
        .checked_add(SIGNATURE.len() + CHUNK_HEADER_LEN + CRC_LEN)
        .filter(|end| *end <= data.len())
        .ok_or(CodecError::NotThisFormat("PNG header chunk extends beyond data"))?;

    let mut payload = Vec::with_capacity(key.len() + 1 + value.len());
    payload.extend_from_slice(key.as_bytes());
    payload.push(0);
    payload.extend_from_slice(value.as_bytes());
    let chunk = encode_chunk(TEXT_CHUNK, &payload);

    let mut out = Vec::with_capacity(data.len() + chunk.len());
    out.extend_from_slice(&data[..insert_at]);
    out.extend_from_slice(&chunk);
    out.extend_from_slice(&data[insert_at..]);
    Ok(out)
}

/// Value of the first text chunk whose key equals `key`.
///
/// A chunk whose declared length runs past the end of the buffer ends the
/// scan, so truncated files report `KeyNotFound` rather than reading out of
/// bounds.
pub fn get_text(data: &[u8], key: &str) -> Result<String, CodecError> {
    if !has_signature(data) {
        return Err(CodecError::NotThisFormat("missing PNG signature"));
    }

    let mut offset = SIGNATURE.len();
    while offset + CHUNK_HEADER_LEN <= data.len() {
        let Some(length) = read_u32(data, offset) else {
            break;
        };
        let payload_start = offset + CHUNK_HEADER_LEN;
        let Some(chunk_end) = (length as usize)
            .checked_add(payload_start + CRC_LEN)
            .filter(|end| *end <= data.len())
        else {
            break;
        };

        if &data[offset + 4..payload_start] == TEXT_CHUNK {
            let payload = &data[payload_start..payload_start + length as usize];
            if let Some(split) = payload.iter().position(|byte| *byte == 0) {
                if &payload[..split] == key.as_bytes() {
                    return Ok(String::from_utf8_lossy(&payload[split + 1..]).into_owned());
                }
            }
        }
        offset = chunk_end;
    }

    Err(CodecError::KeyNotFound(key.to_string()))
}

/// Frames `payload` as a chunk of `kind`, CRC included.
pub fn encode_chunk(kind: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(kind);
    hasher.update(payload);

    let mut chunk = Vec::with_capacity(CHUNK_HEADER_LEN + payload.len() + CRC_LEN);
    chunk.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    chunk.extend_from_slice(kind);
    chunk.extend_from_slice(payload);
    chunk.extend_from_slice(&hasher.finalize().to_be_bytes());
    chunk
}

fn read_u32(data: &[u8], offset: usize) -> Option<u32> {
    let bytes = data.get(offset..offset + 4)?;
    Some(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}
