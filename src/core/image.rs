//! Image finalization and persistence
//!
//! Strips the IEEE 488.2 definite-length block envelope that several SCPI
//! binary queries wrap around their payload, and hands the clean buffer to
//! the image codec library for re-encoding. Decode failures fall back to
//! writing the raw bytes; a captured screen is never thrown away over a
//! malformed envelope or an unrecognized pixel format.

use bytes::Bytes;
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Envelope found around the received image bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnvelopeKind {
    /// Bare image bytes
    #[default]
    None,
    /// IEEE 488.2 definite-length binary block, `#<N><N digits><payload>`
    IeeeBlock,
}

/// A validated screen image ready for persistence
#[derive(Debug, Clone)]
pub struct ImageBlob {
    /// Image bytes with any envelope removed
    pub bytes: Bytes,
    /// Envelope that was removed, if any
    pub envelope: EnvelopeKind,
}

impl ImageBlob {
    /// Strip any block envelope off `raw` and record what was found.
    pub fn finalize(raw: Bytes) -> Self {
        match parse_block_header(&raw) {
            Some(payload) => Self {
                bytes: Bytes::copy_from_slice(payload),
                envelope: EnvelopeKind::IeeeBlock,
            },
            None => Self {
                bytes: raw,
                envelope: EnvelopeKind::None,
            },
        }
    }
}

/// Parse an IEEE definite-length block header and return the exact payload
/// it declares, or `None` when the buffer is not a well-formed block.
fn parse_block_header(data: &[u8]) -> Option<&[u8]> {
    if data.first() != Some(&b'#') {
        return None;
    }
    let n_digits = (*data.get(1)? as char).to_digit(10)? as usize;
    if n_digits == 0 {
        return None;
    }
    let digits = data.get(2..2 + n_digits)?;
    if !digits.iter().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let count: usize = std::str::from_utf8(digits).ok()?.parse().ok()?;
    data.get(2 + n_digits..2 + n_digits + count)
}

/// Remove an IEEE block header if present; on any parse inconsistency the
/// input is returned unchanged, never an error.
pub fn strip_block_header(data: &[u8]) -> &[u8] {
    parse_block_header(data).unwrap_or(data)
}

/// Insert a `_YYYYMMDD_HHMMSS` timestamp between the file stem and
/// extension of `template`.
pub fn timestamped_path(template: &Path, now: DateTime<Local>) -> PathBuf {
    let stamp = now.format("%Y%m%d_%H%M%S");
    let stem = template
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "capture".to_string());
    let name = match template.extension() {
        Some(ext) => format!("{stem}_{stamp}.{}", ext.to_string_lossy()),
        None => format!("{stem}_{stamp}"),
    };
    match template.parent() {
        Some(parent) if parent != Path::new("") => parent.join(name),
        _ => PathBuf::from(name),
    }
}

/// Persistence failure
#[derive(Error, Debug)]
pub enum PersistError {
    /// Filesystem error writing the image
    #[error("cannot write image: {0}")]
    Io(#[from] std::io::Error),
}

/// Where and what was written
#[derive(Debug, Clone)]
pub struct PersistedImage {
    /// Final file path, which may differ from the requested one when the
    /// raw-byte fallback forces a `.bmp` extension
    pub path: PathBuf,
    /// Bytes written to disk
    pub bytes_written: usize,
    /// Pixel dimensions when the codec could decode the image
    pub dimensions: Option<(u32, u32)>,
}

/// Decode `blob` and re-encode it to the format implied by `path`'s
/// extension. When the codec cannot decode the bytes, the raw buffer is
/// written with a `.bmp` extension instead.
pub fn persist(blob: &ImageBlob, path: &Path) -> Result<PersistedImage, PersistError> {
    if let Some(parent) = path.parent() {
        if parent != Path::new("") {
            std::fs::create_dir_all(parent)?;
        }
    }

    let preview_len = blob.bytes.len().min(16);
    debug!(
        bytes = blob.bytes.len(),
        header = %hex::encode(&blob.bytes[..preview_len]),
        "persisting image"
    );

    match image::load_from_memory(&blob.bytes) {
        Ok(img) => match img.save(path) {
            Ok(()) => {
                let written = std::fs::metadata(path)
                    .map(|m| m.len() as usize)
                    .unwrap_or(blob.bytes.len());
                info!(path = %path.display(), width = img.width(), height = img.height(), "screenshot saved");
                return Ok(PersistedImage {
                    path: path.to_path_buf(),
                    bytes_written: written,
                    dimensions: Some((img.width(), img.height())),
                });
            }
            Err(e) => warn!(error = %e, "re-encode failed, saving raw bytes"),
        },
        Err(e) => warn!(error = %e, "image decode failed, saving raw bytes"),
    }

    // Raw fallback: the bytes are almost always a BMP straight off the scope
    let raw_path = if path.extension().is_some_and(|e| e.eq_ignore_ascii_case("bmp")) {
        path.to_path_buf()
    } else {
        path.with_extension("bmp")
    };
    std::fs::write(&raw_path, &blob.bytes)?;
    info!(path = %raw_path.display(), bytes = blob.bytes.len(), "raw image saved");
    Ok(PersistedImage {
        path: raw_path,
        bytes_written: blob.bytes.len(),
        dimensions: None,
    })
}
