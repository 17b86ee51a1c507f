use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use sha2::{Digest, Sha256};
use stylefusion_contracts::data_url::{decode_data_url, DEFAULT_IMAGE_MIME};
use stylefusion_contracts::runs::receipts::InputFingerprint;
use stylefusion_contracts::session::ImageRole;

use crate::providers::InlineImage;

pub const ARTIFACT_PREFIX: &str = "stylefusion-tryon";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedArtifact {
    pub image_path: PathBuf,
    pub receipt_path: Option<PathBuf>,
    pub mime_type: String,
    pub bytes: u64,
}

pub fn extension_for_mime(mime_type: &str) -> &'static str {
    let base = mime_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    match base.as_str() {
        "image/jpeg" | "image/jpg" => "jpg",
        "image/webp" => "webp",
        "image/gif" => "gif",
        "image/bmp" => "bmp",
        "image/tiff" => "tiff",
        "image/avif" => "avif",
        "image/heic" => "heic",
        _ => "png",
    }
}

/// `stylefusion-tryon-<stamp>.<ext>`; `stamp` is unix millis at save time.
pub fn artifact_file_name(stamp: i64, mime_type: &str) -> String {
    format!("{ARTIFACT_PREFIX}-{stamp}.{}", extension_for_mime(mime_type))
}

/// Decodes `data_url` and writes it under `dir`. Never overwrites an
/// existing file; a clashing stamp gets a numeric suffix.
pub fn save_data_url(data_url: &str, dir: &Path, stamp: i64) -> anyhow::Result<SavedArtifact> {
    let decoded = decode_data_url(data_url).context("result is not a decodable data URL")?;
    let mime_type = if decoded.mime_type.trim().is_empty() {
        DEFAULT_IMAGE_MIME.to_string()
    } else {
        decoded.mime_type
    };
    fs::create_dir_all(dir)
        .with_context(|| format!("failed to create output dir {}", dir.display()))?;

    let mut image_path = dir.join(artifact_file_name(stamp, &mime_type));
    let mut attempt = 1;
    while image_path.exists() {
        image_path = dir.join(format!(
            "{ARTIFACT_PREFIX}-{stamp}-{attempt}.{}",
            extension_for_mime(&mime_type)
        ));
        attempt += 1;
    }
    fs::write(&image_path, &decoded.bytes)
        .with_context(|| format!("failed to write {}", image_path.display()))?;

    Ok(SavedArtifact {
        image_path,
        receipt_path: None,
        mime_type,
        bytes: decoded.bytes.len() as u64,
    })
}

pub fn receipt_path_for(image_path: &Path) -> PathBuf {
    image_path.with_extension("json")
}

/// Digest of the decoded input bytes, or of the payload text when it is not
/// valid base64.
pub fn fingerprint(role: ImageRole, image: &InlineImage) -> InputFingerprint {
    let payload = image.payload();
    let bytes = BASE64
        .decode(payload.as_bytes())
        .unwrap_or_else(|_| payload.as_bytes().to_vec());
    InputFingerprint {
        role: role.as_str().to_string(),
        file_name: image.file_name.clone(),
        mime_type: image.resolved_mime_type(),
        sha256: hex::encode(Sha256::digest(&bytes)),
        bytes: bytes.len() as u64,
    }
}
