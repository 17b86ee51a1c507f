use anyhow::{anyhow, Context};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

pub const DEFAULT_IMAGE_MIME: &str = "image/png";

const DATA_PREFIX: &str = "data:";
const BASE64_MARKER: &str = ";base64,";

/// Borrowed view over a `data:<mime>;base64,<payload>` string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataUrl<'a> {
    pub mime_type: &'a str,
    pub payload: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedDataUrl {
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

/// Splits a data URL into MIME type and base64 payload.
///
/// The MIME segment extends to the last `;base64,` marker that still leaves a
/// non-empty payload, so parameters such as `image/png;name=a` stay part of
/// the MIME segment. Returns `None` for anything else, including raw base64.
pub fn parse_data_url(raw: &str) -> Option<DataUrl<'_>> {
    let rest = raw.strip_prefix(DATA_PREFIX)?;
    if rest.contains(['\n', '\r']) {
        return None;
    }
    rest.rmatch_indices(BASE64_MARKER)
        .map(|(idx, _)| DataUrl {
            mime_type: &rest[..idx],
            payload: &rest[idx + BASE64_MARKER.len()..],
        })
        .find(|parts| !parts.mime_type.is_empty() && !parts.payload.is_empty())
}

/// Returns the raw base64 payload of a data URL, or the input unchanged when
/// it is not one.
pub fn strip_data_url_header(raw: &str) -> &str {
    parse_data_url(raw)
        .map(|parts| parts.payload)
        .unwrap_or(raw)
}

pub fn wrap_base64(mime_type: &str, payload: &str) -> String {
    format!("{DATA_PREFIX}{mime_type}{BASE64_MARKER}{payload}")
}

pub fn encode_data_url(mime_type: &str, bytes: &[u8]) -> String {
    wrap_base64(mime_type, &BASE64.encode(bytes))
}

pub fn decode_data_url(raw: &str) -> anyhow::Result<DecodedDataUrl> {
    let parts = parse_data_url(raw).ok_or_else(|| anyhow!("value is not a base64 data URL"))?;
    let bytes = BASE64
        .decode(parts.payload.as_bytes())
        .context("data URL payload is not valid base64")?;
    Ok(DecodedDataUrl {
        mime_type: parts.mime_type.to_string(),
        bytes,
    })
}

/// Picks the MIME type to send for an inline image.
///
/// The caller's declared type wins; a blank one falls back to the data URL
/// header, then to `image/png`.
pub fn resolve_mime_type(declared: &str, data_url: &str) -> String {
    let declared = declared.trim();
    if !declared.is_empty() {
        return declared.to_string();
    }
    parse_data_url(data_url)
        .map(|parts| parts.mime_type.to_string())
        .unwrap_or_else(|| DEFAULT_IMAGE_MIME.to_string())
}
