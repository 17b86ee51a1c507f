use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageRole {
    Person,
    Clothing,
}

impl ImageRole {
    pub const ALL: [ImageRole; 2] = [ImageRole::Person, ImageRole::Clothing];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Person => "person",
            Self::Clothing => "clothing",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "person" | "model" | "1" => Some(Self::Person),
            "clothing" | "garment" | "outfit" | "2" => Some(Self::Clothing),
            _ => None,
        }
    }
}

impl fmt::Display for ImageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Handle to the file an image slot was filled from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFile {
    pub path: PathBuf,
    pub name: String,
    pub size_bytes: u64,
}

/// One intake slot's contents.
///
/// `preview` and `base64` both hold the full data URL and are always set or
/// cleared together.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageState {
    pub file: Option<SourceFile>,
    pub preview: Option<String>,
    pub base64: Option<String>,
    pub mime_type: String,
}

impl ImageState {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn loaded(file: Option<SourceFile>, mime_type: impl Into<String>, data_url: String) -> Self {
        Self {
            file,
            preview: Some(data_url.clone()),
            base64: Some(data_url),
            mime_type: mime_type.into(),
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.base64
            .as_deref()
            .map(|value| !value.is_empty())
            .unwrap_or(false)
    }

    pub fn data_url(&self) -> Option<&str> {
        self.base64.as_deref().filter(|value| !value.is_empty())
    }

    pub fn file_name(&self) -> Option<&str> {
        self.file.as_ref().map(|file| file.name.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessingStatus {
    #[default]
    Idle,
    Uploading,
    Generating,
    Success,
    Error,
}

impl ProcessingStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Uploading => "UPLOADING",
            Self::Generating => "GENERATING",
            Self::Success => "SUCCESS",
            Self::Error => "ERROR",
        }
    }
}

impl fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
