use thiserror::Error;

pub const FALLBACK_UPSTREAM_MESSAGE: &str = "Failed to generate image";

/// Failures surfaced to the person driving a try-on session.
///
/// Every variant renders as a message that can be shown as-is.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TryOnError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Configuration(String),
    #[error("{0}")]
    Upstream(String),
    #[error("No image data found in the response.")]
    NoImageInResponse,
}

impl TryOnError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Builds an upstream failure, falling back to a generic message when the
    /// service gave nothing usable.
    pub fn upstream(message: impl Into<String>) -> Self {
        let message = message.into();
        let trimmed = message.trim();
        if trimmed.is_empty() {
            return Self::Upstream(FALLBACK_UPSTREAM_MESSAGE.to_string());
        }
        Self::Upstream(trimmed.to_string())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Configuration(_) => "configuration",
            Self::Upstream(_) => "upstream",
            Self::NoImageInResponse => "no_image_in_response",
        }
    }
}
