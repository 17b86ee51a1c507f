use std::collections::BTreeMap;

use serde_json::{Map, Value};
use stylefusion_contracts::data_url::{resolve_mime_type, strip_data_url_header};
use stylefusion_contracts::models::DEFAULT_TRY_ON_MODEL;
use stylefusion_contracts::session::ImageState;
use stylefusion_contracts::TryOnError;

use crate::config::EngineConfig;
use crate::prompt::TRY_ON_PROMPT;

mod dryrun;
mod gemini;

pub use dryrun::DryrunProvider;
pub use gemini::GeminiProvider;

/// One image as handed to a provider: the caller's MIME type plus the data
/// URL read at intake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineImage {
    pub mime_type: String,
    pub data_url: String,
    pub file_name: Option<String>,
}

impl InlineImage {
    pub fn new(mime_type: impl Into<String>, data_url: impl Into<String>) -> Self {
        Self {
            mime_type: mime_type.into(),
            data_url: data_url.into(),
            file_name: None,
        }
    }

    pub fn from_state(state: &ImageState) -> Option<Self> {
        let data_url = state.data_url()?;
        Some(Self {
            mime_type: state.mime_type.clone(),
            data_url: data_url.to_string(),
            file_name: state.file_name().map(str::to_string),
        })
    }

    /// Raw base64 payload; inputs that are already raw pass through.
    pub fn payload(&self) -> &str {
        strip_data_url_header(&self.data_url)
    }

    pub fn resolved_mime_type(&self) -> String {
        resolve_mime_type(&self.mime_type, &self.data_url)
    }
}

/// Snapshot of both inputs taken when generation starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TryOnRequest {
    pub person: InlineImage,
    pub clothing: InlineImage,
    pub model: String,
    pub prompt: String,
}

impl TryOnRequest {
    pub fn new(person: InlineImage, clothing: InlineImage) -> Self {
        Self {
            person,
            clothing,
            model: DEFAULT_TRY_ON_MODEL.to_string(),
            prompt: TRY_ON_PROMPT.to_string(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProviderOutput {
    /// Generated image as a data URL.
    pub image: String,
    pub provider_request: Map<String, Value>,
    pub provider_response: Map<String, Value>,
}

pub trait TryOnProvider: Send + Sync {
    fn name(&self) -> &str;
    fn generate(&self, request: &TryOnRequest) -> Result<ProviderOutput, TryOnError>;
}

#[derive(Default)]
pub struct ProviderRegistry {
    providers: BTreeMap<String, Box<dyn TryOnProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<P: TryOnProvider + 'static>(&mut self, provider: P) {
        self.providers
            .insert(provider.name().to_string(), Box::new(provider));
    }

    pub fn get(&self, name: &str) -> Option<&dyn TryOnProvider> {
        self.providers.get(name).map(|provider| provider.as_ref())
    }

    pub fn names(&self) -> Vec<String> {
        self.providers.keys().cloned().collect()
    }
}

pub fn default_provider_registry(config: &EngineConfig) -> ProviderRegistry {
    let mut providers = ProviderRegistry::new();
    providers.register(DryrunProvider);
    providers.register(GeminiProvider::from_config(config));
    providers
}

pub(crate) fn map_object(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use stylefusion_contracts::session::{ImageState, SourceFile};

    use super::*;

    #[test]
    fn inline_image_from_state_keeps_declared_mime_and_file_name() {
        let state = ImageState::loaded(
            Some(SourceFile {
                path: "/tmp/me.jpg".into(),
                name: "me.jpg".to_string(),
                size_bytes: 3,
            }),
            "image/jpeg",
            "data:image/jpeg;base64,Zm9v".to_string(),
        );
        let image = InlineImage::from_state(&state).unwrap();
        assert_eq!(image.payload(), "Zm9v");
        assert_eq!(image.resolved_mime_type(), "image/jpeg");
        assert_eq!(image.file_name.as_deref(), Some("me.jpg"));
        assert!(InlineImage::from_state(&ImageState::empty()).is_none());
    }

    #[test]
    fn request_defaults_to_flash_image_and_fixed_prompt() {
        let request = TryOnRequest::new(
            InlineImage::new("image/png", "Zm9v"),
            InlineImage::new("image/png", "YmFy"),
        );
        assert_eq!(request.model, DEFAULT_TRY_ON_MODEL);
        assert!(request.prompt.starts_with("Perform a high-quality virtual try-on."));
        assert_eq!(
            request.with_model("gemini-3-pro-image-preview").model,
            "gemini-3-pro-image-preview"
        );
    }

    #[test]
    fn default_registry_includes_gemini_and_dryrun() {
        let providers = default_provider_registry(&EngineConfig::default());
        assert_eq!(providers.names(), vec!["dryrun", "gemini"]);
        assert!(providers.get("imagen").is_none());
    }
}
