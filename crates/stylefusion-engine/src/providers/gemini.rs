use std::error::Error as _;
use std::time::Duration;

use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Value};
use stylefusion_contracts::data_url::{wrap_base64, DEFAULT_IMAGE_MIME};
use stylefusion_contracts::TryOnError;
use tracing::{debug, warn};

use super::{map_object, InlineImage, ProviderOutput, TryOnProvider, TryOnRequest};
use crate::config::EngineConfig;

const MISSING_API_KEY_MESSAGE: &str =
    "Gemini API key not configured (set GEMINI_API_KEY, GOOGLE_API_KEY or API_KEY)";
const ERROR_BODY_MAX_CHARS: usize = 512;

/// Adapter for the Gemini `generateContent` endpoint.
///
/// Sends one request per call: the prompt followed by the person and the
/// clothing image as inline parts. No retries.
pub struct GeminiProvider {
    api_base: String,
    api_key: Option<String>,
    http: HttpClient,
}

impl GeminiProvider {
    pub fn new(
        api_key: Option<String>,
        api_base: impl Into<String>,
        request_timeout: Option<Duration>,
    ) -> Self {
        let mut builder = HttpClient::builder();
        if let Some(timeout) = request_timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build().unwrap_or_else(|_| HttpClient::new());
        Self::with_client(api_key, api_base, http)
    }

    pub fn with_client(
        api_key: Option<String>,
        api_base: impl Into<String>,
        http: HttpClient,
    ) -> Self {
        Self {
            api_base: api_base.into().trim().trim_end_matches('/').to_string(),
            api_key: api_key
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty()),
            http,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(
            config.api_key.clone(),
            config.api_base.clone(),
            config.request_timeout,
        )
    }

    fn endpoint_for_model(&self, model: &str) -> String {
        let trimmed = model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:generateContent", self.api_base, model_path)
    }

    fn inline_part(image: &InlineImage) -> Value {
        json!({
            "inlineData": {
                "mimeType": image.resolved_mime_type(),
                "data": image.payload(),
            }
        })
    }

    fn build_payload(request: &TryOnRequest) -> Value {
        json!({
            "contents": [{
                "role": "user",
                "parts": [
                    { "text": request.prompt },
                    Self::inline_part(&request.person),
                    Self::inline_part(&request.clothing),
                ],
            }],
        })
    }

    /// First inline image of the first candidate, as a data URL.
    fn extract_first_image(response: &Value) -> Result<String, TryOnError> {
        let parts = response
            .get("candidates")
            .and_then(Value::as_array)
            .and_then(|candidates| candidates.first())
            .and_then(|candidate| candidate.get("content"))
            .and_then(|content| content.get("parts"))
            .and_then(Value::as_array)
            .ok_or(TryOnError::NoImageInResponse)?;

        parts
            .iter()
            .find_map(|part| {
                let inline = part.get("inlineData").or_else(|| part.get("inline_data"))?;
                let data = inline
                    .get("data")
                    .and_then(Value::as_str)
                    .filter(|data| !data.is_empty())?;
                let mime_type = inline
                    .get("mimeType")
                    .or_else(|| inline.get("mime_type"))
                    .and_then(Value::as_str)
                    .map(str::trim)
                    .filter(|mime| !mime.is_empty())
                    .unwrap_or(DEFAULT_IMAGE_MIME);
                Some(wrap_base64(mime_type, data))
            })
            .ok_or(TryOnError::NoImageInResponse)
    }

    fn upstream_error_message(code: u16, body: &str) -> String {
        let service_message = serde_json::from_str::<Value>(body)
            .ok()
            .and_then(|parsed| {
                parsed
                    .get("error")
                    .and_then(|error| error.get("message"))
                    .and_then(Value::as_str)
                    .map(str::trim)
                    .filter(|message| !message.is_empty())
                    .map(str::to_string)
            });
        if let Some(message) = service_message {
            return message;
        }
        let body = body.trim();
        if body.is_empty() {
            return format!("Gemini request failed ({code})");
        }
        format!(
            "Gemini request failed ({code}): {}",
            truncate_text(body, ERROR_BODY_MAX_CHARS)
        )
    }

    // Text the model sent instead of an image, for diagnostics only.
    fn response_text_hint(response: &Value) -> Option<String> {
        let candidate = response
            .get("candidates")
            .and_then(Value::as_array)
            .and_then(|candidates| candidates.first());
        let text = candidate
            .and_then(|candidate| candidate.get("content"))
            .and_then(|content| content.get("parts"))
            .and_then(Value::as_array)
            .and_then(|parts| {
                parts
                    .iter()
                    .find_map(|part| part.get("text").and_then(Value::as_str))
            })
            .map(|text| truncate_text(text.trim(), 160));
        let reason = candidate
            .and_then(|candidate| candidate.get("finishReason"))
            .or_else(|| {
                response
                    .get("promptFeedback")
                    .and_then(|feedback| feedback.get("blockReason"))
            })
            .and_then(Value::as_str);
        match (text, reason) {
            (Some(text), Some(reason)) => Some(format!("{reason}: {text}")),
            (Some(text), None) => Some(text),
            (None, Some(reason)) => Some(reason.to_string()),
            (None, None) => None,
        }
    }
}

impl TryOnProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    fn generate(&self, request: &TryOnRequest) -> Result<ProviderOutput, TryOnError> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(TryOnError::Configuration(
                MISSING_API_KEY_MESSAGE.to_string(),
            ));
        };
        let endpoint = self.endpoint_for_model(&request.model);
        let payload = Self::build_payload(request);
        debug!(
            endpoint = %endpoint,
            person_mime = %request.person.resolved_mime_type(),
            clothing_mime = %request.clothing.resolved_mime_type(),
            "sending Gemini try-on request"
        );

        let response = self
            .http
            .post(&endpoint)
            .query(&[("key", api_key)])
            .json(&payload)
            .send()
            .map_err(|err| {
                let message = transport_error_message(err);
                warn!(error = %message, "Gemini transport failure");
                TryOnError::upstream(message)
            })?;

        let status = response.status();
        let body = response
            .text()
            .map_err(|err| TryOnError::upstream(transport_error_message(err)))?;
        if !status.is_success() {
            let message = Self::upstream_error_message(status.as_u16(), &body);
            warn!(status = status.as_u16(), error = %message, "Gemini request rejected");
            return Err(TryOnError::upstream(message));
        }

        let parsed: Value = serde_json::from_str(&body)
            .map_err(|_| TryOnError::upstream("Gemini returned invalid JSON payload"))?;
        let image = Self::extract_first_image(&parsed).inspect_err(|_| {
            warn!(
                hint = Self::response_text_hint(&parsed).unwrap_or_default(),
                "Gemini response carried no inline image"
            );
        })?;

        Ok(ProviderOutput {
            image,
            provider_request: map_object(json!({
                "endpoint": endpoint,
                "payload": payload,
            })),
            provider_response: map_object(json!({
                "status": status.as_u16(),
                "candidates": parsed
                    .get("candidates")
                    .and_then(Value::as_array)
                    .map(|rows| rows.len())
                    .unwrap_or(0),
                "model_version": parsed.get("modelVersion").cloned().unwrap_or(Value::Null),
                "usage_metadata": parsed.get("usageMetadata").cloned().unwrap_or(Value::Null),
            })),
        })
    }
}

// The request URL carries the key as a query parameter, so it is stripped
// before the error is rendered.
fn transport_error_message(err: reqwest::Error) -> String {
    let err = err.without_url();
    let mut parts = vec![err.to_string()];
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if parts.last() != Some(&text) && !text.trim().is_empty() {
            parts.push(text);
        }
        source = cause.source();
    }
    parts.join(": ")
}

fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}
