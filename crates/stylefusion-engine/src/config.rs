use std::env;
use std::fmt;
use std::time::Duration;

pub const DEFAULT_GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Checked in order; the first non-empty value wins.
pub const API_KEY_ENV_VARS: &[&str] = &["GEMINI_API_KEY", "GOOGLE_API_KEY", "API_KEY"];

/// Settings injected into the engine and its providers.
///
/// Nothing below the CLI reads the process environment; build this once with
/// [`EngineConfig::from_env`] and pass it down.
#[derive(Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub api_key: Option<String>,
    pub api_base: String,
    pub model: Option<String>,
    pub request_timeout: Option<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: DEFAULT_GEMINI_API_BASE.to_string(),
            model: None,
            request_timeout: None,
        }
    }
}

impl fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("api_base", &self.api_base)
            .field("model", &self.model)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let read = |key: &str| non_empty(lookup(key));
        let api_key = API_KEY_ENV_VARS.iter().find_map(|key| read(*key));
        let api_base = read("GEMINI_API_BASE")
            .map(|value| value.trim_end_matches('/').to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| DEFAULT_GEMINI_API_BASE.to_string());
        let request_timeout = read("STYLEFUSION_REQUEST_TIMEOUT_SECS")
            .and_then(|value| value.parse::<f64>().ok())
            .and_then(timeout_from_secs);
        Self {
            api_key,
            api_base,
            model: read("STYLEFUSION_MODEL"),
            request_timeout,
        }
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = non_empty(api_key);
        self
    }

    pub fn with_model(mut self, model: Option<String>) -> Self {
        if let Some(model) = non_empty(model) {
            self.model = Some(model);
        }
        self
    }

    pub fn with_timeout_secs(mut self, secs: Option<f64>) -> Self {
        if let Some(timeout) = secs.and_then(timeout_from_secs) {
            self.request_timeout = Some(timeout);
        }
        self
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn timeout_from_secs(secs: f64) -> Option<Duration> {
    if secs.is_finite() && secs > 0.0 {
        Some(Duration::from_secs_f64(secs))
    } else {
        None
    }
}
