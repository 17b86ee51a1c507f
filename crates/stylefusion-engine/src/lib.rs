pub mod artifacts;
pub mod config;
pub mod intake;
pub mod prompt;
pub mod providers;
pub mod session;

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, Result};
use chrono::{SecondsFormat, Utc};
use serde_json::{json, Map, Value};
use stylefusion_contracts::events::{EventPayload, EventWriter};
use stylefusion_contracts::models::{ModelSelector, ModelSpec, TRY_ON_CAPABILITY};
use stylefusion_contracts::runs::receipts::{build_receipt, write_receipt, TryOnReceiptRequest};
use stylefusion_contracts::runs::summary::{write_summary, SessionSummary};
use stylefusion_contracts::session::{ImageRole, ImageState};
use stylefusion_contracts::TryOnError;
use tracing::{info, warn};

use crate::artifacts::{fingerprint, receipt_path_for, save_data_url, SavedArtifact};
use crate::config::EngineConfig;
use crate::intake::spawn_load;
use crate::providers::{default_provider_registry, map_object, ProviderRegistry, TryOnRequest};
use crate::session::TryOnSession;

/// What the last successful generation sent and received; feeds receipts.
#[derive(Debug, Clone)]
struct LastExchange {
    provider: String,
    model: String,
    request: TryOnRequest,
    provider_request: Map<String, Value>,
    provider_response: Map<String, Value>,
    fallback_reason: Option<String>,
    latency_ms: u64,
}

#[derive(Debug, Clone, Copy, Default)]
struct GenerationStats {
    started: u64,
    succeeded: u64,
    failed: u64,
}

/// A try-on session bound to an output directory and an events log.
pub struct TryOnEngine {
    out_dir: PathBuf,
    session_id: String,
    events: EventWriter,
    summary_path: PathBuf,
    started_at: String,
    model_selector: ModelSelector,
    model: Option<String>,
    providers: ProviderRegistry,
    session: TryOnSession,
    stats: GenerationStats,
    artifacts: Vec<PathBuf>,
    last_exchange: Option<LastExchange>,
    last_fallback_reason: Option<String>,
}

impl TryOnEngine {
    pub fn new(
        out_dir: impl Into<PathBuf>,
        events_path: impl Into<PathBuf>,
        config: &EngineConfig,
    ) -> Result<Self> {
        Self::with_providers(
            out_dir,
            events_path,
            config.model.clone(),
            default_provider_registry(config),
        )
    }

    pub fn with_providers(
        out_dir: impl Into<PathBuf>,
        events_path: impl Into<PathBuf>,
        model: Option<String>,
        providers: ProviderRegistry,
    ) -> Result<Self> {
        let out_dir = out_dir.into();
        std::fs::create_dir_all(&out_dir)?;
        let session_id = format!("session-{}", uuid::Uuid::new_v4().simple());
        let events = EventWriter::new(events_path.into(), session_id.clone());

        events.emit(
            "session_started",
            map_object(json!({
                "out_dir": out_dir.to_string_lossy().to_string(),
                "model": model,
                "providers": providers.names(),
            })),
        )?;
        info!(session_id = %session_id, out_dir = %out_dir.display(), "try-on session started");

        Ok(Self {
            summary_path: out_dir.join("summary.json"),
            out_dir,
            session_id,
            events,
            started_at: now_utc_iso(),
            model_selector: ModelSelector::new(None),
            model,
            providers,
            session: TryOnSession::new(),
            stats: GenerationStats::default(),
            artifacts: Vec::new(),
            last_exchange: None,
            last_fallback_reason: None,
        })
    }

    pub fn session(&self) -> &TryOnSession {
        &self.session
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    pub fn events_path(&self) -> &Path {
        self.events.path()
    }

    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    pub fn set_model(&mut self, model: Option<String>) {
        self.model = model
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());
    }

    pub fn last_fallback_reason(&self) -> Option<&str> {
        self.last_fallback_reason.as_deref()
    }

    /// Models able to perform a try-on, default first.
    pub fn list_models(&self) -> Vec<ModelSpec> {
        self.model_selector
            .registry
            .by_capability(TRY_ON_CAPABILITY)
    }

    /// Reads `path` on a worker thread and commits it into the `role` slot.
    pub fn load_image(&mut self, role: ImageRole, path: &Path) -> Result<(), TryOnError> {
        let ticket = self.session.begin_upload(role);
        let loaded = spawn_load(path).wait();
        match self.session.finish_upload(ticket, loaded) {
            Ok(applied) => {
                let state = self.session.image(role);
                self.record(
                    "image_loaded",
                    map_object(json!({
                        "role": role.as_str(),
                        "path": path.to_string_lossy().to_string(),
                        "file_name": state.file_name(),
                        "mime_type": state.mime_type,
                        "bytes": state.file.as_ref().map(|file| file.size_bytes),
                        "applied": applied,
                    })),
                );
                Ok(())
            }
            Err(err) => {
                warn!(role = %role, path = %path.display(), error = %err, "image rejected");
                self.record(
                    "image_rejected",
                    map_object(json!({
                        "role": role.as_str(),
                        "path": path.to_string_lossy().to_string(),
                        "error": err.to_string(),
                    })),
                );
                Err(err)
            }
        }
    }

    pub fn remove_image(&mut self, role: ImageRole) {
        self.session.remove(role);
        self.record("image_removed", map_object(json!({ "role": role.as_str() })));
    }

    /// Runs one try-on with the current images and model.
    ///
    /// Returns the generated data URL. Every failure after the guard is also
    /// stored on the session and moves it to ERROR.
    pub fn generate(&mut self) -> Result<String, TryOnError> {
        let selection = self
            .model_selector
            .select(self.model.as_deref(), TRY_ON_CAPABILITY)
            .map_err(TryOnError::Configuration)?;
        let model = selection.model;
        let fallback_reason = selection.fallback_reason;
        if let Some(reason) = fallback_reason.as_deref() {
            if self.model.is_some() {
                warn!(reason, model = %model.name, "model fallback");
            }
        }
        self.last_fallback_reason = fallback_reason.clone();

        let ticket = match self.session.begin_generation(&model.name) {
            Ok(ticket) => ticket,
            Err(err) => {
                self.record(
                    "generation_failed",
                    map_object(json!({
                        "model": model.name,
                        "started": false,
                        "kind": err.kind(),
                        "error": err.to_string(),
                    })),
                );
                return Err(err);
            }
        };
        self.stats.started += 1;
        self.record(
            "generation_started",
            map_object(json!({
                "model": model.name,
                "provider": model.provider,
                "fallback_reason": fallback_reason,
                "person_mime_type": ticket.request.person.resolved_mime_type(),
                "clothing_mime_type": ticket.request.clothing.resolved_mime_type(),
            })),
        );

        let started = Instant::now();
        let outcome = match self.providers.get(&model.provider) {
            Some(provider) => provider.generate(&ticket.request),
            None => Err(TryOnError::Configuration(format!(
                "No provider registered for '{}'",
                model.provider
            ))),
        };
        let latency_ms = started.elapsed().as_millis() as u64;

        let image = outcome
            .as_ref()
            .map(|output| output.image.clone())
            .map_err(|err| err.clone());
        if !self.session.complete_generation(&ticket, image.clone()) {
            return image;
        }

        match outcome {
            Ok(output) => {
                self.stats.succeeded += 1;
                info!(model = %model.name, latency_ms, "try-on generated");
                self.record(
                    "generation_succeeded",
                    map_object(json!({
                        "model": model.name,
                        "provider": model.provider,
                        "latency_ms": latency_ms,
                        "image_bytes_b64": output.image.len(),
                    })),
                );
                self.last_exchange = Some(LastExchange {
                    provider: model.provider.clone(),
                    model: model.name.clone(),
                    request: ticket.request,
                    provider_request: output.provider_request,
                    provider_response: output.provider_response,
                    fallback_reason,
                    latency_ms,
                });
            }
            Err(err) => {
                self.stats.failed += 1;
                warn!(model = %model.name, kind = err.kind(), error = %err, "try-on failed");
                self.record(
                    "generation_failed",
                    map_object(json!({
                        "model": model.name,
                        "provider": model.provider,
                        "started": true,
                        "kind": err.kind(),
                        "error": err.to_string(),
                        "latency_ms": latency_ms,
                    })),
                );
                self.last_exchange = None;
            }
        }
        image
    }

    /// Writes the current result (and a receipt beside it) to `dir`, or to
    /// the output directory when `dir` is `None`.
    pub fn save_result(&mut self, dir: Option<&Path>) -> Result<SavedArtifact> {
        let Some(data_url) = self.session.result() else {
            bail!("No generated image to save.");
        };
        let dir = dir.unwrap_or(&self.out_dir).to_path_buf();
        let stamp = Utc::now().timestamp_millis();
        let mut saved = save_data_url(data_url, &dir, stamp)?;

        if let Some(exchange) = &self.last_exchange {
            let receipt_path = receipt_path_for(&saved.image_path);
            let request = TryOnReceiptRequest {
                provider: exchange.provider.clone(),
                model: exchange.model.clone(),
                prompt: exchange.request.prompt.clone(),
                inputs: vec![
                    fingerprint(ImageRole::Person, &exchange.request.person),
                    fingerprint(ImageRole::Clothing, &exchange.request.clothing),
                ],
                fallback_reason: exchange.fallback_reason.clone(),
            };
            let metadata = map_object(json!({
                "session_id": self.session_id,
                "mime_type": saved.mime_type,
                "bytes": saved.bytes,
                "latency_ms": exchange.latency_ms,
            }));
            let receipt = build_receipt(
                &request,
                &exchange.provider_request,
                &exchange.provider_response,
                &saved.image_path,
                &receipt_path,
                &metadata,
            );
            write_receipt(&receipt_path, &receipt)?;
            saved.receipt_path = Some(receipt_path);
        }

        self.events.emit(
            "artifact_saved",
            map_object(json!({
                "image_path": saved.image_path.to_string_lossy().to_string(),
                "receipt_path": saved
                    .receipt_path
                    .as_ref()
                    .map(|path| path.to_string_lossy().to_string()),
                "mime_type": saved.mime_type,
                "bytes": saved.bytes,
            })),
        )?;
        self.artifacts.push(saved.image_path.clone());
        Ok(saved)
    }

    pub fn reset(&mut self) {
        self.session.reset();
        self.last_exchange = None;
        self.record("session_reset", EventPayload::new());
    }

    pub fn status_report(&self) -> Map<String, Value> {
        let slot = |state: &ImageState| {
            json!({
                "loaded": state.is_loaded(),
                "file_name": state.file_name(),
                "mime_type": state.mime_type,
            })
        };
        map_object(json!({
            "session_id": self.session_id,
            "status": self.session.status().as_str(),
            "model": self.model,
            "person": slot(self.session.image(ImageRole::Person)),
            "clothing": slot(self.session.image(ImageRole::Clothing)),
            "can_generate": self.session.can_generate(),
            "has_result": self.session.result().is_some(),
            "error": self.session.error(),
            "artifacts": self.artifacts.len(),
        }))
    }

    pub fn finish(&mut self) -> Result<PathBuf> {
        let summary = SessionSummary {
            session_id: self.session_id.clone(),
            started_at: self.started_at.clone(),
            finished_at: now_utc_iso(),
            generations_started: self.stats.started,
            generations_succeeded: self.stats.succeeded,
            generations_failed: self.stats.failed,
            final_status: self.session.status().as_str().to_string(),
            artifacts: self
                .artifacts
                .iter()
                .map(|path| path.to_string_lossy().to_string())
                .collect(),
        };
        let extra = map_object(json!({ "model": self.model }));
        write_summary(&self.summary_path, &summary, Some(&extra))?;
        self.events.emit(
            "session_finished",
            map_object(json!({
                "summary_path": self.summary_path.to_string_lossy().to_string(),
            })),
        )?;
        Ok(self.summary_path.clone())
    }

    // Event write failures are logged, never returned.
    fn record(&self, event_type: &str, payload: EventPayload) {
        if let Err(err) = self.events.emit(event_type, payload) {
            warn!(event_type, error = %err, "failed to write event");
        }
    }
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::io::Cursor;
    use std::path::Path;

    use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
    use serde_json::Value;
    use stylefusion_contracts::session::{ImageRole, ProcessingStatus};
    use stylefusion_contracts::TryOnError;

    use super::providers::{DryrunProvider, GeminiProvider, ProviderRegistry};
    use super::session::MISSING_IMAGES_MESSAGE;
    use super::TryOnEngine;

    fn write_png(path: &Path, width: u32, height: u32, pixel: [u8; 4]) -> anyhow::Result<()> {
        let image = DynamicImage::ImageRgba8(RgbaImage::from_pixel(width, height, Rgba(pixel)));
        let mut out = Cursor::new(Vec::new());
        image.write_to(&mut out, ImageFormat::Png)?;
        fs::write(path, out.into_inner())?;
        Ok(())
    }

    fn dryrun_engine(out_dir: &Path) -> anyhow::Result<TryOnEngine> {
        let mut providers = ProviderRegistry::new();
        providers.register(DryrunProvider);
        TryOnEngine::with_providers(
            out_dir,
            out_dir.join("events.jsonl"),
            Some("dryrun-tryon-1".to_string()),
            providers,
        )
    }

    fn event_types(path: &Path) -> anyhow::Result<Vec<String>> {
        let raw = fs::read_to_string(path)?;
        Ok(raw
            .lines()
            .filter_map(|line| serde_json::from_str::<Value>(line).ok())
            .filter_map(|row| row.get("type").and_then(Value::as_str).map(str::to_string))
            .collect())
    }

    fn load_both(engine: &mut TryOnEngine, dir: &Path) -> anyhow::Result<()> {
        let person = dir.join("person.png");
        let clothing = dir.join("shirt.png");
        write_png(&person, 12, 12, [200, 10, 10, 255])?;
        write_png(&clothing, 4, 4, [10, 10, 200, 255])?;
        engine.load_image(ImageRole::Person, &person)?;
        engine.load_image(ImageRole::Clothing, &clothing)?;
        Ok(())
    }

    #[test]
    fn engine_generates_saves_and_summarizes() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let out_dir = temp.path().join("out");
        let mut engine = dryrun_engine(&out_dir)?;
        load_both(&mut engine, temp.path())?;
        assert!(engine.session().can_generate());

        let image = engine.generate()?;
        assert!(image.starts_with("data:image/png;base64,"));
        assert_eq!(engine.session().status(), ProcessingStatus::Success);

        let saved = engine.save_result(None)?;
        assert!(saved.image_path.starts_with(&out_dir));
        assert!(saved
            .image_path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.starts_with("stylefusion-tryon-") && name.ends_with(".png")));
        let receipt_path = saved.receipt_path.clone().unwrap_or_default();
        let receipt: Value = serde_json::from_str(&fs::read_to_string(&receipt_path)?)?;
        assert_eq!(receipt["request"]["model"], Value::from("dryrun-tryon-1"));
        assert_eq!(receipt["request"]["inputs"][0]["role"], Value::from("person"));
        assert_eq!(receipt["request"]["inputs"][1]["file_name"], Value::from("shirt.png"));

        let summary_path = engine.finish()?;
        let summary: Value = serde_json::from_str(&fs::read_to_string(summary_path)?)?;
        assert_eq!(summary["generations_succeeded"], Value::from(1));
        assert_eq!(summary["final_status"], Value::from("SUCCESS"));

        let types = event_types(&out_dir.join("events.jsonl"))?;
        let position = |name: &str| types.iter().position(|value| value == name);
        assert_eq!(position("session_started"), Some(0));
        assert!(position("image_loaded") < position("generation_started"));
        assert!(position("generation_started") < position("generation_succeeded"));
        assert!(position("generation_succeeded") < position("artifact_saved"));
        assert_eq!(types.last().map(String::as_str), Some("session_finished"));
        Ok(())
    }

    #[test]
    fn engine_guard_rejects_missing_clothing() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut engine = dryrun_engine(temp.path())?;
        let person = temp.path().join("person.png");
        write_png(&person, 4, 4, [1, 2, 3, 255])?;
        engine.load_image(ImageRole::Person, &person)?;

        assert_eq!(
            engine.generate(),
            Err(TryOnError::validation(MISSING_IMAGES_MESSAGE))
        );
        assert_eq!(engine.session().status(), ProcessingStatus::Idle);
        assert!(engine.save_result(None).is_err());
        Ok(())
    }

    #[test]
    fn rejected_upload_is_logged_and_keeps_slot() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut engine = dryrun_engine(temp.path())?;
        let notes = temp.path().join("notes.txt");
        fs::write(&notes, "hello")?;

        assert!(matches!(
            engine.load_image(ImageRole::Clothing, &notes),
            Err(TryOnError::Validation(_))
        ));
        assert!(!engine.session().image(ImageRole::Clothing).is_loaded());
        assert_eq!(engine.session().status(), ProcessingStatus::Idle);
        assert!(event_types(engine.events_path())?.contains(&"image_rejected".to_string()));
        Ok(())
    }

    #[test]
    fn missing_credential_moves_session_to_error() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut providers = ProviderRegistry::new();
        providers.register(GeminiProvider::new(None, "http://127.0.0.1:9/v1beta", None));
        let mut engine = TryOnEngine::with_providers(
            temp.path(),
            temp.path().join("events.jsonl"),
            None,
            providers,
        )?;
        load_both(&mut engine, temp.path())?;

        assert!(matches!(engine.generate(), Err(TryOnError::Configuration(_))));
        assert_eq!(engine.session().status(), ProcessingStatus::Error);
        assert!(engine.session().result().is_none());
        assert!(engine.session().error().is_some());
        assert!(event_types(engine.events_path())?.contains(&"generation_failed".to_string()));
        Ok(())
    }

    #[test]
    fn unknown_model_falls_back_to_default_with_reason() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut engine = dryrun_engine(temp.path())?;
        engine.set_model(Some("imagen-4".to_string()));
        load_both(&mut engine, temp.path())?;

        // imagen-4 cannot try on; the default is a Gemini model, whose
        // provider is not registered here.
        assert!(matches!(engine.generate(), Err(TryOnError::Configuration(_))));
        assert!(engine
            .last_fallback_reason()
            .is_some_and(|reason| reason.contains("imagen-4")));
        Ok(())
    }

    #[test]
    fn reset_clears_session_and_status_report_reflects_it() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut engine = dryrun_engine(temp.path())?;
        load_both(&mut engine, temp.path())?;
        engine.generate()?;

        let report = engine.status_report();
        assert_eq!(report["status"], Value::from("SUCCESS"));
        assert_eq!(report["person"]["file_name"], Value::from("person.png"));
        assert_eq!(report["has_result"], Value::Bool(true));

        engine.reset();
        let report = engine.status_report();
        assert_eq!(report["status"], Value::from("IDLE"));
        assert_eq!(report["person"]["loaded"], Value::Bool(false));
        assert_eq!(report["has_result"], Value::Bool(false));
        assert_eq!(report["error"], Value::Null);
        assert!(engine.save_result(None).is_err());
        Ok(())
    }

    #[test]
    fn remove_image_blocks_next_generation() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut engine = dryrun_engine(temp.path())?;
        load_both(&mut engine, temp.path())?;
        engine.remove_image(ImageRole::Person);

        assert!(!engine.session().can_generate());
        assert!(engine.generate().is_err());
        assert!(event_types(engine.events_path())?.contains(&"image_removed".to_string()));
        Ok(())
    }

    #[test]
    fn list_models_only_offers_try_on_models() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let engine = dryrun_engine(temp.path())?;
        let names: Vec<String> = engine.list_models().into_iter().map(|model| model.name).collect();
        assert_eq!(names.first().map(String::as_str), Some("gemini-2.5-flash-image"));
        assert!(names.contains(&"dryrun-tryon-1".to_string()));
        assert!(!names.contains(&"imagen-4".to_string()));
        Ok(())
    }
}
