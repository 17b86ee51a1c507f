use std::path::Path;

use stylefusion_contracts::session::{ImageRole, ImageState, ProcessingStatus};
use stylefusion_contracts::TryOnError;
use tracing::{debug, info};

use crate::intake::{load_image, ImageSlot, ReadTicket};
use crate::providers::{InlineImage, TryOnProvider, TryOnRequest};

pub const MISSING_IMAGES_MESSAGE: &str = "Please upload both images first.";
pub const GENERATION_IN_PROGRESS_MESSAGE: &str = "A try-on is already being generated.";

/// Issued when a generation starts. Carries the input snapshot and the reset
/// epoch it belongs to.
#[derive(Debug, Clone)]
pub struct GenerationTicket {
    epoch: u64,
    pub request: TryOnRequest,
}

/// State machine for one try-on session.
///
/// Status moves IDLE → GENERATING → SUCCESS | ERROR on generate, and back to
/// IDLE on reset. While a file read is in flight the status is UPLOADING; it
/// falls back to whatever it was before once no read is pending. A stored
/// result and a stored generation error never coexist.
#[derive(Debug, Clone)]
pub struct TryOnSession {
    person: ImageSlot,
    clothing: ImageSlot,
    status: ProcessingStatus,
    resume_status: ProcessingStatus,
    result: Option<String>,
    error: Option<String>,
    epoch: u64,
}

impl Default for TryOnSession {
    fn default() -> Self {
        Self::new()
    }
}

impl TryOnSession {
    pub fn new() -> Self {
        Self {
            person: ImageSlot::new(ImageRole::Person),
            clothing: ImageSlot::new(ImageRole::Clothing),
            status: ProcessingStatus::Idle,
            resume_status: ProcessingStatus::Idle,
            result: None,
            error: None,
            epoch: 0,
        }
    }

    pub fn status(&self) -> ProcessingStatus {
        self.status
    }

    pub fn result(&self) -> Option<&str> {
        self.result.as_deref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn image(&self, role: ImageRole) -> &ImageState {
        self.slot(role).state()
    }

    pub fn can_generate(&self) -> bool {
        self.person.is_loaded()
            && self.clothing.is_loaded()
            && self.status != ProcessingStatus::Generating
    }

    fn slot(&self, role: ImageRole) -> &ImageSlot {
        match role {
            ImageRole::Person => &self.person,
            ImageRole::Clothing => &self.clothing,
        }
    }

    fn slot_mut(&mut self, role: ImageRole) -> &mut ImageSlot {
        match role {
            ImageRole::Person => &mut self.person,
            ImageRole::Clothing => &mut self.clothing,
        }
    }

    pub fn begin_upload(&mut self, role: ImageRole) -> ReadTicket {
        if self.status != ProcessingStatus::Uploading
            && self.status != ProcessingStatus::Generating
        {
            self.resume_status = self.status;
            self.status = ProcessingStatus::Uploading;
        }
        self.slot_mut(role).begin_read()
    }

    /// Applies the outcome of a read started with [`Self::begin_upload`].
    ///
    /// Returns `Ok(false)` when the read was overtaken by a newer read, a
    /// removal or a reset. A rejected file leaves the slot as it was.
    pub fn finish_upload(
        &mut self,
        ticket: ReadTicket,
        loaded: Result<ImageState, TryOnError>,
    ) -> Result<bool, TryOnError> {
        let outcome = match loaded {
            Ok(state) => Ok(self.slot_mut(ticket.role).commit(ticket, state)),
            Err(err) => {
                self.slot_mut(ticket.role).abandon(ticket);
                Err(err)
            }
        };
        self.settle_upload_status();
        outcome
    }

    /// Reads `path` synchronously into the `role` slot.
    pub fn submit_file(&mut self, role: ImageRole, path: &Path) -> Result<(), TryOnError> {
        let ticket = self.begin_upload(role);
        let loaded = load_image(path);
        self.finish_upload(ticket, loaded).map(|_| ())
    }

    pub fn remove(&mut self, role: ImageRole) {
        self.slot_mut(role).clear();
        self.settle_upload_status();
    }

    fn settle_upload_status(&mut self) {
        if self.status == ProcessingStatus::Uploading
            && !self.person.is_pending()
            && !self.clothing.is_pending()
        {
            self.status = self.resume_status;
        }
    }

    /// Guards and starts a generation, snapshotting both images.
    pub fn begin_generation(&mut self, model: &str) -> Result<GenerationTicket, TryOnError> {
        if self.status == ProcessingStatus::Generating {
            return Err(TryOnError::validation(GENERATION_IN_PROGRESS_MESSAGE));
        }
        let snapshot = InlineImage::from_state(self.person.state())
            .zip(InlineImage::from_state(self.clothing.state()));
        let Some((person, clothing)) = snapshot else {
            self.error = Some(MISSING_IMAGES_MESSAGE.to_string());
            return Err(TryOnError::validation(MISSING_IMAGES_MESSAGE));
        };

        self.status = ProcessingStatus::Generating;
        self.resume_status = ProcessingStatus::Generating;
        self.error = None;
        self.result = None;
        debug!(model, epoch = self.epoch, "generation started");
        Ok(GenerationTicket {
            epoch: self.epoch,
            request: TryOnRequest::new(person, clothing).with_model(model),
        })
    }

    /// Records a generation outcome. Returns `false` when the ticket predates
    /// a reset and the outcome was dropped.
    pub fn complete_generation(
        &mut self,
        ticket: &GenerationTicket,
        outcome: Result<String, TryOnError>,
    ) -> bool {
        if ticket.epoch != self.epoch || !self.generation_in_flight() {
            info!(epoch = ticket.epoch, "discarding generation outcome from before reset");
            return false;
        }
        let next = match outcome {
            Ok(image) => {
                self.result = Some(image);
                self.error = None;
                ProcessingStatus::Success
            }
            Err(err) => {
                self.result = None;
                self.error = Some(err.to_string());
                ProcessingStatus::Error
            }
        };
        self.resume_status = next;
        if self.status == ProcessingStatus::Generating {
            self.status = next;
        }
        true
    }

    fn generation_in_flight(&self) -> bool {
        self.resume_status == ProcessingStatus::Generating
    }

    pub fn generate(
        &mut self,
        provider: &dyn TryOnProvider,
        model: &str,
    ) -> Result<String, TryOnError> {
        let ticket = self.begin_generation(model)?;
        let outcome = provider.generate(&ticket.request).map(|output| output.image);
        self.complete_generation(&ticket, outcome.clone());
        outcome
    }

    pub fn reset(&mut self) {
        self.person.clear();
        self.clothing.clear();
        self.status = ProcessingStatus::Idle;
        self.resume_status = ProcessingStatus::Idle;
        self.result = None;
        self.error = None;
        self.epoch += 1;
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::Map;

    use super::*;
    use crate::intake::image_state_from_bytes;
    use crate::providers::ProviderOutput;

    struct StubProvider {
        outcome: Result<String, TryOnError>,
        calls: AtomicUsize,
    }

    impl StubProvider {
        fn returning(outcome: Result<String, TryOnError>) -> Self {
            Self {
                outcome,
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl TryOnProvider for StubProvider {
        fn name(&self) -> &str {
            "stub"
        }

        fn generate(&self, _request: &TryOnRequest) -> Result<ProviderOutput, TryOnError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.outcome.clone().map(|image| ProviderOutput {
                image,
                provider_request: Map::new(),
                provider_response: Map::new(),
            })
        }
    }

    fn png_state() -> ImageState {
        image_state_from_bytes(None, Some("image/png"), &[0x89, b'P', b'N', b'G'])
            .unwrap_or_default()
    }

    fn loaded_session() -> TryOnSession {
        let mut session = TryOnSession::new();
        for role in ImageRole::ALL {
            let ticket = session.begin_upload(role);
            let _ = session.finish_upload(ticket, Ok(png_state()));
        }
        session
    }

    #[test]
    fn generate_without_both_images_keeps_status_and_skips_provider() {
        let provider = StubProvider::returning(Ok("data:image/png;base64,Zm9v".to_string()));
        let mut session = TryOnSession::new();
        let ticket = session.begin_upload(ImageRole::Person);
        let _ = session.finish_upload(ticket, Ok(png_state()));

        let err = session.generate(&provider, "gemini-2.5-flash-image").err();
        assert_eq!(err, Some(TryOnError::validation(MISSING_IMAGES_MESSAGE)));
        assert_eq!(session.status(), ProcessingStatus::Idle);
        assert_eq!(session.error(), Some(MISSING_IMAGES_MESSAGE));
        assert_eq!(provider.calls(), 0);
    }

    #[test]
    fn successful_generate_ends_in_success_with_result() -> anyhow::Result<()> {
        let provider = StubProvider::returning(Ok("data:image/jpeg;base64,Zm9v".to_string()));
        let mut session = loaded_session();
        assert_eq!(session.status(), ProcessingStatus::Idle);

        let ticket = session.begin_generation("gemini-2.5-flash-image")?;
        assert_eq!(session.status(), ProcessingStatus::Generating);
        assert!(!session.can_generate());
        let outcome = provider.generate(&ticket.request).map(|output| output.image);
        assert!(session.complete_generation(&ticket, outcome));

        assert_eq!(session.status(), ProcessingStatus::Success);
        assert_eq!(session.result(), Some("data:image/jpeg;base64,Zm9v"));
        assert_eq!(session.error(), None);
        Ok(())
    }

    #[test]
    fn failed_generate_ends_in_error_with_empty_result() -> anyhow::Result<()> {
        let ok = StubProvider::returning(Ok("data:image/png;base64,Zm9v".to_string()));
        let failing = StubProvider::returning(Err(TryOnError::upstream("quota exceeded")));
        let mut session = loaded_session();
        session.generate(&ok, "m")?;

        assert!(session.generate(&failing, "m").is_err());
        assert_eq!(session.status(), ProcessingStatus::Error);
        assert_eq!(session.error(), Some("quota exceeded"));
        assert_eq!(session.result(), None);

        session.generate(&ok, "m")?;
        assert_eq!(session.status(), ProcessingStatus::Success);
        assert_eq!(session.error(), None);
        Ok(())
    }

    #[test]
    fn duplicate_submission_is_rejected_while_generating() -> anyhow::Result<()> {
        let mut session = loaded_session();
        let _ticket = session.begin_generation("m")?;
        assert_eq!(
            session.begin_generation("m").err(),
            Some(TryOnError::validation(GENERATION_IN_PROGRESS_MESSAGE))
        );
        assert_eq!(session.status(), ProcessingStatus::Generating);
        assert_eq!(session.error(), None);
        Ok(())
    }

    #[test]
    fn request_snapshot_ignores_later_slot_changes() -> anyhow::Result<()> {
        let mut session = loaded_session();
        let ticket = session.begin_generation("gemini-3-pro-image-preview")?;
        session.remove(ImageRole::Clothing);

        assert_eq!(ticket.request.model, "gemini-3-pro-image-preview");
        assert_eq!(ticket.request.clothing.resolved_mime_type(), "image/png");
        assert!(session.complete_generation(&ticket, Ok("data:image/png;base64,Zm9v".to_string())));
        assert_eq!(session.status(), ProcessingStatus::Success);
        Ok(())
    }

    #[test]
    fn reset_returns_everything_to_initial_state() -> anyhow::Result<()> {
        let provider = StubProvider::returning(Ok("data:image/png;base64,Zm9v".to_string()));
        let mut session = loaded_session();
        session.generate(&provider, "m")?;

        session.reset();
        assert_eq!(session.status(), ProcessingStatus::Idle);
        assert_eq!(session.result(), None);
        assert_eq!(session.error(), None);
        for role in ImageRole::ALL {
            assert_eq!(session.image(role), &ImageState::empty());
        }
        Ok(())
    }

    #[test]
    fn reset_during_generation_discards_completion() -> anyhow::Result<()> {
        let mut session = loaded_session();
        let ticket = session.begin_generation("m")?;
        session.reset();

        assert!(!session.complete_generation(&ticket, Ok("data:image/png;base64,Zm9v".to_string())));
        assert_eq!(session.status(), ProcessingStatus::Idle);
        assert_eq!(session.result(), None);
        Ok(())
    }

    #[test]
    fn reset_during_read_discards_late_commit() {
        let mut session = TryOnSession::new();
        let ticket = session.begin_upload(ImageRole::Person);
        assert_eq!(session.status(), ProcessingStatus::Uploading);
        session.reset();

        assert_eq!(session.finish_upload(ticket, Ok(png_state())), Ok(false));
        assert!(!session.image(ImageRole::Person).is_loaded());
        assert_eq!(session.status(), ProcessingStatus::Idle);
    }

    #[test]
    fn uploading_falls_back_to_previous_status() -> anyhow::Result<()> {
        let provider = StubProvider::returning(Ok("data:image/png;base64,Zm9v".to_string()));
        let mut session = loaded_session();
        session.generate(&provider, "m")?;

        let person = session.begin_upload(ImageRole::Person);
        let clothing = session.begin_upload(ImageRole::Clothing);
        assert_eq!(session.status(), ProcessingStatus::Uploading);
        assert_eq!(session.finish_upload(person, Ok(png_state())), Ok(true));
        assert_eq!(session.status(), ProcessingStatus::Uploading);
        assert!(session
            .finish_upload(clothing, Err(TryOnError::validation("Please upload an image file")))
            .is_err());
        assert_eq!(session.status(), ProcessingStatus::Success);
        assert!(session.image(ImageRole::Clothing).is_loaded());
        Ok(())
    }

    #[test]
    fn upload_during_generation_keeps_generating() -> anyhow::Result<()> {
        let mut session = loaded_session();
        let ticket = session.begin_generation("m")?;
        let read = session.begin_upload(ImageRole::Person);
        assert_eq!(session.status(), ProcessingStatus::Generating);
        assert!(session.complete_generation(&ticket, Err(TryOnError::NoImageInResponse)));
        assert_eq!(session.status(), ProcessingStatus::Error);
        assert_eq!(session.finish_upload(read, Ok(png_state())), Ok(true));
        assert_eq!(session.status(), ProcessingStatus::Error);
        Ok(())
    }

    #[test]
    fn submit_file_rejects_non_images_without_touching_slot() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let good = temp.path().join("person.png");
        let bad = temp.path().join("notes.txt");
        fs::write(&good, [0x89, b'P', b'N', b'G'])?;
        fs::write(&bad, "text")?;

        let mut session = TryOnSession::new();
        session.submit_file(ImageRole::Person, &good)?;
        let before = session.image(ImageRole::Person).clone();

        assert!(matches!(
            session.submit_file(ImageRole::Person, &bad),
            Err(TryOnError::Validation(_))
        ));
        assert_eq!(session.image(ImageRole::Person), &before);
        assert_eq!(session.status(), ProcessingStatus::Idle);
        Ok(())
    }
}
