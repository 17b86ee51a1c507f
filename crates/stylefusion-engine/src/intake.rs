use std::fs;
use std::path::Path;
use std::sync::mpsc;
use std::thread;

use stylefusion_contracts::data_url::encode_data_url;
use stylefusion_contracts::session::{ImageRole, ImageState, SourceFile};
use stylefusion_contracts::TryOnError;
use tracing::debug;

pub const NOT_AN_IMAGE_MESSAGE: &str = "Please upload an image file";

/// Reads `path` into a populated slot state.
///
/// The declared type comes from the extension; files with no known extension
/// are sniffed. Anything that is not `image/*` is rejected.
pub fn load_image(path: &Path) -> Result<ImageState, TryOnError> {
    let bytes = fs::read(path).map_err(|err| {
        TryOnError::validation(format!("Could not read {}: {err}", path.display()))
    })?;
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string());
    let source = SourceFile {
        path: path.to_path_buf(),
        name,
        size_bytes: bytes.len() as u64,
    };
    let declared = declared_mime_for_path(path);
    image_state_from_bytes(Some(source), declared.as_deref(), &bytes)
}

/// Pure half of [`load_image`]: validates the MIME type and encodes `bytes`
/// verbatim as a data URL.
pub fn image_state_from_bytes(
    source: Option<SourceFile>,
    declared_mime: Option<&str>,
    bytes: &[u8],
) -> Result<ImageState, TryOnError> {
    if bytes.is_empty() {
        return Err(TryOnError::validation(NOT_AN_IMAGE_MESSAGE));
    }
    let mime_type = match declared_mime.map(str::trim).filter(|mime| !mime.is_empty()) {
        Some(mime) => mime.to_ascii_lowercase(),
        None => sniff_mime(bytes).ok_or_else(|| TryOnError::validation(NOT_AN_IMAGE_MESSAGE))?,
    };
    if !mime_type.starts_with("image/") {
        return Err(TryOnError::validation(NOT_AN_IMAGE_MESSAGE));
    }
    let data_url = encode_data_url(&mime_type, bytes);
    Ok(ImageState::loaded(source, mime_type, data_url))
}

/// MIME type implied by the file extension, `None` when unknown.
pub fn declared_mime_for_path(path: &Path) -> Option<String> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    let mime = match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" | "jfif" => "image/jpeg",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        "tif" | "tiff" => "image/tiff",
        "avif" => "image/avif",
        "heic" => "image/heic",
        "heif" => "image/heif",
        "svg" => "image/svg+xml",
        "ico" => "image/x-icon",
        "txt" | "md" => "text/plain",
        "json" => "application/json",
        "pdf" => "application/pdf",
        "html" | "htm" => "text/html",
        "mp4" => "video/mp4",
        "mov" => "video/quicktime",
        _ => return None,
    };
    Some(mime.to_string())
}

fn sniff_mime(bytes: &[u8]) -> Option<String> {
    image::guess_format(bytes)
        .ok()
        .map(|format| format.to_mime_type().to_string())
}

/// Proof that a read was started against a slot at a given generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadTicket {
    pub role: ImageRole,
    generation: u64,
}

/// One intake slot.
///
/// Every read and every clear bumps the generation, so only the most recent
/// read can commit.
#[derive(Debug, Clone)]
pub struct ImageSlot {
    role: ImageRole,
    state: ImageState,
    generation: u64,
    pending: bool,
}

impl ImageSlot {
    pub fn new(role: ImageRole) -> Self {
        Self {
            role,
            state: ImageState::empty(),
            generation: 0,
            pending: false,
        }
    }

    pub fn role(&self) -> ImageRole {
        self.role
    }

    pub fn state(&self) -> &ImageState {
        &self.state
    }

    pub fn is_loaded(&self) -> bool {
        self.state.is_loaded()
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }

    pub fn begin_read(&mut self) -> ReadTicket {
        self.generation += 1;
        self.pending = true;
        ReadTicket {
            role: self.role,
            generation: self.generation,
        }
    }

    /// Stores `state` if no newer read or clear happened since `ticket`.
    pub fn commit(&mut self, ticket: ReadTicket, state: ImageState) -> bool {
        if !self.is_current(ticket) {
            debug!(role = %self.role, "discarding stale image read");
            return false;
        }
        self.state = state;
        self.pending = false;
        true
    }

    /// Ends a failed read, leaving the previous contents in place.
    pub fn abandon(&mut self, ticket: ReadTicket) -> bool {
        if !self.is_current(ticket) {
            return false;
        }
        self.pending = false;
        true
    }

    pub fn clear(&mut self) {
        self.generation += 1;
        self.pending = false;
        self.state = ImageState::empty();
    }

    fn is_current(&self, ticket: ReadTicket) -> bool {
        ticket.role == self.role && ticket.generation == self.generation && self.pending
    }
}

/// A file read running on a worker thread.
pub struct PendingLoad {
    receiver: mpsc::Receiver<Result<ImageState, TryOnError>>,
}

impl PendingLoad {
    pub fn wait(self) -> Result<ImageState, TryOnError> {
        self.receiver.recv().unwrap_or_else(|_| {
            Err(TryOnError::validation("Image read was interrupted"))
        })
    }
}

pub fn spawn_load(path: impl AsRef<Path>) -> PendingLoad {
    let path = path.as_ref().to_path_buf();
    let (sender, receiver) = mpsc::channel();
    thread::spawn(move || {
        let _ = sender.send(load_image(&path));
    });
    PendingLoad { receiver }
}
