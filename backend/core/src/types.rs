use serde::{Deserialize, Serialize};

/// Rejection text for a request that carries no image bytes.
pub const EMPTY_IMAGE_DATA: &str = "Empty image data";

/// Generic text for any engine-side failure (empty output, error, or panic).
pub const RECOGNITION_FAILED: &str = "OCR failed to extract text";

/// Rejection text for a request whose `image_id` is longer than [`MAX_IMAGE_ID_LEN`].
pub const IMAGE_ID_TOO_LONG: &str = "Image id too long";

/// Failure text substituted when a result would not fit in one frame.
pub const RESULT_TOO_LARGE: &str = "Result exceeds the maximum message size";

/// Longest `image_id` the server echoes back, in bytes.
pub const MAX_IMAGE_ID_LEN: usize = 512;

/// `id` cut to at most [`MAX_IMAGE_ID_LEN`] bytes on a char boundary.
pub fn clip_image_id(id: &str) -> &str {
    if id.len() <= MAX_IMAGE_ID_LEN {
        return id;
    }
    let mut end = MAX_IMAGE_ID_LEN;
    while !id.is_char_boundary(end) {
        end -= 1;
    }
    &id[..end]
}

/// An image submitted by a client for recognition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRequest {
    pub image_id: String,
    pub filename: String,
    pub image_data: Vec<u8>,
}

impl JobRequest {
    pub fn new(
        image_id: impl Into<String>,
        filename: impl Into<String>,
        image_data: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            image_id: image_id.into(),
            filename: filename.into(),
            image_data: image_data.into(),
        }
    }
}

/// One unit of admitted work. Owned by the task that executes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub id: String,
    pub name: String,
    pub payload: Vec<u8>,
}

impl Job {
    /// Payload size in bytes, as charged against the in-flight byte budget.
    pub fn size(&self) -> u64 {
        self.payload.len() as u64
    }
}

impl From<JobRequest> for Job {
    fn from(request: JobRequest) -> Self {
        Self {
            id: request.image_id,
            name: request.filename,
            payload: request.image_data,
        }
    }
}

/// The outcome of one job, correlated to its request by `image_id`.
///
/// `success` is true iff `extracted_text` is non-empty; `error_message` is
/// only populated on failure. Use the constructors to keep that invariant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResult {
    pub image_id: String,
    pub extracted_text: String,
    pub success: bool,
    pub error_message: String,
}

impl JobResult {
    /// Build a result from engine output. Empty text counts as a failure.
    pub fn from_text(image_id: impl Into<String>, text: impl Into<String>) -> Self {
        let text = text.into();
        if text.is_empty() {
            return Self::failure(image_id, RECOGNITION_FAILED);
        }
        Self {
            image_id: image_id.into(),
            extracted_text: text,
            success: true,
            error_message: String::new(),
        }
    }

    pub fn failure(image_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            image_id: image_id.into(),
            extracted_text: String::new(),
            success: false,
            error_message: message.into(),
        }
    }
}
