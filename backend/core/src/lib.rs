pub mod codec;
pub mod error;
pub mod message;
pub mod traits;
pub mod types;

pub use codec::{decode_frame, encode_frame, read_frame, write_frame, DEFAULT_MAX_MESSAGE_SIZE};
pub use error::{FrameError, OcrError, RecognizeError};
pub use message::{ClientFrame, CloseStatus, ServerFrame};
pub use traits::{Recognizer, RecognizerFactory};
pub use types::{
    clip_image_id, Job, JobRequest, JobResult, EMPTY_IMAGE_DATA, IMAGE_ID_TOO_LONG,
    MAX_IMAGE_ID_LEN, RECOGNITION_FAILED, RESULT_TOO_LARGE,
};
