//! Optical Character Recognition engines.
//!
//! Bridges the `tesseract` executable into the recognizer slot pool. The
//! engine runs out of process, so a misbehaving image can never take the
//! server down with it.

pub mod postprocess;
pub mod tesseract;

pub use postprocess::normalize_text;
pub use tesseract::{TesseractFactory, TesseractRecognizer, TesseractSettings};
