use crate::error::RecognizeError;

/// A stateful, non-thread-safe recognition engine occupying one pool slot.
///
/// Implementations only mutate their own state. The pool guarantees that a
/// given instance is never used by two threads at once.
pub trait Recognizer: Send {
    /// Extract text from raw image bytes. An empty string means nothing was found.
    fn recognize(&mut self, image: &[u8]) -> Result<String, RecognizeError>;

    /// Clear adaptive state left behind by the previous image.
    fn reset(&mut self) {}
}

/// Builds fresh [`Recognizer`] instances, at startup and on every recycle.
pub trait RecognizerFactory: Send + Sync {
    /// Engine name used in logs.
    fn name(&self) -> &str;

    fn create(&self) -> Result<Box<dyn Recognizer>, RecognizeError>;
}

impl<F> RecognizerFactory for F
where
    F: Fn() -> Result<Box<dyn Recognizer>, RecognizeError> + Send + Sync,
{
    fn name(&self) -> &str {
        "custom"
    }

    fn create(&self) -> Result<Box<dyn Recognizer>, RecognizeError> {
        self()
    }
}
