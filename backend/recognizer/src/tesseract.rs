//! `tesseract` command adapter.
//!
//! Each recognition pipes the image into `tesseract stdin stdout` and reads
//! the UTF-8 text back. The process exits after every image, so `reset()`
//! has nothing to clear.

use std::env;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::Instant;

use ocrforge_core::{RecognizeError, Recognizer, RecognizerFactory};
use tracing::debug;

use crate::postprocess::normalize_text;

/// Page segmentation mode 6: a single uniform block of text.
pub const DEFAULT_PAGE_SEG_MODE: u8 = 6;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TesseractSettings {
    /// Executable name (looked up on `PATH`) or path
    pub command: String,
    /// Traineddata language code(s), e.g. "eng" or "eng+deu"
    pub language: String,
    pub page_seg_mode: u8,
}

impl Default for TesseractSettings {
    fn default() -> Self {
        Self {
            command: "tesseract".to_string(),
            language: "eng".to_string(),
            page_seg_mode: DEFAULT_PAGE_SEG_MODE,
        }
    }
}

pub struct TesseractRecognizer {
    settings: TesseractSettings,
    program: PathBuf,
    images: u64,
}

impl TesseractRecognizer {
    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("stdin")
            .arg("stdout")
            .arg("-l")
            .arg(&self.settings.language)
            .arg("--psm")
            .arg(self.settings.page_seg_mode.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    }
}

impl Recognizer for TesseractRecognizer {
    fn recognize(&mut self, image: &[u8]) -> Result<String, RecognizeError> {
        let started = Instant::now();
        let mut child = self.command().spawn().map_err(|e| match e.kind() {
            ErrorKind::NotFound => RecognizeError::Unavailable(format!(
                "{} not found",
                self.program.display()
            )),
            _ => RecognizeError::Io(e),
        })?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| RecognizeError::Engine("stdin was not captured".to_string()))?;

        // Feed stdin from a second thread so a chatty child cannot fill the
        // stdout pipe while we are still writing.
        let (output, fed) = thread::scope(|scope| {
            let feeder = scope.spawn(move || {
                let written = stdin.write_all(image);
                drop(stdin);
                written
            });
            let output = child.wait_with_output();
            let fed = feeder.join().unwrap_or_else(|_| {
                Err(std::io::Error::new(ErrorKind::Other, "stdin feeder panicked"))
            });
            (output, fed)
        });

        let output = output?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(RecognizeError::Engine(format!(
                "tesseract exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }
        // A broken pipe only matters if tesseract also failed.
        if let Err(e) = fed {
            if e.kind() != ErrorKind::BrokenPipe {
                return Err(RecognizeError::Io(e));
            }
        }

        self.images += 1;
        let text = normalize_text(&String::from_utf8_lossy(&output.stdout));
        debug!(
            bytes = image.len(),
            chars = text.len(),
            images = self.images,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "tesseract finished"
        );
        Ok(text)
    }
}

/// Creates [`TesseractRecognizer`]s after checking the executable exists.
pub struct TesseractFactory {
    settings: TesseractSettings,
}

impl TesseractFactory {
    pub fn new(settings: TesseractSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &TesseractSettings {
        &self.settings
    }
}

impl RecognizerFactory for TesseractFactory {
    fn name(&self) -> &str {
        "tesseract"
    }

    fn create(&self) -> Result<Box<dyn Recognizer>, RecognizeError> {
        let program = resolve_program(&self.settings.command).ok_or_else(|| {
            RecognizeError::Unavailable(format!(
                "'{}' is not an executable on PATH",
                self.settings.command
            ))
        })?;
        Ok(Box::new(TesseractRecognizer {
            settings: self.settings.clone(),
            program,
            images: 0,
        }))
    }
}

fn resolve_program(command: &str) -> Option<PathBuf> {
    let candidate = Path::new(command);
    if candidate.components().count() > 1 {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }
    let paths = env::var_os("PATH")?;
    env::split_paths(&paths)
        .map(|dir| dir.join(command))
        .find(|path| path.is_file())
}
