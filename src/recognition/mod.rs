//! Text recognition backends and their outcomes.

pub mod tesseract;

use std::fmt;
use std::future::Future;
use std::time::Duration;

use thiserror::Error;

use crate::capture::FrameView;

pub use tesseract::TesseractRecognizer;

/// Per-frame recognition failure. Never fatal to the pipeline.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RecognitionError {
    #[error("recognizer failed: {0}")]
    Backend(String),

    #[error("could not decode frame: {0}")]
    Decode(String),

    #[error("recognition timed out after {0:?}")]
    Timeout(Duration),

    #[error("recognizer panicked")]
    Panicked,

    #[error("recognizer i/o error: {0}")]
    Io(String),
}

impl From<std::io::Error> for RecognitionError {
    fn from(e: std::io::Error) -> Self {
        RecognitionError::Io(e.to_string())
    }
}

/// Outcome of recognizing one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionResult {
    Text(String),
    Empty,
    Failure(RecognitionError),
}

impl RecognitionResult {
    /// Trimmed text, or [`RecognitionResult::Empty`] if nothing is left.
    pub fn from_text(text: impl AsRef<str>) -> Self {
        let text = text.as_ref().trim();
        if text.is_empty() {
            RecognitionResult::Empty
        } else {
            RecognitionResult::Text(text.to_owned())
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, RecognitionResult::Failure(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            RecognitionResult::Text(_) => "text",
            RecognitionResult::Empty => "empty",
            RecognitionResult::Failure(_) => "failure",
        }
    }
}

impl From<Result<String, RecognitionError>> for RecognitionResult {
    fn from(outcome: Result<String, RecognitionError>) -> Self {
        match outcome {
            Ok(text) => RecognitionResult::from_text(text),
            Err(e) => RecognitionResult::Failure(e),
        }
    }
}

impl fmt::Display for RecognitionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecognitionResult::Text(text) => f.write_str(text),
            RecognitionResult::Empty => f.write_str("<no text>"),
            RecognitionResult::Failure(e) => write!(f, "<failed: {e}>"),
        }
    }
}

/// Turns an image into text.
///
/// The language/script is part of the recognizer's construction, not the
/// call. Calls may take anywhere from milliseconds to seconds; the worker
/// makes at most one at a time and bounds it with a timeout.
pub trait Recognizer: Send + Sync + 'static {
    fn recognize(
        &self,
        frame: FrameView,
    ) -> impl Future<Output = Result<String, RecognitionError>> + Send;
}

/// Adapter so any async closure can act as a [`Recognizer`].
pub struct FnRecognizer<F>(F);

pub fn recognizer_fn<F, Fut>(f: F) -> FnRecognizer<F>
where
    F: Fn(FrameView) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<String, RecognitionError>> + Send,
{
    FnRecognizer(f)
}

impl<F, Fut> Recognizer for FnRecognizer<F>
where
    F: Fn(FrameView) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<String, RecognitionError>> + Send,
{
    fn recognize(
        &self,
        frame: FrameView,
    ) -> impl Future<Output = Result<String, RecognitionError>> + Send {
        (self.0)(frame)
    }
}
