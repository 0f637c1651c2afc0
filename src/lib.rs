//! Live camera text recognition.
//!
//! Frames flow from a [`capture::FrameSource`] into a single-slot
//! [`pipeline::LatestFrameSlot`], are picked up one at a time by the
//! [`pipeline::RecognitionWorker`], and the outcome lands in a
//! [`sink::ResultSink`]. The [`pipeline::PipelineController`] owns the whole
//! arrangement and exposes start/stop to the UI.

pub mod capture;
pub mod pipeline;
pub mod recognition;
pub mod sink;
pub mod utils;

use std::path::Path;
use std::time::Duration;

use capture::frame::{PixelFormat, Rotation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use capture::{Frame, FrameSource};
pub use pipeline::{PipelineController, PipelineState};
pub use recognition::{RecognitionResult, Recognizer};
pub use sink::ResultSink;

/// Environment variable prefix for configuration overrides,
/// e.g. `TEXTCAM__CAPTURE__FPS=15`.
pub const ENV_PREFIX: &str = "TEXTCAM";

/// Largest accepted capture width or height, in pixels.
pub const MAX_DIMENSION: u32 = 16_384;

/// System configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    pub recognition: RecognitionConfig,
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureBackend {
    /// Generated test pattern, no hardware needed.
    Synthetic,
    /// Linux V4L2 device (requires the `v4l2` feature).
    V4l2,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub backend: CaptureBackend,
    /// Device path; empty means auto-detect.
    pub device: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub format: PixelFormat,
    /// Clockwise rotation needed to display the sensor image upright.
    pub rotation: Rotation,
    /// Capture buffers the source may have leased out at once.
    pub buffer_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognitionConfig {
    /// OCR executable.
    pub engine: String,
    /// Script/language model, fixed for the lifetime of the process.
    pub language: String,
    /// Tesseract page segmentation mode.
    pub page_segmentation: u8,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// How often the binary logs pipeline counters.
    pub stats_interval_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            backend: CaptureBackend::Synthetic,
            device: String::new(),
            width: 640,
            height: 480,
            fps: 30,
            format: PixelFormat::Gray8,
            rotation: Rotation::Deg0,
            buffer_count: 4,
        }
    }
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            engine: "tesseract".into(),
            language: "chi_sim".into(),
            page_segmentation: 6,
            timeout_ms: 5_000,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            stats_interval_ms: 5_000,
        }
    }
}

impl RecognitionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl PipelineConfig {
    pub fn stats_interval(&self) -> Duration {
        Duration::from_millis(self.stats_interval_ms)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl Config {
    /// Load defaults, then the optional TOML file, then `TEXTCAM__*`
    /// environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with_env(path, Self::environment())
    }

    /// Same as [`Config::load`] with an explicit environment source.
    pub fn load_with_env(
        path: Option<&Path>,
        env: config::Environment,
    ) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let config: Config = builder.add_source(env).build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn environment() -> config::Environment {
        config::Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let capture = &self.capture;
        if capture.width == 0 || capture.height == 0 {
            return Err(ConfigError::Invalid(format!(
                "capture size {}x{} must be non-zero",
                capture.width, capture.height
            )));
        }
        if capture.width > MAX_DIMENSION || capture.height > MAX_DIMENSION {
            return Err(ConfigError::Invalid(format!(
                "capture size {}x{} exceeds {MAX_DIMENSION}x{MAX_DIMENSION}",
                capture.width, capture.height
            )));
        }
        if capture.fps == 0 {
            return Err(ConfigError::Invalid("capture.fps must be non-zero".into()));
        }
        if capture.buffer_count == 0 {
            return Err(ConfigError::Invalid(
                "capture.buffer_count must be at least 1".into(),
            ));
        }
        if self.recognition.timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "recognition.timeout_ms must be non-zero".into(),
            ));
        }
        if self.recognition.language.trim().is_empty() {
            return Err(ConfigError::Invalid("recognition.language is empty".into()));
        }
        if self.pipeline.stats_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "pipeline.stats_interval_ms must be non-zero".into(),
            ));
        }
        Ok(())
    }
}
