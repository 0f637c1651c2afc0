use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::source::FrameSourceError;

/// Hook handed the frame sequence once its consumer is done with it.
pub type ReleaseHook = Box<dyn FnOnce(u64) + Send + 'static>;

/// Captured frame, exclusively owned by one stage at a time.
///
/// The frame carries a lease on the source's capture buffer. The lease is
/// returned exactly once: explicitly through [`Frame::release`], or when the
/// frame is dropped (overwritten in the slot, discarded on shutdown,
/// unwound through a panic).
pub struct Frame {
    /// Frame data, shared with the recognizer without copying
    data: Bytes,
    meta: Arc<FrameMetadata>,
    /// Capture timestamp for latency tracking
    timestamp: Instant,
    lease: FrameLease,
}

/// Frame metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameMetadata {
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    /// Bytes per row of the first plane; zero for compressed formats.
    pub stride: u32,
    pub format: PixelFormat,
    pub rotation: Rotation,
    pub device_timestamp: Option<Duration>, // Hardware timestamp if available
}

/// Borrow-free handle on a frame's pixels for the recognizer.
///
/// Cloning is cheap; the lease stays with the [`Frame`].
#[derive(Debug, Clone)]
pub struct FrameView {
    pub data: Bytes,
    pub meta: Arc<FrameMetadata>,
}

/// Pixel formats we support
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    Rgb24,
    Bgr24,
    Yuyv4,
    Mjpeg,
    Nv12,
    Gray8,
}

/// Clockwise rotation that makes the captured image upright.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub enum Rotation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

struct FrameLease {
    sequence: u64,
    hook: Option<ReleaseHook>,
}

impl FrameLease {
    fn fire(&mut self) {
        if let Some(hook) = self.hook.take() {
            hook(self.sequence);
        }
    }
}

impl Drop for FrameLease {
    fn drop(&mut self) {
        self.fire();
    }
}

impl Frame {
    /// Frame without a release hook, e.g. for buffers the source copied out.
    pub fn new(data: Bytes, meta: FrameMetadata) -> Self {
        let sequence = meta.sequence;
        Self {
            data,
            meta: Arc::new(meta),
            timestamp: Instant::now(),
            lease: FrameLease {
                sequence,
                hook: None,
            },
        }
    }

    /// Attach the hook that returns the capture buffer to its source.
    pub fn with_release(mut self, hook: impl FnOnce(u64) + Send + 'static) -> Self {
        self.lease.hook = Some(Box::new(hook));
        self
    }

    pub fn sequence(&self) -> u64 {
        self.meta.sequence
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn meta(&self) -> &FrameMetadata {
        &self.meta
    }

    pub fn timestamp(&self) -> Instant {
        self.timestamp
    }

    pub fn view(&self) -> FrameView {
        FrameView {
            data: self.data.clone(),
            meta: Arc::clone(&self.meta),
        }
    }

    /// Time since capture.
    pub fn age(&self) -> Duration {
        self.timestamp.elapsed()
    }

    /// Hand the capture buffer back to the source.
    pub fn release(mut self) {
        self.lease.fire();
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("sequence", &self.meta.sequence)
            .field("len", &self.data.len())
            .field("format", &self.meta.format)
            .field("rotation", &self.meta.rotation)
            .field("released", &self.lease.hook.is_none())
            .finish()
    }
}

impl FrameMetadata {
    /// Metadata with a tightly packed stride for `format`.
    ///
    /// A stride too wide for `u32` saturates; the decoder then rejects it.
    pub fn new(sequence: u64, width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            sequence,
            width,
            height,
            stride: width.saturating_mul(format.bytes_per_pixel()),
            format,
            rotation: Rotation::Deg0,
            device_timestamp: None,
        }
    }

    pub fn with_rotation(mut self, rotation: Rotation) -> Self {
        self.rotation = rotation;
        self
    }

    /// Minimum payload size, or `None` for compressed formats.
    pub fn expected_len(&self) -> Option<usize> {
        let rows = self.height as usize;
        let stride = self.stride as usize;
        let plane = stride.saturating_mul(rows);
        match self.format {
            PixelFormat::Mjpeg => None,
            // Luma plane plus half-height interleaved chroma plane
            PixelFormat::Nv12 => {
                Some(plane.saturating_add(stride.saturating_mul(rows.div_ceil(2))))
            }
            _ => Some(plane),
        }
    }
}

impl PixelFormat {
    /// Bytes per pixel of the first plane; zero for compressed formats.
    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            PixelFormat::Rgb24 | PixelFormat::Bgr24 => 3,
            PixelFormat::Yuyv4 => 2,
            PixelFormat::Nv12 | PixelFormat::Gray8 => 1,
            PixelFormat::Mjpeg => 0,
        }
    }
}

impl Rotation {
    pub fn from_degrees(degrees: u16) -> Result<Self, FrameSourceError> {
        match degrees {
            0 => Ok(Rotation::Deg0),
            90 => Ok(Rotation::Deg90),
            180 => Ok(Rotation::Deg180),
            270 => Ok(Rotation::Deg270),
            other => Err(FrameSourceError::InvalidRotation(other)),
        }
    }

    pub fn degrees(self) -> u16 {
        match self {
            Rotation::Deg0 => 0,
            Rotation::Deg90 => 90,
            Rotation::Deg180 => 180,
            Rotation::Deg270 => 270,
        }
    }
}

impl TryFrom<u16> for Rotation {
    type Error = FrameSourceError;

    fn try_from(degrees: u16) -> Result<Self, Self::Error> {
        Rotation::from_degrees(degrees)
    }
}

impl From<Rotation> for u16 {
    fn from(rotation: Rotation) -> Self {
        rotation.degrees()
    }
}
