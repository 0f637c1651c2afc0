//! Test-pattern camera that needs no hardware.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::{debug, error, info, instrument};

use crate::capture::frame::{Frame, FrameMetadata, PixelFormat};
use crate::capture::source::{FrameSink, FrameSource, FrameSourceError};
use crate::CaptureConfig;

/// Emits a scrolling gradient at a fixed frame rate on its own thread.
///
/// Only `buffer_count` frames may be leased out at once, like a real
/// capture queue: if consumers sit on every buffer the source skips the
/// capture and reports [`FrameSourceError::BuffersExhausted`].
pub struct SyntheticSource {
    config: CaptureConfig,
    outstanding: Arc<AtomicU32>,
    emitter: Option<Emitter>,
}

struct Emitter {
    running: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl SyntheticSource {
    pub fn new(config: CaptureConfig) -> Self {
        Self {
            config,
            outstanding: Arc::new(AtomicU32::new(0)),
            emitter: None,
        }
    }

    /// Frames currently leased downstream.
    pub fn outstanding(&self) -> u32 {
        self.outstanding.load(Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        self.emitter.is_some()
    }
}

impl FrameSource for SyntheticSource {
    #[instrument(skip_all, fields(fps = self.config.fps))]
    fn start(&mut self, sink: FrameSink) -> Result<(), FrameSourceError> {
        if self.emitter.is_some() {
            return Err(FrameSourceError::AlreadyStarted);
        }
        if self.config.fps == 0 {
            return Err(FrameSourceError::Unavailable("fps must be non-zero".into()));
        }
        if self.config.format == PixelFormat::Mjpeg {
            return Err(FrameSourceError::Unavailable(
                "synthetic source cannot encode MJPEG".into(),
            ));
        }

        let running = Arc::new(AtomicBool::new(true));
        let mut pattern = Pattern::new(self.config.clone(), Arc::clone(&self.outstanding));
        let thread_running = Arc::clone(&running);

        let handle = thread::Builder::new()
            .name("synthetic-camera".into())
            .spawn(move || pattern.run(&thread_running, &sink))
            .map_err(|e| FrameSourceError::Unavailable(e.to_string()))?;

        info!(
            "Synthetic camera started: {}x{} {:?} @ {} fps",
            self.config.width, self.config.height, self.config.format, self.config.fps
        );
        self.emitter = Some(Emitter { running, handle });
        Ok(())
    }

    fn stop(&mut self) {
        let Some(emitter) = self.emitter.take() else {
            return;
        };
        emitter.running.store(false, Ordering::Release);
        if emitter.handle.join().is_err() {
            error!("synthetic camera thread panicked");
        }
        info!("Synthetic camera stopped");
    }

    fn name(&self) -> &str {
        "synthetic"
    }
}

impl Drop for SyntheticSource {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Pattern {
    config: CaptureConfig,
    outstanding: Arc<AtomicU32>,
    sequence: u64,
}

impl Pattern {
    fn new(config: CaptureConfig, outstanding: Arc<AtomicU32>) -> Self {
        Self {
            config,
            outstanding,
            sequence: 0,
        }
    }

    fn run(&mut self, running: &AtomicBool, sink: &FrameSink) {
        let interval = Duration::from_secs(1) / self.config.fps;
        let mut deadline = Instant::now();

        while running.load(Ordering::Acquire) {
            let leased = self.outstanding.load(Ordering::Acquire);
            if leased >= self.config.buffer_count {
                sink.fault(FrameSourceError::BuffersExhausted(leased));
            } else {
                sink.push(self.capture());
            }

            deadline += interval;
            let now = Instant::now();
            if deadline > now {
                thread::sleep(deadline - now);
            } else {
                // Fell behind; don't try to catch up with a burst
                deadline = now;
            }
        }
        debug!(frames = self.sequence, "synthetic emitter exiting");
    }

    fn capture(&mut self) -> Frame {
        self.sequence += 1;
        let meta = FrameMetadata::new(
            self.sequence,
            self.config.width,
            self.config.height,
            self.config.format,
        )
        .with_rotation(self.config.rotation);
        let data = Bytes::from(self.render(&meta));

        self.outstanding.fetch_add(1, Ordering::AcqRel);
        let outstanding = Arc::clone(&self.outstanding);
        Frame::new(data, meta).with_release(move |_| {
            outstanding.fetch_sub(1, Ordering::AcqRel);
        })
    }

    fn render(&self, meta: &FrameMetadata) -> Vec<u8> {
        let (width, height) = (meta.width as usize, meta.height as usize);
        let shift = self.sequence as usize;
        let mut out = Vec::with_capacity(meta.expected_len().unwrap_or(0));

        for y in 0..height {
            for x in 0..width {
                let value = ((x + y + shift) % 256) as u8;
                match meta.format {
                    PixelFormat::Gray8 | PixelFormat::Nv12 => out.push(value),
                    PixelFormat::Rgb24 | PixelFormat::Bgr24 => {
                        out.extend_from_slice(&[value, value, value])
                    }
                    PixelFormat::Yuyv4 => out.extend_from_slice(&[value, 128]),
                    PixelFormat::Mjpeg => {}
                }
            }
        }
        if meta.format == PixelFormat::Nv12 {
            out.resize(meta.expected_len().unwrap_or(out.len()), 128);
        }
        out
    }
}
