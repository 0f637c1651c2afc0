//! V4L2 camera source

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, error, info, instrument};
use v4l::buffer::Type;
use v4l::capability::Flags as CapFlags;
use v4l::io::traits::CaptureStream;
use v4l::prelude::MmapStream;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use crate::capture::frame::{Frame, FrameMetadata, PixelFormat};
use crate::capture::source::{FrameSink, FrameSource, FrameSourceError};
use crate::utils;
use crate::CaptureConfig;

/// Longest a dequeue may block before the loop re-checks the stop flag.
const DEQUEUE_TIMEOUT: Duration = Duration::from_millis(250);

/// Linux camera driven through memory-mapped V4L2 buffers.
///
/// Each dequeued buffer is copied out before the driver gets it back, so
/// frames carry no release hook; the single in-flight frame policy of the
/// pipeline still bounds memory to two payloads.
pub struct V4l2Source {
    config: CaptureConfig,
    emitter: Option<Emitter>,
}

struct Emitter {
    running: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl V4l2Source {
    pub fn new(config: CaptureConfig) -> Self {
        Self {
            config,
            emitter: None,
        }
    }

    /// Open the device and apply the configured format.
    fn open(&mut self) -> Result<Device, FrameSourceError> {
        if self.config.device.is_empty() {
            let found = utils::auto_detect_device()?;
            self.config.device = found.path;
            self.config.format = found.format;
        }
        info!("Opening V4L2 device: {}", self.config.device);

        let device = Device::with_path(&self.config.device)
            .map_err(|e| FrameSourceError::Unavailable(e.to_string()))?;

        let caps = device.query_caps().map_err(device_error)?;
        info!("Device: {} ({})", caps.card, caps.driver);

        if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
            return Err(FrameSourceError::Unavailable(
                "device doesn't support video capture".into(),
            ));
        }

        let mut fmt = device.format().map_err(device_error)?;
        fmt.width = self.config.width;
        fmt.height = self.config.height;
        fmt.fourcc = match self.config.format {
            PixelFormat::Mjpeg => FourCC::new(b"MJPG"),
            PixelFormat::Yuyv4 => FourCC::new(b"YUYV"),
            PixelFormat::Nv12 => FourCC::new(b"NV12"),
            PixelFormat::Rgb24 => FourCC::new(b"RGB3"),
            PixelFormat::Bgr24 => FourCC::new(b"BGR3"),
            PixelFormat::Gray8 => FourCC::new(b"GREY"),
        };

        let applied = device.set_format(&fmt).map_err(device_error)?;
        // The driver may round the size to something it supports
        self.config.width = applied.width;
        self.config.height = applied.height;
        Ok(device)
    }
}

impl FrameSource for V4l2Source {
    #[instrument(skip_all, fields(device = %self.config.device))]
    fn start(&mut self, sink: FrameSink) -> Result<(), FrameSourceError> {
        if self.emitter.is_some() {
            return Err(FrameSourceError::AlreadyStarted);
        }

        let device = self.open()?;
        let config = self.config.clone();
        let running = Arc::new(AtomicBool::new(true));
        let thread_running = Arc::clone(&running);
        let (ready_tx, ready_rx) = flume::bounded(1);

        let handle = thread::Builder::new()
            .name("v4l2-capture".into())
            .spawn(move || {
                let mut stream =
                    match MmapStream::with_buffers(&device, Type::VideoCapture, config.buffer_count)
                    {
                        Ok(mut stream) => {
                            stream.set_timeout(DEQUEUE_TIMEOUT);
                            let _ = ready_tx.send(Ok(()));
                            stream
                        }
                        Err(e) => {
                            let _ = ready_tx.send(Err(device_error(e)));
                            return;
                        }
                    };
                capture_loop(&mut stream, &config, &thread_running, &sink);
            })
            .map_err(|e| FrameSourceError::Unavailable(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = handle.join();
                return Err(e);
            }
            Err(_) => {
                let _ = handle.join();
                return Err(FrameSourceError::Unavailable(
                    "capture thread exited during setup".into(),
                ));
            }
        }

        info!(
            "Capture stream started with {} buffers",
            self.config.buffer_count
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
            error!("V4L2 capture thread panicked");
        }
        info!("V4L2 capture stopped");
    }

    fn name(&self) -> &str {
        "v4l2"
    }
}

impl Drop for V4l2Source {
    fn drop(&mut self) {
        self.stop();
    }
}

fn capture_loop(
    stream: &mut MmapStream<'_>,
    config: &CaptureConfig,
    running: &AtomicBool,
    sink: &FrameSink,
) {
    let mut sequence = 0u64;

    while running.load(Ordering::Acquire) {
        // Blocks until the driver hands over a buffer or the timeout lapses
        let (buf, meta) = match stream.next() {
            Ok(next) => next,
            Err(e) => {
                match dequeue_fault(e) {
                    Some(fault) => {
                        sink.fault(fault);
                        thread::sleep(Duration::from_millis(10));
                    }
                    None => debug!("no buffer within {:?}", DEQUEUE_TIMEOUT),
                }
                continue;
            }
        };

        // Driver may deliver a partially filled buffer
        let used = (meta.bytesused as usize).min(buf.len());
        if used == 0 {
            continue;
        }
        let data = Bytes::copy_from_slice(&buf[..used]);

        sequence += 1;
        let mut frame_meta =
            FrameMetadata::new(sequence, config.width, config.height, config.format)
                .with_rotation(config.rotation);
        frame_meta.device_timestamp = Some(
            Duration::from_secs(meta.timestamp.sec as u64)
                + Duration::from_micros(meta.timestamp.usec as u64),
        );

        if !running.load(Ordering::Acquire) {
            break;
        }
        sink.push(Frame::new(data, frame_meta));
    }
    debug!(frames = sequence, "V4L2 capture loop exiting");
}

fn device_error(e: io::Error) -> FrameSourceError {
    FrameSourceError::Device(e.to_string())
}

/// A stalled device is not a fault; the loop just polls the stop flag again.
fn dequeue_fault(e: io::Error) -> Option<FrameSourceError> {
    match e.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted => None,
        _ => Some(device_error(e)),
    }
}
