use tracing_subscriber::EnvFilter;

#[cfg(feature = "v4l2")]
pub use detect::{auto_detect_device, FoundDevice};

/// Install the fmt subscriber. `RUST_LOG` wins over `default_filter`.
pub fn init_tracing(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();
}

#[cfg(feature = "v4l2")]
mod detect {
    use std::path::Path;

    use tracing::info;
    use v4l::{capability::Flags, video::Capture, Device, FourCC};

    use crate::capture::frame::PixelFormat;
    use crate::capture::source::FrameSourceError;

    // Detected capture device info
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct FoundDevice {
        pub path: String,
        pub format: PixelFormat,
    }

    /// Find the first capture device offering a format we can decode,
    /// preferring compressed MJPEG over raw YUYV.
    pub fn auto_detect_device() -> Result<FoundDevice, FrameSourceError> {
        info!("Auto-detecting capture devices...");

        for i in 0..10 {
            let path = format!("/dev/video{}", i);
            if !Path::new(&path).exists() {
                continue;
            }

            let Ok(dev) = Device::with_path(&path) else {
                continue;
            };
            let Ok(caps) = dev.query_caps() else {
                continue;
            };
            if !caps.capabilities.contains(Flags::VIDEO_CAPTURE) {
                continue;
            }
            let Ok(formats) = dev.enum_formats() else {
                continue;
            };

            let fourccs: Vec<FourCC> = formats.iter().map(|f| f.fourcc).collect();
            let format = if fourccs.contains(&FourCC::new(b"MJPG")) {
                PixelFormat::Mjpeg
            } else if fourccs.contains(&FourCC::new(b"YUYV")) {
                PixelFormat::Yuyv4
            } else {
                continue;
            };

            info!("Found {:?} device: {} - {}", format, path, caps.card);
            return Ok(FoundDevice { path, format });
        }

        Err(FrameSourceError::Unavailable(
            "no suitable capture device found".into(),
        ))
    }
}
