pub mod decoder;
pub mod frame;
pub mod source;
pub mod synthetic;
#[cfg(feature = "v4l2")]
pub mod v4l2;

pub use frame::{Frame, FrameMetadata, FrameView, PixelFormat, Rotation};
pub use source::{FrameSink, FrameSource, FrameSourceError};
pub use synthetic::SyntheticSource;
#[cfg(feature = "v4l2")]
pub use v4l2::V4l2Source;
