mod acquisition;
mod builder;
#[cfg(all(feature = "camera", target_os = "linux"))]
mod gstreamer;
mod images;
mod mock;
mod source;

pub use acquisition::FrameAcquisition;
pub use builder::VideoSourceBuilder;
#[cfg(all(feature = "camera", target_os = "linux"))]
pub use gstreamer::GStreamerSource;
pub use images::ImageSequenceSource;
pub use mock::{MockRead, MockVideoSource};
pub use source::VideoSource;
