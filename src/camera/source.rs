use crate::error::VideoSourceError;
use crate::frame::FrameData;

/// A blocking frame producer driven from the acquisition thread
pub trait VideoSource: Send {
    /// Prepare the device. Called once before the first read.
    fn open(&mut self) -> Result<(), VideoSourceError>;

    /// Block until the next frame is available or the read fails
    fn read_frame(&mut self) -> Result<FrameData, VideoSourceError>;

    /// Give the device back. Safe to call more than once.
    fn release(&mut self);

    /// Short name for logs
    fn describe(&self) -> String;
}
