use super::images::ImageSequenceSource;
use super::source::VideoSource;
use crate::config::CameraConfig;
use crate::error::{AttendanceError, Result, VideoSourceError};

/// Builds the configured frame source
pub struct VideoSourceBuilder {
    config: Option<CameraConfig>,
}

impl VideoSourceBuilder {
    pub fn new() -> Self {
        Self { config: None }
    }

    pub fn config(mut self, config: CameraConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn build(self) -> Result<Box<dyn VideoSource>> {
        let config = self
            .config
            .ok_or_else(|| AttendanceError::system("Camera configuration must be specified"))?;

        match config.source.as_str() {
            "images" => Ok(Box::new(ImageSequenceSource::from_config(&config))),
            #[cfg(all(feature = "camera", target_os = "linux"))]
            "gstreamer" => Ok(Box::new(super::gstreamer::GStreamerSource::new(config))),
            other => Err(VideoSourceError::Unsupported {
                source_name: other.to_string(),
            }
            .into()),
        }
    }
}

impl Default for VideoSourceBuilder {
    fn default() -> Self {
        Self::new()
    }
}
