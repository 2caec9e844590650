use super::source::VideoSource;
use crate::config::CameraConfig;
use crate::error::VideoSourceError;
use crate::frame::{FrameData, FrameFormat};
use gstreamer::prelude::*;
use gstreamer::Pipeline;
use gstreamer_app::AppSink;
use gstreamer_video::VideoInfo;
use std::time::SystemTime;
use tracing::{debug, info, trace, warn};

/// V4L2 camera through GStreamer, converted to GRAY8 before it reaches the appsink
pub struct GStreamerSource {
    config: CameraConfig,
    pipeline: Option<Pipeline>,
    appsink: Option<AppSink>,
    next_id: u64,
}

impl GStreamerSource {
    pub fn new(config: CameraConfig) -> Self {
        Self {
            config,
            pipeline: None,
            appsink: None,
            next_id: 0,
        }
    }

    fn pipeline_description(&self) -> String {
        let (width, height) = self.config.resolution;

        format!(
            "v4l2src device=/dev/video{} do-timestamp=true ! \
             videoconvert ! videoscale ! \
             video/x-raw,format=GRAY8,width={},height={},framerate={}/1 ! \
             appsink name=sink sync=false max-buffers=1 drop=true emit-signals=false",
            self.config.index, width, height, self.config.fps
        )
    }

    fn open_error(&self, details: String) -> VideoSourceError {
        VideoSourceError::Open {
            source_name: self.describe(),
            details,
        }
    }

    fn sample_to_frame(&mut self, sample: gstreamer::Sample) -> Result<FrameData, VideoSourceError> {
        let read_error = |details: String| VideoSourceError::Read { details };

        let buffer = sample
            .buffer()
            .ok_or_else(|| read_error("No buffer in sample".to_string()))?;
        let caps = sample
            .caps()
            .ok_or_else(|| read_error("No caps in sample".to_string()))?;
        let video_info = VideoInfo::from_caps(caps)
            .map_err(|e| read_error(format!("Failed to get video info: {}", e)))?;

        let width = video_info.width();
        let height = video_info.height();
        let stride = video_info.stride()[0] as usize;

        let map = buffer
            .map_readable()
            .map_err(|e| read_error(format!("Failed to map buffer: {}", e)))?;
        let bytes = map.as_slice();

        // Rows may be padded; keep only the visible pixels
        let row = width as usize;
        let data = if stride == row {
            bytes.get(..row * height as usize).map(<[u8]>::to_vec)
        } else {
            (0..height as usize)
                .map(|y| bytes.get(y * stride..y * stride + row))
                .collect::<Option<Vec<_>>>()
                .map(|rows| rows.concat())
        }
        .ok_or_else(|| read_error(format!("Short buffer ({} bytes)", bytes.len())))?;

        let id = self.next_id;
        self.next_id += 1;
        trace!("Captured frame {} ({}x{})", id, width, height);

        Ok(FrameData::new(
            id,
            SystemTime::now(),
            data,
            width,
            height,
            FrameFormat::Gray8,
        ))
    }
}

impl VideoSource for GStreamerSource {
    fn open(&mut self) -> Result<(), VideoSourceError> {
        gstreamer::init().map_err(|e| self.open_error(format!("GStreamer init failed: {}", e)))?;

        let description = self.pipeline_description();
        info!("Creating GStreamer pipeline: {}", description);

        let pipeline = gstreamer::parse::launch(&description)
            .map_err(|e| self.open_error(format!("Failed to create pipeline: {}", e)))?
            .downcast::<Pipeline>()
            .map_err(|_| self.open_error("Failed to downcast to Pipeline".to_string()))?;

        let appsink = pipeline
            .by_name("sink")
            .ok_or_else(|| self.open_error("Pipeline has no appsink".to_string()))?
            .downcast::<AppSink>()
            .map_err(|_| self.open_error("Failed to downcast to AppSink".to_string()))?;

        pipeline
            .set_state(gstreamer::State::Playing)
            .map_err(|e| self.open_error(format!("Failed to start pipeline: {}", e)))?;

        self.pipeline = Some(pipeline);
        self.appsink = Some(appsink);
        Ok(())
    }

    fn read_frame(&mut self) -> Result<FrameData, VideoSourceError> {
        let appsink = self.appsink.as_ref().ok_or_else(|| VideoSourceError::Read {
            details: "pipeline is not open".to_string(),
        })?;

        let timeout = gstreamer::ClockTime::from_mseconds(self.config.read_timeout_ms);
        let sample = appsink.try_pull_sample(timeout);
        let eos = sample.is_none() && appsink.is_eos();

        match sample {
            Some(sample) => self.sample_to_frame(sample),
            None if eos => Err(VideoSourceError::Read {
                details: "end of stream".to_string(),
            }),
            None => Err(VideoSourceError::Read {
                details: format!("no frame within {}ms", self.config.read_timeout_ms),
            }),
        }
    }

    fn release(&mut self) {
        self.appsink = None;
        if let Some(pipeline) = self.pipeline.take() {
            if let Err(e) = pipeline.set_state(gstreamer::State::Null) {
                warn!("Failed to stop GStreamer pipeline: {}", e);
            } else {
                debug!("GStreamer pipeline released");
            }
        }
    }

    fn describe(&self) -> String {
        format!("/dev/video{}", self.config.index)
    }
}

impl Drop for GStreamerSource {
    fn drop(&mut self) {
        self.release();
    }
}
