use super::source::VideoSource;
use crate::error::VideoSourceError;
use crate::frame::{FrameData, FrameFormat};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

/// One scripted read
#[derive(Debug, Clone)]
pub enum MockRead {
    Frame(FrameData),
    Fail(String),
}

/// Scripted source for exercising acquisition without hardware.
///
/// Reads follow the script in order; once it runs out every read repeats
/// the fallback (a failure unless [`MockVideoSource::repeating`] was used).
pub struct MockVideoSource {
    script: VecDeque<MockRead>,
    fallback: MockRead,
    open_error: Option<String>,
    released: Arc<AtomicBool>,
    next_id: u64,
}

impl MockVideoSource {
    pub fn new() -> Self {
        Self {
            script: VecDeque::new(),
            fallback: MockRead::Fail("script exhausted".to_string()),
            open_error: None,
            released: Arc::new(AtomicBool::new(false)),
            next_id: 0,
        }
    }

    pub fn with_frame(mut self, frame: FrameData) -> Self {
        self.script.push_back(MockRead::Frame(frame));
        self
    }

    /// Append `count` blank gray frames
    pub fn with_blank_frames(mut self, count: usize, width: u32, height: u32) -> Self {
        for _ in 0..count {
            let frame = self.blank_frame(width, height);
            self.script.push_back(MockRead::Frame(frame));
        }
        self
    }

    pub fn with_failures(mut self, count: usize) -> Self {
        for n in 0..count {
            self.script
                .push_back(MockRead::Fail(format!("scripted failure {}", n + 1)));
        }
        self
    }

    /// Keep returning `frame` after the script ends
    pub fn repeating(mut self, frame: FrameData) -> Self {
        self.fallback = MockRead::Frame(frame);
        self
    }

    pub fn failing_open(mut self, details: &str) -> Self {
        self.open_error = Some(details.to_string());
        self
    }

    /// Flag set once the source has been released
    pub fn released_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.released)
    }

    fn blank_frame(&mut self, width: u32, height: u32) -> FrameData {
        let id = self.next_id;
        self.next_id += 1;
        FrameData::new(
            id,
            SystemTime::now(),
            vec![0x80; (width * height) as usize],
            width,
            height,
            FrameFormat::Gray8,
        )
    }
}

impl Default for MockVideoSource {
    fn default() -> Self {
        Self::new()
    }
}

impl VideoSource for MockVideoSource {
    fn open(&mut self) -> Result<(), VideoSourceError> {
        match &self.open_error {
            Some(details) => Err(VideoSourceError::Open {
                source_name: self.describe(),
                details: details.clone(),
            }),
            None => Ok(()),
        }
    }

    fn read_frame(&mut self) -> Result<FrameData, VideoSourceError> {
        let step = self
            .script
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());

        match step {
            MockRead::Frame(frame) => Ok(frame),
            MockRead::Fail(details) => Err(VideoSourceError::Read { details }),
        }
    }

    fn release(&mut self) {
        self.released.store(true, Ordering::Release);
    }

    fn describe(&self) -> String {
        "mock".to_string()
    }
}
