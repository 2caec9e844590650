use super::source::VideoSource;
use crate::config::CameraConfig;
use crate::error::VideoSourceError;
use crate::frame::FrameData;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, info};

const IMAGE_EXTENSIONS: [&str; 6] = ["png", "jpg", "jpeg", "bmp", "pgm", "gif"];

/// Cycles through the still images in a directory at a fixed frame rate.
///
/// Stands in for a camera on machines without one: print badges, save the
/// photos to a folder and point the scanner at it.
pub struct ImageSequenceSource {
    dir: PathBuf,
    files: Vec<PathBuf>,
    position: usize,
    next_id: u64,
    frame_interval: Duration,
    last_read: Option<Instant>,
}

impl ImageSequenceSource {
    pub fn new(dir: impl Into<PathBuf>, fps: u32) -> Self {
        Self {
            dir: dir.into(),
            files: Vec::new(),
            position: 0,
            next_id: 0,
            frame_interval: Duration::from_millis(1000 / u64::from(fps.max(1))),
            last_read: None,
        }
    }

    pub fn from_config(config: &CameraConfig) -> Self {
        Self::new(&config.image_dir, config.fps)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    fn pace(&mut self) {
        if let Some(last) = self.last_read {
            let elapsed = last.elapsed();
            if elapsed < self.frame_interval {
                std::thread::sleep(self.frame_interval - elapsed);
            }
        }
        self.last_read = Some(Instant::now());
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
}

impl VideoSource for ImageSequenceSource {
    fn open(&mut self) -> Result<(), VideoSourceError> {
        let open_error = |details: String| VideoSourceError::Open {
            source_name: self.describe(),
            details,
        };

        let entries = fs::read_dir(&self.dir).map_err(|e| open_error(e.to_string()))?;

        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file() && is_image(path))
            .collect();
        files.sort();

        if files.is_empty() {
            return Err(open_error("no image files found".to_string()));
        }

        info!(
            "Image source {} opened with {} images",
            self.dir.display(),
            files.len()
        );
        self.files = files;
        self.position = 0;
        Ok(())
    }

    fn read_frame(&mut self) -> Result<FrameData, VideoSourceError> {
        if self.files.is_empty() {
            return Err(VideoSourceError::Read {
                details: "image source is not open".to_string(),
            });
        }

        self.pace();

        let path = &self.files[self.position];
        self.position = (self.position + 1) % self.files.len();

        let image = image::open(path).map_err(|e| VideoSourceError::Read {
            details: format!("{}: {}", path.display(), e),
        })?;

        let id = self.next_id;
        self.next_id += 1;
        debug!("Read frame {} from {}", id, path.display());

        Ok(FrameData::from_luma(id, SystemTime::now(), image.to_luma8()))
    }

    fn release(&mut self) {
        self.files.clear();
        self.last_read = None;
    }

    fn describe(&self) -> String {
        format!("images:{}", self.dir.display())
    }
}
