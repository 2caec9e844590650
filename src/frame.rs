use crate::error::DecodeError;
use image::GrayImage;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::SystemTime;

/// Pixel layout of a captured frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameFormat {
    /// 8-bit greyscale, one byte per pixel
    Gray8,
    /// RGB24 format - uncompressed RGB data
    Rgb24,
    /// YUV 4:2:2 format - uncompressed YUV data
    Yuyv,
    /// Motion JPEG format - compressed JPEG frames
    Mjpeg,
}

impl FrameFormat {
    /// Get bytes per pixel for the format
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            FrameFormat::Gray8 => 1,
            FrameFormat::Rgb24 => 3,
            FrameFormat::Yuyv => 2,
            FrameFormat::Mjpeg => 0, // Variable size, compressed
        }
    }

    /// Check if format is compressed
    pub fn is_compressed(&self) -> bool {
        matches!(self, FrameFormat::Mjpeg)
    }
}

/// Frame data structure containing raw frame data and metadata
#[derive(Debug, Clone)]
pub struct FrameData {
    /// Unique frame identifier
    pub id: u64,
    /// Timestamp when frame was captured
    pub timestamp: SystemTime,
    /// Raw frame data (shared ownership for efficiency)
    pub data: Arc<Vec<u8>>,
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Frame format
    pub format: FrameFormat,
}

impl FrameData {
    /// Create a new frame data instance
    pub fn new(
        id: u64,
        timestamp: SystemTime,
        data: Vec<u8>,
        width: u32,
        height: u32,
        format: FrameFormat,
    ) -> Self {
        Self {
            id,
            timestamp,
            data: Arc::new(data),
            width,
            height,
            format,
        }
    }

    /// Wrap a greyscale image as a frame
    pub fn from_luma(id: u64, timestamp: SystemTime, image: GrayImage) -> Self {
        let (width, height) = image.dimensions();
        Self::new(id, timestamp, image.into_raw(), width, height, FrameFormat::Gray8)
    }

    /// Get the expected frame size for uncompressed formats
    pub fn expected_size(&self) -> Option<usize> {
        if self.format.is_compressed() {
            None
        } else {
            Some(self.width as usize * self.height as usize * self.format.bytes_per_pixel())
        }
    }

    /// Validate frame data size against expected size
    pub fn validate_size(&self) -> bool {
        match self.expected_size() {
            Some(expected) => self.data.len() == expected,
            None => true,
        }
    }

    /// Convert the frame to an 8-bit greyscale image for symbol detection
    pub fn to_luma(&self) -> Result<GrayImage, DecodeError> {
        if !self.validate_size() {
            return Err(DecodeError::BadDimensions {
                frame_id: self.id,
                width: self.width,
                height: self.height,
                actual: self.data.len(),
            });
        }

        let luma = match self.format {
            FrameFormat::Gray8 => self.data.to_vec(),
            FrameFormat::Rgb24 => self
                .data
                .chunks_exact(3)
                .map(|px| {
                    // ITU-R BT.601 luma weights, integer form
                    ((px[0] as u32 * 299 + px[1] as u32 * 587 + px[2] as u32 * 114) / 1000) as u8
                })
                .collect(),
            // Y0 U Y1 V: every even byte is a luma sample
            FrameFormat::Yuyv => self.data.iter().step_by(2).copied().collect(),
            FrameFormat::Mjpeg => {
                let decoded = image::load_from_memory(&self.data).map_err(|e| {
                    DecodeError::Conversion {
                        details: format!("JPEG decode failed for frame {}: {}", self.id, e),
                    }
                })?;
                return Ok(decoded.to_luma8());
            }
        };

        GrayImage::from_raw(self.width, self.height, luma).ok_or_else(|| {
            DecodeError::BadDimensions {
                frame_id: self.id,
                width: self.width,
                height: self.height,
                actual: self.data.len(),
            }
        })
    }
}
