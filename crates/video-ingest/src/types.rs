use chrono::Utc;
use thiserror::Error;

/// Pixel layout of a [`Frame`] buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameFormat {
    Bgr8,
    Rgb8,
    Gray8,
}

impl FrameFormat {
    pub fn channels(self) -> usize {
        match self {
            FrameFormat::Bgr8 | FrameFormat::Rgb8 => 3,
            FrameFormat::Gray8 => 1,
        }
    }
}

/// Raw frame captured from a video source.
///
/// Frames are immutable once published by the capture thread and are shared
/// between stages as `Arc<Frame>`. `sequence` is assigned by the
/// [`FrameSource`](crate::FrameSource) and grows by one per published frame.
#[derive(Clone, Debug)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub format: FrameFormat,
    pub timestamp_ms: i64,
    pub sequence: u64,
}

impl Frame {
    /// Wrap a raw pixel buffer, checking that its length matches the geometry.
    pub fn new(
        data: Vec<u8>,
        width: u32,
        height: u32,
        format: FrameFormat,
    ) -> Result<Self, CaptureError> {
        let expected = (width as usize) * (height as usize) * format.channels();
        if data.len() != expected {
            return Err(CaptureError::Malformed {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            data,
            width,
            height,
            format,
            timestamp_ms: Utc::now().timestamp_millis(),
            sequence: 0,
        })
    }

    /// Solid black frame, used as a placeholder before the first capture.
    pub fn blank(width: u32, height: u32, format: FrameFormat) -> Self {
        let len = (width as usize) * (height as usize) * format.channels();
        Self {
            data: vec![0; len],
            width,
            height,
            format,
            timestamp_ms: Utc::now().timestamp_millis(),
            sequence: 0,
        }
    }

    pub fn channels(&self) -> usize {
        self.format.channels()
    }

    /// Byte offset of the pixel at (`x`, `y`), or `None` when out of bounds.
    pub fn pixel_offset(&self, x: i32, y: i32) -> Option<usize> {
        if x < 0 || y < 0 || x as u32 >= self.width || y as u32 >= self.height {
            return None;
        }
        Some(((y as usize) * (self.width as usize) + (x as usize)) * self.channels())
    }
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("failed to open video source {uri:?}")]
    Open { uri: String },
    #[error("frame buffer holds {actual} bytes, expected {expected}")]
    Malformed { expected: usize, actual: usize },
    #[error("image decode failed: {0}")]
    Image(#[from] image::ImageError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
