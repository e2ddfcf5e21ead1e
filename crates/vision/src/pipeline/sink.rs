//! Where the coordinator sends the frame it chose to display.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use actix_web::web::Bytes;
use tracing::debug;
use video_ingest::{imaging::encode_jpeg, Frame, LatestSlot};

pub trait FrameSink: Send {
    fn present(&mut self, frame: &Frame);
}

/// Discards frames (headless station).
#[derive(Debug, Default)]
pub struct NullSink;

impl FrameSink for NullSink {
    fn present(&mut self, _frame: &Frame) {}
}

/// JPEG-encoded display frame shared with the preview server.
#[derive(Clone, Debug)]
pub struct PreviewPacket {
    pub jpeg: Bytes,
    pub sequence: u64,
}

pub type PreviewFrame = LatestSlot<PreviewPacket>;

/// Encodes displayed frames for the preview server, at most one per
/// `min_interval`.
pub struct PreviewSink {
    shared: Arc<PreviewFrame>,
    quality: u8,
    min_interval: Duration,
    last_encoded: Option<Instant>,
    sequence: u64,
}

impl PreviewSink {
    pub fn new(shared: Arc<PreviewFrame>, quality: u8) -> Self {
        Self {
            shared,
            quality,
            min_interval: Duration::from_millis(66),
            last_encoded: None,
            sequence: 0,
        }
    }

    pub fn with_min_interval(mut self, min_interval: Duration) -> Self {
        self.min_interval = min_interval;
        self
    }
}

impl FrameSink for PreviewSink {
    fn present(&mut self, frame: &Frame) {
        let now = Instant::now();
        if self
            .last_encoded
            .is_some_and(|last| now.duration_since(last) < self.min_interval)
        {
            return;
        }
        self.last_encoded = Some(now);
        match encode_jpeg(frame, self.quality) {
            Ok(jpeg) => {
                self.sequence += 1;
                self.shared.put(PreviewPacket {
                    jpeg: Bytes::from(jpeg),
                    sequence: self.sequence,
                });
            }
            Err(err) => debug!("preview encode failed: {err}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use video_ingest::FrameFormat;

    use super::*;

    #[test]
    fn throttles_encoding() {
        let shared = Arc::new(PreviewFrame::new());
        let mut sink =
            PreviewSink::new(shared.clone(), 80).with_min_interval(Duration::from_secs(60));
        let frame = Frame::blank(16, 16, FrameFormat::Bgr8);

        sink.present(&frame);
        sink.present(&frame);

        let packet = shared.peek().unwrap();
        assert_eq!(packet.sequence, 1);
        assert_eq!(&packet.jpeg[..2], &[0xFF, 0xD8]);
    }
}
