//! Vehicle-gated plate recognition built from two model capabilities.
//!
//! A [`PlateModel`] provides object detection and text reading. The
//! [`ModelRecognizer`] runs OCR only when a vehicle is in view, keeps the most
//! confident reading, and draws the result onto a copy of the frame.

use std::sync::Arc;

use anyhow::Result;
use serde::Deserialize;
use tracing::{debug, warn};
use video_ingest::Frame;

use crate::{
    annotate::{draw_banner, draw_rectangle, BLACK, GREEN, ORANGE},
    plate::{best_plate, TextCandidate},
    recognizer::{InferenceResult, PlateRecognizer},
};

/// COCO class ids counted as vehicles: car, bus, truck.
pub const VEHICLE_CLASSES: [i64; 3] = [2, 5, 7];

/// Detections below this score are ignored.
pub const DETECTION_CONFIDENCE: f32 = 0.5;

/// Single object detection in frame pixel coordinates.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct Detection {
    /// `[left, top, right, bottom]`.
    pub bbox: [f32; 4],
    pub score: f32,
    pub class_id: i64,
}

impl Detection {
    pub fn is_vehicle(&self) -> bool {
        VEHICLE_CLASSES.contains(&self.class_id)
    }

    fn label(&self) -> &'static str {
        match self.class_id {
            2 => "CAR",
            5 => "BUS",
            7 => "TRUCK",
            _ => "OBJECT",
        }
    }
}

/// The two model capabilities the recogniser composes.
pub trait PlateModel: Send {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>>;

    fn read_text(&mut self, frame: &Frame) -> Result<Vec<TextCandidate>>;

    fn release(&mut self) {}

    fn describe(&self) -> String;
}

pub struct ModelRecognizer<M> {
    model: M,
    confidence_threshold: f32,
}

impl<M: PlateModel> ModelRecognizer<M> {
    pub fn new(model: M) -> Self {
        Self {
            model,
            confidence_threshold: DETECTION_CONFIDENCE,
        }
    }

    /// Override the confidence threshold used for filtering detections.
    pub fn with_confidence_threshold(mut self, confidence: f32) -> Self {
        self.confidence_threshold = confidence;
        self
    }
}

impl<M: PlateModel> PlateRecognizer for ModelRecognizer<M> {
    fn infer(&mut self, frame: &Arc<Frame>) -> Result<InferenceResult> {
        let detections: Vec<Detection> = self
            .model
            .detect(frame)?
            .into_iter()
            .filter(|det| det.score >= self.confidence_threshold)
            .filter(|det| {
                let finite = det.bbox.iter().all(|v| v.is_finite());
                if !finite {
                    warn!("frame #{}: dropping box {:?}", frame.sequence, det.bbox);
                }
                finite
            })
            .collect();

        let plate = if detections.iter().any(Detection::is_vehicle) {
            let candidates = self.model.read_text(frame)?;
            debug!("frame #{}: {} OCR candidate(s)", frame.sequence, candidates.len());
            best_plate(&candidates)
        } else {
            None
        };

        if detections.is_empty() && plate.is_none() {
            return Ok(InferenceResult::nothing(frame));
        }

        let mut annotated = Frame::clone(frame);
        for det in &detections {
            let [left, top, right, bottom] = det.bbox.map(|v| v.round() as i32);
            let color = if det.is_vehicle() { GREEN } else { ORANGE };
            draw_rectangle(&mut annotated, left, top, right, bottom, 2, color);
            let label = format!("{} {:.0}%", det.label(), det.score * 100.0);
            let (label_x, label_y) = (left.saturating_add(2), top.saturating_sub(12).max(2));
            draw_banner(&mut annotated, label_x, label_y, &label, 1, color, BLACK);
        }
        if let Some(plate) = &plate {
            draw_banner(
                &mut annotated,
                20,
                50,
                &format!("PLATE: {plate}"),
                3,
                GREEN,
                BLACK,
            );
        }

        Ok(InferenceResult {
            annotated: Arc::new(annotated),
            source: frame.clone(),
            plate,
        })
    }

    fn release(&mut self) {
        self.model.release();
    }

    fn describe(&self) -> String {
        self.model.describe()
    }
}

#[cfg(test)]
mod tests {
    use anyhow::bail;
    use video_ingest::FrameFormat;

    use super::*;

    struct FakeModel {
        detections: Vec<Detection>,
        readings: Vec<TextCandidate>,
        ocr_calls: usize,
        fail_ocr: bool,
    }

    impl FakeModel {
        fn new(detections: Vec<Detection>, readings: Vec<TextCandidate>) -> Self {
            Self {
                detections,
                readings,
                ocr_calls: 0,
                fail_ocr: false,
            }
        }
    }

    impl PlateModel for FakeModel {
        fn detect(&mut self, _frame: &Frame) -> Result<Vec<Detection>> {
            Ok(self.detections.clone())
        }

        fn read_text(&mut self, _frame: &Frame) -> Result<Vec<TextCandidate>> {
            self.ocr_calls += 1;
            if self.fail_ocr {
                bail!("ocr backend crashed");
            }
            Ok(self.readings.clone())
        }

        fn describe(&self) -> String {
            "fake".into()
        }
    }

    fn truck(score: f32) -> Detection {
        Detection {
            bbox: [10.0, 10.0, 60.0, 40.0],
            score,
            class_id: 7,
        }
    }

    fn reading(text: &str) -> TextCandidate {
        TextCandidate {
            text: text.into(),
            confidence: 0.9,
        }
    }

    fn frame() -> Arc<Frame> {
        Arc::new(Frame::blank(160, 120, FrameFormat::Bgr8))
    }

    #[test]
    fn reads_plate_when_vehicle_present() {
        let mut recognizer =
            ModelRecognizer::new(FakeModel::new(vec![truck(0.8)], vec![reading("abc1234")]));
        let source = frame();
        let result = recognizer.infer(&source).unwrap();
        assert_eq!(result.plate.unwrap().as_str(), "ABC1234");
        assert!(Arc::ptr_eq(&result.source, &source));
        assert!(!Arc::ptr_eq(&result.annotated, &source));
    }

    #[test]
    fn skips_ocr_without_a_confident_vehicle() {
        let person = Detection {
            bbox: [0.0, 0.0, 5.0, 5.0],
            score: 0.9,
            class_id: 0,
        };
        let mut recognizer = ModelRecognizer::new(FakeModel::new(
            vec![person, truck(0.3)],
            vec![reading("ABC1234")],
        ));
        let result = recognizer.infer(&frame()).unwrap();
        assert!(result.plate.is_none());
        assert_eq!(recognizer.model.ocr_calls, 0);
    }

    #[test]
    fn empty_scene_passes_frame_through() {
        let mut recognizer = ModelRecognizer::new(FakeModel::new(vec![], vec![]));
        let source = frame();
        let result = recognizer.infer(&source).unwrap();
        assert!(Arc::ptr_eq(&result.annotated, &source));
    }

    #[test]
    fn malformed_boxes_are_drawn_clipped_or_dropped() {
        let huge = Detection {
            bbox: [-3e9, -3e9, 3e9, 3e9],
            score: 0.9,
            class_id: 7,
        };
        let nan = Detection {
            bbox: [f32::NAN, 0.0, f32::INFINITY, 10.0],
            score: 0.9,
            class_id: 2,
        };
        let mut recognizer =
            ModelRecognizer::new(FakeModel::new(vec![huge, nan], vec![reading("ABC1234")]));
        let started = std::time::Instant::now();
        let result = recognizer.infer(&frame()).unwrap();
        assert!(started.elapsed() < std::time::Duration::from_secs(1));
        assert_eq!(result.plate.unwrap().as_str(), "ABC1234");
        assert_eq!(recognizer.model.ocr_calls, 1);
    }

    #[test]
    fn ocr_failure_surfaces_as_error() {
        let mut model = FakeModel::new(vec![truck(0.9)], vec![]);
        model.fail_ocr = true;
        let mut recognizer = ModelRecognizer::new(model);
        assert!(recognizer.infer(&frame()).is_err());
    }
}
