//! The inference seam between the pipeline and whatever recognises plates.

use std::sync::Arc;

use anyhow::Result;
use video_ingest::Frame;

use crate::plate::PlateText;

/// Output of one inference pass.
#[derive(Clone, Debug)]
pub struct InferenceResult {
    /// Frame with detections drawn on it, suitable for display.
    pub annotated: Arc<Frame>,
    /// The raw frame the result was computed from; archived as evidence.
    pub source: Arc<Frame>,
    /// Validated plate text, `None` when nothing readable was found.
    pub plate: Option<PlateText>,
}

impl InferenceResult {
    /// A result with no plate that displays the source frame unchanged.
    pub fn nothing(source: &Arc<Frame>) -> Self {
        Self {
            annotated: source.clone(),
            source: source.clone(),
            plate: None,
        }
    }
}

/// Detection + recognition capability, owned by the inference worker thread.
///
/// `infer` may block for as long as the model needs. An `Err` means "no
/// detection this cycle"; callers log it and carry on.
pub trait PlateRecognizer: Send {
    fn infer(&mut self, frame: &Arc<Frame>) -> Result<InferenceResult>;

    /// Free model resources. Called once from the worker thread on shutdown.
    fn release(&mut self) {}

    fn describe(&self) -> String;
}

/// Recogniser that never finds a plate; keeps the station usable as a viewer
/// when no model is configured.
#[derive(Debug, Default)]
pub struct NullRecognizer;

impl PlateRecognizer for NullRecognizer {
    fn infer(&mut self, frame: &Arc<Frame>) -> Result<InferenceResult> {
        Ok(InferenceResult::nothing(frame))
    }

    fn describe(&self) -> String {
        "no recogniser (view only)".into()
    }
}

impl<R: PlateRecognizer + ?Sized> PlateRecognizer for Box<R> {
    fn infer(&mut self, frame: &Arc<Frame>) -> Result<InferenceResult> {
        (**self).infer(frame)
    }

    fn release(&mut self) {
        (**self).release()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}
