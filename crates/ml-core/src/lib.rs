//! Plate recognition for the weigh station.
//!
//! The pipeline only sees [`PlateRecognizer`]. Concrete recognisers:
//! - [`ModelRecognizer`]: vehicle-gated OCR over any [`PlateModel`].
//! - [`SidecarModel`]: a [`PlateModel`] served by an external process.
//! - [`NullRecognizer`]: never reports a plate.

pub mod annotate;
pub mod detector;
pub mod plate;
pub mod recognizer;
pub mod sidecar;

pub use detector::{
    Detection, ModelRecognizer, PlateModel, DETECTION_CONFIDENCE, VEHICLE_CLASSES,
};
pub use plate::{best_plate, PlateError, PlateText, TextCandidate};
pub use recognizer::{InferenceResult, NullRecognizer, PlateRecognizer};
pub use sidecar::SidecarModel;
