//! Station pipeline crate: wires capture, inference, recording and preview.

pub mod pipeline;

pub use pipeline::{
    clock::{Clock, ManualClock, SystemClock},
    config::{StationCliArgs, StationConfig},
    coordinator::{Coordinator, CoordinatorParts, ShutdownReason, TickOutcome},
    mode::{ModeController, OperatingMode},
    recorder::{AdmissionRule, DebounceState, EventRecorder, RecordOutcome, RecorderPolicy},
    run,
    sink::{FrameSink, NullSink, PreviewSink},
    station::{Station, StationParts},
    worker::{InferenceWorker, RecognizerInit},
    LatestFrameBuffer, ResultBuffer,
};
