//! The coordinator tick: moves frames between stages, applies the mode,
//! hands results to the recorder, and feeds the display sink.
//!
//! A tick never blocks on another stage.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Instant,
};

use ml_core::annotate::{draw_banner, BLACK};
use tracing::{debug, trace};
use video_ingest::Frame;

use crate::pipeline::{
    clock::Clock,
    mode::{ModeController, OperatingMode},
    recorder::{EventRecorder, RecordOutcome},
    sink::FrameSink,
    status::StationStatus,
    watchdog::{HealthComponent, PipelineHealth},
    LatestFrameBuffer, ResultBuffer,
};

const BANNER_SCALE: i32 = 3;
const BANNER_ORIGIN: (i32, i32) = (12, 12);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShutdownReason {
    /// Power button (or `q`) pressed; the optional power-off command runs.
    PowerOff,
    /// External stop signal, e.g. Ctrl+C.
    Interrupted,
}

#[derive(Debug)]
pub enum TickOutcome {
    /// The station is shutting down; no work was done.
    Shutdown(ShutdownReason),
    /// No new frame since the previous tick.
    Idle,
    /// A frame was presented; carries the recorder's verdict when a result
    /// was consumed in detection mode.
    Presented(Option<RecordOutcome>),
}

/// Stage handles the coordinator needs.
pub struct CoordinatorParts {
    pub mode: Arc<ModeController>,
    pub frames: Arc<LatestFrameBuffer>,
    pub results: Arc<ResultBuffer>,
    pub recorder: EventRecorder,
    pub sink: Box<dyn FrameSink>,
    pub clock: Arc<dyn Clock>,
    pub stop: Arc<AtomicBool>,
    pub health: Arc<PipelineHealth>,
    pub status: Arc<StationStatus>,
}

pub struct Coordinator {
    parts: CoordinatorParts,
    last_sequence: Option<u64>,
    displayed: Option<Arc<Frame>>,
}

impl Coordinator {
    pub fn new(parts: CoordinatorParts) -> Self {
        Self {
            parts,
            last_sequence: None,
            displayed: None,
        }
    }

    /// Why the loop should end, checked at every tick boundary.
    pub fn shutdown_reason(&self) -> Option<ShutdownReason> {
        if self.parts.mode.is_power_off() {
            Some(ShutdownReason::PowerOff)
        } else if self.parts.stop.load(Ordering::SeqCst) {
            Some(ShutdownReason::Interrupted)
        } else {
            None
        }
    }

    /// Run one tick with the newest captured frame.
    ///
    /// Without a new frame the tick still records a finished inference
    /// result in detection mode, so a plate read from the last frame before
    /// the camera went quiet is not lost.
    pub fn tick(&mut self, latest: Option<Arc<Frame>>) -> TickOutcome {
        self.parts.health.beat(HealthComponent::Coordinator);
        let mode = self.parts.mode.current();
        if mode == OperatingMode::PowerOff {
            return TickOutcome::Shutdown(ShutdownReason::PowerOff);
        }

        let fresh = latest.filter(|frame| self.last_sequence != Some(frame.sequence));
        let Some(frame) = fresh else {
            return self.present_pending_result(mode);
        };
        self.last_sequence = Some(frame.sequence);
        self.parts.health.beat(HealthComponent::Capture);
        let started = Instant::now();

        let (shown, verdict) = match mode {
            OperatingMode::Detection => {
                if self.parts.frames.put(frame.clone()) {
                    metrics::counter!("station_frames_overwritten_total", "buffer" => "frame")
                        .increment(1);
                }
                let verdict = self.record_pending_result();
                let shown = self.displayed.clone().unwrap_or_else(|| frame.clone());
                (shown, verdict)
            }
            _ => {
                // Results computed before the switch must not be recorded later.
                if self.parts.results.try_take().is_some() {
                    debug!("discarded inference result in view-only mode");
                }
                self.displayed = None;
                (frame.clone(), None)
            }
        };

        self.present(&shown, mode);
        metrics::histogram!("station_tick_seconds").record(started.elapsed().as_secs_f64());
        trace!(sequence = frame.sequence, "tick");
        TickOutcome::Presented(verdict)
    }

    fn present_pending_result(&mut self, mode: OperatingMode) -> TickOutcome {
        if mode != OperatingMode::Detection {
            return TickOutcome::Idle;
        }
        let Some(verdict) = self.record_pending_result() else {
            return TickOutcome::Idle;
        };
        if let Some(shown) = self.displayed.clone() {
            self.present(&shown, mode);
        }
        TickOutcome::Presented(Some(verdict))
    }

    fn record_pending_result(&mut self) -> Option<RecordOutcome> {
        let result = self.parts.results.try_take()?;
        let outcome = self.parts.recorder.consider(
            &result,
            self.parts.clock.elapsed(),
            self.parts.clock.wall(),
        );
        self.parts.status.note(&outcome);
        self.displayed = Some(result.annotated);
        Some(outcome)
    }

    fn present(&mut self, shown: &Frame, mode: OperatingMode) {
        let mut out = Frame::clone(shown);
        let (x, y) = BANNER_ORIGIN;
        draw_banner(
            &mut out,
            x,
            y,
            &format!("MODE: {}", mode.label()),
            BANNER_SCALE,
            mode.banner_color(),
            BLACK,
        );
        self.parts.sink.present(&out);
    }

    /// Tear down, handing back the recorder so its handles can be closed
    /// after the other stages stop.
    pub fn into_recorder(self) -> EventRecorder {
        self.parts.recorder
    }
}
