//! Runs the three loops (capture, inference, coordinator) and tears them
//! down in order.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use anyhow::{Context, Result};
use tracing::{info, info_span, warn};
use video_ingest::{CaptureDevice, FrameSource};

use crate::pipeline::{
    clock::Clock,
    coordinator::{Coordinator, CoordinatorParts, ShutdownReason, TickOutcome},
    mode::ModeController,
    recorder::EventRecorder,
    sink::FrameSink,
    status::StationStatus,
    watchdog::{spawn_watchdog, PipelineHealth, WatchdogState},
    worker::{InferenceWorker, RecognizerInit},
    LatestFrameBuffer, ResultBuffer,
};

/// Coordinator sleep when no new frame is available.
pub const COORDINATOR_IDLE: Duration = Duration::from_millis(5);

/// Collaborators handed to [`Station::run`].
pub struct StationParts {
    pub device: Box<dyn CaptureDevice>,
    pub recognizer: RecognizerInit,
    pub recorder: EventRecorder,
    pub sink: Box<dyn FrameSink>,
    pub clock: Arc<dyn Clock>,
}

/// Shared control state of one station run.
///
/// Handles (`mode`, `stop_signal`, `status`) can be taken before `run` to
/// wire inputs, signal handlers and the preview server.
pub struct Station {
    mode: Arc<ModeController>,
    stop: Arc<AtomicBool>,
    health: Arc<PipelineHealth>,
    watchdog: Arc<WatchdogState>,
    status: Arc<StationStatus>,
}

impl Station {
    pub fn new() -> Self {
        let mode = Arc::new(ModeController::new());
        let watchdog = Arc::new(WatchdogState::new());
        let health = Arc::new(PipelineHealth::new());
        Self {
            status: Arc::new(StationStatus::new(
                mode.clone(),
                watchdog.clone(),
                health.clone(),
            )),
            mode,
            stop: Arc::new(AtomicBool::new(false)),
            health,
            watchdog,
        }
    }

    pub fn mode(&self) -> Arc<ModeController> {
        self.mode.clone()
    }

    pub fn stop_signal(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    pub fn status(&self) -> Arc<StationStatus> {
        self.status.clone()
    }

    /// Run until power-off or the stop signal.
    ///
    /// Only startup failures (recogniser load, capture thread) are errors.
    /// Shutdown order: stop signal, inference worker joined (its recogniser
    /// released on the way out), capture device released, then sensor and
    /// storage handles closed.
    pub fn run(&self, parts: StationParts) -> Result<ShutdownReason> {
        let StationParts {
            device,
            recognizer,
            recorder,
            sink,
            clock,
        } = parts;
        let span = info_span!("station.pipeline", device = %device.describe());
        let _guard = span.enter();

        let frames = Arc::new(LatestFrameBuffer::new());
        let results = Arc::new(ResultBuffer::new());

        let worker = InferenceWorker::spawn(
            recognizer,
            frames.clone(),
            results.clone(),
            self.stop.clone(),
            self.health.clone(),
        )?;

        let source = match FrameSource::spawn(device) {
            Ok(source) => source,
            Err(err) => {
                self.stop.store(true, Ordering::SeqCst);
                worker.join();
                return Err(err).context("failed to start capture");
            }
        };

        let watchdog = spawn_watchdog(self.health.clone(), self.watchdog.clone(), self.stop.clone())
            .map_err(|err| warn!("watchdog unavailable: {err}"))
            .ok();

        let mut coordinator = Coordinator::new(CoordinatorParts {
            mode: self.mode.clone(),
            frames,
            results,
            recorder,
            sink,
            clock,
            stop: self.stop.clone(),
            health: self.health.clone(),
            status: self.status.clone(),
        });
        metrics::gauge!("station_mode").set(self.mode.current() as u8 as f64);
        info!("station running in {} mode", self.mode.current().label());

        let reason = loop {
            if let Some(reason) = coordinator.shutdown_reason() {
                break reason;
            }
            match coordinator.tick(source.get_latest()) {
                TickOutcome::Shutdown(reason) => break reason,
                TickOutcome::Idle => thread::sleep(COORDINATOR_IDLE),
                TickOutcome::Presented(_) => {}
            }
        };
        info!("shutting down ({reason:?})");

        self.stop.store(true, Ordering::SeqCst);
        worker.join();
        source.shutdown();
        let mut recorder = coordinator.into_recorder();
        recorder.close();
        if let Some(handle) = watchdog {
            let _ = handle.join();
        }
        info!("station stopped");
        Ok(reason)
    }
}

impl Default for Station {
    fn default() -> Self {
        Self::new()
    }
}
