//! Station status shown by the preview server's `/status` endpoint.

use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;

use crate::pipeline::{
    mode::ModeController,
    recorder::RecordOutcome,
    watchdog::{HealthComponent, PipelineHealth, WatchdogState},
};

#[derive(Clone, Debug, Serialize)]
pub struct RecordSummary {
    pub id: u64,
    pub plate: String,
    pub weight_kg: Option<f64>,
    pub timestamp: String,
    pub image_path: String,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct RecordCounters {
    pub recorded: u64,
    pub suppressed: u64,
    pub failed: u64,
}

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub mode: &'static str,
    pub stalled_stage: Option<&'static str>,
    /// Time since the worker last finished an inference. Not a stall signal:
    /// it grows in view-only mode and while the model is slow.
    pub inference_idle_ms: u64,
    pub counters: RecordCounters,
    pub last_record: Option<RecordSummary>,
}

#[derive(Default)]
struct Tally {
    counters: RecordCounters,
    last_record: Option<RecordSummary>,
}

pub struct StationStatus {
    mode: Arc<ModeController>,
    watchdog: Arc<WatchdogState>,
    health: Arc<PipelineHealth>,
    tally: Mutex<Tally>,
}

impl StationStatus {
    pub fn new(
        mode: Arc<ModeController>,
        watchdog: Arc<WatchdogState>,
        health: Arc<PipelineHealth>,
    ) -> Self {
        Self {
            mode,
            watchdog,
            health,
            tally: Mutex::default(),
        }
    }

    pub fn note(&self, outcome: &RecordOutcome) {
        let mut tally = self.tally.lock().unwrap_or_else(PoisonError::into_inner);
        match outcome {
            RecordOutcome::NoPlate => {}
            RecordOutcome::Suppressed => tally.counters.suppressed += 1,
            RecordOutcome::Failed(_) => tally.counters.failed += 1,
            RecordOutcome::Recorded { id, record } => {
                tally.counters.recorded += 1;
                tally.last_record = Some(RecordSummary {
                    id: *id,
                    plate: record.plate.clone(),
                    weight_kg: record.weight_kg,
                    timestamp: record.timestamp.to_rfc3339(),
                    image_path: record.image_path.display().to_string(),
                });
            }
        }
    }

    pub fn report(&self) -> StatusReport {
        let tally = self.tally.lock().unwrap_or_else(PoisonError::into_inner);
        StatusReport {
            mode: self.mode.current().label(),
            stalled_stage: self.watchdog.stalled().map(|component| component.label()),
            inference_idle_ms: self.health.silence(HealthComponent::Inference).as_millis() as u64,
            counters: tally.counters.clone(),
            last_record: tally.last_record.clone(),
        }
    }
}
