//! Watchdog that reports stalled pipeline stages.
//!
//! Stages beat a shared [`PipelineHealth`]. The watchdog only logs: a stalled
//! stage is reported once per stall episode and surfaced through `/status`,
//! but nothing is restarted or stopped.

use std::{
    io,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex, PoisonError,
    },
    thread,
    time::{Duration, Instant},
};

use tracing::{info, warn};

use crate::pipeline::telemetry;

/// Sleep interval between watchdog health checks.
pub(crate) const WATCHDOG_POLL_INTERVAL: Duration = Duration::from_millis(500);
/// Time without a heartbeat before a monitored stage is considered stalled.
pub const WATCHDOG_STALE_THRESHOLD: Duration = Duration::from_secs(3);
/// Grace period at startup allowing devices and models to warm up.
pub(crate) const WATCHDOG_STARTUP_GRACE: Duration = Duration::from_secs(5);

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum HealthComponent {
    Capture,
    Inference,
    Coordinator,
}

impl HealthComponent {
    pub fn label(self) -> &'static str {
        match self {
            HealthComponent::Capture => "capture",
            HealthComponent::Inference => "inference",
            HealthComponent::Coordinator => "coordinator",
        }
    }
}

/// Heartbeats, in milliseconds since the tracker was created.
pub struct PipelineHealth {
    origin: Instant,
    capture: AtomicU64,
    inference: AtomicU64,
    coordinator: AtomicU64,
}

impl PipelineHealth {
    pub fn new() -> Self {
        Self::with_grace(WATCHDOG_STARTUP_GRACE)
    }

    pub(crate) fn with_grace(grace: Duration) -> Self {
        let grace = grace.as_millis() as u64;
        Self {
            origin: Instant::now(),
            capture: AtomicU64::new(grace),
            inference: AtomicU64::new(grace),
            coordinator: AtomicU64::new(grace),
        }
    }

    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }

    fn slot(&self, component: HealthComponent) -> &AtomicU64 {
        match component {
            HealthComponent::Capture => &self.capture,
            HealthComponent::Inference => &self.inference,
            HealthComponent::Coordinator => &self.coordinator,
        }
    }

    pub fn beat(&self, component: HealthComponent) {
        self.slot(component).store(self.now_ms(), Ordering::Relaxed);
    }

    /// Time since the last beat (zero during the startup grace period).
    pub fn silence(&self, component: HealthComponent) -> Duration {
        let last = self.slot(component).load(Ordering::Relaxed);
        Duration::from_millis(self.now_ms().saturating_sub(last))
    }

    /// First monitored stage that has been silent longer than `threshold`.
    ///
    /// Inference is not monitored: in view-only mode it legitimately idles.
    /// Its idle time is reported through `/status` instead.
    pub fn stale_component(&self, threshold: Duration) -> Option<HealthComponent> {
        [HealthComponent::Capture, HealthComponent::Coordinator]
            .into_iter()
            .find(|&component| self.silence(component) > threshold)
    }
}

impl Default for PipelineHealth {
    fn default() -> Self {
        Self::new()
    }
}

/// Stalled stage currently reported by the watchdog, if any.
#[derive(Default)]
pub struct WatchdogState {
    stalled: Mutex<Option<HealthComponent>>,
}

impl WatchdogState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stalled(&self) -> Option<HealthComponent> {
        *self.stalled.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record the latest observation; returns the previous one.
    fn observe(&self, stalled: Option<HealthComponent>) -> Option<HealthComponent> {
        let mut guard = self.stalled.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *guard, stalled)
    }
}

/// Apply one health check, logging only on transitions.
pub(crate) fn check(health: &PipelineHealth, state: &WatchdogState, threshold: Duration) {
    let stalled = health.stale_component(threshold);
    let previous = state.observe(stalled);
    match (previous, stalled) {
        (prev, Some(component)) if prev != Some(component) => {
            warn!(
                "{} stage has not made progress for {:.1}s",
                component.label(),
                health.silence(component).as_secs_f32()
            );
        }
        (Some(component), None) => info!("{} stage recovered", component.label()),
        _ => {}
    }
}

pub(crate) fn spawn_watchdog(
    health: Arc<PipelineHealth>,
    state: Arc<WatchdogState>,
    stop: Arc<AtomicBool>,
) -> io::Result<thread::JoinHandle<()>> {
    telemetry::spawn_thread("station-watchdog", move || {
        while !stop.load(Ordering::Relaxed) {
            thread::sleep(WATCHDOG_POLL_INTERVAL);
            check(&health, &state, WATCHDOG_STALE_THRESHOLD);
        }
    })
}
