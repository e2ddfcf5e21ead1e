//! Operating mode state machine.
//!
//! `DETECTION <-> VIEW_ONLY` flip on mode-toggle presses; a power press moves
//! to `POWER_OFF`, which nothing leaves. Events arrive from input threads, the
//! coordinator reads the mode every tick, so the state is a single atomic.

use std::sync::atomic::{AtomicU8, Ordering};

use ml_core::annotate::{Color, GREEN, ORANGE, WHITE};
use station_io::{InputEvent, InputHandler};
use tracing::info;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum OperatingMode {
    Detection = 0,
    ViewOnly = 1,
    PowerOff = 2,
}

impl OperatingMode {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => OperatingMode::Detection,
            1 => OperatingMode::ViewOnly,
            _ => OperatingMode::PowerOff,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            OperatingMode::Detection => "DETECTION",
            OperatingMode::ViewOnly => "VIEW ONLY",
            OperatingMode::PowerOff => "POWER OFF",
        }
    }

    pub fn banner_color(self) -> Color {
        match self {
            OperatingMode::Detection => GREEN,
            OperatingMode::ViewOnly => ORANGE,
            OperatingMode::PowerOff => WHITE,
        }
    }
}

#[derive(Debug)]
pub struct ModeController {
    state: AtomicU8,
}

impl ModeController {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(OperatingMode::Detection as u8),
        }
    }

    pub fn current(&self) -> OperatingMode {
        OperatingMode::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_power_off(&self) -> bool {
        self.current() == OperatingMode::PowerOff
    }

    /// Flip between detection and view-only. Returns the mode after the
    /// event; a no-op once powered off.
    pub fn toggle(&self) -> OperatingMode {
        let result = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |raw| {
                match OperatingMode::from_u8(raw) {
                    OperatingMode::Detection => Some(OperatingMode::ViewOnly as u8),
                    OperatingMode::ViewOnly => Some(OperatingMode::Detection as u8),
                    OperatingMode::PowerOff => None,
                }
            });
        match result {
            Ok(previous) => {
                let next = match OperatingMode::from_u8(previous) {
                    OperatingMode::Detection => OperatingMode::ViewOnly,
                    _ => OperatingMode::Detection,
                };
                info!("mode switched to {}", next.label());
                metrics::gauge!("station_mode").set(next as u8 as f64);
                next
            }
            Err(_) => OperatingMode::PowerOff,
        }
    }

    /// Enter `POWER_OFF`. Returns true only for the call that made the
    /// transition.
    pub fn power_off(&self) -> bool {
        let previous = self
            .state
            .swap(OperatingMode::PowerOff as u8, Ordering::AcqRel);
        let transitioned = OperatingMode::from_u8(previous) != OperatingMode::PowerOff;
        if transitioned {
            info!("power-off requested");
            metrics::gauge!("station_mode").set(OperatingMode::PowerOff as u8 as f64);
        }
        transitioned
    }
}

impl Default for ModeController {
    fn default() -> Self {
        Self::new()
    }
}

impl InputHandler for ModeController {
    fn handle(&self, event: InputEvent) {
        match event {
            InputEvent::ModeToggle => {
                self.toggle();
            }
            InputEvent::PowerPress => {
                self.power_off();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread};

    use super::*;

    #[test]
    fn starts_in_detection_and_toggles() {
        let mode = ModeController::new();
        assert_eq!(mode.current(), OperatingMode::Detection);
        assert_eq!(mode.toggle(), OperatingMode::ViewOnly);
        assert_eq!(mode.toggle(), OperatingMode::Detection);
    }

    #[test]
    fn power_off_is_terminal_and_idempotent() {
        let mode = ModeController::new();
        mode.toggle();
        assert!(mode.power_off());
        assert!(!mode.power_off());
        assert_eq!(mode.toggle(), OperatingMode::PowerOff);
        mode.handle(InputEvent::ModeToggle);
        mode.handle(InputEvent::PowerPress);
        assert_eq!(mode.current(), OperatingMode::PowerOff);
    }

    #[test]
    fn even_number_of_concurrent_toggles_returns_to_start() {
        let mode = Arc::new(ModeController::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let mode = mode.clone();
                thread::spawn(move || {
                    for _ in 0..100 {
                        mode.handle(InputEvent::ModeToggle);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(mode.current(), OperatingMode::Detection);
    }
}
