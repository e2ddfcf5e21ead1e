//! Operator inputs: panel buttons wired to GPIO and a keyboard fallback.
//!
//! Buttons are read through sysfs-style value files (`/sys/class/gpio/gpioN/value`
//! or any file holding `0`/`1`), polled on a dedicated thread.

use std::{
    fs, io,
    io::BufRead,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use tracing::{debug, info, warn};

pub const BUTTON_POLL_INTERVAL: Duration = Duration::from_millis(10);
pub const MODE_BUTTON_BOUNCE: Duration = Duration::from_millis(300);
pub const POWER_BUTTON_BOUNCE: Duration = Duration::from_millis(2000);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputEvent {
    ModeToggle,
    PowerPress,
}

/// Receiver of operator input. Called from input threads.
pub trait InputHandler: Send + Sync {
    fn handle(&self, event: InputEvent);
}

impl<F> InputHandler for F
where
    F: Fn(InputEvent) + Send + Sync,
{
    fn handle(&self, event: InputEvent) {
        self(event)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Edge {
    Rising,
    Falling,
}

/// Turns sampled levels into debounced press edges.
#[derive(Debug)]
pub struct EdgeDetector {
    edge: Edge,
    bounce: Duration,
    last_level: Option<bool>,
    last_fired: Option<Instant>,
}

impl EdgeDetector {
    pub fn new(edge: Edge, bounce: Duration) -> Self {
        Self {
            edge,
            bounce,
            last_level: None,
            last_fired: None,
        }
    }

    /// Feed one sample; returns true when it completes an accepted press.
    /// The first sample only establishes the resting level.
    pub fn update(&mut self, level: bool, now: Instant) -> bool {
        let previous = self.last_level.replace(level);
        let Some(previous) = previous else {
            return false;
        };
        let is_edge = match self.edge {
            Edge::Rising => !previous && level,
            Edge::Falling => previous && !level,
        };
        if !is_edge {
            return false;
        }
        if let Some(fired) = self.last_fired {
            if now.saturating_duration_since(fired) < self.bounce {
                return false;
            }
        }
        self.last_fired = Some(now);
        true
    }
}

#[derive(Clone, Debug)]
pub struct ButtonConfig {
    pub value_path: PathBuf,
    pub edge: Edge,
    pub bounce: Duration,
    pub event: InputEvent,
}

impl ButtonConfig {
    pub fn mode(value_path: impl Into<PathBuf>) -> Self {
        Self {
            value_path: value_path.into(),
            edge: Edge::Rising,
            bounce: MODE_BUTTON_BOUNCE,
            event: InputEvent::ModeToggle,
        }
    }

    pub fn power(value_path: impl Into<PathBuf>) -> Self {
        Self {
            value_path: value_path.into(),
            edge: Edge::Rising,
            bounce: POWER_BUTTON_BOUNCE,
            event: InputEvent::PowerPress,
        }
    }
}

fn read_level(path: &Path) -> io::Result<bool> {
    let raw = fs::read_to_string(path)?;
    match raw.trim() {
        "1" => Ok(true),
        "0" => Ok(false),
        other => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unexpected gpio value {other:?}"),
        )),
    }
}

/// Polling thread for one button.
pub struct ButtonWatcher {
    label: String,
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl ButtonWatcher {
    /// Starts watching; fails when the value file cannot be read at all.
    pub fn spawn(config: ButtonConfig, handler: Arc<dyn InputHandler>) -> io::Result<Self> {
        let initial = read_level(&config.value_path)?;
        let label = format!("{:?} button {}", config.event, config.value_path.display());
        let stop = Arc::new(AtomicBool::new(false));
        let handle = {
            let stop = stop.clone();
            thread::Builder::new()
                .name("button-poll".into())
                .spawn(move || poll_loop(config, initial, handler, stop))?
        };
        info!("watching {label}");
        Ok(Self {
            label,
            stop,
            handle: Some(handle),
        })
    }

    pub fn stop(mut self) {
        self.stop_and_join();
    }

    fn stop_and_join(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("{} poller panicked", self.label);
            }
        }
    }
}

impl Drop for ButtonWatcher {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}

fn poll_loop(
    config: ButtonConfig,
    initial: bool,
    handler: Arc<dyn InputHandler>,
    stop: Arc<AtomicBool>,
) {
    let mut detector = EdgeDetector::new(config.edge, config.bounce);
    detector.update(initial, Instant::now());
    let mut failing = false;
    while !stop.load(Ordering::Relaxed) {
        match read_level(&config.value_path) {
            Ok(level) => {
                failing = false;
                if detector.update(level, Instant::now()) {
                    debug!(event = ?config.event, "button press");
                    handler.handle(config.event);
                }
            }
            Err(err) => {
                if !failing {
                    warn!("reading {} failed: {err}", config.value_path.display());
                }
                failing = true;
            }
        }
        thread::sleep(BUTTON_POLL_INTERVAL);
    }
}

/// Keyboard mapping: `m` toggles the mode, `q` requests power-off.
pub fn keyboard_event(line: &str) -> Option<InputEvent> {
    match line.trim().to_ascii_lowercase().as_str() {
        "m" | "mode" => Some(InputEvent::ModeToggle),
        "q" | "quit" | "off" => Some(InputEvent::PowerPress),
        _ => None,
    }
}

/// Reads operator commands from stdin on a detached thread.
///
/// Stdin reads cannot be interrupted, so the thread is never joined; it ends
/// with the process or when stdin closes.
pub fn spawn_keyboard_listener(handler: Arc<dyn InputHandler>) -> io::Result<()> {
    thread::Builder::new()
        .name("keyboard".into())
        .spawn(move || {
            let stdin = io::stdin();
            for line in stdin.lock().lines() {
                match line {
                    Ok(line) => match keyboard_event(&line) {
                        Some(event) => handler.handle(event),
                        None if line.trim().is_empty() => {}
                        None => info!("unknown command {line:?}; use m or q"),
                    },
                    Err(err) => {
                        warn!("stdin closed: {err}");
                        break;
                    }
                }
            }
        })?;
    info!("keyboard controls: m + Enter toggles mode, q + Enter powers off");
    Ok(())
}
