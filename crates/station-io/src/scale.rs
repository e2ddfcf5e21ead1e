//! Weight sensors.
//!
//! Serial scales stream readings continuously. A background thread keeps only
//! the newest parsed sample, so [`WeightSensor::read_weight`] never waits on
//! the serial line.

use std::{
    io::{self, BufRead, BufReader, Read},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use rand::{rngs::StdRng, Rng, SeedableRng};
use thiserror::Error;
use tracing::{debug, info, warn};
use video_ingest::LatestSlot;

/// Serial line read timeout; bounds how long shutdown waits for the reader.
const SERIAL_TIMEOUT: Duration = Duration::from_millis(500);

/// Readings older than this are not trusted.
pub const MAX_SAMPLE_AGE: Duration = Duration::from_secs(2);

pub const DEFAULT_BAUD: u32 = 9600;

/// Longest scale line kept; longer lines are dropped as unparsable.
const MAX_LINE_BYTES: usize = 256;

#[derive(Debug, Error)]
pub enum SensorError {
    #[error("no weight reading received yet")]
    NoReading,
    #[error("latest weight reading is {age_ms} ms old")]
    Stale { age_ms: u128 },
    #[error("scale is offline")]
    Offline,
    #[error("failed to open scale port {port}: {source}")]
    Open {
        port: String,
        #[source]
        source: serialport::Error,
    },
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Source of the current load on the weighbridge, in kilograms.
pub trait WeightSensor: Send {
    fn read_weight(&mut self) -> Result<f64, SensorError>;

    fn release(&mut self) {}

    fn describe(&self) -> String;
}

/// Extract the first number from a scale output line.
///
/// Handles framed outputs such as `ST,GS,+  3500kg` as well as bare numbers.
/// A sign counts only when it directly precedes the digits.
pub fn parse_weight(line: &str) -> Option<f64> {
    let bytes = line.as_bytes();
    let start = (0..bytes.len()).find(|&i| {
        bytes[i].is_ascii_digit()
            || (bytes[i] == b'.' && bytes.get(i + 1).is_some_and(u8::is_ascii_digit))
    })?;
    let mut end = start;
    let mut seen_dot = false;
    while end < bytes.len() {
        match bytes[end] {
            b'0'..=b'9' => end += 1,
            b'.' if !seen_dot && bytes.get(end + 1).is_some_and(u8::is_ascii_digit) => {
                seen_dot = true;
                end += 1;
            }
            _ => break,
        }
    }
    let signed_start = match start.checked_sub(1).map(|i| bytes[i]) {
        Some(b'-') | Some(b'+') => start - 1,
        _ => start,
    };
    line[signed_start..end].parse().ok()
}

#[derive(Clone, Copy, Debug)]
struct WeightSample {
    kg: f64,
    at: Instant,
}

/// Scale attached to a serial port (or any line-oriented reader).
pub struct SerialScale {
    latest: Arc<LatestSlot<WeightSample>>,
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
    max_age: Duration,
    label: String,
}

impl SerialScale {
    pub fn open(port: &str, baud: u32) -> Result<Self, SensorError> {
        let serial = serialport::new(port, baud)
            .timeout(SERIAL_TIMEOUT)
            .open()
            .map_err(|source| SensorError::Open {
                port: port.to_string(),
                source,
            })?;
        info!("scale connected on {port} @ {baud} baud");
        Ok(Self::from_reader(
            BufReader::new(serial),
            format!("serial scale {port}"),
        )?)
    }

    /// Start the reader thread over an arbitrary line source.
    pub fn from_reader<R>(reader: R, label: String) -> io::Result<Self>
    where
        R: BufRead + Send + 'static,
    {
        let latest = Arc::new(LatestSlot::new());
        let stop = Arc::new(AtomicBool::new(false));
        let handle = {
            let latest = latest.clone();
            let stop = stop.clone();
            thread::Builder::new()
                .name("scale-reader".into())
                .spawn(move || read_loop(reader, latest, stop))?
        };
        Ok(Self {
            latest,
            stop,
            handle: Some(handle),
            max_age: MAX_SAMPLE_AGE,
            label,
        })
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }
}

impl WeightSensor for SerialScale {
    fn read_weight(&mut self) -> Result<f64, SensorError> {
        let sample = self.latest.peek().ok_or(SensorError::NoReading)?;
        let age = sample.at.elapsed();
        if age > self.max_age {
            return Err(SensorError::Stale {
                age_ms: age.as_millis(),
            });
        }
        Ok(sample.kg)
    }

    fn release(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        debug!("{} released", self.label);
    }

    fn describe(&self) -> String {
        self.label.clone()
    }
}

impl Drop for SerialScale {
    fn drop(&mut self) {
        self.release();
    }
}

fn read_loop<R: BufRead>(
    mut reader: R,
    latest: Arc<LatestSlot<WeightSample>>,
    stop: Arc<AtomicBool>,
) {
    let mut line = Vec::with_capacity(MAX_LINE_BYTES + 1);
    // Set while skipping the rest of an oversize line.
    let mut discarding = false;
    while !stop.load(Ordering::Relaxed) {
        if line.len() > MAX_LINE_BYTES {
            if !discarding {
                debug!("dropping scale line longer than {MAX_LINE_BYTES} bytes");
            }
            discarding = true;
            line.clear();
        }
        let budget = (MAX_LINE_BYTES + 1 - line.len()) as u64;
        match (&mut reader).take(budget).read_until(b'\n', &mut line) {
            Ok(0) => {
                if !line.is_empty() && !discarding {
                    publish(&line, &latest);
                }
                debug!("scale stream ended");
                break;
            }
            Ok(_) => {
                if line.ends_with(b"\n") {
                    if !std::mem::take(&mut discarding) {
                        publish(&line, &latest);
                    }
                    line.clear();
                }
            }
            Err(err) if is_transient(&err) => {}
            Err(err) => {
                warn!("scale read failed: {err}");
                line.clear();
                thread::sleep(SERIAL_TIMEOUT);
            }
        }
    }
}

fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

fn publish(raw: &[u8], latest: &LatestSlot<WeightSample>) {
    let text = String::from_utf8_lossy(raw);
    let text = text.trim();
    if text.is_empty() {
        return;
    }
    match parse_weight(text) {
        Some(kg) => {
            latest.put(WeightSample {
                kg,
                at: Instant::now(),
            });
        }
        None => debug!("unparsable scale line: {text:?}"),
    }
}

/// Stand-in scale: a loaded truck around 3.5 t with sensor noise.
pub struct SimulatedScale {
    base_kg: f64,
    noise_kg: f64,
    rng: StdRng,
}

impl SimulatedScale {
    pub fn new() -> Self {
        Self {
            base_kg: 3500.0,
            noise_kg: 10.0,
            rng: StdRng::from_entropy(),
        }
    }

    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            ..Self::new()
        }
    }
}

impl Default for SimulatedScale {
    fn default() -> Self {
        Self::new()
    }
}

impl WeightSensor for SimulatedScale {
    fn read_weight(&mut self) -> Result<f64, SensorError> {
        let noise = self.rng.gen_range(-self.noise_kg..=self.noise_kg);
        Ok(((self.base_kg + noise) * 10.0).round() / 10.0)
    }

    fn describe(&self) -> String {
        "simulated scale".into()
    }
}

/// Scale that could not be reached; every read fails.
#[derive(Debug, Default)]
pub struct OfflineScale;

impl WeightSensor for OfflineScale {
    fn read_weight(&mut self) -> Result<f64, SensorError> {
        Err(SensorError::Offline)
    }

    fn describe(&self) -> String {
        "offline scale".into()
    }
}
