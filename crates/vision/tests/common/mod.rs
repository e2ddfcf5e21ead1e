#![allow(dead_code)]

use std::{
    io,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    thread,
    time::{Duration, Instant},
};

use anyhow::Result;
use chrono::{DateTime, Utc};
use ml_core::{InferenceResult, PlateRecognizer, PlateText};
use station_io::{ImageStore, Record, RecordStore, SensorError, StorageError, WeightSensor};
use video_ingest::{Frame, FrameFormat};
use vision::FrameSink;

pub const WIDTH: u32 = 320;
pub const HEIGHT: u32 = 240;

pub fn blank() -> Frame {
    Frame::blank(WIDTH, HEIGHT, FrameFormat::Bgr8)
}

pub fn frame(sequence: u64) -> Arc<Frame> {
    let mut frame = blank();
    frame.sequence = sequence;
    Arc::new(frame)
}

pub fn plate_result(text: &str, source: &Arc<Frame>) -> InferenceResult {
    InferenceResult {
        plate: Some(PlateText::parse(text).unwrap()),
        ..InferenceResult::nothing(source)
    }
}

pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

pub struct FixedScale(pub f64);

impl WeightSensor for FixedScale {
    fn read_weight(&mut self) -> Result<f64, SensorError> {
        Ok(self.0)
    }

    fn describe(&self) -> String {
        "fixed scale".into()
    }
}

/// Remembers which frames were archived without touching the disk.
#[derive(Clone, Default)]
pub struct MemoryImages {
    pub stored: Arc<Mutex<Vec<u64>>>,
}

impl ImageStore for MemoryImages {
    fn store(
        &mut self,
        frame: &Frame,
        plate: &str,
        _at: DateTime<Utc>,
    ) -> Result<PathBuf, StorageError> {
        self.stored.lock().unwrap().push(frame.sequence);
        Ok(PathBuf::from(format!("mem/{}_{plate}.jpg", frame.sequence)))
    }

    fn describe(&self) -> String {
        "memory images".into()
    }
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    pub rows: Arc<Mutex<Vec<Record>>>,
    pub failing: Arc<AtomicBool>,
    pub closed: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn len(&self) -> usize {
        self.rows.lock().unwrap().len()
    }
}

impl RecordStore for MemoryStore {
    fn append(&mut self, record: &Record) -> Result<u64, StorageError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::Other, "read-only filesystem").into());
        }
        let mut rows = self.rows.lock().unwrap();
        rows.push(record.clone());
        Ok(rows.len() as u64)
    }

    fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn describe(&self) -> String {
        "memory store".into()
    }
}

/// Keeps every presented frame.
#[derive(Clone, Default)]
pub struct CollectingSink {
    pub frames: Arc<Mutex<Vec<Frame>>>,
}

impl FrameSink for CollectingSink {
    fn present(&mut self, frame: &Frame) {
        self.frames.lock().unwrap().push(frame.clone());
    }
}

#[derive(Clone, Default)]
pub struct CountingSink {
    pub presented: Arc<AtomicUsize>,
}

impl FrameSink for CountingSink {
    fn present(&mut self, _frame: &Frame) {
        self.presented.fetch_add(1, Ordering::SeqCst);
    }
}

/// Reads the same plate on every frame, optionally slowly.
pub struct SteadyRecognizer {
    pub plate: &'static str,
    pub delay: Duration,
    pub calls: Arc<AtomicUsize>,
    pub released: Arc<AtomicBool>,
}

impl SteadyRecognizer {
    pub fn new(plate: &'static str, delay: Duration) -> Self {
        Self {
            plate,
            delay,
            calls: Arc::default(),
            released: Arc::default(),
        }
    }
}

impl PlateRecognizer for SteadyRecognizer {
    fn infer(&mut self, frame: &Arc<Frame>) -> Result<InferenceResult> {
        thread::sleep(self.delay);
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(plate_result(self.plate, frame))
    }

    fn release(&mut self) {
        self.released.store(true, Ordering::SeqCst);
    }

    fn describe(&self) -> String {
        format!("steady {}", self.plate)
    }
}

/// True when the frame contains at least one pixel of the given BGR colour.
pub fn has_bgr_pixel(frame: &Frame, bgr: [u8; 3]) -> bool {
    frame.data.chunks_exact(3).any(|px| px == bgr.as_slice())
}
