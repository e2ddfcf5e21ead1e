//! Capture device abstraction and the device backends that need no native
//! video stack.

use std::{
    collections::VecDeque,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use chrono::Utc;

use crate::{
    imaging::load_frame,
    types::{CaptureError, Frame},
};

/// A source of raw frames owned by exactly one capture thread.
///
/// `read` may block for up to one frame interval. `Ok(None)` means no frame
/// was available this attempt; errors are treated as transient by the caller.
pub trait CaptureDevice: Send {
    fn read(&mut self) -> Result<Option<Frame>, CaptureError>;

    /// Release the underlying handle. Called once, on the capture thread.
    fn release(&mut self) {}

    fn describe(&self) -> String;
}

impl<D: CaptureDevice + ?Sized> CaptureDevice for Box<D> {
    fn read(&mut self) -> Result<Option<Frame>, CaptureError> {
        (**self).read()
    }

    fn release(&mut self) {
        (**self).release()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

/// Replays still images from a directory in name order, looping forever.
pub struct ImageDirectory {
    dir: PathBuf,
    files: Vec<PathBuf>,
    cursor: usize,
    interval: Duration,
    next_due: Instant,
}

impl ImageDirectory {
    /// Open `dir`; fails when it contains no `.jpg`/`.jpeg`/`.png` files.
    pub fn open(dir: &Path, interval: Duration) -> Result<Self, CaptureError> {
        let mut files = Vec::new();
        let entries = std::fs::read_dir(dir).map_err(|_| CaptureError::Open {
            uri: dir.display().to_string(),
        })?;
        for entry in entries {
            let path = entry?.path();
            let is_image = path
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| {
                    matches!(
                        ext.to_ascii_lowercase().as_str(),
                        "jpg" | "jpeg" | "png"
                    )
                })
                .unwrap_or(false);
            if is_image {
                files.push(path);
            }
        }
        if files.is_empty() {
            return Err(CaptureError::Open {
                uri: dir.display().to_string(),
            });
        }
        files.sort();
        Ok(Self {
            dir: dir.to_path_buf(),
            files,
            cursor: 0,
            interval,
            next_due: Instant::now(),
        })
    }
}

impl CaptureDevice for ImageDirectory {
    fn read(&mut self) -> Result<Option<Frame>, CaptureError> {
        let now = Instant::now();
        if now < self.next_due {
            thread::sleep(self.next_due - now);
        }
        self.next_due = Instant::now() + self.interval;

        let path = &self.files[self.cursor];
        self.cursor = (self.cursor + 1) % self.files.len();
        let mut frame = load_frame(path)?;
        frame.timestamp_ms = Utc::now().timestamp_millis();
        Ok(Some(frame))
    }

    fn describe(&self) -> String {
        format!("image directory {} ({} files)", self.dir.display(), self.files.len())
    }
}

/// Plays back an in-memory sequence of capture outcomes.
///
/// Once the script runs out the device keeps reporting "no frame". Useful for
/// bench rigs and tests that need exact control over what the camera yields.
pub struct FrameReplay {
    script: VecDeque<Result<Option<Frame>, String>>,
    interval: Duration,
    released: Option<Arc<AtomicBool>>,
}

impl FrameReplay {
    pub fn new(frames: impl IntoIterator<Item = Frame>, interval: Duration) -> Self {
        Self {
            script: frames.into_iter().map(|frame| Ok(Some(frame))).collect(),
            interval,
            released: None,
        }
    }

    /// Insert a read failure at the end of the current script.
    pub fn then_fail(mut self, message: impl Into<String>) -> Self {
        self.script.push_back(Err(message.into()));
        self
    }

    pub fn then_frame(mut self, frame: Frame) -> Self {
        self.script.push_back(Ok(Some(frame)));
        self
    }

    /// Flag set once the capture thread releases the device.
    pub fn with_release_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.released = Some(flag);
        self
    }
}

impl CaptureDevice for FrameReplay {
    fn read(&mut self) -> Result<Option<Frame>, CaptureError> {
        thread::sleep(self.interval);
        match self.script.pop_front() {
            Some(Ok(frame)) => Ok(frame.map(|mut frame| {
                frame.timestamp_ms = Utc::now().timestamp_millis();
                frame
            })),
            Some(Err(message)) => Err(CaptureError::Other(anyhow::anyhow!(message))),
            None => Ok(None),
        }
    }

    fn release(&mut self) {
        if let Some(flag) = &self.released {
            flag.store(true, Ordering::SeqCst);
        }
    }

    fn describe(&self) -> String {
        format!("frame replay ({} scripted reads left)", self.script.len())
    }
}
