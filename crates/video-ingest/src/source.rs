//! Capture thread that keeps the newest frame available to readers.

use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use tracing::{debug, info, warn};

use crate::{
    device::CaptureDevice,
    slot::LatestSlot,
    types::{CaptureError, Frame},
};

/// Pause between capture attempts after a miss or a read error.
pub const CAPTURE_RETRY_INTERVAL: Duration = Duration::from_millis(20);

/// Log every Nth consecutive read failure once a failure streak starts.
const ERROR_LOG_EVERY: u64 = 50;

/// Owns a [`CaptureDevice`] on a dedicated thread and publishes every frame it
/// reads into a single-slot cell.
///
/// Readers call [`FrameSource::get_latest`], which does not consume the frame;
/// several readers may observe the same frame. Each published frame carries a
/// fresh `sequence` so readers can tell a new frame from one they have seen.
pub struct FrameSource {
    latest: Arc<LatestSlot<Arc<Frame>>>,
    stop: Arc<AtomicBool>,
    published: Arc<AtomicU64>,
    handle: Option<thread::JoinHandle<()>>,
    label: String,
}

impl FrameSource {
    /// Move an opened device onto the capture thread and start reading.
    pub fn spawn<D>(device: D) -> Result<Self, CaptureError>
    where
        D: CaptureDevice + 'static,
    {
        let latest = Arc::new(LatestSlot::new());
        let stop = Arc::new(AtomicBool::new(false));
        let published = Arc::new(AtomicU64::new(0));
        let label = device.describe();

        let handle = {
            let latest = latest.clone();
            let stop = stop.clone();
            let published = published.clone();
            thread::Builder::new()
                .name("frame-source".into())
                .spawn(move || capture_loop(device, latest, stop, published))?
        };
        info!("capture started: {label}");

        Ok(Self {
            latest,
            stop,
            published,
            handle: Some(handle),
            label,
        })
    }

    /// Newest captured frame, if any. Does not consume it.
    pub fn get_latest(&self) -> Option<Arc<Frame>> {
        self.latest.peek()
    }

    /// Number of frames published since start.
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Stop the capture loop and block until the device has been released.
    pub fn shutdown(mut self) {
        self.stop_and_join();
    }

    fn stop_and_join(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("capture thread for {} panicked", self.label);
            }
        }
    }
}

impl Drop for FrameSource {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}

fn capture_loop<D: CaptureDevice>(
    mut device: D,
    latest: Arc<LatestSlot<Arc<Frame>>>,
    stop: Arc<AtomicBool>,
    published: Arc<AtomicU64>,
) {
    let mut sequence: u64 = 0;
    let mut failure_streak: u64 = 0;

    while !stop.load(Ordering::Relaxed) {
        match device.read() {
            Ok(Some(mut frame)) => {
                if failure_streak > 0 {
                    info!("capture recovered after {failure_streak} failed read(s)");
                    failure_streak = 0;
                }
                sequence = sequence.wrapping_add(1);
                frame.sequence = sequence;
                latest.put(Arc::new(frame));
                published.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("station_frames_captured_total").increment(1);
            }
            Ok(None) => thread::sleep(CAPTURE_RETRY_INTERVAL),
            Err(err) => {
                failure_streak += 1;
                metrics::counter!("station_capture_errors_total").increment(1);
                if failure_streak == 1 || failure_streak % ERROR_LOG_EVERY == 0 {
                    warn!("capture read failed ({failure_streak} in a row): {err}");
                } else {
                    debug!("capture read failed: {err}");
                }
                thread::sleep(CAPTURE_RETRY_INTERVAL);
            }
        }
    }

    device.release();
    debug!("capture loop exited after {sequence} frame(s)");
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;
    use crate::{device::FrameReplay, types::FrameFormat};

    fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn publishes_frames_with_increasing_sequence() {
        let frames = (0..3).map(|_| Frame::blank(2, 2, FrameFormat::Bgr8));
        let source =
            FrameSource::spawn(FrameReplay::new(frames, Duration::from_millis(1))).unwrap();
        assert!(wait_for(|| source.published() == 3));
        let latest = source.get_latest().unwrap();
        assert_eq!(latest.sequence, 3);
        // Reading does not consume.
        assert_eq!(source.get_latest().unwrap().sequence, 3);
        source.shutdown();
    }

    #[test]
    fn read_errors_do_not_stop_the_loop() {
        let device = FrameReplay::new(Vec::<Frame>::new(), Duration::from_millis(1))
            .then_fail("unplugged")
            .then_fail("unplugged")
            .then_frame(Frame::blank(2, 2, FrameFormat::Bgr8));
        let source = FrameSource::spawn(device).unwrap();
        assert!(wait_for(|| source.get_latest().is_some()));
        source.shutdown();
    }

    #[test]
    fn shutdown_releases_device() {
        let released = Arc::new(AtomicBool::new(false));
        let device = FrameReplay::new(Vec::<Frame>::new(), Duration::from_millis(1))
            .with_release_flag(released.clone());
        let source = FrameSource::spawn(device).unwrap();
        source.shutdown();
        assert!(released.load(Ordering::SeqCst));
    }
}
