//! Inference worker thread.
//!
//! The worker owns the recogniser. It is built on the worker thread itself and
//! reports success or failure back before the pipeline starts, so a model that
//! cannot load is a startup error rather than a silent dead stage.

use std::{
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use anyhow::{anyhow, bail, Context, Result};
use crossbeam_channel::RecvTimeoutError;
use ml_core::PlateRecognizer;
use tracing::{debug, error, info, info_span, warn};

use crate::pipeline::{
    telemetry,
    watchdog::{HealthComponent, PipelineHealth},
    LatestFrameBuffer, ResultBuffer,
};

/// Sleep between polls of an empty frame buffer.
pub const INFERENCE_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// How often startup re-checks the stop signal while the recogniser loads.
const INIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Consecutive inference failures logged before going quiet.
const ERROR_LOG_BURST: u32 = 5;

/// Builds the recogniser on the worker thread.
pub type RecognizerInit = Box<dyn FnOnce() -> Result<Box<dyn PlateRecognizer>> + Send>;

pub struct InferenceWorker {
    handle: thread::JoinHandle<()>,
}

impl InferenceWorker {
    /// Start the worker and wait until its recogniser is ready.
    ///
    /// Setting `stop` while the recogniser loads abandons startup; the worker
    /// thread then exits on its own once loading returns.
    pub fn spawn(
        init: RecognizerInit,
        frames: Arc<LatestFrameBuffer>,
        results: Arc<ResultBuffer>,
        stop: Arc<AtomicBool>,
        health: Arc<PipelineHealth>,
    ) -> Result<Self> {
        let (init_tx, init_rx) = crossbeam_channel::bounded::<Result<String, String>>(1);
        let interrupted = stop.clone();
        let handle = telemetry::spawn_thread("inference-worker", move || {
            let mut recognizer = match init() {
                Ok(recognizer) => {
                    if init_tx.send(Ok(recognizer.describe())).is_err() {
                        return;
                    }
                    recognizer
                }
                Err(err) => {
                    let _ = init_tx.send(Err(format!("failed to load recogniser: {err:#}")));
                    return;
                }
            };
            drop(init_tx);
            run_loop(recognizer.as_mut(), &frames, &results, &stop, &health);
            recognizer.release();
            debug!("recogniser released");
        })
        .context("failed to spawn inference worker thread")?;

        loop {
            match init_rx.recv_timeout(INIT_POLL_INTERVAL) {
                Ok(Ok(description)) => {
                    info!("inference worker ready: {description}");
                    return Ok(Self { handle });
                }
                Ok(Err(err)) => {
                    let _ = handle.join();
                    bail!(err);
                }
                Err(RecvTimeoutError::Timeout) if interrupted.load(Ordering::Relaxed) => {
                    bail!("interrupted while loading the recogniser");
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    let _ = handle.join();
                    return Err(anyhow!("inference worker exited during initialisation"));
                }
            }
        }
    }

    /// Wait for the worker to exit. The stop signal must already be set; an
    /// in-flight inference is allowed to finish.
    pub fn join(self) {
        if self.handle.join().is_err() {
            error!("inference worker panicked during shutdown");
        }
    }
}

fn run_loop(
    recognizer: &mut dyn PlateRecognizer,
    frames: &LatestFrameBuffer,
    results: &ResultBuffer,
    stop: &AtomicBool,
    health: &PipelineHealth,
) {
    let mut failures: u32 = 0;
    while !stop.load(Ordering::Relaxed) {
        let Some(frame) = frames.try_take() else {
            thread::sleep(INFERENCE_POLL_INTERVAL);
            continue;
        };

        let span = info_span!("inference.run", sequence = frame.sequence);
        let started = Instant::now();
        let outcome = span.in_scope(|| {
            panic::catch_unwind(AssertUnwindSafe(|| recognizer.infer(&frame)))
        });
        metrics::histogram!("station_inference_seconds").record(started.elapsed().as_secs_f64());
        health.beat(HealthComponent::Inference);

        match outcome {
            Ok(Ok(result)) => {
                if failures > 0 {
                    info!("inference recovered after {failures} failures");
                    failures = 0;
                }
                if let Some(plate) = &result.plate {
                    debug!(sequence = frame.sequence, "plate candidate {plate}");
                }
                if results.put(result) {
                    metrics::counter!("station_frames_overwritten_total", "buffer" => "result")
                        .increment(1);
                }
            }
            Ok(Err(err)) => {
                failures = failures.saturating_add(1);
                metrics::counter!("station_inference_errors_total").increment(1);
                if failures <= ERROR_LOG_BURST {
                    warn!("inference failed on frame {}: {err:#}", frame.sequence);
                }
            }
            Err(_) => {
                failures = failures.saturating_add(1);
                metrics::counter!("station_inference_errors_total").increment(1);
                error!("recogniser panicked on frame {}", frame.sequence);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use ml_core::{InferenceResult, NullRecognizer, PlateText};
    use video_ingest::{Frame, FrameFormat};

    use super::*;

    struct Scripted {
        calls: Arc<AtomicUsize>,
        released: Arc<AtomicBool>,
    }

    impl PlateRecognizer for Scripted {
        fn infer(&mut self, frame: &Arc<Frame>) -> Result<InferenceResult> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            match call {
                0 => Err(anyhow!("model hiccup")),
                1 => panic!("model crashed"),
                _ => Ok(InferenceResult {
                    plate: PlateText::parse("ABC1234").ok(),
                    ..InferenceResult::nothing(frame)
                }),
            }
        }

        fn release(&mut self) {
            self.released.store(true, Ordering::SeqCst);
        }

        fn describe(&self) -> String {
            "scripted".into()
        }
    }

    fn frame(sequence: u64) -> Arc<Frame> {
        let mut frame = Frame::blank(4, 4, FrameFormat::Bgr8);
        frame.sequence = sequence;
        Arc::new(frame)
    }

    fn wait_for<T>(mut probe: impl FnMut() -> Option<T>) -> T {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            if let Some(value) = probe() {
                return value;
            }
            assert!(Instant::now() < deadline, "timed out");
            thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn init_failure_is_reported_to_the_caller() {
        let err = InferenceWorker::spawn(
            Box::new(|| -> Result<Box<dyn PlateRecognizer>> { Err(anyhow!("weights missing")) }),
            Arc::default(),
            Arc::default(),
            Arc::new(AtomicBool::new(false)),
            Arc::new(PipelineHealth::new()),
        )
        .err()
        .unwrap();
        assert!(format!("{err:#}").contains("weights missing"));
    }

    #[test]
    fn stop_during_a_hung_load_abandons_startup() {
        let (release_load, load_gate) = crossbeam_channel::bounded::<()>(1);
        let stop = Arc::new(AtomicBool::new(false));
        let trigger = stop.clone();
        let stopper = thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            trigger.store(true, Ordering::SeqCst);
        });

        let started = Instant::now();
        let err = InferenceWorker::spawn(
            Box::new(move || -> Result<Box<dyn PlateRecognizer>> {
                let _ = load_gate.recv();
                Ok(Box::new(NullRecognizer))
            }),
            Arc::default(),
            Arc::default(),
            stop,
            Arc::new(PipelineHealth::new()),
        )
        .err()
        .unwrap();
        assert!(err.to_string().contains("interrupted"), "{err:#}");
        assert!(started.elapsed() < Duration::from_secs(2));

        stopper.join().unwrap();
        release_load.send(()).unwrap();
    }

    #[test]
    fn survives_errors_and_panics_then_releases_on_stop() {
        let calls = Arc::new(AtomicUsize::new(0));
        let released = Arc::new(AtomicBool::new(false));
        let frames: Arc<LatestFrameBuffer> = Arc::default();
        let results: Arc<ResultBuffer> = Arc::default();
        let stop = Arc::new(AtomicBool::new(false));

        let recognizer = Scripted {
            calls: calls.clone(),
            released: released.clone(),
        };
        let worker = InferenceWorker::spawn(
            Box::new(move || -> Result<Box<dyn PlateRecognizer>> { Ok(Box::new(recognizer)) }),
            frames.clone(),
            results.clone(),
            stop.clone(),
            Arc::new(PipelineHealth::new()),
        )
        .unwrap();

        for sequence in 1..=3 {
            frames.put(frame(sequence));
            wait_for(|| frames.is_empty().then_some(()));
            wait_for(|| (calls.load(Ordering::SeqCst) >= sequence as usize).then_some(()));
        }
        let result = wait_for(|| results.try_take());
        assert_eq!(result.source.sequence, 3);
        assert_eq!(result.plate.unwrap().as_str(), "ABC1234");

        stop.store(true, Ordering::SeqCst);
        worker.join();
        assert!(released.load(Ordering::SeqCst));
    }

    #[test]
    fn stops_promptly_when_idle() {
        let stop = Arc::new(AtomicBool::new(false));
        let worker = InferenceWorker::spawn(
            Box::new(|| -> Result<Box<dyn PlateRecognizer>> { Ok(Box::new(NullRecognizer)) }),
            Arc::default(),
            Arc::default(),
            stop.clone(),
            Arc::new(PipelineHealth::new()),
        )
        .unwrap();
        let started = Instant::now();
        stop.store(true, Ordering::SeqCst);
        worker.join();
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
