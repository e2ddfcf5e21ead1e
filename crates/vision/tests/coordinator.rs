mod common;

use std::{
    sync::{atomic::AtomicBool, Arc},
    time::Duration,
};

use chrono::Utc;
use common::*;
use vision::{
    pipeline::{
        status::StationStatus,
        watchdog::{PipelineHealth, WatchdogState},
    },
    Clock, Coordinator, CoordinatorParts, EventRecorder, LatestFrameBuffer, ManualClock,
    ModeController, RecordOutcome, RecorderPolicy, ResultBuffer, ShutdownReason, TickOutcome,
};

struct Rig {
    coordinator: Coordinator,
    mode: Arc<ModeController>,
    frames: Arc<LatestFrameBuffer>,
    results: Arc<ResultBuffer>,
    clock: Arc<ManualClock>,
    store: MemoryStore,
    images: MemoryImages,
    sink: CollectingSink,
    status: Arc<StationStatus>,
}

fn rig() -> Rig {
    let mode = Arc::new(ModeController::new());
    let frames = Arc::new(LatestFrameBuffer::new());
    let results = Arc::new(ResultBuffer::new());
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let store = MemoryStore::default();
    let images = MemoryImages::default();
    let sink = CollectingSink::default();
    let health = Arc::new(PipelineHealth::new());
    let status = Arc::new(StationStatus::new(
        mode.clone(),
        Arc::new(WatchdogState::new()),
        health.clone(),
    ));
    let recorder = EventRecorder::new(
        RecorderPolicy::default(),
        Box::new(FixedScale(3500.0)),
        Box::new(images.clone()),
        Box::new(store.clone()),
    );
    let coordinator = Coordinator::new(CoordinatorParts {
        mode: mode.clone(),
        frames: frames.clone(),
        results: results.clone(),
        recorder,
        sink: Box::new(sink.clone()),
        clock: clock.clone(),
        stop: Arc::new(AtomicBool::new(false)),
        health,
        status: status.clone(),
    });
    Rig {
        coordinator,
        mode,
        frames,
        results,
        clock,
        store,
        images,
        sink,
        status,
    }
}

#[test]
fn repeated_plate_is_recorded_again_only_after_cooldown() {
    let mut rig = rig();
    let base = rig.clock.wall();

    for (sequence, at) in [(1u64, 0u64), (2, 1), (3, 2), (4, 6)] {
        rig.clock.set(Duration::from_secs(at));
        let raw = frame(sequence);
        rig.results.put(plate_result("ABC1234", &raw));
        rig.coordinator.tick(Some(raw));
    }

    let rows = rig.store.rows.lock().unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].timestamp, base);
    assert_eq!(rows[1].timestamp, base + chrono::Duration::seconds(6));
    assert!(rows.iter().all(|row| row.plate == "ABC1234"));
    assert_eq!(rows[0].weight_kg, Some(3500.0));
    assert_eq!(*rig.images.stored.lock().unwrap(), vec![1, 4]);

    let report = rig.status.report();
    assert_eq!(report.counters.recorded, 2);
    assert_eq!(report.counters.suppressed, 2);
    assert_eq!(report.last_record.unwrap().plate, "ABC1234");
}

#[test]
fn different_plate_inside_cooldown_is_recorded() {
    let mut rig = rig();
    let first = frame(1);
    rig.results.put(plate_result("ABC1234", &first));
    rig.coordinator.tick(Some(first));

    rig.clock.set(Duration::from_secs(2));
    let second = frame(2);
    rig.results.put(plate_result("XYZ9999", &second));
    let outcome = rig.coordinator.tick(Some(second));

    assert!(matches!(outcome, TickOutcome::Presented(Some(RecordOutcome::Recorded { id: 2, .. }))));
}

#[test]
fn detection_mode_forwards_frames_and_shows_annotation() {
    let mut rig = rig();
    let raw = frame(7);
    let outcome = rig.coordinator.tick(Some(raw.clone()));

    assert!(matches!(outcome, TickOutcome::Presented(None)));
    assert_eq!(rig.frames.peek().unwrap().sequence, 7);
    let shown = rig.sink.frames.lock().unwrap();
    // Green banner text in detection mode.
    assert!(has_bgr_pixel(&shown[0], [0, 255, 0]));
}

#[test]
fn same_frame_twice_is_an_idle_tick() {
    let mut rig = rig();
    let raw = frame(3);
    rig.coordinator.tick(Some(raw.clone()));

    assert!(matches!(rig.coordinator.tick(Some(raw)), TickOutcome::Idle));
    assert!(matches!(rig.coordinator.tick(None), TickOutcome::Idle));
    assert_eq!(rig.sink.frames.lock().unwrap().len(), 1);
}

#[test]
fn result_is_recorded_after_the_camera_goes_quiet() {
    let mut rig = rig();
    let last = frame(3);
    rig.coordinator.tick(Some(last.clone()));
    // Inference on the last frame finishes after the camera stopped delivering.
    rig.results.put(plate_result("ABC1234", &last));

    let outcome = rig.coordinator.tick(Some(last));
    assert!(matches!(outcome, TickOutcome::Presented(Some(RecordOutcome::Recorded { id: 1, .. }))));
    assert!(rig.results.is_empty());
    assert_eq!(rig.store.len(), 1);
    assert_eq!(rig.sink.frames.lock().unwrap().len(), 2);
    assert!(matches!(rig.coordinator.tick(None), TickOutcome::Idle));
}

#[test]
fn view_only_leaves_pending_result_for_the_next_frame() {
    let mut rig = rig();
    let raw = frame(1);
    rig.coordinator.tick(Some(raw.clone()));
    rig.mode.toggle();
    rig.results.put(plate_result("ABC1234", &raw));

    assert!(matches!(rig.coordinator.tick(None), TickOutcome::Idle));
    rig.coordinator.tick(Some(frame(2)));
    assert!(rig.results.is_empty());
    assert_eq!(rig.store.len(), 0);
}

#[test]
fn view_only_shows_raw_frames_and_drops_results() {
    let mut rig = rig();
    rig.mode.toggle();
    let raw = frame(1);
    rig.results.put(plate_result("ABC1234", &raw));

    let outcome = rig.coordinator.tick(Some(raw));

    assert!(matches!(outcome, TickOutcome::Presented(None)));
    assert!(rig.frames.is_empty());
    assert!(rig.results.is_empty());
    assert_eq!(rig.store.len(), 0);
    let shown = rig.sink.frames.lock().unwrap();
    // Orange banner text in view-only mode.
    assert!(has_bgr_pixel(&shown[0], [0, 165, 255]));
}

#[test]
fn storage_failure_keeps_plate_eligible() {
    let mut rig = rig();
    rig.store.failing.store(true, std::sync::atomic::Ordering::SeqCst);
    let first = frame(1);
    rig.results.put(plate_result("ABC1234", &first));
    let outcome = rig.coordinator.tick(Some(first));
    assert!(matches!(outcome, TickOutcome::Presented(Some(RecordOutcome::Failed(_)))));

    rig.store.failing.store(false, std::sync::atomic::Ordering::SeqCst);
    rig.clock.set(Duration::from_secs(1));
    let second = frame(2);
    rig.results.put(plate_result("ABC1234", &second));
    let outcome = rig.coordinator.tick(Some(second));
    assert!(matches!(outcome, TickOutcome::Presented(Some(RecordOutcome::Recorded { .. }))));
    assert_eq!(rig.store.len(), 1);
    assert_eq!(rig.status.report().counters.failed, 1);
}

#[test]
fn power_off_ends_ticking_and_ignores_later_toggles() {
    let mut rig = rig();
    assert!(rig.mode.power_off());
    rig.mode.toggle();
    assert!(!rig.mode.power_off());

    assert!(matches!(
        rig.coordinator.tick(Some(frame(1))),
        TickOutcome::Shutdown(ShutdownReason::PowerOff)
    ));
    assert_eq!(rig.coordinator.shutdown_reason(), Some(ShutdownReason::PowerOff));
    assert!(rig.sink.frames.lock().unwrap().is_empty());
}
