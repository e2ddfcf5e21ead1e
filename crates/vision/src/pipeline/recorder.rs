//! Turns recognised plates into persisted records.
//!
//! A plate is admitted when the debounce policy allows it. Admission reads
//! the scale, archives the evidence frame and appends the record; the
//! debounce state only advances once the record is durable.

use std::{path::PathBuf, time::Duration};

use chrono::{DateTime, Utc};
use clap::ValueEnum;
use ml_core::{InferenceResult, PlateText};
use station_io::{ImageStore, Record, RecordStore, StorageError, WeightSensor};
use tracing::{debug, error, info, info_span, warn};

pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(5);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum AdmissionRule {
    /// New plate, or cooldown expired.
    #[default]
    #[value(name = "any")]
    AnyOf,
    /// New plate and cooldown expired.
    #[value(name = "all")]
    AllOf,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RecorderPolicy {
    pub cooldown: Duration,
    pub rule: AdmissionRule,
}

impl Default for RecorderPolicy {
    fn default() -> Self {
        Self {
            cooldown: DEFAULT_COOLDOWN,
            rule: AdmissionRule::AnyOf,
        }
    }
}

/// Last persisted plate and when it was recorded.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DebounceState {
    pub last_plate: Option<PlateText>,
    pub last_record_time: Option<Duration>,
}

impl DebounceState {
    pub fn admits(&self, plate: &PlateText, now: Duration, policy: &RecorderPolicy) -> bool {
        let (Some(last_plate), Some(last_time)) = (&self.last_plate, self.last_record_time) else {
            return true;
        };
        let new_plate = last_plate != plate;
        let expired = now.saturating_sub(last_time) > policy.cooldown;
        match policy.rule {
            AdmissionRule::AnyOf => new_plate || expired,
            AdmissionRule::AllOf => new_plate && expired,
        }
    }

    fn advance(&mut self, plate: PlateText, now: Duration) {
        self.last_plate = Some(plate);
        self.last_record_time = Some(self.last_record_time.map_or(now, |last| last.max(now)));
    }
}

#[derive(Debug)]
pub enum RecordOutcome {
    /// The result carried no plate.
    NoPlate,
    /// Debounce policy rejected the plate.
    Suppressed,
    Recorded { id: u64, record: Record },
    /// Persisting failed; nothing advanced.
    Failed(StorageError),
}

pub struct EventRecorder {
    policy: RecorderPolicy,
    state: DebounceState,
    sensor: Box<dyn WeightSensor>,
    images: Box<dyn ImageStore>,
    store: Box<dyn RecordStore>,
}

impl EventRecorder {
    pub fn new(
        policy: RecorderPolicy,
        sensor: Box<dyn WeightSensor>,
        images: Box<dyn ImageStore>,
        store: Box<dyn RecordStore>,
    ) -> Self {
        info!(
            "recording to {} with {} and {} (cooldown {:.1}s, rule {:?})",
            store.describe(),
            images.describe(),
            sensor.describe(),
            policy.cooldown.as_secs_f32(),
            policy.rule
        );
        Self {
            policy,
            state: DebounceState::default(),
            sensor,
            images,
            store,
        }
    }

    pub fn state(&self) -> &DebounceState {
        &self.state
    }

    pub fn policy(&self) -> &RecorderPolicy {
        &self.policy
    }

    /// Evaluate one inference result at monotonic time `now`.
    pub fn consider(
        &mut self,
        result: &InferenceResult,
        now: Duration,
        wall: DateTime<Utc>,
    ) -> RecordOutcome {
        let Some(plate) = result.plate.as_ref() else {
            return RecordOutcome::NoPlate;
        };
        if !self.state.admits(plate, now, &self.policy) {
            debug!(plate = %plate, "plate suppressed by cooldown");
            return RecordOutcome::Suppressed;
        }
        let _span = info_span!("recorder.admit", plate = %plate).entered();

        let weight_kg = match self.sensor.read_weight() {
            Ok(kg) => Some(kg),
            Err(err) => {
                warn!("weight unavailable for {plate}: {err}");
                None
            }
        };

        match self.persist(plate, weight_kg, result, wall) {
            Ok((id, record)) => {
                self.state.advance(plate.clone(), now);
                metrics::counter!("station_records_total").increment(1);
                info!(
                    "record #{id}: {plate} {} -> {}",
                    weight_kg.map_or_else(|| "no weight".to_string(), |kg| format!("{kg:.1} kg")),
                    record.image_path.display()
                );
                RecordOutcome::Recorded { id, record }
            }
            Err(err) => {
                metrics::counter!("station_record_failures_total").increment(1);
                error!("failed to record {plate}: {err}");
                RecordOutcome::Failed(err)
            }
        }
    }

    fn persist(
        &mut self,
        plate: &PlateText,
        weight_kg: Option<f64>,
        result: &InferenceResult,
        wall: DateTime<Utc>,
    ) -> Result<(u64, Record), StorageError> {
        let image_path: PathBuf = self.images.store(&result.source, plate.as_str(), wall)?;
        let record = Record {
            timestamp: wall,
            plate: plate.to_string(),
            weight_kg,
            image_path,
        };
        let id = self.store.append(&record)?;
        Ok((id, record))
    }

    /// Release the sensor and storage handles.
    pub fn close(&mut self) {
        self.sensor.release();
        self.store.close();
        debug!("recorder closed");
    }
}

#[cfg(test)]
mod tests {
    use std::{
        io,
        path::Path,
        sync::{Arc, Mutex},
    };

    use station_io::SensorError;
    use video_ingest::{Frame, FrameFormat};

    use super::*;

    fn plate(text: &str) -> PlateText {
        PlateText::parse(text).unwrap()
    }

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn or_rule_admits_new_plate_or_expired_cooldown() {
        let policy = RecorderPolicy::default();
        let state = DebounceState {
            last_plate: Some(plate("ABC1234")),
            last_record_time: Some(secs(10)),
        };
        assert!(!state.admits(&plate("ABC1234"), secs(12), &policy));
        assert!(state.admits(&plate("XYZ9999"), secs(12), &policy));
        assert!(state.admits(&plate("ABC1234"), secs(16), &policy));
        // Exactly at the cooldown boundary is still inside it.
        assert!(!state.admits(&plate("ABC1234"), secs(15), &policy));
    }

    #[test]
    fn and_rule_requires_both_conditions() {
        let policy = RecorderPolicy {
            rule: AdmissionRule::AllOf,
            ..RecorderPolicy::default()
        };
        let state = DebounceState {
            last_plate: Some(plate("ABC1234")),
            last_record_time: Some(secs(10)),
        };
        assert!(!state.admits(&plate("XYZ9999"), secs(12), &policy));
        assert!(!state.admits(&plate("ABC1234"), secs(16), &policy));
        assert!(state.admits(&plate("XYZ9999"), secs(16), &policy));
        assert!(DebounceState::default().admits(&plate("ABC1234"), secs(0), &policy));
    }

    #[test]
    fn record_time_never_moves_backwards() {
        let mut state = DebounceState::default();
        state.advance(plate("ABC1234"), secs(10));
        state.advance(plate("XYZ9999"), secs(7));
        assert_eq!(state.last_record_time, Some(secs(10)));
        assert_eq!(state.last_plate, Some(plate("XYZ9999")));
    }

    struct FixedScale(Option<f64>);

    impl WeightSensor for FixedScale {
        fn read_weight(&mut self) -> Result<f64, SensorError> {
            self.0.ok_or(SensorError::Offline)
        }

        fn describe(&self) -> String {
            "fixed".into()
        }
    }

    struct PathImages;

    impl ImageStore for PathImages {
        fn store(
            &mut self,
            _frame: &Frame,
            plate: &str,
            _at: DateTime<Utc>,
        ) -> Result<PathBuf, StorageError> {
            Ok(Path::new("evidence").join(format!("{plate}.jpg")))
        }

        fn describe(&self) -> String {
            "paths".into()
        }
    }

    #[derive(Clone, Default)]
    struct SharedStore {
        rows: Arc<Mutex<Vec<Record>>>,
        fail: Arc<Mutex<bool>>,
    }

    impl RecordStore for SharedStore {
        fn append(&mut self, record: &Record) -> Result<u64, StorageError> {
            if *self.fail.lock().unwrap() {
                return Err(io::Error::new(io::ErrorKind::Other, "disk full").into());
            }
            let mut rows = self.rows.lock().unwrap();
            rows.push(record.clone());
            Ok(rows.len() as u64)
        }

        fn describe(&self) -> String {
            "memory".into()
        }
    }

    fn result(text: Option<&str>) -> InferenceResult {
        let frame = Arc::new(Frame::blank(4, 4, FrameFormat::Bgr8));
        InferenceResult {
            plate: text.map(plate),
            ..InferenceResult::nothing(&frame)
        }
    }

    fn recorder(store: &SharedStore, weight: Option<f64>) -> EventRecorder {
        EventRecorder::new(
            RecorderPolicy::default(),
            Box::new(FixedScale(weight)),
            Box::new(PathImages),
            Box::new(store.clone()),
        )
    }

    #[test]
    fn records_admitted_plate_with_weight_and_image() {
        let store = SharedStore::default();
        let mut recorder = recorder(&store, Some(3500.0));
        let wall = Utc::now();

        let outcome = recorder.consider(&result(Some("ABC1234")), secs(0), wall);

        assert!(matches!(outcome, RecordOutcome::Recorded { id: 1, .. }));
        let rows = store.rows.lock().unwrap();
        assert_eq!(rows[0].plate, "ABC1234");
        assert_eq!(rows[0].weight_kg, Some(3500.0));
        assert_eq!(rows[0].timestamp, wall);
        assert_eq!(rows[0].image_path, Path::new("evidence/ABC1234.jpg"));
    }

    #[test]
    fn missing_plate_is_never_evaluated() {
        let store = SharedStore::default();
        let mut recorder = recorder(&store, Some(1.0));
        assert!(matches!(
            recorder.consider(&result(None), secs(0), Utc::now()),
            RecordOutcome::NoPlate
        ));
        assert_eq!(recorder.state(), &DebounceState::default());
    }

    #[test]
    fn sensor_failure_records_without_weight() {
        let store = SharedStore::default();
        let mut recorder = recorder(&store, None);
        recorder.consider(&result(Some("ABC1234")), secs(0), Utc::now());
        assert_eq!(store.rows.lock().unwrap()[0].weight_kg, None);
    }

    #[test]
    fn storage_failure_does_not_advance_state() {
        let store = SharedStore::default();
        let mut recorder = recorder(&store, Some(1.0));
        *store.fail.lock().unwrap() = true;

        let outcome = recorder.consider(&result(Some("ABC1234")), secs(0), Utc::now());
        assert!(matches!(outcome, RecordOutcome::Failed(_)));
        assert_eq!(recorder.state(), &DebounceState::default());

        *store.fail.lock().unwrap() = false;
        let retry = recorder.consider(&result(Some("ABC1234")), secs(1), Utc::now());
        assert!(matches!(retry, RecordOutcome::Recorded { .. }));
        assert_eq!(recorder.state().last_record_time, Some(secs(1)));
    }
}
