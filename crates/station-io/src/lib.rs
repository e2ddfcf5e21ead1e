//! Station peripherals and persistence.
//!
//! Everything here sits behind a small trait so the pipeline can run against
//! real hardware, simulated devices, or test doubles.

pub mod archive;
pub mod input;
pub mod maintenance;
pub mod scale;
pub mod storage;

pub use archive::{ImageStore, JpegArchive, DEFAULT_JPEG_QUALITY};
pub use input::{
    keyboard_event, spawn_keyboard_listener, ButtonConfig, ButtonWatcher, Edge, EdgeDetector,
    InputEvent, InputHandler,
};
pub use maintenance::{
    archive_records, disk_usage, prune_images, DiskUsage, PruneReport, DEFAULT_RETENTION_DAYS,
    DISK_WARNING_PERCENT,
};
pub use scale::{
    parse_weight, OfflineScale, SensorError, SerialScale, SimulatedScale, WeightSensor,
    DEFAULT_BAUD, MAX_SAMPLE_AGE,
};
pub use storage::{CsvRecordStore, Record, RecordStore, StorageError, CSV_HEADER};
