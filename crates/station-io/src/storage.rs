//! Append-only record store.

use std::{
    fs::{self, OpenOptions},
    io,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Local, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};
use video_ingest::CaptureError;

pub const CSV_HEADER: [&str; 5] = ["id", "timestamp", "plate", "weight_kg", "image_path"];

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error("failed to encode evidence image: {0}")]
    Encode(#[from] CaptureError),
}

/// One weighing event.
#[derive(Clone, Debug, PartialEq)]
pub struct Record {
    pub timestamp: DateTime<Utc>,
    pub plate: String,
    pub weight_kg: Option<f64>,
    pub image_path: PathBuf,
}

/// Durable sink for [`Record`]s. `append` returns the id assigned to the row.
pub trait RecordStore: Send {
    fn append(&mut self, record: &Record) -> Result<u64, StorageError>;

    fn close(&mut self) {}

    fn describe(&self) -> String;
}

#[derive(Serialize)]
struct CsvRow<'a> {
    id: u64,
    timestamp: String,
    plate: &'a str,
    weight_kg: Option<f64>,
    image_path: String,
}

/// CSV file with a header row; each append opens, writes and flushes.
#[derive(Debug)]
pub struct CsvRecordStore {
    path: PathBuf,
    next_id: u64,
}

impl CsvRecordStore {
    /// Open (creating if needed) the store at `path`. Ids continue after
    /// the rows already present.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        ensure_file_exists(&path)?;
        let existing = csv::Reader::from_path(&path)?
            .records()
            .filter(Result::is_ok)
            .count() as u64;
        info!("record store {} holds {existing} rows", path.display());
        Ok(Self {
            path,
            next_id: existing + 1,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Create the CSV with its header row when it is missing or empty.
pub fn ensure_file_exists(path: &Path) -> Result<(), StorageError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let needs_header = match fs::metadata(path) {
        Ok(meta) => meta.len() == 0,
        Err(err) if err.kind() == io::ErrorKind::NotFound => true,
        Err(err) => return Err(err.into()),
    };
    if needs_header {
        let mut writer = csv::Writer::from_path(path)?;
        writer.write_record(CSV_HEADER)?;
        writer.flush()?;
        debug!("created record store {}", path.display());
    }
    Ok(())
}

impl RecordStore for CsvRecordStore {
    fn append(&mut self, record: &Record) -> Result<u64, StorageError> {
        let file = OpenOptions::new().append(true).open(&self.path)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        let id = self.next_id;
        writer.serialize(CsvRow {
            id,
            timestamp: record
                .timestamp
                .with_timezone(&Local)
                .format(TIMESTAMP_FORMAT)
                .to_string(),
            plate: &record.plate,
            weight_kg: record.weight_kg,
            image_path: record.image_path.display().to_string(),
        })?;
        writer.flush()?;
        self.next_id += 1;
        Ok(id)
    }

    fn describe(&self) -> String {
        format!("csv {}", self.path.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(plate: &str, weight_kg: Option<f64>) -> Record {
        Record {
            timestamp: Utc::now(),
            plate: plate.into(),
            weight_kg,
            image_path: PathBuf::from(format!("runs/images/{plate}.jpg")),
        }
    }

    fn rows(path: &Path) -> Vec<csv::StringRecord> {
        csv::Reader::from_path(path)
            .unwrap()
            .records()
            .map(Result::unwrap)
            .collect()
    }

    #[test]
    fn creates_header_and_appends_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data/records.csv");
        let mut store = CsvRecordStore::open(&path).unwrap();

        assert_eq!(store.append(&record("AB123CD", Some(3500.0))).unwrap(), 1);
        assert_eq!(store.append(&record("XY98765", None)).unwrap(), 2);

        let mut reader = csv::Reader::from_path(&path).unwrap();
        assert_eq!(reader.headers().unwrap(), &csv::StringRecord::from(CSV_HEADER.to_vec()));
        let rows = rows(&path);
        assert_eq!(rows.len(), 2);
        assert_eq!(&rows[0][2], "AB123CD");
        assert_eq!(&rows[0][3], "3500.0");
        assert_eq!(&rows[1][3], "");
        assert_eq!(&rows[1][4], "runs/images/XY98765.jpg");
    }

    #[test]
    fn ids_continue_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.csv");
        {
            let mut store = CsvRecordStore::open(&path).unwrap();
            store.append(&record("AB123CD", Some(1.0))).unwrap();
            store.append(&record("AB123CE", Some(2.0))).unwrap();
        }
        let mut store = CsvRecordStore::open(&path).unwrap();
        assert_eq!(store.append(&record("AB123CF", Some(3.0))).unwrap(), 3);
        assert_eq!(rows(&path).len(), 3);
    }

    #[test]
    fn empty_file_gets_a_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.csv");
        fs::write(&path, "").unwrap();
        ensure_file_exists(&path).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text.trim_end(), "id,timestamp,plate,weight_kg,image_path");
    }

    #[test]
    fn append_fails_when_file_disappears() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.csv");
        let mut store = CsvRecordStore::open(&path).unwrap();
        fs::remove_file(&path).unwrap();
        assert!(matches!(
            store.append(&record("AB123CD", None)),
            Err(StorageError::Io(_))
        ));
    }
}
