//! Evidence images written next to each record.

use std::{
    fs,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Local, Utc};
use tracing::debug;
use video_ingest::{imaging::encode_jpeg, Frame};

use crate::storage::StorageError;

pub const DEFAULT_JPEG_QUALITY: u8 = 90;

/// Persists the frame that produced a record.
pub trait ImageStore: Send {
    fn store(
        &mut self,
        frame: &Frame,
        plate: &str,
        at: DateTime<Utc>,
    ) -> Result<PathBuf, StorageError>;

    fn describe(&self) -> String;
}

/// JPEG files named `<YYYYmmdd_HHMMSS>_<plate>.jpg` under one directory.
#[derive(Debug, Clone)]
pub struct JpegArchive {
    dir: PathBuf,
    quality: u8,
}

impl JpegArchive {
    pub fn new(dir: impl Into<PathBuf>, quality: u8) -> Self {
        Self {
            dir: dir.into(),
            quality: quality.clamp(1, 100),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn free_path(&self, stem: &str) -> PathBuf {
        let mut candidate = self.dir.join(format!("{stem}.jpg"));
        let mut n = 1;
        while candidate.exists() {
            candidate = self.dir.join(format!("{stem}_{n}.jpg"));
            n += 1;
        }
        candidate
    }
}

impl ImageStore for JpegArchive {
    fn store(
        &mut self,
        frame: &Frame,
        plate: &str,
        at: DateTime<Utc>,
    ) -> Result<PathBuf, StorageError> {
        fs::create_dir_all(&self.dir)?;
        let bytes = encode_jpeg(frame, self.quality)?;
        let stamp = at.with_timezone(&Local).format("%Y%m%d_%H%M%S");
        let path = self.free_path(&format!("{stamp}_{plate}"));
        fs::write(&path, bytes)?;
        debug!("evidence stored at {}", path.display());
        Ok(path)
    }

    fn describe(&self) -> String {
        format!("jpeg archive {}", self.dir.display())
    }
}
