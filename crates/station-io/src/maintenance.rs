//! Housekeeping for long-running stations: evidence pruning, record
//! archival, and a free-space check.

use std::{
    fs, io,
    path::{Path, PathBuf},
    time::{Duration, SystemTime},
};

use chrono::{DateTime, Local};
use sysinfo::Disks;
use tracing::{info, warn};

pub const DEFAULT_RETENTION_DAYS: u64 = 7;

/// Used-space share above which `maintain` warns.
pub const DISK_WARNING_PERCENT: f64 = 90.0;

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PruneReport {
    pub removed: usize,
    pub freed_bytes: u64,
    pub failed: usize,
}

impl PruneReport {
    pub fn freed_mb(&self) -> f64 {
        self.freed_bytes as f64 / (1024.0 * 1024.0)
    }
}

/// Delete `.jpg`/`.jpeg` files in `dir` last modified before `now - max_age`.
/// A missing directory is treated as empty.
pub fn prune_images(dir: &Path, max_age: Duration, now: SystemTime) -> io::Result<PruneReport> {
    let mut report = PruneReport::default();
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(report),
        Err(err) => return Err(err),
    };
    let cutoff = now.checked_sub(max_age).unwrap_or(SystemTime::UNIX_EPOCH);
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        let is_image = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("jpg") || ext.eq_ignore_ascii_case("jpeg"));
        if !is_image {
            continue;
        }
        let meta = entry.metadata()?;
        if !meta.is_file() || meta.modified()? >= cutoff {
            continue;
        }
        match fs::remove_file(&path) {
            Ok(()) => {
                report.removed += 1;
                report.freed_bytes += meta.len();
            }
            Err(err) => {
                warn!("could not remove {}: {err}", path.display());
                report.failed += 1;
            }
        }
    }
    info!(
        "pruned {} images ({:.2} MB) from {}",
        report.removed,
        report.freed_mb(),
        dir.display()
    );
    Ok(report)
}

#[derive(Debug, Clone, PartialEq)]
pub struct DiskUsage {
    pub mount_point: PathBuf,
    pub total_bytes: u64,
    pub available_bytes: u64,
}

impl DiskUsage {
    pub fn used_percent(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        let used = self.total_bytes.saturating_sub(self.available_bytes);
        used as f64 / self.total_bytes as f64 * 100.0
    }

    pub fn available_gb(&self) -> f64 {
        self.available_bytes as f64 / GIB
    }

    pub fn exceeds(&self, percent: f64) -> bool {
        self.used_percent() > percent
    }
}

/// Usage of the filesystem holding `path`, or `None` when no mounted disk
/// contains it. `path` need not exist yet.
pub fn disk_usage(path: &Path) -> Option<DiskUsage> {
    let disks = Disks::new_with_refreshed_list();
    let resolved = resolve_existing(path);
    containing_disk(
        &resolved,
        disks.iter().map(|disk| DiskUsage {
            mount_point: disk.mount_point().to_path_buf(),
            total_bytes: disk.total_space(),
            available_bytes: disk.available_space(),
        }),
    )
}

/// Canonical form of the nearest existing ancestor of `path`.
fn resolve_existing(path: &Path) -> PathBuf {
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    absolute
        .ancestors()
        .find_map(|dir| fs::canonicalize(dir).ok())
        .unwrap_or(absolute)
}

/// The mount with the longest prefix of `path`.
fn containing_disk(path: &Path, disks: impl Iterator<Item = DiskUsage>) -> Option<DiskUsage> {
    disks
        .filter(|disk| path.starts_with(&disk.mount_point))
        .max_by_key(|disk| disk.mount_point.components().count())
}

/// Move the record file into `history_dir` as `<stem>_<YYYYmmdd_HHMMSS>.<ext>`.
/// Returns `None` when there is nothing to archive.
pub fn archive_records(
    records: &Path,
    history_dir: &Path,
    at: DateTime<Local>,
) -> io::Result<Option<PathBuf>> {
    if !records.exists() {
        return Ok(None);
    }
    fs::create_dir_all(history_dir)?;
    let stem = records
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "records".into());
    let ext = records
        .extension()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "csv".into());
    let target = history_dir.join(format!("{stem}_{}.{ext}", at.format("%Y%m%d_%H%M%S")));
    if fs::rename(records, &target).is_err() {
        // Rename cannot cross filesystems.
        fs::copy(records, &target)?;
        fs::remove_file(records)?;
    }
    info!("archived {} to {}", records.display(), target.display());
    Ok(Some(target))
}
