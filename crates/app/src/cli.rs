use std::{
    path::PathBuf,
    time::{Duration, SystemTime},
};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use station_io::{
    archive_records, disk_usage, prune_images, DEFAULT_RETENTION_DAYS, DISK_WARNING_PERCENT,
};
use tracing::{info, warn};
use vision::{StationCliArgs, StationConfig};

#[derive(Debug, Parser)]
#[command(name = "lpr-station", version, about = "Licence plate and weight recording station")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the capture, recognition and recording pipeline.
    Run(StationCliArgs),
    /// Prune old evidence images and archive the record file.
    Maintain(MaintainArgs),
}

#[derive(Debug, Args)]
pub struct MaintainArgs {
    /// Directory holding evidence images.
    #[arg(long = "images", value_name = "DIR", default_value = "runs/images")]
    pub images: PathBuf,
    /// Record CSV to archive.
    #[arg(long = "records", value_name = "CSV", default_value = "runs/records.csv")]
    pub records: PathBuf,
    /// Directory receiving archived record files.
    #[arg(long = "history", value_name = "DIR", default_value = "runs/history")]
    pub history: PathBuf,
    /// Delete images older than this many days.
    #[arg(
        long = "prune-days",
        value_name = "DAYS",
        num_args = 0..=1,
        default_missing_value = DEFAULT_RETENTION_DAYS.to_string()
    )]
    pub prune_days: Option<u64>,
    /// Move the record file into the history directory.
    #[arg(long = "archive", action = clap::ArgAction::SetTrue)]
    pub archive: bool,
    /// Warn when the image disk is fuller than this percentage.
    #[arg(
        long = "disk-warn-percent",
        value_name = "PERCENT",
        default_value_t = DISK_WARNING_PERCENT
    )]
    pub disk_warn_percent: f64,
}

pub fn dispatch(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Run(args) => {
            let config = StationConfig::try_from(args)?;
            let reason = vision::run(config)?;
            info!("station exited: {reason:?}");
            Ok(())
        }
        Command::Maintain(args) => maintain(args),
    }
}

fn maintain(args: MaintainArgs) -> Result<()> {
    if !(0.0..=100.0).contains(&args.disk_warn_percent) {
        bail!("--disk-warn-percent must be between 0 and 100");
    }
    if let Some(days) = args.prune_days {
        let max_age = days
            .checked_mul(24 * 60 * 60)
            .map(Duration::from_secs)
            .with_context(|| format!("--prune-days {days} is too large"))?;
        let report = prune_images(&args.images, max_age, SystemTime::now())
            .with_context(|| format!("failed to prune {}", args.images.display()))?;
        println!(
            "removed {} images older than {days} days ({:.2} MB freed, {} failed)",
            report.removed,
            report.freed_mb(),
            report.failed
        );
    }
    if args.archive {
        match archive_records(&args.records, &args.history, chrono::Local::now())
            .with_context(|| format!("failed to archive {}", args.records.display()))?
        {
            Some(target) => println!("archived records to {}", target.display()),
            None => println!("no record file at {}", args.records.display()),
        }
    }
    report_disk_usage(&args);
    Ok(())
}

fn report_disk_usage(args: &MaintainArgs) {
    let Some(usage) = disk_usage(&args.images) else {
        warn!("could not determine disk usage for {}", args.images.display());
        return;
    };
    println!(
        "disk {}: {:.1}% used ({:.1} GB free)",
        usage.mount_point.display(),
        usage.used_percent(),
        usage.available_gb()
    );
    if usage.exceeds(args.disk_warn_percent) {
        warn!(
            "disk {} is {:.1}% full (threshold {:.0}%); prune images or archive records",
            usage.mount_point.display(),
            usage.used_percent(),
            args.disk_warn_percent
        );
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    #[test]
    fn run_subcommand_parses_station_flags() {
        let cli = Cli::try_parse_from([
            "lpr-station",
            "run",
            "--source",
            "/tmp",
            "--cooldown",
            "3",
            "--admission",
            "all",
        ])
        .unwrap();
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.cooldown, Some(3.0));
    }

    #[test]
    fn prune_days_defaults_to_a_week() {
        let cli = Cli::try_parse_from(["lpr-station", "maintain", "--prune-days"]).unwrap();
        let Command::Maintain(args) = cli.command else {
            panic!("expected maintain");
        };
        assert_eq!(args.prune_days, Some(7));
    }

    #[test]
    fn maintain_without_actions_only_checks_disk() {
        let dir = tempfile::tempdir().unwrap();
        let records = dir.path().join("records.csv");
        fs::write(&records, "id\n").unwrap();
        let cli = Cli::try_parse_from([
            "lpr-station",
            "maintain",
            "--records",
            records.to_str().unwrap(),
            "--images",
            dir.path().to_str().unwrap(),
        ])
        .unwrap();
        dispatch(cli).unwrap();
        assert!(records.exists());
    }

    #[test]
    fn rejects_out_of_range_maintenance_values() {
        let huge = u64::MAX.to_string();
        let cli = Cli::try_parse_from(["lpr-station", "maintain", "--prune-days", &huge]).unwrap();
        let err = dispatch(cli).unwrap_err();
        assert!(err.to_string().contains("too large"), "{err:#}");

        let cli =
            Cli::try_parse_from(["lpr-station", "maintain", "--disk-warn-percent", "150"]).unwrap();
        assert!(dispatch(cli).is_err());
    }

    #[test]
    fn maintain_archives_records() {
        let dir = tempfile::tempdir().unwrap();
        let records = dir.path().join("records.csv");
        fs::write(&records, "id,timestamp,plate,weight_kg,image_path\n").unwrap();
        let history = dir.path().join("history");
        let cli = Cli::try_parse_from([
            "lpr-station",
            "maintain",
            "--archive",
            "--records",
            records.to_str().unwrap(),
            "--history",
            history.to_str().unwrap(),
        ])
        .unwrap();

        dispatch(cli).unwrap();

        assert!(!records.exists());
        assert_eq!(fs::read_dir(&history).unwrap().count(), 1);
    }
}
