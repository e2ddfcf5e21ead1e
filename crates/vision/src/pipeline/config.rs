//! Configuration parsing for the station pipeline.
//!
//! This module owns translation of CLI arguments into a `StationConfig`
//! which the pipeline uses without re-parsing flags. Everything is validated
//! here, before any device is opened.

use std::{net::SocketAddr, path::PathBuf, time::Duration};

use anyhow::{anyhow, bail, Result};
use clap::Args;
use ml_core::DETECTION_CONFIDENCE;
use station_io::{DEFAULT_BAUD, DEFAULT_JPEG_QUALITY};

use crate::pipeline::recorder::{AdmissionRule, RecorderPolicy, DEFAULT_COOLDOWN};

/// Where frames come from.
#[derive(Clone, Debug, PartialEq)]
pub enum SourceSpec {
    /// V4L device index, video file, or stream URL opened through OpenCV.
    Camera { uri: String },
    /// Directory of still images replayed in a loop.
    Directory { path: PathBuf, interval: Duration },
}

#[derive(Clone, Debug, PartialEq)]
pub enum ScaleSpec {
    Serial { port: String, baud: u32 },
    Simulated,
    /// No scale attached; records carry an empty weight.
    Absent,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ButtonPins {
    pub mode: Option<PathBuf>,
    pub power: Option<PathBuf>,
    pub active_low: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
/// Optional telemetry knobs for tracing.
pub struct TelemetryOptions {
    /// Write a Chrome trace JSON file capturing pipeline spans.
    pub chrome_trace_path: Option<PathBuf>,
    /// Filter applied when `RUST_LOG` is unset.
    pub default_level: String,
}

#[derive(Clone, Debug)]
/// Canonical configuration shared by every stage in the pipeline.
pub struct StationConfig {
    pub source: SourceSpec,
    /// Capture resolution requested from the camera.
    pub width: u32,
    pub height: u32,
    pub policy: RecorderPolicy,
    pub records_path: PathBuf,
    pub images_dir: PathBuf,
    pub scale: ScaleSpec,
    pub buttons: ButtonPins,
    /// Read `m`/`q` commands from stdin.
    pub keyboard: bool,
    /// Preview server address; `None` disables the server.
    pub preview_addr: Option<SocketAddr>,
    /// JPEG quality for the preview stream and evidence images.
    pub jpeg_quality: u8,
    /// External model process speaking the sidecar protocol.
    pub model_command: Option<String>,
    pub min_confidence: f32,
    /// Command run after a power-off shutdown, e.g. `shutdown -h now`.
    pub power_off_command: Option<String>,
    pub telemetry: TelemetryOptions,
}

/// CLI arguments accepted by the `run` subcommand.
#[derive(Debug, Args)]
pub struct StationCliArgs {
    /// Camera index/URI, or a directory of images to replay.
    #[arg(long = "source", value_name = "URI|DIR", default_value = "0")]
    pub source: String,
    /// Capture width in pixels.
    #[arg(long = "width", value_name = "PX", default_value_t = 1280)]
    pub width: u32,
    /// Capture height in pixels.
    #[arg(long = "height", value_name = "PX", default_value_t = 720)]
    pub height: u32,
    /// Frame rate used when replaying an image directory.
    #[arg(long = "replay-fps", value_name = "FPS", default_value_t = 10.0)]
    pub replay_fps: f64,
    /// Seconds before the same plate may be recorded again.
    #[arg(long = "cooldown", value_name = "SECS")]
    pub cooldown: Option<f64>,
    /// Admit a plate when it differs OR the cooldown expired (`any`), or only
    /// when both hold (`all`).
    #[arg(long = "admission", value_enum, default_value_t = AdmissionRule::AnyOf)]
    pub admission: AdmissionRule,
    /// CSV file receiving one row per record.
    #[arg(long = "records", value_name = "CSV", default_value = "runs/records.csv")]
    pub records: PathBuf,
    /// Directory receiving evidence images.
    #[arg(long = "images", value_name = "DIR", default_value = "runs/images")]
    pub images: PathBuf,
    /// Serial port of the weighbridge scale.
    #[arg(long = "scale-port", value_name = "TTY", conflicts_with = "simulate_scale")]
    pub scale_port: Option<String>,
    /// Scale baud rate.
    #[arg(long = "scale-baud", value_name = "BAUD", default_value_t = DEFAULT_BAUD)]
    pub scale_baud: u32,
    /// Use a simulated scale instead of a serial one.
    #[arg(long = "simulate-scale", action = clap::ArgAction::SetTrue)]
    pub simulate_scale: bool,
    /// GPIO value file of the mode button.
    #[arg(long = "mode-pin-path", value_name = "PATH")]
    pub mode_pin_path: Option<PathBuf>,
    /// GPIO value file of the power button.
    #[arg(long = "power-pin-path", value_name = "PATH")]
    pub power_pin_path: Option<PathBuf>,
    /// Buttons pull the line low when pressed.
    #[arg(long = "buttons-active-low", action = clap::ArgAction::SetTrue)]
    pub buttons_active_low: bool,
    /// Accept `m` (mode) and `q` (power off) commands on stdin.
    #[arg(long = "keyboard", action = clap::ArgAction::SetTrue)]
    pub keyboard: bool,
    /// Preview server bind address.
    #[arg(long = "preview-addr", value_name = "IP:PORT", default_value = "0.0.0.0:8080")]
    pub preview_addr: String,
    /// Disable the preview server.
    #[arg(long = "no-preview", action = clap::ArgAction::SetTrue)]
    pub no_preview: bool,
    /// JPEG quality for preview and evidence images (1-100).
    #[arg(long = "jpeg-quality", value_name = "QUALITY")]
    pub jpeg_quality: Option<i32>,
    /// Command launching the plate model process.
    #[arg(long = "model-command", value_name = "CMD")]
    pub model_command: Option<String>,
    /// Minimum detector confidence for vehicle boxes.
    #[arg(long = "min-confidence", value_name = "0..1")]
    pub min_confidence: Option<f32>,
    /// Command executed after a power-off shutdown.
    #[arg(long = "power-off-command", value_name = "CMD")]
    pub power_off_command: Option<String>,
    /// Emit Chrome trace JSON for post-mortem analysis.
    #[arg(long = "chrome-trace", value_name = "PATH")]
    pub chrome_trace: Option<PathBuf>,
    /// Enable debug logging.
    #[arg(long = "verbose", action = clap::ArgAction::SetTrue)]
    pub verbose: bool,
}

impl TryFrom<StationCliArgs> for StationConfig {
    type Error = anyhow::Error;

    fn try_from(args: StationCliArgs) -> Result<Self> {
        if args.width == 0 || args.height == 0 {
            bail!("Capture width and height must be positive integers");
        }

        let source = parse_source(&args.source, args.replay_fps)?;

        let cooldown = match args.cooldown {
            Some(secs) => Duration::try_from_secs_f64(secs).map_err(|_| {
                anyhow!("--cooldown must be a non-negative number of seconds, got {secs}")
            })?,
            None => DEFAULT_COOLDOWN,
        };
        let policy = RecorderPolicy {
            cooldown,
            rule: args.admission,
        };

        let scale = match (args.scale_port, args.simulate_scale) {
            (Some(_), true) => bail!("--scale-port and --simulate-scale are mutually exclusive"),
            (Some(port), false) => {
                if args.scale_baud == 0 {
                    bail!("--scale-baud must be positive");
                }
                ScaleSpec::Serial {
                    port,
                    baud: args.scale_baud,
                }
            }
            (None, true) => ScaleSpec::Simulated,
            (None, false) => ScaleSpec::Absent,
        };

        let jpeg_quality = args.jpeg_quality.unwrap_or(i32::from(DEFAULT_JPEG_QUALITY));
        if !(1..=100).contains(&jpeg_quality) {
            bail!("--jpeg-quality must be an integer between 1 and 100");
        }

        let min_confidence = args.min_confidence.unwrap_or(DETECTION_CONFIDENCE);
        if !(0.0..=1.0).contains(&min_confidence) {
            bail!("--min-confidence must be between 0 and 1");
        }

        let preview_addr = if args.no_preview {
            None
        } else {
            Some(args.preview_addr.parse::<SocketAddr>().map_err(|err| {
                anyhow!("--preview-addr {:?} is not an IP:PORT: {err}", args.preview_addr)
            })?)
        };

        let model_command = args.model_command.filter(|cmd| !cmd.trim().is_empty());
        let power_off_command = args.power_off_command.filter(|cmd| !cmd.trim().is_empty());

        let telemetry = TelemetryOptions {
            chrome_trace_path: args.chrome_trace,
            default_level: if args.verbose { "debug" } else { "info" }.to_string(),
        };

        Ok(Self {
            source,
            width: args.width,
            height: args.height,
            policy,
            records_path: args.records,
            images_dir: args.images,
            scale,
            buttons: ButtonPins {
                mode: args.mode_pin_path,
                power: args.power_pin_path,
                active_low: args.buttons_active_low,
            },
            keyboard: args.keyboard,
            preview_addr,
            jpeg_quality: jpeg_quality as u8,
            model_command,
            min_confidence,
            power_off_command,
            telemetry,
        })
    }
}

fn parse_source(raw: &str, replay_fps: f64) -> Result<SourceSpec> {
    let path = PathBuf::from(raw);
    if path.is_dir() {
        let interval = (replay_fps.is_finite() && replay_fps > 0.0)
            .then(|| Duration::try_from_secs_f64(1.0 / replay_fps).ok())
            .flatten()
            .ok_or_else(|| anyhow!("--replay-fps must be positive, got {replay_fps}"))?;
        return Ok(SourceSpec::Directory { path, interval });
    }
    if raw.trim().is_empty() {
        bail!("Missing source. Provide --source <uri|dir>.");
    }
    if cfg!(not(feature = "with-opencv")) {
        bail!(
            "source {raw:?} is not an image directory and this build has no camera support \
             (rebuild with the `with-opencv` feature)"
        );
    }
    Ok(SourceSpec::Camera {
        uri: raw.to_string(),
    })
}
