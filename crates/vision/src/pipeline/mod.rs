//! Unattended weigh-station pipeline: capture, plate inference, and event
//! recording, with an HTTP preview.
//!
//! - `config`: CLI configuration parsing.
//! - `station`: owns the three loops and their shutdown order.
//! - `coordinator`: the per-tick schedule.
//! - `worker`: inference thread.
//! - `recorder`: debounce/cooldown policy and persistence.
//! - `mode`: operating mode state machine.
//! - `server`/`sink`/`status`: preview endpoints.
//! - `watchdog`/`telemetry`: health and instrumentation.

use std::{
    process::Command,
    sync::{atomic::Ordering, Arc, Once},
};

use anyhow::{Context, Result};
use ml_core::{InferenceResult, ModelRecognizer, NullRecognizer, PlateRecognizer, SidecarModel};
use station_io::{
    spawn_keyboard_listener, ButtonConfig, ButtonWatcher, CsvRecordStore, Edge, InputHandler,
    JpegArchive, OfflineScale, SerialScale, SimulatedScale, WeightSensor,
};
use tracing::{error, info, warn};
use video_ingest::{CaptureDevice, Frame, ImageDirectory, LatestSlot};

pub mod clock;
pub mod config;
pub mod coordinator;
pub mod mode;
pub mod recorder;
pub mod server;
pub mod sink;
pub mod station;
pub mod status;
pub(crate) mod telemetry;
pub mod watchdog;
pub mod worker;

use clock::SystemClock;
use config::{ScaleSpec, SourceSpec, StationConfig};
use coordinator::ShutdownReason;
use recorder::EventRecorder;
use server::{spawn_preview_server, PreviewServer};
use sink::{FrameSink, NullSink, PreviewFrame, PreviewSink};
use station::{Station, StationParts};
use worker::RecognizerInit;

/// Single-slot buffer carrying the newest frame to the inference worker.
pub type LatestFrameBuffer = LatestSlot<Arc<Frame>>;
/// Single-slot buffer carrying the newest inference result to the coordinator.
pub type ResultBuffer = LatestSlot<InferenceResult>;

/// Open every device named by `config`, run the station until it stops, and
/// execute the power-off command if one was requested.
pub fn run(config: StationConfig) -> Result<ShutdownReason> {
    let _telemetry_guard = telemetry::enter_runtime(&config.telemetry);
    let _ = telemetry::init_metrics_recorder();
    let _span = tracing::info_span!(
        "station.setup",
        source = ?config.source,
        cooldown_s = config.policy.cooldown.as_secs_f64(),
    )
    .entered();

    let station = Station::new();
    install_interrupt_handler(&station);

    let device = open_device(&config).context("failed to open capture device")?;
    let store = CsvRecordStore::open(&config.records_path).with_context(|| {
        format!("failed to open record store {}", config.records_path.display())
    })?;
    let images = JpegArchive::new(&config.images_dir, config.jpeg_quality);
    let recorder = EventRecorder::new(
        config.policy,
        open_sensor(&config.scale),
        Box::new(images),
        Box::new(store),
    );

    let buttons = start_inputs(&config, station.mode())?;
    let (sink, preview) = start_preview(&config, &station);

    let outcome = station.run(StationParts {
        device,
        recognizer: recognizer_init(&config),
        recorder,
        sink,
        clock: Arc::new(SystemClock::new()),
    });

    for button in buttons {
        button.stop();
    }
    if let Some(server) = preview {
        server.stop();
    }

    let reason = outcome?;
    if reason == ShutdownReason::PowerOff {
        if let Some(command) = &config.power_off_command {
            run_power_off(command);
        }
    }
    Ok(reason)
}

fn install_interrupt_handler(station: &Station) {
    static CTRL_HANDLER: Once = Once::new();
    let stop = station.stop_signal();
    CTRL_HANDLER.call_once(move || {
        if let Err(err) = ctrlc::set_handler(move || stop.store(true, Ordering::SeqCst)) {
            warn!("failed to install Ctrl+C handler: {err}");
        }
    });
}

fn open_device(config: &StationConfig) -> Result<Box<dyn CaptureDevice>> {
    match &config.source {
        SourceSpec::Directory { path, interval } => {
            Ok(Box::new(ImageDirectory::open(path, *interval)?))
        }
        SourceSpec::Camera { uri } => open_camera(uri, (config.width, config.height)),
    }
}

#[cfg(feature = "with-opencv")]
fn open_camera(uri: &str, size: (u32, u32)) -> Result<Box<dyn CaptureDevice>> {
    Ok(Box::new(video_ingest::OpencvCamera::open(uri, size)?))
}

#[cfg(not(feature = "with-opencv"))]
fn open_camera(uri: &str, _size: (u32, u32)) -> Result<Box<dyn CaptureDevice>> {
    anyhow::bail!("camera source {uri:?} needs a build with the `with-opencv` feature")
}

/// A scale that cannot be opened degrades to records without weight.
fn open_sensor(scale: &ScaleSpec) -> Box<dyn WeightSensor> {
    match scale {
        ScaleSpec::Serial { port, baud } => match SerialScale::open(port, *baud) {
            Ok(scale) => Box::new(scale),
            Err(err) => {
                error!("{err}; recording without weight");
                Box::new(OfflineScale)
            }
        },
        ScaleSpec::Simulated => {
            info!("using simulated scale");
            Box::new(SimulatedScale::new())
        }
        ScaleSpec::Absent => {
            info!("no scale configured; recording without weight");
            Box::new(OfflineScale)
        }
    }
}

fn recognizer_init(config: &StationConfig) -> RecognizerInit {
    match config.model_command.clone() {
        Some(command) => {
            let confidence = config.min_confidence;
            Box::new(move || -> Result<Box<dyn PlateRecognizer>> {
                let model = SidecarModel::spawn(&command)?;
                Ok(Box::new(
                    ModelRecognizer::new(model).with_confidence_threshold(confidence),
                ))
            })
        }
        None => {
            warn!("no --model-command given; plates will not be recognised");
            Box::new(|| -> Result<Box<dyn PlateRecognizer>> { Ok(Box::new(NullRecognizer)) })
        }
    }
}

fn start_inputs(
    config: &StationConfig,
    handler: Arc<dyn InputHandler>,
) -> Result<Vec<ButtonWatcher>> {
    let edge = if config.buttons.active_low {
        Edge::Falling
    } else {
        Edge::Rising
    };
    let mut watchers = Vec::new();
    let pins = [
        config.buttons.mode.as_ref().map(ButtonConfig::mode),
        config.buttons.power.as_ref().map(ButtonConfig::power),
    ];
    for mut button in pins.into_iter().flatten() {
        button.edge = edge;
        let path = button.value_path.clone();
        let watcher = ButtonWatcher::spawn(button, handler.clone())
            .with_context(|| format!("failed to read button value file {}", path.display()))?;
        watchers.push(watcher);
    }
    if config.keyboard {
        spawn_keyboard_listener(handler).context("failed to start keyboard input")?;
    }
    Ok(watchers)
}

fn start_preview(
    config: &StationConfig,
    station: &Station,
) -> (Box<dyn FrameSink>, Option<PreviewServer>) {
    let Some(addr) = config.preview_addr else {
        return (Box::new(NullSink), None);
    };
    let shared = Arc::new(PreviewFrame::new());
    match spawn_preview_server(addr, shared.clone(), station.status()) {
        Ok(server) => (
            Box::new(PreviewSink::new(shared, config.jpeg_quality)),
            Some(server),
        ),
        Err(err) => {
            warn!("{err:#}; continuing without preview");
            (Box::new(NullSink), None)
        }
    }
}

fn run_power_off(command: &str) {
    info!("running power-off command `{command}`");
    match Command::new("sh").arg("-c").arg(command).status() {
        Ok(status) if status.success() => {}
        Ok(status) => warn!("power-off command exited with {status}"),
        Err(err) => warn!("failed to run power-off command: {err}"),
    }
}
