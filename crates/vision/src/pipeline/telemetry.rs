//! Telemetry helpers for tracing spans, Prometheus metrics, and Chrome traces.

use std::{
    fs::File,
    io,
    path::{Path, PathBuf},
    sync::OnceLock,
    thread,
    time::Duration,
};

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::{warn, Subscriber};
use tracing_subscriber::{
    filter::{filter_fn, EnvFilter},
    fmt,
    layer::SubscriberExt,
    prelude::*,
    registry::LookupSpan,
    Layer, Registry,
};

use crate::pipeline::config::TelemetryOptions;

static PROM_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Guard returned when a telemetry subscriber has been installed for the current thread.
pub(crate) struct TelemetryGuard {
    _default_guard: tracing::subscriber::DefaultGuard,
    chrome_guard: Option<tracing_chrome::FlushGuard>,
    chrome_trace_path: Option<PathBuf>,
}

/// Install the Prometheus recorder once per process and return its handle.
pub(crate) fn init_metrics_recorder() -> &'static PrometheusHandle {
    PROM_HANDLE.get_or_init(|| {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        if let Err(err) = metrics::set_global_recorder(recorder) {
            warn!("metrics recorder already installed; /metrics will be empty: {err}");
        }

        let upkeep = handle.clone();
        let spawned = spawn_thread("prometheus-upkeep", move || loop {
            thread::sleep(Duration::from_secs(5));
            upkeep.run_upkeep();
        });
        if let Err(err) = spawned {
            warn!("failed to spawn prometheus upkeep thread: {err}");
        }
        handle
    })
}

pub(crate) fn prometheus_handle() -> Option<&'static PrometheusHandle> {
    PROM_HANDLE.get()
}

/// Install the pipeline subscriber for the current thread.
///
/// `RUST_LOG` wins over `default_level`.
pub(crate) fn enter_runtime(opts: &TelemetryOptions) -> TelemetryGuard {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(opts.default_level.as_str()));
    let chrome = opts
        .chrome_trace_path
        .as_deref()
        .and_then(|path| match build_chrome_layer(path) {
            Ok(pair) => Some(pair),
            Err(err) => {
                warn!(
                    "failed to initialise chrome trace writer at {}: {err}",
                    path.display()
                );
                None
            }
        });

    let (default_guard, chrome_guard) = match chrome {
        Some((layer, guard)) => {
            let spans_only = filter_fn(|metadata| metadata.is_span());
            let subscriber = tracing_subscriber::registry()
                .with(layer.with_filter(spans_only))
                .with(console_layer(env_filter))
                .with(tracing_error::ErrorLayer::default());
            (tracing::subscriber::set_default(subscriber), Some(guard))
        }
        None => {
            let subscriber = tracing_subscriber::registry()
                .with(console_layer(env_filter))
                .with(tracing_error::ErrorLayer::default());
            (tracing::subscriber::set_default(subscriber), None)
        }
    };

    TelemetryGuard {
        _default_guard: default_guard,
        chrome_guard,
        chrome_trace_path: opts.chrome_trace_path.clone(),
    }
}

fn console_layer<S>(filter: EnvFilter) -> impl Layer<S>
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    fmt::layer()
        .with_target(false)
        .with_timer(fmt::time::uptime())
        .with_filter(filter)
}

/// Spawn a thread that inherits the current tracing dispatcher.
pub(crate) fn spawn_thread<F, T>(name: impl Into<String>, f: F) -> io::Result<thread::JoinHandle<T>>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let dispatch = tracing::dispatcher::get_default(|current| current.clone());
    thread::Builder::new()
        .name(name.into())
        .spawn(move || tracing::dispatcher::with_default(&dispatch, f))
}

fn build_chrome_layer(
    path: &Path,
) -> io::Result<(tracing_chrome::ChromeLayer<Registry>, tracing_chrome::FlushGuard)> {
    let file = File::create(path)?;
    Ok(tracing_chrome::ChromeLayerBuilder::new()
        .writer(file)
        .include_args(true)
        .build())
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(guard) = self.chrome_guard.take() {
            guard.flush();
            if let Some(path) = &self.chrome_trace_path {
                tracing::info!("chrome trace written to {}", path.display());
            }
        }
    }
}
