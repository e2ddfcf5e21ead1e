//! Actix Web preview server exposing the displayed frame, an MJPEG stream,
//! station status, and Prometheus metrics.
//!
//! The server runs on a dedicated thread to keep the pipeline free from Actix
//! runtime concerns.

use std::{net::SocketAddr, sync::Arc, thread, time::Duration};

use actix_web::{
    http::header,
    web::{self, Bytes},
    App, HttpResponse, HttpServer,
};
use anyhow::{anyhow, Context, Result};
use async_stream::stream;
use tokio::sync::oneshot;
use tracing::{error, info};

use crate::pipeline::{sink::PreviewFrame, status::StationStatus, telemetry};

/// Shared state backing HTTP handlers.
struct ServerState {
    preview: Arc<PreviewFrame>,
    status: Arc<StationStatus>,
}

/// Handle for the preview server thread.
pub struct PreviewServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl PreviewServer {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Signal the server to stop and block until the thread exits.
    pub fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Bind `addr` and serve on a new thread. Bind failures are returned.
pub fn spawn_preview_server(
    addr: SocketAddr,
    preview: Arc<PreviewFrame>,
    status: Arc<StationStatus>,
) -> Result<PreviewServer> {
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let (bound_tx, bound_rx) = crossbeam_channel::bounded::<Result<SocketAddr, String>>(1);
    let handle = telemetry::spawn_thread("preview-server", move || {
        let served = actix_web::rt::System::new().block_on(async move {
            let server = HttpServer::new(move || {
                App::new()
                    .app_data(web::Data::new(ServerState {
                        preview: preview.clone(),
                        status: status.clone(),
                    }))
                    .route("/frame.jpg", web::get().to(frame_handler))
                    .route("/stream.mjpg", web::get().to(stream_handler))
                    .route("/status", web::get().to(status_handler))
                    .route("/metrics", web::get().to(metrics_handler))
            })
            .workers(1)
            .disable_signals();
            let server = match server.bind(addr) {
                Ok(server) => server,
                Err(err) => {
                    let _ = bound_tx.send(Err(err.to_string()));
                    return Ok(());
                }
            };
            let local = server.addrs().first().copied().unwrap_or(addr);
            let _ = bound_tx.send(Ok(local));

            let server = server.run();
            let srv_handle = server.handle();
            actix_web::rt::spawn(async move {
                let _ = shutdown_rx.await;
                srv_handle.stop(true).await;
            });
            server.await
        });
        if let Err(err) = served {
            error!("HTTP server error: {err}");
        }
    })
    .context("failed to spawn preview server thread")?;

    match bound_rx.recv() {
        Ok(Ok(local)) => {
            info!("preview available at http://{local}/stream.mjpg (status at /status)");
            Ok(PreviewServer {
                addr: local,
                shutdown: Some(shutdown_tx),
                handle: Some(handle),
            })
        }
        Ok(Err(err)) => {
            let _ = handle.join();
            Err(anyhow!("failed to bind preview server on {addr}: {err}"))
        }
        Err(_) => {
            let _ = handle.join();
            Err(anyhow!("preview server thread exited before binding"))
        }
    }
}

/// Return the latest displayed frame as a single JPEG.
async fn frame_handler(state: web::Data<ServerState>) -> HttpResponse {
    match state.preview.peek() {
        Some(packet) => HttpResponse::Ok()
            .content_type("image/jpeg")
            .append_header((header::CACHE_CONTROL, "no-cache"))
            .body(packet.jpeg),
        None => HttpResponse::NoContent().finish(),
    }
}

/// Stream the displayed frames over a multipart response.
async fn stream_handler(state: web::Data<ServerState>) -> HttpResponse {
    let state = state.clone();
    let stream = stream! {
        let mut interval = actix_web::rt::time::interval(Duration::from_millis(66));
        let mut last_sent = 0u64;
        loop {
            interval.tick().await;
            let Some(packet) = state.preview.peek() else {
                continue;
            };
            if packet.sequence == last_sent {
                continue;
            }
            last_sent = packet.sequence;
            let mut payload = Vec::with_capacity(packet.jpeg.len() + 64);
            payload.extend_from_slice(b"--frame\r\n");
            payload.extend_from_slice(format!("X-Sequence: {}\r\n", packet.sequence).as_bytes());
            payload.extend_from_slice(b"Content-Type: image/jpeg\r\n\r\n");
            payload.extend_from_slice(&packet.jpeg);
            payload.extend_from_slice(b"\r\n");
            yield Ok::<Bytes, actix_web::Error>(Bytes::from(payload));
        }
    };

    HttpResponse::Ok()
        .insert_header((header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"))
        .append_header((header::CACHE_CONTROL, "no-cache"))
        .append_header((header::CONTENT_TYPE, "multipart/x-mixed-replace; boundary=frame"))
        .streaming(stream)
}

async fn status_handler(state: web::Data<ServerState>) -> HttpResponse {
    HttpResponse::Ok().json(state.status.report())
}

async fn metrics_handler() -> HttpResponse {
    match telemetry::prometheus_handle() {
        Some(handle) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(handle.render()),
        None => HttpResponse::NotFound().body("metrics recorder not installed"),
    }
}
