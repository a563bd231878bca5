/// Health check HTTP endpoint
/// Exposes /health, /ready and /metrics so a home-lab monitor can tell the
/// panel is still ticking and whether its last notification got through.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::notify::DispatchReport;

/// Timeout for reading HTTP request (prevents slow-loris attacks)
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Snapshot of the panel's counters
#[derive(Debug, Clone, PartialEq)]
pub struct HealthStatus {
    /// Completed poll ticks
    pub ticks: u64,
    /// Recommendation changes that passed the gate
    pub dispatches: u64,
    /// Successful sink deliveries
    pub deliveries: u64,
    /// Failed sink deliveries
    pub sink_failures: u64,
    /// UTC epoch of the last completed tick
    pub last_tick_time: u64,
    /// Whether every sink accepted the last dispatch
    pub last_dispatch_ok: bool,
}

impl Default for HealthStatus {
    fn default() -> Self {
        Self {
            ticks: 0,
            dispatches: 0,
            deliveries: 0,
            sink_failures: 0,
            last_tick_time: 0,
            last_dispatch_ok: true,
        }
    }
}

/// Counters updated by the poll loop, read by the health server
#[derive(Debug)]
pub struct PanelMetrics {
    ticks: AtomicU64,
    dispatches: AtomicU64,
    deliveries: AtomicU64,
    sink_failures: AtomicU64,
    last_tick_time: AtomicU64,
    last_dispatch_ok: AtomicBool,
}

impl Default for PanelMetrics {
    fn default() -> Self {
        Self {
            ticks: AtomicU64::new(0),
            dispatches: AtomicU64::new(0),
            deliveries: AtomicU64::new(0),
            sink_failures: AtomicU64::new(0),
            last_tick_time: AtomicU64::new(0),
            last_dispatch_ok: AtomicBool::new(true),
        }
    }
}

impl PanelMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a completed tick at `now` (UTC epoch seconds)
    pub fn record_tick(&self, now: i64) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
        self.last_tick_time
            .store(u64::try_from(now).unwrap_or_default(), Ordering::Relaxed);
    }

    /// Record the outcome of a gated dispatch
    pub fn record_dispatch(&self, report: &DispatchReport) {
        self.dispatches.fetch_add(1, Ordering::Relaxed);
        self.deliveries
            .fetch_add(report.delivered.len() as u64, Ordering::Relaxed);
        self.sink_failures
            .fetch_add(report.failed.len() as u64, Ordering::Relaxed);
        self.last_dispatch_ok
            .store(report.all_delivered(), Ordering::Relaxed);
    }

    pub fn status(&self) -> HealthStatus {
        HealthStatus {
            ticks: self.ticks.load(Ordering::Relaxed),
            dispatches: self.dispatches.load(Ordering::Relaxed),
            deliveries: self.deliveries.load(Ordering::Relaxed),
            sink_failures: self.sink_failures.load(Ordering::Relaxed),
            last_tick_time: self.last_tick_time.load(Ordering::Relaxed),
            last_dispatch_ok: self.last_dispatch_ok.load(Ordering::Relaxed),
        }
    }
}

/// Run the health check HTTP server
pub async fn run_health_server(
    port: u16,
    metrics: Arc<PanelMetrics>,
    cancel_token: CancellationToken,
) {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    let listener = match TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("Failed to bind health check server on port {}: {}", port, e);
            return;
        }
    };

    info!("Health check server listening on http://0.0.0.0:{}/health", port);

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((mut socket, peer_addr)) => {
                        let metrics = metrics.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_request(&mut socket, &metrics).await {
                                debug!("Error handling request from {}: {}", peer_addr, e);
                            }
                        });
                    }
                    Err(e) => {
                        warn!("Failed to accept connection: {}", e);
                    }
                }
            }
            _ = cancel_token.cancelled() => {
                info!("Health check server shutting down");
                break;
            }
        }
    }
}

async fn handle_request(
    socket: &mut tokio::net::TcpStream,
    metrics: &PanelMetrics,
) -> std::io::Result<()> {
    let mut buf = [0u8; 1024];

    let n = match timeout(REQUEST_TIMEOUT, socket.read(&mut buf)).await {
        Ok(result) => result?,
        Err(_) => {
            debug!("Request timeout after {:?}", REQUEST_TIMEOUT);
            return Ok(());
        }
    };

    if n == 0 {
        return Ok(());
    }

    let request = String::from_utf8_lossy(&buf[..n]);

    let path = request
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .unwrap_or("/");

    let status = metrics.status();
    let response = match path {
        "/health" | "/healthz" | "/health/" => build_health_response(&status),
        // Ready once the first tick has rendered
        "/ready" | "/readyz" | "/ready/" => build_ready_response(status.ticks > 0),
        "/metrics" => build_metrics_response(&status),
        _ => build_not_found_response(),
    };

    socket.write_all(response.as_bytes()).await?;
    socket.flush().await?;

    Ok(())
}

fn build_health_response(status: &HealthStatus) -> String {
    let body = serde_json::json!({
        "status": "healthy",
        "ticks": status.ticks,
        "dispatches": status.dispatches,
        "deliveries": status.deliveries,
        "sink_failures": status.sink_failures,
        "last_tick_time": status.last_tick_time,
        "last_dispatch_ok": status.last_dispatch_ok,
    })
    .to_string();

    format!(
        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    )
}

fn build_ready_response(ready: bool) -> String {
    let (status_code, status_text, body) = if ready {
        (200, "OK", r#"{"ready":true}"#)
    } else {
        (503, "Service Unavailable", r#"{"ready":false}"#)
    };

    format!(
        "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status_code,
        status_text,
        body.len(),
        body
    )
}

fn build_metrics_response(status: &HealthStatus) -> String {
    // Prometheus-compatible metrics format
    let body = format!(
        "# HELP offpeak_panel_ticks_total Completed poll ticks\n\
         # TYPE offpeak_panel_ticks_total counter\n\
         offpeak_panel_ticks_total {}\n\
         # HELP offpeak_panel_dispatches_total Recommendation changes dispatched\n\
         # TYPE offpeak_panel_dispatches_total counter\n\
         offpeak_panel_dispatches_total {}\n\
         # HELP offpeak_panel_sink_deliveries_total Sink delivery attempts by result\n\
         # TYPE offpeak_panel_sink_deliveries_total counter\n\
         offpeak_panel_sink_deliveries_total{{result=\"success\"}} {}\n\
         offpeak_panel_sink_deliveries_total{{result=\"failure\"}} {}\n\
         # HELP offpeak_panel_last_tick_timestamp Unix timestamp of the last tick\n\
         # TYPE offpeak_panel_last_tick_timestamp gauge\n\
         offpeak_panel_last_tick_timestamp {}\n\
         # HELP offpeak_panel_last_dispatch_ok Whether every sink accepted the last dispatch (1) or not (0)\n\
         # TYPE offpeak_panel_last_dispatch_ok gauge\n\
         offpeak_panel_last_dispatch_ok {}\n",
        status.ticks,
        status.dispatches,
        status.deliveries,
        status.sink_failures,
        status.last_tick_time,
        if status.last_dispatch_ok { 1 } else { 0 }
    );

    format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/plain; version=0.0.4\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    )
}

fn build_not_found_response() -> String {
    let body = r#"{"error":"Not Found"}"#;
    format!(
        "HTTP/1.1 404 Not Found\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    )
}
