use anyhow::{Context, Result};
use engine::TradingConfigUpdate;
use orchestrator::Orchestrator;
use serde::Deserialize;
use serde_json::json;
use shared::config::ControllerConfig;
use shared::metrics::HealthMetrics;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{info, warn};

/// Health and management endpoints over a small hand-rolled HTTP
/// server:
///
///   GET    /health
///   GET    /controllers
///   POST   /controllers
///   GET    /controllers/{id}
///   PUT    /controllers/{id}
///   POST   /controllers/{id}/stop
///   POST   /controllers/{id}/resume
///   DELETE /controllers/{id}
pub struct ManagementServer {
    addr: SocketAddr,
    orchestrator: Arc<Orchestrator>,
    metrics: Arc<HealthMetrics>,
}

#[derive(Debug, Deserialize)]
struct UpdateRequest {
    offsets: Option<Vec<f64>>,
    target_rate: Option<f64>,
    order_min: Option<f64>,
}

impl ManagementServer {
    pub fn new(
        binding: Option<&str>,
        orchestrator: Arc<Orchestrator>,
        metrics: Arc<HealthMetrics>,
    ) -> Result<Self> {
        let addr: SocketAddr = binding
            .and_then(|s| s.parse().ok())
            .unwrap_or_else(|| "127.0.0.1:8080".parse().expect("default addr"));
        Ok(Self {
            addr,
            orchestrator,
            metrics,
        })
    }

    pub async fn spawn(self) -> Result<(SocketAddr, tokio::task::JoinHandle<()>)> {
        let listener = TcpListener::bind(self.addr)
            .await
            .with_context(|| format!("bind management server on {}", self.addr))?;
        let addr = listener.local_addr()?;
        info!(addr = %addr, "management server listening");

        let orchestrator = self.orchestrator;
        let metrics = self.metrics;
        let join = tokio::spawn(async move {
            loop {
                let (socket, _) = match listener.accept().await {
                    Ok(accepted) => accepted,
                    Err(err) => {
                        warn!(error = %err, "management server accept failed");
                        continue;
                    }
                };
                let orchestrator = Arc::clone(&orchestrator);
                let metrics = Arc::clone(&metrics);
                tokio::spawn(async move {
                    if let Err(err) = handle_connection(socket, orchestrator, metrics).await {
                        warn!(error = %err, "management request failed");
                    }
                });
            }
        });
        Ok((addr, join))
    }
}

async fn handle_connection(
    mut socket: TcpStream,
    orchestrator: Arc<Orchestrator>,
    metrics: Arc<HealthMetrics>,
) -> Result<()> {
    let request = read_request(&mut socket).await?;
    if request.is_empty() {
        return Ok(());
    }
    let first_line = request.lines().next().unwrap_or("");
    let mut parts = first_line.split_whitespace();
    let method = parts.next().unwrap_or("").to_string();
    let path = parts.next().unwrap_or("/").to_string();
    let body = request
        .split_once("\r\n\r\n")
        .map(|(_, body)| body.to_string())
        .unwrap_or_default();

    let (status, payload) = route(&method, &path, &body, &orchestrator, &metrics).await;
    let body_str = serde_json::to_string(&payload)?;
    let response = format!(
        "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{}",
        body_str.len(),
        body_str
    );
    socket.write_all(response.as_bytes()).await?;
    Ok(())
}

const MAX_REQUEST_BYTES: usize = 1 << 20;

/// Reads one request, continuing past a short read until the headers
/// and the Content-Length worth of body have arrived.
async fn read_request<S>(socket: &mut S) -> Result<String>
where
    S: tokio::io::AsyncRead + Unpin,
{
    let mut buffer: Vec<u8> = Vec::with_capacity(1024);
    let mut chunk = [0u8; 4096];
    loop {
        let bytes = socket.read(&mut chunk).await?;
        if bytes == 0 {
            break;
        }
        buffer.extend_from_slice(&chunk[..bytes]);
        anyhow::ensure!(buffer.len() <= MAX_REQUEST_BYTES, "request too large");
        if let Some(header_end) = buffer
            .windows(4)
            .position(|window| window == b"\r\n\r\n")
        {
            let headers = String::from_utf8_lossy(&buffer[..header_end]);
            let content_length = headers
                .lines()
                .find_map(|line| {
                    let (name, value) = line.split_once(':')?;
                    name.trim()
                        .eq_ignore_ascii_case("content-length")
                        .then(|| value.trim().parse::<usize>().ok())?
                })
                .unwrap_or(0);
            if buffer.len() >= header_end + 4 + content_length {
                break;
            }
        }
    }
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

async fn route(
    method: &str,
    path: &str,
    body: &str,
    orchestrator: &Arc<Orchestrator>,
    metrics: &Arc<HealthMetrics>,
) -> (&'static str, serde_json::Value) {
    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
    match (method, segments.as_slice()) {
        ("GET", ["health"]) => {
            let snapshot = metrics.snapshot().await;
            (
                "200 OK",
                json!({
                    "last_tick_ms": snapshot.last_tick_ms,
                    "controllers_by_state": snapshot.controllers_by_state,
                }),
            )
        }
        ("GET", ["controllers"]) => {
            let listed = orchestrator.list().await;
            ("200 OK", json!(listed))
        }
        ("POST", ["controllers"]) => match serde_json::from_str::<ControllerConfig>(body) {
            Ok(config) => match orchestrator.add(&config).await {
                Ok(summary) => ("201 Created", json!(summary)),
                Err(err) => bad_request(err),
            },
            Err(err) => bad_request(err),
        },
        ("GET", ["controllers", id]) => match orchestrator.get(id).await {
            Some(summary) => ("200 OK", json!(summary)),
            None => not_found(id),
        },
        ("PUT", ["controllers", id]) => match serde_json::from_str::<UpdateRequest>(body) {
            Ok(update) => {
                let update = TradingConfigUpdate {
                    offsets: update.offsets,
                    target_rate: update.target_rate,
                    order_min: update.order_min,
                };
                match orchestrator.update(id, update).await {
                    Ok(changes) => ("200 OK", json!({ "changes": changes })),
                    Err(err) => bad_request(err),
                }
            }
            Err(err) => bad_request(err),
        },
        ("POST", ["controllers", id, "stop"]) => match orchestrator.stop(id).await {
            Ok(()) => ("200 OK", json!({ "id": id, "stopping": true })),
            Err(err) => bad_request(err),
        },
        ("POST", ["controllers", id, "resume"]) => match orchestrator.resume(id).await {
            Ok(()) => ("200 OK", json!({ "id": id, "resumed": true })),
            Err(err) => bad_request(err),
        },
        ("DELETE", ["controllers", id]) => match orchestrator.delete(id).await {
            Ok(()) => ("200 OK", json!({ "id": id, "deleted": true })),
            Err(err) => bad_request(err),
        },
        _ => ("404 Not Found", json!({ "error": "no such route" })),
    }
}

fn bad_request(err: impl std::fmt::Display) -> (&'static str, serde_json::Value) {
    ("400 Bad Request", json!({ "error": err.to_string() }))
}

fn not_found(id: &str) -> (&'static str, serde_json::Value) {
    (
        "404 Not Found",
        json!({ "error": format!("unknown controller {id}") }),
    )
}
