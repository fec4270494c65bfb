use anyhow::Result;
use orchestrator::{Orchestrator, OrchestratorHandle};
use serde_json::json;
use shared::config::ShutdownConfig;
use shared::metrics::HealthMetrics;
use std::fs;
use std::sync::Arc;
use tokio::time::{Duration, sleep, timeout};
use tracing::{info, warn};

/// Drives the graceful exit: the tick loop stops, every controller is
/// asked to close its book, and a summary of the final phases lands on
/// disk for the operator.
pub struct ShutdownCoordinator {
    orchestrator: Arc<Orchestrator>,
    handle: OrchestratorHandle,
    metrics: Arc<HealthMetrics>,
    close_timeout: Duration,
    summary_path: String,
}

impl ShutdownCoordinator {
    pub fn new(
        config: &ShutdownConfig,
        orchestrator: Arc<Orchestrator>,
        handle: OrchestratorHandle,
        metrics: Arc<HealthMetrics>,
    ) -> Self {
        Self {
            orchestrator,
            handle,
            metrics,
            close_timeout: Duration::from_millis(config.close_timeout_ms()),
            summary_path: config.summary_path(),
        }
    }

    pub async fn shutdown(self) -> Result<()> {
        info!("shutdown coordinator: stopping the tick loop");
        self.handle.shutdown().await?;

        info!("shutdown coordinator: closing controller books");
        self.orchestrator.begin_stop_all().await;
        let orchestrator = Arc::clone(&self.orchestrator);
        let closed = timeout(self.close_timeout, async move {
            while !orchestrator.all_stopped().await {
                orchestrator.tick().await;
                sleep(Duration::from_millis(200)).await;
            }
        })
        .await;
        if closed.is_err() {
            warn!(
                timeout_ms = self.close_timeout.as_millis() as u64,
                "closing controller books timed out"
            );
        }

        let controllers: Vec<serde_json::Value> = self
            .orchestrator
            .list()
            .await
            .into_iter()
            .map(|summary| {
                json!({
                    "id": summary.id,
                    "pair": summary.pair,
                    "state": summary.state,
                })
            })
            .collect();
        let health = self.metrics.snapshot().await;
        let summary = json!({
            "all_stopped": closed.is_ok(),
            "last_tick_ms": health.last_tick_ms,
            "controllers": controllers,
        });
        fs::write(&self.summary_path, serde_json::to_string_pretty(&summary)?)?;

        info!(path = %self.summary_path, "shutdown coordinator completed all steps");
        Ok(())
    }
}
