use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;

#[derive(Debug, Clone, Default)]
pub struct HealthSnapshot {
    pub last_tick_ms: Option<u128>,
    pub controllers_by_state: BTreeMap<String, usize>,
}

#[derive(Default)]
pub struct HealthMetrics {
    snapshot: Mutex<HealthSnapshot>,
}

impl HealthMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            snapshot: Mutex::new(HealthSnapshot::default()),
        })
    }

    pub async fn note_tick(&self, ts: SystemTime, controllers_by_state: BTreeMap<String, usize>) {
        let mut guard = self.snapshot.lock().await;
        guard.last_tick_ms = Some(to_millis(ts));
        guard.controllers_by_state = controllers_by_state;
    }

    pub async fn snapshot(&self) -> HealthSnapshot {
        self.snapshot.lock().await.clone()
    }
}

fn to_millis(ts: SystemTime) -> u128 {
    ts.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default()
}
