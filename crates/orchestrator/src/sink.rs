use notify::{Notification, NotificationSink};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use store::{FillRecord, StatRecord, Store};
use tracing::warn;

/// Sink handed to one controller's step: persists statistics and fill
/// history for that controller, then forwards everything to the shared
/// operator sink. Persistence failures are logged, never fatal.
pub struct RecordingSink {
    controller_id: String,
    store: Arc<dyn Store>,
    inner: Arc<dyn NotificationSink>,
}

impl RecordingSink {
    pub fn new(
        controller_id: String,
        store: Arc<dyn Store>,
        inner: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            controller_id,
            store,
            inner,
        }
    }
}

#[async_trait::async_trait]
impl NotificationSink for RecordingSink {
    async fn notify(&self, notification: Notification) {
        match &notification {
            Notification::Statistics {
                pair,
                value,
                rate,
                base_amount,
                quote_amount,
                ..
            } => {
                let stat = StatRecord {
                    controller_id: self.controller_id.clone(),
                    pair: pair.clone(),
                    value: *value,
                    rate: *rate,
                    base_amount: *base_amount,
                    quote_amount: *quote_amount,
                    ts_ms: now_ms(),
                };
                if let Err(err) = self.store.append_stat(stat).await {
                    warn!(id = %self.controller_id, error = %err, "failed to persist stat record");
                }
            }
            Notification::OrdersFilled { pair, order_ids } => {
                let ts_ms = now_ms();
                let fills: Vec<FillRecord> = order_ids
                    .iter()
                    .map(|order_id| FillRecord {
                        controller_id: self.controller_id.clone(),
                        pair: pair.clone(),
                        order_id: order_id.clone(),
                        ts_ms,
                    })
                    .collect();
                if let Err(err) = self.store.append_fills(&fills).await {
                    warn!(id = %self.controller_id, error = %err, "failed to persist fill history");
                }
            }
            _ => {}
        }
        self.inner.notify(notification).await;
    }
}

pub(crate) fn now_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::MemorySink;
    use store::MemoryStore;

    #[tokio::test]
    async fn persists_stats_and_fills_then_forwards() {
        let store = Arc::new(MemoryStore::new());
        let inner = MemorySink::default();
        let sink = RecordingSink::new(
            "t-1".to_string(),
            store.clone(),
            Arc::new(inner.clone()),
        );

        sink.notify(Notification::Statistics {
            pair: "KUJI/USK".to_string(),
            value: 20.0,
            rate: 0.5,
            base_symbol: "KUJI".to_string(),
            base_amount: 10.0,
            quote_symbol: "USK".to_string(),
            quote_amount: 10.0,
        })
        .await;
        sink.notify(Notification::OrdersFilled {
            pair: "KUJI/USK".to_string(),
            order_ids: vec!["1".to_string(), "2".to_string()],
        })
        .await;

        let stats = store.stats().await;
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].controller_id, "t-1");
        assert_eq!(stats[0].value, 20.0);

        let fills = store.fills().await;
        assert_eq!(fills.len(), 2);
        assert_eq!(fills[1].order_id, "2");

        assert_eq!(inner.take().await.len(), 2);
    }
}
