use std::fmt::Write as _;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use shared::types::Side;

#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    Statistics {
        pair: String,
        value: f64,
        rate: f64,
        base_symbol: String,
        base_amount: f64,
        quote_symbol: String,
        quote_amount: f64,
    },
    OrdersSubmitted {
        pair: String,
        orders: Vec<SubmittedOrder>,
    },
    OrdersFilled {
        pair: String,
        order_ids: Vec<String>,
    },
    OrdersCancelled {
        pair: String,
        order_ids: Vec<String>,
    },
    OrdersWithdrawn {
        pair: String,
        order_ids: Vec<String>,
    },
    ConfigChanged {
        id: String,
        changes: Vec<String>,
    },
    ControllerStopped {
        id: String,
        pair: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubmittedOrder {
    pub side: Side,
    pub price: f64,
    pub amount: f64,
}

#[async_trait::async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, notification: Notification);
}

#[derive(Default, Clone)]
pub struct LoggerSink;

#[async_trait::async_trait]
impl NotificationSink for LoggerSink {
    async fn notify(&self, notification: Notification) {
        match &notification {
            Notification::Statistics {
                pair,
                value,
                rate,
                base_symbol,
                base_amount,
                quote_symbol,
                quote_amount,
            } => {
                info!(
                    pair = %pair,
                    value,
                    rate,
                    base = format_args!("{base_amount} {base_symbol}"),
                    quote = format_args!("{quote_amount} {quote_symbol}"),
                    "portfolio statistics"
                );
            }
            Notification::OrdersSubmitted { pair, orders } => {
                info!(pair = %pair, count = orders.len(), "orders submitted");
            }
            Notification::OrdersFilled { pair, order_ids } => {
                info!(pair = %pair, ids = ?order_ids, "orders filled");
            }
            Notification::OrdersCancelled { pair, order_ids } => {
                info!(pair = %pair, count = order_ids.len(), "orders cancelled");
            }
            Notification::OrdersWithdrawn { pair, order_ids } => {
                info!(pair = %pair, count = order_ids.len(), "orders withdrawn");
            }
            Notification::ConfigChanged { id, changes } => {
                info!(id = %id, changes = ?changes, "controller config changed");
            }
            Notification::ControllerStopped { id, pair, reason } => {
                warn!(id = %id, pair = %pair, reason = %reason, "controller stopped");
            }
        }
    }
}

/// Delivers notifications to a Telegram chat via the Bot API. Send
/// failures are logged and swallowed so a flaky bot never stalls a
/// reconciliation step.
#[derive(Clone)]
pub struct TelegramSink {
    client: reqwest::Client,
    token: String,
    chat_id: String,
}

impl TelegramSink {
    pub fn new(token: String, chat_id: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            token,
            chat_id,
        }
    }

    async fn send(&self, text: String) {
        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.token);
        let body = serde_json::json!({ "chat_id": self.chat_id, "text": text });
        match self.client.post(&url).json(&body).send().await {
            Ok(response) if !response.status().is_success() => {
                warn!(status = %response.status(), "telegram send rejected");
            }
            Ok(_) => {}
            Err(err) => {
                warn!(error = %err, "telegram send failed");
            }
        }
    }
}

#[async_trait::async_trait]
impl NotificationSink for TelegramSink {
    async fn notify(&self, notification: Notification) {
        self.send(render_message(&notification)).await;
    }
}

pub fn render_message(notification: &Notification) -> String {
    match notification {
        Notification::Statistics {
            pair,
            value,
            rate,
            base_symbol,
            base_amount,
            quote_symbol,
            quote_amount,
        } => {
            format!(
                "[{pair}] value {value:.4} {quote_symbol}, rate {:.2}%\n{base_symbol}: {base_amount:.6}\n{quote_symbol}: {quote_amount:.6}",
                rate * 100.0
            )
        }
        Notification::OrdersSubmitted { pair, orders } => {
            let mut text = format!("[{pair}] submitted {} orders", orders.len());
            for order in orders {
                let side = match order.side {
                    Side::Buy => "buy",
                    Side::Sell => "sell",
                };
                let _ = write!(text, "\n{side} {} @ {}", order.amount, order.price);
            }
            text
        }
        Notification::OrdersFilled { pair, order_ids } => {
            format!("[{pair}] filled: {}", order_ids.join(", "))
        }
        Notification::OrdersCancelled { pair, order_ids } => {
            format!("[{pair}] cancelled {} orders", order_ids.len())
        }
        Notification::OrdersWithdrawn { pair, order_ids } => {
            format!("[{pair}] withdrew {} filled orders", order_ids.len())
        }
        Notification::ConfigChanged { id, changes } => {
            format!("[{id}] config changed:\n{}", changes.join("\n"))
        }
        Notification::ControllerStopped { id, pair, reason } => {
            format!("[{id}] {pair} stopped: {reason}")
        }
    }
}

#[derive(Clone, Default)]
pub struct MemorySink {
    pub notifications: Arc<Mutex<Vec<Notification>>>,
}

impl MemorySink {
    pub async fn take(&self) -> Vec<Notification> {
        let mut guard = self.notifications.lock().await;
        std::mem::take(&mut *guard)
    }
}

#[async_trait::async_trait]
impl NotificationSink for MemorySink {
    async fn notify(&self, notification: Notification) {
        let mut guard = self.notifications.lock().await;
        guard.push(notification);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_sink_records_notifications() {
        let sink = MemorySink::default();
        sink.notify(Notification::OrdersFilled {
            pair: "KUJI/USK".to_string(),
            order_ids: vec!["7".to_string()],
        })
        .await;
        sink.notify(Notification::ControllerStopped {
            id: "abc".to_string(),
            pair: "KUJI/USK".to_string(),
            reason: "target deviation".to_string(),
        })
        .await;

        let recorded = sink.take().await;
        assert_eq!(recorded.len(), 2);
        assert!(matches!(recorded[0], Notification::OrdersFilled { .. }));
        assert!(matches!(recorded[1], Notification::ControllerStopped { .. }));
        assert!(sink.take().await.is_empty());
    }

    #[test]
    fn renders_submitted_orders_one_per_line() {
        let text = render_message(&Notification::OrdersSubmitted {
            pair: "KUJI/USK".to_string(),
            orders: vec![
                SubmittedOrder {
                    side: Side::Sell,
                    price: 1.02,
                    amount: 5.0,
                },
                SubmittedOrder {
                    side: Side::Buy,
                    price: 0.98,
                    amount: 5.1,
                },
            ],
        });
        assert!(text.starts_with("[KUJI/USK] submitted 2 orders"));
        assert!(text.contains("sell 5 @ 1.02"));
        assert!(text.contains("buy 5.1 @ 0.98"));
    }
}
