//! Outbound order-paid notifications.
//!
//! Fire-and-forget: the event pipeline never blocks on, or fails because
//! of, the notification target. Delivery is at-least-once with two quick
//! in-process retries; the receiver must tolerate duplicates, since a
//! retried event re-sends its notification too.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::breaker::BreakerRegistry;

#[derive(Serialize)]
struct OrderPaidNotice {
    order_id: String,
    payment_id: String,
    paid_at: i64,
}

#[derive(Clone)]
pub struct Notifier {
    client: reqwest::Client,
    url: Option<String>,
    breakers: Arc<BreakerRegistry>,
    /// Runtime handle so processors on blocking threads can spawn sends.
    handle: tokio::runtime::Handle,
}

impl Notifier {
    pub fn new(url: Option<String>, breakers: Arc<BreakerRegistry>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            url,
            breakers,
            handle: tokio::runtime::Handle::current(),
        }
    }

    /// Announce that an order has been paid. Returns immediately; the send
    /// happens on a spawned task.
    pub fn order_paid(&self, order_id: &str, payment_id: &str) {
        let Some(url) = self.url.clone() else {
            return;
        };
        if !self.breakers.can_execute("notifier") {
            tracing::warn!(order_id, "notifier circuit open, skipping notification");
            return;
        }

        let notice = OrderPaidNotice {
            order_id: order_id.to_string(),
            payment_id: payment_id.to_string(),
            paid_at: chrono::Utc::now().timestamp(),
        };
        let client = self.client.clone();
        let breakers = self.breakers.clone();

        self.handle.spawn(async move {
            // Quick retries cover blips; anything longer is the breaker's job
            for (attempt, delay_ms) in [(1u32, 0u64), (2, 100), (3, 200)] {
                if delay_ms > 0 {
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                }
                match client.post(&url).json(&notice).send().await {
                    Ok(resp) if resp.status().is_success() => {
                        breakers.record_outcome("notifier", true);
                        tracing::debug!(order_id = %notice.order_id, "order-paid notification sent");
                        return;
                    }
                    Ok(resp) => {
                        tracing::warn!(
                            order_id = %notice.order_id,
                            status = %resp.status(),
                            attempt,
                            "order-paid notification rejected"
                        );
                    }
                    Err(e) => {
                        tracing::warn!(
                            order_id = %notice.order_id,
                            error = %e,
                            attempt,
                            "order-paid notification failed"
                        );
                    }
                }
            }
            breakers.record_outcome("notifier", false);
            tracing::error!(
                order_id = %notice.order_id,
                "order-paid notification dropped after retries"
            );
        });
    }
}
