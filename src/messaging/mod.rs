pub mod redpanda;

pub use redpanda::RedpandaClient;

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::audit::LifecycleEvent;
use crate::metrics::Metrics;
use crate::utils::{retry_with_backoff, RetryConfig, RetryResult};

// ============================================================================
// Audit Forwarder
// ============================================================================
//
// Drains the ChannelAuditSink receiver and publishes each lifecycle event to
// Redpanda, keyed by order id so every order's history lands on one
// partition in emission order.
//
// An event that still fails after retries is logged and counted, then
// skipped. The forwarder stops when every sender has been dropped.
//
// ============================================================================

pub fn spawn_audit_forwarder(
    mut rx: mpsc::UnboundedReceiver<LifecycleEvent>,
    client: Arc<RedpandaClient>,
    topic: String,
    metrics: Option<Arc<Metrics>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!(topic = %topic, "Audit forwarder started");

        while let Some(event) = rx.recv().await {
            let payload = match serde_json::to_string(&event) {
                Ok(payload) => payload,
                Err(e) => {
                    tracing::error!(event_id = %event.event_id, error = %e, "Failed to serialize lifecycle event");
                    continue;
                }
            };
            let key = event.order_id.to_string();

            let result = retry_with_backoff(RetryConfig::aggressive(), "redpanda_publish", |_attempt| {
                client.publish(&topic, &key, &payload)
            })
            .await;

            if let Some(metrics) = &metrics {
                metrics.update_circuit_breaker_state(client.get_circuit_breaker_state().await.code());
            }

            if let RetryResult::Failed(e) | RetryResult::PermanentFailure(e) = result {
                tracing::error!(
                    event_id = %event.event_id,
                    order_id = %event.order_id,
                    kind = event.kind.as_str(),
                    error = %e,
                    "Dropping lifecycle event after publish retries"
                );
                if let Some(metrics) = &metrics {
                    metrics.record_audit_publish_failure();
                }
            }
        }

        tracing::info!(topic = %topic, "Audit channel closed, forwarder stopping");
    })
}
