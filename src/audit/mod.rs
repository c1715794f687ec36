use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::domain::order::OrderStatus;
use crate::metrics::Metrics;

// ============================================================================
// Audit Sink
// ============================================================================
//
// Lifecycle events leave the engine through `AuditSink::emit`, which is
// synchronous and infallible from the caller's point of view. Delivery to
// downstream consumers (Redpanda, logs) happens elsewhere; a slow or broken
// consumer can never fail or block a checkout or a transition.
//
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleKind {
    OrderPlaced,
    StatusChanged,
    TrackingAttached,
    Reordered,
}

impl LifecycleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleKind::OrderPlaced => "order_placed",
            LifecycleKind::StatusChanged => "status_changed",
            LifecycleKind::TrackingAttached => "tracking_attached",
            LifecycleKind::Reordered => "reordered",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub event_id: Uuid,
    pub kind: LifecycleKind,
    pub order_id: Uuid,
    pub buyer_id: Uuid,
    pub order_number: String,
    pub from: Option<OrderStatus>,
    pub to: OrderStatus,
    pub detail: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl LifecycleEvent {
    pub fn new(kind: LifecycleKind, order_id: Uuid, buyer_id: Uuid, order_number: &str, to: OrderStatus) -> Self {
        Self {
            event_id: Uuid::now_v7(),
            kind,
            order_id,
            buyer_id,
            order_number: order_number.to_string(),
            from: None,
            to,
            detail: None,
            occurred_at: Utc::now(),
        }
    }

    pub fn with_from(mut self, from: OrderStatus) -> Self {
        self.from = Some(from);
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

pub trait AuditSink: Send + Sync {
    fn emit(&self, event: LifecycleEvent);
}

/// Writes every event to the structured log
#[derive(Debug, Default, Clone)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn emit(&self, event: LifecycleEvent) {
        tracing::info!(
            target: "audit",
            event_id = %event.event_id,
            kind = event.kind.as_str(),
            order_id = %event.order_id,
            buyer_id = %event.buyer_id,
            order_number = %event.order_number,
            from = event.from.map(|s| s.as_str()),
            to = event.to.as_str(),
            detail = event.detail.as_deref(),
            "Lifecycle event"
        );
    }
}

/// Hands events to a background consumer over an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelAuditSink {
    tx: mpsc::UnboundedSender<LifecycleEvent>,
}

impl ChannelAuditSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<LifecycleEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl AuditSink for ChannelAuditSink {
    fn emit(&self, event: LifecycleEvent) {
        if let Err(e) = self.tx.send(event) {
            tracing::warn!(event_id = %e.0.event_id, "Audit consumer is gone, dropping lifecycle event");
        }
    }
}

/// Fans one event out to several sinks
pub struct FanoutAuditSink {
    sinks: Vec<Arc<dyn AuditSink>>,
}

impl FanoutAuditSink {
    pub fn new(sinks: Vec<Arc<dyn AuditSink>>) -> Self {
        Self { sinks }
    }
}

impl AuditSink for FanoutAuditSink {
    fn emit(&self, event: LifecycleEvent) {
        for sink in &self.sinks {
            sink.emit(event.clone());
        }
    }
}

/// Sink handle used by the engine components; counts what it emits
#[derive(Clone)]
pub struct AuditTrail {
    sink: Arc<dyn AuditSink>,
    metrics: Option<Arc<Metrics>>,
}

impl AuditTrail {
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self { sink, metrics: None }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn record(&self, event: LifecycleEvent) {
        if let Some(metrics) = &self.metrics {
            metrics.record_audit_event(event.kind.as_str());
        }
        self.sink.emit(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_sink_delivers_in_order() {
        let (sink, mut rx) = ChannelAuditSink::new();
        let trail = AuditTrail::new(Arc::new(sink));
        let order_id = Uuid::new_v4();
        let buyer_id = Uuid::new_v4();

        trail.record(LifecycleEvent::new(
            LifecycleKind::OrderPlaced,
            order_id,
            buyer_id,
            "ORD-1",
            OrderStatus::Pending,
        ));
        trail.record(
            LifecycleEvent::new(LifecycleKind::StatusChanged, order_id, buyer_id, "ORD-1", OrderStatus::Confirmed)
                .with_from(OrderStatus::Pending),
        );

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.kind, LifecycleKind::OrderPlaced);
        assert_eq!(second.from, Some(OrderStatus::Pending));
        assert_eq!(second.to, OrderStatus::Confirmed);
    }

    #[test]
    fn test_emit_after_consumer_dropped_does_not_panic() {
        let (sink, rx) = ChannelAuditSink::new();
        drop(rx);
        sink.emit(LifecycleEvent::new(
            LifecycleKind::OrderPlaced,
            Uuid::new_v4(),
            Uuid::new_v4(),
            "ORD-2",
            OrderStatus::Pending,
        ));
    }

    #[test]
    fn test_lifecycle_event_serializes_snake_case() {
        let event = LifecycleEvent::new(
            LifecycleKind::TrackingAttached,
            Uuid::new_v4(),
            Uuid::new_v4(),
            "ORD-3",
            OrderStatus::Processing,
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "tracking_attached");
        assert_eq!(json["to"], "processing");
    }
}
