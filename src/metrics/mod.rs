mod server;

use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry};

pub use server::start_metrics_server;

// ============================================================================
// Metrics Module - Prometheus metrics for observability
// ============================================================================
//
// Covers:
// - Checkout attempts and latency, labelled by outcome
// - Order lifecycle transitions and rejected transitions
// - Stock ledger operations and compare-and-swap retries
// - Audit events emitted and broker publish failures
// - Circuit breaker state of the broker connection
//
// Everything is registered on a private registry scraped via /metrics.
// ============================================================================

pub struct Metrics {
    registry: Registry,

    // Checkout
    pub checkout_attempts: IntCounterVec,
    pub checkout_duration: HistogramVec,
    pub payment_refunds: IntCounterVec,

    // Order lifecycle
    pub order_transitions: IntCounterVec,
    pub order_transition_rejections: IntCounterVec,

    // Stock ledger
    pub stock_operations: IntCounterVec,
    pub stock_cas_retries: IntCounterVec,

    // Audit
    pub audit_events: IntCounterVec,
    pub audit_publish_failures: IntCounter,

    // Circuit breaker
    pub circuit_breaker_state: IntGauge,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let checkout_attempts = IntCounterVec::new(
            Opts::new("checkout_attempts_total", "Checkout attempts by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(checkout_attempts.clone()))?;

        let checkout_duration = HistogramVec::new(
            HistogramOpts::new("checkout_duration_seconds", "End-to-end checkout duration")
                .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["outcome"],
        )?;
        registry.register(Box::new(checkout_duration.clone()))?;

        let payment_refunds = IntCounterVec::new(
            Opts::new("payment_refunds_total", "Refunds of charges whose order was never created"),
            &["outcome"],
        )?;
        registry.register(Box::new(payment_refunds.clone()))?;

        let order_transitions = IntCounterVec::new(
            Opts::new("order_transitions_total", "Applied order status transitions"),
            &["from", "to"],
        )?;
        registry.register(Box::new(order_transitions.clone()))?;

        let order_transition_rejections = IntCounterVec::new(
            Opts::new("order_transition_rejections_total", "Rejected order status transitions"),
            &["reason"],
        )?;
        registry.register(Box::new(order_transition_rejections.clone()))?;

        let stock_operations = IntCounterVec::new(
            Opts::new("stock_operations_total", "Stock ledger operations"),
            &["op", "outcome"],
        )?;
        registry.register(Box::new(stock_operations.clone()))?;

        let stock_cas_retries = IntCounterVec::new(
            Opts::new("stock_cas_retries_total", "Stock compare-and-swap retries after a lost race"),
            &["op"],
        )?;
        registry.register(Box::new(stock_cas_retries.clone()))?;

        let audit_events = IntCounterVec::new(
            Opts::new("audit_events_total", "Lifecycle events emitted to the audit sink"),
            &["kind"],
        )?;
        registry.register(Box::new(audit_events.clone()))?;

        let audit_publish_failures = IntCounter::new(
            "audit_publish_failures_total",
            "Audit events that could not be published to the broker",
        )?;
        registry.register(Box::new(audit_publish_failures.clone()))?;

        let circuit_breaker_state = IntGauge::new(
            "circuit_breaker_state",
            "Broker circuit breaker state (0=Closed, 1=Open, 2=HalfOpen)",
        )?;
        registry.register(Box::new(circuit_breaker_state.clone()))?;

        Ok(Self {
            registry,
            checkout_attempts,
            checkout_duration,
            payment_refunds,
            order_transitions,
            order_transition_rejections,
            stock_operations,
            stock_cas_retries,
            audit_events,
            audit_publish_failures,
            circuit_breaker_state,
        })
    }

    /// Get the Prometheus registry for exposing metrics via HTTP
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_checkout(&self, outcome: &str, duration_secs: f64) {
        self.checkout_attempts.with_label_values(&[outcome]).inc();
        self.checkout_duration.with_label_values(&[outcome]).observe(duration_secs);
    }

    pub fn record_payment_refund(&self, outcome: &str) {
        self.payment_refunds.with_label_values(&[outcome]).inc();
    }

    pub fn record_transition(&self, from: &str, to: &str) {
        self.order_transitions.with_label_values(&[from, to]).inc();
    }

    pub fn record_transition_rejection(&self, reason: &str) {
        self.order_transition_rejections.with_label_values(&[reason]).inc();
    }

    pub fn record_stock_operation(&self, op: &str, outcome: &str) {
        self.stock_operations.with_label_values(&[op, outcome]).inc();
    }

    pub fn record_stock_retry(&self, op: &str) {
        self.stock_cas_retries.with_label_values(&[op]).inc();
    }

    pub fn record_audit_event(&self, kind: &str) {
        self.audit_events.with_label_values(&[kind]).inc();
    }

    pub fn record_audit_publish_failure(&self) {
        self.audit_publish_failures.inc();
    }

    pub fn update_circuit_breaker_state(&self, state: i64) {
        self.circuit_breaker_state.set(state);
    }

    /// Render every registered family in the Prometheus text format
    pub fn render(&self) -> anyhow::Result<String> {
        use prometheus::{Encoder, TextEncoder};

        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new().unwrap();
        metrics.record_checkout("success", 0.01);
        assert!(!metrics.registry().gather().is_empty());
    }

    #[test]
    fn test_record_checkout_outcomes() {
        let metrics = Metrics::new().unwrap();
        metrics.record_checkout("success", 0.02);
        metrics.record_checkout("success", 0.03);
        metrics.record_checkout("InsufficientStock", 0.01);

        let text = metrics.render().unwrap();
        assert!(text.contains("checkout_attempts_total{outcome=\"success\"} 2"));
        assert!(text.contains("checkout_attempts_total{outcome=\"InsufficientStock\"} 1"));
    }

    #[test]
    fn test_record_transitions() {
        let metrics = Metrics::new().unwrap();
        metrics.record_transition("pending", "confirmed");
        metrics.record_transition_rejection("InvalidTransition");

        let text = metrics.render().unwrap();
        assert!(text.contains("order_transitions_total{from=\"pending\",to=\"confirmed\"} 1"));
        assert!(text.contains("order_transition_rejections_total{reason=\"InvalidTransition\"} 1"));
    }

    #[test]
    fn test_circuit_breaker_gauge() {
        let metrics = Metrics::new().unwrap();
        metrics.update_circuit_breaker_state(1);

        let text = metrics.render().unwrap();
        assert!(text.contains("circuit_breaker_state 1"));
    }
}
