//! # Prometheus Metrics
//!
//! Operation counters and latencies for the token service, plus the state
//! of the funding pool. Scraped at `GET /metrics`.
//!
//! All metrics live in a dedicated [`prometheus::Registry`] with the `sft`
//! prefix.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};
use std::sync::Arc;
use std::time::Duration;

use sft_protocol::FtError;

#[derive(Clone)]
pub struct NodeMetrics {
    registry: Registry,
    /// Finished operations by `operation` and `outcome` ("ok" or an error kind).
    pub operations_total: IntCounterVec,
    /// Wall-clock duration of each operation, by `operation`.
    pub operation_seconds: HistogramVec,
    pub funding_utxos: IntGauge,
    pub funding_value: IntGauge,
}

impl NodeMetrics {
    /// Create and register every metric. Call once at startup.
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new_custom(Some("sft".into()), None)?;

        let operations_total = IntCounterVec::new(
            Opts::new("operations_total", "Token operations finished, by outcome"),
            &["operation", "outcome"],
        )?;
        registry.register(Box::new(operations_total.clone()))?;

        let operation_seconds = HistogramVec::new(
            HistogramOpts::new("operation_seconds", "Token operation latency in seconds")
                .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
            &["operation"],
        )?;
        registry.register(Box::new(operation_seconds.clone()))?;

        let funding_utxos = IntGauge::new("funding_utxos", "Unreserved utxos in the funding pool")?;
        registry.register(Box::new(funding_utxos.clone()))?;

        let funding_value = IntGauge::new("funding_value_sats", "Unreserved satoshis in the funding pool")?;
        registry.register(Box::new(funding_value.clone()))?;

        Ok(Self { registry, operations_total, operation_seconds, funding_utxos, funding_value })
    }

    /// Count one finished operation.
    pub fn observe<T>(&self, operation: &str, elapsed: Duration, result: &Result<T, FtError>) {
        let outcome = match result {
            Ok(_) => "ok",
            Err(e) => e.kind_name(),
        };
        self.operations_total.with_label_values(&[operation, outcome]).inc();
        self.operation_seconds
            .with_label_values(&[operation])
            .observe(elapsed.as_secs_f64());
    }

    pub fn set_funding(&self, utxos: usize, value: u64) {
        self.funding_utxos.set(utxos as i64);
        self.funding_value.set(value.min(i64::MAX as u64) as i64);
    }

    /// Render every registered metric in the Prometheus text format.
    pub fn encode(&self) -> prometheus::Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

pub type SharedMetrics = Arc<NodeMetrics>;

/// `GET /metrics`
pub async fn metrics_handler(State(metrics): State<SharedMetrics>) -> impl IntoResponse {
    match metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!("failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding failed").into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcomes_are_labelled_by_error_kind() {
        let metrics = NodeMetrics::new().unwrap();
        metrics.observe("issue", Duration::from_millis(5), &Ok::<(), FtError>(()));
        metrics.observe::<()>(
            "issue",
            Duration::from_millis(5),
            &Err(FtError::UnknownGenesis("00".into())),
        );
        metrics.set_funding(3, 1200);

        let text = metrics.encode().unwrap();
        assert!(text.contains("sft_operations_total{operation=\"issue\",outcome=\"ok\"} 1"));
        assert!(text.contains("outcome=\"unknown_genesis\""));
        assert!(text.contains("sft_funding_value_sats 1200"));
    }
}
