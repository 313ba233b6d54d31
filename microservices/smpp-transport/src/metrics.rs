//! Per-instance transport metrics

use brivas_telemetry::{Counter, Gauge};
use serde_json::{json, Value};

#[derive(Debug, Clone)]
pub struct TransportMetrics {
    pub submitted_pdus: Counter,
    pub acks: Counter,
    pub nacks: Counter,
    pub throttled_responses: Counter,
    pub retries: Counter,
    pub delivery_reports: Counter,
    pub inbound_messages: Counter,
    pub correlation_misses: Counter,
    pub reconnects: Counter,
    pub bound: Gauge,
    pub throttled: Gauge,
}

impl TransportMetrics {
    pub fn new() -> Self {
        Self {
            submitted_pdus: Counter::new("smpp_submitted_pdus_total"),
            acks: Counter::new("smpp_acks_total"),
            nacks: Counter::new("smpp_nacks_total"),
            throttled_responses: Counter::new("smpp_throttled_responses_total"),
            retries: Counter::new("smpp_retries_total"),
            delivery_reports: Counter::new("smpp_delivery_reports_total"),
            inbound_messages: Counter::new("smpp_inbound_messages_total"),
            correlation_misses: Counter::new("smpp_correlation_misses_total"),
            reconnects: Counter::new("smpp_reconnects_total"),
            bound: Gauge::new("smpp_session_bound"),
            throttled: Gauge::new("smpp_throttled"),
        }
    }

    /// Flat name → value map served on the metrics endpoint
    pub fn snapshot(&self) -> Value {
        let counters = [
            &self.submitted_pdus,
            &self.acks,
            &self.nacks,
            &self.throttled_responses,
            &self.retries,
            &self.delivery_reports,
            &self.inbound_messages,
            &self.correlation_misses,
            &self.reconnects,
        ];
        let mut map = serde_json::Map::new();
        for counter in counters {
            map.insert(counter.name().to_string(), json!(counter.get()));
        }
        for gauge in [&self.bound, &self.throttled] {
            map.insert(gauge.name().to_string(), json!(gauge.get()));
        }
        Value::Object(map)
    }
}

impl Default for TransportMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_names() {
        let metrics = TransportMetrics::new();
        metrics.acks.inc();
        metrics.throttled.set_flag(true);
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot["smpp_acks_total"], 1);
        assert_eq!(snapshot["smpp_throttled"], 1);
        assert_eq!(snapshot["smpp_session_bound"], 0);
    }
}
