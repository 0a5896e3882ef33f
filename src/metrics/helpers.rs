//! Metrics helper structs for convenient metric recording

use std::time::Duration;

use prometheus::{Encoder, TextEncoder};

use super::{
    CHANNELS_ACTIVE, CONSUMERS_ACTIVE, DELIVERIES_TOTAL, DELIVERY_FAILURES_TOTAL,
    MESSAGES_POLLED_TOTAL, MESSAGES_PUBLISHED_TOTAL, POLL_CYCLE_DURATION, POLL_ERRORS_TOTAL,
    PUBLISH_ERRORS_TOTAL, UNROUTED_TOTAL,
};

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

pub struct PublishMetrics;

impl PublishMetrics {
    pub fn record_published(channel: &str) {
        MESSAGES_PUBLISHED_TOTAL.with_label_values(&[channel]).inc();
    }

    pub fn record_error(channel: &str) {
        PUBLISH_ERRORS_TOTAL.with_label_values(&[channel]).inc();
    }
}

pub struct PollMetrics;

impl PollMetrics {
    pub fn record_polled(channel: &str) {
        MESSAGES_POLLED_TOTAL.with_label_values(&[channel]).inc();
    }

    pub fn record_error(channel: &str) {
        POLL_ERRORS_TOTAL.with_label_values(&[channel]).inc();
    }

    pub fn record_unrouted(channel: &str) {
        UNROUTED_TOTAL.with_label_values(&[channel]).inc();
    }

    pub fn observe_cycle(duration: Duration) {
        POLL_CYCLE_DURATION.observe(duration.as_secs_f64());
    }

    /// Drop the per-channel series of a channel that is no longer polled.
    pub fn forget_channel(channel: &str) {
        let _ = MESSAGES_POLLED_TOTAL.remove_label_values(&[channel]);
        let _ = POLL_ERRORS_TOTAL.remove_label_values(&[channel]);
        let _ = UNROUTED_TOTAL.remove_label_values(&[channel]);
    }
}

/// Every `reason` label value of `DELIVERY_FAILURES_TOTAL`
const FAILURE_REASONS: [&str; 4] = ["conduit_full", "timeout", "conduit_closed", "handler_panicked"];

pub struct DeliveryMetrics;

impl DeliveryMetrics {
    pub fn record_delivered(consumer: &str) {
        DELIVERIES_TOTAL.with_label_values(&[consumer]).inc();
    }

    pub fn record_failed(consumer: &str, reason: &str) {
        DELIVERY_FAILURES_TOTAL
            .with_label_values(&[consumer, reason])
            .inc();
    }

    pub fn record_handler_panic(consumer: &str) {
        Self::record_failed(consumer, "handler_panicked");
    }

    /// Drop every series labelled with a removed consumer.
    pub fn forget_consumer(consumer: &str) {
        let _ = DELIVERIES_TOTAL.remove_label_values(&[consumer]);
        for reason in FAILURE_REASONS {
            let _ = DELIVERY_FAILURES_TOTAL.remove_label_values(&[consumer, reason]);
        }
    }
}

/// Gauges shared by every queue in the process
pub struct RegistryMetrics;

impl RegistryMetrics {
    pub fn channel_added() {
        CHANNELS_ACTIVE.inc();
    }

    pub fn channel_removed() {
        CHANNELS_ACTIVE.dec();
    }

    pub fn consumer_added() {
        CONSUMERS_ACTIVE.inc();
    }

    pub fn consumer_removed() {
        CONSUMERS_ACTIVE.dec();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_includes_recorded_metrics() {
        PublishMetrics::record_published("metrics-test");
        DeliveryMetrics::record_failed("metrics-consumer", "timeout");
        PollMetrics::observe_cycle(Duration::from_millis(2));

        let text = encode_metrics().unwrap();
        assert!(text.contains("nmq_messages_published_total"));
        assert!(text.contains("metrics-test"));
        assert!(text.contains("nmq_delivery_failures_total"));
        assert!(text.contains("nmq_poll_cycle_duration_seconds"));
    }

    #[test]
    fn test_forget_removes_label_series() {
        DeliveryMetrics::record_delivered("churned-consumer");
        DeliveryMetrics::record_failed("churned-consumer", "conduit_full");
        PollMetrics::record_polled("churned-channel");
        PollMetrics::record_unrouted("churned-channel");

        let text = encode_metrics().unwrap();
        assert!(text.contains("churned-consumer"));
        assert!(text.contains("churned-channel"));

        DeliveryMetrics::forget_consumer("churned-consumer");
        PollMetrics::forget_channel("churned-channel");

        let text = encode_metrics().unwrap();
        assert!(!text.contains("churned-consumer"));
        assert!(!text.contains("churned-channel"));
    }

    #[test]
    fn test_failure_reasons_match_delivery_errors() {
        use crate::queue::DeliveryError;

        let labels = [
            DeliveryError::ConduitFull.as_str(),
            DeliveryError::Timeout(1).as_str(),
            DeliveryError::ConduitClosed.as_str(),
            DeliveryError::HandlerPanicked(String::new()).as_str(),
        ];
        assert_eq!(labels, FAILURE_REASONS);
    }
}
