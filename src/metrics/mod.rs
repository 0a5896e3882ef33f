//! Prometheus metrics for the queue.
//!
//! - Publish metrics (messages pushed, push failures)
//! - Poll metrics (messages popped, poll failures, cycle duration)
//! - Delivery metrics (conduit deliveries, drops by reason, handler panics)
//! - Registry gauges (active channels and consumers)

mod helpers;

pub use helpers::{encode_metrics, DeliveryMetrics, PollMetrics, PublishMetrics, RegistryMetrics};

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter_vec, register_int_gauge, Histogram, IntCounterVec,
    IntGauge,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "nmq";

lazy_static! {
    /// Messages pushed onto channels
    pub static ref MESSAGES_PUBLISHED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_messages_published_total", METRIC_PREFIX),
        "Total messages pushed onto channels",
        &["channel"]
    ).unwrap();

    /// Failed pushes
    pub static ref PUBLISH_ERRORS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_publish_errors_total", METRIC_PREFIX),
        "Total failed pushes",
        &["channel"]
    ).unwrap();

    /// Messages popped off channels by the dispatch engine
    pub static ref MESSAGES_POLLED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_messages_polled_total", METRIC_PREFIX),
        "Total messages popped by the dispatch engine",
        &["channel"]
    ).unwrap();

    /// Pops that failed for a reason other than an empty channel
    pub static ref POLL_ERRORS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_poll_errors_total", METRIC_PREFIX),
        "Total failed pops",
        &["channel"]
    ).unwrap();

    /// Duration of one full pass over the channel list
    pub static ref POLL_CYCLE_DURATION: Histogram = register_histogram!(
        format!("{}_poll_cycle_duration_seconds", METRIC_PREFIX),
        "Duration of one dispatch cycle",
        vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]
    ).unwrap();

    /// Messages placed on a consumer conduit
    pub static ref DELIVERIES_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_deliveries_total", METRIC_PREFIX),
        "Total messages placed on consumer conduits",
        &["consumer"]
    ).unwrap();

    /// Messages not delivered to a consumer, by reason
    pub static ref DELIVERY_FAILURES_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_delivery_failures_total", METRIC_PREFIX),
        "Total messages that did not reach a consumer",
        &["consumer", "reason"]
    ).unwrap();

    /// Popped messages that had no consumer to go to
    pub static ref UNROUTED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_unrouted_total", METRIC_PREFIX),
        "Total popped messages discarded because no consumer was registered",
        &["channel"]
    ).unwrap();

    pub static ref CHANNELS_ACTIVE: IntGauge = register_int_gauge!(
        format!("{}_channels_active", METRIC_PREFIX),
        "Number of channels being polled"
    ).unwrap();

    pub static ref CONSUMERS_ACTIVE: IntGauge = register_int_gauge!(
        format!("{}_consumers_active", METRIC_PREFIX),
        "Number of registered consumers"
    ).unwrap();
}
