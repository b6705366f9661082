use prometheus::{
    register_histogram_vec, register_int_counter_vec, Encoder, HistogramVec, IntCounterVec,
    TextEncoder,
};
use std::sync::LazyLock;

pub static ACTION_REQUESTS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "postbond_relay_action_total",
        "Receiver accept/release requests",
        &["action", "result"]
    )
    .unwrap()
});

pub static ACTION_LATENCY: LazyLock<HistogramVec> = LazyLock::new(|| {
    register_histogram_vec!(
        "postbond_relay_action_duration_seconds",
        "Accept/release latency in seconds (includes the provider capture)",
        &["action"],
        vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    )
    .unwrap()
});

pub static WEBHOOK_EVENTS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "postbond_relay_webhook_total",
        "Webhook deliveries by outcome",
        &["outcome"]
    )
    .unwrap()
});

pub static LINK_FAILURES: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "postbond_relay_link_failures_total",
        "Rejected capability links",
        &["reason"]
    )
    .unwrap()
});

pub static SWEEP_MESSAGES: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "postbond_relay_sweep_messages_total",
        "Messages handled by the expiry sweep",
        &["result"]
    )
    .unwrap()
});

pub fn metrics_output() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
