//! Prometheus metrics for the relay
//!
//! Exposes metrics on /metrics endpoint for Prometheus scraping.

use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_gauge_vec, Counter,
    CounterVec, Encoder, Gauge, GaugeVec, TextEncoder,
};

use crate::retry::classify_error;
use crate::types::SwapStatus;

lazy_static! {
    // Source chain
    pub static ref LATEST_BLOCK: GaugeVec = register_gauge_vec!(
        "tokenswap_latest_block",
        "Last source block visited by the watcher",
        &["role"]
    ).unwrap();

    pub static ref BURNS_DETECTED: CounterVec = register_counter_vec!(
        "tokenswap_burns_detected_total",
        "Total number of valid burn events detected",
        &["role"]
    ).unwrap();

    pub static ref BURNS_REJECTED: CounterVec = register_counter_vec!(
        "tokenswap_burns_rejected_total",
        "Burn events dropped for an invalid recipient",
        &["role"]
    ).unwrap();

    // Swap lifecycle
    pub static ref SWAPS_CREATED: Counter = register_counter!(
        "tokenswap_swaps_created_total",
        "Swaps written by the leader"
    ).unwrap();

    pub static ref SIGNATURES_SUBMITTED: CounterVec = register_counter_vec!(
        "tokenswap_signatures_submitted_total",
        "Signatures stored by operators",
        &["operator"]
    ).unwrap();

    pub static ref BROADCASTS: CounterVec = register_counter_vec!(
        "tokenswap_broadcasts_total",
        "Multisig broadcasts by result",
        &["result"]
    ).unwrap();

    pub static ref STATUS_TRANSITIONS: CounterVec = register_counter_vec!(
        "tokenswap_status_transitions_total",
        "Swap status changes issued by the leader",
        &["from", "to"]
    ).unwrap();

    // Errors
    pub static ref ERRORS: CounterVec = register_counter_vec!(
        "tokenswap_errors_total",
        "Total number of errors",
        &["stage", "class"]
    ).unwrap();

    pub static ref CONSECUTIVE_FAILURES: GaugeVec = register_gauge_vec!(
        "tokenswap_consecutive_failures",
        "Consecutive failed iterations of a loop",
        &["loop"]
    ).unwrap();

    // Health
    pub static ref UP: Gauge = register_gauge!(
        "tokenswap_up",
        "Whether the relay is up and running"
    ).unwrap();

    pub static ref LAST_SUCCESSFUL_POLL: GaugeVec = register_gauge_vec!(
        "tokenswap_last_successful_poll_timestamp",
        "Unix timestamp of last successful poll",
        &["role"]
    ).unwrap();
}

pub fn record_block_visited(role: &str, block_number: u64) {
    LATEST_BLOCK.with_label_values(&[role]).set(block_number as f64);
}

pub fn record_burn_detected(role: &str) {
    BURNS_DETECTED.with_label_values(&[role]).inc();
}

pub fn record_burn_rejected(role: &str) {
    BURNS_REJECTED.with_label_values(&[role]).inc();
}

pub fn record_swap_created() {
    SWAPS_CREATED.inc();
}

pub fn record_signature_submitted(operator: &str) {
    SIGNATURES_SUBMITTED.with_label_values(&[operator]).inc();
}

pub fn record_broadcast(success: bool) {
    let result = if success { "submitted" } else { "failed" };
    BROADCASTS.with_label_values(&[result]).inc();
}

pub fn record_transition(from: SwapStatus, to: SwapStatus) {
    STATUS_TRANSITIONS
        .with_label_values(&[from.as_str(), to.as_str()])
        .inc();
}

/// Record an error, labelled by stage and by its classification
pub fn record_error(stage: &str, error: &str) {
    let class = classify_error(error);
    ERRORS.with_label_values(&[stage, class.as_str()]).inc();
}

pub fn set_consecutive_failures(loop_name: &str, count: u32) {
    CONSECUTIVE_FAILURES
        .with_label_values(&[loop_name])
        .set(count as f64);
}

pub fn record_successful_poll(role: &str) {
    LAST_SUCCESSFUL_POLL
        .with_label_values(&[role])
        .set(chrono::Utc::now().timestamp() as f64);
}

/// Render every registered metric in the Prometheus text format
pub fn gather_text() -> eyre::Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}
