//! Prometheus metrics

use metrics::{counter, describe_counter};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus recorder and describe the metrics.
pub fn init_metrics() -> PrometheusHandle {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    describe_counter!(
        "switchboard_sessions_started_total",
        "Call sessions accepted"
    );
    describe_counter!("switchboard_sessions_ended_total", "Call sessions ended");
    describe_counter!(
        "switchboard_malformed_frames_total",
        "Provider frames discarded as malformed"
    );
    describe_counter!("switchboard_interrupts_total", "Barge-in interrupts fired");
    describe_counter!(
        "switchboard_turn_commits_total",
        "User turns committed, labeled by reason"
    );

    handle
}

pub fn record_session_started() {
    counter!("switchboard_sessions_started_total").increment(1);
}

pub fn record_session_ended(cause: &'static str) {
    counter!("switchboard_sessions_ended_total", "cause" => cause).increment(1);
}

pub fn record_malformed_frame() {
    counter!("switchboard_malformed_frames_total").increment(1);
}

pub fn record_interrupt() {
    counter!("switchboard_interrupts_total").increment(1);
}

pub fn record_turn_commit(reason: &'static str) {
    counter!("switchboard_turn_commits_total", "reason" => reason).increment(1);
}
