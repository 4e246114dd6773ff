use actix_web::HttpResponse;
use once_cell::sync::Lazy;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, TextEncoder,
};

static APPENDS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "communication_ledger_appends_total",
            "Messages appended to the ledger",
        ),
        &["message_type"],
    )
    .expect("failed to create communication_ledger_appends_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register communication_ledger_appends_total");
    counter
});

static APPEND_CONFLICTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "communication_ledger_append_conflicts_total",
            "Appends that lost the tail compare-and-swap",
        ),
        &["outcome"],
    )
    .expect("failed to create communication_ledger_append_conflicts_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register communication_ledger_append_conflicts_total");
    counter
});

static APPEND_DURATION_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    let histogram = HistogramVec::new(
        HistogramOpts::new(
            "communication_ledger_append_duration_seconds",
            "Append latency including retries",
        )
        .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]),
        &["outcome"],
    )
    .expect("failed to create communication_ledger_append_duration_seconds");
    prometheus::default_registry()
        .register(Box::new(histogram.clone()))
        .expect("failed to register communication_ledger_append_duration_seconds");
    histogram
});

static VERIFICATIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "communication_ledger_verifications_total",
            "Chain verifications by result",
        ),
        &["result"],
    )
    .expect("failed to create communication_ledger_verifications_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register communication_ledger_verifications_total");
    counter
});

static INTEGRITY_VIOLATIONS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::new(
        "communication_ledger_integrity_violations_total",
        "Broken chains detected by verification or audit",
    )
    .expect("failed to create communication_ledger_integrity_violations_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register communication_ledger_integrity_violations_total");
    counter
});

static REALTIME_EVENTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "communication_realtime_events_total",
            "Realtime event deliveries by event type",
        ),
        &["event"],
    )
    .expect("failed to create communication_realtime_events_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register communication_realtime_events_total");
    counter
});

static REALTIME_CONNECTIONS: Lazy<IntGauge> = Lazy::new(|| {
    let gauge = IntGauge::new(
        "communication_realtime_connections",
        "Open realtime sessions",
    )
    .expect("failed to create communication_realtime_connections");
    prometheus::default_registry()
        .register(Box::new(gauge.clone()))
        .expect("failed to register communication_realtime_connections");
    gauge
});

pub fn record_append(message_type: &str, outcome: &str, elapsed_secs: f64) {
    if outcome == "ok" {
        APPENDS_TOTAL.with_label_values(&[message_type]).inc();
    }
    APPEND_DURATION_SECONDS
        .with_label_values(&[outcome])
        .observe(elapsed_secs);
}

/// `outcome` is `retried` or `exhausted`.
pub fn record_append_conflict(outcome: &str) {
    APPEND_CONFLICTS_TOTAL.with_label_values(&[outcome]).inc();
}

pub fn record_verification(valid: bool) {
    let result = if valid { "valid" } else { "broken" };
    VERIFICATIONS_TOTAL.with_label_values(&[result]).inc();
    if !valid {
        INTEGRITY_VIOLATIONS_TOTAL.inc();
    }
}

/// Violations counted since process start.
pub fn integrity_violations() -> u64 {
    INTEGRITY_VIOLATIONS_TOTAL.get()
}

pub fn record_realtime_event(event: &str, deliveries: usize) {
    REALTIME_EVENTS_TOTAL
        .with_label_values(&[event])
        .inc_by(deliveries as u64);
}

pub fn realtime_connection_opened() {
    REALTIME_CONNECTIONS.inc();
}

pub fn realtime_connection_closed() {
    REALTIME_CONNECTIONS.dec();
}

pub async fn metrics_handler() -> HttpResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        return HttpResponse::InternalServerError().body(err.to_string());
    }

    HttpResponse::Ok()
        .content_type(encoder.format_type())
        .body(buffer)
}
