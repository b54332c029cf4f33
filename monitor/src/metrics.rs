use lazy_static::lazy_static;
use prometheus::{Counter, Encoder, Gauge, Histogram, HistogramOpts, Opts, Registry, TextEncoder};
use tracing::error;

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();
    pub static ref MESSAGES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "monitor_messages_total",
        "Total messages received from MQTT"
    ))
    .unwrap();
    pub static ref RULE_SKIPPED_TOTAL: Counter = Counter::with_opts(Opts::new(
        "monitor_rule_skipped_total",
        "Messages that did not satisfy the topic rule condition"
    ))
    .unwrap();
    pub static ref INVALID_MESSAGES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "monitor_invalid_messages_total",
        "Total invalid messages rejected"
    ))
    .unwrap();
    pub static ref RECORDS_ROUTED_TOTAL: Counter = Counter::with_opts(Opts::new(
        "monitor_records_routed_total",
        "Measurement records queued for storage"
    ))
    .unwrap();
    pub static ref RECORDS_DROPPED_TOTAL: Counter = Counter::with_opts(Opts::new(
        "monitor_records_dropped_total",
        "Measurement records dropped after persistent insert failures"
    ))
    .unwrap();
    pub static ref DB_FAILURES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "monitor_db_failures_total",
        "Total database insert failures"
    ))
    .unwrap();
    pub static ref RETENTION_DELETED_TOTAL: Counter = Counter::with_opts(Opts::new(
        "monitor_retention_deleted_total",
        "Measurements removed by the retention task"
    ))
    .unwrap();
    pub static ref INGEST_LATENCY_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "monitor_ingest_latency_seconds",
            "Time taken to ingest batch into DB"
        )
        .buckets(vec![
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0
        ])
    )
    .unwrap();
    pub static ref BATCH_SIZE: Gauge = Gauge::with_opts(Opts::new(
        "monitor_batch_size",
        "Current batch size being processed"
    ))
    .unwrap();
    pub static ref CHANNEL_FULL_TOTAL: Counter = Counter::with_opts(Opts::new(
        "monitor_channel_full_total",
        "Total number of times channel was full (backpressure events)"
    ))
    .unwrap();
    pub static ref QUERIES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "monitor_queries_total",
        "Time-series queries issued"
    ))
    .unwrap();
    pub static ref QUERY_FAILURES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "monitor_query_failures_total",
        "Time-series queries that returned a failure"
    ))
    .unwrap();
    pub static ref ADVICE_REQUESTS_TOTAL: Counter = Counter::with_opts(Opts::new(
        "monitor_advice_requests_total",
        "Prompts sent to the farm advisor agent"
    ))
    .unwrap();
    pub static ref ADVICE_FAILURES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "monitor_advice_failures_total",
        "Farm advisor calls that failed"
    ))
    .unwrap();
    pub static ref STALE_RESPONSES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "monitor_stale_responses_total",
        "Dashboard responses discarded because a newer request was issued"
    ))
    .unwrap();
}

pub fn init_metrics() -> prometheus::Result<()> {
    REGISTRY.register(Box::new(MESSAGES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RULE_SKIPPED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(INVALID_MESSAGES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECORDS_ROUTED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECORDS_DROPPED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(DB_FAILURES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RETENTION_DELETED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(INGEST_LATENCY_SECONDS.clone()))?;
    REGISTRY.register(Box::new(BATCH_SIZE.clone()))?;
    REGISTRY.register(Box::new(CHANNEL_FULL_TOTAL.clone()))?;
    REGISTRY.register(Box::new(QUERIES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(QUERY_FAILURES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(ADVICE_REQUESTS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(ADVICE_FAILURES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(STALE_RESPONSES_TOTAL.clone()))?;
    Ok(())
}

pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
