use lazy_static::lazy_static;
use prometheus::{
    Counter, Gauge, Histogram, IntCounterVec, register_counter, register_gauge,
    register_histogram, register_int_counter_vec,
};

lazy_static! {
    pub static ref REQUEST_TOTAL: Counter =
        register_counter!("bio_requests_total", "Total number of bio generation requests")
            .expect("register bio_requests_total");
    pub static ref RATE_LIMITED: Counter =
        register_counter!("bio_rate_limited_total", "Requests rejected by the rate gate")
            .expect("register bio_rate_limited_total");
    pub static ref UPSTREAM_ATTEMPTS: Counter =
        register_counter!("bio_upstream_attempts_total", "Outbound attempts against the upstream")
            .expect("register bio_upstream_attempts_total");
    pub static ref UPSTREAM_FAILURES: IntCounterVec = register_int_counter_vec!(
        "bio_upstream_failures_total",
        "Failed upstream attempts by kind",
        &["kind"]
    )
    .expect("register bio_upstream_failures_total");
    pub static ref REQUEST_LATENCY: Histogram = register_histogram!(
        "bio_request_latency_seconds",
        "Request latency in seconds"
    )
    .expect("register bio_request_latency_seconds");
    pub static ref RATE_TABLE_SIZE: Gauge =
        register_gauge!("bio_rate_table_size", "Caller records held by the rate gate")
            .expect("register bio_rate_table_size");
}
