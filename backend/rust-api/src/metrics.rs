use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, register_int_gauge,
    Encoder, HistogramVec, IntCounter, IntCounterVec, IntGauge, TextEncoder,
};

lazy_static! {
    // HTTP Metrics
    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "http_requests_total",
        "Total number of HTTP requests",
        &["method", "path", "status"]
    )
    .unwrap();

    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "http_request_duration_seconds",
        "HTTP request duration in seconds",
        &["method", "path"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    )
    .unwrap();

    // Database Metrics (MongoDB)
    pub static ref DB_OPERATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "db_operations_total",
        "Total number of database operations",
        &["operation", "collection", "status"]
    )
    .unwrap();

    pub static ref DB_OPERATION_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "db_operation_duration_seconds",
        "Database operation duration in seconds",
        &["operation", "collection"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .unwrap();

    // Cache Metrics (Redis)
    pub static ref CACHE_OPERATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "cache_operations_total",
        "Total number of cache operations",
        &["operation", "status"]
    )
    .unwrap();

    pub static ref CACHE_OPERATION_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "cache_operation_duration_seconds",
        "Cache operation duration in seconds",
        &["operation"],
        vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1]
    )
    .unwrap();

    // Attempt Metrics
    pub static ref ATTEMPTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "attempts_total",
        "Attempt lifecycle outcomes",
        &["outcome"]
    )
    .unwrap();

    pub static ref START_CONFLICTS_TOTAL: IntCounter = register_int_counter!(
        "attempt_start_conflicts_total",
        "Concurrent starts that lost the insert race and resumed the winner"
    )
    .unwrap();

    pub static ref ANSWERS_SUBMITTED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "answers_submitted_total",
        "Total number of answers submitted",
        &["correct"]
    )
    .unwrap();

    // Quota Metrics
    pub static ref QUOTA_DECISIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "quota_decisions_total",
        "Quota consume decisions",
        &["resource", "decision"]
    )
    .unwrap();

    // Progress Metrics
    pub static ref XP_AWARDED_TOTAL: IntCounter = register_int_counter!(
        "xp_awarded_total",
        "Total XP credited to users"
    )
    .unwrap();

    // Gateway Metrics
    pub static ref ROOM_EVENTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "room_events_total",
        "Room events handled by the gateway",
        &["kind", "result"]
    )
    .unwrap();

    pub static ref ROOMS_ACTIVE: IntGauge = register_int_gauge!(
        "rooms_active",
        "Rooms with a live worker task"
    )
    .unwrap();

    pub static ref SWEEP_WORKER_TICKS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "sweep_worker_ticks_total",
        "Total number of idle sweep ticks",
        &["status"]
    )
    .unwrap();
}

/// Renders all metrics in Prometheus text format
pub fn render_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer)
        .map_err(|e| prometheus::Error::Msg(format!("Failed to convert metrics to UTF-8: {}", e)))
}

/// Helper: track database operation with metrics
pub async fn track_db_operation<F, T, E>(
    operation: &str,
    collection: &str,
    future: F,
) -> Result<T, E>
where
    F: std::future::Future<Output = Result<T, E>>,
{
    let start = std::time::Instant::now();
    let result = future.await;
    let duration = start.elapsed().as_secs_f64();

    let status = if result.is_ok() { "success" } else { "error" };

    DB_OPERATIONS_TOTAL
        .with_label_values(&[operation, collection, status])
        .inc();

    DB_OPERATION_DURATION_SECONDS
        .with_label_values(&[operation, collection])
        .observe(duration);

    result
}

/// Helper: track cache operation with metrics
pub async fn track_cache_operation<F, T, E>(operation: &str, future: F) -> Result<T, E>
where
    F: std::future::Future<Output = Result<T, E>>,
{
    let start = std::time::Instant::now();
    let result = future.await;
    let duration = start.elapsed().as_secs_f64();

    let status = if result.is_ok() { "success" } else { "error" };

    CACHE_OPERATIONS_TOTAL
        .with_label_values(&[operation, status])
        .inc();

    CACHE_OPERATION_DURATION_SECONDS
        .with_label_values(&[operation])
        .observe(duration);

    result
}

pub fn record_quota_decision(resource: &str, decision: &str) {
    QUOTA_DECISIONS_TOTAL
        .with_label_values(&[resource, decision])
        .inc();
}

pub fn record_room_event(kind: &str, result: &str) {
    ROOM_EVENTS_TOTAL.with_label_values(&[kind, result]).inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_registration() {
        let _ = HTTP_REQUESTS_TOTAL
            .with_label_values(&["GET", "/health", "200"])
            .get();
        let _ = ATTEMPTS_TOTAL.with_label_values(&["created"]).get();
    }

    #[test]
    fn test_render_metrics() {
        record_quota_decision("quiz-attempt", "granted");

        let output = render_metrics().unwrap();
        assert!(output.contains("quota_decisions_total"));
    }

    #[tokio::test]
    async fn tracked_operation_passes_result_through() {
        let ok: Result<u32, String> = track_db_operation("find", "test", async { Ok(7) }).await;
        assert_eq!(ok, Ok(7));
        let err: Result<u32, String> =
            track_cache_operation("get", async { Err("down".to_string()) }).await;
        assert!(err.is_err());
    }
}
