//! Store metrics collection.
//!
//! Provides standardized metrics for monitoring store operations:
//! - Request counters by operation and status
//! - Latency histograms

use metrics::{counter, histogram};

/// Metric name constants for consistency.
pub mod names {
    /// Total store requests by operation and status.
    pub const REQUESTS_TOTAL: &str = "store_requests_total";

    /// Request latency in seconds by operation.
    pub const LATENCY_SECONDS: &str = "store_latency_seconds";

    /// Saves that matched an existing rally by start frame.
    pub const DUPLICATE_RALLIES_TOTAL: &str = "store_duplicate_rallies_total";
}

/// Record metrics for a completed store request.
pub fn record_request(operation: &'static str, success: bool, latency_ms: f64) {
    let status = if success { "ok" } else { "error" };

    counter!(
        names::REQUESTS_TOTAL,
        "operation" => operation,
        "status" => status
    )
    .increment(1);

    histogram!(
        names::LATENCY_SECONDS,
        "operation" => operation
    )
    .record(latency_ms / 1000.0);
}

/// Record a save that resolved to an already stored rally.
pub fn record_duplicate_rally() {
    counter!(names::DUPLICATE_RALLIES_TOTAL).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_names() {
        assert!(names::REQUESTS_TOTAL.contains("requests"));
        assert!(names::LATENCY_SECONDS.contains("latency"));
        assert!(names::DUPLICATE_RALLIES_TOTAL.contains("duplicate"));
    }

    #[test]
    fn test_recording_without_recorder_is_noop() {
        record_request("save_rally", true, 12.0);
        record_duplicate_rally();
    }
}
