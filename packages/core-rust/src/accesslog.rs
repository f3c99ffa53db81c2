//! Access-log contract between the worker and the supervisor's log pipeline.
//!
//! The worker reports one [`AccessRecord`] per completed request. How the
//! record is formatted and where it ends up is the sink's business; the
//! worker only guarantees the capture is real (actual status, headers, and
//! counted body bytes, not placeholders).

use std::collections::HashMap;
use std::time::Duration;

/// Everything captured about one completed request/response exchange.
#[derive(Debug, Clone)]
pub struct AccessRecord {
    /// Response status code, as a string (e.g. `"200"`).
    pub status: String,
    /// Response headers as (name, value) pairs, in wire order.
    pub headers: Vec<(String, String)>,
    /// Number of response body bytes actually sent.
    pub bytes_sent: u64,
    /// Request headers as (name, value) pairs, in wire order.
    pub request_headers: Vec<(String, String)>,
    /// Request environment: method, path, query string, protocol version.
    pub environ: HashMap<String, String>,
    /// Elapsed time from request receipt to the end of the response body.
    pub response_time: Duration,
}

/// Sink for completed-request records.
///
/// Infallible by contract: a sink must not let its own failures abort an
/// in-flight response, so it handles (or drops) its own errors internally.
pub trait AccessLog: Send + Sync {
    /// Records one completed request.
    fn access(&self, record: &AccessRecord);
}

/// Access-log sink that emits one structured `tracing` event per request.
///
/// Header lists are rendered as JSON arrays so downstream collectors can
/// parse them without a custom format.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAccessLog;

impl AccessLog for TracingAccessLog {
    fn access(&self, record: &AccessRecord) {
        let headers = serde_json::to_string(&record.headers).unwrap_or_default();
        let request_headers =
            serde_json::to_string(&record.request_headers).unwrap_or_default();

        tracing::info!(
            target: "drover::access",
            status = %record.status,
            bytes_sent = record.bytes_sent,
            method = record.environ.get("method").map_or("-", String::as_str),
            path = record.environ.get("path").map_or("-", String::as_str),
            query = record.environ.get("query").map_or("", String::as_str),
            protocol = record.environ.get("protocol").map_or("-", String::as_str),
            response_time_us = u64::try_from(record.response_time.as_micros()).unwrap_or(u64::MAX),
            headers = %headers,
            request_headers = %request_headers,
            "request complete"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Sink that collects records for assertions.
    #[derive(Default)]
    struct CollectingLog {
        records: Mutex<Vec<AccessRecord>>,
    }

    impl AccessLog for CollectingLog {
        fn access(&self, record: &AccessRecord) {
            self.records.lock().unwrap().push(record.clone());
        }
    }

    fn sample_record() -> AccessRecord {
        AccessRecord {
            status: "200".to_string(),
            headers: vec![("content-type".to_string(), "text/plain".to_string())],
            bytes_sent: 11,
            request_headers: vec![("host".to_string(), "localhost".to_string())],
            environ: HashMap::from([
                ("method".to_string(), "GET".to_string()),
                ("path".to_string(), "/".to_string()),
            ]),
            response_time: Duration::from_millis(3),
        }
    }

    #[test]
    fn sink_receives_record_through_trait_object() {
        let sink = CollectingLog::default();
        let as_dyn: &dyn AccessLog = &sink;

        as_dyn.access(&sample_record());

        let records = sink.records.lock().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, "200");
        assert_eq!(records[0].bytes_sent, 11);
    }

    #[test]
    fn tracing_sink_does_not_panic() {
        // No subscriber installed -- the event is discarded, which is fine.
        TracingAccessLog.access(&sample_record());
    }
}
