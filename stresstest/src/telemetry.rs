//! Telemetry events emitted by the poller, and sinks that consume them.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Mutex;
use std::time::Duration;

use bytesize::ByteSize;
use sketches_ddsketch::DDSketch;
use yansi::Paint;

/// The checkpoint of a poll cycle an event was emitted at.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RequestType {
    /// Acceptance of the submission, on the first continuation.
    Post,
    /// A continuation fetch, excluding the first one.
    Get,
    /// The end of the poll cycle.
    Complete,
}

impl fmt::Display for RequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RequestType::Post => "Post Request",
            RequestType::Get => "Get Request",
            RequestType::Complete => "Complete Request",
        };
        f.write_str(name)
    }
}

/// A single success or failure record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TelemetryEvent {
    pub request_type: RequestType,
    pub label: String,
    pub elapsed_millis: u64,
    pub response_size_bytes: u64,
    /// The rendered error for failures, `None` for successes.
    pub error: Option<String>,
}

impl TelemetryEvent {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Receives the events of any number of concurrently running poll cycles.
pub trait TelemetrySink: Send + Sync {
    /// Records a successful checkpoint.
    fn on_success(
        &self,
        request_type: RequestType,
        label: &str,
        elapsed_millis: u64,
        response_size_bytes: u64,
    );

    /// Records a failed checkpoint.
    fn on_failure(
        &self,
        request_type: RequestType,
        label: &str,
        elapsed_millis: u64,
        response_size_bytes: u64,
        error: &(dyn std::error::Error + 'static),
    );
}

/// A sink that keeps every event in emission order.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<TelemetryEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of all events recorded so far.
    pub fn events(&self) -> Vec<TelemetryEvent> {
        self.lock().clone()
    }

    /// Removes and returns all events recorded so far.
    pub fn take(&self) -> Vec<TelemetryEvent> {
        std::mem::take(&mut *self.lock())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<TelemetryEvent>> {
        self.events.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl TelemetrySink for RecordingSink {
    fn on_success(
        &self,
        request_type: RequestType,
        label: &str,
        elapsed_millis: u64,
        response_size_bytes: u64,
    ) {
        self.lock().push(TelemetryEvent {
            request_type,
            label: label.to_owned(),
            elapsed_millis,
            response_size_bytes,
            error: None,
        });
    }

    fn on_failure(
        &self,
        request_type: RequestType,
        label: &str,
        elapsed_millis: u64,
        response_size_bytes: u64,
        error: &(dyn std::error::Error + 'static),
    ) {
        self.lock().push(TelemetryEvent {
            request_type,
            label: label.to_owned(),
            elapsed_millis,
            response_size_bytes,
            error: Some(error.to_string()),
        });
    }
}

/// Aggregated metrics of one request type and label.
#[derive(Default)]
pub struct RequestMetrics {
    /// Latencies of successful requests, in seconds.
    pub timing: DDSketch,
    /// Total response bytes of successful requests.
    pub bytes: u64,
    /// Number of failed requests.
    pub failures: u64,
}

impl fmt::Debug for RequestMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestMetrics")
            .field("successes", &self.timing.count())
            .field("bytes", &self.bytes)
            .field("failures", &self.failures)
            .finish()
    }
}

impl RequestMetrics {
    pub fn successes(&self) -> usize {
        self.timing.count()
    }
}

/// Metrics are keyed by request type first, so the report groups by checkpoint.
pub type MetricsKey = (RequestType, String);

/// A sink aggregating latency sketches and failure counts per request type and label.
#[derive(Debug, Default)]
pub struct MetricsSink {
    metrics: Mutex<BTreeMap<MetricsKey, RequestMetrics>>,
}

impl MetricsSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes the aggregated metrics out of the sink, leaving it empty.
    pub fn take(&self) -> BTreeMap<MetricsKey, RequestMetrics> {
        std::mem::take(&mut *self.lock())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<MetricsKey, RequestMetrics>> {
        self.metrics
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn with_entry(
        &self,
        request_type: RequestType,
        label: &str,
        f: impl FnOnce(&mut RequestMetrics),
    ) {
        let mut metrics = self.lock();
        f(metrics.entry((request_type, label.to_owned())).or_default());
    }
}

impl TelemetrySink for MetricsSink {
    fn on_success(
        &self,
        request_type: RequestType,
        label: &str,
        elapsed_millis: u64,
        response_size_bytes: u64,
    ) {
        self.with_entry(request_type, label, |metrics| {
            metrics.timing.add(elapsed_millis as f64 / 1000.0);
            metrics.bytes += response_size_bytes;
        });
    }

    fn on_failure(
        &self,
        request_type: RequestType,
        label: &str,
        _elapsed_millis: u64,
        _response_size_bytes: u64,
        _error: &(dyn std::error::Error + 'static),
    ) {
        self.with_entry(request_type, label, |metrics| metrics.failures += 1);
    }
}

/// Prints the aggregated metrics of a run that lasted `duration`.
pub fn print_report(metrics: &BTreeMap<MetricsKey, RequestMetrics>, duration: Duration) {
    let mut total_failures = 0;

    for ((request_type, label), metrics) in metrics {
        println!();
        print!(
            "{} {} ({} ops",
            format!("{request_type}:").bold().green(),
            label.bold().blue(),
            metrics.successes().bold()
        );
        if metrics.failures > 0 {
            print!(
                ", {}",
                format!("{} FAILURES", metrics.failures).bold().red()
            );
        }
        println!(")");
        total_failures += metrics.failures;

        if metrics.successes() == 0 {
            continue;
        }
        print_ops(&metrics.timing, duration);
        if metrics.bytes > 0 {
            print_throughput(metrics.bytes, duration);
        } else {
            println!();
        }
        print_percentiles(&metrics.timing, Duration::from_secs_f64);
    }

    println!();
    if total_failures > 0 {
        println!(
            "{}",
            format!("{total_failures} FAILURES IN TOTAL").bold().red()
        );
    } else {
        println!("{}", "NO FAILURES".bold().green());
    }
}

fn print_percentiles<T: fmt::Debug>(sketch: &DDSketch, map: impl Fn(f64) -> T) {
    let ops = sketch.count();
    let avg = map(sketch.sum().unwrap_or_default() / ops as f64);
    let p50 = map(quantile(sketch, 0.5));
    let p90 = map(quantile(sketch, 0.9));
    let p99 = map(quantile(sketch, 0.99));
    println!(
        "  avg: {:.2?}; p50: {p50:.2?}; p90: {p90:.2?}; p99: {p99:.2?}",
        avg.bold()
    );
}

fn quantile(sketch: &DDSketch, q: f64) -> f64 {
    sketch.quantile(q).ok().flatten().unwrap_or_default()
}

fn print_ops(sketch: &DDSketch, duration: Duration) {
    let ops = sketch.count();
    let ops_ps = ops as f64 / duration.as_secs_f64();
    print!("  {:.2} operations/s", ops_ps.bold());
}

fn print_throughput(total: u64, duration: Duration) {
    let throughput = (total as f64 / duration.as_secs_f64()) as u64;
    println!(", {:.2}/s", ByteSize::b(throughput).bold());
}

#[cfg(test)]
mod tests {
    use crate::error::PollError;

    use super::*;

    #[test]
    fn request_type_names() {
        assert_eq!(RequestType::Post.to_string(), "Post Request");
        assert_eq!(RequestType::Get.to_string(), "Get Request");
        assert_eq!(RequestType::Complete.to_string(), "Complete Request");
    }

    #[test]
    fn recording_sink_keeps_order() {
        let sink = RecordingSink::new();
        let error = PollError::Transport { status: 503 };

        sink.on_success(RequestType::Post, "Long", 12, 0);
        sink.on_success(RequestType::Get, "Long", 5, 128);
        sink.on_failure(RequestType::Complete, "Long", 40, 0, &error);

        let events = sink.take();
        let types: Vec<_> = events.iter().map(|e| e.request_type).collect();
        assert_eq!(
            types,
            [RequestType::Post, RequestType::Get, RequestType::Complete]
        );
        assert_eq!(events[1].response_size_bytes, 128);
        assert!(events[1].is_success());
        assert_eq!(
            events[2].error.as_deref(),
            Some("non 200 response: 503 received")
        );
        assert!(sink.events().is_empty());
    }

    #[test]
    fn metrics_sink_aggregates_per_type_and_label() {
        let sink = MetricsSink::new();
        let error = PollError::MalformedResponse("nope".into());

        sink.on_success(RequestType::Get, "Long", 100, 1000);
        sink.on_success(RequestType::Get, "Long", 300, 500);
        sink.on_success(RequestType::Get, "Short", 10, 10);
        sink.on_failure(RequestType::Complete, "Long", 400, 0, &error);

        let metrics = sink.take();
        assert_eq!(metrics.len(), 3);

        let long_gets = &metrics[&(RequestType::Get, "Long".to_owned())];
        assert_eq!(long_gets.successes(), 2);
        assert_eq!(long_gets.bytes, 1500);
        assert_eq!(long_gets.failures, 0);
        let sum = long_gets.timing.sum().unwrap();
        assert!((sum - 0.4).abs() < 1e-9);

        let long_completes = &metrics[&(RequestType::Complete, "Long".to_owned())];
        assert_eq!(long_completes.successes(), 0);
        assert_eq!(long_completes.failures, 1);

        print_report(&metrics, Duration::from_secs(1));
        assert!(sink.take().is_empty());
    }
}
