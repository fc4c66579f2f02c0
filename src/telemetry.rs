use opentelemetry::{
    global,
    metrics::{Counter, Histogram, MeterProvider},
    KeyValue,
};
use prometheus::Registry;

pub struct Metrics {
    request_counter: Counter<u64>,
    classification_duration: Histogram<u64>,
    classification_failures: Counter<u64>,
    pub registry: Registry,
}

impl Metrics {
    pub fn new(timeout_ms: u64) -> Self {
        let registry = Registry::new();
        let exporter = opentelemetry_prometheus::exporter()
            .with_registry(registry.clone())
            .build()
            .unwrap();

        let provider = opentelemetry_sdk::metrics::SdkMeterProvider::builder()
            .with_reader(exporter)
            .build();

        let meter = provider.meter("breed_relay");
        global::set_meter_provider(provider);

        let request_counter = meter
            .u64_counter("requests_total")
            .with_description("Total number of requests")
            .build();

        let classification_duration = meter
            .u64_histogram("classification_duration_ms")
            .with_boundaries(duration_boundaries(timeout_ms))
            .with_description("Duration of classifier invocations in milliseconds")
            .build();

        let classification_failures = meter
            .u64_counter("classification_failures_total")
            .with_description("Failed classifications by error kind")
            .build();

        Metrics {
            request_counter,
            classification_duration,
            classification_failures,
            registry,
        }
    }

    pub fn record_request(&self, route: &str) {
        let attributes = vec![KeyValue::new("route", route.to_string())];
        self.request_counter.add(1, &attributes);
    }

    pub fn record_classification_duration(&self, duration_ms: u64) {
        self.classification_duration.record(duration_ms, &[]);
    }

    pub fn record_classification_failure(&self, kind: &'static str) {
        let attributes = vec![KeyValue::new("kind", kind)];
        self.classification_failures.add(1, &attributes);
    }
}

// Doubling buckets from 50ms up to the configured deadline, which is the
// largest duration a classification can take.
fn duration_boundaries(timeout_ms: u64) -> Vec<f64> {
    let mut boundaries = Vec::new();
    let mut current = 50u64;
    while current < timeout_ms {
        boundaries.push(current as f64);
        current *= 2;
    }
    boundaries.push(timeout_ms as f64);
    boundaries
}
