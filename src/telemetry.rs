use opentelemetry::{
    global,
    metrics::{Counter, Gauge, Histogram, MeterProvider},
    KeyValue,
};
use opentelemetry_sdk::metrics::SdkMeterProvider;
use prometheus::Registry;
use std::collections::HashSet;

pub struct Metrics {
    detect_requests: Counter<u64>,
    inference_duration: Histogram<u64>,
    model_loaded: Gauge<u64>,
    // Keeps the reader alive when another provider replaces the global one.
    _provider: SdkMeterProvider,
    pub registry: Registry,
}

impl Metrics {
    pub fn new() -> Result<Self, Box<dyn std::error::Error>> {
        let registry = Registry::new();
        let exporter = opentelemetry_prometheus::exporter()
            .with_registry(registry.clone())
            .build()?;

        let provider = SdkMeterProvider::builder()
            .with_reader(exporter)
            .build();

        let meter = provider.meter("yolo_detection");
        global::set_meter_provider(provider.clone());

        let detect_requests = meter
            .u64_counter("detect_requests_total")
            .with_description("Detect requests by outcome")
            .build();

        let boundaries = generate_boundaries((10, 50, 100, 500, 2000));

        let inference_duration = meter
            .u64_histogram("inference_duration_ms")
            .with_boundaries(boundaries)
            .with_description("Duration of decode and inference in milliseconds")
            .build();

        let model_loaded = meter
            .u64_gauge("model_loaded")
            .with_description("1 once the detection model is loaded")
            .build();

        Ok(Metrics {
            detect_requests,
            inference_duration,
            model_loaded,
            _provider: provider,
            registry,
        })
    }

    pub fn record_detect(&self, outcome: &str) {
        let attributes = vec![KeyValue::new("outcome", outcome.to_string())];
        self.detect_requests.add(1, &attributes);
    }

    pub fn record_inference_duration(&self, duration_ms: u64) {
        self.inference_duration.record(duration_ms, &[]);
    }

    pub fn record_model_loaded(&self, loaded: bool) {
        self.model_loaded.record(loaded as u64, &[]);
    }
}

fn generate_boundaries(parts: (i32, i32, i32, i32, i32)) -> Vec<f64> {
    let first_step: usize = 10;
    let middle_step: usize = 25;
    let end_step: usize = 100;
    let tail_step: usize = 500;
    let first_part = (parts.0..=parts.1).step_by(first_step);
    let middle_part = (parts.1..=parts.2).step_by(middle_step);
    let end_part = (parts.2..=parts.3).step_by(end_step);
    let tail_part = (parts.3..=parts.4).step_by(tail_step);

    let mut seen = HashSet::new();
    first_part
        .chain(middle_part)
        .chain(end_part)
        .chain(tail_part)
        .filter(|&x| seen.insert(x))
        .map(|x| x as f64)
        .collect()
}
