use std::time::{Duration, Instant};

use anyhow::Result;
use opentelemetry::{metrics::Histogram, KeyValue};
use opentelemetry_otlp::{MetricExporter, WithExportConfig};
use opentelemetry_sdk::{
    metrics::{PeriodicReader, SdkMeterProvider},
    Resource,
};
use tracing::info;

pub const METER_NAME: &str = "gallery-server";

/// Install a global OTLP meter provider. Without one every instrument below
/// records into the no-op meter.
pub fn init_provider(
    enable_metrics: bool,
    endpoint: Option<&String>,
    interval: Duration,
) -> Result<Option<SdkMeterProvider>> {
    if !enable_metrics {
        return Ok(None);
    }

    let resource = Resource::builder()
        .with_service_name(METER_NAME)
        .with_attribute(KeyValue::new(
            "service.version",
            env!("CARGO_PKG_VERSION").to_string(),
        ))
        .build();

    let mut exporter = MetricExporter::builder().with_tonic();
    if let Some(endpoint) = endpoint {
        exporter = exporter.with_endpoint(endpoint.to_owned());
    }
    let exporter = exporter.build()?;

    let reader = PeriodicReader::builder(exporter)
        .with_interval(interval)
        .build();

    let provider = SdkMeterProvider::builder()
        .with_resource(resource)
        .with_reader(reader)
        .build();

    opentelemetry::global::set_meter_provider(provider.clone());
    info!(interval_secs = interval.as_secs(), "exporting metrics over OTLP");
    Ok(Some(provider))
}

/// Records the elapsed time into a histogram when dropped.
pub struct Timer {
    start: Instant,
    histogram: Histogram<f64>,
    labels: Vec<KeyValue>,
}

impl Timer {
    pub fn start_with_labels(histogram: &Histogram<f64>, labels: &[KeyValue]) -> Self {
        Self {
            start: Instant::now(),
            histogram: histogram.clone(),
            labels: labels.to_vec(),
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        let duration = self.start.elapsed().as_secs_f64();
        self.histogram.record(duration, &self.labels);
    }
}

pub mod blob_storage {
    use opentelemetry::metrics::{Counter, Histogram};

    #[derive(Debug, Clone)]
    pub struct Metrics {
        pub operations: Histogram<f64>,
        pub errors: Counter<u64>,
    }

    impl Default for Metrics {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Metrics {
        pub fn new() -> Metrics {
            let meter = opentelemetry::global::meter(super::METER_NAME);
            let operations = meter
                .f64_histogram("gallery.blob_storage.operation_duration_seconds")
                .with_description("Duration of blob storage operations in seconds")
                .build();
            let errors = meter
                .u64_counter("gallery.blob_storage.errors")
                .with_description("number of failed blob storage operations")
                .build();
            Metrics { operations, errors }
        }
    }
}

pub mod vote_store {
    use opentelemetry::metrics::Counter;

    #[derive(Debug, Clone)]
    pub struct Metrics {
        pub uploads: Counter<u64>,
        pub upload_bytes: Counter<u64>,
        pub votes: Counter<u64>,
        pub flags: Counter<u64>,
        pub write_conflicts: Counter<u64>,
        pub corrupt_metadata: Counter<u64>,
    }

    impl Default for Metrics {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Metrics {
        pub fn new() -> Metrics {
            let meter = opentelemetry::global::meter(super::METER_NAME);
            let uploads = meter
                .u64_counter("gallery.store.uploads")
                .with_description("number of image records created")
                .build();
            let upload_bytes = meter
                .u64_counter("gallery.store.upload_bytes")
                .with_description("number of image bytes written on upload")
                .build();
            let votes = meter
                .u64_counter("gallery.store.votes")
                .with_description("number of votes applied, labelled by outcome")
                .build();
            let flags = meter
                .u64_counter("gallery.store.flags")
                .with_description("number of flag requests applied")
                .build();
            let write_conflicts = meter
                .u64_counter("gallery.store.write_conflicts")
                .with_description("conditional metadata writes rejected by the backend")
                .build();
            let corrupt_metadata = meter
                .u64_counter("gallery.store.corrupt_metadata")
                .with_description("metadata fields replaced by defaults while decoding")
                .build();
            Metrics {
                uploads,
                upload_bytes,
                votes,
                flags,
                write_conflicts,
                corrupt_metadata,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timer_keeps_its_labels() {
        let metrics = blob_storage::Metrics::new();
        let labels = [KeyValue::new("op", "get"), KeyValue::new("backend", "s3")];
        let timer = Timer::start_with_labels(&metrics.operations, &labels);
        assert_eq!(timer.labels, labels.to_vec());
        assert!(timer.start.elapsed() < Duration::from_secs(60));
    }

    #[test]
    fn test_disabled_provider_is_not_installed() {
        let provider = init_provider(false, None, Duration::from_secs(60)).unwrap();
        assert!(provider.is_none());
    }
}
