//! Activity sink: named numeric measurements with tags.
//!
//! Emission is fire-and-forget. Sinks never surface errors to callers.

use std::collections::HashMap;
use std::sync::atomic::AtomicU64;
use std::sync::{Arc, Mutex};

use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::histogram::{exponential_buckets, Histogram};
use prometheus_client::registry::Registry;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Tag {
    pub key: &'static str,
    pub value: String,
}

impl Tag {
    pub fn new(key: &'static str, value: impl ToString) -> Self {
        Self {
            key,
            value: value.to_string(),
        }
    }
}

pub trait ActivitySink: Send + Sync {
    fn emit(&self, name: &str, value: f64, tags: &[Tag]);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl ActivitySink for NoopSink {
    fn emit(&self, _name: &str, _value: f64, _tags: &[Tag]) {}
}

pub fn noop_sink() -> Arc<dyn ActivitySink> {
    Arc::new(NoopSink)
}

// ---------------------------------------------------------------------------
// Prometheus
// ---------------------------------------------------------------------------

type Labels = Vec<(String, String)>;
type HistogramFamily = Family<Labels, Histogram, fn() -> Histogram>;

fn latency_histogram() -> Histogram {
    Histogram::new(exponential_buckets(1.0, 2.0, 20))
}

enum Metric {
    Counter(Family<Labels, Counter<f64, AtomicU64>>),
    Histogram(HistogramFamily),
}

struct PrometheusInner {
    registry: Registry,
    metrics: HashMap<String, Metric>,
}

/// Sink backed by a prometheus-client registry. Metric families are
/// registered the first time a name is emitted: names ending in `_total`
/// become counters, everything else a histogram.
#[derive(Clone)]
pub struct PrometheusSink {
    inner: Arc<Mutex<PrometheusInner>>,
}

impl Default for PrometheusSink {
    fn default() -> Self {
        Self::new()
    }
}

impl PrometheusSink {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(PrometheusInner {
                registry: Registry::with_prefix("tarn"),
                metrics: HashMap::new(),
            })),
        }
    }

    /// Encode all metrics as Prometheus text format.
    pub fn encode(&self) -> String {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let mut buf = String::new();
        if let Err(e) = encode(&mut buf, &inner.registry) {
            warn!("Failed to encode metrics: {}", e);
        }
        buf
    }
}

impl ActivitySink for PrometheusSink {
    fn emit(&self, name: &str, value: f64, tags: &[Tag]) {
        let labels: Labels = tags
            .iter()
            .map(|t| (t.key.to_string(), t.value.clone()))
            .collect();
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let inner = &mut *guard;

        if !inner.metrics.contains_key(name) {
            let metric = if let Some(base) = name.strip_suffix("_total") {
                let family = Family::<Labels, Counter<f64, AtomicU64>>::default();
                inner.registry.register(base, name, family.clone());
                Metric::Counter(family)
            } else {
                let family: HistogramFamily = Family::new_with_constructor(latency_histogram);
                inner.registry.register(name, name, family.clone());
                Metric::Histogram(family)
            };
            inner.metrics.insert(name.to_string(), metric);
        }

        match inner.metrics.get(name) {
            Some(Metric::Counter(f)) => {
                f.get_or_create(&labels).inc_by(value);
            }
            Some(Metric::Histogram(f)) => f.get_or_create(&labels).observe(value),
            None => {}
        }
    }
}

// ---------------------------------------------------------------------------
// In-memory sink
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Emission {
    pub name: String,
    pub value: f64,
    pub tags: Vec<Tag>,
}

impl Emission {
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|t| t.key == key)
            .map(|t| t.value.as_str())
    }
}

/// Records every emission; handy for asserting on telemetry.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    emissions: Arc<Mutex<Vec<Emission>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emissions(&self) -> Vec<Emission> {
        self.emissions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn named(&self, name: &str) -> Vec<Emission> {
        self.emissions()
            .into_iter()
            .filter(|e| e.name == name)
            .collect()
    }
}

impl ActivitySink for MemorySink {
    fn emit(&self, name: &str, value: f64, tags: &[Tag]) {
        self.emissions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Emission {
                name: name.to_string(),
                value,
                tags: tags.to_vec(),
            });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prometheus_sink_registers_counters_and_histograms() {
        let sink = PrometheusSink::new();
        sink.emit("olap_queries_total", 1.0, &[Tag::new("failed", false)]);
        sink.emit("olap_queries_total", 1.0, &[Tag::new("failed", false)]);
        sink.emit("ingestion_ms", 250.0, &[Tag::new("source", "s3")]);

        let text = sink.encode();
        assert!(text.contains("tarn_olap_queries_total{failed=\"false\"} 2"), "{text}");
        assert!(text.contains("tarn_ingestion_ms_count{source=\"s3\"} 1"), "{text}");
    }

    #[test]
    fn memory_sink_records_tags() {
        let sink = MemorySink::new();
        sink.emit("x", 3.0, &[Tag::new("cancelled", true)]);
        let got = sink.named("x");
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].tag("cancelled"), Some("true"));
        assert!(sink.named("y").is_empty());
    }
}
