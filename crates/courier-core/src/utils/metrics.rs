//! Metrics collection for observability
//!
//! Lightweight in-process counters and histograms with optional
//! labels, exportable in Prometheus text format.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Instant;

/// Outbound sends, labeled by `channel` and `status`
pub const CHANNEL_SEND_TOTAL: &str = "courier_channel_send_total";
/// Outbound send latency in milliseconds, labeled by `channel`
pub const CHANNEL_SEND_LATENCY_MS: &str = "courier_channel_send_latency_ms";
/// Ingested inbound messages, labeled by `channel`
pub const INGEST_TOTAL: &str = "courier_ingest_total";
/// Duplicate inbound messages dropped, labeled by `channel`
pub const INGEST_DUPLICATES_TOTAL: &str = "courier_ingest_duplicates_total";

/// A thread-safe counter metric
#[derive(Debug, Default, Clone)]
pub struct Counter {
    value: Arc<AtomicU64>,
}

impl Counter {
    /// Increment the counter by 1
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Get the current value
    #[must_use]
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone)]
struct HistogramBucket {
    bound: f64,
    count: Arc<AtomicU64>,
}

/// A histogram for tracking distributions
#[derive(Debug, Clone)]
pub struct Histogram {
    buckets: Vec<HistogramBucket>,
    /// Sum in thousandths
    sum: Arc<AtomicU64>,
    count: Arc<AtomicU64>,
}

impl Histogram {
    /// Create a histogram with default buckets suitable for latency (in ms)
    #[must_use]
    pub fn new() -> Self {
        Self::with_buckets(vec![
            5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0,
        ])
    }

    /// Create a histogram with custom buckets
    #[must_use]
    pub fn with_buckets(bucket_bounds: Vec<f64>) -> Self {
        let buckets = bucket_bounds
            .into_iter()
            .map(|bound| HistogramBucket {
                bound,
                count: Arc::new(AtomicU64::new(0)),
            })
            .collect();

        Self {
            buckets,
            sum: Arc::new(AtomicU64::new(0)),
            count: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Observe a value
    pub fn observe(&self, value: f64) {
        let value_bits = (value.max(0.0) * 1000.0) as u64;
        self.sum.fetch_add(value_bits, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);

        for bucket in &self.buckets {
            if value <= bucket.bound {
                bucket.count.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Get the count of observations
    #[must_use]
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Get the sum of all observations
    #[must_use]
    pub fn sum(&self) -> f64 {
        self.sum.load(Ordering::Relaxed) as f64 / 1000.0
    }

    /// Cumulative bucket counts
    #[must_use]
    pub fn buckets(&self) -> Vec<(f64, u64)> {
        self.buckets
            .iter()
            .map(|b| (b.bound, b.count.load(Ordering::Relaxed)))
            .collect()
    }
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}

/// Timer for measuring durations
pub struct Timer {
    start: Instant,
}

impl Timer {
    /// Start a new timer
    #[must_use]
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get elapsed time in milliseconds
    #[must_use]
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }

}

/// Series key: metric name plus sorted label pairs
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct SeriesKey {
    name: String,
    labels: Vec<(String, String)>,
}

impl SeriesKey {
    fn new(name: &str, labels: &[(&str, &str)]) -> Self {
        let mut labels: Vec<(String, String)> = labels
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        labels.sort();
        Self {
            name: name.to_string(),
            labels,
        }
    }

    fn label_block(&self, extra: Option<(&str, &str)>) -> String {
        let mut parts: Vec<String> = self
            .labels
            .iter()
            .map(|(k, v)| format!("{k}=\"{}\"", v.replace('"', "\\\"")))
            .collect();
        if let Some((k, v)) = extra {
            parts.push(format!("{k}=\"{v}\""));
        }
        if parts.is_empty() {
            String::new()
        } else {
            format!("{{{}}}", parts.join(","))
        }
    }
}

fn get_or_create<M: Clone + Default>(
    map: &RwLock<BTreeMap<SeriesKey, M>>,
    key: SeriesKey,
) -> M {
    {
        let read = map.read().unwrap_or_else(|e| e.into_inner());
        if let Some(metric) = read.get(&key) {
            return metric.clone();
        }
    }
    let mut write = map.write().unwrap_or_else(|e| e.into_inner());
    write.entry(key).or_default().clone()
}

/// Metrics registry for managing multiple metrics
#[derive(Default, Clone)]
pub struct MetricsRegistry {
    counters: Arc<RwLock<BTreeMap<SeriesKey, Counter>>>,
    histograms: Arc<RwLock<BTreeMap<SeriesKey, Histogram>>>,
}

impl MetricsRegistry {
    /// Create a new metrics registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create a labeled counter
    pub fn counter_with_labels(&self, name: &str, labels: &[(&str, &str)]) -> Counter {
        get_or_create(&self.counters, SeriesKey::new(name, labels))
    }

    /// Get or create a labeled histogram
    pub fn histogram_with_labels(&self, name: &str, labels: &[(&str, &str)]) -> Histogram {
        get_or_create(&self.histograms, SeriesKey::new(name, labels))
    }

    /// Export metrics in Prometheus format
    #[must_use]
    pub fn export_prometheus(&self) -> String {
        let mut output = String::new();
        let mut typed = BTreeSet::new();

        let counters = self.counters.read().unwrap_or_else(|e| e.into_inner());
        for (key, counter) in counters.iter() {
            if typed.insert(key.name.clone()) {
                output.push_str(&format!("# TYPE {} counter\n", key.name));
            }
            output.push_str(&format!(
                "{}{} {}\n",
                key.name,
                key.label_block(None),
                counter.get()
            ));
        }

        let histograms = self.histograms.read().unwrap_or_else(|e| e.into_inner());
        for (key, histogram) in histograms.iter() {
            if typed.insert(key.name.clone()) {
                output.push_str(&format!("# TYPE {} histogram\n", key.name));
            }
            for (bound, count) in histogram.buckets() {
                let le = bound.to_string();
                output.push_str(&format!(
                    "{}_bucket{} {}\n",
                    key.name,
                    key.label_block(Some(("le", &le))),
                    count
                ));
            }
            output.push_str(&format!(
                "{}_bucket{} {}\n",
                key.name,
                key.label_block(Some(("le", "+Inf"))),
                histogram.count()
            ));
            output.push_str(&format!(
                "{}_sum{} {}\n",
                key.name,
                key.label_block(None),
                histogram.sum()
            ));
            output.push_str(&format!(
                "{}_count{} {}\n",
                key.name,
                key.label_block(None),
                histogram.count()
            ));
        }

        output
    }
}

/// Global metrics for the application
pub mod global {
    use super::*;
    use std::sync::OnceLock;

    static REGISTRY: OnceLock<MetricsRegistry> = OnceLock::new();

    /// Get the global metrics registry
    pub fn registry() -> &'static MetricsRegistry {
        REGISTRY.get_or_init(MetricsRegistry::new)
    }

    /// Convenience function to get a labeled counter
    pub fn counter_with_labels(name: &str, labels: &[(&str, &str)]) -> Counter {
        registry().counter_with_labels(name, labels)
    }

    /// Convenience function to get a labeled histogram
    pub fn histogram_with_labels(name: &str, labels: &[(&str, &str)]) -> Histogram {
        registry().histogram_with_labels(name, labels)
    }

    /// Export all metrics in Prometheus format
    pub fn export_prometheus() -> String {
        registry().export_prometheus()
    }
}
