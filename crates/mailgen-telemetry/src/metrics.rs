//! In-process metrics for admission decisions, generation latency and send
//! outcomes. Exposed as a JSON snapshot by the server's `/metrics` route.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    Counter,
    Gauge,
    Histogram,
}

/// Point-in-time value of one metric series.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MetricSample {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub metric_type: MetricType,
    pub value: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<HistogramSummary>,
}

/// `sum` and the percentiles cover the retained reservoir; `count` is the
/// lifetime total.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct HistogramSummary {
    pub count: u64,
    pub sum: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
}

const RESERVOIR_SIZE: usize = 1024;

/// Ring buffer of the most recent observations.
struct Reservoir {
    seen: u64,
    values: Vec<f64>,
}

impl Reservoir {
    fn push(&mut self, value: f64) {
        let slot = (self.seen % RESERVOIR_SIZE as u64) as usize;
        if self.values.len() < RESERVOIR_SIZE {
            self.values.push(value);
        } else {
            self.values[slot] = value;
        }
        self.seen += 1;
    }

    fn summarize(&self) -> HistogramSummary {
        if self.values.is_empty() {
            return HistogramSummary::default();
        }
        let mut sorted = self.values.clone();
        sorted.sort_by(f64::total_cmp);
        let rank = |q: f64| sorted[((sorted.len() as f64 * q) as usize).min(sorted.len() - 1)];
        HistogramSummary {
            count: self.seen,
            sum: sorted.iter().sum(),
            p50: rank(0.50),
            p95: rank(0.95),
            p99: rank(0.99),
        }
    }
}

enum Series {
    Counter(AtomicU64),
    /// f64 bits.
    Gauge(AtomicU64),
    Histogram(Mutex<Reservoir>),
}

impl Series {
    fn for_type(kind: MetricType) -> Self {
        match kind {
            MetricType::Counter => Series::Counter(AtomicU64::new(0)),
            MetricType::Gauge => Series::Gauge(AtomicU64::new(0f64.to_bits())),
            MetricType::Histogram => Series::Histogram(Mutex::new(Reservoir {
                seen: 0,
                values: Vec::new(),
            })),
        }
    }

    fn kind(&self) -> MetricType {
        match self {
            Series::Counter(_) => MetricType::Counter,
            Series::Gauge(_) => MetricType::Gauge,
            Series::Histogram(_) => MetricType::Histogram,
        }
    }
}

/// Series identity: metric name, kind, and labels sorted by key.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
struct SeriesKey {
    name: String,
    kind: MetricType,
    labels: Vec<(String, String)>,
}

impl SeriesKey {
    fn new(name: &str, kind: MetricType, labels: &[(&str, &str)]) -> Self {
        let mut labels: Vec<(String, String)> = labels
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        labels.sort();
        Self {
            name: name.to_owned(),
            kind,
            labels,
        }
    }
}

/// Thread-safe metrics registry. Series are created on first write.
#[derive(Default)]
pub struct MetricsRecorder {
    series: RwLock<HashMap<SeriesKey, Series>>,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `f` on the series, creating it under the write lock if missing.
    fn update(&self, key: SeriesKey, f: impl FnOnce(&Series)) {
        if let Some(series) = self.series.read().get(&key) {
            f(series);
            return;
        }
        let kind = key.kind;
        let mut map = self.series.write();
        f(map.entry(key).or_insert_with(|| Series::for_type(kind)));
    }

    fn read<T>(&self, key: &SeriesKey, f: impl FnOnce(&Series) -> T) -> Option<T> {
        self.series.read().get(key).map(f)
    }

    pub fn counter_inc(&self, name: &str, labels: &[(&str, &str)], n: u64) {
        self.update(SeriesKey::new(name, MetricType::Counter, labels), |s| {
            if let Series::Counter(v) = s {
                v.fetch_add(n, Ordering::Relaxed);
            }
        });
    }

    pub fn gauge_set(&self, name: &str, labels: &[(&str, &str)], value: f64) {
        self.update(SeriesKey::new(name, MetricType::Gauge, labels), |s| {
            if let Series::Gauge(v) = s {
                v.store(value.to_bits(), Ordering::Relaxed);
            }
        });
    }

    pub fn histogram_observe(&self, name: &str, labels: &[(&str, &str)], value: f64) {
        self.update(SeriesKey::new(name, MetricType::Histogram, labels), |s| {
            if let Series::Histogram(r) = s {
                r.lock().push(value);
            }
        });
    }

    pub fn counter_get(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        self.read(&SeriesKey::new(name, MetricType::Counter, labels), |s| match s {
            Series::Counter(v) => v.load(Ordering::Relaxed),
            _ => 0,
        })
        .unwrap_or(0)
    }

    pub fn gauge_get(&self, name: &str, labels: &[(&str, &str)]) -> f64 {
        self.read(&SeriesKey::new(name, MetricType::Gauge, labels), |s| match s {
            Series::Gauge(v) => f64::from_bits(v.load(Ordering::Relaxed)),
            _ => 0.0,
        })
        .unwrap_or(0.0)
    }

    pub fn histogram_summary(&self, name: &str, labels: &[(&str, &str)]) -> HistogramSummary {
        self.read(&SeriesKey::new(name, MetricType::Histogram, labels), |s| match s {
            Series::Histogram(r) => r.lock().summarize(),
            _ => HistogramSummary::default(),
        })
        .unwrap_or_default()
    }

    /// Every series, ordered by name then labels. Histograms report p50 as
    /// their headline value.
    pub fn snapshot(&self) -> Vec<MetricSample> {
        let map = self.series.read();
        let mut samples: Vec<MetricSample> = map
            .iter()
            .map(|(key, series)| {
                let (value, summary) = match series {
                    Series::Counter(v) => (v.load(Ordering::Relaxed) as f64, None),
                    Series::Gauge(v) => (f64::from_bits(v.load(Ordering::Relaxed)), None),
                    Series::Histogram(r) => {
                        let summary = r.lock().summarize();
                        (summary.p50, Some(summary))
                    }
                };
                MetricSample {
                    name: key.name.clone(),
                    labels: key.labels.iter().cloned().collect(),
                    metric_type: series.kind(),
                    value,
                    summary,
                }
            })
            .collect();
        samples.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.labels.cmp(&b.labels)));
        samples
    }
}
