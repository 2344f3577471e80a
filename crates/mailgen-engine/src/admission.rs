//! Per-identity sliding-window admission control.
//!
//! Each identity owns the timestamps of its admitted requests that are still
//! inside the trailing window. A request is admitted when fewer than `limit`
//! such timestamps remain after pruning. The prune, count, and append steps
//! run under the map's per-key entry lock, so concurrent requests for one
//! identity can never exceed the limit.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use mailgen_telemetry::MetricsRecorder;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::clock::{Clock, SystemClock};

#[derive(Clone, Debug)]
pub struct AdmissionConfig {
    /// Requests admitted per window.
    pub limit: usize,
    pub window: Duration,
    /// Map size at which a new identity triggers an inline sweep.
    pub max_tracked_identities: usize,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            limit: 10,
            window: Duration::from_millis(60_000),
            max_tracked_identities: 100_000,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    /// `retry_after` is the time until the oldest admitted request leaves
    /// the window.
    Rejected { retry_after: Duration },
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted)
    }
}

pub struct AdmissionController {
    config: AdmissionConfig,
    windows: DashMap<String, VecDeque<i64>>,
    clock: Arc<dyn Clock>,
    metrics: Option<Arc<MetricsRecorder>>,
}

impl AdmissionController {
    pub fn new(config: AdmissionConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: AdmissionConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            windows: DashMap::new(),
            clock,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRecorder>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn config(&self) -> &AdmissionConfig {
        &self.config
    }

    /// Check-and-record with the configured limit and window.
    pub fn check(&self, identity: &str) -> Admission {
        self.check_with(identity, self.config.limit, self.config.window)
    }

    pub fn admit(&self, identity: &str) -> bool {
        self.check(identity).is_admitted()
    }

    pub fn admit_with(&self, identity: &str, limit: usize, window: Duration) -> bool {
        self.check_with(identity, limit, window).is_admitted()
    }

    pub fn check_with(&self, identity: &str, limit: usize, window: Duration) -> Admission {
        // Sweep before taking the entry guard; retain() locks every shard.
        if self.windows.len() >= self.config.max_tracked_identities
            && !self.windows.contains_key(identity)
        {
            let removed = self.sweep();
            debug!(removed, "inline admission sweep at capacity");
        }

        let now = self.clock.now_ms();
        let window_ms = window_millis(window);
        let cutoff = now - window_ms;

        let reject_after = |oldest: i64| Admission::Rejected {
            retry_after: Duration::from_millis((oldest + window_ms - now).max(0) as u64),
        };

        // A rejection only prunes expired stamps; it never records a
        // request or starts tracking a new identity.
        let decision = match self.windows.entry(identity.to_string()) {
            Entry::Occupied(mut entry) => {
                let stamps = entry.get_mut();
                stamps.retain(|&t| t > cutoff);
                if stamps.len() >= limit {
                    reject_after(stamps.iter().copied().min().unwrap_or(now))
                } else {
                    stamps.push_back(now);
                    Admission::Admitted
                }
            }
            Entry::Vacant(_) if limit == 0 => reject_after(now),
            Entry::Vacant(entry) => {
                entry.insert(VecDeque::from([now]));
                Admission::Admitted
            }
        };

        if let Some(metrics) = &self.metrics {
            let outcome = if decision.is_admitted() { "admitted" } else { "rejected" };
            metrics.counter_inc("admission.decisions", &[("outcome", outcome)], 1);
        }
        decision
    }

    /// Drop identities with no admitted requests left in the configured
    /// window. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let cutoff = self.clock.now_ms() - window_millis(self.config.window);
        let before = self.windows.len();
        self.windows.retain(|_, stamps| {
            stamps.retain(|&t| t > cutoff);
            !stamps.is_empty()
        });
        let after = self.windows.len();

        if let Some(metrics) = &self.metrics {
            metrics.gauge_set("admission.tracked_identities", &[], after as f64);
        }
        before.saturating_sub(after)
    }

    pub fn tracked_identities(&self) -> usize {
        self.windows.len()
    }
}

fn window_millis(window: Duration) -> i64 {
    i64::try_from(window.as_millis()).unwrap_or(i64::MAX / 2)
}

/// Periodically sweep idle identities until `cancel` fires.
pub fn start_sweep_task(
    controller: Arc<AdmissionController>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let removed = controller.sweep();
                    if removed > 0 {
                        info!(removed, remaining = controller.tracked_identities(), "admission sweep");
                    }
                }
            }
        }
    })
}
