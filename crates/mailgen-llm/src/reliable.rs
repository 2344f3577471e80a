use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use tracing::{info, warn};

use mailgen_core::completion::{CompletionProvider, CompletionRequest};
use mailgen_core::errors::GatewayError;

/// Retry and circuit breaker settings for [`ReliableProvider`].
#[derive(Clone, Debug)]
pub struct ReliableConfig {
    /// Extra attempts after the first one.
    pub max_retries: u32,
    pub base_delay: Duration,
    /// Ceiling for computed backoff and for provider Retry-After hints.
    pub max_delay: Duration,
    pub jitter_factor: f64,
    /// Consecutive failed calls that open the circuit.
    pub failure_threshold: u32,
    pub cooldown: Duration,
}

impl Default for ReliableConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            jitter_factor: 0.2,
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Circuit {
    Closed,
    Open { until: Instant },
    /// One trial call allowed through after the cooldown.
    HalfOpen,
}

struct Breaker {
    circuit: Circuit,
    failures: u32,
    trial_in_flight: bool,
}

/// Held by the single trial call against a recovering provider. Dropping it
/// frees the slot, including when the caller's future is cancelled mid-call.
struct TrialSlot<'a> {
    breaker: &'a Mutex<Breaker>,
}

impl Drop for TrialSlot<'_> {
    fn drop(&mut self) {
        self.breaker.lock().trial_in_flight = false;
    }
}

/// Wraps a completion provider with bounded retries and a circuit breaker.
///
/// Only retryable [`GatewayError`]s are retried. A provider Retry-After hint
/// replaces the computed backoff but is still capped at `max_delay`, since a
/// generation request has its own overall timeout. While the circuit is open
/// calls fail fast with `ProviderOverloaded` instead of reaching the network.
pub struct ReliableProvider<P: CompletionProvider> {
    inner: P,
    config: ReliableConfig,
    breaker: Mutex<Breaker>,
    retries: AtomicU64,
}

impl<P: CompletionProvider> ReliableProvider<P> {
    pub fn new(inner: P, config: ReliableConfig) -> Self {
        Self {
            inner,
            config,
            breaker: Mutex::new(Breaker {
                circuit: Circuit::Closed,
                failures: 0,
                trial_in_flight: false,
            }),
            retries: AtomicU64::new(0),
        }
    }

    pub fn with_defaults(inner: P) -> Self {
        Self::new(inner, ReliableConfig::default())
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }

    /// `Some` when this call is the recovery trial.
    fn admit_call(&self) -> Result<Option<TrialSlot<'_>>, GatewayError> {
        let mut breaker = self.breaker.lock();
        match breaker.circuit {
            Circuit::Closed => return Ok(None),
            Circuit::Open { until } if Instant::now() < until => {
                return Err(GatewayError::ProviderOverloaded);
            }
            Circuit::HalfOpen if breaker.trial_in_flight => {
                return Err(GatewayError::ProviderOverloaded);
            }
            Circuit::Open { .. } | Circuit::HalfOpen => {}
        }
        breaker.circuit = Circuit::HalfOpen;
        breaker.trial_in_flight = true;
        Ok(Some(TrialSlot {
            breaker: &self.breaker,
        }))
    }

    fn on_success(&self) {
        let mut breaker = self.breaker.lock();
        breaker.failures = 0;
        if breaker.circuit != Circuit::Closed {
            info!(provider = self.inner.name(), "completion circuit closed");
            breaker.circuit = Circuit::Closed;
        }
    }

    fn on_failure(&self) {
        let mut breaker = self.breaker.lock();
        breaker.failures += 1;
        let trip = breaker.circuit == Circuit::HalfOpen
            || breaker.failures >= self.config.failure_threshold;
        if trip && !matches!(breaker.circuit, Circuit::Open { .. }) {
            warn!(
                provider = self.inner.name(),
                failures = breaker.failures,
                cooldown_secs = self.config.cooldown.as_secs(),
                "completion circuit opened"
            );
            breaker.circuit = Circuit::Open {
                until: Instant::now() + self.config.cooldown,
            };
        }
    }

    fn backoff(&self, attempt: u32, hint: Option<Duration>) -> Duration {
        if let Some(hint) = hint {
            return hint.min(self.config.max_delay);
        }

        let base_ms = self.config.base_delay.as_millis() as f64;
        let max_ms = self.config.max_delay.as_millis() as f64;
        let ms = (base_ms * 2f64.powi(attempt as i32)).min(max_ms);

        let spread = ms * self.config.jitter_factor;
        let jitter = if spread > 0.0 {
            rand::thread_rng().gen_range(-spread..=spread)
        } else {
            0.0
        };
        Duration::from_millis((ms + jitter).max(50.0) as u64)
    }

    pub fn total_retries(&self) -> u64 {
        self.retries.load(Ordering::Relaxed)
    }

    pub fn circuit_state(&self) -> &'static str {
        match self.breaker.lock().circuit {
            Circuit::Closed => "closed",
            Circuit::Open { .. } => "open",
            Circuit::HalfOpen => "half_open",
        }
    }
}

#[async_trait]
impl<P: CompletionProvider> CompletionProvider for ReliableProvider<P> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, GatewayError> {
        let _trial = self.admit_call()?;

        for attempt in 0.. {
            let err = match self.inner.complete(request).await {
                Ok(text) => {
                    self.on_success();
                    return Ok(text);
                }
                Err(e) => e,
            };

            if !err.is_retryable() || attempt >= self.config.max_retries {
                self.on_failure();
                return Err(err);
            }

            let delay = self.backoff(attempt, err.suggested_delay());
            self.retries.fetch_add(1, Ordering::Relaxed);
            warn!(
                provider = self.inner.name(),
                model = %request.model,
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "completion failed, retrying"
            );
            tokio::time::sleep(delay).await;
        }
        unreachable!("retry loop only exits by returning")
    }
}
