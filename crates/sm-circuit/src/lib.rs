//! Named circuit breaker state machines guarding serializer, transport and
//! message-processor calls (spec §4.5). Grounded on the teacher's
//! `fc_router::mediator::CircuitBreaker` and
//! `fc_router::circuit_breaker_registry::{CircuitBreakerRegistry, EndpointCircuitBreaker}`,
//! generalized from HTTP-endpoint breakers to arbitrary fallible async calls.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sm_common::SmartMessageError;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub window: Duration,
    pub reset_after: Duration,
}

impl CircuitBreakerConfig {
    pub const fn new(failure_threshold: u32, window: Duration, reset_after: Duration) -> Self {
        Self {
            failure_threshold,
            window,
            reset_after,
        }
    }
}

/// Spec §4.5 defaults (failures / window / reset) for the five named
/// breakers the runtime wires up automatically.
pub mod defaults {
    use super::CircuitBreakerConfig;
    use std::time::Duration;

    pub const MESSAGE_PROCESSOR: CircuitBreakerConfig =
        CircuitBreakerConfig::new(3, Duration::from_secs(60), Duration::from_secs(30));
    pub const TRANSPORT_PUBLISH: CircuitBreakerConfig =
        CircuitBreakerConfig::new(5, Duration::from_secs(30), Duration::from_secs(15));
    pub const TRANSPORT_SUBSCRIBE: CircuitBreakerConfig =
        CircuitBreakerConfig::new(3, Duration::from_secs(60), Duration::from_secs(45));
    pub const SERIALIZER: CircuitBreakerConfig =
        CircuitBreakerConfig::new(5, Duration::from_secs(30), Duration::from_secs(10));
    pub const DISPATCHER_SHUTDOWN: CircuitBreakerConfig =
        CircuitBreakerConfig::new(2, Duration::from_secs(10), Duration::from_secs(5));
}

/// Tagged value returned instead of invoking the protected call, so callers
/// can distinguish a circuit-open short-circuit from a normal return.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerFallback {
    pub circuit_breaker: bool,
    pub circuit: String,
    pub state: CircuitState,
    pub error: Option<String>,
    pub timestamp: chrono::DateTime<Utc>,
}

pub enum CircuitOutcome<T> {
    /// The call ran and succeeded.
    Success(T),
    /// The breaker was open; the call was never attempted.
    ShortCircuited(CircuitBreakerFallback),
}

struct Inner {
    state: CircuitState,
    recent_results: Vec<(Instant, bool)>,
    opened_at: Option<Instant>,
    last_error: Option<String>,
}

/// A single named circuit. `recent_results` is a rolling window of
/// (timestamp, succeeded) pairs pruned to `config.window`, mirroring
/// `EndpointCircuitBreaker`'s failure-rate ring buffer.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: RwLock<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: RwLock::new(Inner {
                state: CircuitState::Closed,
                recent_results: Vec::new(),
                opened_at: None,
                last_error: None,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> CircuitState {
        self.inner.read().state
    }

    /// Runs `f` under the breaker. On `Open`, short-circuits without
    /// invoking `f` and returns a tagged fallback; after `reset_after` has
    /// elapsed it transitions to `HalfOpen` and allows one trial call
    /// through instead.
    pub async fn call<F, Fut, T>(&self, f: F) -> CircuitOutcome<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, SmartMessageError>>,
    {
        if let Some(fallback) = self.maybe_short_circuit() {
            return CircuitOutcome::ShortCircuited(fallback);
        }

        match f().await {
            Ok(value) => {
                self.record_success();
                CircuitOutcome::Success(value)
            }
            Err(err) => {
                self.record_failure(&err);
                CircuitOutcome::ShortCircuited(CircuitBreakerFallback {
                    circuit_breaker: true,
                    circuit: self.name.clone(),
                    state: self.state(),
                    error: Some(err.to_string()),
                    timestamp: Utc::now(),
                })
            }
        }
    }

    fn maybe_short_circuit(&self) -> Option<CircuitBreakerFallback> {
        let mut inner = self.inner.write();
        match inner.state {
            CircuitState::Closed => None,
            CircuitState::HalfOpen => None,
            CircuitState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|t| t.elapsed())
                    .unwrap_or(Duration::MAX);
                if elapsed >= self.config.reset_after {
                    inner.state = CircuitState::HalfOpen;
                    info!(circuit = %self.name, "circuit breaker half-open, permitting trial call");
                    None
                } else {
                    Some(CircuitBreakerFallback {
                        circuit_breaker: true,
                        circuit: self.name.clone(),
                        state: CircuitState::Open,
                        error: inner.last_error.clone(),
                        timestamp: Utc::now(),
                    })
                }
            }
        }
    }

    fn record_success(&self) {
        let mut inner = self.inner.write();
        match inner.state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Closed;
                inner.recent_results.clear();
                inner.opened_at = None;
                info!(circuit = %self.name, "circuit breaker closed after successful trial call");
            }
            CircuitState::Closed => {
                let now = Instant::now();
                inner.recent_results.push((now, true));
                prune(&mut inner.recent_results, self.config.window);
            }
            CircuitState::Open => {}
        }
    }

    fn record_failure(&self, err: &SmartMessageError) {
        let mut inner = self.inner.write();
        inner.last_error = Some(err.to_string());
        match inner.state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                warn!(circuit = %self.name, error = %err, "circuit breaker re-opened after failed trial call");
            }
            CircuitState::Closed => {
                let now = Instant::now();
                inner.recent_results.push((now, false));
                prune(&mut inner.recent_results, self.config.window);
                let failures = inner
                    .recent_results
                    .iter()
                    .filter(|(_, success)| !success)
                    .count() as u32;
                if failures >= self.config.failure_threshold {
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(Instant::now());
                    warn!(circuit = %self.name, failures, threshold = self.config.failure_threshold, error = %err, "circuit breaker opened");
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Administrative reset, mirroring `CircuitBreakerRegistry::reset`.
    pub fn reset(&self) {
        let mut inner = self.inner.write();
        inner.state = CircuitState::Closed;
        inner.recent_results.clear();
        inner.opened_at = None;
    }
}

/// Configurable fallback hook (spec §4.5): receives the triggering error via
/// the breaker's own `call` and decides what to do when the breaker
/// short-circuits or the call itself fails. Send-to-DLQ, the third
/// predefined fallback, is hand-wired at each call site instead of modeled
/// here since it needs access to the original envelope rather than just the
/// circuit's own error/value types.
pub enum Fallback<T> {
    /// No fallback: return the tagged short-circuit as-is.
    None,
    /// Retry the call with exponential backoff (`base_delay * 2^attempt`),
    /// up to `max_retries` additional attempts, before giving up.
    RetryWithBackoff {
        max_retries: u32,
        base_delay: Duration,
    },
    /// Give up immediately and substitute a fixed value for the error.
    GracefulDegradation(T),
}

impl CircuitBreaker {
    /// Like `call`, but applies a `Fallback` policy around it. `f` must be
    /// re-invokable since `RetryWithBackoff` may call it more than once.
    pub async fn call_with_fallback<F, Fut, T>(&self, f: F, fallback: &Fallback<T>) -> CircuitOutcome<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, SmartMessageError>>,
        T: Clone,
    {
        match fallback {
            Fallback::None => self.call(f).await,
            Fallback::RetryWithBackoff {
                max_retries,
                base_delay,
            } => {
                let mut attempt = 0;
                loop {
                    match self.call(&f).await {
                        CircuitOutcome::Success(value) => return CircuitOutcome::Success(value),
                        CircuitOutcome::ShortCircuited(fb) => {
                            if attempt >= *max_retries {
                                return CircuitOutcome::ShortCircuited(fb);
                            }
                            let delay = *base_delay * 2u32.saturating_pow(attempt);
                            attempt += 1;
                            warn!(circuit = %self.name, attempt, ?delay, "retrying after circuit breaker fallback");
                            tokio::time::sleep(delay).await;
                        }
                    }
                }
            }
            Fallback::GracefulDegradation(value) => match self.call(f).await {
                CircuitOutcome::Success(v) => CircuitOutcome::Success(v),
                CircuitOutcome::ShortCircuited(fb) => {
                    info!(circuit = %self.name, "circuit breaker fallback, degrading to fixed value");
                    let _ = fb;
                    CircuitOutcome::Success(value.clone())
                }
            },
        }
    }
}

fn prune(results: &mut Vec<(Instant, bool)>, window: Duration) {
    let cutoff = Instant::now().checked_sub(window);
    if let Some(cutoff) = cutoff {
        results.retain(|(t, _)| *t >= cutoff);
    }
}

/// Process-wide named registry, lazily creating breakers on first use —
/// the same get-or-create shape as `CircuitBreakerRegistry`.
pub struct CircuitBreakerRegistry {
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
    default_config: CircuitBreakerConfig,
}

impl CircuitBreakerRegistry {
    pub fn new(default_config: CircuitBreakerConfig) -> Self {
        Self {
            breakers: RwLock::new(HashMap::new()),
            default_config,
        }
    }

    pub fn get_or_create(&self, name: &str) -> Arc<CircuitBreaker> {
        self.get_or_create_with(name, self.default_config)
    }

    pub fn get_or_create_with(&self, name: &str, config: CircuitBreakerConfig) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.read().get(name) {
            return existing.clone();
        }
        let mut breakers = self.breakers.write();
        breakers
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(name, config)))
            .clone()
    }

    pub fn reset_all(&self) {
        for breaker in self.breakers.read().values() {
            breaker.reset();
        }
    }

    pub fn open_count(&self) -> usize {
        self.breakers
            .read()
            .values()
            .filter(|b| b.state() == CircuitState::Open)
            .count()
    }
}
