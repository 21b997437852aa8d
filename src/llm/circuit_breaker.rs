// Circuit Breaker
// Stops calling a backend after repeated transient failures and probes it again after a cooldown

use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::errors::InferenceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Failures inside the window that open the circuit
    pub failure_threshold: u32,

    /// Rolling window over which failures are counted
    pub window: Duration,

    /// How long the circuit stays open before a probe is let through
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            window: Duration::from_secs(60),
            cooldown: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    /// Cooldown elapsed; a single probe call is in flight
    HalfOpen,
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    Closed,
    Open { until: Instant },
    HalfOpen { probing: bool },
}

#[derive(Debug)]
struct Inner {
    phase: Phase,
    failures: VecDeque<Instant>,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    backend: String,
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(backend: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            backend: backend.into(),
            config,
            inner: Mutex::new(Inner {
                phase: Phase::Closed,
                failures: VecDeque::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // State is a few plain values; a panic elsewhere cannot leave it inconsistent
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Gate a call: Ok when it may proceed, `BackendUnavailable` when the circuit is open
    pub fn check(&self) -> Result<(), InferenceError> {
        let mut inner = self.lock();
        let now = Instant::now();
        let phase = inner.phase;

        match phase {
            Phase::Closed => Ok(()),
            Phase::Open { until } if now < until => Err(InferenceError::BackendUnavailable {
                backend: self.backend.clone(),
                retry_in_ms: until.saturating_duration_since(now).as_millis() as u64,
            }),
            Phase::Open { .. } => {
                info!("Circuit breaker for '{}' cooldown expired, allowing probe", self.backend);
                inner.phase = Phase::HalfOpen { probing: true };
                Ok(())
            }
            Phase::HalfOpen { probing: true } => Err(InferenceError::BackendUnavailable {
                backend: self.backend.clone(),
                retry_in_ms: 0,
            }),
            Phase::HalfOpen { probing: false } => {
                inner.phase = Phase::HalfOpen { probing: true };
                Ok(())
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.lock();
        if !matches!(inner.phase, Phase::Closed) {
            info!("Circuit breaker for '{}' closed after successful call", self.backend);
        }
        inner.phase = Phase::Closed;
        inner.failures.clear();
    }

    pub fn record_failure(&self) {
        let mut inner = self.lock();
        let now = Instant::now();

        if let Phase::HalfOpen { .. } = inner.phase {
            warn!("Probe call to '{}' failed, reopening circuit", self.backend);
            inner.phase = Phase::Open {
                until: now + self.config.cooldown,
            };
            return;
        }

        inner.failures.push_back(now);
        while let Some(&oldest) = inner.failures.front() {
            if now.duration_since(oldest) > self.config.window {
                inner.failures.pop_front();
            } else {
                break;
            }
        }

        if matches!(inner.phase, Phase::Closed) && inner.failures.len() as u32 >= self.config.failure_threshold {
            warn!(
                backend = %self.backend,
                failures = inner.failures.len(),
                cooldown_secs = self.config.cooldown.as_secs(),
                "Circuit breaker tripped, failing fast"
            );
            inner.phase = Phase::Open {
                until: now + self.config.cooldown,
            };
        }
    }

    /// Release a probe slot without judging the backend, e.g. the call was cancelled
    pub fn release_probe(&self) {
        let mut inner = self.lock();
        if let Phase::HalfOpen { probing: true } = inner.phase {
            inner.phase = Phase::HalfOpen { probing: false };
        }
    }

    pub fn state(&self) -> CircuitState {
        let phase = self.lock().phase;
        match phase {
            Phase::Closed => CircuitState::Closed,
            Phase::Open { until } if Instant::now() < until => CircuitState::Open,
            Phase::Open { .. } | Phase::HalfOpen { .. } => CircuitState::HalfOpen,
        }
    }

    pub fn is_open(&self) -> bool {
        self.state() == CircuitState::Open
    }

    pub fn failure_count(&self) -> usize {
        self.lock().failures.len()
    }
}
