use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tokio_retry::RetryIf;
use tracing::{debug, info, warn};

use super::{build_backend, BackendConfig, CircuitBreaker, CircuitBreakerConfig, InferenceBackend, LLMResponse, PromptSpec, RetryPolicy};
use crate::errors::{InferenceError, InferenceResult};

/// Resilient front door to one inference backend
///
/// Every call gets its own timeout. Transient failures are retried with
/// exponential backoff unless the circuit breaker has opened in the meantime,
/// in which case callers fail fast with `BackendUnavailable`.
pub struct InferenceGateway {
    backend: Arc<dyn InferenceBackend>,
    breaker: CircuitBreaker,
    timeout: Duration,
    retry: RetryPolicy,
}

impl InferenceGateway {
    pub fn new(
        backend: Arc<dyn InferenceBackend>,
        timeout: Duration,
        retry: RetryPolicy,
        breaker: CircuitBreakerConfig,
    ) -> Self {
        let breaker = CircuitBreaker::new(backend.name(), breaker);
        Self {
            backend,
            breaker,
            timeout,
            retry,
        }
    }

    /// Build the configured backend and wrap it
    pub fn from_config(config: &BackendConfig) -> InferenceResult<Self> {
        let backend = build_backend(config)?;
        info!(
            "Inference gateway using {} backend at {} (model '{}')",
            config.kind, config.endpoint, config.model
        );
        Ok(Self::new(backend, config.timeout(), config.retry, config.breaker))
    }

    /// Wrap an existing backend with the resilience settings of `config`
    pub fn with_backend(backend: Arc<dyn InferenceBackend>, config: &BackendConfig) -> Self {
        Self::new(backend, config.timeout(), config.retry, config.breaker)
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Send a prompt, retrying transient failures per the prompt's or the gateway's policy
    pub async fn invoke(&self, prompt: &PromptSpec) -> InferenceResult<LLMResponse> {
        let policy = prompt.retry.unwrap_or(self.retry);
        let mut attempt = 0usize;
        // Server's Retry-After hint, in ms, stretches the next backoff delay
        let retry_after = AtomicU64::new(0);
        let delays = policy
            .delays()
            .map(|delay| delay.max(Duration::from_millis(retry_after.swap(0, Ordering::Relaxed))));
        let hint = &retry_after;

        RetryIf::spawn(
            delays,
            move || {
                attempt += 1;
                self.attempt(prompt, attempt, policy, hint)
            },
            |err: &InferenceError| err.is_retryable() && !self.breaker.is_open(),
        )
        .await
    }

    async fn attempt(
        &self,
        prompt: &PromptSpec,
        attempt: usize,
        policy: RetryPolicy,
        retry_after: &AtomicU64,
    ) -> InferenceResult<LLMResponse> {
        self.breaker.check()?;
        let mut probe = ProbeGuard::new(&self.breaker);

        debug!(
            advisor = %prompt.advisor,
            backend = self.backend.name(),
            attempt,
            "Invoking inference backend"
        );

        let result = match timeout(self.timeout, self.backend.generate(prompt)).await {
            Ok(result) => result,
            Err(_) => Err(InferenceError::Timeout {
                timeout_ms: self.timeout.as_millis() as u64,
            }),
        };
        probe.disarm();

        match result {
            Ok(response) => {
                self.breaker.record_success();
                debug!(
                    advisor = %prompt.advisor,
                    model = %response.model,
                    chars = response.content.len(),
                    "Inference succeeded"
                );
                Ok(response)
            }
            Err(err) => {
                if err.is_retryable() {
                    self.breaker.record_failure();
                } else {
                    self.breaker.release_probe();
                }
                warn!(
                    advisor = %prompt.advisor,
                    attempt,
                    max_attempts = policy.max_retries + 1,
                    "Inference attempt failed: {}",
                    err
                );
                if let InferenceError::RateLimit { retry_after: secs } = err {
                    let wait_ms = secs.saturating_mul(1_000).min(policy.max_backoff_ms);
                    retry_after.store(wait_ms, Ordering::Relaxed);
                }
                Err(err)
            }
        }
    }

    pub async fn health_check(&self) -> InferenceResult<Vec<String>> {
        match timeout(self.timeout, self.backend.health_check()).await {
            Ok(result) => result,
            Err(_) => Err(InferenceError::Timeout {
                timeout_ms: self.timeout.as_millis() as u64,
            }),
        }
    }
}

/// Frees a half-open probe slot if the call future is dropped mid-flight
struct ProbeGuard<'a> {
    breaker: &'a CircuitBreaker,
    armed: bool,
}

impl<'a> ProbeGuard<'a> {
    fn new(breaker: &'a CircuitBreaker) -> Self {
        Self { breaker, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.breaker.release_probe();
        }
    }
}
