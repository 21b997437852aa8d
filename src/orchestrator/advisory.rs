//! Advisory orchestrator
//! Drives one decision cycle per call: artefacts → prompt → gateway → validator → aggregator

use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::{AdvisorFailure, CycleState, OrchestratorConfig, PipelineStage};
use crate::advisor::{Advisor, AdvisorRegistry};
use crate::config::Config;
use crate::data::{ArtefactCompiler, MarketState};
use crate::errors::{AdvisoryError, AdvisoryResult, RegistryError};
use crate::llm::{InferenceGateway, LLMResponse, PromptSpec};
use crate::signals::{CombinedDecision, Signal, SignalAggregator};

/// Owns the advisor registry and runs decision cycles against it
///
/// `step` holds a read lock on the registry for the whole cycle and
/// `add_advisor` / `remove_advisor` take the write lock, so registry changes
/// wait for in-flight cycles and never interleave with one.
pub struct AdvisoryOrchestrator {
    registry: RwLock<AdvisorRegistry>,
    gateway: Arc<InferenceGateway>,
    compiler: ArtefactCompiler,
    aggregator: SignalAggregator,
    config: OrchestratorConfig,
    state_tx: watch::Sender<CycleState>,
}

impl AdvisoryOrchestrator {
    pub fn new(
        gateway: Arc<InferenceGateway>,
        compiler: ArtefactCompiler,
        aggregator: SignalAggregator,
        config: OrchestratorConfig,
    ) -> Self {
        let (state_tx, _) = watch::channel(CycleState::Idle);
        Self {
            registry: RwLock::new(AdvisorRegistry::new()),
            gateway,
            compiler,
            aggregator,
            config,
            state_tx,
        }
    }

    /// Create orchestrator from config::Config with an empty registry
    pub fn from_config(config: &Config) -> AdvisoryResult<Self> {
        info!("Initializing advisory orchestrator");
        let gateway = InferenceGateway::from_config(&config.llm)?;
        Ok(Self::with_gateway(Arc::new(gateway), config))
    }

    /// Use an already built gateway with the remaining settings from config
    pub fn with_gateway(gateway: Arc<InferenceGateway>, config: &Config) -> Self {
        Self::new(
            gateway,
            ArtefactCompiler::new(config.compiler.clone()),
            SignalAggregator::from_kind(config.aggregation.policy, &config.aggregation.weights),
            config.orchestrator,
        )
    }

    pub fn gateway(&self) -> &InferenceGateway {
        &self.gateway
    }

    pub async fn add_advisor(&self, advisor: Advisor) -> Result<(), RegistryError> {
        self.registry.write().await.register(advisor)
    }

    pub async fn add_advisors(&self, advisors: Vec<Advisor>) -> Result<(), RegistryError> {
        self.registry.write().await.register_all(advisors)
    }

    pub async fn remove_advisor(&self, name: &str) -> Result<Advisor, RegistryError> {
        self.registry.write().await.remove(name)
    }

    pub async fn set_advisor_enabled(&self, name: &str, enabled: bool) -> Result<(), RegistryError> {
        self.registry.write().await.set_enabled(name, enabled)
    }

    pub async fn advisor_names(&self) -> Vec<String> {
        self.registry.read().await.names()
    }

    /// Phase of the most recent transition made by any cycle
    pub fn state(&self) -> CycleState {
        *self.state_tx.borrow()
    }

    /// Watch cycle phase transitions
    ///
    /// All cycles publish to one channel. When `step` calls overlap, the
    /// receiver sees their transitions interleaved and `state()` reports
    /// whichever cycle moved last; the `advisory_cycle` tracing span carries
    /// the per-cycle id.
    pub fn subscribe_state(&self) -> watch::Receiver<CycleState> {
        self.state_tx.subscribe()
    }

    fn transition(&self, state: CycleState) {
        debug!("Cycle state -> {}", state);
        self.state_tx.send_replace(state);
    }

    /// Run one decision cycle; `None` uses the configured step timeout
    pub async fn step(&self, market_state: &MarketState, timeout: Option<Duration>) -> AdvisoryResult<CombinedDecision> {
        self.step_with_cancel(market_state, timeout, CancellationToken::new())
            .await
    }

    /// Run one decision cycle that the caller can abort through `cancel`
    ///
    /// On cancellation or deadline the in-flight backend calls are dropped
    /// and no partial aggregation happens.
    pub async fn step_with_cancel(
        &self,
        market_state: &MarketState,
        timeout: Option<Duration>,
        cancel: CancellationToken,
    ) -> AdvisoryResult<CombinedDecision> {
        let timeout = timeout.unwrap_or(self.config.step_timeout);
        let registry = self.registry.read().await;
        let advisors: Vec<&Advisor> = registry.enabled().collect();

        let span = info_span!(
            "advisory_cycle",
            cycle_id = %Uuid::new_v4(),
            strategy = %market_state.strategy().name,
            advisors = advisors.len()
        );

        async {
            self.transition(CycleState::Collecting);

            if advisors.is_empty() {
                warn!("No enabled advisors registered");
                self.transition(CycleState::Failed);
                return Err(AdvisoryError::NoAdvisorAvailable { failures: Vec::new() });
            }

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(AdvisoryError::Cancelled),
                result = tokio::time::timeout(timeout, self.run_cycle(&advisors, market_state)) => match result {
                    Ok(result) => result,
                    Err(_) => Err(AdvisoryError::DeadlineExceeded {
                        timeout_ms: timeout.as_millis() as u64,
                    }),
                },
            };

            match &outcome {
                Ok(decision) => {
                    info!(
                        direction = %decision.direction,
                        confidence = decision.confidence,
                        usable = decision.usable_count(),
                        failures = decision.diagnostics.len(),
                        "Advisory cycle complete"
                    );
                    self.transition(CycleState::Done);
                }
                Err(e) => {
                    warn!("Advisory cycle failed: {}", e);
                    self.transition(CycleState::Failed);
                }
            }
            outcome
        }
        .instrument(span)
        .await
    }

    async fn run_cycle(&self, advisors: &[&Advisor], market_state: &MarketState) -> AdvisoryResult<CombinedDecision> {
        // Artefact compilation and prompt rendering are synchronous
        let prompts: Vec<Result<PromptSpec, AdvisorFailure>> = advisors
            .iter()
            .map(|advisor| {
                advisor
                    .build_prompt(&self.compiler, market_state)
                    .map_err(|e| AdvisorFailure::from_error(&advisor.name, PipelineStage::Artefacts, e))
            })
            .collect();

        self.transition(CycleState::AwaitingInference);

        let gateway = &self.gateway;
        let responses: Vec<Result<LLMResponse, AdvisorFailure>> = stream::iter(prompts)
            .map(|prompt| async move {
                match prompt {
                    Ok(prompt) => gateway
                        .invoke(&prompt)
                        .await
                        .map_err(|e| AdvisorFailure::from_error(&prompt.advisor, PipelineStage::Inference, e.into())),
                    Err(failure) => Err(failure),
                }
            })
            .buffered(self.config.max_in_flight.max(1))
            .collect()
            .await;

        self.transition(CycleState::Validating);

        let mut signals = Vec::with_capacity(advisors.len());
        let mut failures = Vec::new();
        for (advisor, response) in advisors.iter().zip(responses) {
            let parsed = response.and_then(|response| {
                advisor
                    .parse_response(&response.content)
                    .map_err(|e| AdvisorFailure::from_error(&advisor.name, PipelineStage::Validation, e.into()))
            });

            match parsed {
                Ok(signal) => {
                    debug!(
                        advisor = %advisor.name,
                        direction = %signal.direction,
                        confidence = signal.confidence,
                        "Advisor signal validated"
                    );
                    signals.push(signal);
                }
                Err(failure) => {
                    warn!(
                        advisor = %advisor.name,
                        stage = ?failure.stage,
                        "Advisor degraded: {}",
                        failure.message
                    );
                    signals.push(Signal::degraded(&advisor.name, &failure.message));
                    failures.push(failure);
                }
            }
        }

        if !signals.iter().any(Signal::is_usable) {
            return Err(AdvisoryError::NoAdvisorAvailable { failures });
        }

        self.transition(CycleState::Aggregating);
        Ok(self.aggregator.combine(signals, failures))
    }

    /// Run a single registered advisor and return its signal, surfacing any failure
    pub async fn advise(&self, name: &str, market_state: &MarketState) -> AdvisoryResult<Signal> {
        let registry = self.registry.read().await;
        let advisor = registry
            .get(name)
            .ok_or_else(|| RegistryError::AdvisorNotFound(name.to_string()))?;

        let prompt = advisor.build_prompt(&self.compiler, market_state)?;
        let response = self.gateway.invoke(&prompt).await?;
        Ok(advisor.parse_response(&response.content)?)
    }

    /// Render every enabled advisor's prompt without calling the backend
    pub async fn render_prompts(&self, market_state: &MarketState) -> Vec<(String, AdvisoryResult<PromptSpec>)> {
        let registry = self.registry.read().await;
        registry
            .enabled()
            .map(|advisor| (advisor.name.clone(), advisor.build_prompt(&self.compiler, market_state)))
            .collect()
    }
}
