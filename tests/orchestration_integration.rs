use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use llm_advisory::{
    errors::{AdvisoryError, InferenceError, InferenceResult, RegistryError},
    llm::{BackendKind, CircuitBreakerConfig, InferenceBackend, InferenceGateway, LLMResponse, PromptSpec, RetryPolicy},
    orchestrator::{FailureKind, PipelineStage},
    signals::{AggregationPolicyKind, Direction, SignalAggregator},
    Advisor, AdvisoryOrchestrator, ArtefactCompiler, ArtefactRequest, Candle, CycleState, MarketState,
    OrchestratorConfig, StrategyIdentity,
};

/// Scripted reply for one advisor
#[derive(Clone)]
enum Reply {
    Text(String),
    Delayed(Duration, String),
    Fail(fn() -> InferenceError),
}

/// Backend that answers by advisor name and records peak concurrency
struct MockBackend {
    replies: HashMap<String, Reply>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    calls: AtomicUsize,
}

impl MockBackend {
    fn new(replies: Vec<(&str, Reply)>) -> Arc<Self> {
        Arc::new(Self {
            replies: replies.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl InferenceBackend for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Ollama
    }

    async fn generate(&self, prompt: &PromptSpec) -> InferenceResult<LLMResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        let reply = self
            .replies
            .get(&prompt.advisor)
            .cloned()
            .unwrap_or_else(|| Reply::Text(r#"{"signal": "neutral", "confidence": 0.5, "reasoning": "default"}"#.into()));

        let result = match reply {
            Reply::Text(text) => Ok(LLMResponse::new(text, "mock-model")),
            Reply::Delayed(delay, text) => {
                tokio::time::sleep(delay).await;
                Ok(LLMResponse::new(text, "mock-model"))
            }
            Reply::Fail(make) => Err(make()),
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn health_check(&self) -> InferenceResult<Vec<String>> {
        Ok(vec!["mock-model".to_string()])
    }
}

fn json_signal(direction: &str, confidence: f64) -> Reply {
    Reply::Text(format!(
        r#"{{"signal": "{}", "confidence": {}, "reasoning": "{} view"}}"#,
        direction, confidence, direction
    ))
}

fn market_state() -> MarketState {
    let start = Utc.with_ymd_and_hms(2026, 3, 2, 14, 30, 0).unwrap();
    let timestamps = (0..30).map(|i| start + ChronoDuration::minutes(5 * i)).collect();
    let candles = (0..30)
        .map(|i| {
            let close = 100.0 + i as f64 * 0.5;
            Candle::new(close - 0.2, close + 0.4, close - 0.5, close, 10_000.0 + i as f64)
        })
        .collect();
    let indicators = BTreeMap::from([("rsi".to_string(), 61.5), ("atr".to_string(), 0.8)]);
    MarketState::new(StrategyIdentity::new("sma_cross", "SPY"), timestamps, candles, indicators).unwrap()
}

fn advisor(name: &str) -> Advisor {
    Advisor::new(
        name,
        format!("You are the {} advisor.", name),
        vec![ArtefactRequest::Closes { lookback: 5 }],
    )
}

fn orchestrator(backend: Arc<MockBackend>, call_timeout: Duration, max_in_flight: usize) -> AdvisoryOrchestrator {
    let gateway = InferenceGateway::new(
        backend,
        call_timeout,
        RetryPolicy::none(),
        CircuitBreakerConfig::default(),
    );
    AdvisoryOrchestrator::new(
        Arc::new(gateway),
        ArtefactCompiler::default(),
        SignalAggregator::default(),
        OrchestratorConfig {
            max_in_flight,
            step_timeout: Duration::from_secs(10),
        },
    )
}

#[tokio::test]
async fn test_cycle_combines_all_advisors() {
    let backend = MockBackend::new(vec![
        ("trend", json_signal("bullish", 0.8)),
        ("pattern", json_signal("bullish", 0.6)),
        ("reversal", json_signal("bearish", 0.9)),
    ]);
    let orch = orchestrator(backend, Duration::from_secs(1), 4);
    orch.add_advisors(vec![advisor("trend"), advisor("pattern"), advisor("reversal")])
        .await
        .unwrap();

    let decision = orch.step(&market_state(), None).await.unwrap();

    assert_eq!(decision.direction, Direction::Bullish);
    assert!((decision.confidence - 0.7).abs() < 1e-9);
    assert_eq!(decision.contributing_signals.len(), 3);
    assert!(decision.diagnostics.is_empty());
    assert_eq!(orch.state(), CycleState::Done);

    // Signals keep registration order
    let names: Vec<&str> = decision.contributing_signals.iter().map(|s| s.advisor.as_str()).collect();
    assert_eq!(names, vec!["trend", "pattern", "reversal"]);
}

#[tokio::test]
async fn test_slow_advisor_degrades_without_blocking_others() {
    let backend = MockBackend::new(vec![
        ("fast", json_signal("bearish", 0.7)),
        ("slow", Reply::Delayed(Duration::from_secs(5), "{}".into())),
    ]);
    let orch = orchestrator(backend, Duration::from_millis(100), 4);
    orch.add_advisors(vec![advisor("fast"), advisor("slow")]).await.unwrap();

    let decision = orch.step(&market_state(), None).await.unwrap();

    assert_eq!(decision.direction, Direction::Bearish);
    assert!((decision.confidence - 0.7).abs() < 1e-9);

    let slow = decision.signal_for("slow").unwrap();
    assert!(slow.degraded);
    assert_eq!(slow.direction, Direction::None);
    assert_eq!(slow.confidence, 0.0);

    assert_eq!(decision.diagnostics.len(), 1);
    assert_eq!(decision.diagnostics[0].advisor, "slow");
    assert_eq!(decision.diagnostics[0].kind, FailureKind::Timeout);
    assert_eq!(decision.diagnostics[0].stage, PipelineStage::Inference);
}

#[tokio::test]
async fn test_malformed_output_becomes_degraded_signal() {
    let backend = MockBackend::new(vec![
        ("good", json_signal("bullish", 0.65)),
        ("chatty", Reply::Text("I think the market will probably go up soon.".into())),
    ]);
    let orch = orchestrator(backend, Duration::from_secs(1), 4);
    orch.add_advisors(vec![advisor("good"), advisor("chatty")]).await.unwrap();

    let decision = orch.step(&market_state(), None).await.unwrap();

    assert_eq!(decision.direction, Direction::Bullish);
    assert!(decision.signal_for("chatty").unwrap().degraded);

    let failure = &decision.diagnostics[0];
    assert_eq!(failure.kind, FailureKind::Parse);
    assert_eq!(failure.stage, PipelineStage::Validation);
    assert_eq!(
        failure.raw_response.as_deref(),
        Some("I think the market will probably go up soon.")
    );
}

#[tokio::test]
async fn test_missing_artefact_degrades_only_that_advisor() {
    let backend = MockBackend::new(vec![("trend", json_signal("bullish", 0.9))]);
    let orch = orchestrator(backend.clone(), Duration::from_secs(1), 4);
    let needs_adx = Advisor::new(
        "needs_adx",
        "You read ADX.",
        vec![ArtefactRequest::Indicators {
            names: vec!["adx".to_string()],
            mode: llm_advisory::data::OutputMode::KeyValue,
        }],
    );
    orch.add_advisors(vec![advisor("trend"), needs_adx]).await.unwrap();

    let decision = orch.step(&market_state(), None).await.unwrap();

    assert_eq!(decision.direction, Direction::Bullish);
    assert_eq!(decision.diagnostics[0].kind, FailureKind::ArtefactNotFound);
    assert_eq!(decision.diagnostics[0].stage, PipelineStage::Artefacts);
    // The advisor with no prompt never reaches the backend
    assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_backend_error_is_reported_per_advisor() {
    let backend = MockBackend::new(vec![
        ("ok", json_signal("neutral", 0.4)),
        ("denied", Reply::Fail(|| InferenceError::Authentication("bad key".into()))),
    ]);
    let orch = orchestrator(backend, Duration::from_secs(1), 4);
    orch.add_advisors(vec![advisor("ok"), advisor("denied")]).await.unwrap();

    let decision = orch.step(&market_state(), None).await.unwrap();
    assert_eq!(decision.direction, Direction::Neutral);
    assert_eq!(decision.diagnostics[0].advisor, "denied");
    assert_eq!(decision.diagnostics[0].kind, FailureKind::Inference);
}

#[tokio::test]
async fn test_all_advisors_failing_is_no_advisor_available() {
    let backend = MockBackend::new(vec![
        ("a", Reply::Text("garbage".into())),
        ("b", Reply::Fail(|| InferenceError::Network("connection refused".into()))),
    ]);
    let orch = orchestrator(backend, Duration::from_secs(1), 4);
    orch.add_advisors(vec![advisor("a"), advisor("b")]).await.unwrap();

    match orch.step(&market_state(), None).await {
        Err(AdvisoryError::NoAdvisorAvailable { failures }) => {
            assert_eq!(failures.len(), 2);
            assert_eq!(failures[0].advisor, "a");
            assert_eq!(failures[1].advisor, "b");
        }
        other => panic!("expected NoAdvisorAvailable, got {:?}", other),
    }
    assert_eq!(orch.state(), CycleState::Failed);
}

#[tokio::test]
async fn test_empty_registry_is_no_advisor_available() {
    let orch = orchestrator(MockBackend::new(vec![]), Duration::from_secs(1), 4);
    let err = orch.step(&market_state(), None).await.unwrap_err();
    assert!(matches!(err, AdvisoryError::NoAdvisorAvailable { ref failures } if failures.is_empty()));

    orch.add_advisor(advisor("off").disabled()).await.unwrap();
    assert!(orch.step(&market_state(), None).await.is_err());
}

#[tokio::test]
async fn test_all_none_signals_give_none_decision() {
    let backend = MockBackend::new(vec![("a", json_signal("none", 0.0)), ("b", json_signal("none", 0.0))]);
    let orch = orchestrator(backend, Duration::from_secs(1), 4);
    orch.add_advisors(vec![advisor("a"), advisor("b")]).await.unwrap();

    let decision = orch.step(&market_state(), None).await.unwrap();
    assert_eq!(decision.direction, Direction::None);
    assert_eq!(decision.confidence, 0.0);
    assert_eq!(decision.usable_count(), 2);
}

#[tokio::test]
async fn test_cycles_are_deterministic() {
    let replies = vec![
        ("trend", json_signal("bullish", 0.8)),
        ("pattern", Reply::Delayed(Duration::from_millis(30), r#"{"signal": "bearish", "confidence": 0.55, "reasoning": "double top"}"#.into())),
        ("broken", Reply::Text("no json here".into())),
    ];

    let mut outputs = Vec::new();
    for _ in 0..3 {
        let orch = orchestrator(MockBackend::new(replies.clone()), Duration::from_secs(1), 2);
        orch.add_advisors(vec![advisor("trend"), advisor("pattern"), advisor("broken")])
            .await
            .unwrap();
        let decision = orch.step(&market_state(), None).await.unwrap();
        outputs.push(serde_json::to_string(&decision).unwrap());
    }

    assert_eq!(outputs[0], outputs[1]);
    assert_eq!(outputs[1], outputs[2]);
}

#[tokio::test]
async fn test_max_in_flight_bounds_backend_concurrency() {
    let replies: Vec<(&str, Reply)> = ["a", "b", "c", "d", "e", "f"]
        .into_iter()
        .map(|name| {
            (
                name,
                Reply::Delayed(Duration::from_millis(40), r#"{"signal": "bullish", "confidence": 0.6, "reasoning": "up"}"#.into()),
            )
        })
        .collect();
    let backend = MockBackend::new(replies);
    let orch = orchestrator(backend.clone(), Duration::from_secs(1), 2);
    orch.add_advisors(["a", "b", "c", "d", "e", "f"].into_iter().map(advisor).collect())
        .await
        .unwrap();

    let decision = orch.step(&market_state(), None).await.unwrap();

    assert_eq!(decision.usable_count(), 6);
    assert_eq!(backend.calls.load(Ordering::SeqCst), 6);
    assert!(backend.peak.load(Ordering::SeqCst) <= 2);
}

#[tokio::test]
async fn test_cancellation_aborts_cycle() {
    let backend = MockBackend::new(vec![("slow", Reply::Delayed(Duration::from_secs(5), "{}".into()))]);
    let orch = Arc::new(orchestrator(backend, Duration::from_secs(10), 4));
    orch.add_advisor(advisor("slow")).await.unwrap();

    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceller.cancel();
    });

    let err = orch
        .step_with_cancel(&market_state(), None, token)
        .await
        .unwrap_err();
    assert!(matches!(err, AdvisoryError::Cancelled));
    assert_eq!(orch.state(), CycleState::Failed);
}

#[tokio::test]
async fn test_cycle_deadline() {
    let backend = MockBackend::new(vec![("slow", Reply::Delayed(Duration::from_secs(5), "{}".into()))]);
    let orch = orchestrator(backend, Duration::from_secs(10), 4);
    orch.add_advisor(advisor("slow")).await.unwrap();

    let err = orch
        .step(&market_state(), Some(Duration::from_millis(50)))
        .await
        .unwrap_err();
    assert!(matches!(err, AdvisoryError::DeadlineExceeded { timeout_ms: 50 }));
    assert_eq!(orch.state(), CycleState::Failed);
}

#[tokio::test]
async fn test_duplicate_registration_is_atomic() {
    let orch = orchestrator(MockBackend::new(vec![]), Duration::from_secs(1), 4);
    orch.add_advisor(advisor("trend")).await.unwrap();

    let err = orch
        .add_advisors(vec![advisor("pattern"), advisor("trend")])
        .await
        .unwrap_err();
    assert_eq!(err, RegistryError::DuplicateAdvisor("trend".to_string()));
    assert_eq!(orch.advisor_names().await, vec!["trend"]);
}

#[tokio::test]
async fn test_registry_changes_between_cycles() {
    let backend = MockBackend::new(vec![
        ("trend", json_signal("bullish", 0.8)),
        ("reversal", json_signal("bearish", 0.9)),
    ]);
    let orch = orchestrator(backend, Duration::from_secs(1), 4);
    orch.add_advisor(advisor("trend")).await.unwrap();

    let first = orch.step(&market_state(), None).await.unwrap();
    assert_eq!(first.direction, Direction::Bullish);

    orch.add_advisor(advisor("reversal")).await.unwrap();
    orch.remove_advisor("trend").await.unwrap();

    let second = orch.step(&market_state(), None).await.unwrap();
    assert_eq!(second.direction, Direction::Bearish);
    assert!(second.signal_for("trend").is_none());

    orch.set_advisor_enabled("reversal", false).await.unwrap();
    assert!(orch.step(&market_state(), None).await.is_err());
    assert!(matches!(
        orch.remove_advisor("missing").await,
        Err(RegistryError::AdvisorNotFound(_))
    ));
}

#[tokio::test]
async fn test_state_transitions_are_observable() {
    let backend = MockBackend::new(vec![("trend", json_signal("bullish", 0.8))]);
    let orch = orchestrator(backend, Duration::from_secs(1), 4);
    orch.add_advisor(advisor("trend")).await.unwrap();

    let mut rx = orch.subscribe_state();
    assert_eq!(*rx.borrow_and_update(), CycleState::Idle);

    orch.step(&market_state(), None).await.unwrap();
    assert!(rx.has_changed().unwrap());
    assert_eq!(*rx.borrow_and_update(), CycleState::Done);
}

#[tokio::test]
async fn test_advise_surfaces_errors() {
    let backend = MockBackend::new(vec![
        ("trend", json_signal("bullish", 0.8)),
        ("chatty", Reply::Text("not structured".into())),
    ]);
    let orch = orchestrator(backend, Duration::from_secs(1), 4);
    orch.add_advisors(vec![advisor("trend"), advisor("chatty")]).await.unwrap();

    let signal = orch.advise("trend", &market_state()).await.unwrap();
    assert_eq!(signal.advisor, "trend");
    assert_eq!(signal.direction, Direction::Bullish);

    assert!(matches!(
        orch.advise("chatty", &market_state()).await,
        Err(AdvisoryError::Parse(_))
    ));
    assert!(matches!(
        orch.advise("unknown", &market_state()).await,
        Err(AdvisoryError::Registry(_))
    ));
}

#[tokio::test]
async fn test_reliability_policy_from_weights() {
    let backend = MockBackend::new(vec![
        ("trusted", json_signal("bearish", 0.6)),
        ("noisy_a", json_signal("bullish", 0.9)),
        ("noisy_b", json_signal("bullish", 0.9)),
    ]);
    let gateway = InferenceGateway::new(backend, Duration::from_secs(1), RetryPolicy::none(), CircuitBreakerConfig::default());
    let weights = BTreeMap::from([
        ("trusted".to_string(), 3.0),
        ("noisy_a".to_string(), 1.0),
        ("noisy_b".to_string(), 1.0),
    ]);
    let orch = AdvisoryOrchestrator::new(
        Arc::new(gateway),
        ArtefactCompiler::default(),
        SignalAggregator::from_kind(AggregationPolicyKind::Reliability, &weights),
        OrchestratorConfig::default(),
    );
    orch.add_advisors(vec![advisor("trusted"), advisor("noisy_a"), advisor("noisy_b")])
        .await
        .unwrap();

    let decision = orch.step(&market_state(), None).await.unwrap();
    assert_eq!(decision.direction, Direction::Bearish);
    assert_eq!(decision.policy, "reliability");
}

#[tokio::test]
async fn test_concurrent_cycles_share_orchestrator() {
    let backend = MockBackend::new(vec![
        ("trend", json_signal("bullish", 0.8)),
        ("reversal", Reply::Delayed(Duration::from_millis(20), r#"{"signal": "bullish", "confidence": 0.6, "reasoning": "bounce"}"#.into())),
    ]);
    let orch = Arc::new(orchestrator(backend.clone(), Duration::from_secs(1), 4));
    orch.add_advisors(vec![advisor("trend"), advisor("reversal")]).await.unwrap();

    let state = market_state();
    let handles: Vec<_> = (0..5)
        .map(|_| {
            let orch = Arc::clone(&orch);
            let state = state.clone();
            tokio::spawn(async move { orch.step(&state, None).await })
        })
        .collect();

    let decisions: Vec<String> = futures::future::join_all(handles)
        .await
        .into_iter()
        .map(|joined| serde_json::to_string(&joined.unwrap().unwrap()).unwrap())
        .collect();

    assert!(decisions.windows(2).all(|pair| pair[0] == pair[1]));
    assert_eq!(backend.calls.load(Ordering::SeqCst), 10);
    // Shared state channel settles on the last finishing cycle
    assert_eq!(orch.state(), CycleState::Done);
}

#[tokio::test]
async fn test_registry_writes_wait_for_in_flight_cycle() {
    let backend = MockBackend::new(vec![(
        "slow",
        Reply::Delayed(Duration::from_millis(300), r#"{"signal": "bullish", "confidence": 0.7, "reasoning": "breakout"}"#.into()),
    )]);
    let orch = Arc::new(orchestrator(backend, Duration::from_secs(1), 4));
    orch.add_advisor(advisor("slow")).await.unwrap();

    let cycle = {
        let orch = Arc::clone(&orch);
        tokio::spawn(async move { orch.step(&market_state(), None).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let started = std::time::Instant::now();
    orch.add_advisor(advisor("late")).await.unwrap();
    let waited = started.elapsed();

    let decision = cycle.await.unwrap().unwrap();
    assert!(waited >= Duration::from_millis(150), "add_advisor returned after {:?}", waited);
    assert_eq!(decision.contributing_signals.len(), 1);
    assert!(decision.signal_for("late").is_none());

    let removal = {
        let orch = Arc::clone(&orch);
        tokio::spawn(async move { orch.step(&market_state(), None).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    orch.remove_advisor("slow").await.unwrap();

    // The cycle that was running when removal was requested still saw both advisors
    let decision = removal.await.unwrap().unwrap();
    assert_eq!(decision.contributing_signals.len(), 2);
    assert_eq!(orch.advisor_names().await, vec!["late"]);
}

#[tokio::test]
async fn test_repeated_timeouts_exhaust_retries_and_degrade() {
    let backend = MockBackend::new(vec![
        ("fast", json_signal("bullish", 0.75)),
        ("stuck", Reply::Delayed(Duration::from_secs(5), "{}".into())),
    ]);
    let gateway = InferenceGateway::new(
        backend.clone(),
        Duration::from_millis(50),
        RetryPolicy {
            max_retries: 2,
            initial_backoff_ms: 5,
            max_backoff_ms: 20,
        },
        CircuitBreakerConfig::default(),
    );
    let orch = AdvisoryOrchestrator::new(
        Arc::new(gateway),
        ArtefactCompiler::default(),
        SignalAggregator::default(),
        OrchestratorConfig {
            max_in_flight: 4,
            step_timeout: Duration::from_secs(10),
        },
    );
    orch.add_advisors(vec![advisor("fast"), advisor("stuck")]).await.unwrap();

    let decision = orch.step(&market_state(), None).await.unwrap();

    // One call for the fast advisor, three attempts for the stuck one
    assert_eq!(backend.calls.load(Ordering::SeqCst), 4);
    assert_eq!(decision.direction, Direction::Bullish);
    assert!((decision.confidence - 0.75).abs() < 1e-9);

    let stuck = decision.signal_for("stuck").unwrap();
    assert!(stuck.degraded);
    assert_eq!(stuck.direction, Direction::None);
    assert_eq!(stuck.confidence, 0.0);

    assert_eq!(decision.diagnostics.len(), 1);
    assert_eq!(decision.diagnostics[0].advisor, "stuck");
    assert_eq!(decision.diagnostics[0].kind, FailureKind::Timeout);
}

#[tokio::test]
async fn test_render_prompts_follow_registration_order() {
    let orch = orchestrator(MockBackend::new(vec![]), Duration::from_secs(1), 4);
    let needs_adx = Advisor::new(
        "needs_adx",
        "You read ADX.",
        vec![ArtefactRequest::Indicators {
            names: vec!["adx".to_string()],
            mode: llm_advisory::data::OutputMode::KeyValue,
        }],
    );
    orch.add_advisors(vec![advisor("trend"), needs_adx, advisor("off").disabled()])
        .await
        .unwrap();

    let rendered = orch.render_prompts(&market_state()).await;

    let names: Vec<&str> = rendered.iter().map(|(name, _)| name.as_str()).collect();
    assert_eq!(names, vec!["trend", "needs_adx"]);
    let trend = rendered[0].1.as_ref().unwrap();
    assert!(trend.system.starts_with("You are the trend advisor."));
    assert!(matches!(rendered[1].1, Err(AdvisoryError::ArtefactNotFound { .. })));
}
