use anyhow::{bail, Context, Result};
use std::collections::BTreeMap;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::data::CompilerConfig;
use crate::llm::{BackendConfig, BackendKind, CircuitBreakerConfig, RetryPolicy};
use crate::orchestrator::OrchestratorConfig;
use crate::signals::{AdviceThresholds, AggregationPolicyKind};

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub llm: BackendConfig,
    pub orchestrator: OrchestratorConfig,
    pub aggregation: AggregationConfig,
    pub compiler: CompilerConfig,
}

#[derive(Debug, Clone, Default)]
pub struct AggregationConfig {
    pub policy: AggregationPolicyKind,
    /// Per-advisor reliability used by the reliability policy
    pub weights: BTreeMap<String, f64>,
    pub thresholds: AdviceThresholds,
}

impl Config {
    pub fn load() -> Result<Self> {
        // Load .env file - this sets env vars that aren't already set
        dotenv::dotenv().ok();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup; `load` passes the process environment
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let api_key = get("OPENAI_API_KEY");
        let kind = match get("LLM_PROVIDER") {
            Some(provider) => BackendKind::from_str(&provider).map_err(anyhow::Error::msg)?,
            None if api_key.is_some() => BackendKind::OpenAi,
            None => BackendKind::Ollama,
        };

        let (endpoint, model) = match kind {
            BackendKind::Ollama => (
                get("OLLAMA_BASE_URL").unwrap_or_else(|| "http://localhost:11434".to_string()),
                get("OLLAMA_MODEL").unwrap_or_else(|| "qwen3-vl".to_string()),
            ),
            BackendKind::OpenAi => {
                if api_key.is_none() {
                    bail!("OPENAI_API_KEY environment variable is required when LLM_PROVIDER is openai");
                }
                (
                    get("OPENAI_BASE_URL").unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
                    get("OPENAI_MODEL").unwrap_or_else(|| "gpt-3.5-turbo".to_string()),
                )
            }
        };

        let config = Config {
            llm: BackendConfig {
                kind,
                endpoint,
                api_key,
                model,
                temperature: parse_or(&get, "LLM_TEMPERATURE", 0.7)?,
                max_tokens: parse_or(&get, "LLM_MAX_TOKENS", 500)?,
                timeout_seconds: parse_or(&get, "LLM_TIMEOUT_SECONDS", 60)?,
                retry: RetryPolicy {
                    max_retries: parse_or(&get, "LLM_MAX_RETRIES", 3)?,
                    initial_backoff_ms: parse_or(&get, "LLM_BACKOFF_MS", 500)?,
                    max_backoff_ms: parse_or(&get, "LLM_MAX_BACKOFF_MS", 10_000)?,
                },
                breaker: CircuitBreakerConfig {
                    failure_threshold: parse_or(&get, "BREAKER_FAILURE_THRESHOLD", 5)?,
                    window: Duration::from_secs(parse_or(&get, "BREAKER_WINDOW_SECONDS", 60)?),
                    cooldown: Duration::from_secs(parse_or(&get, "BREAKER_COOLDOWN_SECONDS", 30)?),
                },
            },
            orchestrator: OrchestratorConfig {
                max_in_flight: parse_or(&get, "ADVISORY_MAX_IN_FLIGHT", 4)?,
                step_timeout: Duration::from_secs(parse_or(&get, "ADVISORY_STEP_TIMEOUT_SECONDS", 180)?),
            },
            aggregation: AggregationConfig {
                policy: match get("AGGREGATION_POLICY") {
                    Some(policy) => AggregationPolicyKind::from_str(&policy).map_err(anyhow::Error::msg)?,
                    None => AggregationPolicyKind::default(),
                },
                weights: match get("ADVISOR_WEIGHTS") {
                    Some(raw) => parse_weights(&raw)?,
                    None => BTreeMap::new(),
                },
                thresholds: AdviceThresholds {
                    open: parse_or(&get, "ADVICE_OPEN_THRESHOLD", 0.6)?,
                    close: parse_or(&get, "ADVICE_CLOSE_THRESHOLD", 0.65)?,
                    weak_exit: parse_or(&get, "ADVICE_WEAK_EXIT_THRESHOLD", 0.4)?,
                },
            },
            compiler: CompilerConfig {
                precision: parse_or(&get, "ARTEFACT_PRECISION", 4)?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        url::Url::parse(&self.llm.endpoint)
            .with_context(|| format!("Invalid LLM endpoint URL: {}", self.llm.endpoint))?;

        if !(0.0..=2.0).contains(&self.llm.temperature) {
            bail!("LLM_TEMPERATURE must be between 0.0 and 2.0");
        }
        if self.llm.timeout_seconds == 0 {
            bail!("LLM_TIMEOUT_SECONDS must be greater than zero");
        }
        if self.llm.breaker.failure_threshold == 0 {
            bail!("BREAKER_FAILURE_THRESHOLD must be greater than zero");
        }
        if self.orchestrator.max_in_flight == 0 {
            bail!("ADVISORY_MAX_IN_FLIGHT must be greater than zero");
        }
        if self.compiler.precision > 12 {
            bail!("ARTEFACT_PRECISION must be at most 12");
        }
        let t = &self.aggregation.thresholds;
        for (name, value) in [("open", t.open), ("close", t.close), ("weak_exit", t.weak_exit)] {
            if !(0.0..=1.0).contains(&value) {
                bail!("Advice threshold '{}' must be between 0.0 and 1.0", name);
            }
        }
        Ok(())
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid {} value: {}", key, raw)),
        None => Ok(default),
    }
}

/// Parse `name=weight,name=weight`
fn parse_weights(raw: &str) -> Result<BTreeMap<String, f64>> {
    let mut weights = BTreeMap::new();
    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (name, weight) = entry
            .split_once('=')
            .with_context(|| format!("Invalid ADVISOR_WEIGHTS entry '{}', expected name=weight", entry))?;
        let weight: f64 = weight
            .trim()
            .parse()
            .with_context(|| format!("Invalid weight for advisor '{}'", name.trim()))?;
        if !weight.is_finite() || weight < 0.0 {
            bail!("Weight for advisor '{}' must be a non-negative number", name.trim());
        }
        weights.insert(name.trim().to_string(), weight);
    }
    Ok(weights)
}
