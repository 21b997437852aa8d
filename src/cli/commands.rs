use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::advisor::{presets, Advisor};
use crate::config::Config;
use crate::data::MarketState;
use crate::orchestrator::AdvisoryOrchestrator;
use crate::signals::{PositionSide, TradeAdvice};

async fn load_market_state(path: &Path) -> Result<MarketState> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read market state from {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Invalid market state in {}", path.display()))
}

async fn load_advisor_file(path: &Path) -> Result<Vec<Advisor>> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read advisors from {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Invalid advisor definitions in {}", path.display()))
}

/// Resolve preset names; an empty selection means every preset
fn select_presets(names: &[String]) -> Result<Vec<Advisor>> {
    if names.is_empty() {
        return Ok(presets::all());
    }
    names
        .iter()
        .map(|name| presets::by_name(name).with_context(|| format!("Unknown advisor preset '{}'", name)))
        .collect()
}

/// Run one advisory cycle and print the decision plus trade advice
pub async fn analyze(
    input: PathBuf,
    advisors: Vec<String>,
    advisors_file: Option<PathBuf>,
    position: PositionSide,
    timeout: Option<u64>,
) -> Result<()> {
    let config = Config::load()?;
    let market_state = load_market_state(&input).await?;

    let mut selected = select_presets(&advisors)?;
    if let Some(path) = advisors_file {
        selected.extend(load_advisor_file(&path).await?);
    }

    let orchestrator = AdvisoryOrchestrator::from_config(&config)?;
    orchestrator.add_advisors(selected).await?;

    let decision = orchestrator
        .step(&market_state, timeout.map(Duration::from_secs))
        .await?;

    for failure in &decision.diagnostics {
        warn!(advisor = %failure.advisor, kind = ?failure.kind, "{}", failure.message);
    }

    let advice = TradeAdvice::from_decision(&decision, position, &config.aggregation.thresholds);

    println!("{}", serde_json::to_string_pretty(&decision)?);
    println!(
        "\nDecision: {} ({:.1}% confidence) -> advice: {} - {}",
        decision.direction,
        decision.confidence * 100.0,
        advice.action,
        advice.reasoning
    );
    Ok(())
}

/// Run a single preset advisor
pub async fn advise(input: PathBuf, advisor: String) -> Result<()> {
    let config = Config::load()?;
    let market_state = load_market_state(&input).await?;
    let preset = presets::by_name(&advisor).with_context(|| format!("Unknown advisor preset '{}'", advisor))?;

    let orchestrator = AdvisoryOrchestrator::from_config(&config)?;
    orchestrator.add_advisor(preset).await?;

    let signal = orchestrator.advise(&advisor, &market_state).await?;
    println!("{}", serde_json::to_string_pretty(&signal)?);
    Ok(())
}

/// Print rendered prompts without contacting a backend
pub async fn render(input: PathBuf, advisors: Vec<String>) -> Result<()> {
    let config = Config::load()?;
    let market_state = load_market_state(&input).await?;

    let orchestrator = AdvisoryOrchestrator::from_config(&config)?;
    orchestrator.add_advisors(select_presets(&advisors)?).await?;

    for (name, prompt) in orchestrator.render_prompts(&market_state).await {
        println!("==================== {} ====================", name);
        match prompt {
            Ok(prompt) => {
                println!("[system]\n{}\n", prompt.system);
                println!("[user]\n{}\n", prompt.user);
            }
            Err(e) => println!("(cannot render: {})\n", e),
        }
    }
    Ok(())
}

pub fn list_advisors() {
    for advisor in presets::all() {
        let artefacts = advisor
            .artefacts
            .iter()
            .map(|a| a.name())
            .collect::<Vec<_>>()
            .join(", ");
        println!("{:<20} {}", advisor.name, advisor.description);
        println!("{:<20} artefacts: {}", "", artefacts);
    }
}

/// Probe the configured backend
pub async fn health() -> Result<()> {
    let config = Config::load()?;
    let orchestrator = AdvisoryOrchestrator::from_config(&config)?;
    let gateway = orchestrator.gateway();

    match gateway.health_check().await {
        Ok(models) => {
            info!("Backend '{}' reachable", gateway.backend_name());
            println!("Backend '{}' at {} is reachable", gateway.backend_name(), config.llm.endpoint);
            if !models.iter().any(|m| m.contains(&config.llm.model)) {
                println!(
                    "Warning: model '{}' not reported by the backend (available: {})",
                    config.llm.model,
                    models.join(", ")
                );
            }
            Ok(())
        }
        Err(e) => bail!("Backend '{}' health check failed: {}", gateway.backend_name(), e),
    }
}
