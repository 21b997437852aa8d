//! Advisors
//!
//! An advisor is pure configuration: which artefacts it needs, how it frames
//! the question and what answer shape it accepts. It holds no references to
//! other advisors and no per-cycle state.

pub mod presets;
pub mod registry;
pub mod sanitize;

pub use registry::AdvisorRegistry;

use serde::{Deserialize, Serialize};

use crate::data::{ArtefactCompiler, ArtefactRequest, MarketState, StrategyIdentity};
use crate::errors::{AdvisoryResult, ParseError, RegistryError};
use crate::llm::{PromptSpec, RetryPolicy};
use crate::signals::{validator, ResponseSchema, Signal};
use sanitize::sanitize_label;

/// Template used when an advisor does not bring its own
pub const DEFAULT_PROMPT_TEMPLATE: &str =
    "Analyze the market data below for strategy '{strategy}' on {symbol} and give your signal.\n\n{data}";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Advisor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// System instructions describing the advisor's role and method
    pub instructions: String,
    /// User message; `{data}`, `{strategy}` and `{symbol}` are substituted
    #[serde(default = "default_template")]
    pub prompt_template: String,
    pub artefacts: Vec<ArtefactRequest>,
    #[serde(default)]
    pub schema: ResponseSchema,
    #[serde(default)]
    pub retry: Option<RetryPolicy>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub model: Option<String>,
}

fn default_template() -> String {
    DEFAULT_PROMPT_TEMPLATE.to_string()
}

fn default_enabled() -> bool {
    true
}

impl Advisor {
    pub fn new(name: impl Into<String>, instructions: impl Into<String>, artefacts: Vec<ArtefactRequest>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            instructions: instructions.into(),
            prompt_template: default_template(),
            artefacts,
            schema: ResponseSchema::default(),
            retry: None,
            enabled: true,
            model: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.prompt_template = template.into();
        self
    }

    pub fn with_schema(mut self, schema: ResponseSchema) -> Self {
        self.schema = schema;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Reject configurations that could never produce a prompt
    pub fn validate(&self) -> Result<(), RegistryError> {
        let invalid = |reason: &str| RegistryError::InvalidAdvisor {
            name: self.name.clone(),
            reason: reason.to_string(),
        };

        if self.name.trim().is_empty() {
            return Err(invalid("name cannot be empty"));
        }
        if !self
            .name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(invalid("name may only contain ASCII letters, digits, '_' and '-'"));
        }
        if self.instructions.trim().is_empty() {
            return Err(invalid("instructions cannot be empty"));
        }
        if self.artefacts.is_empty() {
            return Err(invalid("at least one artefact is required"));
        }
        let zero_lookback = self.artefacts.iter().any(|artefact| {
            matches!(
                artefact,
                ArtefactRequest::Candles { lookback: 0, .. } | ArtefactRequest::Closes { lookback: 0 }
            )
        });
        if zero_lookback {
            return Err(invalid("series artefacts need a lookback of at least one bar"));
        }
        if self.schema.direction_keys.is_empty() {
            return Err(invalid("schema needs at least one direction key"));
        }
        if self.schema.allowed_directions.is_empty() {
            return Err(invalid("schema needs at least one allowed direction"));
        }
        let (low, high) = self.schema.confidence_range;
        if !(0.0..=1.0).contains(&low) || !(0.0..=1.0).contains(&high) || low > high {
            return Err(invalid("confidence range must lie within [0, 1]"));
        }
        Ok(())
    }

    /// Build the full prompt from already compiled artefact text
    pub fn render_prompt(&self, compiled: &str, strategy: &StrategyIdentity) -> PromptSpec {
        let mut user = self
            .prompt_template
            .replace("{strategy}", &sanitize_label(&strategy.name))
            .replace("{symbol}", &sanitize_label(&strategy.symbol));

        if user.contains("{data}") {
            user = user.replace("{data}", compiled);
        } else {
            user.push_str("\n\n");
            user.push_str(compiled);
        }

        PromptSpec {
            advisor: self.name.clone(),
            system: format!("{}\n\n{}", self.instructions.trim_end(), self.schema.format_instructions()),
            user,
            model: self.model.clone(),
            retry: self.retry,
        }
    }

    /// Compile this advisor's artefacts and render the prompt
    pub fn build_prompt(&self, compiler: &ArtefactCompiler, state: &MarketState) -> AdvisoryResult<PromptSpec> {
        let compiled = compiler.compile(&self.artefacts, state)?;
        Ok(self.render_prompt(&compiled, state.strategy()))
    }

    pub fn response_schema(&self) -> &ResponseSchema {
        &self.schema
    }

    /// Validate raw model output into a signal attributed to this advisor
    pub fn parse_response(&self, raw: &str) -> Result<Signal, ParseError> {
        let mut signal = validator::parse(raw, &self.schema)?;
        signal.advisor = self.name.clone();
        Ok(signal)
    }
}
