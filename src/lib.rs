// llm-advisory - Multi-advisor LLM signal engine
// Drives independent advisors through data → prompt → inference → validation
// and combines their structured judgments into one trading decision.

#![deny(clippy::unwrap_used)]

pub mod advisor;
pub mod cli;
pub mod config;
pub mod data;
pub mod errors;
pub mod llm;
pub mod orchestrator;
pub mod signals;

// Re-export commonly used items
pub use advisor::{Advisor, AdvisorRegistry};
pub use config::Config;
pub use data::{ArtefactCompiler, ArtefactRequest, Candle, MarketState, StrategyIdentity};
pub use errors::{AdvisoryError, AdvisoryResult, InferenceError, ParseError, RegistryError};
pub use llm::{BackendConfig, BackendKind, InferenceBackend, InferenceGateway, LLMResponse, PromptSpec, RetryPolicy};
pub use orchestrator::{AdvisorFailure, AdvisoryOrchestrator, CycleState, OrchestratorConfig};
pub use signals::{CombinedDecision, Direction, Signal, SignalAggregator};
