//! Orchestrator module for driving advisory decision cycles
//! Runs every enabled advisor through artefacts → prompt → inference → validation and aggregates the result

pub mod advisory;

pub use advisory::AdvisoryOrchestrator;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::errors::{AdvisoryError, InferenceError};

/// Phase of the current decision cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleState {
    Idle,
    Collecting,
    AwaitingInference,
    Validating,
    Aggregating,
    Done,
    Failed,
}

impl fmt::Display for CycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CycleState::Idle => "idle",
            CycleState::Collecting => "collecting",
            CycleState::AwaitingInference => "awaiting_inference",
            CycleState::Validating => "validating",
            CycleState::Aggregating => "aggregating",
            CycleState::Done => "done",
            CycleState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Pipeline stage at which an advisor failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Artefacts,
    Inference,
    Validation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    ArtefactNotFound,
    InvalidMarketState,
    Timeout,
    BackendUnavailable,
    Inference,
    Parse,
}

/// One advisor's failure within a cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdvisorFailure {
    pub advisor: String,
    pub stage: PipelineStage,
    pub kind: FailureKind,
    pub message: String,
    /// Model output that failed validation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_response: Option<String>,
}

impl AdvisorFailure {
    pub fn from_error(advisor: impl Into<String>, stage: PipelineStage, err: AdvisoryError) -> Self {
        let message = err.to_string();
        let (kind, raw_response) = match err {
            AdvisoryError::ArtefactNotFound { .. } => (FailureKind::ArtefactNotFound, None),
            AdvisoryError::MarketState(_) => (FailureKind::InvalidMarketState, None),
            AdvisoryError::Inference(InferenceError::Timeout { .. }) => (FailureKind::Timeout, None),
            AdvisoryError::Inference(InferenceError::BackendUnavailable { .. }) => (FailureKind::BackendUnavailable, None),
            AdvisoryError::Parse(parse) => (FailureKind::Parse, Some(parse.raw)),
            _ => (FailureKind::Inference, None),
        };

        Self {
            advisor: advisor.into(),
            stage,
            kind,
            message,
            raw_response,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// Maximum advisors waiting on the backend at once
    pub max_in_flight: usize,

    /// Deadline for a whole cycle when the caller does not pass one
    pub step_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 4,
            step_timeout: Duration::from_secs(180),
        }
    }
}
