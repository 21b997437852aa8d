//! Signal Aggregation
//!
//! Combines the per-advisor signals of one cycle into a single decision.
//! Voting policies are pluggable; the resolution rules around them are fixed:
//! `none` never votes, a tie for the top score resolves to `neutral`, and the
//! result depends only on the signals and their order.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use super::{Direction, RiskLevel, Signal};
use crate::orchestrator::AdvisorFailure;

/// Scores closer than this are treated as a tie
const TIE_EPSILON: f64 = 1e-9;

/// A voting rule over the non-`none` signals of a cycle
pub trait AggregationPolicy: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    /// Score for every direction that received at least one vote
    fn tally(&self, votes: &[&Signal]) -> BTreeMap<Direction, f64>;

    /// Combined confidence from the signals agreeing with the winner
    fn blend(&self, agreeing: &[&Signal]) -> f64 {
        mean_confidence(agreeing)
    }
}

fn mean_confidence(signals: &[&Signal]) -> f64 {
    if signals.is_empty() {
        return 0.0;
    }
    signals.iter().map(|s| s.confidence).sum::<f64>() / signals.len() as f64
}

/// One vote per signal
#[derive(Debug, Clone, Default)]
pub struct MajorityVote;

impl AggregationPolicy for MajorityVote {
    fn name(&self) -> &'static str {
        "majority"
    }

    fn tally(&self, votes: &[&Signal]) -> BTreeMap<Direction, f64> {
        let mut scores = BTreeMap::new();
        for signal in votes {
            *scores.entry(signal.direction).or_insert(0.0) += 1.0;
        }
        scores
    }
}

/// Votes weighted by a configured per-advisor reliability
///
/// Advisors without an explicit weight count as 1.0. Confidence is the
/// reliability-weighted mean of the agreeing signals.
#[derive(Debug, Clone, Default)]
pub struct ReliabilityWeighted {
    weights: BTreeMap<String, f64>,
}

impl ReliabilityWeighted {
    pub fn new(weights: BTreeMap<String, f64>) -> Self {
        let weights = weights
            .into_iter()
            .map(|(name, w)| (name, if w.is_finite() { w.max(0.0) } else { 0.0 }))
            .collect();
        Self { weights }
    }

    pub fn weight(&self, advisor: &str) -> f64 {
        self.weights.get(advisor).copied().unwrap_or(1.0)
    }
}

impl AggregationPolicy for ReliabilityWeighted {
    fn name(&self) -> &'static str {
        "reliability"
    }

    fn tally(&self, votes: &[&Signal]) -> BTreeMap<Direction, f64> {
        let mut scores = BTreeMap::new();
        for signal in votes {
            *scores.entry(signal.direction).or_insert(0.0) += self.weight(&signal.advisor);
        }
        scores
    }

    fn blend(&self, agreeing: &[&Signal]) -> f64 {
        let total: f64 = agreeing.iter().map(|s| self.weight(&s.advisor)).sum();
        if total <= 0.0 {
            return mean_confidence(agreeing);
        }
        agreeing
            .iter()
            .map(|s| self.weight(&s.advisor) * s.confidence)
            .sum::<f64>()
            / total
    }
}

/// Each signal votes with its own confidence
#[derive(Debug, Clone, Default)]
pub struct ConfidenceWeighted;

impl AggregationPolicy for ConfidenceWeighted {
    fn name(&self) -> &'static str {
        "confidence"
    }

    fn tally(&self, votes: &[&Signal]) -> BTreeMap<Direction, f64> {
        let mut scores = BTreeMap::new();
        for signal in votes {
            *scores.entry(signal.direction).or_insert(0.0) += signal.confidence;
        }
        scores
    }
}

/// Policy selector used by configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregationPolicyKind {
    #[default]
    Majority,
    Reliability,
    Confidence,
}

impl AggregationPolicyKind {
    pub fn build(self, weights: &BTreeMap<String, f64>) -> Box<dyn AggregationPolicy> {
        match self {
            AggregationPolicyKind::Majority => Box::new(MajorityVote),
            AggregationPolicyKind::Reliability => Box::new(ReliabilityWeighted::new(weights.clone())),
            AggregationPolicyKind::Confidence => Box::new(ConfidenceWeighted),
        }
    }
}

impl FromStr for AggregationPolicyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "majority" | "majority_vote" => Ok(AggregationPolicyKind::Majority),
            "reliability" | "weighted" | "reliability_weighted" => Ok(AggregationPolicyKind::Reliability),
            "confidence" | "confidence_weighted" => Ok(AggregationPolicyKind::Confidence),
            other => Err(format!(
                "Invalid aggregation policy: {}. Must be majority, reliability or confidence",
                other
            )),
        }
    }
}

/// Resolved judgment across all advisors of one cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombinedDecision {
    pub direction: Direction,
    /// Always within [0.0, 1.0]
    pub confidence: f64,
    /// Highest risk level reported by the agreeing signals
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk_level: Option<RiskLevel>,
    pub policy: String,
    /// Every signal of the cycle in registration order, degraded ones included
    pub contributing_signals: Vec<Signal>,
    pub diagnostics: Vec<AdvisorFailure>,
}

impl CombinedDecision {
    pub fn signal_for(&self, advisor: &str) -> Option<&Signal> {
        self.contributing_signals.iter().find(|s| s.advisor == advisor)
    }

    pub fn usable_count(&self) -> usize {
        self.contributing_signals.iter().filter(|s| s.is_usable()).count()
    }
}

/// Applies a policy plus the fixed resolution rules
#[derive(Debug)]
pub struct SignalAggregator {
    policy: Box<dyn AggregationPolicy>,
}

impl Default for SignalAggregator {
    fn default() -> Self {
        Self::new(Box::new(MajorityVote))
    }
}

impl SignalAggregator {
    pub fn new(policy: Box<dyn AggregationPolicy>) -> Self {
        Self { policy }
    }

    pub fn from_kind(kind: AggregationPolicyKind, weights: &BTreeMap<String, f64>) -> Self {
        Self::new(kind.build(weights))
    }

    pub fn policy_name(&self) -> &'static str {
        self.policy.name()
    }

    /// Combine one cycle's signals
    pub fn combine(&self, signals: Vec<Signal>, diagnostics: Vec<AdvisorFailure>) -> CombinedDecision {
        let votes: Vec<&Signal> = signals
            .iter()
            .filter(|s| s.is_usable() && s.direction.is_vote())
            .collect();

        let (direction, confidence, risk_level) = if votes.is_empty() {
            (Direction::None, 0.0, None)
        } else {
            let direction = resolve(&self.policy.tally(&votes));
            let agreeing: Vec<&Signal> = votes.iter().copied().filter(|s| s.direction == direction).collect();
            let confidence = self.policy.blend(&agreeing);
            let confidence = if confidence.is_finite() { confidence.clamp(0.0, 1.0) } else { 0.0 };
            let risk_level = agreeing.iter().filter_map(|s| s.risk_level).max();
            (direction, confidence, risk_level)
        };

        CombinedDecision {
            direction,
            confidence,
            risk_level,
            policy: self.policy.name().to_string(),
            contributing_signals: signals,
            diagnostics,
        }
    }
}

/// Unique top scorer, or `neutral` when the top score is shared
fn resolve(scores: &BTreeMap<Direction, f64>) -> Direction {
    let Some(best) = scores.values().copied().reduce(f64::max) else {
        return Direction::None;
    };
    let leaders: Vec<Direction> = scores
        .iter()
        .filter(|(_, score)| (best - **score).abs() <= TIE_EPSILON)
        .map(|(direction, _)| *direction)
        .collect();

    match leaders.as_slice() {
        [single] => *single,
        _ => Direction::Neutral,
    }
}
