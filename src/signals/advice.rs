//! Maps a combined decision onto a concrete action given the current position

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::{CombinedDecision, Direction};

/// Net position held by the strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionSide {
    #[default]
    Flat,
    Long,
    Short,
}

impl FromStr for PositionSide {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "flat" | "none" => Ok(PositionSide::Flat),
            "long" => Ok(PositionSide::Long),
            "short" => Ok(PositionSide::Short),
            other => Err(format!("Invalid position: {}. Must be flat, long or short", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeAction {
    Buy,
    Sell,
    Close,
    None,
}

impl fmt::Display for TradeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TradeAction::Buy => "buy",
            TradeAction::Sell => "sell",
            TradeAction::Close => "close",
            TradeAction::None => "none",
        };
        f.write_str(s)
    }
}

/// Confidence thresholds for acting on a decision
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AdviceThresholds {
    /// Minimum confidence to open a position from flat
    pub open: f64,
    /// Minimum opposing confidence to close an open position
    pub close: f64,
    /// Below this, a directional decision is too weak to keep a position open
    pub weak_exit: f64,
}

impl Default for AdviceThresholds {
    fn default() -> Self {
        Self {
            open: 0.6,
            close: 0.65,
            weak_exit: 0.4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeAdvice {
    pub action: TradeAction,
    pub confidence: f64,
    pub reasoning: String,
}

impl TradeAdvice {
    /// Derive an action from the decision and the current position
    pub fn from_decision(decision: &CombinedDecision, position: PositionSide, thresholds: &AdviceThresholds) -> Self {
        let direction = decision.direction;
        let confidence = decision.confidence;

        match position {
            PositionSide::Flat => match direction {
                Direction::Bullish if confidence > thresholds.open => Self::act(
                    TradeAction::Buy,
                    confidence,
                    format!("Buy on {} consensus ({:.2} confidence)", direction, confidence),
                ),
                Direction::Bearish if confidence > thresholds.open => Self::act(
                    TradeAction::Sell,
                    confidence,
                    format!("Sell on {} consensus ({:.2} confidence)", direction, confidence),
                ),
                Direction::None => Self::act(TradeAction::None, confidence, "No clear trading signal".to_string()),
                _ => Self::act(
                    TradeAction::None,
                    confidence,
                    format!(
                        "No position, {} consensus but confidence ({:.2}) below threshold",
                        direction, confidence
                    ),
                ),
            },
            PositionSide::Long | PositionSide::Short => {
                let opposing = matches!(
                    (position, direction),
                    (PositionSide::Long, Direction::Bearish) | (PositionSide::Short, Direction::Bullish)
                );
                let directional = matches!(direction, Direction::Bullish | Direction::Bearish);
                let side = if position == PositionSide::Long { "long" } else { "short" };

                if opposing && confidence > thresholds.close {
                    Self::act(
                        TradeAction::Close,
                        confidence,
                        format!("Close {} position on {} consensus ({:.2} confidence)", side, direction, confidence),
                    )
                } else if directional && confidence < thresholds.weak_exit {
                    Self::act(
                        TradeAction::Close,
                        0.5,
                        format!(
                            "Close {} position on weak {} consensus ({:.2} confidence)",
                            side, direction, confidence
                        ),
                    )
                } else {
                    Self::act(
                        TradeAction::None,
                        confidence,
                        format!("Hold {} position, {} consensus with {:.2} confidence", side, direction, confidence),
                    )
                }
            }
        }
    }

    fn act(action: TradeAction, confidence: f64, reasoning: String) -> Self {
        Self {
            action,
            confidence,
            reasoning,
        }
    }
}
