//! Structured advisor judgments, their validation and their combination

pub mod advice;
pub mod aggregator;
pub mod validator;

pub use advice::{AdviceThresholds, PositionSide, TradeAction, TradeAdvice};
pub use aggregator::{AggregationPolicy, AggregationPolicyKind, CombinedDecision, SignalAggregator};
pub use validator::{parse, ResponseSchema};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Direction of an advisor's judgment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Bullish,
    Bearish,
    Neutral,
    None,
}

impl Direction {
    pub const ALL: [Direction; 4] = [
        Direction::Bullish,
        Direction::Bearish,
        Direction::Neutral,
        Direction::None,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Bullish => "bullish",
            Direction::Bearish => "bearish",
            Direction::Neutral => "neutral",
            Direction::None => "none",
        }
    }

    /// `none` abstains from any vote
    pub fn is_vote(&self) -> bool {
        !matches!(self, Direction::None)
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bullish" => Ok(Direction::Bullish),
            "bearish" => Ok(Direction::Bearish),
            "neutral" => Ok(Direction::Neutral),
            "none" => Ok(Direction::None),
            other => Err(format!(
                "Invalid direction: {}. Must be bullish, bearish, neutral or none",
                other
            )),
        }
    }
}

macro_rules! qualifier_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(rename_all = "lowercase")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_ascii_lowercase().as_str() {
                    $($text => Ok($name::$variant),)+
                    other => Err(format!("Invalid {}: {}", stringify!($name), other)),
                }
            }
        }
    };
}

qualifier_enum!(TrendStrength { Weak => "weak", Medium => "medium", Strong => "strong" });
qualifier_enum!(TimeFrame { Short => "short", Medium => "medium", Long => "long" });
qualifier_enum!(RiskLevel { Low => "low", Medium => "medium", High => "high" });

/// Validated output of one advisor for one cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub advisor: String,
    pub direction: Direction,
    /// Always within [0.0, 1.0]
    pub confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strength: Option<TrendStrength>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_frame: Option<TimeFrame>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk_level: Option<RiskLevel>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub key_support_levels: Vec<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub key_resistance_levels: Vec<f64>,
    pub reasoning: String,
    /// Set when the advisor failed and this signal stands in for it
    #[serde(default)]
    pub degraded: bool,
}

impl Signal {
    /// Create a signal, clamping confidence into range and forcing `none` to 0.0
    pub fn new(advisor: impl Into<String>, direction: Direction, confidence: f64, reasoning: impl Into<String>) -> Self {
        let confidence = if direction.is_vote() && confidence.is_finite() {
            confidence.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Self {
            advisor: advisor.into(),
            direction,
            confidence,
            strength: None,
            time_frame: None,
            risk_level: None,
            key_support_levels: Vec::new(),
            key_resistance_levels: Vec::new(),
            reasoning: reasoning.into(),
            degraded: false,
        }
    }

    /// Stand-in for an advisor whose pipeline failed this cycle
    pub fn degraded(advisor: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            degraded: true,
            ..Self::new(advisor, Direction::None, 0.0, reason)
        }
    }

    pub fn with_strength(mut self, strength: TrendStrength) -> Self {
        self.strength = Some(strength);
        self
    }

    pub fn with_time_frame(mut self, time_frame: TimeFrame) -> Self {
        self.time_frame = Some(time_frame);
        self
    }

    pub fn with_risk_level(mut self, risk_level: RiskLevel) -> Self {
        self.risk_level = Some(risk_level);
        self
    }

    /// A validated signal, as opposed to a degraded stand-in
    pub fn is_usable(&self) -> bool {
        !self.degraded
    }
}
