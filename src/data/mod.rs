//! Market snapshot handed to every advisor once per decision cycle
//! plus the compiler that turns it into prompt-ready text

pub mod artefacts;

pub use artefacts::{ArtefactCompiler, ArtefactRequest, CompilerConfig, DataArtefact, OutputMode};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::errors::MarketStateError;

/// One OHLCV bar
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    pub fn new(open: f64, high: f64, low: f64, close: f64, volume: f64) -> Self {
        Self {
            open,
            high,
            low,
            close,
            volume,
        }
    }
}

/// Identity of the strategy that owns the cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyIdentity {
    pub name: String,
    pub symbol: String,
    #[serde(default = "default_quote_currency")]
    pub quote_currency: String,
}

fn default_quote_currency() -> String {
    "USD".to_string()
}

impl StrategyIdentity {
    pub fn new(name: impl Into<String>, symbol: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            symbol: symbol.into(),
            quote_currency: default_quote_currency(),
        }
    }
}

/// Immutable snapshot of market data for one decision cycle
///
/// Fields are private so that every instance has passed [`MarketState::new`]'s
/// validation; deserialized snapshots are validated through the same path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawMarketState")]
pub struct MarketState {
    strategy: StrategyIdentity,
    timestamp: Vec<DateTime<Utc>>,
    ohlcv: Vec<Candle>,
    indicators: BTreeMap<String, f64>,
}

#[derive(Deserialize)]
struct RawMarketState {
    strategy: StrategyIdentity,
    timestamp: Vec<DateTime<Utc>>,
    ohlcv: Vec<Candle>,
    #[serde(default)]
    indicators: BTreeMap<String, f64>,
}

impl TryFrom<RawMarketState> for MarketState {
    type Error = MarketStateError;

    fn try_from(raw: RawMarketState) -> Result<Self, Self::Error> {
        MarketState::new(raw.strategy, raw.timestamp, raw.ohlcv, raw.indicators)
    }
}

impl MarketState {
    /// Build a validated snapshot
    pub fn new(
        strategy: StrategyIdentity,
        timestamp: Vec<DateTime<Utc>>,
        ohlcv: Vec<Candle>,
        indicators: BTreeMap<String, f64>,
    ) -> Result<Self, MarketStateError> {
        validation::validate_series(&timestamp, &ohlcv)?;
        validation::validate_indicators(&indicators)?;

        Ok(Self {
            strategy,
            timestamp,
            ohlcv,
            indicators,
        })
    }

    pub fn strategy(&self) -> &StrategyIdentity {
        &self.strategy
    }

    pub fn timestamps(&self) -> &[DateTime<Utc>] {
        &self.timestamp
    }

    pub fn candles(&self) -> &[Candle] {
        &self.ohlcv
    }

    pub fn indicators(&self) -> &BTreeMap<String, f64> {
        &self.indicators
    }

    pub fn indicator(&self, name: &str) -> Option<f64> {
        self.indicators.get(name).copied()
    }

    /// Last `lookback` rows as (timestamp, candle) pairs, oldest first
    pub fn recent(&self, lookback: usize) -> impl Iterator<Item = (&DateTime<Utc>, &Candle)> {
        let start = self.ohlcv.len().saturating_sub(lookback);
        self.timestamp[start..].iter().zip(self.ohlcv[start..].iter())
    }

    pub fn len(&self) -> usize {
        self.ohlcv.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ohlcv.is_empty()
    }
}

/// Validation helpers
pub mod validation {
    use super::*;

    /// Validate the time series shape and OHLC relationships
    pub fn validate_series(timestamps: &[DateTime<Utc>], ohlcv: &[Candle]) -> Result<(), MarketStateError> {
        if timestamps.len() != ohlcv.len() {
            return Err(MarketStateError::LengthMismatch {
                timestamps: timestamps.len(),
                candles: ohlcv.len(),
            });
        }

        for (index, pair) in timestamps.windows(2).enumerate() {
            if pair[1] <= pair[0] {
                return Err(MarketStateError::Unordered { index: index + 1 });
            }
        }

        for candle in ohlcv {
            validate_candle(candle)?;
        }

        Ok(())
    }

    /// Validate a single OHLCV bar
    pub fn validate_candle(candle: &Candle) -> Result<(), MarketStateError> {
        let fields = [
            ("open", candle.open),
            ("high", candle.high),
            ("low", candle.low),
            ("close", candle.close),
            ("volume", candle.volume),
        ];
        for (field, value) in fields {
            if !value.is_finite() {
                return Err(MarketStateError::validation_error(field, "value must be finite"));
            }
        }

        if candle.open <= 0.0 || candle.high <= 0.0 || candle.low <= 0.0 || candle.close <= 0.0 {
            return Err(MarketStateError::validation_error("price", "prices must be positive"));
        }

        if candle.volume < 0.0 {
            return Err(MarketStateError::validation_error("volume", "Volume cannot be negative"));
        }

        if candle.high < candle.low {
            return Err(MarketStateError::validation_error(
                "high_low",
                "High price cannot be less than low price",
            ));
        }

        Ok(())
    }

    /// Indicator values must be finite numbers under non-empty names
    pub fn validate_indicators(indicators: &BTreeMap<String, f64>) -> Result<(), MarketStateError> {
        for (name, value) in indicators {
            if name.trim().is_empty() {
                return Err(MarketStateError::validation_error("indicators", "indicator name cannot be empty"));
            }
            if !value.is_finite() {
                return Err(MarketStateError::Validation {
                    field: format!("indicators.{}", name),
                    message: "value must be finite".to_string(),
                });
            }
        }
        Ok(())
    }
}
