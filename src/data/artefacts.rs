//! Data Artefact Compiler
//!
//! Extracts named bundles from a [`MarketState`] and renders them as text for
//! inclusion in a prompt. Numbers are printed at a fixed precision and every
//! time series uses the same table layout (one row per timestamp, one column
//! per field, oldest row first) no matter which advisor asked for it.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::MarketState;
use crate::advisor::sanitize::sanitize_label;
use crate::errors::{AdvisoryError, AdvisoryResult};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// How a non-series artefact is laid out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputMode {
    Tabular,
    KeyValue,
}

/// One artefact an advisor needs in its prompt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ArtefactRequest {
    /// Last `lookback` OHLC bars, optionally with volume
    Candles {
        lookback: usize,
        #[serde(default = "default_include_volume")]
        include_volume: bool,
    },
    /// Last `lookback` closing prices
    Closes { lookback: usize },
    /// Named indicator values; an empty list means every indicator present
    Indicators {
        #[serde(default)]
        names: Vec<String>,
        mode: OutputMode,
    },
    /// Owning strategy's identity and series coverage
    Strategy { mode: OutputMode },
}

fn default_include_volume() -> bool {
    true
}

impl ArtefactRequest {
    pub fn name(&self) -> &'static str {
        match self {
            ArtefactRequest::Candles { .. } => "candles",
            ArtefactRequest::Closes { .. } => "closes",
            ArtefactRequest::Indicators { .. } => "indicators",
            ArtefactRequest::Strategy { .. } => "strategy",
        }
    }

    /// Time series always render as tables
    pub fn output_mode(&self) -> OutputMode {
        match self {
            ArtefactRequest::Candles { .. } | ArtefactRequest::Closes { .. } => OutputMode::Tabular,
            ArtefactRequest::Indicators { mode, .. } | ArtefactRequest::Strategy { mode } => *mode,
        }
    }
}

/// Extracted content of one artefact
#[derive(Debug, Clone, PartialEq)]
pub enum ArtefactBody {
    Table {
        headers: Vec<String>,
        rows: Vec<Vec<String>>,
    },
    KeyValue(Vec<(String, String)>),
}

/// A named bundle extracted from the market state for one advisor
#[derive(Debug, Clone, PartialEq)]
pub struct DataArtefact {
    pub name: String,
    pub title: String,
    pub body: ArtefactBody,
}

impl DataArtefact {
    pub fn output_mode(&self) -> OutputMode {
        match self.body {
            ArtefactBody::Table { .. } => OutputMode::Tabular,
            ArtefactBody::KeyValue(_) => OutputMode::KeyValue,
        }
    }

    /// Render as a markdown section
    pub fn render(&self) -> String {
        let mut out = format!("## {}\n", self.title);
        match &self.body {
            ArtefactBody::Table { headers, rows } => {
                out.push_str(&format!("| {} |\n", headers.join(" | ")));
                out.push_str(&format!("|{}\n", " --- |".repeat(headers.len())));
                for row in rows {
                    out.push_str(&format!("| {} |\n", row.join(" | ")));
                }
            }
            ArtefactBody::KeyValue(pairs) => {
                for (key, value) in pairs {
                    out.push_str(&format!("- {}: {}\n", key, value));
                }
            }
        }
        out
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompilerConfig {
    /// Decimal places for every number in the output
    pub precision: usize,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self { precision: 4 }
    }
}

/// Turns artefact requests plus a market state into prompt text
#[derive(Debug, Clone, Default)]
pub struct ArtefactCompiler {
    config: CompilerConfig,
}

impl ArtefactCompiler {
    pub fn new(config: CompilerConfig) -> Self {
        Self { config }
    }

    /// Compile the requested artefacts, in order, into one text block
    ///
    /// Any missing field fails the whole compilation.
    pub fn compile(&self, requests: &[ArtefactRequest], state: &MarketState) -> AdvisoryResult<String> {
        let artefacts = requests
            .iter()
            .map(|request| self.extract(request, state))
            .collect::<AdvisoryResult<Vec<_>>>()?;

        debug!(artefacts = artefacts.len(), "Compiled data artefacts");

        Ok(artefacts
            .iter()
            .map(DataArtefact::render)
            .collect::<Vec<_>>()
            .join("\n"))
    }

    /// Extract a single artefact
    pub fn extract(&self, request: &ArtefactRequest, state: &MarketState) -> AdvisoryResult<DataArtefact> {
        let currency = sanitize_label(&state.strategy().quote_currency);

        match request {
            ArtefactRequest::Candles {
                lookback,
                include_volume,
            } => {
                if state.is_empty() {
                    return Err(AdvisoryError::artefact_not_found("candles", "ohlcv"));
                }
                let mut headers = vec![
                    "timestamp (UTC)".to_string(),
                    format!("open ({})", currency),
                    format!("high ({})", currency),
                    format!("low ({})", currency),
                    format!("close ({})", currency),
                ];
                if *include_volume {
                    headers.push("volume (units)".to_string());
                }

                let rows: Vec<Vec<String>> = state
                    .recent(*lookback)
                    .map(|(ts, candle)| {
                        let mut row = vec![
                            ts.format(TIMESTAMP_FORMAT).to_string(),
                            self.number(candle.open),
                            self.number(candle.high),
                            self.number(candle.low),
                            self.number(candle.close),
                        ];
                        if *include_volume {
                            row.push(self.number(candle.volume));
                        }
                        row
                    })
                    .collect();

                Ok(DataArtefact {
                    name: request.name().to_string(),
                    title: format!("Price history - last {} bars", rows.len()),
                    body: ArtefactBody::Table { headers, rows },
                })
            }
            ArtefactRequest::Closes { lookback } => {
                if state.is_empty() {
                    return Err(AdvisoryError::artefact_not_found("closes", "ohlcv"));
                }
                let headers = vec!["timestamp (UTC)".to_string(), format!("close ({})", currency)];
                let rows: Vec<Vec<String>> = state
                    .recent(*lookback)
                    .map(|(ts, candle)| vec![ts.format(TIMESTAMP_FORMAT).to_string(), self.number(candle.close)])
                    .collect();

                Ok(DataArtefact {
                    name: request.name().to_string(),
                    title: format!("Closing prices - last {} bars", rows.len()),
                    body: ArtefactBody::Table { headers, rows },
                })
            }
            ArtefactRequest::Indicators { names, mode } => {
                let values: Vec<(String, String)> = if names.is_empty() {
                    if state.indicators().is_empty() {
                        return Err(AdvisoryError::artefact_not_found("indicators", "indicators"));
                    }
                    state
                        .indicators()
                        .iter()
                        .map(|(name, value)| (sanitize_label(name), self.number(*value)))
                        .collect()
                } else {
                    names
                        .iter()
                        .map(|name| {
                            state
                                .indicator(name)
                                .map(|value| (sanitize_label(name), self.number(value)))
                                .ok_or_else(|| AdvisoryError::artefact_not_found("indicators", name.as_str()))
                        })
                        .collect::<AdvisoryResult<_>>()?
                };

                let body = match mode {
                    OutputMode::Tabular => ArtefactBody::Table {
                        headers: vec!["indicator".to_string(), "value".to_string()],
                        rows: values.into_iter().map(|(k, v)| vec![k, v]).collect(),
                    },
                    OutputMode::KeyValue => ArtefactBody::KeyValue(values),
                };

                Ok(DataArtefact {
                    name: request.name().to_string(),
                    title: "Indicators (latest values)".to_string(),
                    body,
                })
            }
            ArtefactRequest::Strategy { mode } => {
                let strategy = state.strategy();
                let last_bar = state
                    .timestamps()
                    .last()
                    .map(|ts| ts.format(TIMESTAMP_FORMAT).to_string())
                    .unwrap_or_else(|| "n/a".to_string());
                let pairs = vec![
                    ("strategy".to_string(), sanitize_label(&strategy.name)),
                    ("symbol".to_string(), sanitize_label(&strategy.symbol)),
                    ("quote_currency".to_string(), currency),
                    ("bars".to_string(), state.len().to_string()),
                    ("last_bar (UTC)".to_string(), last_bar),
                ];

                let body = match mode {
                    OutputMode::KeyValue => ArtefactBody::KeyValue(pairs),
                    OutputMode::Tabular => {
                        let (headers, row): (Vec<_>, Vec<_>) = pairs.into_iter().unzip();
                        ArtefactBody::Table {
                            headers,
                            rows: vec![row],
                        }
                    }
                };

                Ok(DataArtefact {
                    name: request.name().to_string(),
                    title: "Strategy".to_string(),
                    body,
                })
            }
        }
    }

    fn number(&self, value: f64) -> String {
        // Avoid printing "-0.0000"
        let value = if value == 0.0 { 0.0 } else { value };
        format!("{:.*}", self.config.precision, value)
    }
}
