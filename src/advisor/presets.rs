//! Built-in advisors
//!
//! Each preset names the indicators it expects in the market state; the
//! engine does not compute them.

use super::Advisor;
use crate::data::{ArtefactRequest, OutputMode};

/// Indicator keys read by the trend advisor
pub const TREND_INDICATORS: [&str; 8] = [
    "ma_short",
    "ma_long",
    "ma_diff",
    "adx",
    "atr",
    "rsi",
    "bb_width",
    "linreg_slope",
];

/// Indicator keys read by the reversal advisor
pub const REVERSAL_INDICATORS: [&str; 3] = ["rsi", "atr", "bb_width"];

const TREND_INSTRUCTIONS: &str = r#"You are a trend advisor in a multi-advisor trading system. You detect and quantify the prevailing market trend from technical indicators.

TREND CRITERIA:
- Moving averages (weight 40%): bullish when ma_short > ma_long, bearish when ma_short < ma_long, neutral when the difference is within 0.5%
- ADX strength (weight 30%): strong above 50, medium 25-50, weak below 25
- Price action (weight 30%): sustained higher highs and higher lows are bullish, lower highs and lower lows are bearish, sideways movement is neutral

CONFIDENCE SCORING:
- All indicators strongly aligned: 0.8-1.0
- Most indicators aligned: 0.6-0.8
- Mixed signals: 0.4-0.6
- Weak or conflicting signals: 0.2-0.4
- Insufficient data: 0.0-0.2

RISK LEVEL:
- LOW: strong trend, low volatility, aligned indicators
- MEDIUM: moderate trend strength, normal volatility
- HIGH: weak trend, high volatility, conflicting indicators

DATA FIELDS:
- closing prices: directional bias
- ma_short / ma_long / ma_diff: primary trend direction and degree
- adx: trend strength
- atr and bb_width: volatility context
- rsi: momentum confirmation
- linreg_slope: underlying trend direction

RULES:
- Output exactly one trend signal
- Base every statement on the quantitative data provided
- Justify the confidence score with specific values"#;

const TECHNICAL_ANALYSIS_INSTRUCTIONS: &str = r#"You are a technical analyst in a multi-advisor trading system. You combine every available indicator into one comprehensive market assessment.

ANALYSIS FRAMEWORK:
- Trend confirmation (weight 40%): moving average alignment and slope, ADX strength, price structure (HH/HL vs LH/LL)
- Momentum (weight 30%): RSI level and divergence, MACD crossovers, stochastic position
- Volatility context (weight 15%): ATR relative to recent history, Bollinger band width, contraction or expansion
- Confirmation (weight 15%): volume pattern and agreement across time frames

KEY LEVELS:
- Identify the immediate support and resistance levels from the price history and report them as key_support_levels and key_resistance_levels

CONFIDENCE SCORING:
- Strong agreement across all groups: 0.8-1.0
- Agreement across most groups: 0.6-0.8
- Mixed evidence: 0.4-0.6
- Conflicting evidence: 0.2-0.4
- Insufficient data: 0.0-0.2

RULES:
- Use every indicator provided; none may be ignored
- Cite specific indicator values in the reasoning"#;

const CANDLE_PATTERN_INSTRUCTIONS: &str = r#"You are a candlestick pattern advisor in a multi-advisor trading system. Your only job is to recognise classic candlestick patterns in the most recent OHLC bars.

HIGH CONFIDENCE PATTERNS (0.8-1.0):
- Bullish engulfing: the latest bullish body fully engulfs the previous bearish body
- Bearish engulfing: the latest bearish body fully engulfs the previous bullish body
- Morning star / evening star: three-bar reversal with a small middle body

MEDIUM CONFIDENCE PATTERNS (0.6-0.8):
- Hammer / hanging man: long lower shadow at least twice the body
- Shooting star / inverted hammer: long upper shadow at least twice the body
- Piercing line / dark cloud cover

LOW CONFIDENCE PATTERNS (0.4-0.6):
- Doji and spinning tops: indecision, usually neutral

RULES:
- Judge body size and shadow ratios from the exact prices provided
- Consider the direction of the preceding bars as trend context
- If no recognisable pattern is present, answer "none" with confidence 0.0
- Name the pattern in the reasoning together with the relevant price levels"#;

const REVERSAL_INSTRUCTIONS: &str = r#"You are a reversal advisor in a multi-advisor trading system. You look for evidence that the current move is exhausted and about to turn.

REVERSAL EVIDENCE:
- Momentum exhaustion: RSI above 70 after an advance or below 30 after a decline, especially with divergence against price
- Volatility: expanding ATR or Bollinger band width at the end of a move
- Price structure: failed new highs or lows, long rejection shadows near recent extremes

SIGNAL MEANING:
- bullish: a decline is likely to reverse upward
- bearish: an advance is likely to reverse downward
- neutral: the current move shows no exhaustion
- none: the data cannot support a judgment

RULES:
- A reversal call against a strong trend needs at least two independent pieces of evidence
- Prefer "neutral" over a low-confidence reversal call
- Cite specific values in the reasoning"#;

/// Short-horizon trend advisor over closes and trend indicators
pub fn trend() -> Advisor {
    Advisor::new(
        "trend",
        TREND_INSTRUCTIONS,
        vec![
            ArtefactRequest::Strategy {
                mode: OutputMode::KeyValue,
            },
            ArtefactRequest::Closes { lookback: 10 },
            ArtefactRequest::Indicators {
                names: TREND_INDICATORS.iter().map(|s| s.to_string()).collect(),
                mode: OutputMode::KeyValue,
            },
        ],
    )
    .with_description("Detects and quantifies the prevailing trend from moving averages, ADX and price action")
}

/// Multi-indicator assessment over a longer candle history
pub fn technical_analysis() -> Advisor {
    Advisor::new(
        "technical_analysis",
        TECHNICAL_ANALYSIS_INSTRUCTIONS,
        vec![
            ArtefactRequest::Strategy {
                mode: OutputMode::KeyValue,
            },
            ArtefactRequest::Candles {
                lookback: 25,
                include_volume: true,
            },
            ArtefactRequest::Indicators {
                names: Vec::new(),
                mode: OutputMode::Tabular,
            },
        ],
    )
    .with_description("Combines every available indicator into one assessment with key price levels")
}

/// Candlestick pattern recognition over the last few bars
pub fn candle_pattern() -> Advisor {
    Advisor::new(
        "candle_pattern",
        CANDLE_PATTERN_INSTRUCTIONS,
        vec![ArtefactRequest::Candles {
            lookback: 5,
            include_volume: false,
        }],
    )
    .with_description("Recognises classic candlestick patterns in recent OHLC bars")
    .with_template("Identify the candlestick pattern for {symbol} in the bars below.\n\n{data}")
}

/// Exhaustion and turning-point detection
pub fn reversal() -> Advisor {
    Advisor::new(
        "reversal",
        REVERSAL_INSTRUCTIONS,
        vec![
            ArtefactRequest::Candles {
                lookback: 15,
                include_volume: true,
            },
            ArtefactRequest::Indicators {
                names: REVERSAL_INDICATORS.iter().map(|s| s.to_string()).collect(),
                mode: OutputMode::KeyValue,
            },
        ],
    )
    .with_description("Looks for exhaustion that signals an upcoming turn")
}

/// Every preset, in the order they are registered by default
pub fn all() -> Vec<Advisor> {
    vec![trend(), technical_analysis(), candle_pattern(), reversal()]
}

/// Look up a preset by name
pub fn by_name(name: &str) -> Option<Advisor> {
    match name {
        "trend" => Some(trend()),
        "technical_analysis" => Some(technical_analysis()),
        "candle_pattern" => Some(candle_pattern()),
        "reversal" => Some(reversal()),
        _ => None,
    }
}
