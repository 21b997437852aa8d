//! Response Validator
//!
//! Pulls the first well-formed structured payload out of raw model output and
//! validates it against an advisor's [`ResponseSchema`]. Models wrap answers in
//! prose and code fences, so every embedded JSON object is tried in order; when
//! none validates, the line-oriented `Signal: ... / Confidence: ...` answer
//! format is accepted as a fallback.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{Direction, RiskLevel, Signal, TimeFrame, TrendStrength};
use crate::advisor::sanitize::sanitize_reasoning;
use crate::errors::ParseError;

/// Upper bound on embedded objects parsed per response
const MAX_CANDIDATES: usize = 32;

lazy_static! {
    static ref KEY_VALUE_LINE: Regex = Regex::new(
        r"(?i)^[\s>*\-#]*(signal|direction|confidence|trend strength|strength|time frame|risk level|reasoning)[\s*]*[:：]\s*(.*?)\s*$"
    ).expect("Failed to compile KEY_VALUE_LINE regex - this is a bug in the hardcoded pattern");
}

/// Shape an advisor's answer must have
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseSchema {
    /// Keys accepted for the direction, first present key wins
    pub direction_keys: Vec<String>,
    pub allowed_directions: Vec<Direction>,
    /// Inclusive bounds for confidence, always inside [0, 1]
    pub confidence_range: (f64, f64),
    pub require_reasoning: bool,
    /// Additional keys that must be present and non-null
    #[serde(default)]
    pub required_fields: Vec<String>,
    /// Accept `Signal: bullish` style answers when no JSON validates
    pub accept_key_value: bool,
}

impl Default for ResponseSchema {
    fn default() -> Self {
        Self {
            direction_keys: vec!["signal".to_string(), "direction".to_string()],
            allowed_directions: Direction::ALL.to_vec(),
            confidence_range: (0.0, 1.0),
            require_reasoning: true,
            required_fields: Vec::new(),
            accept_key_value: true,
        }
    }
}

impl ResponseSchema {
    /// Human-readable answer format appended to every prompt
    pub fn format_instructions(&self) -> String {
        let directions = self
            .allowed_directions
            .iter()
            .map(|d| format!("\"{}\"", d.as_str()))
            .collect::<Vec<_>>()
            .join(" | ");
        let key = self
            .direction_keys
            .first()
            .map(String::as_str)
            .unwrap_or("signal");
        let mut extra = String::new();
        for field in &self.required_fields {
            extra.push_str(&format!(",\n    \"{}\": ...", field));
        }

        format!(
            r#"Your response must be valid JSON matching this exact format:
{{
    "{key}": {directions},
    "confidence": {low:.1}-{high:.1},
    "trend_strength": "weak" | "medium" | "strong",
    "time_frame": "short" | "medium" | "long",
    "risk_level": "low" | "medium" | "high",
    "key_support_levels": [price, ...],
    "key_resistance_levels": [price, ...],
    "reasoning": "Concise quantitative explanation"{extra}
}}
If the data does not support a confident judgment, answer "none" with confidence 0.0."#,
            key = key,
            directions = directions,
            low = self.confidence_range.0,
            high = self.confidence_range.1,
            extra = extra,
        )
    }
}

/// Parse raw model output into a signal
///
/// The returned signal has an empty `advisor`; the caller stamps its name.
pub fn parse(raw_text: &str, schema: &ResponseSchema) -> Result<Signal, ParseError> {
    let mut first_error: Option<String> = None;

    for candidate in extract_json_candidates(raw_text) {
        match validate_payload(&candidate, schema) {
            Ok(signal) => return Ok(signal),
            Err(message) => {
                first_error.get_or_insert(message);
            }
        }
    }

    if schema.accept_key_value {
        if let Some(payload) = extract_key_value_payload(raw_text) {
            match validate_payload(&payload, schema) {
                Ok(signal) => return Ok(signal),
                Err(message) => {
                    first_error.get_or_insert(message);
                }
            }
        }
    }

    Err(ParseError::new(
        first_error.unwrap_or_else(|| "No structured payload found in response".to_string()),
        raw_text,
    ))
}

/// Every balanced JSON object embedded in the text, in order of appearance
fn extract_json_candidates(text: &str) -> Vec<Map<String, Value>> {
    balanced_object_spans(text)
        .into_iter()
        .take(MAX_CANDIDATES)
        .filter_map(|(start, end)| match serde_json::from_str::<Value>(&text[start..end]) {
            Ok(Value::Object(map)) => Some(map),
            _ => None,
        })
        .collect()
}

/// Byte ranges of all balanced `{...}` spans, ordered by start offset
///
/// One pass with a stack of open-brace offsets. Quotes only open a string
/// inside an unclosed brace, so apostrophes in surrounding prose are ignored.
fn balanced_object_spans(text: &str) -> Vec<(usize, usize)> {
    let mut open = Vec::new();
    let mut spans = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' if !open.is_empty() => in_string = true,
            '{' => open.push(i),
            '}' => {
                if let Some(start) = open.pop() {
                    spans.push((start, i + 1));
                }
            }
            _ => {}
        }
    }

    spans.sort_unstable_by_key(|&(start, _)| start);
    spans
}

/// Build a payload from `Key: value` lines; prose lines become the reasoning
fn extract_key_value_payload(text: &str) -> Option<Map<String, Value>> {
    let mut payload = Map::new();
    let mut prose = Vec::new();

    for line in text.lines() {
        let Some(caps) = KEY_VALUE_LINE.captures(line) else {
            let trimmed = line.trim();
            if !trimmed.is_empty() && !trimmed.starts_with("---") {
                prose.push(trimmed.to_string());
            }
            continue;
        };

        let key = caps[1].to_ascii_lowercase();
        let value = caps[2]
            .trim_matches(|c: char| c == '*' || c == '[' || c == ']' || c == '`' || c.is_whitespace())
            .to_string();

        match key.as_str() {
            "signal" | "direction" => {
                payload.entry("signal").or_insert(Value::String(value));
            }
            "confidence" => {
                payload.entry("confidence").or_insert(Value::String(value));
            }
            "trend strength" | "strength" => {
                payload.entry("trend_strength").or_insert(Value::String(value));
            }
            "time frame" => {
                // "SHORT term" -> "SHORT"
                let value = value.split_whitespace().next().unwrap_or_default().to_string();
                payload.entry("time_frame").or_insert(Value::String(value));
            }
            "risk level" => {
                payload.entry("risk_level").or_insert(Value::String(value));
            }
            "reasoning" => {
                payload.entry("reasoning").or_insert(Value::String(value));
            }
            _ => {}
        }
    }

    if !payload.contains_key("signal") {
        return None;
    }
    if !payload.contains_key("reasoning") && !prose.is_empty() {
        payload.insert("reasoning".to_string(), Value::String(prose.join(" ")));
    }

    Some(payload)
}

/// Validate one candidate payload against the schema
fn validate_payload(payload: &Map<String, Value>, schema: &ResponseSchema) -> Result<Signal, String> {
    let (direction_key, direction_value) = schema
        .direction_keys
        .iter()
        .find_map(|key| payload.get(key).map(|v| (key, v)))
        .ok_or_else(|| format!("Missing '{}' field", schema.direction_keys.join("' or '")))?;

    let direction: Direction = direction_value
        .as_str()
        .ok_or_else(|| format!("Invalid '{}' field: expected a string", direction_key))?
        .parse()?;

    if !schema.allowed_directions.contains(&direction) {
        return Err(format!("Direction '{}' is not allowed for this advisor", direction));
    }

    let confidence = payload
        .get("confidence")
        .and_then(number_like)
        .ok_or("Missing or invalid 'confidence' field")?;

    let (low, high) = schema.confidence_range;
    if !(low..=high).contains(&confidence) {
        return Err(format!(
            "Confidence {} out of range [{:.1}, {:.1}]",
            confidence, low, high
        ));
    }

    let reasoning = match payload.get("reasoning") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(_) => return Err("Invalid 'reasoning' field: expected a string".to_string()),
    };
    if schema.require_reasoning && reasoning.trim().is_empty() {
        return Err("reasoning cannot be empty".to_string());
    }

    for field in &schema.required_fields {
        match payload.get(field) {
            Some(Value::Null) | None => return Err(format!("Missing required field '{}'", field)),
            Some(_) => {}
        }
    }

    let mut signal = Signal::new("", direction, confidence, sanitize_reasoning(&reasoning));

    if let Some(strength) = optional_enum::<TrendStrength>(payload, &["trend_strength", "strength"])? {
        signal = signal.with_strength(strength);
    }
    if let Some(time_frame) = optional_enum::<TimeFrame>(payload, &["time_frame"])? {
        signal = signal.with_time_frame(time_frame);
    }
    if let Some(risk_level) = optional_enum::<RiskLevel>(payload, &["risk_level"])? {
        signal = signal.with_risk_level(risk_level);
    }
    signal.key_support_levels = price_levels(payload, "key_support_levels")?;
    signal.key_resistance_levels = price_levels(payload, "key_resistance_levels")?;

    Ok(signal)
}

/// A JSON number, or a string holding one
fn number_like(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|v| v.is_finite())
}

fn optional_enum<T>(payload: &Map<String, Value>, keys: &[&str]) -> Result<Option<T>, String>
where
    T: std::str::FromStr<Err = String>,
{
    for key in keys {
        match payload.get(*key) {
            Some(Value::Null) | None => continue,
            Some(Value::String(s)) => return s.parse::<T>().map(Some),
            Some(other) => return Err(format!("Invalid '{}' field: {}", key, other)),
        }
    }
    Ok(None)
}

fn price_levels(payload: &Map<String, Value>, key: &str) -> Result<Vec<f64>, String> {
    match payload.get(key) {
        Some(Value::Null) | None => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| number_like(item).ok_or_else(|| format!("Invalid price in '{}': {}", key, item)))
            .collect(),
        Some(other) => Err(format!("Invalid '{}' field: expected an array, got {}", key, other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn schema() -> ResponseSchema {
        ResponseSchema::default()
    }

    #[test]
    fn test_parses_plain_json() {
        let raw = r#"{"signal": "bullish", "confidence": 0.8, "reasoning": "MA crossover"}"#;
        let signal = parse(raw, &schema()).unwrap();
        assert_eq!(signal.direction, Direction::Bullish);
        assert_eq!(signal.confidence, 0.8);
        assert_eq!(signal.reasoning, "MA crossover");
    }

    #[test]
    fn test_tolerates_prose_and_code_fences() {
        let raw = "Here is my analysis.\n```json\n{\"direction\": \"bearish\", \"confidence\": \"0.65\", \"reasoning\": \"Lower highs\", \"risk_level\": \"HIGH\"}\n```\nGood luck!";
        let signal = parse(raw, &schema()).unwrap();
        assert_eq!(signal.direction, Direction::Bearish);
        assert_eq!(signal.confidence, 0.65);
        assert_eq!(signal.risk_level, Some(RiskLevel::High));
    }

    #[test]
    fn test_skips_payloads_that_do_not_match() {
        let raw = r#"Context: {"note": "not a signal"} Answer: {"signal": "neutral", "confidence": 0.5, "reasoning": "flat"}"#;
        let signal = parse(raw, &schema()).unwrap();
        assert_eq!(signal.direction, Direction::Neutral);
    }

    #[test]
    fn test_braces_inside_strings() {
        let raw = r#"{"signal": "bullish", "confidence": 0.7, "reasoning": "breakout above {resistance}"}"#;
        let signal = parse(raw, &schema()).unwrap();
        assert_eq!(signal.reasoning, "breakout above {resistance}");
    }

    #[test]
    fn test_nested_object_tried_after_enclosing_one() {
        let raw = r#"{"analysis": {"signal": "bearish", "confidence": 0.6, "reasoning": "lower lows"}}"#;
        let signal = parse(raw, &schema()).unwrap();
        assert_eq!(signal.direction, Direction::Bearish);
    }

    #[test]
    fn test_unclosed_braces_scan_in_linear_time() {
        let raw = format!(
            "{}{}",
            "{".repeat(50_000),
            r#"{"signal": "bullish", "confidence": 0.7, "reasoning": "breakout"}"#
        );
        let started = Instant::now();
        let signal = parse(&raw, &schema()).unwrap();
        assert_eq!(signal.direction, Direction::Bullish);
        assert!(started.elapsed() < Duration::from_secs(1), "took {:?}", started.elapsed());
    }

    #[test]
    fn test_reasoning_is_not_filtered() {
        let raw = r#"{"signal": "neutral", "confidence": 0.5, "reasoning": "We disregard the outlier bar"}"#;
        let signal = parse(raw, &schema()).unwrap();
        assert_eq!(signal.reasoning, "We disregard the outlier bar");
    }

    #[test]
    fn test_missing_confidence_is_parse_error() {
        let raw = r#"{"signal": "bullish", "reasoning": "trust me"}"#;
        let err = parse(raw, &schema()).unwrap_err();
        assert!(err.message.contains("confidence"));
        assert_eq!(err.raw, raw);
    }

    #[test]
    fn test_out_of_range_confidence_rejected() {
        let raw = r#"{"signal": "bullish", "confidence": 1.5, "reasoning": "very sure"}"#;
        let err = parse(raw, &schema()).unwrap_err();
        assert!(err.message.contains("out of range"));
    }

    #[test]
    fn test_unknown_direction_rejected() {
        let raw = r#"{"signal": "moon", "confidence": 0.9, "reasoning": "rocket"}"#;
        let err = parse(raw, &schema()).unwrap_err();
        assert!(err.message.contains("Invalid direction"));
    }

    #[test]
    fn test_disallowed_direction_rejected() {
        let schema = ResponseSchema {
            allowed_directions: vec![Direction::Bullish, Direction::Bearish, Direction::None],
            ..ResponseSchema::default()
        };
        let raw = r#"{"signal": "neutral", "confidence": 0.4, "reasoning": "meh"}"#;
        assert!(parse(raw, &schema).is_err());
    }

    #[test]
    fn test_invalid_qualifier_rejected() {
        let raw = r#"{"signal": "bullish", "confidence": 0.6, "reasoning": "x", "time_frame": "forever"}"#;
        let err = parse(raw, &schema()).unwrap_err();
        assert!(err.message.contains("TimeFrame"));
    }

    #[test]
    fn test_required_fields_enforced() {
        let schema = ResponseSchema {
            required_fields: vec!["pattern".to_string()],
            ..ResponseSchema::default()
        };
        let raw = r#"{"signal": "bullish", "confidence": 0.6, "reasoning": "hammer"}"#;
        let err = parse(raw, &schema).unwrap_err();
        assert!(err.message.contains("pattern"));
    }

    #[test]
    fn test_price_levels_parsed() {
        let raw = r#"{"signal": "bullish", "confidence": 0.6, "reasoning": "x",
            "key_support_levels": [101.5, "99.0"], "key_resistance_levels": [110]}"#;
        let signal = parse(raw, &schema()).unwrap();
        assert_eq!(signal.key_support_levels, vec![101.5, 99.0]);
        assert_eq!(signal.key_resistance_levels, vec![110.0]);
    }

    #[test]
    fn test_none_direction_forces_zero_confidence() {
        let raw = r#"{"signal": "none", "confidence": 0.3, "reasoning": "insufficient data"}"#;
        let signal = parse(raw, &schema()).unwrap();
        assert_eq!(signal.direction, Direction::None);
        assert_eq!(signal.confidence, 0.0);
    }

    #[test]
    fn test_key_value_fallback() {
        let raw = "**1. Trend summary**\nTrend Strength: STRONG\nTime Frame: SHORT term\n\n**2. Signal**\nSignal: bullish\nConfidence: 0.72\nRisk Level: LOW\n\nMA short is 2.6% above MA long.";
        let signal = parse(raw, &schema()).unwrap();
        assert_eq!(signal.direction, Direction::Bullish);
        assert_eq!(signal.confidence, 0.72);
        assert_eq!(signal.strength, Some(TrendStrength::Strong));
        assert_eq!(signal.time_frame, Some(TimeFrame::Short));
        assert_eq!(signal.risk_level, Some(RiskLevel::Low));
        assert!(signal.reasoning.contains("MA short is 2.6% above MA long."));
    }

    #[test]
    fn test_key_value_disabled() {
        let schema = ResponseSchema {
            accept_key_value: false,
            ..ResponseSchema::default()
        };
        let raw = "Signal: bullish\nConfidence: 0.7\nReasoning: up";
        assert!(parse(raw, &schema).is_err());
    }

    #[test]
    fn test_no_payload() {
        let err = parse("I cannot help with that.", &schema()).unwrap_err();
        assert!(err.message.contains("No structured payload"));
    }

    #[test]
    fn test_format_instructions_mention_schema() {
        let text = schema().format_instructions();
        assert!(text.contains("\"signal\""));
        assert!(text.contains("\"bullish\" | \"bearish\" | \"neutral\" | \"none\""));
    }
}
