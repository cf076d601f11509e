//! Normalization of loosely-typed guardrail configuration into a strict,
//! intent-keyed policy bundle.
//!
//! Host configuration may deliver each field as a native JSON structure, a
//! JSON-encoded string, or a comma-separated string. Individual entries that
//! fail to parse are dropped; one malformed threshold never invalidates the
//! rest of the bundle.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::Serialize;
use serde_json::Value;

pub const OPT_INTENT_THRESHOLDS: &str = "intent_thresholds";
pub const OPT_DISABLED_INTENTS: &str = "disabled_intents";
pub const OPT_DANGEROUS_INTENTS: &str = "dangerous_intents";
pub const OPT_ALLOWED_HOURS: &str = "allowed_hours";
pub const OPT_RECENT_COMMAND_WINDOW_OVERRIDES: &str = "recent_command_window_overrides";

/// Strictly-typed guardrail policy derived from host options. Rebuilt when
/// the backing configuration changes, otherwise shared read-only.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GuardrailBundle {
    pub intent_thresholds: HashMap<String, f64>,
    pub disabled_intents: HashSet<String>,
    pub dangerous_intents: HashSet<String>,
    /// `(start_hour, end_hour)` in 0..=23, wrap-around when start > end.
    pub allowed_hours: HashMap<String, (u8, u8)>,
    pub recent_command_windows: HashMap<String, f64>,
}

/// Merged per-intent view. All fields optional; an unconfigured intent yields
/// the default value, meaning "fall back to global policy".
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct IntentConfig {
    pub threshold: Option<f64>,
    pub dedupe_window: Option<f64>,
    pub allowed_hours: Option<(u8, u8)>,
    pub dangerous: bool,
    pub disabled: bool,
}

impl GuardrailBundle {
    pub fn from_options(options: &BTreeMap<String, Value>) -> Self {
        let mut bundle = Self::default();

        if let Some(entries) = options.get(OPT_INTENT_THRESHOLDS).and_then(decode_map) {
            for (intent, raw) in entries {
                if let Some(threshold) = parse_float(&raw) {
                    if (0.0..=1.0).contains(&threshold) {
                        bundle.intent_thresholds.insert(intent, threshold);
                    }
                }
            }
        }

        if let Some(value) = options.get(OPT_DISABLED_INTENTS) {
            bundle.disabled_intents = decode_string_set(value);
        }
        if let Some(value) = options.get(OPT_DANGEROUS_INTENTS) {
            bundle.dangerous_intents = decode_string_set(value);
        }

        if let Some(entries) = options.get(OPT_ALLOWED_HOURS).and_then(decode_map) {
            for (intent, raw) in entries {
                if let Some(window) = parse_hour_window(&raw) {
                    bundle.allowed_hours.insert(intent, window);
                }
            }
        }

        if let Some(entries) =
            options.get(OPT_RECENT_COMMAND_WINDOW_OVERRIDES).and_then(decode_map)
        {
            for (intent, raw) in entries {
                if let Some(window) = parse_float(&raw) {
                    if window >= 0.0 {
                        bundle.recent_command_windows.insert(intent, window);
                    }
                }
            }
        }

        bundle
    }

    pub fn intent_config(&self, intent: &str) -> IntentConfig {
        IntentConfig {
            threshold: self.intent_thresholds.get(intent).copied(),
            dedupe_window: self.recent_command_windows.get(intent).copied(),
            allowed_hours: self.allowed_hours.get(intent).copied(),
            dangerous: self.dangerous_intents.contains(intent),
            disabled: self.disabled_intents.contains(intent),
        }
    }
}

/// Decode a possibly JSON-encoded string into its native value.
fn decode(value: &Value) -> Value {
    if let Value::String(text) = value {
        if let Ok(parsed) = serde_json::from_str::<Value>(text) {
            return parsed;
        }
    }
    value.clone()
}

fn decode_map(value: &Value) -> Option<Vec<(String, Value)>> {
    match decode(value) {
        Value::Object(map) => Some(map.into_iter().collect()),
        _ => None,
    }
}

fn decode_string_set(value: &Value) -> HashSet<String> {
    match decode(value) {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::String(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
                _ => None,
            })
            .collect(),
        // Plain strings that were not JSON arrays are treated as CSV.
        Value::String(text) => text
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(str::to_string)
            .collect(),
        _ => HashSet::new(),
    }
}

fn parse_float(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64().filter(|parsed| parsed.is_finite()),
        Value::String(text) => text.trim().parse::<f64>().ok().filter(|parsed| parsed.is_finite()),
        _ => None,
    }
}

fn parse_hour(value: &Value) -> Option<u8> {
    let parsed = match value {
        Value::Number(number) => number.as_i64()?,
        Value::String(text) => text.trim().parse::<i64>().ok()?,
        _ => return None,
    };
    u8::try_from(parsed).ok().filter(|hour| *hour <= 23)
}

fn parse_hour_window(value: &Value) -> Option<(u8, u8)> {
    match decode(value) {
        Value::Array(items) if items.len() == 2 => {
            Some((parse_hour(&items[0])?, parse_hour(&items[1])?))
        }
        Value::Object(map) => Some((parse_hour(map.get("start")?)?, parse_hour(map.get("end")?)?)),
        _ => None,
    }
}
