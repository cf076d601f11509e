//! Request/response models for the adapter interpret exchange, plus the
//! single typed parse step every raw model payload goes through.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::catalog::CatalogPayload;
use crate::signing::sha256_hex;

/// Request payload sent to the adapter interpret endpoint.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InterpretRequest {
    pub utterance: String,
    pub catalog: CatalogPayload,
    #[serde(default)]
    pub intents: BTreeMap<String, BTreeMap<String, Value>>,
}

/// Structured interpretation of one utterance. Constructed once per streamed
/// model fragment and never mutated afterwards.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InterpretResponse {
    pub intent: String,
    #[serde(default)]
    pub area: Option<String>,
    #[serde(default)]
    pub targets: Option<Vec<String>>,
    #[serde(default)]
    pub params: BTreeMap<String, Value>,
    pub confidence: f64,
    #[serde(default)]
    pub sensitive: bool,
    #[serde(default)]
    pub required_secondary_signals: Vec<String>,
    #[serde(default)]
    pub retrieval_terms: Vec<String>,
    #[serde(default)]
    pub adapter_error: Option<String>,
}

const RESPONSE_FIELDS: &[&str] = &[
    "intent",
    "area",
    "targets",
    "params",
    "confidence",
    "sensitive",
    "required_secondary_signals",
    "retrieval_terms",
    "adapter_error",
];

impl InterpretResponse {
    /// Parse a raw model payload into a validated response, or `None`.
    ///
    /// Confidence is clamped into [0,1] and a missing or non-object `params`
    /// is coerced to an empty map before validation. Everything else is
    /// strict: unknown keys, a missing/empty `intent`, or wrongly-typed
    /// fields reject the payload.
    pub fn from_value(raw: &Value) -> Option<Self> {
        let object = raw.as_object()?;
        if object.keys().any(|key| !RESPONSE_FIELDS.contains(&key.as_str())) {
            return None;
        }

        let intent = object.get("intent")?.as_str()?.to_string();
        if intent.is_empty() {
            return None;
        }

        let area = match object.get("area") {
            None | Some(Value::Null) => None,
            Some(Value::String(value)) => Some(value.clone()),
            Some(_) => return None,
        };

        let targets = match object.get("targets") {
            None | Some(Value::Null) => None,
            Some(Value::Array(values)) => Some(string_list(values)?),
            Some(_) => return None,
        };

        let params = match object.get("params") {
            Some(Value::Object(map)) => map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            _ => BTreeMap::new(),
        };

        let confidence = clamp_confidence(object.get("confidence"));

        let sensitive = match object.get("sensitive") {
            None | Some(Value::Null) => false,
            Some(Value::Bool(value)) => *value,
            Some(_) => return None,
        };

        let required_secondary_signals = match object.get("required_secondary_signals") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(values)) => string_list(values)?,
            Some(_) => return None,
        };

        let retrieval_terms = match object.get("retrieval_terms") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(values)) => string_list(values)?,
            Some(_) => return None,
        };

        let adapter_error = match object.get("adapter_error") {
            None | Some(Value::Null) => None,
            Some(Value::String(value)) => Some(value.clone()),
            Some(_) => return None,
        };

        Some(Self {
            intent,
            area,
            targets,
            params,
            confidence,
            sensitive,
            required_secondary_signals,
            retrieval_terms,
            adapter_error,
        })
    }

    /// Safe noop response used whenever interpretation cannot produce a
    /// validated result. Carries the failure detail in both `adapter_error`
    /// and a human-readable `params.reason`.
    pub fn fallback(utterance: &str, reason: &str) -> Self {
        let mut params = BTreeMap::new();
        params.insert("reason".to_string(), Value::String(reason.to_string()));
        params.insert("utterance".to_string(), Value::String(utterance.to_string()));
        Self {
            intent: "noop".to_string(),
            params,
            confidence: 0.0,
            adapter_error: Some(reason.to_string()),
            ..Self::default()
        }
    }

    /// Content hash used for duplicate suppression: intent, area, sorted
    /// targets and params, serialized canonically.
    pub fn content_token(&self) -> String {
        let mut sorted_targets = self.targets.clone().unwrap_or_default();
        sorted_targets.sort();

        let mut material = Map::new();
        material.insert("area".to_string(), json_option(&self.area));
        material.insert("intent".to_string(), Value::String(self.intent.clone()));
        material.insert(
            "params".to_string(),
            Value::Object(self.params.iter().map(|(k, v)| (k.clone(), v.clone())).collect()),
        );
        material.insert(
            "targets".to_string(),
            Value::Array(sorted_targets.into_iter().map(Value::String).collect()),
        );

        let serialized = serde_json::to_vec(&Value::Object(material)).unwrap_or_default();
        sha256_hex(&serialized)
    }
}

/// Case-folded, whitespace-collapsed utterance used as the cache key.
pub fn normalize_utterance(utterance: &str) -> String {
    utterance.to_lowercase().split_whitespace().collect::<Vec<_>>().join(" ")
}

fn clamp_confidence(raw: Option<&Value>) -> f64 {
    let parsed = match raw {
        Some(Value::Number(number)) => number.as_f64().unwrap_or(0.0),
        Some(Value::String(text)) => text.trim().parse::<f64>().unwrap_or(0.0),
        _ => 0.0,
    };
    if parsed.is_nan() {
        return 0.0;
    }
    parsed.clamp(0.0, 1.0)
}

fn string_list(values: &[Value]) -> Option<Vec<String>> {
    values.iter().map(|value| value.as_str().map(str::to_string)).collect()
}

fn json_option(value: &Option<String>) -> Value {
    match value {
        Some(text) => Value::String(text.clone()),
        None => Value::Null,
    }
}
