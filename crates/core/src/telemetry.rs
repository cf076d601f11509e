//! Bounded audit trail of guardrail decisions.

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::interpret::InterpretResponse;

pub const DEFAULT_TELEMETRY_CAPACITY: usize = 50;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Executed,
    Blocked,
    Failed,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Executed => "executed",
            Self::Blocked => "blocked",
            Self::Failed => "failed",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TelemetryEvent {
    pub timestamp: DateTime<Utc>,
    pub utterance: String,
    pub retrieval_terms: Vec<String>,
    pub response: InterpretResponse,
    pub duration_ms: f64,
    pub outcome: Outcome,
}

type Clock = Box<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Fixed-capacity ring buffer of recent decisions. Recording never fails:
/// the caller's pipeline must not be disturbed by telemetry.
pub struct TelemetryRecorder {
    events: Mutex<VecDeque<TelemetryEvent>>,
    capacity: usize,
    clock: Clock,
}

impl TelemetryRecorder {
    pub fn new(capacity: usize) -> Self {
        Self::with_clock(capacity, Box::new(Utc::now))
    }

    pub fn with_clock(capacity: usize, clock: Clock) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            clock,
        }
    }

    pub fn record_event(
        &self,
        utterance: &str,
        retrieval_terms: &[String],
        response: &InterpretResponse,
        duration_ms: f64,
        outcome: Outcome,
    ) -> TelemetryEvent {
        let event = TelemetryEvent {
            timestamp: (self.clock)(),
            utterance: utterance.to_string(),
            retrieval_terms: retrieval_terms.to_vec(),
            response: response.clone(),
            duration_ms: duration_ms.max(0.0),
            outcome,
        };

        {
            let mut events = self.events.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            if events.len() == self.capacity {
                events.pop_front();
            }
            events.push_back(event.clone());
        }

        info!(
            event_name = "telemetry.event",
            utterance = %event.utterance,
            intent = %event.response.intent,
            confidence = event.response.confidence,
            duration_ms = event.duration_ms,
            outcome = event.outcome.as_str(),
            "conversation decision recorded"
        );

        event
    }

    /// Stored events, oldest first.
    pub fn iter_recent(&self) -> Vec<TelemetryEvent> {
        let events = self.events.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        events.iter().cloned().collect()
    }

    /// Serialized events for diagnostics dumps.
    pub fn as_json(&self) -> Vec<Value> {
        self.iter_recent()
            .iter()
            .filter_map(|event| serde_json::to_value(event).ok())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
