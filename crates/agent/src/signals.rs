//! Secondary signals used to authorize sensitive intents.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Instant;

pub trait SecondarySignalProvider: Send + Sync {
    /// Signal names currently considered available. Comparison downstream is
    /// case-insensitive.
    fn available_signals(&self) -> HashSet<String>;
}

/// Fixed signal set, e.g. presence derived from external state.
pub struct StaticSignalProvider {
    signals: HashSet<String>,
}

impl StaticSignalProvider {
    pub fn new(signals: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self { signals: signals.into_iter().map(Into::into).collect() }
    }
}

impl SecondarySignalProvider for StaticSignalProvider {
    fn available_signals(&self) -> HashSet<String> {
        self.signals.clone()
    }
}

type MonotonicSource = Box<dyn Fn() -> f64 + Send + Sync>;

/// Tracks recently recognized voice identifiers. While at least one
/// identifier is fresh, the tracker yields `voice` plus `voice:<id>` per
/// identifier; entries expire after the TTL and are pruned on read.
pub struct VoiceSignalTracker {
    ttl_secs: f64,
    monotonic: MonotonicSource,
    entries: Mutex<HashMap<String, f64>>,
}

impl VoiceSignalTracker {
    pub fn new(ttl_secs: f64) -> Self {
        let origin = Instant::now();
        Self::with_monotonic(ttl_secs, Box::new(move || origin.elapsed().as_secs_f64()))
    }

    pub fn with_monotonic(ttl_secs: f64, monotonic: MonotonicSource) -> Self {
        Self { ttl_secs: ttl_secs.max(0.0), monotonic, entries: Mutex::new(HashMap::new()) }
    }

    pub fn record(&self, voice_id: &str) {
        if voice_id.is_empty() {
            return;
        }
        let now = (self.monotonic)();
        let mut entries = self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        entries.insert(voice_id.to_string(), now);
    }
}

impl SecondarySignalProvider for VoiceSignalTracker {
    fn available_signals(&self) -> HashSet<String> {
        let now = (self.monotonic)();
        let mut entries = self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        entries.retain(|_, recorded| now - *recorded < self.ttl_secs);

        let mut signals = HashSet::new();
        if !entries.is_empty() {
            signals.insert("voice".to_string());
            for voice_id in entries.keys() {
                signals.insert(format!("voice:{voice_id}"));
            }
        }
        signals
    }
}
