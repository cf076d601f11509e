//! Conversation guardrail engine.
//!
//! Each `handle` call runs a fixed pipeline of gates and short-circuits at
//! the first failing one. Policy violations are never errors: they produce a
//! blocked result with a stable reason code. The only hard error is adapter
//! signature rejection, which indicates operator-level misconfiguration.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use async_trait::async_trait;
use chrono::Timelike;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use hearth_core::catalog::CatalogPayload;
use hearth_core::guardrails::{GuardrailBundle, IntentConfig};
use hearth_core::interpret::InterpretResponse;
use hearth_core::telemetry::{Outcome, TelemetryRecorder};

use crate::client::{AdapterClient, AdapterError};
use crate::signals::SecondarySignalProvider;

/// Monotonic time plus the local hour, behind a seam so tests control both.
pub trait EngineClock: Send + Sync {
    fn monotonic(&self) -> f64;
    fn current_hour(&self) -> u32;
}

pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self { origin: Instant::now() }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineClock for SystemClock {
    fn monotonic(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }

    fn current_hour(&self) -> u32 {
        chrono::Local::now().hour()
    }
}

#[derive(Debug, Error)]
pub enum ExecutionError {
    /// Typed handling failure whose detail is safe to surface to the user.
    #[error("{0}")]
    Handling(String),
    #[error("unexpected executor failure: {0}")]
    Unexpected(#[from] anyhow::Error),
}

#[async_trait]
pub trait IntentExecutor: Send + Sync {
    async fn execute(
        &self,
        response: &InterpretResponse,
        catalog: &CatalogPayload,
        config: &IntentConfig,
    ) -> Result<(), ExecutionError>;
}

#[async_trait]
pub trait CatalogProvider: Send + Sync {
    async fn catalog(&self) -> CatalogPayload;
}

#[derive(Clone, Debug)]
pub struct GuardrailSettings {
    pub confidence_gate_enabled: bool,
    pub confidence_threshold: f64,
    pub dedupe_window_secs: f64,
    pub night_mode_enabled: bool,
    pub night_mode_start_hour: u8,
    pub night_mode_end_hour: u8,
    pub shared_secret: Option<SecretString>,
    pub bundle: GuardrailBundle,
}

impl Default for GuardrailSettings {
    fn default() -> Self {
        Self {
            confidence_gate_enabled: false,
            confidence_threshold: 0.75,
            dedupe_window_secs: 2.0,
            night_mode_enabled: false,
            night_mode_start_hour: 23,
            night_mode_end_hour: 6,
            shared_secret: None,
            bundle: GuardrailBundle::default(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockReason {
    NightMode,
    IntentDisabled,
    IntentConfidenceBelowThreshold,
    ConfidenceBelowGlobalThreshold,
    DuplicateCommand,
    MissingSecondarySignals,
    DangerousIntentAfterHours,
    DangerousIntentUnverified,
}

impl BlockReason {
    /// Stable machine-readable code for logs and tests.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NightMode => "night_mode",
            Self::IntentDisabled => "intent_disabled",
            Self::IntentConfidenceBelowThreshold => "intent_confidence_below_threshold",
            Self::ConfidenceBelowGlobalThreshold => "confidence_below_global_threshold",
            Self::DuplicateCommand => "duplicate_command",
            Self::MissingSecondarySignals => "missing_secondary_signals",
            Self::DangerousIntentAfterHours => "dangerous_intent_after_hours",
            Self::DangerousIntentUnverified => "dangerous_intent_unverified",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum HandleOutcome {
    Executed,
    Blocked(BlockReason),
    Failed,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ConversationResult {
    pub success: bool,
    pub message: String,
    pub outcome: HandleOutcome,
}

pub struct ConversationGuardrailEngine {
    adapter: Arc<AdapterClient>,
    catalog: Arc<dyn CatalogProvider>,
    executor: Arc<dyn IntentExecutor>,
    signals: Arc<dyn SecondarySignalProvider>,
    telemetry: Arc<TelemetryRecorder>,
    clock: Arc<dyn EngineClock>,
    settings: Mutex<GuardrailSettings>,
    dedupe: Mutex<HashMap<String, f64>>,
    last_secret: Mutex<Option<String>>,
}

impl ConversationGuardrailEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        adapter: Arc<AdapterClient>,
        catalog: Arc<dyn CatalogProvider>,
        executor: Arc<dyn IntentExecutor>,
        signals: Arc<dyn SecondarySignalProvider>,
        telemetry: Arc<TelemetryRecorder>,
        clock: Arc<dyn EngineClock>,
        settings: GuardrailSettings,
    ) -> Self {
        Self {
            adapter,
            catalog,
            executor,
            signals,
            telemetry,
            clock,
            settings: Mutex::new(settings),
            dedupe: Mutex::new(HashMap::new()),
            last_secret: Mutex::new(None),
        }
    }

    pub fn update_settings(&self, settings: GuardrailSettings) {
        let mut slot = self.settings.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *slot = settings;
    }

    /// Interpret and, policy permitting, execute `utterance`.
    pub async fn handle(&self, utterance: &str) -> Result<ConversationResult, AdapterError> {
        let settings =
            self.settings.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).clone();
        let start = self.clock.monotonic();

        self.apply_shared_secret(&settings);

        if settings.night_mode_enabled {
            let hour = self.clock.current_hour();
            if hour_in_window(hour, settings.night_mode_start_hour, settings.night_mode_end_hour) {
                info!(
                    event_name = "guardrail.decision",
                    reason = BlockReason::NightMode.code(),
                    utterance,
                    hour,
                    "blocked before interpretation"
                );
                return Ok(ConversationResult {
                    success: false,
                    message: "Night mode is active. Try again later.".to_string(),
                    outcome: HandleOutcome::Blocked(BlockReason::NightMode),
                });
            }
        }

        let catalog = self.catalog.catalog().await;
        let intents = configured_intents(&settings.bundle);
        let response = self.adapter.interpret(utterance, &catalog, &intents).await?;
        let intent_config = settings.bundle.intent_config(&response.intent);

        if intent_config.disabled {
            return Ok(self.block(
                utterance,
                &response,
                start,
                BlockReason::IntentDisabled,
                format!("Intent '{}' is disabled.", response.intent),
            ));
        }

        if let Some(threshold) = intent_config.threshold {
            if response.confidence < threshold {
                return Ok(self.block(
                    utterance,
                    &response,
                    start,
                    BlockReason::IntentConfidenceBelowThreshold,
                    "Confidence too low to execute safely.".to_string(),
                ));
            }
        } else if settings.confidence_gate_enabled
            && response.confidence < settings.confidence_threshold
        {
            return Ok(self.block(
                utterance,
                &response,
                start,
                BlockReason::ConfidenceBelowGlobalThreshold,
                "Confidence too low to execute safely.".to_string(),
            ));
        }

        let window = intent_config.dedupe_window.unwrap_or(settings.dedupe_window_secs);
        let token = response.content_token();
        let now = self.clock.monotonic();
        if self.is_recent_duplicate(&token, now, window) {
            return Ok(self.block(
                utterance,
                &response,
                start,
                BlockReason::DuplicateCommand,
                "Duplicate command suppressed.".to_string(),
            ));
        }

        if !response.required_secondary_signals.is_empty() {
            let provided: HashSet<String> = self
                .signals
                .available_signals()
                .iter()
                .map(|signal| signal.to_lowercase())
                .collect();
            let missing: Vec<String> = response
                .required_secondary_signals
                .iter()
                .filter(|signal| !provided.contains(&signal.to_lowercase()))
                .cloned()
                .collect();
            if !missing.is_empty() {
                return Ok(self.block(
                    utterance,
                    &response,
                    start,
                    BlockReason::MissingSecondarySignals,
                    format!("Secondary signals required: {}.", missing.join(", ")),
                ));
            }
        }

        if intent_config.dangerous {
            if let Some((window_start, window_end)) = intent_config.allowed_hours {
                let hour = self.clock.current_hour();
                if !hour_in_window(hour, window_start, window_end) {
                    return Ok(self.block(
                        utterance,
                        &response,
                        start,
                        BlockReason::DangerousIntentAfterHours,
                        "Dangerous intent blocked outside its allowed hours.".to_string(),
                    ));
                }
            }
            if !is_verified(&response) {
                return Ok(self.block(
                    utterance,
                    &response,
                    start,
                    BlockReason::DangerousIntentUnverified,
                    "Dangerous intent requires explicit verification.".to_string(),
                ));
            }
        }

        if let Err(error) = self.executor.execute(&response, &catalog, &intent_config).await {
            let message = match &error {
                ExecutionError::Handling(detail) if !detail.is_empty() => {
                    format!("Intent execution failed: {detail}")
                }
                ExecutionError::Handling(_) => "Intent execution failed.".to_string(),
                ExecutionError::Unexpected(_) => {
                    "Intent execution failed due to an unexpected error.".to_string()
                }
            };
            warn!(
                event_name = "guardrail.decision",
                outcome = "failed",
                utterance,
                intent = %response.intent,
                confidence = response.confidence,
                error = %error,
            );
            self.record(utterance, &response, start, Outcome::Failed);
            return Ok(ConversationResult {
                success: false,
                message,
                outcome: HandleOutcome::Failed,
            });
        }

        // The dedupe timestamp is written only after a successful execution,
        // so a blocked or failed command stays immediately retryable.
        if window > 0.0 {
            let mut dedupe = self.dedupe.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            dedupe.insert(token, now);
        }

        info!(
            event_name = "guardrail.decision",
            outcome = "executed",
            utterance,
            intent = %response.intent,
            confidence = response.confidence,
        );
        self.record(utterance, &response, start, Outcome::Executed);
        Ok(ConversationResult {
            success: true,
            message: "Intent executed successfully.".to_string(),
            outcome: HandleOutcome::Executed,
        })
    }

    fn apply_shared_secret(&self, settings: &GuardrailSettings) {
        let secret = settings
            .shared_secret
            .as_ref()
            .map(|secret| secret.expose_secret().to_string())
            .filter(|secret| !secret.is_empty());
        let mut last = self.last_secret.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if *last == secret {
            return;
        }
        self.adapter.set_shared_secret(secret.clone().map(SecretString::from));
        *last = secret;
    }

    /// Prune entries older than `window`, then check for a live duplicate.
    /// A non-positive window disables suppression entirely.
    fn is_recent_duplicate(&self, token: &str, now: f64, window: f64) -> bool {
        let mut dedupe = self.dedupe.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if window <= 0.0 {
            dedupe.clear();
            return false;
        }
        dedupe.retain(|_, recorded| now - *recorded < window);
        dedupe.contains_key(token)
    }

    fn block(
        &self,
        utterance: &str,
        response: &InterpretResponse,
        start: f64,
        reason: BlockReason,
        message: String,
    ) -> ConversationResult {
        info!(
            event_name = "guardrail.decision",
            reason = reason.code(),
            utterance,
            intent = %response.intent,
            confidence = response.confidence,
            message = %message,
        );
        self.record(utterance, response, start, Outcome::Blocked);
        ConversationResult { success: false, message, outcome: HandleOutcome::Blocked(reason) }
    }

    fn record(
        &self,
        utterance: &str,
        response: &InterpretResponse,
        start: f64,
        outcome: Outcome,
    ) {
        let duration_ms = ((self.clock.monotonic() - start) * 1000.0).max(0.0);
        self.telemetry.record_event(
            utterance,
            &response.retrieval_terms,
            response,
            duration_ms,
            outcome,
        );
    }
}

/// Serialized per-intent configuration forwarded to the adapter prompt.
fn configured_intents(bundle: &GuardrailBundle) -> BTreeMap<String, BTreeMap<String, Value>> {
    let mut names: HashSet<&String> = HashSet::new();
    names.extend(bundle.intent_thresholds.keys());
    names.extend(bundle.disabled_intents.iter());
    names.extend(bundle.dangerous_intents.iter());
    names.extend(bundle.allowed_hours.keys());
    names.extend(bundle.recent_command_windows.keys());

    names
        .into_iter()
        .filter_map(|name| {
            let config = serde_json::to_value(bundle.intent_config(name)).ok()?;
            let fields = config.as_object()?.clone().into_iter().collect();
            Some((name.clone(), fields))
        })
        .collect()
}

/// Hour membership with wrap-around. `start == end` covers the whole day.
fn hour_in_window(hour: u32, start: u8, end: u8) -> bool {
    let (start, end) = (u32::from(start), u32::from(end));
    if start == end {
        return true;
    }
    if start < end {
        start <= hour && hour < end
    } else {
        hour >= start || hour < end
    }
}

/// Dangerous intents require `params.verified == true` or a truthy
/// `params.confirmation`.
fn is_verified(response: &InterpretResponse) -> bool {
    if response.params.get("verified").and_then(Value::as_bool) == Some(true) {
        return true;
    }
    match response.params.get("confirmation") {
        Some(Value::Bool(confirmed)) => *confirmed,
        Some(Value::String(text)) => !text.trim().is_empty(),
        Some(Value::Number(number)) => number.as_f64().is_some_and(|value| value != 0.0),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use secrecy::SecretString;
    use serde_json::{json, Value};

    use hearth_core::catalog::CatalogPayload;
    use hearth_core::guardrails::{GuardrailBundle, IntentConfig};
    use hearth_core::interpret::InterpretResponse;
    use hearth_core::telemetry::{Outcome, TelemetryRecorder};

    use crate::client::{
        AdapterClient, AdapterError, InterpretTransport, TransportFailure, TransportReply,
    };
    use crate::signals::StaticSignalProvider;

    use super::{
        hour_in_window, BlockReason, CatalogProvider, ConversationGuardrailEngine, EngineClock,
        ExecutionError, GuardrailSettings, HandleOutcome, IntentExecutor,
    };

    struct TestClock {
        now_ms: AtomicUsize,
        hour: AtomicU32,
    }

    impl TestClock {
        fn new(hour: u32) -> Self {
            Self { now_ms: AtomicUsize::new(0), hour: AtomicU32::new(hour) }
        }

        fn advance_secs(&self, secs: f64) {
            self.now_ms.fetch_add((secs * 1000.0) as usize, Ordering::SeqCst);
        }
    }

    impl EngineClock for TestClock {
        fn monotonic(&self) -> f64 {
            self.now_ms.load(Ordering::SeqCst) as f64 / 1000.0
        }

        fn current_hour(&self) -> u32 {
            self.hour.load(Ordering::SeqCst)
        }
    }

    struct ScriptedTransport {
        reply: Value,
        status: u16,
        posts: Mutex<Vec<(Vec<u8>, Option<String>)>>,
    }

    impl ScriptedTransport {
        fn replying(response: &InterpretResponse) -> Self {
            Self {
                reply: serde_json::to_value(response).expect("serialize fixture"),
                status: 200,
                posts: Mutex::new(Vec::new()),
            }
        }

        fn with_status(status: u16) -> Self {
            Self { reply: json!({}), status, posts: Mutex::new(Vec::new()) }
        }

        fn post_count(&self) -> usize {
            self.posts.lock().expect("posts lock").len()
        }
    }

    #[async_trait]
    impl InterpretTransport for ScriptedTransport {
        async fn post(
            &self,
            body: &[u8],
            signature: Option<&str>,
        ) -> Result<TransportReply, TransportFailure> {
            self.posts
                .lock()
                .expect("posts lock")
                .push((body.to_vec(), signature.map(str::to_string)));
            Ok(TransportReply {
                status: self.status,
                body: serde_json::to_vec(&self.reply).expect("serialize reply"),
            })
        }
    }

    struct EmptyCatalog;

    #[async_trait]
    impl CatalogProvider for EmptyCatalog {
        async fn catalog(&self) -> CatalogPayload {
            CatalogPayload::default()
        }
    }

    enum ExecutorMode {
        Succeed,
        FailHandling(String),
        FailUnexpected,
    }

    struct RecordingExecutor {
        mode: ExecutorMode,
        calls: Mutex<Vec<String>>,
    }

    impl RecordingExecutor {
        fn succeeding() -> Self {
            Self { mode: ExecutorMode::Succeed, calls: Mutex::new(Vec::new()) }
        }

        fn call_count(&self) -> usize {
            self.calls.lock().expect("calls lock").len()
        }
    }

    #[async_trait]
    impl IntentExecutor for RecordingExecutor {
        async fn execute(
            &self,
            response: &InterpretResponse,
            _catalog: &CatalogPayload,
            _config: &IntentConfig,
        ) -> Result<(), ExecutionError> {
            self.calls.lock().expect("calls lock").push(response.intent.clone());
            match &self.mode {
                ExecutorMode::Succeed => Ok(()),
                ExecutorMode::FailHandling(detail) => {
                    Err(ExecutionError::Handling(detail.clone()))
                }
                ExecutorMode::FailUnexpected => {
                    Err(ExecutionError::Unexpected(anyhow::anyhow!("wiring broke")))
                }
            }
        }
    }

    struct Fixture {
        engine: ConversationGuardrailEngine,
        transport: Arc<ScriptedTransport>,
        executor: Arc<RecordingExecutor>,
        telemetry: Arc<TelemetryRecorder>,
        clock: Arc<TestClock>,
    }

    fn fixture(
        response: &InterpretResponse,
        settings: GuardrailSettings,
        executor: RecordingExecutor,
        signals: StaticSignalProvider,
        hour: u32,
    ) -> Fixture {
        let transport = Arc::new(ScriptedTransport::replying(response));
        let executor = Arc::new(executor);
        let telemetry = Arc::new(TelemetryRecorder::new(16));
        let clock = Arc::new(TestClock::new(hour));
        let engine = ConversationGuardrailEngine::new(
            Arc::new(AdapterClient::new(transport.clone())),
            Arc::new(EmptyCatalog),
            executor.clone(),
            Arc::new(signals),
            telemetry.clone(),
            clock.clone(),
            settings,
        );
        Fixture { engine, transport, executor, telemetry, clock }
    }

    fn response(intent: &str, confidence: f64) -> InterpretResponse {
        InterpretResponse {
            intent: intent.to_string(),
            area: Some("living_room".to_string()),
            confidence,
            ..InterpretResponse::default()
        }
    }

    fn no_signals() -> StaticSignalProvider {
        StaticSignalProvider::new(Vec::<String>::new())
    }

    #[tokio::test]
    async fn plain_command_executes_once() {
        let fx = fixture(
            &response("turn_on", 0.86),
            GuardrailSettings::default(),
            RecordingExecutor::succeeding(),
            no_signals(),
            12,
        );

        let result = fx.engine.handle("turn on the living room lights").await.expect("handle");

        assert!(result.success);
        assert_eq!(result.outcome, HandleOutcome::Executed);
        assert_eq!(result.message, "Intent executed successfully.");
        assert_eq!(fx.executor.call_count(), 1);
        assert_eq!(fx.telemetry.iter_recent()[0].outcome, Outcome::Executed);
    }

    #[tokio::test]
    async fn duplicate_within_window_is_blocked_then_expires() {
        let fx = fixture(
            &response("turn_on", 0.9),
            GuardrailSettings { dedupe_window_secs: 2.0, ..GuardrailSettings::default() },
            RecordingExecutor::succeeding(),
            no_signals(),
            12,
        );

        let first = fx.engine.handle("activate kitchen lights").await.expect("first");
        fx.clock.advance_secs(0.5);
        let second = fx.engine.handle("activate kitchen lights").await.expect("second");
        fx.clock.advance_secs(2.5);
        let third = fx.engine.handle("activate kitchen lights").await.expect("third");

        assert!(first.success);
        assert!(!second.success);
        assert!(second.message.to_lowercase().contains("duplicate"));
        assert_eq!(second.outcome, HandleOutcome::Blocked(BlockReason::DuplicateCommand));
        assert!(third.success);
        assert_eq!(fx.executor.call_count(), 2);
    }

    #[tokio::test]
    async fn per_intent_window_override_takes_precedence() {
        let bundle = GuardrailBundle::from_options(
            &[(
                "recent_command_window_overrides".to_string(),
                json!({"turn_on": 3.0}),
            )]
            .into_iter()
            .collect(),
        );
        let fx = fixture(
            &response("turn_on", 0.9),
            GuardrailSettings {
                dedupe_window_secs: 0.5,
                bundle,
                ..GuardrailSettings::default()
            },
            RecordingExecutor::succeeding(),
            no_signals(),
            12,
        );

        fx.engine.handle("activate kitchen lights").await.expect("first");
        // Past the global window but inside the per-intent override.
        fx.clock.advance_secs(1.0);
        let second = fx.engine.handle("activate kitchen lights").await.expect("second");

        assert!(!second.success);
        assert_eq!(fx.executor.call_count(), 1);
    }

    #[tokio::test]
    async fn night_mode_blocks_without_calling_the_adapter() {
        for (hour, expect_blocked) in [(23, true), (3, true), (12, false)] {
            let fx = fixture(
                &response("turn_on", 0.9),
                GuardrailSettings {
                    night_mode_enabled: true,
                    night_mode_start_hour: 23,
                    night_mode_end_hour: 6,
                    ..GuardrailSettings::default()
                },
                RecordingExecutor::succeeding(),
                no_signals(),
                hour,
            );

            let result = fx.engine.handle("lights on").await.expect("handle");
            assert_eq!(result.success, !expect_blocked, "hour {hour}");
            if expect_blocked {
                assert_eq!(result.outcome, HandleOutcome::Blocked(BlockReason::NightMode));
                assert_eq!(fx.transport.post_count(), 0, "no adapter call at hour {hour}");
                assert!(fx.telemetry.is_empty());
            }
        }
    }

    #[tokio::test]
    async fn global_confidence_gate_blocks_low_confidence() {
        let fx = fixture(
            &response("turn_on", 0.5),
            GuardrailSettings {
                confidence_gate_enabled: true,
                confidence_threshold: 0.75,
                ..GuardrailSettings::default()
            },
            RecordingExecutor::succeeding(),
            no_signals(),
            12,
        );

        let result = fx.engine.handle("lights on").await.expect("handle");
        assert_eq!(
            result.outcome,
            HandleOutcome::Blocked(BlockReason::ConfidenceBelowGlobalThreshold)
        );
        assert_eq!(fx.executor.call_count(), 0);
        assert_eq!(fx.telemetry.iter_recent()[0].outcome, Outcome::Blocked);
    }

    #[tokio::test]
    async fn intent_threshold_override_bypasses_the_global_gate() {
        let bundle = GuardrailBundle::from_options(
            &[("intent_thresholds".to_string(), json!({"turn_on": 0.5}))].into_iter().collect(),
        );
        let fx = fixture(
            &response("turn_on", 0.6),
            GuardrailSettings {
                confidence_gate_enabled: true,
                confidence_threshold: 0.9,
                bundle,
                ..GuardrailSettings::default()
            },
            RecordingExecutor::succeeding(),
            no_signals(),
            12,
        );

        let result = fx.engine.handle("lights on").await.expect("handle");
        assert!(result.success, "override threshold 0.5 admits confidence 0.6");
    }

    #[tokio::test]
    async fn intent_threshold_override_blocks_below_itself() {
        let bundle = GuardrailBundle::from_options(
            &[("intent_thresholds".to_string(), json!({"turn_on": 0.8}))].into_iter().collect(),
        );
        let fx = fixture(
            &response("turn_on", 0.6),
            GuardrailSettings { bundle, ..GuardrailSettings::default() },
            RecordingExecutor::succeeding(),
            no_signals(),
            12,
        );

        let result = fx.engine.handle("lights on").await.expect("handle");
        assert_eq!(
            result.outcome,
            HandleOutcome::Blocked(BlockReason::IntentConfidenceBelowThreshold)
        );
    }

    #[tokio::test]
    async fn disabled_intent_is_blocked() {
        let bundle = GuardrailBundle::from_options(
            &[("disabled_intents".to_string(), json!(["turn_on"]))].into_iter().collect(),
        );
        let fx = fixture(
            &response("turn_on", 0.95),
            GuardrailSettings { bundle, ..GuardrailSettings::default() },
            RecordingExecutor::succeeding(),
            no_signals(),
            12,
        );

        let result = fx.engine.handle("lights on").await.expect("handle");
        assert_eq!(result.outcome, HandleOutcome::Blocked(BlockReason::IntentDisabled));
        assert_eq!(fx.executor.call_count(), 0);
    }

    #[tokio::test]
    async fn dangerous_intent_outside_allowed_hours_is_blocked() {
        let bundle = GuardrailBundle::from_options(
            &[
                ("dangerous_intents".to_string(), json!(["unlock_door"])),
                ("allowed_hours".to_string(), json!({"unlock_door": [7, 21]})),
            ]
            .into_iter()
            .collect(),
        );
        let fx = fixture(
            &response("unlock_door", 0.94),
            GuardrailSettings { bundle, ..GuardrailSettings::default() },
            RecordingExecutor::succeeding(),
            no_signals(),
            22,
        );

        let result = fx.engine.handle("unlock the front door").await.expect("handle");
        assert_eq!(
            result.outcome,
            HandleOutcome::Blocked(BlockReason::DangerousIntentAfterHours)
        );
        assert!(result.message.to_lowercase().contains("hours"));
        assert_eq!(fx.executor.call_count(), 0);
    }

    #[tokio::test]
    async fn dangerous_intent_requires_verification_inside_hours() {
        let bundle = GuardrailBundle::from_options(
            &[
                ("dangerous_intents".to_string(), json!(["unlock_door"])),
                ("allowed_hours".to_string(), json!({"unlock_door": [7, 21]})),
            ]
            .into_iter()
            .collect(),
        );
        let fx = fixture(
            &response("unlock_door", 0.94),
            GuardrailSettings { bundle, ..GuardrailSettings::default() },
            RecordingExecutor::succeeding(),
            no_signals(),
            12,
        );

        let result = fx.engine.handle("unlock the front door").await.expect("handle");
        assert_eq!(
            result.outcome,
            HandleOutcome::Blocked(BlockReason::DangerousIntentUnverified)
        );
    }

    #[tokio::test]
    async fn verified_dangerous_intent_executes() {
        let bundle = GuardrailBundle::from_options(
            &[("dangerous_intents".to_string(), json!(["unlock_door"]))].into_iter().collect(),
        );
        let mut verified = response("unlock_door", 0.94);
        verified.params.insert("verified".to_string(), json!(true));
        let fx = fixture(
            &verified,
            GuardrailSettings { bundle, ..GuardrailSettings::default() },
            RecordingExecutor::succeeding(),
            no_signals(),
            12,
        );

        let result = fx.engine.handle("unlock the front door").await.expect("handle");
        assert!(result.success);
        assert_eq!(fx.executor.call_count(), 1);
    }

    #[tokio::test]
    async fn missing_secondary_signal_blocks_with_named_signals() {
        let mut guarded = response("unlock_door", 0.94);
        guarded.required_secondary_signals = vec!["presence".to_string()];
        let fx = fixture(
            &guarded,
            GuardrailSettings::default(),
            RecordingExecutor::succeeding(),
            no_signals(),
            12,
        );

        let result = fx.engine.handle("unlock the front door").await.expect("handle");
        assert_eq!(
            result.outcome,
            HandleOutcome::Blocked(BlockReason::MissingSecondarySignals)
        );
        assert_eq!(result.message, "Secondary signals required: presence.");
    }

    #[tokio::test]
    async fn present_secondary_signal_admits_case_insensitively() {
        let mut guarded = response("unlock_door", 0.94);
        guarded.required_secondary_signals = vec!["Presence".to_string()];
        let fx = fixture(
            &guarded,
            GuardrailSettings::default(),
            RecordingExecutor::succeeding(),
            StaticSignalProvider::new(["presence"]),
            12,
        );

        let result = fx.engine.handle("unlock the front door").await.expect("handle");
        assert!(result.success);
    }

    #[tokio::test]
    async fn executor_failure_is_contained_and_leaves_dedupe_clear() {
        let fx = fixture(
            &response("turn_on", 0.9),
            GuardrailSettings::default(),
            RecordingExecutor {
                mode: ExecutorMode::FailHandling("switch unavailable".to_string()),
                calls: Mutex::new(Vec::new()),
            },
            no_signals(),
            12,
        );

        let result = fx.engine.handle("lights on").await.expect("handle");
        assert!(!result.success);
        assert_eq!(result.message, "Intent execution failed: switch unavailable");
        assert_eq!(result.outcome, HandleOutcome::Failed);
        assert_eq!(fx.telemetry.iter_recent()[0].outcome, Outcome::Failed);

        // No dedupe timestamp was written; the same command retries at once.
        let retry = fx.engine.handle("lights on").await.expect("retry");
        assert_eq!(retry.outcome, HandleOutcome::Failed);
        assert_eq!(fx.executor.call_count(), 2);
    }

    #[tokio::test]
    async fn unexpected_executor_failure_uses_generic_message() {
        let fx = fixture(
            &response("turn_on", 0.9),
            GuardrailSettings::default(),
            RecordingExecutor {
                mode: ExecutorMode::FailUnexpected,
                calls: Mutex::new(Vec::new()),
            },
            no_signals(),
            12,
        );

        let result = fx.engine.handle("lights on").await.expect("handle");
        assert_eq!(result.message, "Intent execution failed due to an unexpected error.");
        assert_eq!(result.outcome, HandleOutcome::Failed);
    }

    #[tokio::test]
    async fn signature_rejection_propagates_to_the_caller() {
        let transport = Arc::new(ScriptedTransport::with_status(401));
        let engine = ConversationGuardrailEngine::new(
            Arc::new(AdapterClient::new(transport)),
            Arc::new(EmptyCatalog),
            Arc::new(RecordingExecutor::succeeding()),
            Arc::new(no_signals()),
            Arc::new(TelemetryRecorder::new(4)),
            Arc::new(TestClock::new(12)),
            GuardrailSettings::default(),
        );

        let result = engine.handle("lights on").await;
        assert!(matches!(result, Err(AdapterError::SignatureRejected)));
    }

    #[tokio::test]
    async fn shared_secret_from_settings_signs_adapter_requests() {
        let fx = fixture(
            &response("turn_on", 0.9),
            GuardrailSettings {
                shared_secret: Some(SecretString::from("rail-secret")),
                ..GuardrailSettings::default()
            },
            RecordingExecutor::succeeding(),
            no_signals(),
            12,
        );

        fx.engine.handle("lights on").await.expect("handle");

        let posts = fx.transport.posts.lock().expect("posts lock");
        let (body, signature) = &posts[0];
        let signature = signature.as_deref().expect("signed request");
        assert!(hearth_core::signing::verify_hmac_hex(b"rail-secret", body, signature));
    }

    #[test]
    fn hour_window_handles_wrap_around_and_full_day() {
        assert!(hour_in_window(23, 23, 6));
        assert!(hour_in_window(3, 23, 6));
        assert!(!hour_in_window(12, 23, 6));
        assert!(hour_in_window(7, 7, 21));
        assert!(!hour_in_window(22, 7, 21));
        assert!(hour_in_window(15, 4, 4));
    }
}
