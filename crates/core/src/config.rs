use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::SecretString;
use serde::Deserialize;
use thiserror::Error;

pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.75;
pub const DEFAULT_MODEL_TIMEOUT_MS: u64 = 1_500;
pub const DEFAULT_VECTOR_TIMEOUT_MS: u64 = 400;
pub const DEFAULT_ADAPTER_TIMEOUT_MS: u64 = 1_500;
pub const DEFAULT_CACHE_SIZE: usize = 256;
pub const DEFAULT_DEDUPE_WINDOW_SECS: f64 = 2.0;
pub const DEFAULT_NIGHT_MODE_START_HOUR: u8 = 23;
pub const DEFAULT_NIGHT_MODE_END_HOUR: u8 = 6;
pub const DEFAULT_VECTOR_TOP_K: usize = 32;

pub use crate::telemetry::DEFAULT_TELEMETRY_CAPACITY;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub model: ModelConfig,
    pub vector: VectorConfig,
    pub adapter: AdapterConfig,
    pub guardrails: GuardrailConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
}

#[derive(Clone, Debug)]
pub struct ModelConfig {
    /// Model identifier for streaming interpretation. Unset means the
    /// interpreter yields an empty sequence instead of calling out.
    pub model: Option<String>,
    pub base_url: String,
    pub api_key: Option<SecretString>,
    pub timeout_ms: u64,
    pub embedding_model: String,
}

#[derive(Clone, Debug)]
pub struct VectorConfig {
    pub host: Option<String>,
    pub api_key: Option<SecretString>,
    pub timeout_ms: u64,
    pub top_k: usize,
}

#[derive(Clone, Debug)]
pub struct AdapterConfig {
    /// Interpret endpoint URL as seen from the guardrail side.
    pub endpoint: Option<String>,
    pub shared_secret: Option<SecretString>,
    pub timeout_ms: u64,
    pub confidence_threshold: f64,
    pub cache_size: usize,
}

#[derive(Clone, Debug)]
pub struct GuardrailConfig {
    pub confidence_gate_enabled: bool,
    pub confidence_threshold: f64,
    pub dedupe_window_secs: f64,
    pub night_mode_enabled: bool,
    pub night_mode_start_hour: u8,
    pub night_mode_end_hour: u8,
    pub telemetry_capacity: usize,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file {path:?}: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file {path:?}: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig { bind_address: "127.0.0.1".to_string(), port: 8099 },
            model: ModelConfig {
                model: None,
                base_url: "https://api.openai.com/v1".to_string(),
                api_key: None,
                timeout_ms: DEFAULT_MODEL_TIMEOUT_MS,
                embedding_model: "text-embedding-3-small".to_string(),
            },
            vector: VectorConfig {
                host: None,
                api_key: None,
                timeout_ms: DEFAULT_VECTOR_TIMEOUT_MS,
                top_k: DEFAULT_VECTOR_TOP_K,
            },
            adapter: AdapterConfig {
                endpoint: None,
                shared_secret: None,
                timeout_ms: DEFAULT_ADAPTER_TIMEOUT_MS,
                confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
                cache_size: DEFAULT_CACHE_SIZE,
            },
            guardrails: GuardrailConfig {
                confidence_gate_enabled: false,
                confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
                dedupe_window_secs: DEFAULT_DEDUPE_WINDOW_SECS,
                night_mode_enabled: false,
                night_mode_start_hour: DEFAULT_NIGHT_MODE_START_HOUR,
                night_mode_end_hour: DEFAULT_NIGHT_MODE_END_HOUR,
                telemetry_capacity: DEFAULT_TELEMETRY_CAPACITY,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            _ => Err(()),
        }
    }
}

impl AppConfig {
    /// Load configuration: defaults, then an optional `hearth.toml` patch,
    /// then `HEARTH_*` environment overrides.
    ///
    /// Numeric overrides parse leniently: a malformed value keeps the
    /// previous (documented) default rather than zeroing out a guardrail.
    /// Only unreadable or syntactically broken config files are errors.
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(path) = resolve_config_path(options.config_path.as_deref()) {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        }

        config.apply_env_overrides();
        config.sanitize();
        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
        }

        if let Some(model) = patch.model {
            if let Some(name) = model.model {
                self.model.model = non_empty(name);
            }
            if let Some(base_url) = model.base_url {
                self.model.base_url = base_url;
            }
            if let Some(api_key) = model.api_key {
                self.model.api_key = non_empty(api_key).map(SecretString::from);
            }
            if let Some(timeout_ms) = model.timeout_ms {
                self.model.timeout_ms = timeout_ms;
            }
            if let Some(embedding_model) = model.embedding_model {
                self.model.embedding_model = embedding_model;
            }
        }

        if let Some(vector) = patch.vector {
            if let Some(host) = vector.host {
                self.vector.host = non_empty(host);
            }
            if let Some(api_key) = vector.api_key {
                self.vector.api_key = non_empty(api_key).map(SecretString::from);
            }
            if let Some(timeout_ms) = vector.timeout_ms {
                self.vector.timeout_ms = timeout_ms;
            }
            if let Some(top_k) = vector.top_k {
                self.vector.top_k = top_k;
            }
        }

        if let Some(adapter) = patch.adapter {
            if let Some(endpoint) = adapter.endpoint {
                self.adapter.endpoint = non_empty(endpoint);
            }
            if let Some(shared_secret) = adapter.shared_secret {
                self.adapter.shared_secret = non_empty(shared_secret).map(SecretString::from);
            }
            if let Some(timeout_ms) = adapter.timeout_ms {
                self.adapter.timeout_ms = timeout_ms;
            }
            if let Some(confidence_threshold) = adapter.confidence_threshold {
                self.adapter.confidence_threshold = confidence_threshold;
            }
            if let Some(cache_size) = adapter.cache_size {
                self.adapter.cache_size = cache_size;
            }
        }

        if let Some(guardrails) = patch.guardrails {
            if let Some(enabled) = guardrails.confidence_gate_enabled {
                self.guardrails.confidence_gate_enabled = enabled;
            }
            if let Some(threshold) = guardrails.confidence_threshold {
                self.guardrails.confidence_threshold = threshold;
            }
            if let Some(window) = guardrails.dedupe_window_secs {
                self.guardrails.dedupe_window_secs = window;
            }
            if let Some(enabled) = guardrails.night_mode_enabled {
                self.guardrails.night_mode_enabled = enabled;
            }
            if let Some(start) = guardrails.night_mode_start_hour {
                self.guardrails.night_mode_start_hour = start;
            }
            if let Some(end) = guardrails.night_mode_end_hour {
                self.guardrails.night_mode_end_hour = end;
            }
            if let Some(capacity) = guardrails.telemetry_capacity {
                self.guardrails.telemetry_capacity = capacity;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Some(value) = read_env("HEARTH_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        set_parsed(&mut self.server.port, "HEARTH_SERVER_PORT");

        if let Some(value) = read_env("HEARTH_MODEL") {
            self.model.model = Some(value);
        }
        if let Some(value) = read_env("HEARTH_MODEL_BASE_URL") {
            self.model.base_url = value;
        }
        if let Some(value) = read_env("HEARTH_MODEL_API_KEY") {
            self.model.api_key = Some(SecretString::from(value));
        }
        set_parsed(&mut self.model.timeout_ms, "HEARTH_MODEL_TIMEOUT_MS");
        if let Some(value) = read_env("HEARTH_EMBEDDING_MODEL") {
            self.model.embedding_model = value;
        }

        if let Some(value) = read_env("HEARTH_VECTOR_HOST") {
            self.vector.host = Some(value);
        }
        if let Some(value) = read_env("HEARTH_VECTOR_API_KEY") {
            self.vector.api_key = Some(SecretString::from(value));
        }
        set_parsed(&mut self.vector.timeout_ms, "HEARTH_VECTOR_TIMEOUT_MS");
        set_parsed(&mut self.vector.top_k, "HEARTH_VECTOR_TOP_K");

        if let Some(value) = read_env("HEARTH_ADAPTER_ENDPOINT") {
            self.adapter.endpoint = Some(value);
        }
        if let Some(value) = read_env("HEARTH_SHARED_SECRET") {
            self.adapter.shared_secret = Some(SecretString::from(value));
        }
        set_parsed(&mut self.adapter.timeout_ms, "HEARTH_ADAPTER_TIMEOUT_MS");
        set_parsed(&mut self.adapter.confidence_threshold, "HEARTH_CONFIDENCE_THRESHOLD");
        set_parsed(&mut self.adapter.cache_size, "HEARTH_CACHE_SIZE");

        set_parsed(
            &mut self.guardrails.confidence_gate_enabled,
            "HEARTH_CONFIDENCE_GATE_ENABLED",
        );
        set_parsed(&mut self.guardrails.dedupe_window_secs, "HEARTH_DEDUPE_WINDOW_SECS");
        set_parsed(&mut self.guardrails.night_mode_enabled, "HEARTH_NIGHT_MODE_ENABLED");
        set_parsed(&mut self.guardrails.night_mode_start_hour, "HEARTH_NIGHT_MODE_START_HOUR");
        set_parsed(&mut self.guardrails.night_mode_end_hour, "HEARTH_NIGHT_MODE_END_HOUR");
        set_parsed(&mut self.guardrails.telemetry_capacity, "HEARTH_TELEMETRY_CAPACITY");

        if let Some(value) = read_env("HEARTH_LOG_LEVEL") {
            self.logging.level = value;
        }
        if let Some(value) = read_env("HEARTH_LOG_FORMAT") {
            if let Ok(format) = value.parse() {
                self.logging.format = format;
            }
        }
    }

    /// Clamp out-of-range values back to safe defaults. A zeroed timeout or
    /// cache would silently disable a guardrail, so bad input falls back to
    /// the documented default instead.
    fn sanitize(&mut self) {
        if self.model.timeout_ms == 0 {
            self.model.timeout_ms = DEFAULT_MODEL_TIMEOUT_MS;
        }
        if self.vector.timeout_ms == 0 {
            self.vector.timeout_ms = DEFAULT_VECTOR_TIMEOUT_MS;
        }
        if self.vector.top_k == 0 {
            self.vector.top_k = DEFAULT_VECTOR_TOP_K;
        }
        if self.adapter.timeout_ms == 0 {
            self.adapter.timeout_ms = DEFAULT_ADAPTER_TIMEOUT_MS;
        }
        if self.adapter.cache_size == 0 {
            self.adapter.cache_size = DEFAULT_CACHE_SIZE;
        }
        if !(0.0..=1.0).contains(&self.adapter.confidence_threshold) {
            self.adapter.confidence_threshold = DEFAULT_CONFIDENCE_THRESHOLD;
        }
        if !(0.0..=1.0).contains(&self.guardrails.confidence_threshold) {
            self.guardrails.confidence_threshold = DEFAULT_CONFIDENCE_THRESHOLD;
        }
        if self.guardrails.dedupe_window_secs < 0.0
            || !self.guardrails.dedupe_window_secs.is_finite()
        {
            self.guardrails.dedupe_window_secs = DEFAULT_DEDUPE_WINDOW_SECS;
        }
        if self.guardrails.night_mode_start_hour > 23 {
            self.guardrails.night_mode_start_hour = DEFAULT_NIGHT_MODE_START_HOUR;
        }
        if self.guardrails.night_mode_end_hour > 23 {
            self.guardrails.night_mode_end_hour = DEFAULT_NIGHT_MODE_END_HOUR;
        }
        if self.guardrails.telemetry_capacity == 0 {
            self.guardrails.telemetry_capacity = DEFAULT_TELEMETRY_CAPACITY;
        }
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("hearth.toml"), PathBuf::from("config/hearth.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;
    toml::from_str::<ConfigPatch>(&raw)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn set_parsed<T: std::str::FromStr>(slot: &mut T, key: &str) {
    if let Some(raw) = read_env(key) {
        match raw.trim().parse::<T>() {
            Ok(value) => *slot = value,
            Err(_) => tracing::warn!(
                event_name = "config.invalid_env_override",
                key,
                raw = %raw,
                "ignoring malformed environment override"
            ),
        }
    }
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    server: Option<ServerPatch>,
    model: Option<ModelPatch>,
    vector: Option<VectorPatch>,
    adapter: Option<AdapterPatch>,
    guardrails: Option<GuardrailPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
}

#[derive(Debug, Default, Deserialize)]
struct ModelPatch {
    model: Option<String>,
    base_url: Option<String>,
    api_key: Option<String>,
    timeout_ms: Option<u64>,
    embedding_model: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct VectorPatch {
    host: Option<String>,
    api_key: Option<String>,
    timeout_ms: Option<u64>,
    top_k: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct AdapterPatch {
    endpoint: Option<String>,
    shared_secret: Option<String>,
    timeout_ms: Option<u64>,
    confidence_threshold: Option<f64>,
    cache_size: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct GuardrailPatch {
    confidence_gate_enabled: Option<bool>,
    confidence_threshold: Option<f64>,
    dedupe_window_secs: Option<f64>,
    night_mode_enabled: Option<bool>,
    night_mode_start_hour: Option<u8>,
    night_mode_end_hour: Option<u8>,
    telemetry_capacity: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
