pub mod catalog;
pub mod config;
pub mod guardrails;
pub mod interpret;
pub mod signing;
pub mod telemetry;

pub use catalog::{CatalogArea, CatalogEntity, CatalogPayload, CatalogScene, MediaItem};
pub use guardrails::{GuardrailBundle, IntentConfig};
pub use interpret::{normalize_utterance, InterpretRequest, InterpretResponse};
pub use telemetry::{Outcome, TelemetryEvent, TelemetryRecorder};
