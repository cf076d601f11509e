//! Guardrail-side agent: the signed adapter client, the conversation
//! guardrail engine, and secondary-signal providers.

pub mod client;
pub mod engine;
pub mod signals;

pub use client::{
    AdapterClient, AdapterError, HttpInterpretTransport, InterpretTransport, TransportFailure,
    TransportReply, SIGNATURE_HEADER,
};
pub use engine::{
    BlockReason, CatalogProvider, ConversationGuardrailEngine, ConversationResult, EngineClock,
    ExecutionError, GuardrailSettings, HandleOutcome, IntentExecutor, SystemClock,
};
pub use signals::{SecondarySignalProvider, StaticSignalProvider, VoiceSignalTracker};
