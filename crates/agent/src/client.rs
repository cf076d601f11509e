//! Signed HTTP client for the adapter interpret endpoint.
//!
//! Every failure mode except signature rejection degrades into a safe noop
//! response, so the guardrail engine always receives a well-formed object.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{info, warn};

use hearth_core::catalog::CatalogPayload;
use hearth_core::interpret::{InterpretRequest, InterpretResponse};
use hearth_core::signing::hmac_hex;

pub use hearth_core::signing::SIGNATURE_HEADER;

const DEFAULT_ADAPTER_TIMEOUT: Duration = Duration::from_millis(1_500);

/// The one hard error: a 401 from the adapter means the shared secret is
/// misconfigured and needs operator attention.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("adapter rejected the request signature")]
    SignatureRejected,
}

#[derive(Debug, Error)]
pub enum TransportFailure {
    #[error("adapter request timed out")]
    Timeout,
    #[error("adapter request failed: {0}")]
    Request(String),
}

pub struct TransportReply {
    pub status: u16,
    pub body: Vec<u8>,
}

#[async_trait]
pub trait InterpretTransport: Send + Sync {
    async fn post(
        &self,
        body: &[u8],
        signature: Option<&str>,
    ) -> Result<TransportReply, TransportFailure>;
}

pub struct HttpInterpretTransport {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpInterpretTransport {
    pub fn new(endpoint: impl Into<String>, timeout: Option<Duration>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout.unwrap_or(DEFAULT_ADAPTER_TIMEOUT))
            .build()
            .context("building adapter HTTP client")?;
        Ok(Self { client, endpoint: endpoint.into() })
    }
}

#[async_trait]
impl InterpretTransport for HttpInterpretTransport {
    async fn post(
        &self,
        body: &[u8],
        signature: Option<&str>,
    ) -> Result<TransportReply, TransportFailure> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "application/json")
            .body(body.to_vec());
        if let Some(signature) = signature {
            request = request.header(SIGNATURE_HEADER, signature);
        }

        let response = request.send().await.map_err(|error| {
            if error.is_timeout() {
                TransportFailure::Timeout
            } else {
                TransportFailure::Request(error.to_string())
            }
        })?;

        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|error| TransportFailure::Request(error.to_string()))?
            .to_vec();
        Ok(TransportReply { status, body })
    }
}

pub struct AdapterClient {
    transport: Arc<dyn InterpretTransport>,
    shared_secret: Mutex<Option<SecretString>>,
}

impl AdapterClient {
    pub fn new(transport: Arc<dyn InterpretTransport>) -> Self {
        Self { transport, shared_secret: Mutex::new(None) }
    }

    pub fn set_shared_secret(&self, secret: Option<SecretString>) {
        let mut slot = self.shared_secret.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *slot = secret.filter(|secret| !secret.expose_secret().is_empty());
    }

    /// Interpret `utterance` against the catalog snapshot. The request body
    /// is serialized once and the signature is computed over exactly those
    /// bytes. Only a 401 propagates; everything else becomes a noop fallback.
    pub async fn interpret(
        &self,
        utterance: &str,
        catalog: &CatalogPayload,
        intents: &BTreeMap<String, BTreeMap<String, Value>>,
    ) -> Result<InterpretResponse, AdapterError> {
        let request = InterpretRequest {
            utterance: utterance.to_string(),
            catalog: catalog.clone(),
            intents: intents.clone(),
        };
        let body = match serde_json::to_vec(&request) {
            Ok(body) => body,
            Err(error) => {
                warn!(
                    event_name = "adapter.serialize_failed",
                    utterance,
                    error = %error,
                );
                return Ok(InterpretResponse::fallback(
                    utterance,
                    "Adapter request could not be serialized",
                ));
            }
        };

        let fingerprint = catalog.fingerprint();
        let signature = {
            let secret =
                self.shared_secret.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            secret
                .as_ref()
                .map(|secret| hmac_hex(secret.expose_secret().as_bytes(), &body))
        };

        info!(
            event_name = "adapter.interpret",
            utterance,
            fingerprint = %fingerprint,
            signed = signature.is_some(),
        );

        let reply = match self.transport.post(&body, signature.as_deref()).await {
            Ok(reply) => reply,
            Err(failure) => {
                warn!(
                    event_name = "adapter.transport_failed",
                    utterance,
                    fingerprint = %fingerprint,
                    error = %failure,
                );
                return Ok(InterpretResponse::fallback(utterance, &failure.to_string()));
            }
        };

        if reply.status == 401 {
            warn!(
                event_name = "adapter.signature_rejected",
                utterance,
                fingerprint = %fingerprint,
            );
            return Err(AdapterError::SignatureRejected);
        }
        if !(200..300).contains(&reply.status) {
            warn!(
                event_name = "adapter.bad_status",
                utterance,
                fingerprint = %fingerprint,
                status = reply.status,
            );
            return Ok(InterpretResponse::fallback(
                utterance,
                &format!("Adapter returned status {}", reply.status),
            ));
        }

        let parsed = serde_json::from_slice::<Value>(&reply.body)
            .ok()
            .as_ref()
            .and_then(InterpretResponse::from_value);
        match parsed {
            Some(response) => {
                info!(
                    event_name = "adapter.interpreted",
                    utterance,
                    fingerprint = %fingerprint,
                    intent = %response.intent,
                    confidence = response.confidence,
                );
                Ok(response)
            }
            None => {
                warn!(
                    event_name = "adapter.invalid_response",
                    utterance,
                    fingerprint = %fingerprint,
                );
                Ok(InterpretResponse::fallback(
                    utterance,
                    "Adapter returned an invalid response",
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use secrecy::SecretString;
    use serde_json::json;

    use hearth_core::catalog::CatalogPayload;
    use hearth_core::signing::verify_hmac_hex;

    use super::{
        AdapterClient, AdapterError, InterpretTransport, TransportFailure, TransportReply,
    };

    struct RecordingTransport {
        status: u16,
        body: Vec<u8>,
        fail: Option<TransportFailure>,
        seen: Mutex<Vec<(Vec<u8>, Option<String>)>>,
    }

    impl RecordingTransport {
        fn replying(status: u16, body: serde_json::Value) -> Self {
            Self {
                status,
                body: serde_json::to_vec(&body).expect("serialize fixture"),
                fail: None,
                seen: Mutex::new(Vec::new()),
            }
        }

        fn failing(failure: TransportFailure) -> Self {
            Self { status: 0, body: Vec::new(), fail: Some(failure), seen: Mutex::new(Vec::new()) }
        }
    }

    #[async_trait]
    impl InterpretTransport for RecordingTransport {
        async fn post(
            &self,
            body: &[u8],
            signature: Option<&str>,
        ) -> Result<TransportReply, TransportFailure> {
            self.seen
                .lock()
                .expect("seen lock")
                .push((body.to_vec(), signature.map(str::to_string)));
            match &self.fail {
                Some(TransportFailure::Timeout) => Err(TransportFailure::Timeout),
                Some(TransportFailure::Request(detail)) => {
                    Err(TransportFailure::Request(detail.clone()))
                }
                None => Ok(TransportReply { status: self.status, body: self.body.clone() }),
            }
        }
    }

    #[tokio::test]
    async fn timeout_degrades_to_noop_with_reason() {
        let transport = Arc::new(RecordingTransport::failing(TransportFailure::Timeout));
        let client = AdapterClient::new(transport);

        let response = client
            .interpret("open the blinds", &CatalogPayload::default(), &BTreeMap::new())
            .await
            .expect("timeout must not propagate");

        assert_eq!(response.intent, "noop");
        assert!(response.adapter_error.as_deref().unwrap_or_default().contains("timed out"));
        assert!(response.params.contains_key("reason"));
    }

    #[tokio::test]
    async fn status_401_propagates_as_signature_rejection() {
        let transport = Arc::new(RecordingTransport::replying(401, json!({"detail": "nope"})));
        let client = AdapterClient::new(transport);

        let result = client
            .interpret("open the blinds", &CatalogPayload::default(), &BTreeMap::new())
            .await;
        assert!(matches!(result, Err(AdapterError::SignatureRejected)));
    }

    #[tokio::test]
    async fn other_bad_statuses_become_fallback() {
        let transport = Arc::new(RecordingTransport::replying(503, json!({})));
        let client = AdapterClient::new(transport);

        let response = client
            .interpret("open the blinds", &CatalogPayload::default(), &BTreeMap::new())
            .await
            .expect("non-401 must not propagate");
        assert_eq!(response.intent, "noop");
        assert!(response.adapter_error.as_deref().unwrap_or_default().contains("503"));
    }

    #[tokio::test]
    async fn invalid_response_schema_becomes_fallback() {
        let transport =
            Arc::new(RecordingTransport::replying(200, json!({"confidence": 0.9})));
        let client = AdapterClient::new(transport);

        let response = client
            .interpret("open the blinds", &CatalogPayload::default(), &BTreeMap::new())
            .await
            .expect("invalid schema must not propagate");
        assert_eq!(response.intent, "noop");
    }

    #[tokio::test]
    async fn signature_covers_the_exact_body_bytes() {
        let transport = Arc::new(RecordingTransport::replying(
            200,
            json!({"intent": "turn_on", "confidence": 0.9}),
        ));
        let client = AdapterClient::new(transport.clone());
        client.set_shared_secret(Some(SecretString::from("shared-secret")));

        let response = client
            .interpret("turn on the lights", &CatalogPayload::default(), &BTreeMap::new())
            .await
            .expect("interpret");
        assert_eq!(response.intent, "turn_on");

        let seen = transport.seen.lock().expect("seen lock");
        let (body, signature) = &seen[0];
        let signature = signature.as_deref().expect("request must be signed");
        assert!(verify_hmac_hex(b"shared-secret", body, signature));
    }

    #[tokio::test]
    async fn empty_secret_disables_signing() {
        let transport = Arc::new(RecordingTransport::replying(
            200,
            json!({"intent": "turn_on", "confidence": 0.9}),
        ));
        let client = AdapterClient::new(transport.clone());
        client.set_shared_secret(Some(SecretString::from("")));

        client
            .interpret("turn on the lights", &CatalogPayload::default(), &BTreeMap::new())
            .await
            .expect("interpret");

        let seen = transport.seen.lock().expect("seen lock");
        assert!(seen[0].1.is_none());
    }
}
