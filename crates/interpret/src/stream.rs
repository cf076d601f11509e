//! Streaming model interpretation with incremental line parsing,
//! validation, and a single repair attempt per fragment.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, warn};

use hearth_core::interpret::InterpretResponse;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("model endpoint returned status {0}")]
    Status(u16),
    #[error("model request failed: {0}")]
    Request(#[from] reqwest::Error),
}

/// Raw text chunks as they arrive from the model connection.
pub type ChunkStream = BoxStream<'static, Result<String, TransportError>>;

#[async_trait]
pub trait ModelTransport: Send + Sync {
    async fn open(&self, payload: Value) -> Result<ChunkStream, TransportError>;
}

/// One-shot schema repair for fragments that parsed but failed validation.
#[async_trait]
pub trait Repairer: Send + Sync {
    async fn repair(&self, utterance: &str, prompt: &Value, raw: &Value) -> Option<Value>;
}

pub struct NoRepair;

#[async_trait]
impl Repairer for NoRepair {
    async fn repair(&self, _utterance: &str, _prompt: &Value, _raw: &Value) -> Option<Value> {
        None
    }
}

/// Streaming chat-completions transport. The client timeout bounds the whole
/// connection, so a stalled model cannot hold an interpretation open.
pub struct HttpModelTransport {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<SecretString>,
}

impl HttpModelTransport {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<SecretString>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("building model HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        })
    }
}

#[async_trait]
impl ModelTransport for HttpModelTransport {
    async fn open(&self, payload: Value) -> Result<ChunkStream, TransportError> {
        let url = format!("{}/chat/completions", self.base_url);
        let mut request = self.client.post(&url).json(&payload);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key.expose_secret());
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(TransportError::Status(response.status().as_u16()));
        }

        let chunks = response
            .bytes_stream()
            .map(|chunk| {
                chunk
                    .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
                    .map_err(TransportError::from)
            })
            .boxed();
        Ok(chunks)
    }
}

pub struct StreamingInterpreter {
    transport: Arc<dyn ModelTransport>,
    repairer: Arc<dyn Repairer>,
    model: Option<String>,
}

impl StreamingInterpreter {
    pub fn new(
        transport: Arc<dyn ModelTransport>,
        repairer: Arc<dyn Repairer>,
        model: Option<String>,
    ) -> Self {
        Self { transport, repairer, model: model.filter(|name| !name.is_empty()) }
    }

    /// Open a model stream for `utterance` against `prompt`. With no model
    /// configured, or when the connection cannot be opened, the returned
    /// stream is immediately exhausted.
    pub async fn stream(&self, utterance: &str, prompt: &Value) -> InterpretStream {
        let Some(model) = &self.model else {
            return InterpretStream::exhausted(utterance, prompt, self.repairer.clone());
        };

        let payload = build_chat_payload(model, utterance, prompt);
        match self.transport.open(payload).await {
            Ok(chunks) => InterpretStream {
                chunks: Some(chunks),
                buffer: String::new(),
                pending: VecDeque::new(),
                utterance: utterance.to_string(),
                prompt: prompt.clone(),
                repairer: self.repairer.clone(),
                first_chunk: None,
            },
            Err(error) => {
                warn!(
                    event_name = "interpret.stream_open_failed",
                    utterance,
                    error = %error,
                    "model stream could not be opened"
                );
                InterpretStream::exhausted(utterance, prompt, self.repairer.clone())
            }
        }
    }
}

fn build_chat_payload(model: &str, utterance: &str, prompt: &Value) -> Value {
    let serialized =
        serde_json::to_string(&json!({ "utterance": utterance, "context": prompt }))
            .unwrap_or_default();
    json!({
        "model": model,
        "stream": true,
        "temperature": 0.0,
        "response_format": {"type": "json_object"},
        "messages": [
            {
                "role": "system",
                "content": "You are a smart-home interpretation adapter. Respond with \
                            JSON matching the interpret response schema.",
            },
            {"role": "user", "content": serialized},
        ],
    })
}

/// Pull-based stream of validated responses. Dropping the stream abandons
/// the underlying connection, which is how early stop cancels the model call.
pub struct InterpretStream {
    chunks: Option<ChunkStream>,
    buffer: String,
    pending: VecDeque<String>,
    utterance: String,
    prompt: Value,
    repairer: Arc<dyn Repairer>,
    first_chunk: Option<Instant>,
}

impl InterpretStream {
    fn exhausted(utterance: &str, prompt: &Value, repairer: Arc<dyn Repairer>) -> Self {
        Self {
            chunks: None,
            buffer: String::new(),
            pending: VecDeque::new(),
            utterance: utterance.to_string(),
            prompt: prompt.clone(),
            repairer,
            first_chunk: None,
        }
    }

    /// Arrival time of the first raw chunk, `None` until one has been pulled.
    pub fn first_chunk_at(&self) -> Option<Instant> {
        self.first_chunk
    }

    /// Next validated response, or `None` once the stream is exhausted.
    ///
    /// Fragments that fail parsing, or fail validation after one repair
    /// attempt, are dropped silently and consumption continues.
    pub async fn next(&mut self) -> Option<InterpretResponse> {
        loop {
            while let Some(line) = self.pending.pop_front() {
                match process_line(&line, &self.utterance, &self.prompt, self.repairer.as_ref())
                    .await
                {
                    LineOutcome::Response(response) => return Some(response),
                    LineOutcome::Done => {
                        self.chunks = None;
                        self.pending.clear();
                        return None;
                    }
                    LineOutcome::Skip => {}
                }
            }

            let chunks = self.chunks.as_mut()?;
            match chunks.next().await {
                Some(Ok(text)) => {
                    self.first_chunk.get_or_insert_with(Instant::now);
                    self.buffer.push_str(&text);
                    self.split_complete_lines();
                }
                Some(Err(error)) => {
                    warn!(
                        event_name = "interpret.stream_failed",
                        utterance = %self.utterance,
                        error = %error,
                        "model stream aborted"
                    );
                    self.chunks = None;
                    return None;
                }
                // EOF: a trailing partial line in the buffer is discarded.
                None => {
                    self.chunks = None;
                    return None;
                }
            }
        }
    }

    fn split_complete_lines(&mut self) {
        while let Some(newline) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=newline).collect();
            self.pending.push_back(line);
        }
    }

}

enum LineOutcome {
    Response(InterpretResponse),
    Done,
    Skip,
}

// Free functions rather than methods: `next` must not hold a shared borrow of
// the whole stream across these awaits, since the boxed chunk stream is not
// `Sync` and the interpret future has to stay `Send`.
async fn process_line(
    raw_line: &str,
    utterance: &str,
    prompt: &Value,
    repairer: &dyn Repairer,
) -> LineOutcome {
    let mut line = raw_line.trim();
    if let Some(rest) = line.strip_prefix("data:") {
        line = rest.trim();
    }
    if line.is_empty() {
        return LineOutcome::Skip;
    }
    if line == "[DONE]" {
        return LineOutcome::Done;
    }

    let Some(parsed) = parse_fragment(line) else {
        debug!(
            event_name = "interpret.fragment_unparseable",
            utterance,
            "dropping unparseable stream fragment"
        );
        return LineOutcome::Skip;
    };

    if let Some(response) = InterpretResponse::from_value(&parsed) {
        return LineOutcome::Response(response);
    }

    match attempt_repair(&parsed, utterance, prompt, repairer).await {
        Some(response) => LineOutcome::Response(response),
        None => {
            debug!(
                event_name = "interpret.fragment_invalid",
                utterance,
                "dropping fragment that failed validation and repair"
            );
            LineOutcome::Skip
        }
    }
}

/// One repair attempt; the repaired payload is re-validated with repair
/// disabled so a bad repairer cannot loop.
async fn attempt_repair(
    raw: &Value,
    utterance: &str,
    prompt: &Value,
    repairer: &dyn Repairer,
) -> Option<InterpretResponse> {
    let repaired = repairer.repair(utterance, prompt, raw).await?;
    InterpretResponse::from_value(&repaired)
}

/// Parse a fragment as JSON; on failure retry exactly once on the outermost
/// `{...}` substring, which recovers payloads wrapped in envelope text.
fn parse_fragment(line: &str) -> Option<Value> {
    if let Ok(value) = serde_json::from_str::<Value>(line) {
        return Some(value);
    }
    let start = line.find('{')?;
    let end = line.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str::<Value>(&line[start..=end]).ok()
}
