//! End-to-end interpretation: cache, embed, retrieve, stream, fall back.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use serde::Serialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use hearth_core::catalog::CatalogPayload;
use hearth_core::interpret::{normalize_utterance, InterpretResponse};

use crate::cache::CatalogSliceCache;
use crate::embeddings::Embedder;
use crate::retriever::VectorRetriever;
use crate::slice::build_catalog_slice;
use crate::stream::StreamingInterpreter;

/// Wall-clock durations for one interpretation: overall, and from the first
/// streamed response to completion.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct MetricsSample {
    pub total_ms: f64,
    pub stream_ms: f64,
}

const MAX_SAMPLES: usize = 512;

pub struct InterpretationService {
    cache: CatalogSliceCache,
    embedder: Arc<dyn Embedder>,
    retriever: VectorRetriever,
    interpreter: StreamingInterpreter,
    confidence_threshold: f64,
    samples: Mutex<Vec<MetricsSample>>,
}

impl InterpretationService {
    pub fn new(
        cache: CatalogSliceCache,
        embedder: Arc<dyn Embedder>,
        retriever: VectorRetriever,
        interpreter: StreamingInterpreter,
        confidence_threshold: f64,
    ) -> Self {
        Self {
            cache,
            embedder,
            retriever,
            interpreter,
            confidence_threshold,
            samples: Mutex::new(Vec::new()),
        }
    }

    /// Interpret one utterance against a catalog snapshot. Never fails:
    /// degraded collaborators produce a safe noop fallback instead.
    pub async fn interpret(
        &self,
        utterance: &str,
        catalog: &CatalogPayload,
        intents: &BTreeMap<String, BTreeMap<String, Value>>,
    ) -> InterpretResponse {
        let normalized = normalize_utterance(utterance);
        let fingerprint = catalog.fingerprint();
        let slice = self.cache.get(&normalized, &fingerprint, || build_catalog_slice(catalog));

        info!(
            event_name = "interpret.start",
            utterance,
            fingerprint = %fingerprint,
        );

        let overall_start = Instant::now();

        let vector = match self.embedder.embed(utterance).await {
            Ok(vector) => vector,
            Err(error) => {
                warn!(
                    event_name = "interpret.embedding_failed",
                    utterance,
                    error = %error,
                    "proceeding with empty vector"
                );
                Vec::new()
            }
        };

        let retrieved = self.retriever.retrieve(&vector).await;
        let retrieved_ids = retrieved.ids();

        let prompt = json!({
            "utterance": utterance,
            "catalog": slice,
            "retrieved": retrieved,
            "intents": intents,
        });

        let mut stream = self.interpreter.stream(utterance, &prompt).await;
        let mut latest: Option<InterpretResponse> = None;
        let mut chunk_count = 0usize;

        while let Some(response) = stream.next().await {
            chunk_count += 1;
            let stop = response.confidence >= self.confidence_threshold;
            latest = Some(response);
            if stop {
                break;
            }
        }
        // Measured from the first raw chunk off the wire, not the first
        // validated response.
        let stream_ms = stream
            .first_chunk_at()
            .map(|start| start.elapsed().as_secs_f64() * 1000.0)
            .unwrap_or(0.0);
        // Dropping the stream abandons the connection when we stopped early.
        drop(stream);

        let total_ms = overall_start.elapsed().as_secs_f64() * 1000.0;
        self.record_sample(MetricsSample { total_ms, stream_ms });

        let response = latest.unwrap_or_else(|| {
            InterpretResponse::fallback(utterance, "Adapter produced no response")
        });

        info!(
            event_name = "interpret.complete",
            utterance,
            fingerprint = %fingerprint,
            duration_ms = total_ms,
            stream_ms,
            chunks = chunk_count,
            retrieved = %retrieved_ids,
            intent = %response.intent,
            confidence = response.confidence,
        );

        response
    }

    /// Recent duration samples, oldest first.
    pub fn samples(&self) -> Vec<MetricsSample> {
        self.samples.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).clone()
    }

    fn record_sample(&self, sample: MetricsSample) {
        let mut samples = self.samples.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if samples.len() == MAX_SAMPLES {
            samples.remove(0);
        }
        samples.push(sample);
    }
}
