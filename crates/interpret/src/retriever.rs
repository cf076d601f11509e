//! Parallel vector retrieval over the entity and media collections.
//!
//! The two collection searches run concurrently with independent timeouts.
//! A failed or slow collection degrades to an empty result for that
//! collection only; retrieval as a whole never fails.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::warn;

use crate::slice::{filter_entity_payload, filter_media_payload};

pub const ENTITY_COLLECTION: &str = "ha_entities";
pub const MEDIA_COLLECTION: &str = "plex_media";

/// Raw search result as returned by the vector store.
#[derive(Clone, Debug, Deserialize)]
pub struct ScoredPoint {
    pub id: Value,
    #[serde(default)]
    pub score: f64,
    #[serde(default)]
    pub payload: Option<Value>,
}

#[async_trait]
pub trait VectorSearch: Send + Sync {
    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
    ) -> Result<Vec<ScoredPoint>>;
}

/// Normalized retrieval result: canonical payload subset plus a prompt-ready
/// summary line.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct RetrievedItem {
    pub id: Value,
    pub score: f64,
    pub payload: Value,
    pub summary: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct RetrievedContext {
    #[serde(rename = "ha_entities")]
    pub entities: Vec<RetrievedItem>,
    #[serde(rename = "plex_media")]
    pub media: Vec<RetrievedItem>,
}

impl RetrievedContext {
    /// Collection ids for audit logging.
    pub fn ids(&self) -> Value {
        json!({
            ENTITY_COLLECTION: self.entities.iter().map(|item| item.id.clone()).collect::<Vec<_>>(),
            MEDIA_COLLECTION: self.media.iter().map(|item| item.id.clone()).collect::<Vec<_>>(),
        })
    }
}

pub struct VectorRetriever {
    search: Arc<dyn VectorSearch>,
    timeout: Duration,
    top_k: usize,
}

impl VectorRetriever {
    pub fn new(search: Arc<dyn VectorSearch>, timeout: Duration, top_k: usize) -> Self {
        Self { search, timeout, top_k: top_k.max(1) }
    }

    pub async fn retrieve(&self, vector: &[f32]) -> RetrievedContext {
        if vector.is_empty() {
            return RetrievedContext::default();
        }

        let (entities, media) = tokio::join!(
            self.search_collection(ENTITY_COLLECTION, vector),
            self.search_collection(MEDIA_COLLECTION, vector),
        );

        RetrievedContext {
            entities: normalize_points(ENTITY_COLLECTION, entities),
            media: normalize_points(MEDIA_COLLECTION, media),
        }
    }

    async fn search_collection(&self, collection: &str, vector: &[f32]) -> Vec<ScoredPoint> {
        let outcome =
            tokio::time::timeout(self.timeout, self.search.search(collection, vector, self.top_k))
                .await;
        match outcome {
            Ok(Ok(points)) => points,
            Ok(Err(error)) => {
                warn!(
                    event_name = "retrieval.collection_failed",
                    collection,
                    error = %error,
                    "vector search failed, degrading to empty results"
                );
                Vec::new()
            }
            Err(_) => {
                warn!(
                    event_name = "retrieval.collection_timeout",
                    collection,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "vector search timed out, degrading to empty results"
                );
                Vec::new()
            }
        }
    }
}

fn normalize_points(collection: &str, points: Vec<ScoredPoint>) -> Vec<RetrievedItem> {
    points
        .into_iter()
        .filter_map(|point| {
            let payload = point.payload.as_ref()?.as_object()?;
            let (filtered, summary) = match collection {
                ENTITY_COLLECTION => filter_entity_payload(payload),
                MEDIA_COLLECTION => filter_media_payload(payload),
                _ => return None,
            };
            Some(RetrievedItem {
                id: point.id,
                score: point.score,
                payload: Value::Object(filtered),
                summary,
            })
        })
        .collect()
}

/// Qdrant-style HTTP search. An unset host behaves as an always-empty store.
pub struct HttpVectorSearch {
    client: reqwest::Client,
    host: Option<String>,
    api_key: Option<SecretString>,
}

#[derive(Deserialize)]
struct SearchReply {
    #[serde(default)]
    result: Vec<ScoredPoint>,
}

impl HttpVectorSearch {
    pub fn new(
        host: Option<String>,
        api_key: Option<SecretString>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("building vector search HTTP client")?;
        Ok(Self {
            client,
            host: host.map(|value| value.trim_end_matches('/').to_string()),
            api_key,
        })
    }
}

#[async_trait]
impl VectorSearch for HttpVectorSearch {
    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
    ) -> Result<Vec<ScoredPoint>> {
        let Some(host) = &self.host else {
            return Ok(Vec::new());
        };
        if vector.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!("{host}/collections/{collection}/points/search");
        let mut request = self.client.post(&url).json(&json!({
            "vector": vector,
            "limit": limit,
            "with_payload": true,
            "with_vectors": false,
        }));
        if let Some(api_key) = &self.api_key {
            request = request.header("api-key", api_key.expose_secret());
        }

        let reply: SearchReply = request
            .send()
            .await
            .with_context(|| format!("searching collection {collection}"))?
            .error_for_status()
            .with_context(|| format!("collection {collection} returned an error status"))?
            .json()
            .await
            .with_context(|| format!("decoding search reply for {collection}"))?;

        Ok(reply.result)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use serde_json::json;

    use super::{
        ScoredPoint, VectorRetriever, VectorSearch, ENTITY_COLLECTION, MEDIA_COLLECTION,
    };

    struct SplitSearch;

    #[async_trait]
    impl VectorSearch for SplitSearch {
        async fn search(
            &self,
            collection: &str,
            _vector: &[f32],
            _limit: usize,
        ) -> Result<Vec<ScoredPoint>> {
            if collection == ENTITY_COLLECTION {
                return Err(anyhow!("collection offline"));
            }
            Ok(vec![ScoredPoint {
                id: json!(7),
                score: 0.83,
                payload: Some(json!({
                    "rating_key": "42",
                    "title": "Blade Runner",
                    "media_type": "movie",
                    "year": 1982,
                })),
            }])
        }
    }

    struct SlowSearch;

    #[async_trait]
    impl VectorSearch for SlowSearch {
        async fn search(
            &self,
            collection: &str,
            _vector: &[f32],
            _limit: usize,
        ) -> Result<Vec<ScoredPoint>> {
            if collection == ENTITY_COLLECTION {
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
            Ok(vec![ScoredPoint { id: json!("m1"), score: 0.5, payload: Some(json!({"title": "Heat"})) }])
        }
    }

    #[tokio::test]
    async fn failed_collection_degrades_to_empty_without_failing_the_other() {
        let retriever = VectorRetriever::new(Arc::new(SplitSearch), Duration::from_millis(100), 8);
        let context = retriever.retrieve(&[0.1, 0.2]).await;

        assert!(context.entities.is_empty());
        assert_eq!(context.media.len(), 1);
        assert_eq!(context.media[0].summary, "Blade Runner | movie | 1982");
    }

    #[tokio::test]
    async fn timed_out_collection_degrades_to_empty() {
        let retriever = VectorRetriever::new(Arc::new(SlowSearch), Duration::from_millis(50), 8);
        let context = retriever.retrieve(&[0.1]).await;

        assert!(context.entities.is_empty());
        assert_eq!(context.media.len(), 1);
    }

    #[tokio::test]
    async fn empty_vector_short_circuits_to_empty_context() {
        let retriever = VectorRetriever::new(Arc::new(SplitSearch), Duration::from_millis(50), 8);
        let context = retriever.retrieve(&[]).await;
        assert!(context.entities.is_empty());
        assert!(context.media.is_empty());
    }

    #[test]
    fn ids_reports_both_collections() {
        let retriever_ids = super::RetrievedContext {
            entities: vec![super::RetrievedItem { id: json!("e1"), ..Default::default() }],
            media: Vec::new(),
        }
        .ids();
        assert_eq!(retriever_ids[ENTITY_COLLECTION], json!(["e1"]));
        assert_eq!(retriever_ids[MEDIA_COLLECTION], json!([]));
    }
}
