//! Wire the interpretation service from configuration.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use hearth_core::config::AppConfig;
use hearth_interpret::{
    CatalogSliceCache, HttpEmbedder, HttpVectorSearch, InterpretationService, VectorRetriever,
};
use hearth_interpret::stream::{HttpModelTransport, NoRepair, StreamingInterpreter};

use crate::routes::AppState;

pub fn build_state(config: &AppConfig) -> Result<AppState> {
    let embedder = HttpEmbedder::new(
        config.model.base_url.clone(),
        config.model.api_key.clone(),
        config.model.embedding_model.clone(),
        Duration::from_millis(config.model.timeout_ms),
    )?;

    let search = HttpVectorSearch::new(
        config.vector.host.clone(),
        config.vector.api_key.clone(),
        Duration::from_millis(config.vector.timeout_ms),
    )?;
    let retriever = VectorRetriever::new(
        Arc::new(search),
        Duration::from_millis(config.vector.timeout_ms),
        config.vector.top_k,
    );

    let transport = HttpModelTransport::new(
        config.model.base_url.clone(),
        config.model.api_key.clone(),
        Duration::from_millis(config.model.timeout_ms),
    )?;
    let interpreter = StreamingInterpreter::new(
        Arc::new(transport),
        Arc::new(NoRepair),
        config.model.model.clone(),
    );

    let service = InterpretationService::new(
        CatalogSliceCache::new(config.adapter.cache_size),
        Arc::new(embedder),
        retriever,
        interpreter,
        config.adapter.confidence_threshold,
    );

    Ok(AppState {
        service: Arc::new(service),
        shared_secret: config.adapter.shared_secret.clone(),
    })
}
