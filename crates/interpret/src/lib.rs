//! Adapter-side interpretation pipeline: catalog slicing and caching,
//! embedding, vector retrieval, and the streaming model interpreter.

pub mod cache;
pub mod embeddings;
pub mod retriever;
pub mod service;
pub mod slice;
pub mod stream;

pub use cache::CatalogSliceCache;
pub use embeddings::{Embedder, HttpEmbedder};
pub use retriever::{
    HttpVectorSearch, RetrievedContext, RetrievedItem, ScoredPoint, VectorRetriever, VectorSearch,
    ENTITY_COLLECTION, MEDIA_COLLECTION,
};
pub use service::{InterpretationService, MetricsSample};
pub use slice::{build_catalog_slice, CatalogSlice};
pub use stream::{
    InterpretStream, ModelTransport, NoRepair, Repairer, StreamingInterpreter, TransportError,
};
