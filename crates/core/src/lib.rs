pub mod chunker;
pub mod embeddings;
pub mod error;
pub mod ingest;
pub mod models;
pub mod normalize;
pub mod rerank;
pub mod retrieval;
pub mod sections;
pub mod store;
pub mod stores;
pub mod tokenize;

pub use chunker::chunk_source;
pub use embeddings::{
    cosine_similarity, Embedder, HashedTrigramEmbedder, DEFAULT_EMBEDDING_DIMENSIONS,
};
pub use error::{IngestError, RetrieveError, StoreError};
pub use ingest::{
    digest_text, discover_note_files, FolderReport, IngestPipeline, IngestReport, SkippedNote,
};
pub use models::{
    page_at, ChunkerConfig, PageBoundary, PageSpan, RerankWeights, RetrievalConfig, RetrievalQuery,
    RetrievalResult, ScoreBreakdown, ScoredChunk, Source, SourceKind, TextChunk,
};
pub use normalize::{
    decode_text, normalize, NormalizedSource, NormalizerConfig, RemovalReason, RemovedSpan,
};
pub use rerank::{RerankCandidate, Reranker};
pub use retrieval::RetrievalPipeline;
pub use sections::{detect_sections, section_at, SectionConfig, SectionSpan};
pub use store::{ChunkPayload, ChunkStore, SimilarityHit};
pub use stores::{InMemoryChunkStore, QdrantChunkStore};
pub use tokenize::{distinct_terms, fold_term, folded_tokens, token_spans, TokenSpan};
