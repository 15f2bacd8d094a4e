use crate::embeddings::Embedder;
use crate::error::RetrieveError;
use crate::models::{RetrievalConfig, RetrievalQuery, RetrievalResult, TextChunk};
use crate::rerank::{RerankCandidate, Reranker};
use crate::store::ChunkStore;
use std::collections::HashSet;
use tracing::debug;
use uuid::Uuid;

/// Drives one query end to end: embed, over-fetch candidates, build each
/// candidate's linked neighborhood, rerank, truncate, and optionally
/// attach neighbor context. Retrieval never writes, so dropping the
/// future mid-flight leaves the store untouched.
pub struct RetrievalPipeline<S, E> {
    store: S,
    embedder: E,
    config: RetrievalConfig,
    reranker: Reranker,
}

impl<S, E> RetrievalPipeline<S, E>
where
    S: ChunkStore + Send + Sync,
    E: Embedder + Send + Sync,
{
    pub fn new(store: S, embedder: E, config: RetrievalConfig) -> Self {
        let reranker = Reranker::new(config.weights);
        Self {
            store,
            embedder,
            config,
            reranker,
        }
    }

    pub async fn retrieve(&self, query: &RetrievalQuery) -> Result<RetrievalResult, RetrieveError> {
        if query.text.trim().is_empty() {
            return Err(RetrieveError::EmptyQuery);
        }

        let query_vector = self.embedder.embed(&query.text);
        let fetch = query.top_k.max(1) * self.config.overfetch_factor.max(1);
        let hits = self.store.search(&query_vector, fetch).await?;

        if hits.is_empty() {
            debug!(query = %query.text, "no candidates for query");
            return Ok(RetrievalResult::no_results(&query.text));
        }

        let mut candidates = Vec::with_capacity(hits.len());
        for hit in hits {
            let neighbors = self.store.fetch_neighbors(hit.chunk.chunk_id, 1).await?;
            let neighborhood = assemble_neighborhood(&hit.chunk, &neighbors);
            candidates.push(RerankCandidate {
                chunk: hit.chunk,
                similarity: hit.score,
                neighborhood,
            });
        }

        let mut ranked = self.reranker.rerank(&query.text, candidates);
        ranked.truncate(query.top_k);

        if query.expand_context {
            let mut seen: HashSet<Uuid> = ranked.iter().map(|hit| hit.chunk.chunk_id).collect();
            for hit in &mut ranked {
                let neighbors = self
                    .store
                    .fetch_neighbors(hit.chunk.chunk_id, self.config.neighbor_radius)
                    .await?;
                for neighbor in neighbors {
                    if seen.insert(neighbor.chunk_id) {
                        hit.context.push(neighbor);
                    }
                }
            }
        }

        Ok(RetrievalResult {
            query: query.text.clone(),
            hits: ranked,
        })
    }
}

/// Chunk text plus whatever siblings exist, in document order.
fn assemble_neighborhood(chunk: &TextChunk, neighbors: &[TextChunk]) -> String {
    let mut parts: Vec<(u32, &str)> = neighbors
        .iter()
        .map(|neighbor| (neighbor.ordinal, neighbor.text.as_str()))
        .collect();
    parts.push((chunk.ordinal, chunk.text.as_str()));
    parts.sort_by_key(|(ordinal, _)| *ordinal);

    parts
        .into_iter()
        .map(|(_, text)| text)
        .collect::<Vec<_>>()
        .join(" ")
}
