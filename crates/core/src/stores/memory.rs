use crate::embeddings::cosine_similarity;
use crate::error::StoreError;
use crate::models::TextChunk;
use crate::store::{ChunkPayload, ChunkStore, SimilarityHit};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use uuid::Uuid;

#[derive(Debug)]
struct StoredPoint {
    payload: ChunkPayload,
    vector: Vec<f32>,
    sequence: usize,
}

/// Reference store kept in process memory. Mirrors the wire store's
/// contract, including the earliest-stored tie-break, which makes it the
/// test double for every pipeline-level test.
#[derive(Debug, Default)]
pub struct InMemoryChunkStore {
    inner: RwLock<MemoryInner>,
}

#[derive(Debug, Default)]
struct MemoryInner {
    points: HashMap<Uuid, StoredPoint>,
    next_sequence: usize,
}

impl InMemoryChunkStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .points
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ChunkStore for InMemoryChunkStore {
    async fn store(
        &self,
        chunks: &[TextChunk],
        embeddings: &[Vec<f32>],
        overwrite: bool,
    ) -> Result<(), StoreError> {
        if chunks.len() != embeddings.len() {
            return Err(StoreError::Request(format!(
                "embedding count {} does not match chunk count {}",
                embeddings.len(),
                chunks.len()
            )));
        }

        let ingested_at = Utc::now();
        let payloads: Vec<ChunkPayload> = chunks
            .iter()
            .map(|chunk| ChunkPayload::from_chunk(chunk, ingested_at))
            .collect();
        for payload in &payloads {
            payload.validate()?;
        }

        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);

        if !overwrite {
            for payload in &payloads {
                if inner.points.contains_key(&payload.chunk_id) {
                    return Err(StoreError::DuplicateChunk(payload.chunk_id));
                }
            }
        }

        for (payload, vector) in payloads.into_iter().zip(embeddings.iter().cloned()) {
            // overwriting keeps the original insertion slot
            let sequence = match inner.points.get(&payload.chunk_id) {
                Some(existing) => existing.sequence,
                None => {
                    let sequence = inner.next_sequence;
                    inner.next_sequence += 1;
                    sequence
                }
            };
            inner.points.insert(
                payload.chunk_id,
                StoredPoint {
                    payload,
                    vector,
                    sequence,
                },
            );
        }

        Ok(())
    }

    async fn search(
        &self,
        query_vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<SimilarityHit>, StoreError> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);

        let mut scored: Vec<(f64, usize, ChunkPayload)> = inner
            .points
            .values()
            .map(|point| {
                (
                    cosine_similarity(query_vector, &point.vector),
                    point.sequence,
                    point.payload.clone(),
                )
            })
            .collect();

        scored.sort_by(|left, right| {
            right
                .0
                .total_cmp(&left.0)
                .then_with(|| left.1.cmp(&right.1))
        });

        Ok(scored
            .into_iter()
            .take(top_k)
            .map(|(score, _, payload)| SimilarityHit {
                chunk: payload.into_chunk(),
                score,
            })
            .collect())
    }

    async fn fetch_neighbors(
        &self,
        chunk_id: Uuid,
        radius: usize,
    ) -> Result<Vec<TextChunk>, StoreError> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);

        let Some(origin) = inner.points.get(&chunk_id) else {
            return Ok(Vec::new());
        };

        let mut before = Vec::new();
        let mut cursor = origin.payload.previous_chunk_id;
        while before.len() < radius {
            let Some(id) = cursor else { break };
            let Some(point) = inner.points.get(&id) else {
                break;
            };
            cursor = point.payload.previous_chunk_id;
            before.push(point.payload.clone().into_chunk());
        }
        before.reverse();

        let mut neighbors = before;
        let mut after = 0;
        let mut cursor = origin.payload.next_chunk_id;
        while after < radius {
            let Some(id) = cursor else { break };
            let Some(point) = inner.points.get(&id) else {
                break;
            };
            cursor = point.payload.next_chunk_id;
            neighbors.push(point.payload.clone().into_chunk());
            after += 1;
        }

        Ok(neighbors)
    }

    async fn delete_source(&self, source_id: Uuid) -> Result<(), StoreError> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner
            .points
            .retain(|_, point| point.payload.source_id != source_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::chunk_source;
    use crate::models::ChunkerConfig;
    use crate::normalize::NormalizedSource;

    fn chunks_for(source_name: &[u8], text: &str) -> Vec<TextChunk> {
        let source_id = Uuid::new_v5(&Uuid::NAMESPACE_OID, source_name);
        let normalized = NormalizedSource {
            text: text.to_string(),
            pages: Vec::new(),
            removed: Vec::new(),
        };
        let config = ChunkerConfig {
            target_tokens: 8,
            overlap_tokens: 2,
            min_tokens: 4,
        };
        chunk_source(source_id, &normalized, &[], &config).unwrap()
    }

    fn flat_vectors(count: usize) -> Vec<Vec<f32>> {
        vec![vec![1.0, 0.0, 0.0]; count]
    }

    fn long_text() -> String {
        (0..40)
            .map(|index| format!("word{index}"))
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[tokio::test]
    async fn duplicates_are_refused_unless_overwrite() {
        let store = InMemoryChunkStore::new();
        let chunks = chunks_for(b"dup-source", &long_text());
        let vectors = flat_vectors(chunks.len());

        store.store(&chunks, &vectors, false).await.unwrap();

        let error = store.store(&chunks, &vectors, false).await.unwrap_err();
        assert!(matches!(error, StoreError::DuplicateChunk(_)));

        store.store(&chunks, &vectors, true).await.unwrap();
        assert_eq!(store.len(), chunks.len());
    }

    #[tokio::test]
    async fn mismatched_embedding_count_is_refused() {
        let store = InMemoryChunkStore::new();
        let chunks = chunks_for(b"mismatch-source", &long_text());
        let vectors = flat_vectors(chunks.len() - 1);

        let error = store.store(&chunks, &vectors, false).await.unwrap_err();
        assert!(matches!(error, StoreError::Request(_)));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn equal_scores_resolve_to_the_earliest_stored_chunk() {
        let store = InMemoryChunkStore::new();
        let first = chunks_for(b"tie-first", &long_text());
        let second = chunks_for(b"tie-second", &long_text());

        store
            .store(&first, &flat_vectors(first.len()), false)
            .await
            .unwrap();
        store
            .store(&second, &flat_vectors(second.len()), false)
            .await
            .unwrap();

        let hits = store.search(&[1.0, 0.0, 0.0], 4).await.unwrap();
        assert_eq!(hits.len(), 4);
        // every score ties at 1.0, so the first source's chunks lead, in
        // insertion order
        assert_eq!(hits[0].chunk.source_id, first[0].source_id);
        assert_eq!(hits[0].chunk.ordinal, 0);
        assert_eq!(hits[1].chunk.ordinal, 1);
    }

    #[tokio::test]
    async fn neighbors_follow_links_in_document_order() {
        let store = InMemoryChunkStore::new();
        let chunks = chunks_for(b"neighbor-source", &long_text());
        assert!(chunks.len() >= 4);
        store
            .store(&chunks, &flat_vectors(chunks.len()), false)
            .await
            .unwrap();

        let middle = &chunks[2];
        let neighbors = store.fetch_neighbors(middle.chunk_id, 1).await.unwrap();
        assert_eq!(neighbors.len(), 2);
        assert_eq!(neighbors[0].ordinal, 1);
        assert_eq!(neighbors[1].ordinal, 3);

        let wide = store.fetch_neighbors(middle.chunk_id, 10).await.unwrap();
        assert_eq!(wide.len(), chunks.len() - 1);

        let first = store.fetch_neighbors(chunks[0].chunk_id, 1).await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].ordinal, 1);
    }

    #[tokio::test]
    async fn unknown_chunk_has_no_neighbors() {
        let store = InMemoryChunkStore::new();
        let missing = Uuid::new_v5(&Uuid::NAMESPACE_OID, b"missing");
        assert!(store.fetch_neighbors(missing, 2).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn deleting_a_source_cascades_to_its_chunks_only() {
        let store = InMemoryChunkStore::new();
        let keep = chunks_for(b"keep-source", &long_text());
        let doomed = chunks_for(b"doomed-source", &long_text());

        store
            .store(&keep, &flat_vectors(keep.len()), false)
            .await
            .unwrap();
        store
            .store(&doomed, &flat_vectors(doomed.len()), false)
            .await
            .unwrap();

        store.delete_source(doomed[0].source_id).await.unwrap();

        assert_eq!(store.len(), keep.len());
        let hits = store.search(&[1.0, 0.0, 0.0], 50).await.unwrap();
        assert!(hits
            .iter()
            .all(|hit| hit.chunk.source_id == keep[0].source_id));
    }
}
