use crate::error::StoreError;
use crate::models::TextChunk;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Wire schema for one chunk in the vector store. Kept separate from
/// `TextChunk` so the stored shape stays explicit, and validated on both
/// the write and read paths.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkPayload {
    pub chunk_id: Uuid,
    pub source_id: Uuid,
    pub ordinal: u32,
    pub token_count: usize,
    pub start_offset: usize,
    pub end_offset: usize,
    pub text: String,
    pub section: Option<String>,
    pub page: Option<u32>,
    pub previous_chunk_id: Option<Uuid>,
    pub next_chunk_id: Option<Uuid>,
    /// When the owning source's batch was written; equal-score search ties
    /// resolve to the earliest batch.
    pub ingested_at: DateTime<Utc>,
}

impl ChunkPayload {
    pub fn from_chunk(chunk: &TextChunk, ingested_at: DateTime<Utc>) -> Self {
        Self {
            chunk_id: chunk.chunk_id,
            source_id: chunk.source_id,
            ordinal: chunk.ordinal,
            token_count: chunk.token_count,
            start_offset: chunk.start_offset,
            end_offset: chunk.end_offset,
            text: chunk.text.clone(),
            section: chunk.section.clone(),
            page: chunk.page,
            previous_chunk_id: chunk.previous_chunk_id,
            next_chunk_id: chunk.next_chunk_id,
            ingested_at,
        }
    }

    pub fn into_chunk(self) -> TextChunk {
        TextChunk {
            chunk_id: self.chunk_id,
            source_id: self.source_id,
            ordinal: self.ordinal,
            token_count: self.token_count,
            start_offset: self.start_offset,
            end_offset: self.end_offset,
            text: self.text,
            section: self.section,
            page: self.page,
            previous_chunk_id: self.previous_chunk_id,
            next_chunk_id: self.next_chunk_id,
        }
    }

    pub fn validate(&self) -> Result<(), StoreError> {
        if self.text.trim().is_empty() {
            return Err(StoreError::InvalidPayload(format!(
                "chunk {} has no text",
                self.chunk_id
            )));
        }

        if self.end_offset <= self.start_offset {
            return Err(StoreError::InvalidPayload(format!(
                "chunk {} offsets are inverted: {}..{}",
                self.chunk_id, self.start_offset, self.end_offset
            )));
        }

        if self.token_count == 0 {
            return Err(StoreError::InvalidPayload(format!(
                "chunk {} claims zero tokens",
                self.chunk_id
            )));
        }

        if self.previous_chunk_id == Some(self.chunk_id)
            || self.next_chunk_id == Some(self.chunk_id)
        {
            return Err(StoreError::InvalidPayload(format!(
                "chunk {} links to itself",
                self.chunk_id
            )));
        }

        Ok(())
    }
}

/// One raw similarity hit, before reranking.
#[derive(Debug, Clone)]
pub struct SimilarityHit {
    pub chunk: TextChunk,
    pub score: f64,
}

/// Adapter boundary to the external vector database. Embedding vectors
/// live only behind this trait; the chunker never persists them.
#[async_trait]
pub trait ChunkStore {
    /// Persists a source's chunk sequence with its vectors in one call, so
    /// readers never observe a partial sequence.
    async fn store(
        &self,
        chunks: &[TextChunk],
        embeddings: &[Vec<f32>],
        overwrite: bool,
    ) -> Result<(), StoreError>;

    /// Up to `top_k` nearest chunks by similarity, descending; equal
    /// scores resolve to the earliest-stored chunk.
    async fn search(
        &self,
        query_vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<SimilarityHit>, StoreError>;

    /// Up to `radius` chunks on each side of `chunk_id`, following the
    /// stored previous/next links, in document order. The origin chunk is
    /// not included.
    async fn fetch_neighbors(
        &self,
        chunk_id: Uuid,
        radius: usize,
    ) -> Result<Vec<TextChunk>, StoreError>;

    /// Removes every chunk belonging to `source_id`.
    async fn delete_source(&self, source_id: Uuid) -> Result<(), StoreError>;
}

#[async_trait]
impl<T> ChunkStore for Arc<T>
where
    T: ChunkStore + Send + Sync,
{
    async fn store(
        &self,
        chunks: &[TextChunk],
        embeddings: &[Vec<f32>],
        overwrite: bool,
    ) -> Result<(), StoreError> {
        (**self).store(chunks, embeddings, overwrite).await
    }

    async fn search(
        &self,
        query_vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<SimilarityHit>, StoreError> {
        (**self).search(query_vector, top_k).await
    }

    async fn fetch_neighbors(
        &self,
        chunk_id: Uuid,
        radius: usize,
    ) -> Result<Vec<TextChunk>, StoreError> {
        (**self).fetch_neighbors(chunk_id, radius).await
    }

    async fn delete_source(&self, source_id: Uuid) -> Result<(), StoreError> {
        (**self).delete_source(source_id).await
    }
}
