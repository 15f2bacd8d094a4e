use crate::error::StoreError;
use crate::models::TextChunk;
use crate::store::{ChunkPayload, ChunkStore, SimilarityHit};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;
use uuid::Uuid;

/// Qdrant REST adapter. Every request carries the caller-supplied
/// deadline; an exceeded deadline surfaces as `Timeout` and is never
/// retried here.
pub struct QdrantChunkStore {
    endpoint: String,
    collection: String,
    client: Client,
    vector_size: usize,
    timeout: Duration,
}

impl QdrantChunkStore {
    pub fn new(
        endpoint: impl Into<String>,
        collection: impl Into<String>,
        vector_size: usize,
        timeout: Duration,
    ) -> Result<Self, StoreError> {
        let endpoint = endpoint.into();
        let parsed = url::Url::parse(&endpoint)?;
        let endpoint = parsed.as_str().trim_end_matches('/').to_string();

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| StoreError::Request(format!("http client setup failed: {error}")))?;

        Ok(Self {
            endpoint,
            collection: collection.into(),
            client,
            vector_size,
            timeout,
        })
    }

    fn collection_url(&self) -> String {
        format!("{}/collections/{}", self.endpoint, self.collection)
    }

    fn transport(&self, error: reqwest::Error) -> StoreError {
        if error.is_timeout() {
            StoreError::Timeout(self.timeout)
        } else if error.is_connect() {
            StoreError::Unavailable(error.to_string())
        } else {
            StoreError::Request(error.to_string())
        }
    }

    /// Creates the collection with cosine distance when it does not exist
    /// yet.
    pub async fn ensure_collection(&self) -> Result<(), StoreError> {
        let response = self
            .client
            .get(self.collection_url())
            .send()
            .await
            .map_err(|error| self.transport(error))?;

        if response.status().is_success() {
            return Ok(());
        }

        if response.status() != StatusCode::NOT_FOUND {
            return Err(StoreError::BackendResponse {
                backend: "qdrant".to_string(),
                details: response.status().to_string(),
            });
        }

        let response = self
            .client
            .put(self.collection_url())
            .json(&json!({
                "vectors": { "size": self.vector_size, "distance": "Cosine" }
            }))
            .send()
            .await
            .map_err(|error| self.transport(error))?;

        if !response.status().is_success() {
            return Err(StoreError::BackendResponse {
                backend: "qdrant".to_string(),
                details: response.status().to_string(),
            });
        }

        Ok(())
    }

    async fn fetch_points(&self, ids: &[Uuid], with_payload: bool) -> Result<Vec<Value>, StoreError> {
        let response = self
            .client
            .post(format!("{}/points", self.collection_url()))
            .json(&json!({
                "ids": ids,
                "with_payload": with_payload,
                "with_vector": false,
            }))
            .send()
            .await
            .map_err(|error| self.transport(error))?;

        if !response.status().is_success() {
            return Err(StoreError::BackendResponse {
                backend: "qdrant".to_string(),
                details: response.status().to_string(),
            });
        }

        let parsed: Value = response
            .json()
            .await
            .map_err(|error| self.transport(error))?;

        Ok(parsed
            .pointer("/result")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }

    async fn fetch_chunk(&self, chunk_id: Uuid) -> Result<Option<ChunkPayload>, StoreError> {
        let points = self.fetch_points(&[chunk_id], true).await?;
        points.first().map(payload_from_point).transpose()
    }
}

fn payload_from_point(point: &Value) -> Result<ChunkPayload, StoreError> {
    let raw = point
        .pointer("/payload")
        .filter(|value| !value.is_null())
        .cloned()
        .ok_or_else(|| StoreError::BackendResponse {
            backend: "qdrant".to_string(),
            details: "point without payload".to_string(),
        })?;

    let payload: ChunkPayload = serde_json::from_value(raw)?;
    payload.validate()?;
    Ok(payload)
}

#[async_trait]
impl ChunkStore for QdrantChunkStore {
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

        if chunks.is_empty() {
            return Ok(());
        }

        let ingested_at = Utc::now();
        let mut points = Vec::with_capacity(chunks.len());
        for (chunk, vector) in chunks.iter().zip(embeddings) {
            if vector.len() != self.vector_size {
                return Err(StoreError::Request(format!(
                    "embedding dimension {} != {}",
                    vector.len(),
                    self.vector_size
                )));
            }

            let payload = ChunkPayload::from_chunk(chunk, ingested_at);
            payload.validate()?;
            points.push(json!({
                "id": payload.chunk_id,
                "vector": vector,
                "payload": payload,
            }));
        }

        if !overwrite {
            let ids: Vec<Uuid> = chunks.iter().map(|chunk| chunk.chunk_id).collect();
            let existing = self.fetch_points(&ids, false).await?;
            if let Some(point) = existing.first() {
                let id = point
                    .pointer("/id")
                    .and_then(Value::as_str)
                    .and_then(|raw| Uuid::parse_str(raw).ok())
                    .unwrap_or_default();
                return Err(StoreError::DuplicateChunk(id));
            }
        }

        // one upsert per source keeps readers off half-written sequences
        let response = self
            .client
            .put(format!("{}/points?wait=true", self.collection_url()))
            .json(&json!({ "points": points }))
            .send()
            .await
            .map_err(|error| self.transport(error))?;

        if !response.status().is_success() {
            return Err(StoreError::BackendResponse {
                backend: "qdrant".to_string(),
                details: response.status().to_string(),
            });
        }

        Ok(())
    }

    async fn search(
        &self,
        query_vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<SimilarityHit>, StoreError> {
        if query_vector.len() != self.vector_size {
            return Err(StoreError::Request(format!(
                "query vector dimension {} is not {}",
                query_vector.len(),
                self.vector_size
            )));
        }

        if top_k == 0 {
            return Ok(Vec::new());
        }

        let response = self
            .client
            .post(format!("{}/points/search", self.collection_url()))
            .json(&json!({
                "vector": query_vector,
                "limit": top_k,
                "with_payload": true,
            }))
            .send()
            .await
            .map_err(|error| self.transport(error))?;

        if !response.status().is_success() {
            return Err(StoreError::BackendResponse {
                backend: "qdrant".to_string(),
                details: response.status().to_string(),
            });
        }

        let parsed: Value = response
            .json()
            .await
            .map_err(|error| self.transport(error))?;

        let raw_hits = parsed
            .pointer("/result")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut hits = Vec::with_capacity(raw_hits.len());
        for hit in &raw_hits {
            let payload = payload_from_point(hit)?;
            let score = hit.pointer("/score").and_then(Value::as_f64).unwrap_or(0.0);
            hits.push((score, payload));
        }

        // the backend orders by score but leaves equal scores unspecified;
        // pin ties to the earliest batch, then document position
        hits.sort_by(|left, right| {
            right
                .0
                .total_cmp(&left.0)
                .then_with(|| left.1.ingested_at.cmp(&right.1.ingested_at))
                .then_with(|| left.1.ordinal.cmp(&right.1.ordinal))
                .then_with(|| left.1.chunk_id.cmp(&right.1.chunk_id))
        });

        Ok(hits
            .into_iter()
            .map(|(score, payload)| SimilarityHit {
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
        let Some(origin) = self.fetch_chunk(chunk_id).await? else {
            return Ok(Vec::new());
        };

        let mut before = Vec::new();
        let mut cursor = origin.previous_chunk_id;
        while before.len() < radius {
            let Some(id) = cursor else { break };
            let Some(payload) = self.fetch_chunk(id).await? else {
                break;
            };
            cursor = payload.previous_chunk_id;
            before.push(payload.into_chunk());
        }
        before.reverse();

        let mut neighbors = before;
        let mut taken = 0;
        let mut cursor = origin.next_chunk_id;
        while taken < radius {
            let Some(id) = cursor else { break };
            let Some(payload) = self.fetch_chunk(id).await? else {
                break;
            };
            cursor = payload.next_chunk_id;
            neighbors.push(payload.into_chunk());
            taken += 1;
        }

        Ok(neighbors)
    }

    async fn delete_source(&self, source_id: Uuid) -> Result<(), StoreError> {
        let response = self
            .client
            .post(format!("{}/points/delete?wait=true", self.collection_url()))
            .json(&json!({
                "filter": {
                    "must": [
                        { "key": "source_id", "match": { "value": source_id } }
                    ]
                }
            }))
            .send()
            .await
            .map_err(|error| self.transport(error))?;

        if !response.status().is_success() {
            return Err(StoreError::BackendResponse {
                backend: "qdrant".to_string(),
                details: response.status().to_string(),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn endpoint_must_be_a_valid_url() {
        let result = QdrantChunkStore::new("not a url", "chunks", 4, Duration::from_secs(5));
        assert!(matches!(result, Err(StoreError::Url(_))));

        let store = QdrantChunkStore::new(
            "http://localhost:6333/",
            "chunks",
            4,
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(store.collection_url(), "http://localhost:6333/collections/chunks");
    }

    #[test]
    fn point_payload_parses_back_into_the_schema() {
        let chunk_id = Uuid::new_v5(&Uuid::NAMESPACE_OID, b"qdrant-point");
        let payload = ChunkPayload {
            chunk_id,
            source_id: Uuid::new_v5(&Uuid::NAMESPACE_OID, b"qdrant-source"),
            ordinal: 0,
            token_count: 3,
            start_offset: 0,
            end_offset: 14,
            text: "three tokens here".to_string(),
            section: None,
            page: None,
            previous_chunk_id: None,
            next_chunk_id: None,
            ingested_at: Utc::now(),
        };

        let point = json!({
            "id": chunk_id,
            "score": 0.87,
            "payload": serde_json::to_value(&payload).unwrap(),
        });

        let parsed = payload_from_point(&point).unwrap();
        assert_eq!(parsed, payload);
    }

    #[test]
    fn points_without_payload_are_a_backend_error() {
        let point = json!({ "id": "abc", "score": 0.5 });
        assert!(matches!(
            payload_from_point(&point),
            Err(StoreError::BackendResponse { .. })
        ));
    }
}
