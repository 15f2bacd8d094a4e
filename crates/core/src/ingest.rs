use crate::chunker::chunk_source;
use crate::embeddings::Embedder;
use crate::error::IngestError;
use crate::models::{ChunkerConfig, PageBoundary, Source, SourceKind};
use crate::normalize::{decode_text, normalize, NormalizerConfig};
use crate::sections::{detect_sections, SectionConfig};
use crate::store::ChunkStore;
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tracing::info;
use uuid::Uuid;
use walkdir::WalkDir;

/// Runs one source through normalize, section detection, chunking,
/// embedding, and storage. Stages within a source are strictly sequential
/// (links need the whole sequence); independent sources may run through
/// separate calls concurrently, but a second pass over the same source id
/// is refused while the first is in flight.
pub struct IngestPipeline<S, E> {
    store: S,
    embedder: E,
    normalizer: NormalizerConfig,
    sections: SectionConfig,
    chunker: ChunkerConfig,
    active: Mutex<HashSet<Uuid>>,
}

#[derive(Debug, Clone)]
pub struct IngestReport {
    pub source: Source,
    pub chunk_count: usize,
    pub removed_spans: usize,
    pub replaced_chars: usize,
}

pub struct SkippedNote {
    pub path: PathBuf,
    pub reason: String,
}

pub struct FolderReport {
    pub ingested: Vec<IngestReport>,
    pub skipped: Vec<SkippedNote>,
}

impl<S, E> IngestPipeline<S, E>
where
    S: ChunkStore + Send + Sync,
    E: Embedder + Send + Sync,
{
    pub fn new(
        store: S,
        embedder: E,
        normalizer: NormalizerConfig,
        sections: SectionConfig,
        chunker: ChunkerConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            normalizer,
            sections,
            chunker,
            active: Mutex::new(HashSet::new()),
        }
    }

    /// Decodes and ingests raw bytes; invalid sequences are replaced and
    /// counted rather than refused.
    pub async fn ingest_bytes(
        &self,
        bytes: &[u8],
        kind: SourceKind,
        pages: Option<&[PageBoundary]>,
        overwrite: bool,
    ) -> Result<IngestReport, IngestError> {
        let (text, replaced) = decode_text(bytes);
        let mut report = self.ingest_text(&text, kind, pages, overwrite).await?;
        report.replaced_chars = replaced;
        Ok(report)
    }

    pub async fn ingest_text(
        &self,
        raw: &str,
        kind: SourceKind,
        pages: Option<&[PageBoundary]>,
        overwrite: bool,
    ) -> Result<IngestReport, IngestError> {
        let checksum = digest_text(raw);
        let source_id = source_identifier(&checksum);
        let _claim = self.claim(source_id)?;

        let page_table = pages.unwrap_or(&[]);
        let normalized = normalize(raw, page_table, &self.normalizer)?;
        let sections = detect_sections(&normalized.text, &self.sections)?;
        let chunks = chunk_source(source_id, &normalized, &sections, &self.chunker)?;

        let embeddings: Vec<Vec<f32>> = chunks
            .iter()
            .map(|chunk| self.embedder.embed(&chunk.text))
            .collect();

        self.store
            .store(&chunks, &embeddings, overwrite)
            .await
            .map_err(|error| IngestError::Store {
                source_id,
                stage: "store",
                error,
            })?;

        info!(
            source_id = %source_id,
            chunk_count = chunks.len(),
            "source ingested"
        );

        Ok(IngestReport {
            source: Source {
                source_id,
                kind,
                raw_text: raw.to_string(),
                page_count: pages.map(|table| table.len() as u32),
                checksum,
                created_at: Utc::now(),
            },
            chunk_count: chunks.len(),
            removed_spans: normalized.removed.len(),
            replaced_chars: 0,
        })
    }

    /// Best-effort ingestion of every `.txt`/`.md` file under `folder`;
    /// one bad note never aborts the batch.
    pub async fn ingest_folder(
        &self,
        folder: &Path,
        overwrite: bool,
    ) -> Result<FolderReport, IngestError> {
        let files = discover_note_files(folder);
        if files.is_empty() {
            return Err(IngestError::InvalidArgument(format!(
                "no note files found in {}",
                folder.display()
            )));
        }

        let mut ingested = Vec::new();
        let mut skipped = Vec::new();

        for path in files {
            let outcome = match fs::read(&path) {
                Ok(bytes) => {
                    self.ingest_bytes(&bytes, SourceKind::Note, None, overwrite)
                        .await
                }
                Err(error) => Err(IngestError::Io(error)),
            };

            match outcome {
                Ok(report) => ingested.push(report),
                Err(error) => skipped.push(SkippedNote {
                    path,
                    reason: error.to_string(),
                }),
            }
        }

        Ok(FolderReport { ingested, skipped })
    }

    /// Cascades to every chunk the source owns.
    pub async fn delete_source(&self, source_id: Uuid) -> Result<(), IngestError> {
        self.store
            .delete_source(source_id)
            .await
            .map_err(|error| IngestError::Store {
                source_id,
                stage: "delete",
                error,
            })
    }

    fn claim(&self, source_id: Uuid) -> Result<SourceClaim<'_>, IngestError> {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if !active.insert(source_id) {
            return Err(IngestError::IngestInProgress(source_id));
        }
        Ok(SourceClaim {
            active: &self.active,
            source_id,
        })
    }
}

/// Releases the per-source ingestion slot on drop, so a failed pass cannot
/// wedge its source id.
struct SourceClaim<'a> {
    active: &'a Mutex<HashSet<Uuid>>,
    source_id: Uuid,
}

impl Drop for SourceClaim<'_> {
    fn drop(&mut self) {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        active.remove(&self.source_id);
    }
}

pub fn digest_text(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Source identity is content-addressed: re-ingesting identical text maps
/// to the same source, and through it the same chunk ids.
fn source_identifier(checksum: &str) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, checksum.as_bytes())
}

/// Recursively finds `.txt` and `.md` files, sorted for a stable ingest
/// order.
pub fn discover_note_files(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder).into_iter().filter_map(|item| item.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }

        let is_note = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("txt") || ext.eq_ignore_ascii_case("md"));

        if is_note {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::HashedTrigramEmbedder;
    use crate::error::StoreError;
    use crate::stores::InMemoryChunkStore;
    use std::fs::{self, File};
    use std::io::Write;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn pipeline() -> IngestPipeline<Arc<InMemoryChunkStore>, HashedTrigramEmbedder> {
        IngestPipeline::new(
            Arc::new(InMemoryChunkStore::new()),
            HashedTrigramEmbedder { dimensions: 32 },
            NormalizerConfig::default(),
            SectionConfig::default(),
            ChunkerConfig {
                target_tokens: 10,
                overlap_tokens: 2,
                min_tokens: 5,
            },
        )
    }

    const NOTE: &str = "Remember to harden off the pepper starts before transplanting. They spent six weeks under the grow light and will scorch in direct sun without a gradual introduction over a week or so.";

    #[tokio::test]
    async fn empty_input_reports_empty_source_and_stores_nothing() {
        let pipeline = pipeline();
        let result = pipeline
            .ingest_text("  \n\n  ", SourceKind::Note, None, false)
            .await;
        assert!(matches!(result, Err(IngestError::EmptySource)));
        assert!(pipeline.store.is_empty());
    }

    #[tokio::test]
    async fn reingest_without_overwrite_hits_duplicate_chunks() {
        let pipeline = pipeline();
        let first = pipeline
            .ingest_text(NOTE, SourceKind::Note, None, false)
            .await
            .unwrap();

        let error = pipeline
            .ingest_text(NOTE, SourceKind::Note, None, false)
            .await
            .unwrap_err();
        assert!(matches!(
            error,
            IngestError::Store {
                error: StoreError::DuplicateChunk(_),
                ..
            }
        ));

        let again = pipeline
            .ingest_text(NOTE, SourceKind::Note, None, true)
            .await
            .unwrap();
        assert_eq!(again.source.source_id, first.source.source_id);
        assert_eq!(pipeline.store.len(), first.chunk_count);
    }

    #[tokio::test]
    async fn identical_text_maps_to_the_same_source_identity() {
        let pipeline = pipeline();
        let report = pipeline
            .ingest_text(NOTE, SourceKind::Note, None, false)
            .await
            .unwrap();

        assert_eq!(report.source.checksum, digest_text(NOTE));
        assert_eq!(
            report.source.source_id,
            source_identifier(&report.source.checksum)
        );
        assert!(report.source.page_count.is_none());
        assert!(report.chunk_count > 1);
    }

    #[test]
    fn a_claimed_source_refuses_a_second_pass() {
        let pipeline = pipeline();
        let source_id = Uuid::new_v5(&Uuid::NAMESPACE_OID, b"claimed-source");

        let claim = pipeline.claim(source_id).unwrap();
        assert!(matches!(
            pipeline.claim(source_id),
            Err(IngestError::IngestInProgress(_))
        ));

        drop(claim);
        assert!(pipeline.claim(source_id).is_ok());
    }

    #[test]
    fn note_discovery_is_recursive_and_sorted() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("nested");
        fs::create_dir(&nested).unwrap();

        File::create(dir.path().join("b.txt"))
            .and_then(|mut file| file.write_all(b"note b"))
            .unwrap();
        File::create(nested.join("a.md"))
            .and_then(|mut file| file.write_all(b"note a"))
            .unwrap();
        File::create(dir.path().join("skip.pdf"))
            .and_then(|mut file| file.write_all(b"%PDF"))
            .unwrap();

        let files = discover_note_files(dir.path());
        assert_eq!(files.len(), 2);
        assert!(files[0].ends_with("b.txt") || files[1].ends_with("b.txt"));
    }

    #[tokio::test]
    async fn folder_ingestion_skips_bad_notes_and_keeps_going() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("good.txt"), NOTE).unwrap();
        fs::write(dir.path().join("blank.txt"), "   \n  ").unwrap();

        let pipeline = pipeline();
        let report = pipeline.ingest_folder(dir.path(), false).await.unwrap();

        assert_eq!(report.ingested.len(), 1);
        assert_eq!(report.skipped.len(), 1);
        assert!(report.skipped[0].path.ends_with("blank.txt"));
    }

    #[tokio::test]
    async fn folder_without_notes_is_an_invalid_argument() {
        let dir = tempdir().unwrap();
        let pipeline = pipeline();
        let result = pipeline.ingest_folder(dir.path(), false).await;
        assert!(matches!(result, Err(IngestError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn page_table_flows_through_to_chunk_metadata() {
        let page_one = "Spring planting checklist and notes from the first warm weekend of the year.\n";
        let raw = format!("{page_one}Summer follow-up items appear on the second page with more detail to come.");
        let pages = vec![
            PageBoundary { number: 1, offset: 0 },
            PageBoundary {
                number: 2,
                offset: page_one.len(),
            },
        ];

        let pipeline = pipeline();
        let report = pipeline
            .ingest_text(&raw, SourceKind::Pdf, Some(&pages), false)
            .await
            .unwrap();

        assert_eq!(report.source.page_count, Some(2));

        let hits = pipeline
            .store
            .search(
                &HashedTrigramEmbedder { dimensions: 32 }.embed("summer follow-up"),
                20,
            )
            .await
            .unwrap();
        assert!(hits.iter().any(|hit| hit.chunk.page == Some(1)));
        assert!(hits.iter().any(|hit| hit.chunk.page == Some(2)));
    }
}
