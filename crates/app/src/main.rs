use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use note_search_core::{
    decode_text, ChunkStore, ChunkerConfig, Embedder, HashedTrigramEmbedder, IngestPipeline,
    NormalizerConfig, PageBoundary, QdrantChunkStore, RetrievalConfig, RetrievalPipeline,
    RetrievalQuery, SectionConfig, SourceKind,
};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "note-search", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Qdrant base URL
    #[arg(long, env = "QDRANT_URL", default_value = "http://localhost:6333")]
    qdrant_url: String,

    /// Qdrant collection
    #[arg(long, default_value = "note_chunks")]
    collection: String,

    /// Deadline for every vector-store call, in seconds
    #[arg(long, default_value = "30")]
    store_timeout_secs: u64,
}

#[derive(Clone, Copy, ValueEnum)]
enum SourceType {
    Note,
    Pdf,
}

impl From<SourceType> for SourceKind {
    fn from(value: SourceType) -> Self {
        match value {
            SourceType::Note => SourceKind::Note,
            SourceType::Pdf => SourceKind::Pdf,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Ingest one file of extracted text.
    Ingest {
        /// Path to the text file.
        #[arg(long)]
        file: PathBuf,
        /// Kind of source the text came from.
        #[arg(long, value_enum, default_value_t = SourceType::Note)]
        kind: SourceType,
        /// Treat form feeds in the file as page breaks.
        #[arg(long, default_value_t = false)]
        paged: bool,
        /// Replace chunks that already exist for this content.
        #[arg(long, default_value_t = false)]
        overwrite: bool,
    },
    /// Ingest every .txt/.md note under a folder, best effort.
    IngestFolder {
        /// Folder searched recursively for notes.
        #[arg(long)]
        folder: PathBuf,
        #[arg(long, default_value_t = false)]
        overwrite: bool,
    },
    /// Query the store and print reranked chunks.
    Search {
        /// The question to retrieve context for.
        #[arg(long)]
        query: String,
        /// Number of results to return.
        #[arg(long, default_value = "10")]
        top_k: usize,
        /// Attach neighboring chunks to each hit.
        #[arg(long, default_value_t = false)]
        expand: bool,
        /// Print the per-signal score breakdown.
        #[arg(long, default_value_t = false)]
        explain: bool,
    },
    /// Delete a source and every chunk it owns.
    Delete {
        #[arg(long)]
        source_id: Uuid,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();

    let embedder = HashedTrigramEmbedder::default();
    let store = QdrantChunkStore::new(
        &cli.qdrant_url,
        &cli.collection,
        embedder.dimensions(),
        Duration::from_secs(cli.store_timeout_secs),
    )
    .context("vector store setup")?;
    store
        .ensure_collection()
        .await
        .context("collection bootstrap")?;

    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        "note-search boot"
    );

    match cli.command {
        Command::Ingest {
            file,
            kind,
            paged,
            overwrite,
        } => {
            let pipeline = IngestPipeline::new(
                store,
                embedder,
                NormalizerConfig::default(),
                SectionConfig::default(),
                ChunkerConfig::default(),
            );

            let bytes = tokio::fs::read(&file)
                .await
                .with_context(|| format!("reading {}", file.display()))?;
            let (text, replaced) = decode_text(&bytes);
            if replaced > 0 {
                warn!(replaced, file = %file.display(), "invalid bytes replaced while decoding");
            }

            let (text, pages) = if paged {
                split_form_feed_pages(&text)
            } else {
                (text, Vec::new())
            };
            let page_table = if pages.is_empty() {
                None
            } else {
                Some(pages.as_slice())
            };

            let report = pipeline
                .ingest_text(&text, kind.into(), page_table, overwrite)
                .await?;

            println!(
                "source {} ingested: {} chunks at {}",
                report.source.source_id,
                report.chunk_count,
                Utc::now().to_rfc3339()
            );
            if report.removed_spans > 0 {
                println!(
                    "  {} repeated header/footer/page-number lines stripped",
                    report.removed_spans
                );
            }
        }
        Command::IngestFolder { folder, overwrite } => {
            let pipeline = IngestPipeline::new(
                store,
                embedder,
                NormalizerConfig::default(),
                SectionConfig::default(),
                ChunkerConfig::default(),
            );

            let report = pipeline.ingest_folder(&folder, overwrite).await?;

            if !report.skipped.is_empty() {
                warn!(
                    "skipped_files={} for folder={}",
                    report.skipped.len(),
                    folder.display()
                );
                for skipped in &report.skipped {
                    warn!(path = %skipped.path.display(), reason = %skipped.reason, "skipped note");
                }
            }

            let chunk_total: usize = report
                .ingested
                .iter()
                .map(|item| item.chunk_count)
                .sum();
            println!(
                "{} sources ingested ({} chunks) at {}",
                report.ingested.len(),
                chunk_total,
                Utc::now().to_rfc3339()
            );
        }
        Command::Search {
            query,
            top_k,
            expand,
            explain,
        } => {
            let retrieval = RetrievalPipeline::new(store, embedder, RetrievalConfig::default());
            let request = RetrievalQuery {
                text: query,
                top_k,
                expand_context: expand,
            };

            let result = retrieval.retrieve(&request).await?;

            println!("query: {}", result.query);
            if result.is_empty() {
                println!("no results");
            }

            for hit in &result.hits {
                println!(
                    "[{}] score={:.4} chunk={} source={} section={}",
                    hit.chunk.ordinal,
                    hit.scores.combined,
                    hit.chunk.chunk_id,
                    hit.chunk.source_id,
                    hit.chunk.section.as_deref().unwrap_or("-")
                );
                if let Some(page) = hit.chunk.page {
                    println!("  page={page}");
                }
                println!("  chunk_text:\n{}", hit.chunk.text);
                for neighbor in &hit.context {
                    println!("  context[{}]:\n{}", neighbor.ordinal, neighbor.text);
                }
                if explain {
                    println!(
                        "  explain: similarity_raw={:.4} similarity={:.3} coverage={:.3} term_overlap={:.3}",
                        hit.scores.raw_similarity,
                        hit.scores.similarity,
                        hit.scores.context_coverage,
                        hit.scores.term_overlap
                    );
                }
            }
        }
        Command::Delete { source_id } => {
            store.delete_source(source_id).await?;
            println!("source {source_id} deleted");
        }
    }

    Ok(())
}

/// Rebuilds a page table from form-feed separators, the convention text
/// extractors use for page breaks.
fn split_form_feed_pages(text: &str) -> (String, Vec<PageBoundary>) {
    if !text.contains('\u{000C}') {
        return (text.to_string(), Vec::new());
    }

    let mut rebuilt = String::with_capacity(text.len());
    let mut pages = Vec::new();

    for (index, page) in text.split('\u{000C}').enumerate() {
        if index > 0 {
            rebuilt.push_str("\n\n");
        }
        pages.push(PageBoundary {
            number: (index + 1) as u32,
            offset: rebuilt.len(),
        });
        rebuilt.push_str(page);
    }

    (rebuilt, pages)
}
