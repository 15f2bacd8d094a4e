use crate::error::IngestError;
use crate::models::{page_at, ChunkerConfig, TextChunk};
use crate::normalize::NormalizedSource;
use crate::sections::{section_at, SectionSpan};
use crate::tokenize::token_spans;
use uuid::Uuid;

/// Splits a normalized source into overlapping token windows and wires the
/// sibling links. Given identical text and config the output is
/// byte-identical, including chunk ids, so re-ingestion is idempotent.
pub fn chunk_source(
    source_id: Uuid,
    normalized: &NormalizedSource,
    sections: &[SectionSpan],
    config: &ChunkerConfig,
) -> Result<Vec<TextChunk>, IngestError> {
    config.validate()?;

    let text = normalized.text.as_str();
    let spans = token_spans(text);
    if spans.is_empty() {
        return Err(IngestError::EmptySource);
    }

    let windows = plan_windows(spans.len(), config);
    let mut chunks = Vec::with_capacity(windows.len());

    for (ordinal, window) in windows.iter().enumerate() {
        let start_offset = spans[window.start].start;
        let end_offset = spans[window.end - 1].end;

        chunks.push(TextChunk {
            chunk_id: chunk_identifier(source_id, ordinal as u32, start_offset, end_offset),
            source_id,
            ordinal: ordinal as u32,
            token_count: window.end - window.start,
            start_offset,
            end_offset,
            text: text[start_offset..end_offset].to_string(),
            section: section_at(sections, start_offset).map(str::to_string),
            page: page_at(&normalized.pages, start_offset),
            previous_chunk_id: None,
            next_chunk_id: None,
        });
    }

    link_sequence(&mut chunks);
    Ok(chunks)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Window {
    start: usize,
    end: usize,
}

/// Token-index windows of `target` length advancing by `target - overlap`.
/// An undersized trailing window folds into its predecessor rather than
/// standing alone.
fn plan_windows(token_count: usize, config: &ChunkerConfig) -> Vec<Window> {
    let step = config.target_tokens - config.overlap_tokens;
    let mut windows = Vec::new();
    let mut start = 0;

    loop {
        let end = (start + config.target_tokens).min(token_count);
        windows.push(Window { start, end });
        if end == token_count {
            break;
        }
        start += step;
    }

    if windows.len() > 1 {
        let last = windows[windows.len() - 1];
        if last.end - last.start < config.min_tokens {
            windows.pop();
            let merged = windows.len() - 1;
            windows[merged].end = token_count;
        }
    }

    windows
}

/// Second pass once the whole sequence exists: chunks reference their
/// siblings by identifier only, never by ownership.
fn link_sequence(chunks: &mut [TextChunk]) {
    for index in 0..chunks.len() {
        if index > 0 {
            chunks[index].previous_chunk_id = Some(chunks[index - 1].chunk_id);
        }
        if index + 1 < chunks.len() {
            chunks[index].next_chunk_id = Some(chunks[index + 1].chunk_id);
        }
    }
}

/// Chunk identity is a function of the source and the window alone, so
/// re-chunking identical text yields identical ids.
fn chunk_identifier(source_id: Uuid, ordinal: u32, start: usize, end: usize) -> Uuid {
    let key = format!("{source_id}:{ordinal}:{start}:{end}");
    Uuid::new_v5(&Uuid::NAMESPACE_OID, key.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PageSpan;
    use crate::normalize::NormalizedSource;

    fn words(count: usize) -> String {
        (0..count)
            .map(|index| format!("tok{index}"))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn plain(text: impl Into<String>) -> NormalizedSource {
        NormalizedSource {
            text: text.into(),
            pages: Vec::new(),
            removed: Vec::new(),
        }
    }

    fn source_id() -> Uuid {
        Uuid::new_v5(&Uuid::NAMESPACE_OID, b"chunker-tests")
    }

    #[test]
    fn thousand_tokens_step_by_350() {
        let normalized = plain(words(1000));
        let spans = token_spans(&normalized.text);
        let config = ChunkerConfig::default();

        let chunks = chunk_source(source_id(), &normalized, &[], &config).unwrap();

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].start_offset, spans[0].start);
        assert_eq!(chunks[1].start_offset, spans[350].start);
        assert_eq!(chunks[2].start_offset, spans[700].start);
        assert_eq!(chunks[2].end_offset, normalized.text.len());
        assert_eq!(chunks[0].token_count, 400);
        assert_eq!(chunks[1].token_count, 400);
        assert_eq!(chunks[2].token_count, 300);
    }

    #[test]
    fn consecutive_chunks_share_the_configured_overlap() {
        let normalized = plain(words(1000));
        let spans = token_spans(&normalized.text);
        let config = ChunkerConfig::default();

        let chunks = chunk_source(source_id(), &normalized, &[], &config).unwrap();

        for pair in chunks.windows(2) {
            let previous_end_token = spans
                .iter()
                .position(|span| span.end == pair[0].end_offset)
                .unwrap();
            let next_start_token = spans
                .iter()
                .position(|span| span.start == pair[1].start_offset)
                .unwrap();
            assert_eq!(
                previous_end_token + 1 - next_start_token,
                config.overlap_tokens
            );
        }
    }

    #[test]
    fn coverage_has_no_gaps_and_stays_in_bounds() {
        let normalized = plain(words(937));
        let chunks =
            chunk_source(source_id(), &normalized, &[], &ChunkerConfig::default()).unwrap();

        assert_eq!(chunks[0].start_offset, 0);
        assert_eq!(chunks[chunks.len() - 1].end_offset, normalized.text.len());
        for pair in chunks.windows(2) {
            // overlap: the next chunk starts before the previous one ends
            assert!(pair[1].start_offset < pair[0].end_offset);
        }
        for chunk in &chunks {
            assert_eq!(
                &normalized.text[chunk.start_offset..chunk.end_offset],
                chunk.text
            );
        }
    }

    #[test]
    fn links_form_a_doubly_connected_sequence() {
        let normalized = plain(words(1000));
        let chunks =
            chunk_source(source_id(), &normalized, &[], &ChunkerConfig::default()).unwrap();

        assert!(chunks[0].previous_chunk_id.is_none());
        assert!(chunks[chunks.len() - 1].next_chunk_id.is_none());
        for pair in chunks.windows(2) {
            assert_eq!(pair[0].next_chunk_id, Some(pair[1].chunk_id));
            assert_eq!(pair[1].previous_chunk_id, Some(pair[0].chunk_id));
        }
    }

    #[test]
    fn tiny_source_yields_exactly_one_chunk() {
        let normalized = plain(words(10));
        let config = ChunkerConfig {
            target_tokens: 400,
            overlap_tokens: 50,
            min_tokens: 200,
        };

        let chunks = chunk_source(source_id(), &normalized, &[], &config).unwrap();

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].token_count, 10);
        assert_eq!(chunks[0].text, normalized.text);
        assert!(chunks[0].previous_chunk_id.is_none());
        assert!(chunks[0].next_chunk_id.is_none());
    }

    #[test]
    fn undersized_trailing_window_merges_into_predecessor() {
        // 800 tokens: windows 0..400, 350..750, 700..800; the 100-token
        // tail folds into the middle window.
        let normalized = plain(words(800));
        let chunks =
            chunk_source(source_id(), &normalized, &[], &ChunkerConfig::default()).unwrap();

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].token_count, 400);
        assert_eq!(chunks[1].token_count, 450);
        assert_eq!(chunks[1].end_offset, normalized.text.len());
    }

    #[test]
    fn rechunking_identical_input_is_byte_identical() {
        let normalized = plain(words(1000));
        let config = ChunkerConfig::default();

        let first = chunk_source(source_id(), &normalized, &[], &config).unwrap();
        let second = chunk_source(source_id(), &normalized, &[], &config).unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn section_and_page_metadata_follow_window_starts() {
        let heading = "PLANTING SCHEDULE";
        let body = words(30);
        let text = format!("{heading}\n\n{body}");
        let page_break = text.len() / 2;
        let normalized = NormalizedSource {
            pages: vec![
                PageSpan { number: 1, start: 0 },
                PageSpan {
                    number: 2,
                    start: page_break,
                },
            ],
            removed: Vec::new(),
            text,
        };
        let sections = vec![SectionSpan {
            label: heading.to_string(),
            start: 0,
        }];
        let config = ChunkerConfig {
            target_tokens: 8,
            overlap_tokens: 2,
            min_tokens: 4,
        };

        let chunks = chunk_source(source_id(), &normalized, &sections, &config).unwrap();

        assert!(chunks.len() > 2);
        for chunk in &chunks {
            assert_eq!(chunk.section.as_deref(), Some(heading));
        }
        assert_eq!(chunks[0].page, Some(1));
        assert_eq!(chunks[chunks.len() - 1].page, Some(2));
    }

    #[test]
    fn whitespace_only_text_reports_empty_source() {
        let normalized = plain("   \n\n  ");
        let result = chunk_source(source_id(), &normalized, &[], &ChunkerConfig::default());
        assert!(matches!(result, Err(IngestError::EmptySource)));
    }

    #[test]
    fn invalid_config_is_rejected_before_work_starts() {
        let normalized = plain(words(20));
        let config = ChunkerConfig {
            target_tokens: 10,
            overlap_tokens: 10,
            min_tokens: 5,
        };
        let result = chunk_source(source_id(), &normalized, &[], &config);
        assert!(matches!(result, Err(IngestError::InvalidChunkConfig(_))));
    }
}
