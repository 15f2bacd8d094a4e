use crate::error::IngestError;
use crate::models::{PageBoundary, PageSpan};
use regex::Regex;
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};
use unicode_normalization::UnicodeNormalization;

#[derive(Debug, Clone, Copy)]
pub struct NormalizerConfig {
    /// Lines inspected at the top and bottom of each page when hunting
    /// repeating headers and footers.
    pub edge_lines: usize,
    /// Pages a near-identical edge line must recur on before it counts as
    /// a running header or footer.
    pub min_repeats: usize,
    /// Standalone page-number lines, e.g. "12", "Page 3 of 10", "3/10".
    pub page_number_pattern: &'static str,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            edge_lines: 3,
            min_repeats: 3,
            page_number_pattern: r"(?i)^\s*(?:page\s+)?\d+(?:\s*(?:of|/)\s*\d+)?\s*$",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalReason {
    RepeatedHeader,
    RepeatedFooter,
    PageNumber,
}

/// Audit record for one stripped line. Offsets index the raw input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemovedSpan {
    pub start: usize,
    pub end: usize,
    pub text: String,
    pub reason: RemovalReason,
}

#[derive(Debug, Clone)]
pub struct NormalizedSource {
    pub text: String,
    /// Page starts remapped to offsets in `text`. Empty when no page table
    /// was supplied.
    pub pages: Vec<PageSpan>,
    pub removed: Vec<RemovedSpan>,
}

/// Decodes raw bytes, substituting the replacement character for invalid
/// sequences. The substitution count is logged and reported, never raised.
pub fn decode_text(bytes: &[u8]) -> (String, usize) {
    let text = String::from_utf8_lossy(bytes);
    let replaced = text.matches('\u{FFFD}').count();
    if replaced > 0 {
        warn!(replaced, "invalid byte sequences replaced during decode");
    }
    (text.into_owned(), replaced)
}

/// Canonicalizes raw extracted text: NFC unicode form, whitespace runs
/// collapsed to single spaces, single newlines joined into their paragraph,
/// blank lines kept as paragraph breaks, repeating page furniture stripped.
pub fn normalize(
    raw: &str,
    page_table: &[PageBoundary],
    config: &NormalizerConfig,
) -> Result<NormalizedSource, IngestError> {
    let page_number_line = Regex::new(config.page_number_pattern)?;
    let pages = split_pages(raw, page_table);

    // Furniture detection needs enough pages to see a repeat.
    let (top_counts, bottom_counts) = if pages.len() >= config.min_repeats {
        edge_fingerprint_counts(&pages, config.edge_lines)
    } else {
        (HashMap::new(), HashMap::new())
    };

    let mut text = String::new();
    let mut page_spans = Vec::new();
    let mut removed = Vec::new();

    for page in &pages {
        let nonblank: Vec<usize> = page
            .lines
            .iter()
            .enumerate()
            .filter(|(_, line)| !line.text.trim().is_empty())
            .map(|(index, _)| index)
            .collect();
        let top_window: HashSet<usize> =
            nonblank.iter().copied().take(config.edge_lines).collect();
        let bottom_window: HashSet<usize> = nonblank
            .iter()
            .rev()
            .copied()
            .take(config.edge_lines)
            .collect();

        let mut paragraphs: Vec<String> = Vec::new();
        let mut current: Vec<&str> = Vec::new();

        for (index, line) in page.lines.iter().enumerate() {
            let trimmed = line.text.trim();
            if trimmed.is_empty() {
                flush_paragraph(&mut paragraphs, &mut current);
                continue;
            }

            let reason = if page_number_line.is_match(trimmed) {
                Some(RemovalReason::PageNumber)
            } else if let Some(fingerprint) = edge_fingerprint(line.text) {
                if top_window.contains(&index)
                    && top_counts.get(&fingerprint).copied().unwrap_or(0) >= config.min_repeats
                {
                    Some(RemovalReason::RepeatedHeader)
                } else if bottom_window.contains(&index)
                    && bottom_counts.get(&fingerprint).copied().unwrap_or(0) >= config.min_repeats
                {
                    Some(RemovalReason::RepeatedFooter)
                } else {
                    None
                }
            } else {
                None
            };

            if let Some(reason) = reason {
                removed.push(RemovedSpan {
                    start: line.start,
                    end: line.start + line.text.len(),
                    text: line.text.to_string(),
                    reason,
                });
                continue;
            }

            current.extend(trimmed.split_whitespace());
        }
        flush_paragraph(&mut paragraphs, &mut current);

        if paragraphs.is_empty() {
            continue;
        }
        if !text.is_empty() {
            text.push_str("\n\n");
        }
        if let Some(number) = page.number {
            page_spans.push(PageSpan {
                number,
                start: text.len(),
            });
        }
        text.push_str(&paragraphs.join("\n\n"));
    }

    if text.trim().is_empty() {
        return Err(IngestError::EmptySource);
    }

    if !removed.is_empty() {
        debug!(removed = removed.len(), "stripped repeating page furniture");
    }

    Ok(NormalizedSource {
        text,
        pages: page_spans,
        removed,
    })
}

struct RawPage<'a> {
    number: Option<u32>,
    lines: Vec<RawLine<'a>>,
}

#[derive(Clone, Copy)]
struct RawLine<'a> {
    /// Byte offset of the line start in the raw input.
    start: usize,
    text: &'a str,
}

fn split_pages<'a>(raw: &'a str, page_table: &[PageBoundary]) -> Vec<RawPage<'a>> {
    if page_table.is_empty() {
        return vec![RawPage {
            number: None,
            lines: lines_of(raw, 0),
        }];
    }

    let mut boundaries = page_table.to_vec();
    boundaries.sort_by_key(|boundary| boundary.offset);

    let mut pages = Vec::with_capacity(boundaries.len());
    for (index, boundary) in boundaries.iter().enumerate() {
        let start = floor_char_boundary(raw, boundary.offset);
        let end = boundaries
            .get(index + 1)
            .map(|next| floor_char_boundary(raw, next.offset))
            .unwrap_or(raw.len());
        if start >= end {
            continue;
        }
        pages.push(RawPage {
            number: Some(boundary.number),
            lines: lines_of(&raw[start..end], start),
        });
    }
    pages
}

fn floor_char_boundary(text: &str, offset: usize) -> usize {
    let mut index = offset.min(text.len());
    while index > 0 && !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

fn lines_of(slice: &str, base: usize) -> Vec<RawLine<'_>> {
    let mut lines = Vec::new();
    let mut start = base;
    for line in slice.split('\n') {
        lines.push(RawLine { start, text: line });
        start += line.len() + 1;
    }
    lines
}

fn flush_paragraph(paragraphs: &mut Vec<String>, current: &mut Vec<&str>) {
    if current.is_empty() {
        return;
    }
    let paragraph: String = current.join(" ").nfc().collect();
    paragraphs.push(paragraph);
    current.clear();
}

/// Comparison key for edge lines: case-folded with whitespace and digits
/// dropped, so "ACME Corp — 2021" and "ACME Corp — 2022" collide.
fn edge_fingerprint(line: &str) -> Option<String> {
    let folded: String = line
        .chars()
        .filter(|ch| !ch.is_whitespace() && !ch.is_ascii_digit())
        .flat_map(char::to_lowercase)
        .collect();
    if folded.is_empty() {
        None
    } else {
        Some(folded)
    }
}

/// Counts, per fingerprint, how many pages carry it in their top and
/// bottom edge regions. A fingerprint is counted at most once per page per
/// region.
fn edge_fingerprint_counts(
    pages: &[RawPage<'_>],
    edge_lines: usize,
) -> (HashMap<String, usize>, HashMap<String, usize>) {
    let mut top = HashMap::new();
    let mut bottom = HashMap::new();

    for page in pages {
        let nonblank: Vec<&RawLine<'_>> = page
            .lines
            .iter()
            .filter(|line| !line.text.trim().is_empty())
            .collect();

        let mut seen = HashSet::new();
        for line in nonblank.iter().take(edge_lines) {
            if let Some(fingerprint) = edge_fingerprint(line.text) {
                if seen.insert(fingerprint.clone()) {
                    *top.entry(fingerprint).or_insert(0) += 1;
                }
            }
        }

        let mut seen = HashSet::new();
        for line in nonblank.iter().rev().take(edge_lines) {
            if let Some(fingerprint) = edge_fingerprint(line.text) {
                if seen.insert(fingerprint.clone()) {
                    *bottom.entry(fingerprint).or_insert(0) += 1;
                }
            }
        }
    }

    (top, bottom)
}
