use crate::error::IngestError;
use regex::Regex;

#[derive(Debug, Clone, Copy)]
pub struct SectionConfig {
    /// Longest line still considered a heading candidate, in words.
    pub max_heading_words: usize,
    /// Numbered headings such as "2.", "3.1 Results", or "Chapter 4".
    pub numbered_pattern: &'static str,
}

impl Default for SectionConfig {
    fn default() -> Self {
        Self {
            max_heading_words: 12,
            numbered_pattern: r"^(?:\d+(?:\.\d+)*[.)]?\s+\S|Chapter\s+\d+|Appendix\s+[A-Z]\b)",
        }
    }
}

/// One detected heading; the section it opens runs from `start` to the
/// next heading's start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionSpan {
    pub label: String,
    /// Byte offset in the normalized text where the heading begins.
    pub start: usize,
}

/// Scans normalized text (paragraph-separated lines) for headings. A line
/// qualifies when it is short, lacks terminal punctuation, and is fully
/// capitalized, title-cased, or numbered. Consecutive qualifying lines
/// merge into one heading. Ambiguous lines stay body text; a false
/// negative costs less than mislabeling every chunk under it.
pub fn detect_sections(
    text: &str,
    config: &SectionConfig,
) -> Result<Vec<SectionSpan>, IngestError> {
    let numbered = Regex::new(config.numbered_pattern)?;

    let mut sections = Vec::new();
    let mut pending: Option<SectionSpan> = None;
    let mut start = 0;

    while start < text.len() {
        let end = text[start..]
            .find("\n\n")
            .map(|found| start + found)
            .unwrap_or(text.len());
        let line = &text[start..end];

        if is_heading(line, config, &numbered) {
            match pending.as_mut() {
                Some(section) => {
                    section.label.push(' ');
                    section.label.push_str(line.trim());
                }
                None => {
                    pending = Some(SectionSpan {
                        label: line.trim().to_string(),
                        start,
                    });
                }
            }
        } else if let Some(section) = pending.take() {
            sections.push(section);
        }

        start = end + 2;
    }

    if let Some(section) = pending.take() {
        sections.push(section);
    }

    Ok(sections)
}

/// Label of the section covering `offset`; `None` for text before the
/// first heading.
pub fn section_at(sections: &[SectionSpan], offset: usize) -> Option<&str> {
    sections
        .iter()
        .take_while(|section| section.start <= offset)
        .last()
        .map(|section| section.label.as_str())
}

fn is_heading(line: &str, config: &SectionConfig, numbered: &Regex) -> bool {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return false;
    }

    let words: Vec<&str> = trimmed.split_whitespace().collect();
    if words.len() > config.max_heading_words {
        return false;
    }

    if trimmed.ends_with(['.', '!', '?', ',', ';', ':']) {
        return false;
    }

    if numbered.is_match(trimmed) {
        return true;
    }

    if is_all_caps(trimmed) {
        return true;
    }

    is_title_case(&words)
}

fn is_all_caps(line: &str) -> bool {
    let mut has_alpha = false;
    for ch in line.chars() {
        if ch.is_alphabetic() {
            has_alpha = true;
            if ch.is_lowercase() {
                return false;
            }
        }
    }
    has_alpha
}

const MINOR_WORDS: [&str; 10] = ["a", "an", "and", "for", "in", "of", "on", "or", "the", "to"];

/// Two or more words, every significant one starting uppercase.
fn is_title_case(words: &[&str]) -> bool {
    if words.len() < 2 {
        return false;
    }

    let mut significant = 0;
    for (index, word) in words.iter().enumerate() {
        let Some(first) = word.chars().find(|ch| ch.is_alphabetic()) else {
            continue;
        };
        if index > 0 && MINOR_WORDS.contains(&word.to_lowercase().as_str()) {
            continue;
        }
        if !first.is_uppercase() {
            return false;
        }
        significant += 1;
    }

    significant >= 2
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detect(text: &str) -> Vec<SectionSpan> {
        detect_sections(text, &SectionConfig::default()).unwrap()
    }

    #[test]
    fn numbered_headings_are_detected_with_offsets() {
        let text = "Intro words before any heading.\n\n1. Garden Planning\n\nRows of beans and squash.\n\n1.1 Watering\n\nEvery second morning.";
        let sections = detect(text);

        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].label, "1. Garden Planning");
        assert_eq!(sections[1].label, "1.1 Watering");
        assert!(text[sections[0].start..].starts_with("1. Garden Planning"));
    }

    #[test]
    fn all_caps_and_title_case_lines_qualify() {
        let text = "MEETING AGENDA\n\nFirst we discuss budget.\n\nAction Items For Friday\n\nCall the vendor back.";
        let sections = detect(text);

        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].label, "MEETING AGENDA");
        assert_eq!(sections[1].label, "Action Items For Friday");
    }

    #[test]
    fn sentences_and_fragments_stay_body_text() {
        let text = "Buy milk today.\n\nShort note\n\nThe quick brown fox jumps.";
        assert!(detect(text).is_empty());
    }

    #[test]
    fn long_lines_never_qualify() {
        let text = "This Line Has Far Too Many Capitalized Words To Possibly Be A Real Document Heading Here\n\nBody.";
        assert!(detect(text).is_empty());
    }

    #[test]
    fn consecutive_heading_lines_merge() {
        let text = "PART ONE\n\nChapter 2\n\nThe journey begins in earnest.";
        let sections = detect(text);

        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].label, "PART ONE Chapter 2");
        assert_eq!(sections[0].start, 0);
    }

    #[test]
    fn lookup_before_first_heading_is_unlabeled() {
        let text = "Leading words here.\n\nCHAPTER SUMMARY\n\nAll about the chapter.";
        let sections = detect(text);

        assert_eq!(section_at(&sections, 0), None);
        let heading_start = sections[0].start;
        assert_eq!(section_at(&sections, heading_start), Some("CHAPTER SUMMARY"));
        assert_eq!(
            section_at(&sections, text.len() - 1),
            Some("CHAPTER SUMMARY")
        );
    }
}
