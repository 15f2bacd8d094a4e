use std::collections::BTreeSet;

/// Byte range of one token in its source text. Spans end on char
/// boundaries, so `&text[span.start..span.end]` always reconstructs the
/// token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenSpan {
    pub start: usize,
    pub end: usize,
}

/// Splits text into alphanumeric runs and single punctuation marks;
/// whitespace only separates. The output is a function of the input bytes
/// alone, which keeps chunk boundaries reproducible across runs and
/// reconstructable from offsets.
pub fn token_spans(text: &str) -> Vec<TokenSpan> {
    let mut spans = Vec::new();
    let mut word_start: Option<usize> = None;

    for (index, ch) in text.char_indices() {
        if ch.is_alphanumeric() || ch == '_' || ch == '\'' {
            if word_start.is_none() {
                word_start = Some(index);
            }
            continue;
        }

        if let Some(start) = word_start.take() {
            spans.push(TokenSpan { start, end: index });
        }

        if !ch.is_whitespace() {
            spans.push(TokenSpan {
                start: index,
                end: index + ch.len_utf8(),
            });
        }
    }

    if let Some(start) = word_start {
        spans.push(TokenSpan {
            start,
            end: text.len(),
        });
    }

    spans
}

/// Folds a token to its comparison form: lowercased, possessive and common
/// plural endings trimmed. Applied to both query and chunk tokens, so
/// matching stays symmetric.
pub fn fold_term(token: &str) -> String {
    let mut term = token.to_lowercase();

    if let Some(stripped) = term.strip_suffix("'s") {
        term = stripped.to_string();
    }

    if term.len() > 3 {
        if let Some(stripped) = term.strip_suffix("ies") {
            term = format!("{stripped}y");
        } else if term.ends_with('s') && !term.ends_with("ss") {
            term.truncate(term.len() - 1);
        }
    }

    term
}

/// Distinct query terms worth matching: folded tokens longer than two
/// characters.
pub fn distinct_terms(text: &str) -> BTreeSet<String> {
    token_spans(text)
        .into_iter()
        .map(|span| &text[span.start..span.end])
        .filter(|token| token.chars().any(char::is_alphanumeric))
        .map(fold_term)
        .filter(|term| term.len() > 2)
        .collect()
}

/// Every folded token of a text, for membership tests against query terms.
pub fn folded_tokens(text: &str) -> BTreeSet<String> {
    token_spans(text)
        .into_iter()
        .map(|span| &text[span.start..span.end])
        .filter(|token| token.chars().any(char::is_alphanumeric))
        .map(fold_term)
        .collect()
}
