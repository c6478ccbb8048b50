//! Text utilities shared by the chunker, merge engine and validator.
//!
//! Token counts are estimates. Planning uses the 4 chars/token ratio;
//! [`conservative_tokens`] also counts words so that dense numeric or
//! symbolic text is not underestimated when enforcing hard ceilings.

use std::collections::BTreeSet;

/// Approximate characters-per-token ratio.
pub const CHARS_PER_TOKEN: usize = 4;

/// Normalize raw document text.
///
/// - CRLF and lone CR become LF
/// - trailing whitespace is stripped from every line
/// - runs of blank lines collapse to a single blank line
/// - leading and trailing whitespace is trimmed
pub fn normalize_text(raw: &str) -> String {
    let unified = raw.replace("\r\n", "\n").replace('\r', "\n");
    let mut out = String::with_capacity(unified.len());
    let mut blank_run = 0usize;
    for line in unified.split('\n') {
        let line = line.trim_end();
        if line.is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push_str(line);
        out.push('\n');
    }
    out.trim().to_string()
}

/// Planning token estimate: `ceil(chars / 4)`.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

/// Ceiling-check token estimate: the larger of the char and word estimates.
pub fn conservative_tokens(text: &str) -> usize {
    estimate_tokens(text).max(word_count(text))
}

pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Split text into sentences on `.`, `!` or `?` followed by whitespace or end.
pub fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let bytes = text.as_bytes();
    for (i, ch) in text.char_indices() {
        if matches!(ch, '.' | '!' | '?') {
            let next = i + ch.len_utf8();
            let at_boundary = next >= bytes.len() || bytes[next].is_ascii_whitespace();
            if at_boundary {
                let sentence = text[start..next].trim();
                if !sentence.is_empty() {
                    sentences.push(sentence);
                }
                start = next;
            }
        }
    }
    let tail = text[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail);
    }
    sentences
}

/// Average words per sentence, or `None` for text without sentences.
pub fn average_sentence_tokens(text: &str) -> Option<f64> {
    let sentences = split_sentences(text);
    if sentences.is_empty() {
        return None;
    }
    let words: usize = sentences.iter().map(|s| word_count(s)).sum();
    Some(words as f64 / sentences.len() as f64)
}

/// Lowercased alphanumeric form used to compare titles, names and themes.
pub fn match_key(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut pending_space = false;
    for ch in s.chars() {
        if ch.is_alphanumeric() {
            if pending_space && !out.is_empty() {
                out.push(' ');
            }
            pending_space = false;
            out.extend(ch.to_lowercase());
        } else {
            pending_space = true;
        }
    }
    out
}

/// Words that never distinguish one concept name from another.
const STOPWORDS: &[&str] = &[
    "a", "an", "and", "as", "at", "by", "for", "from", "in", "into", "is", "its", "of", "on",
    "or", "the", "their", "to", "versus", "vs", "with",
];

/// Match-key words of `s` without stopwords.
pub fn content_tokens(s: &str) -> BTreeSet<String> {
    match_key(s)
        .split(' ')
        .filter(|t| !t.is_empty() && !STOPWORDS.contains(t))
        .map(str::to_string)
        .collect()
}

/// Jaccard similarity of two content-token sets; 0 when either is empty.
pub fn content_jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let inter = a.intersection(b).count();
    let union = a.union(b).count();
    inter as f64 / union as f64
}

/// Word-boundary index over match keys, used for "is this topic mentioned" checks.
#[derive(Debug, Clone, Default)]
pub struct KeyIndex {
    haystack: String,
}

impl KeyIndex {
    pub fn new<'a, I>(items: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut haystack = String::from(" ");
        for item in items {
            let key = match_key(item);
            if !key.is_empty() {
                haystack.push_str(&key);
                haystack.push_str(" | ");
            }
        }
        Self { haystack }
    }

    /// True when every word of `phrase` appears, in order, inside one indexed item.
    /// Phrases without any alphanumeric content are trivially contained.
    pub fn contains(&self, phrase: &str) -> bool {
        let key = match_key(phrase);
        key.is_empty() || self.haystack.contains(&format!(" {} ", key))
    }
}

/// Truncate to at most `max` characters on a char boundary.
pub fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Largest char boundary `<= idx`.
pub fn floor_char_boundary(s: &str, idx: usize) -> usize {
    if idx >= s.len() {
        return s.len();
    }
    let mut i = idx;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// Smallest char boundary `>= idx`.
pub fn ceil_char_boundary(s: &str, idx: usize) -> usize {
    if idx >= s.len() {
        return s.len();
    }
    let mut i = idx;
    while i < s.len() && !s.is_char_boundary(i) {
        i += 1;
    }
    i
}

/// True for lines that read as a procedural step rather than notation.
pub fn looks_like_step(line: &str) -> bool {
    let lower = line.trim_start().to_lowercase();
    if let Some(rest) = lower.strip_prefix("step") {
        return rest.starts_with(|c: char| c.is_whitespace() || c.is_ascii_digit());
    }
    if lower.starts_with("- ") || lower.starts_with("* ") || lower.starts_with('•') {
        return true;
    }
    let digits = lower.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits > 0 {
        let rest = &lower[digits..];
        return rest.starts_with(". ") || rest.starts_with(") ");
    }
    false
}

/// True when text carries a number or an anchored fact (quote, date).
pub fn has_anchor(text: &str) -> bool {
    // "may" is left out; as a modal verb it is far more common than the month.
    const MONTHS: [&str; 11] = [
        "january",
        "february",
        "march",
        "april",
        "june",
        "july",
        "august",
        "september",
        "october",
        "november",
        "december",
    ];
    if text.chars().any(|c| c.is_ascii_digit()) {
        return true;
    }
    if text.contains('"') || text.contains('“') || text.contains('”') {
        return true;
    }
    let lower = text.to_lowercase();
    lower
        .split(|c: char| !c.is_alphabetic())
        .any(|w| MONTHS.contains(&w))
}
