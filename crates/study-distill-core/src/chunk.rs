//! Token-bounded, order-preserving text chunker.
//!
//! Splits normalized document text into [`Chunk`]s of roughly
//! `target_tokens`, each carrying a small overlap copied from the end of the
//! previous chunk. Chunks are described by byte spans into the normalized
//! text, so concatenating every chunk's [`Chunk::content`] reproduces the
//! input exactly.
//!
//! # Algorithm
//!
//! 1. Convert `target_tokens` to a byte window using the 4 chars/token ratio.
//! 2. Cut each window at the last paragraph break (`\n\n`) in its second
//!    half, else the last sentence end, else the last whitespace, else at
//!    the window edge.
//! 3. Any span whose conservative token estimate (plus the overlap budget)
//!    exceeds `max_tokens` is split again at the whitespace nearest its
//!    middle, recursively.
//! 4. Each chunk after the first gets an overlap of about `overlap_tokens`,
//!    snapped forward to a word start. If the overlap would push a chunk
//!    over `max_tokens`, the overlap is dropped for that chunk.
//! 5. Empty input yields exactly one empty chunk.
//!
//! # Example
//!
//! ```rust
//! use study_distill_core::chunk::chunk_document;
//! use study_distill_core::settings::ChunkingSettings;
//!
//! let chunks = chunk_document("Hello world.\n\nSecond paragraph.", &ChunkingSettings::default());
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].ordinal, 0);
//! ```

use sha2::{Digest, Sha256};

use crate::models::Chunk;
use crate::settings::ChunkingSettings;
use crate::text::{ceil_char_boundary, conservative_tokens, floor_char_boundary, CHARS_PER_TOKEN};

/// Split normalized text into ordered chunks.
///
/// # Guarantees
///
/// - At least one chunk is always returned.
/// - Ordinals are contiguous: `0, 1, …, N-1`.
/// - Content spans are adjacent and cover the whole text.
/// - `token_count <= max_tokens` unless a single character exceeds it.
pub fn chunk_document(text: &str, settings: &ChunkingSettings) -> Vec<Chunk> {
    if text.is_empty() {
        return vec![make_chunk(text, 0, 0, 0, 0)];
    }

    let target_bytes = settings.target_tokens.max(1) * CHARS_PER_TOKEN;
    let overlap_bytes = settings.overlap_tokens * CHARS_PER_TOKEN;
    let content_budget = settings
        .max_tokens
        .saturating_sub(settings.overlap_tokens)
        .max(1);

    let mut spans = Vec::new();
    for (start, end) in plan_spans(text, target_bytes) {
        split_to_ceiling(text, start, end, content_budget, &mut spans);
    }

    let mut chunks = Vec::with_capacity(spans.len());
    for (ordinal, &(start, end)) in spans.iter().enumerate() {
        let mut overlap_start = if ordinal == 0 || overlap_bytes == 0 {
            start
        } else {
            let floor = spans[ordinal - 1].0;
            overlap_from(text, start, start.saturating_sub(overlap_bytes).max(floor))
        };
        if conservative_tokens(&text[overlap_start..end]) > settings.max_tokens {
            overlap_start = start;
        }
        chunks.push(make_chunk(text, ordinal, start, end, overlap_start));
    }
    chunks
}

/// Concatenate chunk contents, dropping designed overlaps.
pub fn reassemble(chunks: &[Chunk]) -> String {
    chunks.iter().map(|c| c.content()).collect()
}

/// First pass: cut the text into windows of about `target_bytes`.
fn plan_spans(text: &str, target_bytes: usize) -> Vec<(usize, usize)> {
    let len = text.len();
    let mut spans = Vec::new();
    let mut pos = 0;

    while pos < len {
        if len - pos <= target_bytes {
            spans.push((pos, len));
            break;
        }
        let window_end = floor_char_boundary(text, pos + target_bytes);
        let window = &text[pos..window_end];
        let mut cut = find_cut(window, window.len() / 2).unwrap_or(window.len());
        if cut == 0 {
            cut = ceil_char_boundary(text, pos + 1) - pos;
        }
        spans.push((pos, pos + cut));
        pos += cut;
    }
    spans
}

/// Preferred cut inside `window`, at or after `min_cut`.
fn find_cut(window: &str, min_cut: usize) -> Option<usize> {
    if let Some(i) = window.rfind("\n\n").filter(|&i| i >= min_cut) {
        return Some(i + 2);
    }
    let bytes = window.as_bytes();
    if let Some((i, _)) = window
        .rmatch_indices(['.', '!', '?'])
        .find(|(i, _)| *i >= min_cut && bytes.get(i + 1).is_some_and(|b| b.is_ascii_whitespace()))
    {
        return Some(i + 2);
    }
    window
        .char_indices()
        .rev()
        .find(|(i, c)| *i >= min_cut && c.is_whitespace())
        .map(|(i, c)| i + c.len_utf8())
}

/// Second pass: recursively halve spans that exceed the token budget.
fn split_to_ceiling(
    text: &str,
    start: usize,
    end: usize,
    budget: usize,
    out: &mut Vec<(usize, usize)>,
) {
    if conservative_tokens(&text[start..end]) <= budget {
        out.push((start, end));
        return;
    }
    let mid = split_point(text, start, end);
    if mid <= start || mid >= end {
        out.push((start, end));
        return;
    }
    split_to_ceiling(text, start, mid, budget, out);
    split_to_ceiling(text, mid, end, budget, out);
}

/// Whitespace nearest the middle of `start..end`, else the middle char boundary.
fn split_point(text: &str, start: usize, end: usize) -> usize {
    let middle = floor_char_boundary(text, start + (end - start) / 2);
    let span = &text[start..end];
    let rel = middle - start;
    let before = span[..rel]
        .char_indices()
        .rev()
        .find(|(_, c)| c.is_whitespace())
        .map(|(i, c)| start + i + c.len_utf8());
    let after = span[rel..]
        .char_indices()
        .find(|(_, c)| c.is_whitespace())
        .map(|(i, c)| middle + i + c.len_utf8());
    let candidate = match (before, after) {
        (Some(b), Some(a)) => {
            if middle - b <= a - middle {
                b
            } else {
                a
            }
        }
        (Some(b), None) => b,
        (None, Some(a)) => a,
        (None, None) => middle,
    };
    if candidate <= start || candidate >= end {
        middle
    } else {
        candidate
    }
}

/// Overlap start for a chunk beginning at `start`, snapped to a word start.
fn overlap_from(text: &str, start: usize, desired: usize) -> usize {
    let desired = ceil_char_boundary(text, desired);
    if desired >= start {
        return start;
    }
    let at_word_start = desired == 0
        || text[..desired]
            .chars()
            .next_back()
            .is_some_and(char::is_whitespace);
    if at_word_start {
        return desired;
    }
    text[desired..start]
        .char_indices()
        .find(|(_, c)| c.is_whitespace())
        .map(|(i, c)| desired + i + c.len_utf8())
        .unwrap_or(start)
}

fn make_chunk(text: &str, ordinal: usize, start: usize, end: usize, overlap_start: usize) -> Chunk {
    let slice = &text[overlap_start..end];
    let mut hasher = Sha256::new();
    hasher.update(slice.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        ordinal,
        start,
        end,
        overlap_start,
        text: slice.to_string(),
        token_count: conservative_tokens(slice),
        hash,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(target: usize, overlap: usize, max: usize) -> ChunkingSettings {
        ChunkingSettings {
            target_tokens: target,
            overlap_tokens: overlap,
            max_tokens: max,
        }
    }

    fn sample_text(paragraphs: usize) -> String {
        (0..paragraphs)
            .map(|i| {
                format!(
                    "Paragraph {} explains how marginal cost changes when output grows. \
                     It ends with a short remark about equilibrium.",
                    i
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    #[test]
    fn test_small_text_single_chunk() {
        let chunks = chunk_document("Hello, world!", &settings(2400, 120, 3200));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].ordinal, 0);
        assert_eq!(chunks[0].text, "Hello, world!");
        assert!(!chunks[0].has_overlap());
    }

    #[test]
    fn test_empty_text() {
        let chunks = chunk_document("", &settings(2400, 120, 3200));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "");
    }

    #[test]
    fn test_reassembly_reconstructs_text() {
        let texts = [
            sample_text(40),
            "no-whitespace-".repeat(200),
            "Grüße aus München. Ünïcödé text wraps here. ".repeat(80),
            "Line one\nline two\n\n".repeat(150).trim().to_string(),
        ];
        for text in &texts {
            let chunks = chunk_document(text, &settings(50, 8, 80));
            assert!(chunks.len() > 1);
            assert_eq!(&reassemble(&chunks), text);
        }
    }

    #[test]
    fn test_ordinals_contiguous_and_spans_adjacent() {
        let text = sample_text(60);
        let chunks = chunk_document(&text, &settings(40, 5, 60));
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.ordinal, i);
            if i > 0 {
                assert_eq!(c.start, chunks[i - 1].end);
            }
        }
        assert_eq!(chunks.last().unwrap().end, text.len());
    }

    #[test]
    fn test_overlap_repeats_previous_tail() {
        let text = sample_text(30);
        let chunks = chunk_document(&text, &settings(60, 10, 100));
        let second = &chunks[1];
        assert!(second.has_overlap());
        let overlap = &second.text[..second.overlap_len()];
        assert!(chunks[0].text.ends_with(overlap));
    }

    #[test]
    fn test_prefers_paragraph_boundaries() {
        let text = sample_text(20);
        let chunks = chunk_document(&text, &settings(60, 0, 100));
        for c in &chunks[..chunks.len() - 1] {
            assert!(c.content().ends_with("\n\n"), "cut mid-paragraph: {:?}", c.content());
        }
    }

    #[test]
    fn test_dense_numeric_text_respects_ceiling() {
        // Two bytes per word: the planning estimate halves the real count.
        let text = (0..2000).map(|i| (i % 10).to_string()).collect::<Vec<_>>().join(" ");
        let s = settings(100, 10, 120);
        let chunks = chunk_document(&text, &s);
        for c in &chunks {
            assert!(c.token_count <= s.max_tokens, "chunk {} has {}", c.ordinal, c.token_count);
        }
        assert_eq!(reassemble(&chunks), text);
    }

    #[test]
    fn test_deterministic() {
        let text = sample_text(25);
        let a = chunk_document(&text, &settings(50, 6, 80));
        let b = chunk_document(&text, &settings(50, 6, 80));
        assert_eq!(a, b);
    }
}
