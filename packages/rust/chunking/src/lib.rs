//! Deterministic paragraph-aware text segmentation for indexing.
//!
//! The splitter is pure: identical input and configuration always produce
//! identical output, which is what allows chunk ids to be content-addressed
//! and re-indexing to be idempotent.

use serde::{Deserialize, Serialize};

/// Chunking configuration, carried per package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkConfig {
    /// Greedy accumulation target in characters.
    pub target_chars: usize,
    /// Sliding-window overlap for paragraphs longer than `target_chars`.
    pub overlap_chars: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            target_chars: 2400,
            overlap_chars: 300,
        }
    }
}

/// Rough token estimate used for budget accounting: one token per four
/// characters, never zero.
pub fn estimate_token_count(text: &str) -> usize {
    (text.len() / 4).max(1)
}

/// Split `text` into ordered, non-empty chunks.
///
/// Paragraphs are blank-line separated. Whole paragraphs are accumulated
/// greedily while they fit within `target_chars` (counting the two-character
/// separator); a single paragraph longer than the target is sliced with a
/// sliding window of width `target_chars` and stride
/// `target_chars - overlap_chars` (minimum 1), bypassing the accumulator.
/// Empty input yields an empty sequence.
pub fn split_text(text: &str, config: &ChunkConfig) -> Vec<String> {
    let source = text.trim();
    if source.is_empty() {
        return vec![];
    }

    let mut paragraphs: Vec<&str> = source
        .split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();
    if paragraphs.is_empty() {
        paragraphs = vec![source];
    }

    let mut chunks: Vec<String> = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut current_len = 0usize;

    fn flush(current: &mut Vec<&str>, current_len: &mut usize, chunks: &mut Vec<String>) {
        if current.is_empty() {
            return;
        }
        let chunk = current.join("\n\n").trim().to_string();
        if !chunk.is_empty() {
            chunks.push(chunk);
        }
        current.clear();
        *current_len = 0;
    }

    for paragraph in paragraphs {
        let paragraph_len = paragraph.len();
        let separator = if current.is_empty() { 0 } else { 2 };
        let projected_len = current_len + separator + paragraph_len;

        if projected_len <= config.target_chars {
            current.push(paragraph);
            current_len = projected_len;
            continue;
        }

        flush(&mut current, &mut current_len, &mut chunks);

        if paragraph_len <= config.target_chars {
            current.push(paragraph);
            current_len = paragraph_len;
            continue;
        }

        // Oversized paragraph: sliding window, appended directly.
        let step = config.target_chars.saturating_sub(config.overlap_chars).max(1);
        let bytes = paragraph.as_bytes();
        let mut start = 0usize;
        while start < paragraph_len {
            let end = (start + config.target_chars).min(paragraph_len);
            // Clamp to char boundaries so slicing never panics on UTF-8.
            let start_b = floor_char_boundary(paragraph, start);
            let end_b = floor_char_boundary(paragraph, end);
            if end_b > start_b {
                let window = std::str::from_utf8(&bytes[start_b..end_b])
                    .unwrap_or("")
                    .trim();
                if !window.is_empty() {
                    chunks.push(window.to_string());
                }
            }
            if end >= paragraph_len {
                break;
            }
            start += step;
        }
    }

    flush(&mut current, &mut current_len, &mut chunks);
    chunks
}

fn floor_char_boundary(s: &str, mut index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    while index > 0 && !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(target: usize, overlap: usize) -> ChunkConfig {
        ChunkConfig {
            target_chars: target,
            overlap_chars: overlap,
        }
    }

    #[test]
    fn empty_input_yields_no_chunks() {
        assert!(split_text("", &ChunkConfig::default()).is_empty());
        assert!(split_text("   \n\n  \n ", &ChunkConfig::default()).is_empty());
    }

    #[test]
    fn short_text_is_one_chunk() {
        let chunks = split_text("Hello world.", &ChunkConfig::default());
        assert_eq!(chunks, vec!["Hello world.".to_string()]);
    }

    #[test]
    fn paragraphs_accumulate_until_target() {
        let text = "aaaa\n\nbbbb\n\ncccc";
        // 4 + 2 + 4 = 10 fits; adding cccc would be 16 > 12.
        let chunks = split_text(text, &cfg(12, 2));
        assert_eq!(chunks, vec!["aaaa\n\nbbbb".to_string(), "cccc".to_string()]);
    }

    #[test]
    fn oversized_paragraph_uses_sliding_window() {
        let text = "x".repeat(25);
        let chunks = split_text(&text, &cfg(10, 4));
        // stride = 6: windows at 0..10, 6..16, 12..22, 18..25, 24..25
        assert_eq!(chunks.len(), 5);
        assert_eq!(chunks[0].len(), 10);
        assert_eq!(chunks[1].len(), 10);
        assert_eq!(chunks.last().unwrap().len(), 1);
    }

    #[test]
    fn overlap_ge_target_still_advances() {
        // stride clamps to 1, so the loop always makes progress
        let text = "y".repeat(8);
        let chunks = split_text(&text, &cfg(4, 10));
        assert!(!chunks.is_empty());
        assert_eq!(chunks[0].len(), 4);
    }

    #[test]
    fn splitting_is_idempotent_with_stable_hashes() {
        let text = "First paragraph here.\n\nSecond paragraph, somewhat longer than the first.\n\nThird.";
        let config = cfg(40, 8);

        let first = split_text(text, &config);
        let second = split_text(text, &config);
        assert_eq!(first, second);

        let hashes_a: Vec<String> = first.iter().map(|c| docforge_shared::sha256_text(c)).collect();
        let hashes_b: Vec<String> = second.iter().map(|c| docforge_shared::sha256_text(c)).collect();
        assert_eq!(hashes_a, hashes_b);
    }

    #[test]
    fn boundary_case_is_deterministic() {
        let text = "Paragraph one.\n\nParagraph two with more content.\n\nParagraph three with even more content.";
        let config = cfg(40, 8);

        let first = split_text(text, &config);
        let second = split_text(text, &config);
        assert_eq!(first.len(), second.len());
        assert_eq!(first, second);
        assert!(first.iter().all(|c| !c.is_empty()));
    }

    #[test]
    fn token_estimate_floor_is_one() {
        assert_eq!(estimate_token_count(""), 1);
        assert_eq!(estimate_token_count("abc"), 1);
        assert_eq!(estimate_token_count(&"z".repeat(400)), 100);
    }
}
