//! Token-aware text chunking for ingestion.
//!
//! Splits text into overlapping, token-bounded chunks. Two strategies:
//!
//! 1. Tokenizer-backed (preferred): encode with `cl100k_base`, slide a window
//!    of `max_tokens` advancing by `max_tokens - overlap_tokens`, decode each
//!    window. Strict token bounds; splits may cross sentence boundaries.
//! 2. Heuristic fallback: split on sentence-terminating punctuation, accumulate
//!    sentences by an approximate token count (`chars / 4`), keep the last
//!    sentence as overlap. Token counts are approximate in this mode.
//!
//! The chunker is total: no input produces an error, empty input produces an
//! empty sequence.

use std::sync::OnceLock;

use regex::Regex;
use tiktoken_rs::{cl100k_base, CoreBPE};

/// Default chunk window in tokens.
pub const DEFAULT_MAX_TOKENS: usize = 512;
/// Default overlap between adjacent chunks in tokens.
pub const DEFAULT_OVERLAP_TOKENS: usize = 64;

enum ChunkMode {
    Tokenizer(CoreBPE),
    Heuristic,
}

/// Text chunker with a strategy fixed at construction.
pub struct Chunker {
    mode: ChunkMode,
}

impl Chunker {
    /// Tokenizer-backed chunker; falls back to the heuristic strategy when
    /// the encoding cannot be constructed.
    pub fn new() -> Self {
        match cl100k_base() {
            Ok(bpe) => Self {
                mode: ChunkMode::Tokenizer(bpe),
            },
            Err(e) => {
                tracing::warn!(error = %e, "cl100k encoding unavailable, using heuristic chunking");
                Self {
                    mode: ChunkMode::Heuristic,
                }
            }
        }
    }

    /// Heuristic-only chunker.
    pub fn heuristic() -> Self {
        Self {
            mode: ChunkMode::Heuristic,
        }
    }

    /// Lazily chunk `text`. The iterator is finite and single-pass; the
    /// function itself is pure and may be re-invoked.
    pub fn chunk<'a>(
        &'a self,
        text: &str,
        max_tokens: usize,
        overlap_tokens: usize,
    ) -> Box<dyn Iterator<Item = String> + 'a> {
        if text.is_empty() || max_tokens == 0 {
            return Box::new(std::iter::empty());
        }

        match &self.mode {
            ChunkMode::Tokenizer(bpe) => {
                Box::new(token_windows(bpe, text, max_tokens, overlap_tokens))
            }
            ChunkMode::Heuristic => Box::new(sentence_chunks(text, max_tokens)),
        }
    }
}

impl Default for Chunker {
    fn default() -> Self {
        Self::new()
    }
}

/// Collapse whitespace runs to single spaces and trim.
pub fn normalize_whitespace(text: &str) -> String {
    static WS: OnceLock<Regex> = OnceLock::new();
    let ws = WS.get_or_init(|| Regex::new(r"\s+").expect("valid regex"));
    ws.replace_all(text.trim(), " ").into_owned()
}

/// Approximate token count: one token per four characters, at least one.
fn approx_tokens(text: &str) -> usize {
    (text.chars().count() / 4).max(1)
}

/// Split normalized text into sentences after `.`, `!`, or `?`.
fn split_sentences(text: &str) -> Vec<String> {
    let normalized = normalize_whitespace(text);
    if normalized.is_empty() {
        return Vec::new();
    }

    let chars: Vec<(usize, char)> = normalized.char_indices().collect();
    let mut sentences = Vec::new();
    let mut start = 0;

    for w in 1..chars.len() {
        let (idx, c) = chars[w];
        let prev = chars[w - 1].1;
        if c == ' ' && matches!(prev, '.' | '!' | '?') {
            sentences.push(normalized[start..idx].to_string());
            start = idx + 1;
        }
    }
    if start < normalized.len() {
        sentences.push(normalized[start..].to_string());
    }

    sentences
}

/// Sliding token windows decoded back to text.
fn token_windows<'a>(
    bpe: &'a CoreBPE,
    text: &str,
    max_tokens: usize,
    overlap_tokens: usize,
) -> impl Iterator<Item = String> + 'a {
    let tokens = bpe.encode_ordinary(text);
    let step = max_tokens.saturating_sub(overlap_tokens).max(1);
    let mut start = 0usize;

    std::iter::from_fn(move || {
        if start >= tokens.len() {
            return None;
        }
        let end = (start + max_tokens).min(tokens.len());
        let piece = bpe.decode(tokens[start..end].to_vec()).unwrap_or_default();
        start = if end == tokens.len() {
            tokens.len()
        } else {
            start + step
        };
        Some(piece)
    })
    .filter(|s| !s.is_empty())
}

/// Greedy sentence accumulation with last-sentence overlap.
fn sentence_chunks(text: &str, max_tokens: usize) -> impl Iterator<Item = String> {
    let sentences = split_sentences(text);
    let mut i = 0usize;
    let mut buf: Vec<String> = Vec::new();
    let mut cur = 0usize;

    std::iter::from_fn(move || {
        while i < sentences.len() {
            let sentence = sentences[i].clone();
            let t = approx_tokens(&sentence);
            i += 1;

            if cur + t > max_tokens && !buf.is_empty() {
                let out = buf.join(" ");
                // Preserve the last sentence as overlap.
                let last = buf.last().cloned().unwrap_or_default();
                cur = approx_tokens(&last);
                buf = vec![last];
                buf.push(sentence);
                cur += t;
                return Some(out);
            }

            buf.push(sentence);
            cur += t;
        }

        if buf.is_empty() {
            None
        } else {
            let out = buf.join(" ");
            buf.clear();
            Some(out)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_input_yields_nothing() {
        let chunker = Chunker::heuristic();
        assert_eq!(chunker.chunk("", 512, 64).count(), 0);
    }

    #[test]
    fn test_whitespace_only_yields_nothing() {
        let chunker = Chunker::heuristic();
        assert_eq!(chunker.chunk("   \n\t  ", 512, 64).count(), 0);
    }

    #[test]
    fn test_normalize_collapses_runs() {
        assert_eq!(normalize_whitespace("  a \n\n b\t c  "), "a b c");
    }

    #[test]
    fn test_split_sentences_on_terminators() {
        let sents = split_sentences("First one. Second two! Third three? Tail");
        assert_eq!(
            sents,
            vec!["First one.", "Second two!", "Third three?", "Tail"]
        );
    }

    #[test]
    fn test_short_text_is_one_chunk() {
        let chunker = Chunker::heuristic();
        let chunks: Vec<String> = chunker.chunk("One sentence. Another one.", 512, 64).collect();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0], "One sentence. Another one.");
    }

    #[test]
    fn test_single_long_sentence_is_not_truncated() {
        let chunker = Chunker::heuristic();
        let long = "word ".repeat(200).trim().to_string() + ".";
        let chunks: Vec<String> = chunker.chunk(&long, 16, 4).collect();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0], long);
    }

    #[test]
    fn test_heuristic_overlap_carries_last_sentence() {
        let chunker = Chunker::heuristic();
        // ~13 and ~16 approximate tokens; together they overflow max_tokens=16.
        let text = "TWS Error AWSJR0001E indicates a job dependency cycle. \
                    To resolve: identify the cycle; remove one dependency; restart.";
        let chunks: Vec<String> = chunker.chunk(text, 16, 4).collect();
        assert_eq!(chunks.len(), 2);
        assert_eq!(
            chunks[0],
            "TWS Error AWSJR0001E indicates a job dependency cycle."
        );
        // Second chunk repeats the first sentence as overlap.
        assert!(chunks[1].starts_with("TWS Error AWSJR0001E"));
        assert!(chunks[1].ends_with("restart."));
    }

    #[test]
    fn test_heuristic_chunks_cover_all_sentences() {
        let chunker = Chunker::heuristic();
        let text = (0..40)
            .map(|i| format!("Sentence number {} has several words in it.", i))
            .collect::<Vec<_>>()
            .join(" ");
        let chunks: Vec<String> = chunker.chunk(&text, 32, 8).collect();
        assert!(chunks.len() > 1);
        for i in 0..40 {
            let needle = format!("Sentence number {} ", i);
            assert!(
                chunks.iter().any(|c| c.contains(&needle)),
                "sentence {} missing from all chunks",
                i
            );
        }
    }

    #[test]
    fn test_tokenizer_mode_respects_token_budget() {
        let chunker = Chunker::new();
        let bpe = cl100k_base().unwrap();
        let text = "alpha beta gamma delta ".repeat(64);
        let chunks: Vec<String> = chunker.chunk(&text, 32, 8).collect();
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(bpe.encode_ordinary(chunk).len() <= 32);
        }
    }

    #[test]
    fn test_tokenizer_mode_overlap_advances() {
        let chunker = Chunker::new();
        let text = "one two three four five six seven eight nine ten ".repeat(20);
        let with_overlap: Vec<String> = chunker.chunk(&text, 32, 16).collect();
        let without_overlap: Vec<String> = chunker.chunk(&text, 32, 0).collect();
        assert!(with_overlap.len() > without_overlap.len());
    }

    #[test]
    fn test_chunk_is_pure_across_invocations() {
        let chunker = Chunker::heuristic();
        let text = "Repeatable input. With two sentences.";
        let a: Vec<String> = chunker.chunk(text, 8, 2).collect();
        let b: Vec<String> = chunker.chunk(text, 8, 2).collect();
        assert_eq!(a, b);
    }
}
