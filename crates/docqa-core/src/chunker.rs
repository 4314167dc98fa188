//! Sliding-window text chunker with sentence-boundary lookahead.
//!
//! Splits a document into overlapping [`Fragment`]s: a window of
//! `chunk_size` characters advances with stride `chunk_size − overlap`.
//! When a sentence boundary (`.`, `!`, `?`, `\n`) exists within
//! `boundary_lookahead` characters before the hard limit, the fragment
//! ends just after it instead of mid-sentence; otherwise it splits at
//! the hard limit. The final fragment may be shorter than `chunk_size`.
//!
//! Chunking is deterministic: identical `(text, config)` always yields
//! identical boundaries and fragment ids. With `overlap = 0`,
//! concatenating fragments in `sequence_index` order reproduces the
//! source text exactly.

use serde::Deserialize;

use crate::error::{CoreError, Result};
use crate::models::{Document, Fragment};

/// Characters treated as sentence boundaries for split decisions.
const BOUNDARY_CHARS: [char; 4] = ['.', '!', '?', '\n'];

/// Validated chunker configuration.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ChunkerConfig {
    /// Maximum fragment length in characters.
    pub chunk_size: usize,
    /// Characters shared between consecutive fragments.
    pub overlap: usize,
    /// How far before the hard limit to look for a sentence boundary.
    pub boundary_lookahead: usize,
}

impl ChunkerConfig {
    /// Build a config, enforcing `chunk_size > 0` and
    /// `0 ≤ overlap < chunk_size`.
    pub fn new(chunk_size: usize, overlap: usize, boundary_lookahead: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(CoreError::InvalidArgument(
                "chunk_size must be > 0".into(),
            ));
        }
        if overlap >= chunk_size {
            return Err(CoreError::InvalidArgument(format!(
                "overlap ({overlap}) must be < chunk_size ({chunk_size})"
            )));
        }
        Ok(Self {
            chunk_size,
            overlap,
            boundary_lookahead,
        })
    }
}

/// Deterministic sliding-window chunker.
#[derive(Debug, Clone)]
pub struct Chunker {
    config: ChunkerConfig,
}

impl Chunker {
    pub fn new(config: ChunkerConfig) -> Self {
        Self { config }
    }

    /// Split a document into ordered fragments.
    ///
    /// Returns [`CoreError::EmptyDocument`] when the text is empty or
    /// whitespace-only.
    pub fn chunk(&self, document: &Document) -> Result<Vec<Fragment>> {
        let text = document.text.as_str();
        if text.trim().is_empty() {
            return Err(CoreError::EmptyDocument);
        }

        // Byte offset of every char, plus a sentinel at the end, so
        // char-offset windows can slice the source text directly.
        let mut byte_offsets: Vec<usize> = text.char_indices().map(|(b, _)| b).collect();
        byte_offsets.push(text.len());
        let chars: Vec<char> = text.chars().collect();
        let total = chars.len();

        let mut fragments = Vec::new();
        let mut start = 0usize;
        let mut sequence_index = 0usize;

        while start < total {
            let hard_end = (start + self.config.chunk_size).min(total);
            let end = if hard_end < total {
                self.boundary_end(&chars, start, hard_end)
            } else {
                hard_end
            };

            let slice = &text[byte_offsets[start]..byte_offsets[end]];
            fragments.push(Fragment {
                id: Fragment::derive_id(&document.id, start, end - start),
                document_id: document.id.clone(),
                text: slice.to_string(),
                start_offset: start,
                end_offset: end,
                sequence_index,
            });
            sequence_index += 1;

            if end == total {
                break;
            }
            let next = end.saturating_sub(self.config.overlap);
            // Forward progress even when a short boundary-trimmed
            // fragment is no longer than the overlap window.
            start = next.max(start + 1);
        }

        Ok(fragments)
    }

    /// Pick the fragment end: the position just after the last sentence
    /// boundary within the lookahead window, or the hard limit.
    fn boundary_end(&self, chars: &[char], start: usize, hard_end: usize) -> usize {
        let lookback_floor = hard_end
            .saturating_sub(self.config.boundary_lookahead)
            .max(start + 1);
        let mut i = hard_end;
        while i > lookback_floor {
            if BOUNDARY_CHARS.contains(&chars[i - 1]) {
                return i;
            }
            i -= 1;
        }
        hard_end
    }
}
