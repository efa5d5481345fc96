//! Recursive, overlap-aware text chunker.
//!
//! Splits document text into [`Chunk`]s of at most `chunk_size` characters,
//! with adjacent chunks sharing up to `chunk_overlap` characters of context.
//!
//! # Algorithm
//!
//! 1. Pick the highest-priority separator that occurs in the text
//!    (paragraph break, line break, sentence punctuation, space, and finally
//!    the empty string, which splits into single characters).
//! 2. Split on it, keeping each separator attached to the start of the
//!    piece that follows it.
//! 3. Pieces shorter than `chunk_size` are merged greedily into chunks.
//!    When a chunk is flushed, pieces are dropped from its front until at
//!    most `chunk_overlap` characters remain; those become the leading
//!    context of the next chunk.
//! 4. Pieces that are still too long are split again with the remaining,
//!    lower-priority separators.
//!
//! The empty separator guarantees termination: no chunk exceeds
//! `chunk_size` unless the separator list omits `""` and a single atomic
//! piece is longer than the limit.
//!
//! All lengths are counted in `char`s, so CJK text is measured the same way
//! as ASCII text.
//!
//! # Example
//!
//! ```rust
//! use askdocs_core::chunk::{default_separators, TextChunker};
//!
//! let chunker = TextChunker::new(40, 10, default_separators()).unwrap();
//! let pieces = chunker.split_text("First paragraph.\n\nSecond paragraph is a bit longer.");
//! assert_eq!(pieces, vec!["First paragraph.", "Second paragraph is a bit longer."]);
//! ```

use std::collections::VecDeque;
use std::ops::Range;

use anyhow::{bail, Result};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::models::{Chunk, Document};

pub const DEFAULT_CHUNK_SIZE: usize = 800;
pub const DEFAULT_CHUNK_OVERLAP: usize = 150;

/// Separators in priority order, ending with the hard-cutoff `""`.
///
/// Chinese sentence punctuation comes before the space separator so CJK
/// text (which rarely contains spaces) still breaks at sentence ends.
pub fn default_separators() -> Vec<String> {
    [
        "\n\n", "\n", "。", "！", "？", "；", "，", ". ", "! ", "? ", " ", "",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Splits text into overlapping chunks.
#[derive(Debug, Clone)]
pub struct TextChunker {
    chunk_size: usize,
    chunk_overlap: usize,
    separators: Vec<String>,
}

impl TextChunker {
    /// Create a chunker.
    ///
    /// # Errors
    ///
    /// Fails unless `0 <= chunk_overlap < chunk_size` and at least one
    /// separator is given.
    pub fn new(chunk_size: usize, chunk_overlap: usize, separators: Vec<String>) -> Result<Self> {
        if chunk_size == 0 {
            bail!("chunk_size must be > 0");
        }
        if chunk_overlap >= chunk_size {
            bail!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                chunk_overlap,
                chunk_size
            );
        }
        if separators.is_empty() {
            bail!("at least one separator is required");
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
            separators,
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }


    /// Split raw text into chunk strings, in document order.
    pub fn split_text(&self, text: &str) -> Vec<String> {
        self.split_spans(text, 0..text.len(), &self.separators)
            .into_iter()
            .map(|span| text[span].to_string())
            .collect()
    }

    /// Split one document into chunks that keep its source metadata.
    ///
    /// Ordinals are contiguous from 0. `start` and `overlap_prev` are
    /// character offsets into the document text.
    pub fn split_document(&self, doc: &Document) -> Vec<Chunk> {
        let text = doc.text.as_str();
        let spans = self.split_spans(text, 0..text.len(), &self.separators);
        let mut chunks = Vec::with_capacity(spans.len());

        // Spans start in document order, so char offsets are counted forward.
        let mut cursor_byte = 0usize;
        let mut cursor_char = 0usize;
        let mut prev_end = 0usize;

        for (ordinal, span) in spans.into_iter().enumerate() {
            if span.start < cursor_byte {
                cursor_byte = 0;
                cursor_char = 0;
            }
            cursor_char += char_len(&text[cursor_byte..span.start]);
            cursor_byte = span.start;

            let start = cursor_char;
            let piece = &text[span];
            let length = char_len(piece);
            let overlap_prev = if ordinal == 0 {
                0
            } else {
                prev_end.saturating_sub(start)
            };
            prev_end = start + length;

            chunks.push(make_chunk(doc, ordinal, piece.to_string(), start, length, overlap_prev));
        }

        chunks
    }

    /// Split every document, concatenating the per-document chunk sequences.
    pub fn split_documents(&self, docs: &[Document]) -> Vec<Chunk> {
        docs.iter().flat_map(|d| self.split_document(d)).collect()
    }

    /// Split `full[range]`, returning byte ranges of `full`.
    fn split_spans(&self, full: &str, range: Range<usize>, separators: &[String]) -> Vec<Range<usize>> {
        let text = &full[range.clone()];
        let mut separator = separators.last().map(String::as_str).unwrap_or("");
        let mut lower: &[String] = &[];
        for (i, sep) in separators.iter().enumerate() {
            if sep.is_empty() {
                separator = "";
                break;
            }
            if text.contains(sep.as_str()) {
                separator = sep;
                lower = &separators[i + 1..];
                break;
            }
        }

        let mut out = Vec::new();
        let mut pending: Vec<Range<usize>> = Vec::new();

        for piece in split_keeping_separator(text, separator) {
            let piece = piece.start + range.start..piece.end + range.start;
            if char_len(&full[piece.clone()]) < self.chunk_size {
                pending.push(piece);
                continue;
            }
            if !pending.is_empty() {
                out.extend(self.merge(full, &pending));
                pending.clear();
            }
            if lower.is_empty() {
                out.extend(trimmed_span(full, piece));
            } else {
                out.extend(self.split_spans(full, piece, lower));
            }
        }

        if !pending.is_empty() {
            out.extend(self.merge(full, &pending));
        }
        out
    }

    /// Greedily merge small adjacent pieces into chunks, carrying overlap
    /// forward.
    fn merge(&self, full: &str, pieces: &[Range<usize>]) -> Vec<Range<usize>> {
        let mut chunks = Vec::new();
        let mut window: VecDeque<(Range<usize>, usize)> = VecDeque::new();
        let mut total = 0usize;

        for piece in pieces {
            let len = char_len(&full[piece.clone()]);
            if total + len > self.chunk_size && !window.is_empty() {
                chunks.extend(window_span(full, &window));
                while total > self.chunk_overlap || (total + len > self.chunk_size && total > 0) {
                    match window.pop_front() {
                        Some((_, dropped)) => total -= dropped,
                        None => break,
                    }
                }
            }
            window.push_back((piece.clone(), len));
            total += len;
        }

        chunks.extend(window_span(full, &window));
        chunks
    }
}

/// Split `text` on `sep`, attaching each separator to the following piece.
/// An empty separator yields one piece per character. Pieces tile `text`.
fn split_keeping_separator(text: &str, sep: &str) -> Vec<Range<usize>> {
    if sep.is_empty() {
        return text
            .char_indices()
            .map(|(i, c)| i..i + c.len_utf8())
            .collect();
    }

    let mut pieces = Vec::new();
    let mut start = 0usize;
    for (idx, _) in text.match_indices(sep) {
        if idx > start {
            pieces.push(start..idx);
        }
        start = idx;
    }
    if start < text.len() {
        pieces.push(start..text.len());
    }
    pieces
}

/// The window's pieces are adjacent, so the chunk is one contiguous span.
fn window_span(full: &str, window: &VecDeque<(Range<usize>, usize)>) -> Option<Range<usize>> {
    let start = window.front()?.0.start;
    let end = window.back()?.0.end;
    trimmed_span(full, start..end)
}

/// `span` with surrounding whitespace removed; `None` if nothing remains.
fn trimmed_span(full: &str, span: Range<usize>) -> Option<Range<usize>> {
    let slice = &full[span.clone()];
    let trimmed = slice.trim();
    if trimmed.is_empty() {
        return None;
    }
    let start = span.start + (slice.len() - slice.trim_start().len());
    Some(start..start + trimmed.len())
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Create a single [`Chunk`] with a UUID and SHA-256 content hash.
fn make_chunk(
    doc: &Document,
    ordinal: usize,
    text: String,
    start: usize,
    length: usize,
    overlap_prev: usize,
) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        id: Uuid::new_v4().to_string(),
        document_id: doc.id.clone(),
        ordinal,
        text,
        length,
        start,
        overlap_prev,
        hash,
        metadata: doc.metadata.clone(),
    }
}
