//! Text chunking strategies.
//!
//! This module provides the [`Chunker`] trait and two implementations:
//!
//! - [`RecursiveChunker`]: splits at paragraph, line, sentence, then word
//!   boundaries and only hard-cuts words as a last resort
//! - [`FixedSizeChunker`]: splits by character count with exact overlap
//!
//! All lengths are counted in Unicode scalar values (`char`s), never bytes,
//! so a chunk boundary never lands inside a multi-byte character.

use std::ops::Range;

use crate::error::{RagError, Result};

/// A strategy for splitting text into bounded, overlapping segments.
///
/// Implementations report segments as byte ranges into the source text so
/// callers can recover exact positions; [`split`](Chunker::split) copies them
/// out. Segments are never empty and are ordered by position.
pub trait Chunker: Send + Sync {
    /// Byte ranges of the segments of `text`, in order.
    fn spans(&self, text: &str) -> Vec<Range<usize>>;

    /// The segments of `text`, in order.
    ///
    /// Returns an empty `Vec` if `text` is empty or whitespace only.
    fn split(&self, text: &str) -> Vec<String> {
        self.spans(text).into_iter().map(|range| text[range].to_string()).collect()
    }
}

/// Split `text` into segments of at most `chunk_size` characters, consecutive
/// segments sharing up to `overlap` characters, preferring natural boundaries.
///
/// # Errors
///
/// Returns [`RagError::InvalidConfig`] if `chunk_size == 0` or
/// `overlap >= chunk_size`.
pub fn split_text(text: &str, chunk_size: usize, overlap: usize) -> Result<Vec<String>> {
    Ok(RecursiveChunker::new(chunk_size, overlap)?.split(text))
}

fn validate(chunk_size: usize, chunk_overlap: usize) -> Result<()> {
    if chunk_size == 0 {
        return Err(RagError::InvalidConfig("chunk_size must be greater than zero".to_string()));
    }
    if chunk_overlap >= chunk_size {
        return Err(RagError::InvalidConfig(format!(
            "chunk_overlap ({chunk_overlap}) must be less than chunk_size ({chunk_size})"
        )));
    }
    Ok(())
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Shrink `range` so it excludes leading and trailing whitespace.
fn trim_range(text: &str, range: Range<usize>) -> Range<usize> {
    let slice = &text[range.clone()];
    let start = range.start + (slice.len() - slice.trim_start().len());
    let end = range.start + slice.trim_end().len();
    if start >= end { start..start } else { start..end }
}

/// Splits text into fixed-size character windows.
///
/// Consecutive windows overlap by exactly `chunk_overlap` characters; only
/// the final window may be shorter. Boundaries ignore words and sentences.
/// A window that falls entirely inside a run of whitespace is skipped, so the
/// neighbours of a skipped window do not overlap.
///
/// # Example
///
/// ```rust,ignore
/// use docchat_rag::{Chunker, FixedSizeChunker};
///
/// let chunker = FixedSizeChunker::new(256, 50)?;
/// let segments = chunker.split(&text);
/// ```
#[derive(Debug, Clone)]
pub struct FixedSizeChunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl FixedSizeChunker {
    /// Create a new `FixedSizeChunker`.
    ///
    /// # Arguments
    ///
    /// * `chunk_size`: maximum number of characters per chunk
    /// * `chunk_overlap`: number of overlapping characters between consecutive chunks
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidConfig`] if `chunk_size == 0` or
    /// `chunk_overlap >= chunk_size`.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        validate(chunk_size, chunk_overlap)?;
        Ok(Self { chunk_size, chunk_overlap })
    }
}

impl Chunker for FixedSizeChunker {
    fn spans(&self, text: &str) -> Vec<Range<usize>> {
        let range = trim_range(text, 0..text.len());
        if range.is_empty() {
            return Vec::new();
        }

        // offsets[k] is the byte position of the k-th character; the last
        // entry is the end of the trimmed range.
        let offsets: Vec<usize> = text[range.clone()]
            .char_indices()
            .map(|(i, _)| range.start + i)
            .chain(std::iter::once(range.end))
            .collect();
        let total = offsets.len() - 1;
        let step = self.chunk_size - self.chunk_overlap;

        let mut spans = Vec::new();
        let mut start = 0;
        loop {
            let end = (start + self.chunk_size).min(total);
            let span = offsets[start]..offsets[end];
            if !text[span.clone()].trim().is_empty() {
                spans.push(span);
            }
            if end == total {
                break;
            }
            start += step;
        }
        spans
    }
}

/// Splits text hierarchically: paragraphs → lines → sentences → clauses → words.
///
/// The text is first cut into pieces no longer than `chunk_size`, using the
/// coarsest separator that works for each region and keeping every separator
/// attached to the preceding piece. Pieces are then merged greedily into
/// chunks; each new chunk starts with the trailing pieces of the previous one
/// that fit within `chunk_overlap`. A single word longer than `chunk_size` is
/// hard-cut by characters.
///
/// # Example
///
/// ```rust,ignore
/// use docchat_rag::{Chunker, RecursiveChunker};
///
/// let chunker = RecursiveChunker::new(1000, 200)?;
/// let segments = chunker.split(&text);
/// ```
#[derive(Debug, Clone)]
pub struct RecursiveChunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

const SEPARATORS: &[&str] = &["\n\n", "\n", ". ", "! ", "? ", "; ", ", ", " "];

impl RecursiveChunker {
    /// Create a new `RecursiveChunker`.
    ///
    /// # Arguments
    ///
    /// * `chunk_size`: maximum number of characters per chunk
    /// * `chunk_overlap`: maximum number of characters shared by consecutive chunks
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidConfig`] if `chunk_size == 0` or
    /// `chunk_overlap >= chunk_size`.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        validate(chunk_size, chunk_overlap)?;
        Ok(Self { chunk_size, chunk_overlap })
    }

    /// Cut `range` into contiguous pieces of at most `chunk_size` characters.
    fn collect_pieces(
        &self,
        text: &str,
        range: Range<usize>,
        separators: &[&str],
        out: &mut Vec<Range<usize>>,
    ) {
        let slice = &text[range.clone()];
        if char_len(slice) <= self.chunk_size {
            out.push(range);
            return;
        }

        let Some((separator, remaining)) = separators.split_first() else {
            self.hard_cut(text, range, out);
            return;
        };

        if !slice.contains(*separator) {
            self.collect_pieces(text, range, remaining, out);
            return;
        }

        let mut start = range.start;
        for (pos, _) in slice.match_indices(*separator) {
            let end = range.start + pos + separator.len();
            self.collect_pieces(text, start..end, remaining, out);
            start = end;
        }
        if start < range.end {
            self.collect_pieces(text, start..range.end, remaining, out);
        }
    }

    fn hard_cut(&self, text: &str, range: Range<usize>, out: &mut Vec<Range<usize>>) {
        let mut start = range.start;
        let mut count = 0;
        for (i, _) in text[range.clone()].char_indices() {
            if count == self.chunk_size {
                out.push(start..range.start + i);
                start = range.start + i;
                count = 0;
            }
            count += 1;
        }
        if start < range.end {
            out.push(start..range.end);
        }
    }

    /// Merge pieces into chunks, carrying trailing pieces forward as overlap.
    fn merge(&self, text: &str, pieces: &[Range<usize>]) -> Vec<Range<usize>> {
        let lens: Vec<usize> = pieces.iter().map(|p| char_len(&text[p.clone()])).collect();
        let mut spans = Vec::new();
        let mut window_start = 0;
        let mut window_len = 0;

        for i in 0..pieces.len() {
            if i > window_start && window_len + lens[i] > self.chunk_size {
                push_span(text, pieces[window_start].start..pieces[i - 1].end, &mut spans);
                while window_start < i
                    && (window_len > self.chunk_overlap || window_len + lens[i] > self.chunk_size)
                {
                    window_len -= lens[window_start];
                    window_start += 1;
                }
            }
            window_len += lens[i];
        }

        if let Some(last) = pieces.last() {
            push_span(text, pieces[window_start].start..last.end, &mut spans);
        }
        spans
    }
}

/// Trim `range` and append it unless it is empty or adds nothing past the
/// previous span.
fn push_span(text: &str, range: Range<usize>, spans: &mut Vec<Range<usize>>) {
    let range = trim_range(text, range);
    if range.is_empty() {
        return;
    }
    if spans.last().is_some_and(|prev: &Range<usize>| range.end <= prev.end) {
        return;
    }
    spans.push(range);
}

impl Chunker for RecursiveChunker {
    fn spans(&self, text: &str) -> Vec<Range<usize>> {
        let range = trim_range(text, 0..text.len());
        if range.is_empty() {
            return Vec::new();
        }

        let mut pieces = Vec::new();
        self.collect_pieces(text, range, SEPARATORS, &mut pieces);
        self.merge(text, &pieces)
    }
}
