//! Recursive character splitter.
//!
//! Text is split on the coarsest separator present (paragraphs, then lines,
//! then words, then characters). Pieces that still exceed `chunk_size` are
//! split again with the next separator, and small neighbouring pieces are
//! merged back together with up to `chunk_overlap` characters carried over
//! between consecutive chunks. Lengths are measured in characters.

use serde::{Deserialize, Serialize};

use crate::core::errors::ApiError;

const DEFAULT_SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];

/// A chunk of a source document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextChunk {
    pub text: String,
    /// Position of the chunk within its document.
    pub chunk_index: usize,
    /// Character offset of the chunk in the original text.
    pub start_offset: usize,
}

#[derive(Debug, Clone)]
pub struct RecursiveSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl RecursiveSplitter {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self, ApiError> {
        if chunk_size == 0 {
            return Err(ApiError::BadRequest("chunk_size must be greater than 0".to_string()));
        }
        if chunk_overlap >= chunk_size {
            return Err(ApiError::BadRequest(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                chunk_overlap, chunk_size
            )));
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    /// Splits `text` into trimmed, non-empty chunks with their offsets.
    pub fn split(&self, text: &str) -> Vec<TextChunk> {
        let pieces = self.split_recursive(text, &DEFAULT_SEPARATORS);

        let mut chunks = Vec::with_capacity(pieces.len());
        let mut previous: Option<(usize, usize)> = None;

        for (chunk_index, piece) in pieces.into_iter().enumerate() {
            let search_from = match previous {
                None => 0,
                Some((start, len)) => {
                    // overlap is counted in characters, a character is at most 4 bytes
                    let back = len.min(self.chunk_overlap.saturating_mul(4));
                    floor_char_boundary(text, (start + len - back).max(start + 1))
                }
            };
            let byte_start = text[search_from..]
                .find(piece.as_str())
                .map(|pos| search_from + pos)
                .unwrap_or(search_from);

            chunks.push(TextChunk {
                start_offset: text[..byte_start].chars().count(),
                chunk_index,
                text: piece,
            });
            previous = Some((byte_start, chunks[chunk_index].text.len()));
        }

        chunks
    }

    fn split_recursive(&self, text: &str, separators: &[&str]) -> Vec<String> {
        let mut separator = "";
        let mut remaining: &[&str] = &[];
        for (i, candidate) in separators.iter().enumerate() {
            if candidate.is_empty() || text.contains(candidate) {
                separator = candidate;
                remaining = &separators[i + 1..];
                break;
            }
        }

        let mut final_chunks = Vec::new();
        let mut good_splits: Vec<&str> = Vec::new();

        for piece in split_keep_separator(text, separator) {
            if char_len(piece) < self.chunk_size {
                good_splits.push(piece);
                continue;
            }

            if !good_splits.is_empty() {
                final_chunks.extend(self.merge_splits(&good_splits));
                good_splits.clear();
            }

            if remaining.is_empty() {
                let trimmed = piece.trim();
                if !trimmed.is_empty() {
                    final_chunks.push(trimmed.to_string());
                }
            } else {
                final_chunks.extend(self.split_recursive(piece, remaining));
            }
        }

        if !good_splits.is_empty() {
            final_chunks.extend(self.merge_splits(&good_splits));
        }

        final_chunks
    }

    /// Greedily joins pieces into chunks no longer than `chunk_size`.
    fn merge_splits(&self, splits: &[&str]) -> Vec<String> {
        let mut docs = Vec::new();
        let mut current: Vec<(&str, usize)> = Vec::new();
        let mut total = 0usize;

        for piece in splits {
            let len = char_len(piece);

            if total + len > self.chunk_size {
                if total > self.chunk_size {
                    tracing::warn!(
                        "Created a chunk of size {}, which is longer than the specified {}",
                        total,
                        self.chunk_size
                    );
                }
                if !current.is_empty() {
                    push_joined(&mut docs, &current);

                    let mut drop = 0;
                    while drop < current.len()
                        && (total > self.chunk_overlap
                            || (total + len > self.chunk_size && total > 0))
                    {
                        total -= current[drop].1;
                        drop += 1;
                    }
                    current.drain(..drop);
                }
            }

            current.push((piece, len));
            total += len;
        }

        push_joined(&mut docs, &current);
        docs
    }
}

fn push_joined(docs: &mut Vec<String>, current: &[(&str, usize)]) {
    let joined: String = current.iter().map(|(piece, _)| *piece).collect();
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        docs.push(trimmed.to_string());
    }
}

/// Splits on `separator`, keeping it at the start of the following piece.
fn split_keep_separator<'a>(text: &'a str, separator: &str) -> Vec<&'a str> {
    if separator.is_empty() {
        return text
            .char_indices()
            .map(|(i, c)| &text[i..i + c.len_utf8()])
            .collect();
    }

    let mut pieces = Vec::new();
    let mut last = 0;
    for (idx, _) in text.match_indices(separator) {
        pieces.push(&text[last..idx]);
        last = idx;
    }
    pieces.push(&text[last..]);
    pieces.retain(|piece| !piece.is_empty());
    pieces
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

fn floor_char_boundary(text: &str, mut index: usize) -> usize {
    if index >= text.len() {
        return text.len();
    }
    while !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(chunks: &[TextChunk]) -> Vec<&str> {
        chunks.iter().map(|c| c.text.as_str()).collect()
    }

    #[test]
    fn rejects_overlap_not_smaller_than_size() {
        assert!(RecursiveSplitter::new(0, 0).is_err());
        assert!(RecursiveSplitter::new(100, 100).is_err());
        assert!(RecursiveSplitter::new(100, 99).is_ok());
    }

    #[test]
    fn short_text_is_a_single_trimmed_chunk() {
        let splitter = RecursiveSplitter::new(1000, 200).unwrap();
        let chunks = splitter.split("  Hello world.  \n");

        assert_eq!(texts(&chunks), vec!["Hello world."]);
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[0].start_offset, 2);
    }

    #[test]
    fn empty_and_whitespace_text_yield_no_chunks() {
        let splitter = RecursiveSplitter::new(10, 2).unwrap();
        assert!(splitter.split("").is_empty());
        assert!(splitter.split(" \n\n \n").is_empty());
    }

    #[test]
    fn prefers_paragraph_boundaries() {
        let splitter = RecursiveSplitter::new(10, 0).unwrap();
        let chunks = splitter.split("aaaa bbbb\n\ncccc dddd");

        assert_eq!(texts(&chunks), vec!["aaaa bbbb", "cccc dddd"]);
        assert_eq!(chunks[1].start_offset, 11);
    }

    #[test]
    fn carries_overlap_between_word_chunks() {
        let splitter = RecursiveSplitter::new(10, 4).unwrap();
        let chunks = splitter.split("one two three four five six");

        assert_eq!(texts(&chunks), vec!["one two", "two three", "four five", "six"]);
        let offsets: Vec<usize> = chunks.iter().map(|c| c.start_offset).collect();
        assert_eq!(offsets, vec![0, 4, 14, 24]);
        let indices: Vec<usize> = chunks.iter().map(|c| c.chunk_index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3]);
    }

    #[test]
    fn falls_back_to_characters_for_unbroken_text() {
        let splitter = RecursiveSplitter::new(5, 2).unwrap();
        let chunks = splitter.split("abcdefghijkl");

        assert_eq!(texts(&chunks), vec!["abcde", "cdefg", "fghij", "ijkl"]);
    }

    #[test]
    fn chunk_lengths_are_counted_in_characters() {
        let splitter = RecursiveSplitter::new(4, 0).unwrap();
        let chunks = splitter.split("äöüßäöüß");

        assert_eq!(texts(&chunks), vec!["äöüß", "äöüß"]);
        assert_eq!(chunks[1].start_offset, 4);
    }

    #[test]
    fn no_chunk_exceeds_size_for_regular_prose() {
        let splitter = RecursiveSplitter::new(100, 20).unwrap();
        let text = "Rust is a systems language. ".repeat(40);
        let chunks = splitter.split(&text);

        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.text.chars().count() <= 100));
        assert!(chunks.iter().all(|c| !c.text.is_empty()));
    }
}
