//! Fixed-window text chunker with overlap.
//!
//! Splits document text into windows of `chunk_size` characters, advancing
//! by `chunk_size - overlap` characters each step. The last window is
//! truncated to whatever text remains. Windows are measured in Unicode
//! scalar values, so a multi-byte character is never cut in half.
//!
//! Windows do not snap to sentence or word boundaries. Dropping the first
//! `overlap` characters of every chunk after the first and concatenating
//! gives back the original text.
//!
//! Each [`Chunk`] receives a deterministic UUID (v5, derived from the
//! document's relative path and the chunk ordinal) plus a SHA-256 hash
//! of its text.
//!
//! # Example
//!
//! ```rust
//! use sop_harness::chunk::chunk_text;
//!
//! let spans = chunk_text("abcdefghij", 4, 1).unwrap();
//! let texts: Vec<&str> = spans.iter().map(|s| s.text).collect();
//! assert_eq!(texts, vec!["abcd", "defg", "ghij"]);
//! ```

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{IndexError, Result};
use crate::models::Chunk;

/// A window over the source text, borrowed from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkSpan<'a> {
    pub ordinal: usize,
    pub text: &'a str,
    /// Character (not byte) offsets: `[char_start, char_end)`.
    pub char_start: usize,
    pub char_end: usize,
}

/// Check chunking parameters: `chunk_size > 0` and `overlap < chunk_size`.
pub fn validate_params(chunk_size: usize, overlap: usize) -> Result<()> {
    if chunk_size == 0 {
        return Err(IndexError::InvalidConfiguration(
            "chunk_size must be > 0".to_string(),
        ));
    }
    if overlap >= chunk_size {
        return Err(IndexError::InvalidConfiguration(format!(
            "overlap ({}) must be smaller than chunk_size ({})",
            overlap, chunk_size
        )));
    }
    Ok(())
}

/// Split `text` into overlapping character windows.
///
/// Returns an empty vector for empty input.
pub fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Result<Vec<ChunkSpan<'_>>> {
    validate_params(chunk_size, overlap)?;

    let stride = chunk_size - overlap;

    let mut spans = Vec::new();
    let mut start_byte = 0;
    let mut start_char = 0;
    while start_byte < text.len() {
        let rest = &text[start_byte..];
        let (window_bytes, window_chars) = split_after(rest, chunk_size);
        spans.push(ChunkSpan {
            ordinal: spans.len(),
            text: &rest[..window_bytes],
            char_start: start_char,
            char_end: start_char + window_chars,
        });
        if window_bytes == rest.len() {
            break;
        }
        // A full window was taken, so at least `stride` chars remain.
        let (stride_bytes, _) = split_after(rest, stride);
        start_byte += stride_bytes;
        start_char += stride;
    }

    Ok(spans)
}

/// Byte length of the first `n` chars of `s` and how many chars that is
/// (fewer than `n` when `s` is shorter).
fn split_after(s: &str, n: usize) -> (usize, usize) {
    match s.char_indices().nth(n) {
        Some((byte, _)) => (byte, n),
        None => (s.len(), s.chars().count()),
    }
}

/// Chunk a document's text and assign stable ids and content hashes.
///
/// Re-chunking the same unchanged text under the same `relative_path`
/// always yields the same ids.
pub fn make_chunks(
    relative_path: &str,
    text: &str,
    chunk_size: usize,
    overlap: usize,
) -> Result<Vec<Chunk>> {
    Ok(chunk_text(text, chunk_size, overlap)?
        .into_iter()
        .map(|span| Chunk {
            id: chunk_id(relative_path, span.ordinal),
            ordinal: span.ordinal,
            text: span.text.to_string(),
            char_start: span.char_start,
            char_end: span.char_end,
            hash: content_hash(span.text),
        })
        .collect())
}

/// Deterministic chunk id for `relative_path` at position `ordinal`.
pub fn chunk_id(relative_path: &str, ordinal: usize) -> String {
    let key = format!("{}#{}", relative_path, ordinal);
    Uuid::new_v5(&Uuid::NAMESPACE_URL, key.as_bytes()).to_string()
}

fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reconstruct(spans: &[ChunkSpan<'_>], overlap: usize) -> String {
        let mut out = String::new();
        for (i, span) in spans.iter().enumerate() {
            if i == 0 {
                out.push_str(span.text);
            } else {
                out.extend(span.text.chars().skip(overlap));
            }
        }
        out
    }

    fn expected_count(len: usize, chunk_size: usize, overlap: usize) -> usize {
        if len == 0 {
            return 0;
        }
        let stride = chunk_size - overlap;
        let remaining = len.saturating_sub(overlap);
        remaining.div_ceil(stride).max(1)
    }

    #[test]
    fn test_empty_text_yields_no_chunks() {
        let spans = chunk_text("", 1000, 200).unwrap();
        assert!(spans.is_empty());
    }

    #[test]
    fn test_short_text_single_chunk() {
        let spans = chunk_text("Hello, world!", 1000, 200).unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].text, "Hello, world!");
        assert_eq!(spans[0].char_start, 0);
        assert_eq!(spans[0].char_end, 13);
    }

    #[test]
    fn test_exact_windows_and_overlap() {
        let spans = chunk_text("abcdefghij", 4, 1).unwrap();
        let texts: Vec<&str> = spans.iter().map(|s| s.text).collect();
        assert_eq!(texts, vec!["abcd", "defg", "ghij"]);
        for pair in spans.windows(2) {
            let prev_tail: String = pair[0].text.chars().skip(3).collect();
            let next_head: String = pair[1].text.chars().take(1).collect();
            assert_eq!(prev_tail, next_head);
        }
    }

    #[test]
    fn test_text_of_exactly_chunk_size() {
        let spans = chunk_text("€€€€€", 5, 2).unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].text, "€€€€€");
        assert_eq!((spans[0].char_start, spans[0].char_end), (0, 5));
    }

    #[test]
    fn test_last_chunk_truncated() {
        let spans = chunk_text("abcdefgh", 5, 2).unwrap();
        let texts: Vec<&str> = spans.iter().map(|s| s.text).collect();
        assert_eq!(texts, vec!["abcde", "defgh"]);
    }

    #[test]
    fn test_round_trip_reconstructs_text() {
        let text = "Procedura operativa standard per la gestione delle non conformità. "
            .repeat(40);
        for (size, overlap) in [(1000, 200), (50, 0), (37, 36), (7, 3), (1, 0)] {
            let spans = chunk_text(&text, size, overlap).unwrap();
            assert_eq!(
                reconstruct(&spans, overlap),
                text,
                "round trip failed for size={} overlap={}",
                size,
                overlap
            );
            for s in &spans {
                assert!(s.text.chars().count() <= size);
            }
        }
    }

    #[test]
    fn test_chunk_count_formula() {
        for len in [1usize, 5, 199, 200, 201, 999, 1000, 1001, 1800, 1801, 5000] {
            let text = "x".repeat(len);
            let spans = chunk_text(&text, 1000, 200).unwrap();
            assert_eq!(
                spans.len(),
                expected_count(len, 1000, 200),
                "wrong count for len={}",
                len
            );
        }
    }

    #[test]
    fn test_multibyte_chars_not_split() {
        let text = "àèìòù┌─┐€😀".repeat(13);
        let spans = chunk_text(&text, 7, 2).unwrap();
        for s in &spans {
            assert!(s.text.chars().count() <= 7);
        }
        assert_eq!(reconstruct(&spans, 2), text);
        let total_chars = text.chars().count();
        assert_eq!(spans.last().unwrap().char_end, total_chars);
    }

    #[test]
    fn test_invalid_params() {
        assert!(matches!(
            chunk_text("abc", 0, 0),
            Err(IndexError::InvalidConfiguration(_))
        ));
        assert!(matches!(
            chunk_text("abc", 10, 10),
            Err(IndexError::InvalidConfiguration(_))
        ));
        assert!(matches!(
            chunk_text("abc", 10, 11),
            Err(IndexError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_ids_deterministic() {
        let text = "Alpha beta gamma delta epsilon. ".repeat(20);
        let a = make_chunks("SOP01 Quality/manual.pdf", &text, 100, 20).unwrap();
        let b = make_chunks("SOP01 Quality/manual.pdf", &text, 100, 20).unwrap();
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x.id, y.id);
            assert_eq!(x.hash, y.hash);
        }
        let other = make_chunks("SOP02 Audit/manual.pdf", &text, 100, 20).unwrap();
        assert_ne!(a[0].id, other[0].id);
        assert_ne!(a[0].id, a[1].id);
    }
}
