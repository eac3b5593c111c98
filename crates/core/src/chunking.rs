use crate::error::IngestError;
use crate::models::{Chunk, ChunkingConfig};
use regex::Regex;
use std::sync::OnceLock;

fn disallowed_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^\w\s.,!?;:\-()\[\]{}]").expect("pattern compiles"))
}

fn whitespace_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("pattern compiles"))
}

/// Strips characters outside the allowed set, then collapses whitespace runs
/// to single spaces. Idempotent: cleaning cleaned text is a no-op.
pub fn clean_text(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }

    let stripped = disallowed_re().replace_all(text, "");
    whitespace_re()
        .replace_all(stripped.trim(), " ")
        .into_owned()
}

/// Splits cleaned text into overlapping, sentence-boundary-aware chunks.
///
/// A window of `chunk_size` characters slides over the text; before each cut
/// the window is shortened to the nearest sentence terminator found in its
/// second half, and the next window starts `overlap` characters before the
/// cut. Text that fits in one window is returned whole.
pub fn chunk_text(text: &str, config: ChunkingConfig) -> Result<Vec<Chunk>, IngestError> {
    validate(config)?;

    if text.trim().is_empty() {
        return Ok(Vec::new());
    }

    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= config.chunk_size {
        return Ok(vec![Chunk::new(0, text.to_string())]);
    }

    let mut chunks = Vec::new();
    let mut start = 0usize;

    while start < chars.len() {
        let mut end = start + config.chunk_size;
        if end < chars.len() {
            if let Some(position) = last_sentence_end(&chars, start, end) {
                if position > start + config.chunk_size / 2 {
                    end = position + 1;
                }
            }
        }

        let cut = end.min(chars.len());
        let piece: String = chars[start..cut].iter().collect();
        let trimmed = piece.trim();
        if !trimmed.is_empty() {
            chunks.push(Chunk::new(chunks.len(), trimmed.to_string()));
        }

        if end < config.overlap {
            break;
        }
        start = end - config.overlap;
        if start >= chars.len() {
            break;
        }
    }

    Ok(chunks)
}

fn validate(config: ChunkingConfig) -> Result<(), IngestError> {
    if config.chunk_size == 0 {
        return Err(IngestError::InvalidChunkConfig(
            "chunk size must be greater than zero".to_string(),
        ));
    }
    // The window advance is bounded below by chunk_size / 2 - overlap, which
    // must stay positive for the scan to terminate.
    if config.overlap >= config.chunk_size / 2 {
        return Err(IngestError::InvalidChunkConfig(format!(
            "overlap {} must be smaller than half the chunk size {}",
            config.overlap, config.chunk_size
        )));
    }
    Ok(())
}

fn last_sentence_end(chars: &[char], start: usize, end: usize) -> Option<usize> {
    chars[start..end]
        .iter()
        .rposition(|character| *character == '.')
        .map(|relative| start + relative)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(chunk_size: usize, overlap: usize) -> ChunkingConfig {
        ChunkingConfig {
            chunk_size,
            overlap,
        }
    }

    #[test]
    fn cleaning_collapses_whitespace_and_strips_noise() {
        let cleaned = clean_text("A  \t lot\n\nof ©®™ spacing");
        assert_eq!(cleaned, "A lot of spacing");
    }

    #[test]
    fn cleaning_is_idempotent() {
        let raw = "  Uneven\ttext © with\n\nnoise…  ";
        let once = clean_text(raw);
        let twice = clean_text(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn short_text_is_one_chunk() {
        let chunks = chunk_text("A short paragraph.", ChunkingConfig::default())
            .expect("chunking should succeed");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "A short paragraph.");
        assert_eq!(chunks[0].index, 0);
    }

    #[test]
    fn whitespace_only_text_yields_no_chunks() {
        let chunks = chunk_text("   \n ", ChunkingConfig::default()).expect("chunking");
        assert!(chunks.is_empty());
    }

    #[test]
    fn long_text_without_sentences_yields_three_chunks() {
        let text = "abcdefghij".repeat(250);
        let chunks = chunk_text(&text, ChunkingConfig::default()).expect("chunking");

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].text.chars().count(), 1_000);
        assert_eq!(chunks[1].text.chars().count(), 1_000);
        assert_eq!(chunks[2].text.chars().count(), 700);
        for (position, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.index, position);
        }
    }

    #[test]
    fn consecutive_chunks_overlap_by_the_configured_amount() {
        let text = "abcdefghij".repeat(250);
        let overlap = ChunkingConfig::default().overlap;
        let chunks = chunk_text(&text, ChunkingConfig::default()).expect("chunking");

        for pair in chunks.windows(2) {
            let tail: String = pair[0].text.chars().rev().take(overlap).collect();
            let tail: String = tail.chars().rev().collect();
            let head: String = pair[1].text.chars().take(overlap).collect();
            assert_eq!(tail, head);
        }
    }

    #[test]
    fn non_overlapping_portions_reconstruct_the_text() {
        let text = "abcdefghij".repeat(250);
        let overlap = ChunkingConfig::default().overlap;
        let chunks = chunk_text(&text, ChunkingConfig::default()).expect("chunking");

        let mut rebuilt = chunks[0].text.clone();
        for chunk in &chunks[1..] {
            rebuilt.extend(chunk.text.chars().skip(overlap));
        }
        assert_eq!(rebuilt, text);
    }

    #[test]
    fn cut_prefers_a_sentence_end_in_the_second_half() {
        let mut text = "x".repeat(70);
        text.push('.');
        text.push_str(&"y".repeat(60));

        let chunks = chunk_text(&text, config(100, 10)).expect("chunking");
        assert_eq!(chunks[0].text.chars().count(), 71);
        assert!(chunks[0].text.ends_with('.'));
    }

    #[test]
    fn sentence_end_in_the_first_half_is_ignored() {
        let mut text = "x".repeat(30);
        text.push('.');
        text.push_str(&"y".repeat(100));

        let chunks = chunk_text(&text, config(100, 10)).expect("chunking");
        assert_eq!(chunks[0].text.chars().count(), 100);
    }

    #[test]
    fn every_chunk_except_the_last_respects_the_window() {
        let text = "lorem ipsum dolor sit amet. ".repeat(200);
        let cleaned = clean_text(&text);
        let chunks = chunk_text(&cleaned, ChunkingConfig::default()).expect("chunking");

        for chunk in &chunks[..chunks.len() - 1] {
            assert!(chunk.text.chars().count() <= 1_000);
        }
    }

    #[test]
    fn zero_chunk_size_is_rejected() {
        assert!(matches!(
            chunk_text("text", config(0, 0)),
            Err(IngestError::InvalidChunkConfig(_))
        ));
    }

    #[test]
    fn oversized_overlap_is_rejected() {
        assert!(matches!(
            chunk_text("text", config(100, 60)),
            Err(IngestError::InvalidChunkConfig(_))
        ));
    }
}
