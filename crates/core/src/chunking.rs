use crate::error::IngestError;
use crate::models::IngestionOptions;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use tiktoken_rs::{cl100k_base, CoreBPE};
use tracing::warn;

pub trait TokenCounter: Send + Sync {
    fn count(&self, text: &str) -> usize;
}

/// BPE token counts with the `cl100k_base` encoding.
pub struct TiktokenCounter {
    bpe: CoreBPE,
}

impl TiktokenCounter {
    pub fn new() -> Result<Self, IngestError> {
        let bpe = cl100k_base().map_err(|error| {
            IngestError::InvalidChunkConfig(format!("failed to load tokenizer: {error}"))
        })?;
        Ok(Self { bpe })
    }
}

impl TokenCounter for TiktokenCounter {
    fn count(&self, text: &str) -> usize {
        self.bpe.encode_with_special_tokens(text).len()
    }
}

/// Counts whitespace-separated words. A lone separator counts as zero.
#[derive(Debug, Default, Clone, Copy)]
pub struct WhitespaceCounter;

impl TokenCounter for WhitespaceCounter {
    fn count(&self, text: &str) -> usize {
        text.split_whitespace().count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    pub max_tokens: usize,
    pub overlap_tokens: usize,
}

impl From<&IngestionOptions> for ChunkingConfig {
    fn from(value: &IngestionOptions) -> Self {
        Self {
            max_tokens: value.max_tokens,
            overlap_tokens: value.overlap_tokens,
        }
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.max_tokens == 0 {
            return Err(IngestError::InvalidChunkConfig(
                "max_tokens must be positive".to_string(),
            ));
        }
        if self.overlap_tokens >= self.max_tokens {
            return Err(IngestError::InvalidChunkConfig(format!(
                "overlap {} must be smaller than chunk size {}",
                self.overlap_tokens, self.max_tokens
            )));
        }
        Ok(())
    }
}

/// Splits document text on whitespace and greedily packs the pieces into
/// chunks of at most `max_tokens`, carrying up to `overlap_tokens` of the
/// previous chunk's tail into the next one.
#[derive(Clone)]
pub struct TextChunker {
    config: ChunkingConfig,
    counter: Arc<dyn TokenCounter>,
}

impl fmt::Debug for TextChunker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TextChunker")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy)]
struct Piece<'a> {
    text: &'a str,
    separator: char,
    tokens: usize,
}

impl TextChunker {
    pub fn new(config: ChunkingConfig, counter: Arc<dyn TokenCounter>) -> Result<Self, IngestError> {
        config.validate()?;
        Ok(Self { config, counter })
    }

    pub fn with_tiktoken(config: ChunkingConfig) -> Result<Self, IngestError> {
        Self::new(config, Arc::new(TiktokenCounter::new()?))
    }

    pub fn split_text(&self, text: &str) -> Vec<String> {
        let max = self.config.max_tokens;
        let overlap = self.config.overlap_tokens;
        let separator_len = self.counter.count(" ");

        let mut chunks = Vec::new();
        let mut current: VecDeque<Piece<'_>> = VecDeque::new();
        let mut total = 0usize;

        for piece in self.split_pieces(text) {
            let joined_len = |current: &VecDeque<Piece<'_>>, total: usize| {
                total + piece.tokens + if current.is_empty() { 0 } else { separator_len }
            };

            if joined_len(&current, total) > max {
                if total > max {
                    warn!(tokens = total, max_tokens = max, "created a chunk larger than the limit");
                }

                if !current.is_empty() {
                    push_joined(&mut chunks, &current);

                    while total > overlap || (joined_len(&current, total) > max && total > 0) {
                        let Some(front) = current.pop_front() else {
                            break;
                        };
                        let carried = if current.is_empty() { 0 } else { separator_len };
                        total = total.saturating_sub(front.tokens + carried);
                    }
                }
            }

            current.push_back(piece);
            total += piece.tokens + if current.len() > 1 { separator_len } else { 0 };
        }

        push_joined(&mut chunks, &current);
        chunks
    }

    fn split_pieces<'a>(&self, text: &'a str) -> Vec<Piece<'a>> {
        let mut pieces = Vec::new();
        let mut separator = ' ';
        let mut start: Option<usize> = None;

        let mut push = |begin: usize, end: usize, separator: char| {
            let piece = &text[begin..end];
            pieces.push(Piece {
                text: piece,
                separator,
                tokens: self.counter.count(piece),
            });
        };

        for (index, ch) in text.char_indices() {
            if ch.is_whitespace() {
                if let Some(begin) = start.take() {
                    push(begin, index, separator);
                    separator = ' ';
                }
                if ch == '\n' {
                    separator = '\n';
                }
            } else if start.is_none() {
                start = Some(index);
            }
        }

        if let Some(begin) = start {
            push(begin, text.len(), separator);
        }

        pieces
    }
}

fn push_joined(chunks: &mut Vec<String>, pieces: &VecDeque<Piece<'_>>) {
    let mut joined = String::new();
    for (position, piece) in pieces.iter().enumerate() {
        if position > 0 {
            joined.push(piece.separator);
        }
        joined.push_str(piece.text);
    }

    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        chunks.push(trimmed.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CharCounter;

    impl TokenCounter for CharCounter {
        fn count(&self, text: &str) -> usize {
            text.chars().count()
        }
    }

    fn words(max_tokens: usize, overlap_tokens: usize) -> TextChunker {
        TextChunker::new(
            ChunkingConfig {
                max_tokens,
                overlap_tokens,
            },
            Arc::new(WhitespaceCounter),
        )
        .unwrap()
    }

    #[test]
    fn chunks_overlap_at_boundaries() {
        let chunks = words(4, 1).split_text("a b c d e f g");
        assert_eq!(chunks, vec!["a b c d", "d e f g"]);
    }

    #[test]
    fn tail_of_each_chunk_starts_the_next() {
        let text = (0..40).map(|n| format!("w{n}")).collect::<Vec<_>>().join(" ");
        let chunks = words(10, 5).split_text(&text);

        assert!(chunks.len() > 1);
        for pair in chunks.windows(2) {
            let previous_tail = pair[0].split(' ').last().unwrap();
            let next_head = pair[1].split(' ').next().unwrap();
            assert!(pair[0].split(' ').any(|word| word == next_head));
            assert!(pair[1].split(' ').any(|word| word == previous_tail));
        }
    }

    #[test]
    fn no_chunk_exceeds_limit() {
        let text = (0..500)
            .map(|n| if n % 7 == 0 { "\nline".to_string() } else { format!("t{n}") })
            .collect::<Vec<_>>()
            .join(" ");
        for max in [6, 8, 13, 64] {
            for chunk in words(max, 5).split_text(&text) {
                assert!(WhitespaceCounter.count(&chunk) <= max, "{chunk}");
            }
        }
    }

    #[test]
    fn oversized_piece_stands_alone() {
        let chunker = TextChunker::new(
            ChunkingConfig {
                max_tokens: 5,
                overlap_tokens: 0,
            },
            Arc::new(CharCounter),
        )
        .unwrap();

        let chunks = chunker.split_text("ab abcdefgh cd");
        assert_eq!(chunks, vec!["ab", "abcdefgh", "cd"]);
    }

    #[test]
    fn newline_separators_are_preserved() {
        let chunks = words(64, 5).split_text("one two\nthree four");
        assert_eq!(chunks, vec!["one two\nthree four"]);
    }

    #[test]
    fn empty_text_has_no_chunks() {
        assert!(words(8, 5).split_text("   \n ").is_empty());
    }

    #[test]
    fn splitting_is_repeatable() {
        let chunker = words(6, 2);
        let text = "the quick brown fox jumps over the lazy dog again and again";
        assert_eq!(chunker.split_text(text), chunker.split_text(text));
    }

    #[test]
    fn invalid_configs_are_rejected() {
        let zero = ChunkingConfig {
            max_tokens: 0,
            overlap_tokens: 0,
        };
        let overlap = ChunkingConfig {
            max_tokens: 4,
            overlap_tokens: 5,
        };
        assert!(matches!(
            zero.validate(),
            Err(IngestError::InvalidChunkConfig(_))
        ));
        assert!(matches!(
            overlap.validate(),
            Err(IngestError::InvalidChunkConfig(_))
        ));
    }

    #[test]
    fn overlap_equal_to_chunk_size_is_rejected() {
        let equal = ChunkingConfig {
            max_tokens: 5,
            overlap_tokens: 5,
        };
        assert!(matches!(
            equal.validate(),
            Err(IngestError::InvalidChunkConfig(_))
        ));
        assert!(TextChunker::new(equal, Arc::new(WhitespaceCounter)).is_err());

        let below = ChunkingConfig {
            max_tokens: 5,
            overlap_tokens: 4,
        };
        assert!(below.validate().is_ok());
    }

    #[test]
    fn tiktoken_chunks_stay_within_budget() -> Result<(), IngestError> {
        let config = ChunkingConfig {
            max_tokens: 32,
            overlap_tokens: 5,
        };
        let chunker = TextChunker::with_tiktoken(config)?;
        let counter = TiktokenCounter::new()?;
        let text = "Retrieved passages are handed to the chat model as context for the question. ".repeat(40);

        let chunks = chunker.split_text(&text);
        assert!(chunks.len() > 1);
        for chunk in chunks {
            assert!(counter.count(&chunk) <= config.max_tokens);
        }
        Ok(())
    }
}
