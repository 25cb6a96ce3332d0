//! Splitting a transcript into overlapping, token-bounded chunks.
//!
//! The text is converted once into a unit sequence (model tokens when a
//! tokenizer is available, whitespace-delimited words otherwise) and cut
//! into windows of at most `max` units. Consecutive windows share `overlap`
//! units so a topic straddling a boundary is seen whole by at least one
//! chunk. The cursor always advances by at least one unit, so splitting
//! terminates for any input.

use tracing::{debug, warn};

use crate::budget;
use crate::error::{LlmError, PipelineError, PipelineResult};
use crate::llm::{TokenCounter, TokenId, Tokenizer};

/// One window of the transcript.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// 0-based position in the chunk list.
    pub index: usize,
    /// Number of chunks the transcript was split into.
    pub total: usize,
    /// Unit range `[start, end)` in the source sequence (tokens, or words in
    /// word mode).
    pub start: usize,
    pub end: usize,
    /// Units shared with the previous chunk.
    pub overlap_with_previous: usize,
    pub text: String,
}

impl Chunk {
    /// 1-based chunk number, as shown to the model and in logs.
    pub fn number(&self) -> usize {
        self.index + 1
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Clamp `overlap` so every window makes progress.
pub fn effective_overlap(max_units: usize, overlap: usize) -> usize {
    if max_units == 0 || overlap < max_units {
        return overlap;
    }
    let clamped = max_units - 1;
    warn!("Overlap of {overlap} units does not fit a {max_units}-unit window, clamping to {clamped}");
    clamped
}

/// Window ranges over a sequence of `total_units` units.
///
/// Windows start at 0 and each subsequent one starts
/// `max(1, max_units - overlap)` units later. Stops once a window reaches
/// the end of the sequence. Returns nothing for an empty sequence or a
/// zero-unit window.
pub fn plan_windows(total_units: usize, max_units: usize, overlap: usize) -> Vec<(usize, usize)> {
    if total_units == 0 || max_units == 0 {
        return Vec::new();
    }
    let stride = max_units.saturating_sub(overlap).max(1);
    let mut windows = Vec::with_capacity(total_units.div_ceil(stride));
    let mut cursor = 0;
    while cursor < total_units {
        let end = (cursor + max_units).min(total_units);
        windows.push((cursor, end));
        if end == total_units {
            break;
        }
        cursor += stride;
    }
    windows
}

// ── Unit sequences ─────────────────────────────────────────────────

/// Text as a sequence of countable units, decodable by range.
pub enum UnitSequence<'a> {
    Tokens {
        ids: Vec<TokenId>,
        tokenizer: &'a dyn Tokenizer,
    },
    Words {
        words: Vec<&'a str>,
        words_per_token: f64,
    },
}

impl<'a> UnitSequence<'a> {
    /// Tokenize with the counter's tokenizer, or split on whitespace.
    pub async fn from_text(text: &'a str, counter: &TokenCounter<'a>) -> Result<Self, LlmError> {
        Ok(match counter {
            TokenCounter::Exact(tokenizer) => UnitSequence::Tokens {
                ids: tokenizer.tokenize(text).await?,
                tokenizer: *tokenizer,
            },
            TokenCounter::Approximate { words_per_token } => UnitSequence::Words {
                words: text.split_whitespace().collect(),
                words_per_token: *words_per_token,
            },
        })
    }

    pub fn len(&self) -> usize {
        match self {
            UnitSequence::Tokens { ids, .. } => ids.len(),
            UnitSequence::Words { words, .. } => words.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// How many units correspond to `tokens` tokens.
    pub fn units_for_tokens(&self, tokens: usize) -> usize {
        match self {
            UnitSequence::Tokens { .. } => tokens,
            UnitSequence::Words {
                words_per_token, ..
            } => budget::words_for_tokens(tokens, *words_per_token),
        }
    }

    /// Text of units `[start, end)`.
    pub async fn decode(&self, start: usize, end: usize) -> Result<String, LlmError> {
        match self {
            UnitSequence::Tokens { ids, tokenizer } => {
                let end = end.min(ids.len());
                let start = start.min(end);
                tokenizer.detokenize(&ids[start..end]).await
            }
            UnitSequence::Words { words, .. } => {
                let end = end.min(words.len());
                let start = start.min(end);
                Ok(words[start..end].join(" "))
            }
        }
    }
}

/// Split `text` into chunks of at most `max_content_tokens` tokens.
pub async fn split(
    text: &str,
    max_content_tokens: usize,
    overlap_tokens: usize,
    counter: &TokenCounter<'_>,
) -> PipelineResult<Vec<Chunk>> {
    if max_content_tokens == 0 {
        return Err(PipelineError::InvalidConfig(
            "chunk size must be at least one token".into(),
        ));
    }
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }

    let units = UnitSequence::from_text(text, counter).await?;
    let max_units = units.units_for_tokens(max_content_tokens).max(1);
    let overlap = effective_overlap(max_units, units.units_for_tokens(overlap_tokens));
    let windows = plan_windows(units.len(), max_units, overlap);
    debug!(
        "Splitting {} units into {} window(s) of <= {max_units} (overlap {overlap})",
        units.len(),
        windows.len()
    );

    let mut kept: Vec<(usize, usize, String)> = Vec::with_capacity(windows.len());
    for (start, end) in windows {
        let decoded = units.decode(start, end).await?;
        if decoded.trim().is_empty() {
            debug!("Skipping whitespace-only window [{start}, {end})");
            continue;
        }
        kept.push((start, end, decoded));
    }

    let total = kept.len();
    let mut chunks = Vec::with_capacity(total);
    let mut previous_end: usize = 0;
    for (index, (start, end, text)) in kept.into_iter().enumerate() {
        let overlap_with_previous = if index == 0 {
            0
        } else {
            previous_end.saturating_sub(start)
        };
        previous_end = end;
        chunks.push(Chunk {
            index,
            total,
            start,
            end,
            overlap_with_previous,
            text,
        });
    }
    Ok(chunks)
}

/// Split on exact token boundaries.
pub async fn split_tokens(
    text: &str,
    max_content_tokens: usize,
    overlap_tokens: usize,
    tokenizer: &dyn Tokenizer,
) -> PipelineResult<Vec<Chunk>> {
    split(
        text,
        max_content_tokens,
        overlap_tokens,
        &TokenCounter::Exact(tokenizer),
    )
    .await
}

/// Split on whitespace-delimited words, sizing windows through the word
/// heuristic. Used only when no tokenizer is available; chunks may exceed
/// the token bound when the text tokenizes more densely than the ratio.
pub async fn split_words(
    text: &str,
    max_content_tokens: usize,
    overlap_tokens: usize,
    words_per_token: f64,
) -> PipelineResult<Vec<Chunk>> {
    split(
        text,
        max_content_tokens,
        overlap_tokens,
        &TokenCounter::Approximate { words_per_token },
    )
    .await
}
