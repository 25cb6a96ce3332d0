//! Splitting the master outline into top-level sections.
//!
//! A section starts at every line that begins with a top-level number
//! (`^\d+\.\s`); sub-items such as `1.1.` stay with their parent. Each
//! section is elaborated into notes independently.

use std::sync::LazyLock;

use regex::Regex;

static TOP_LEVEL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\d+\.\s").expect("section boundary regex"));

/// One top-level outline section with its sub-items.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutlineSection {
    /// 1-based position in the outline.
    pub ordinal: usize,
    pub text: String,
}

impl OutlineSection {
    /// The section's first line.
    pub fn title(&self) -> &str {
        self.text.lines().next().unwrap_or("").trim()
    }
}

/// Split an outline before each top-level numbered line.
///
/// Fragments are trimmed and blank ones discarded. An outline without any
/// top-level boundary comes back as a single section; a blank outline as
/// none. Joining the sections' text with `"\n"` reproduces the trimmed
/// outline up to whitespace at the boundaries.
pub fn split_sections(outline: &str) -> Vec<OutlineSection> {
    let trimmed = outline.trim();
    let boundaries: Vec<usize> = TOP_LEVEL_RE
        .find_iter(trimmed)
        .map(|m| m.start())
        .filter(|&start| start > 0)
        .collect();

    // Peel fragments off the end so every split point stays valid.
    let mut fragments = Vec::with_capacity(boundaries.len() + 1);
    let mut rest = trimmed;
    for &start in boundaries.iter().rev() {
        let (head, tail) = rest.split_at(start);
        fragments.push(tail);
        rest = head;
    }
    fragments.push(rest);
    fragments.reverse();

    let mut sections = Vec::with_capacity(fragments.len());
    for fragment in fragments {
        let fragment = fragment.trim();
        if fragment.is_empty() {
            continue;
        }
        sections.push(OutlineSection {
            ordinal: sections.len() + 1,
            text: fragment.to_string(),
        });
    }
    sections
}
