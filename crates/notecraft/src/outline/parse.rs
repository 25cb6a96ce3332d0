//! Typed view of a numbered outline.
//!
//! Model output is free text. [`parse_outline`] recognises the decimal
//! numbering the prompts ask for (`1.`, `1.2.`, `1.2.3`) and yields items
//! with their level. Lines without a number are folded into the preceding
//! item. When the text does not look like an outline at all, the raw text is
//! kept as [`ParsedOutline::Unparsed`] rather than dropped.

use std::sync::LazyLock;

use regex::Regex;

static ITEM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:[-*]\s+)?(\d+(?:\.\d+)*)\.?\s+(\S.*)$").expect("outline item regex")
});

/// One numbered outline entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutlineItem {
    /// Depth: `1.` is level 1, `1.2.` is level 2.
    pub level: usize,
    /// Number components, e.g. `[1, 2]` for `1.2.`.
    pub number: Vec<u32>,
    pub text: String,
}

impl OutlineItem {
    /// The number in dotted form with a trailing dot (`1.2.`).
    pub fn label(&self) -> String {
        let parts: Vec<String> = self.number.iter().map(u32::to_string).collect();
        format!("{}.", parts.join("."))
    }
}

/// Result of parsing model output as an outline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedOutline {
    Parsed(Vec<OutlineItem>),
    /// Not recognisable as an outline; raw text preserved.
    Unparsed(String),
}

impl ParsedOutline {
    pub fn is_parsed(&self) -> bool {
        matches!(self, ParsedOutline::Parsed(_))
    }

    pub fn items(&self) -> &[OutlineItem] {
        match self {
            ParsedOutline::Parsed(items) => items,
            ParsedOutline::Unparsed(_) => &[],
        }
    }

    /// Top-level entries (level 1).
    pub fn top_level(&self) -> impl Iterator<Item = &OutlineItem> {
        self.items().iter().filter(|item| item.level == 1)
    }

    /// Deepest level present, 0 when unparsed.
    pub fn depth(&self) -> usize {
        self.items().iter().map(|i| i.level).max().unwrap_or(0)
    }
}

fn parse_item(line: &str) -> Option<OutlineItem> {
    let caps = ITEM_RE.captures(line)?;
    let number = caps[1]
        .split('.')
        .map(str::parse::<u32>)
        .collect::<Result<Vec<_>, _>>()
        .ok()?;
    Some(OutlineItem {
        level: number.len(),
        number,
        text: caps[2].trim().to_string(),
    })
}

/// Parse numbered outline text.
///
/// Unnumbered lines after an item are appended to that item's text. Any
/// non-blank text before the first item, or no items at all, yields
/// [`ParsedOutline::Unparsed`].
pub fn parse_outline(text: &str) -> ParsedOutline {
    let mut items: Vec<OutlineItem> = Vec::new();
    for line in text.lines() {
        if line.trim().is_empty() {
            continue;
        }
        if let Some(item) = parse_item(line) {
            items.push(item);
            continue;
        }
        match items.last_mut() {
            Some(last) => {
                last.text.push(' ');
                last.text.push_str(line.trim());
            }
            None => return ParsedOutline::Unparsed(text.to_string()),
        }
    }
    if items.is_empty() {
        ParsedOutline::Unparsed(text.to_string())
    } else {
        ParsedOutline::Parsed(items)
    }
}
