//! Prompt templates and slot rendering.
//!
//! Templates mark slots with `{name}`. [`render`] substitutes every slot in a
//! single pass, so braces inside transcript text are never re-interpreted.
//! Budgets measure a template's overhead by rendering it with its content
//! slot empty (see the `*_skeleton` helpers).

/// Emitted by the model for an outline point the context does not cover.
pub const NO_INFORMATION_MARKER: &str =
    "(No detailed information about this point was found in the provided context.)";

/// Stands in for the context slot when no context is available.
pub const NO_CONTEXT_PLACEHOLDER: &str = "(No additional context is available for this section.)";

/// Outline for one chunk of a longer transcript. Numbering is local to the chunk.
pub const PARTIAL_OUTLINE_TEMPLATE: &str = "\
You are an expert at structuring academic material. Below is one part \
(part {chunk_number} of {total_chunks}) of a lecture transcript.

Write a hierarchical outline of the main topics and subtopics covered in \
THIS PART ONLY. Use decimal numbering (1., 1.1., 1.1.1.) and keep each entry \
to a short phrase. Do not add topics that are not in the text, do not write \
an introduction or conclusion, and output only the outline.

TRANSCRIPT PART:
{text}

OUTLINE:
";

/// Outline for a transcript that fits in a single prompt.
pub const FULL_OUTLINE_TEMPLATE: &str = "\
You are an expert at structuring academic material. Below is a complete \
lecture transcript.

Write a detailed hierarchical outline covering every main topic and subtopic \
in the order they appear. Use decimal numbering (1., 1.1., 1.1.1.) and keep \
each entry to a short phrase. Do not add topics that are not in the text and \
output only the outline.

TRANSCRIPT:
{text}

OUTLINE:
";

/// Merges partial outlines into one globally numbered outline.
pub const FUSION_TEMPLATE: &str = "\
You are an expert editor. The partial outlines below were produced from \
consecutive parts of the same lecture, in order. Parts overlap slightly, so \
the same topic may appear at the end of one outline and the start of the next.

Merge them into ONE coherent master outline:
- remove duplicated topics and merge entries that cover the same subject;
- keep the order in which topics first appear;
- renumber everything globally with decimal numbering (1., 1.1., 1.1.1.);
- output only the master outline.

{partial_outlines}
MASTER OUTLINE:
";

/// Detailed notes for one top-level outline section.
pub const SECTION_NOTES_TEMPLATE: &str = "\
You are writing detailed study notes in Markdown. Develop every point of the \
outline section below using ONLY the information in the context.

Rules:
- start with a level-two header (##) holding the section title;
- use level-three headers (###) and bullet lists for the sub-points;
- explain concepts clearly and include definitions and examples from the context;
- if the context has nothing about a point, write exactly: \
\"(No detailed information about this point was found in the provided context.)\"

OUTLINE SECTION TO DEVELOP:
{section}

CONTEXT:
{context}

NOTES:
";

/// Whole-document notes for a large-context model.
pub const DOCUMENT_NOTES_TEMPLATE: &str = "\
You are writing a complete study guide in Markdown for a lecture. Follow the \
FULL OUTLINE below point by point, using the transcript and the reference \
context as your only sources.

Rules:
- one level-two header (##) per top-level outline entry, in outline order;
- level-three headers (###) and bullet lists for sub-points;
- if the sources have nothing about a point, write exactly: \
\"(No detailed information about this point was found in the provided context.)\"

FULL OUTLINE:
{outline}

REFERENCE CONTEXT:
{context}

TRANSCRIPT:
{transcript}

STUDY GUIDE:
";

/// Substitute `{name}` slots in a single pass. Unknown slots are left as-is.
pub fn render(template: &str, slots: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some((before, after_brace)) = rest.split_once('{') {
        out.push_str(before);
        let value = after_brace.split_once('}').and_then(|(name, tail)| {
            slots
                .iter()
                .find(|(slot, _)| *slot == name)
                .map(|(_, value)| (*value, tail))
        });
        match value {
            Some((value, tail)) => {
                out.push_str(value);
                rest = tail;
            }
            None => {
                out.push('{');
                rest = after_brace;
            }
        }
    }
    out.push_str(rest);
    out
}

pub fn partial_outline(text: &str, chunk_number: usize, total_chunks: usize) -> String {
    render(
        PARTIAL_OUTLINE_TEMPLATE,
        &[
            ("chunk_number", &chunk_number.to_string()),
            ("total_chunks", &total_chunks.to_string()),
            ("text", text),
        ],
    )
}

/// Partial-outline prompt with empty content. Chunk numbers are rendered
/// three digits wide so the measurement does not undercount.
pub fn partial_outline_skeleton() -> String {
    partial_outline("", 999, 999)
}

pub fn full_outline(text: &str) -> String {
    render(FULL_OUTLINE_TEMPLATE, &[("text", text)])
}

pub fn full_outline_skeleton() -> String {
    full_outline("")
}

/// Separator line introducing the `number`-th (1-based) partial outline.
pub fn partial_outline_header(number: usize) -> String {
    format!("--- PARTIAL OUTLINE {number} ---")
}

/// Join partial outlines with numbered separators, in order.
pub fn join_partial_outlines(partials: &[String]) -> String {
    partials
        .iter()
        .enumerate()
        .map(|(i, outline)| format!("{}\n{}\n\n", partial_outline_header(i + 1), outline))
        .collect()
}

pub fn fusion(joined_partials: &str) -> String {
    render(FUSION_TEMPLATE, &[("partial_outlines", joined_partials)])
}

pub fn section_notes(section: &str, context: Option<&str>) -> String {
    let context = match context {
        Some(c) if !c.trim().is_empty() => c,
        _ => NO_CONTEXT_PLACEHOLDER,
    };
    render(
        SECTION_NOTES_TEMPLATE,
        &[("section", section), ("context", context)],
    )
}

/// Section-notes prompt with empty section and context slots.
pub fn section_notes_skeleton() -> String {
    render(SECTION_NOTES_TEMPLATE, &[("section", ""), ("context", "")])
}

pub fn document_notes(outline: &str, transcript: &str, context: Option<&str>) -> String {
    let context = match context {
        Some(c) if !c.trim().is_empty() => c,
        _ => NO_CONTEXT_PLACEHOLDER,
    };
    render(
        DOCUMENT_NOTES_TEMPLATE,
        &[
            ("outline", outline),
            ("context", context),
            ("transcript", transcript),
        ],
    )
}
