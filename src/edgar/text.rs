//! Filing document processing: HTML to markdown-flavored text, then
//! fixed-budget chunks addressed by cursor.

use lazy_static::lazy_static;
use regex::Regex;
use scraper::{ElementRef, Html};

lazy_static! {
    static ref SPACES: Regex = Regex::new(r"[ \t\x{a0}]+").expect("invalid regex pattern");
    static ref LINE_EDGES: Regex = Regex::new(r" ?\n ?").expect("invalid regex pattern");
    static ref EXCESS_NEWLINES: Regex = Regex::new(r"\n{3,}").expect("invalid regex pattern");
}

/// Tags whose content never renders.
const SKIPPED_TAGS: [&str; 4] = ["script", "style", "head", "title"];

/// Convert a filing document to markdown-flavored plain text.
///
/// Headings become `#` lines, list items become `-` lines, and table rows
/// join their cells with ` | `. Everything else flows as paragraphs. SEC
/// filings wrap most content in nested tables, so block tags inside a table
/// cell degrade to spaces to keep each row on one line.
pub fn html_to_text(raw: &[u8]) -> String {
    let body = String::from_utf8_lossy(raw);
    let document = Html::parse_document(&body);
    let mut out = String::new();
    walk(document.root_element(), &mut out, false);
    normalize(&out)
}

fn walk(element: ElementRef, out: &mut String, in_cell: bool) {
    let tag = element.value().name();
    if SKIPPED_TAGS.contains(&tag) {
        return;
    }

    match tag {
        "h1" | "h2" | "h3" | "h4" | "h5" | "h6" if !in_cell => {
            ensure_blank_line(out);
            out.push_str(&"#".repeat(heading_level(tag)));
            out.push(' ');
        }
        "li" if !in_cell => {
            ensure_line_break(out);
            out.push_str("- ");
        }
        "tr" => ensure_line_break(out),
        "td" | "th" => {
            if !out.is_empty() && !out.ends_with('\n') {
                out.push_str(" | ");
            }
        }
        "br" => {
            if in_cell {
                push_soft_space(out);
            } else {
                out.push('\n');
            }
        }
        "p" | "div" | "table" | "ul" | "ol" | "section" | "article" | "header" | "footer"
        | "blockquote" | "pre" => {
            if in_cell {
                push_soft_space(out);
            } else {
                ensure_line_break(out);
            }
        }
        _ => {}
    }

    let child_in_cell = in_cell || matches!(tag, "td" | "th");
    for child in element.children() {
        if let Some(child_element) = ElementRef::wrap(child) {
            walk(child_element, out, child_in_cell);
        } else if let Some(text) = child.value().as_text() {
            if text.trim().is_empty() {
                push_soft_space(out);
            } else {
                out.push_str(text);
            }
        }
    }

    match tag {
        "h1" | "h2" | "h3" | "h4" | "h5" | "h6" | "p" | "li" | "tr" | "table" | "ul" | "ol"
        | "div" | "blockquote" | "pre" => {
            if in_cell {
                push_soft_space(out);
            } else {
                ensure_line_break(out);
            }
        }
        _ => {}
    }
}

fn heading_level(tag: &str) -> usize {
    tag.as_bytes()
        .get(1)
        .map(|b| (b - b'0') as usize)
        .unwrap_or(1)
        .clamp(1, 6)
}

fn ensure_line_break(out: &mut String) {
    if !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
}

fn ensure_blank_line(out: &mut String) {
    ensure_line_break(out);
    if !out.is_empty() && !out.ends_with("\n\n") {
        out.push('\n');
    }
}

fn push_soft_space(out: &mut String) {
    if !out.is_empty() && !out.ends_with(' ') && !out.ends_with('\n') {
        out.push(' ');
    }
}

/// Collapse whitespace runs, trim line edges, and squeeze blank-line runs
/// down to a single blank line.
fn normalize(text: &str) -> String {
    let collapsed = SPACES.replace_all(text, " ");
    let trimmed = LINE_EDGES.replace_all(&collapsed, "\n");
    let squeezed = EXCESS_NEWLINES.replace_all(&trimmed, "\n\n");
    squeezed.trim().to_string()
}

/// Split text into chunks of at most `budget` bytes, breaking on line
/// boundaries. A markdown heading starts a fresh chunk once the current one
/// is at least half full, so sections tend to open chunks. Lines longer
/// than the budget are hard-split. Always returns at least one chunk.
pub fn chunk_text(text: &str, budget: usize) -> Vec<String> {
    let budget = budget.max(1);
    let mut chunks: Vec<String> = vec![];
    let mut current = String::new();

    for line in text.lines() {
        if line.len() > budget {
            if !current.is_empty() {
                chunks.push(current.trim_end().to_string());
                current = String::new();
            }
            let mut rest = line;
            while rest.len() > budget {
                let split = split_point(rest, budget);
                chunks.push(rest[..split].to_string());
                rest = &rest[split..];
            }
            if !rest.is_empty() {
                current.push_str(rest);
                current.push('\n');
            }
            continue;
        }

        let would_overflow = current.len() + line.len() + 1 > budget;
        let heading_break = line.starts_with('#') && current.len() * 2 >= budget;
        if !current.is_empty() && (would_overflow || heading_break) {
            chunks.push(current.trim_end().to_string());
            current = String::new();
        }
        current.push_str(line);
        current.push('\n');
    }

    if !current.trim().is_empty() || chunks.is_empty() {
        chunks.push(current.trim_end().to_string());
    }
    chunks
}

/// Largest char boundary at or below `index`, bumped forward past the first
/// char when a multi-byte char straddles the start.
fn split_point(s: &str, index: usize) -> usize {
    let mut split = index.min(s.len());
    while split > 0 && !s.is_char_boundary(split) {
        split -= 1;
    }
    if split == 0 {
        split = s
            .char_indices()
            .nth(1)
            .map(|(i, _)| i)
            .unwrap_or(s.len());
    }
    split
}
