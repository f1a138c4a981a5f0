//! Markdown parsing and rendering.
//!
//! Wraps pulldown-cmark with the extras the build pipeline needs from
//! a single pass over the event stream:
//!
//! - YAML front-matter extraction (fenced by `---`)
//! - heading IDs and the table of contents
//! - plain-text extraction for the search index
//! - fenced diagram blocks (`d2`, `mermaid`, `dot`) lifted out of the
//!   HTML and replaced with placeholders for server-side rendering

use crate::{
    cache::TocEntry,
    hash::{self, Frontmatter},
};
use anyhow::{Context, Result, anyhow};
use chrono::NaiveDate;
use pulldown_cmark::{
    CodeBlockKind, Event, HeadingLevel, Options, Parser, Tag, TagEnd, html,
};
use rustc_hash::FxHashMap;
use serde_yaml::Value;
use std::path::Path;

/// Fenced code-block languages treated as diagram sources.
const DIAGRAM_LANGS: &[&str] = &["d2", "mermaid", "dot"];

/// A diagram source block lifted out of the document.
#[derive(Debug, Clone)]
pub struct DiagramBlock {
    pub kind: String,
    /// Verbatim source, no trimming.
    pub source: String,
    pub hash: String,
}

/// Everything extracted from one Markdown source file.
#[derive(Debug, Default)]
pub struct ParsedDoc {
    pub frontmatter: Frontmatter,
    /// Rendered HTML body fragment with diagram placeholders.
    pub html: String,
    pub toc: Vec<TocEntry>,
    /// Plain text for search tokenization and snippets.
    pub plain_text: String,
    pub diagrams: Vec<DiagramBlock>,
}

/// Typed fields pulled out of the front-matter bag.
#[derive(Debug, Default, Clone)]
pub struct FrontmatterFields {
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
    pub date: Option<NaiveDate>,
    pub weight: i64,
    pub pinned: bool,
    pub draft: bool,
    pub template: String,
    pub image: Option<String>,
}

/// The placeholder a diagram block leaves in the rendered HTML until
/// SSR swaps in the SVG.
pub fn diagram_placeholder(hash: &str) -> String {
    format!("<!--kosh-diagram:{hash}-->")
}

/// Whether a source may contain math delimiters (`$` or `\(`).
pub fn has_math(source: &[u8]) -> bool {
    source.contains(&b'$') || source.windows(2).any(|w| w == b"\\(")
}

/// Parse just the front-matter block of a source file.
///
/// Used where the body rendering is not needed: cache-hit
/// revalidation and the watch-mode change classifier.
pub fn parse_frontmatter(source: &[u8]) -> Result<Frontmatter> {
    match hash::split_frontmatter(source).0 {
        Some(bytes) => {
            let text =
                std::str::from_utf8(bytes).map_err(|_| anyhow!("front-matter is not UTF-8"))?;
            serde_yaml::from_str::<Frontmatter>(text).context("unreadable front-matter")
        }
        None => Ok(Frontmatter::new()),
    }
}

/// Parse one Markdown file into HTML plus the extracted artifacts.
///
/// The path only contextualizes error messages; content is read by the
/// caller (exactly once per post).
pub fn parse(source: &[u8], path: &Path) -> Result<ParsedDoc> {
    let (_, body) = hash::split_frontmatter(source);

    let frontmatter = parse_frontmatter(source)
        .with_context(|| format!("in {}", path.display()))?;

    let body = std::str::from_utf8(body)
        .map_err(|_| anyhow!("body is not UTF-8: {}", path.display()))?;

    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_FOOTNOTES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_TASKLISTS);

    let mut doc = ParsedDoc {
        frontmatter,
        ..ParsedDoc::default()
    };

    let mut out_events: Vec<Event> = Vec::new();
    let mut slug_counts: FxHashMap<String, usize> = FxHashMap::default();

    // Heading events are buffered until the closing tag so the slug can
    // be derived from the collected text.
    struct HeadingCapture<'a> {
        level: HeadingLevel,
        id: Option<String>,
        events: Vec<Event<'a>>,
        text: String,
    }
    let mut heading: Option<HeadingCapture> = None;
    let mut diagram: Option<(String, String)> = None;

    for event in Parser::new_ext(body, options) {
        match event {
            Event::Start(Tag::CodeBlock(CodeBlockKind::Fenced(lang)))
                if diagram.is_none() && DIAGRAM_LANGS.contains(&lang.as_ref()) =>
            {
                diagram = Some((lang.to_string(), String::new()));
            }
            Event::Text(text) if diagram.is_some() => {
                if let Some((_, src)) = diagram.as_mut() {
                    src.push_str(&text);
                }
            }
            Event::End(TagEnd::CodeBlock) if diagram.is_some() => {
                if let Some((kind, source)) = diagram.take() {
                    let block_hash = hash::diagram_hash(&source);
                    out_events.push(Event::Html(diagram_placeholder(&block_hash).into()));
                    doc.diagrams.push(DiagramBlock {
                        kind,
                        source,
                        hash: block_hash,
                    });
                }
            }
            Event::Start(Tag::Heading {
                level,
                id,
                classes: _,
                attrs: _,
            }) => {
                heading = Some(HeadingCapture {
                    level,
                    id: id.map(|s| s.to_string()),
                    events: Vec::new(),
                    text: String::new(),
                });
            }
            Event::End(TagEnd::Heading(_)) => {
                if let Some(cap) = heading.take() {
                    let id = cap
                        .id
                        .unwrap_or_else(|| unique_slug(&cap.text, &mut slug_counts));
                    doc.toc.push(TocEntry {
                        id: id.clone(),
                        text: cap.text.trim().to_string(),
                        level: cap.level as u8,
                    });
                    out_events.push(Event::Start(Tag::Heading {
                        level: cap.level,
                        id: Some(id.into()),
                        classes: Vec::new(),
                        attrs: Vec::new(),
                    }));
                    out_events.extend(cap.events);
                    out_events.push(Event::End(TagEnd::Heading(cap.level)));
                    push_plain_break(&mut doc.plain_text);
                }
            }
            Event::Text(text) => {
                doc.plain_text.push_str(&text);
                match heading.as_mut() {
                    Some(cap) => {
                        cap.text.push_str(&text);
                        cap.events.push(Event::Text(text));
                    }
                    None => out_events.push(Event::Text(text)),
                }
            }
            Event::Code(code) => {
                doc.plain_text.push_str(&code);
                match heading.as_mut() {
                    Some(cap) => {
                        cap.text.push_str(&code);
                        cap.events.push(Event::Code(code));
                    }
                    None => out_events.push(Event::Code(code)),
                }
            }
            Event::SoftBreak | Event::HardBreak => {
                push_plain_break(&mut doc.plain_text);
                match heading.as_mut() {
                    Some(cap) => {
                        cap.text.push(' ');
                        cap.events.push(event);
                    }
                    None => out_events.push(event),
                }
            }
            Event::End(tag) => {
                if matches!(tag, TagEnd::Paragraph | TagEnd::Item | TagEnd::CodeBlock) {
                    push_plain_break(&mut doc.plain_text);
                }
                match heading.as_mut() {
                    Some(cap) => cap.events.push(Event::End(tag)),
                    None => out_events.push(Event::End(tag)),
                }
            }
            other => match heading.as_mut() {
                Some(cap) => cap.events.push(other),
                None => out_events.push(other),
            },
        }
    }

    html::push_html(&mut doc.html, out_events.into_iter());
    let trimmed = doc.plain_text.trim_end().len();
    doc.plain_text.truncate(trimmed);
    Ok(doc)
}

/// Separate plain-text runs with a single space.
fn push_plain_break(plain: &mut String) {
    if !plain.is_empty() && !plain.ends_with(' ') {
        plain.push(' ');
    }
}

/// Slugify heading text, deduplicating repeats with `-N` suffixes.
fn unique_slug(text: &str, counts: &mut FxHashMap<String, usize>) -> String {
    let slug = slugify(text);
    let n = counts.entry(slug.clone()).or_insert(0);
    *n += 1;
    if *n == 1 { slug } else { format!("{slug}-{}", *n - 1) }
}

/// Lowercased, alphanumerics kept, everything else collapsed to `-`.
fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut pending_dash = false;
    for c in text.chars() {
        if c.is_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            for lower in c.to_lowercase() {
                slug.push(lower);
            }
        } else {
            pending_dash = true;
        }
    }
    if slug.is_empty() { "section".into() } else { slug }
}

// ============================================================================
// Front-matter field extraction
// ============================================================================

impl FrontmatterFields {
    /// Pull typed fields out of the front-matter bag. Missing or
    /// mistyped entries fall back to defaults; the bag itself stays
    /// opaque for templates.
    pub fn from_frontmatter(fm: &Frontmatter) -> Self {
        Self {
            title: get_string(fm, "title"),
            description: get_string(fm, "description"),
            tags: get_string_seq(fm, "tags"),
            date: NaiveDate::parse_from_str(&get_string(fm, "date"), "%Y-%m-%d").ok(),
            weight: get_i64(fm, "weight"),
            pinned: get_bool(fm, "pinned"),
            draft: get_bool(fm, "draft"),
            template: get_string(fm, "template"),
            image: match fm.get("image") {
                Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
                _ => None,
            },
        }
    }
}

fn get_string(fm: &Frontmatter, key: &str) -> String {
    match fm.get(key) {
        Some(Value::String(s)) => s.clone(),
        _ => String::new(),
    }
}

fn get_bool(fm: &Frontmatter, key: &str) -> bool {
    matches!(fm.get(key), Some(Value::Bool(true)))
}

fn get_i64(fm: &Frontmatter, key: &str) -> i64 {
    match fm.get(key) {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or(0),
        _ => 0,
    }
}

fn get_string_seq(fm: &Frontmatter, key: &str) -> Vec<String> {
    match fm.get(key) {
        Some(Value::Sequence(items)) => items
            .iter()
            .filter_map(|v| match v {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .collect(),
        Some(Value::String(s)) => vec![s.clone()],
        _ => Vec::new(),
    }
}
