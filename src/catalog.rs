//! Markdown link index of strategy write-ups.
//!
//! The index is a bulleted list of `[title](url)` entries. HTML comments act
//! as placeholders for entries not published yet; links inside them are
//! collected separately and never count as entries.

use std::collections::HashSet;
use std::ops::Range;
use std::path::Path;

use pulldown_cmark::{Event, Parser, Tag};
use serde::Serialize;
use url::Url;

use crate::backtest::strategy::StrategyConfig;
use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CatalogEntry {
    pub title: String,
    pub url: String,
    /// 1-based source line of the link
    pub line: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Catalog {
    pub entries: Vec<CatalogEntry>,
    /// Links found inside HTML comments
    pub inactive_links: Vec<CatalogEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "issue", rename_all = "camelCase")]
pub enum CatalogIssue {
    EmptyTitle { line: usize, url: String },
    InvalidUrl { line: usize, url: String, reason: String },
    CommentedLink { line: usize, url: String },
    MissingFromRoot { title: String, url: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsistencyReport {
    /// Nested entries also present in the root
    pub shared: Vec<CatalogEntry>,
    pub only_in_root: Vec<CatalogEntry>,
    pub missing_from_root: Vec<CatalogEntry>,
}

impl ConsistencyReport {
    /// Every nested entry appears in the root; extra root entries are allowed
    pub fn is_consistent(&self) -> bool {
        self.missing_from_root.is_empty()
    }

    pub fn issues(&self) -> Vec<CatalogIssue> {
        self.missing_from_root
            .iter()
            .map(|e| CatalogIssue::MissingFromRoot { title: e.title.clone(), url: e.url.clone() })
            .collect()
    }
}

// ============================================================================
// Parsing
// ============================================================================

impl Catalog {
    pub fn from_file(path: &Path) -> Result<Catalog> {
        let markdown = std::fs::read_to_string(path)?;
        Ok(parse_catalog(&markdown))
    }
}

pub fn parse_catalog(markdown: &str) -> Catalog {
    let mut entries = Vec::new();
    let mut html_ranges: Vec<Range<usize>> = Vec::new();
    let mut item_depth = 0usize;
    let mut open_link: Option<(String, usize, String)> = None;

    for (event, range) in Parser::new(markdown).into_offset_iter() {
        match event {
            Event::Start(Tag::Item) => item_depth += 1,
            Event::End(Tag::Item) => item_depth = item_depth.saturating_sub(1),
            Event::Start(Tag::Link(_, dest, _)) if item_depth > 0 => {
                open_link = Some((dest.to_string(), range.start, String::new()));
            }
            Event::End(Tag::Link(..)) => {
                if let Some((url, offset, title)) = open_link.take() {
                    entries.push(CatalogEntry {
                        title: title.trim().to_string(),
                        url,
                        line: line_of(markdown, offset),
                    });
                }
            }
            Event::Text(text) | Event::Code(text) => {
                if let Some((_, _, title)) = open_link.as_mut() {
                    title.push_str(&text);
                }
            }
            Event::SoftBreak | Event::HardBreak => {
                if let Some((_, _, title)) = open_link.as_mut() {
                    title.push(' ');
                }
            }
            Event::Html(_) => match html_ranges.last_mut() {
                Some(last) if range.start <= last.end => last.end = last.end.max(range.end),
                _ => html_ranges.push(range),
            },
            _ => {}
        }
    }

    let mut inactive_links = Vec::new();
    for range in html_ranges {
        for comment in comment_bodies(&markdown[range.clone()]) {
            let base = range.start + comment.start;
            for (title, url, offset) in links_in(&markdown[base..range.start + comment.end]) {
                inactive_links.push(CatalogEntry { title, url, line: line_of(markdown, base + offset) });
            }
        }
    }

    Catalog { entries, inactive_links }
}

fn line_of(text: &str, offset: usize) -> usize {
    text[..offset.min(text.len())].matches('\n').count() + 1
}

/// Byte ranges of `<!-- ... -->` bodies; an unterminated comment runs to the end
fn comment_bodies(html: &str) -> Vec<Range<usize>> {
    let mut bodies = Vec::new();
    let mut cursor = 0;
    while let Some(open) = html[cursor..].find("<!--") {
        let start = cursor + open + 4;
        let end = html[start..].find("-->").map_or(html.len(), |close| start + close);
        bodies.push(start..end);
        cursor = (end + 3).min(html.len());
    }
    bodies
}

/// Every markdown link in `text`, with its byte offset
fn links_in(text: &str) -> Vec<(String, String, usize)> {
    let mut links = Vec::new();
    let mut open: Option<(String, usize, String)> = None;
    for (event, range) in Parser::new(text).into_offset_iter() {
        match event {
            Event::Start(Tag::Link(_, dest, _)) => open = Some((dest.to_string(), range.start, String::new())),
            Event::Text(t) | Event::Code(t) => {
                if let Some((_, _, title)) = open.as_mut() {
                    title.push_str(&t);
                }
            }
            Event::End(Tag::Link(..)) => {
                if let Some((url, offset, title)) = open.take() {
                    links.push((title.trim().to_string(), url, offset));
                }
            }
            _ => {}
        }
    }
    links
}

// ============================================================================
// Checks
// ============================================================================

/// Parse `url`, requiring http(s) and a host
pub fn check_url(url: &str) -> std::result::Result<Url, String> {
    let parsed = Url::parse(url).map_err(|e| e.to_string())?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(format!("unsupported scheme '{}'", parsed.scheme()));
    }
    match parsed.host_str() {
        Some(host) if !host.is_empty() => Ok(parsed),
        _ => Err("missing host".to_string()),
    }
}

/// Entries must have a title and a well-formed URL; comments must hold no links.
pub fn validate(catalog: &Catalog) -> Vec<CatalogIssue> {
    let mut issues = Vec::new();
    for entry in &catalog.entries {
        if entry.title.is_empty() {
            issues.push(CatalogIssue::EmptyTitle { line: entry.line, url: entry.url.clone() });
        }
        if let Err(reason) = check_url(&entry.url) {
            issues.push(CatalogIssue::InvalidUrl { line: entry.line, url: entry.url.clone(), reason });
        }
    }
    for link in &catalog.inactive_links {
        issues.push(CatalogIssue::CommentedLink { line: link.line, url: link.url.clone() });
    }
    issues
}

fn url_key(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

fn title_key(title: &str) -> String {
    title.trim().to_lowercase()
}

fn dedup(entries: &[CatalogEntry]) -> Vec<&CatalogEntry> {
    let mut seen = HashSet::new();
    entries.iter().filter(|e| seen.insert(url_key(&e.url))).collect()
}

/// Match nested entries against the root by URL, falling back to a
/// case-insensitive title.
pub fn compare(root: &Catalog, nested: &Catalog) -> ConsistencyReport {
    let root_entries = dedup(&root.entries);
    let nested_entries = dedup(&nested.entries);
    let matches = |a: &CatalogEntry, b: &CatalogEntry| {
        url_key(&a.url) == url_key(&b.url) || (!a.title.is_empty() && title_key(&a.title) == title_key(&b.title))
    };

    let mut report = ConsistencyReport::default();
    for entry in &nested_entries {
        if root_entries.iter().any(|r| matches(r, entry)) {
            report.shared.push((*entry).clone());
        } else {
            report.missing_from_root.push((*entry).clone());
        }
    }
    report.only_in_root = root_entries
        .into_iter()
        .filter(|r| !nested_entries.iter().any(|n| matches(r, n)))
        .cloned()
        .collect();
    report
}

/// Strategy implementing the technique an article title describes
pub fn strategy_for_title(title: &str) -> Option<StrategyConfig> {
    let t = title.to_lowercase();
    let name = if t.contains("volume spread") || t.contains("vsa") {
        "vsa"
    } else if t.contains("polynomial") {
        "polynomial_channel"
    } else if t.contains("kalman") {
        "kalman"
    } else if t.contains("vwap") {
        "vwap_breakout"
    } else if t.contains("butterworth") {
        "butterworth"
    } else if t.contains("ornstein") || t.contains("mean reversion") {
        "ou_reversion"
    } else if t.contains("jump") || t.contains("trend-volatility") || t.contains("trend volatility") {
        "jump_diffusion"
    } else {
        return None;
    };
    StrategyConfig::from_name(name).ok()
}
