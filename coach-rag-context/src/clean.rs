//! Page text cleanup applied before windowing.
//!
//! Cleaning happens in three passes:
//!
//! 1. Running headers and footers are dropped line by line. A line goes if it
//!    matches one of the fixed pagination/boilerplate patterns or a
//!    caller-supplied pattern. Edge lines also go when they are a chapter
//!    heading or a short line that recurs across many pages.
//! 2. Words hyphenated across a line break are rejoined.
//! 3. Non-breaking spaces become spaces and all whitespace runs collapse.

use crate::heading::chapter_heading;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

/// Line patterns that are never body text.
pub const DEFAULT_HEADER_PATTERNS: &[&str] = &[
    r"(?i)^p\s*\d+$",                    // P 10, P10
    r"^\d{1,4}$",                        // bare page number
    r"(?i)^page\s+\d+(\s+of\s+\d+)?$",   // Page 3, Page 3 of 9
    r"(?i)^(table\s+of\s+)?contents\b",  // Contents
    r"(?i)^(about\s+the\s+)?authors\s*$", // Authors
];

/// How many lines at the top and bottom of a page count as edge lines.
const EDGE_LINES: usize = 3;
/// Longest line (in words) considered a running header candidate.
const MAX_RUNNING_LINE_WORDS: usize = 12;
/// Fewest pages a line must recur on before it counts as running.
pub const DEFAULT_MIN_RUNNING_PAGES: usize = 3;

static HYPHEN_BREAK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\p{L})-[ \t]*\r?\n[ \t]*(\p{Ll})").expect("hyphen pattern is valid")
});

static DIGITS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+").expect("digit pattern is valid"));

/// Key used to compare possibly-running lines across pages.
fn running_key(line: &str) -> String {
    let lowered = DIGITS.replace_all(&line.to_lowercase(), "").into_owned();
    lowered.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn edge_lines(page: &str) -> impl Iterator<Item = &str> {
    let lines: Vec<&str> = page
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    let n = lines.len();
    lines
        .into_iter()
        .enumerate()
        .filter(move |(i, _)| *i < EDGE_LINES || *i + EDGE_LINES >= n)
        .map(|(_, l)| l)
}

/// Removes running headers, footers and pagination from page text.
#[derive(Debug, Clone)]
pub struct HeaderFilter {
    patterns: Vec<Regex>,
    min_running_pages: usize,
}

impl HeaderFilter {
    /// Filter with [`DEFAULT_HEADER_PATTERNS`] plus `extra` patterns.
    pub fn new(extra: &[String]) -> Result<Self, regex::Error> {
        let patterns = DEFAULT_HEADER_PATTERNS
            .iter()
            .copied()
            .chain(extra.iter().map(String::as_str))
            .map(Regex::new)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            patterns,
            min_running_pages: DEFAULT_MIN_RUNNING_PAGES,
        })
    }

    /// Minimum number of pages a line must recur on to count as running.
    pub fn with_min_running_pages(self, min_running_pages: usize) -> Self {
        Self {
            min_running_pages: min_running_pages.max(2),
            ..self
        }
    }

    /// Find edge lines that repeat across pages.
    ///
    /// A line qualifies when its digit-free form shows up among the edge lines
    /// of at least `min_running_pages` pages and of at least half of the
    /// non-empty pages.
    pub fn detect_running_lines<'a, I>(&self, pages: I) -> HashSet<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut counts: HashMap<String, usize> = HashMap::new();
        let mut non_empty = 0usize;

        for page in pages {
            if page.trim().is_empty() {
                continue;
            }
            non_empty += 1;
            let keys: HashSet<String> = edge_lines(page)
                .filter(|l| l.split_whitespace().count() <= MAX_RUNNING_LINE_WORDS)
                .map(running_key)
                .filter(|k| !k.is_empty())
                .collect();
            for key in keys {
                *counts.entry(key).or_default() += 1;
            }
        }

        let threshold = self.min_running_pages.max(non_empty.div_ceil(2));
        counts
            .into_iter()
            .filter(|(_, count)| *count >= threshold)
            .map(|(key, _)| key)
            .collect()
    }


    /// Drop header/footer lines from one page, keeping line structure.
    pub fn strip(&self, page: &str, running: &HashSet<String>) -> String {
        let lines: Vec<&str> = page
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect();
        let n = lines.len();

        lines
            .into_iter()
            .enumerate()
            .filter(|(i, line)| {
                if self.patterns.iter().any(|p| p.is_match(line)) {
                    return false;
                }
                let at_edge = *i < EDGE_LINES || *i + EDGE_LINES >= n;
                !(at_edge
                    && (chapter_heading(line).is_some()
                        || running.contains(&running_key(line))))
            })
            .map(|(_, line)| line)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Rejoin words split by a hyphen at a line break (`perio-\ndization`).
pub fn join_hyphenated(text: &str) -> String {
    HYPHEN_BREAK.replace_all(text, "$1$2").into_owned()
}

/// Replace NBSP with a space and collapse every whitespace run.
pub fn normalize_whitespace(text: &str) -> String {
    text.replace('\u{a0}', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
