//! Chapter and section detection.
//!
//! Book text extracted from PDFs is messy: headings are often letter-spaced
//! (`C H A P T E R  5`), numbered with roman numerals or spelled-out words, and
//! repeated as running headers. [`PatternHeadingExtractor`] tolerates all of
//! these and only ever reports a label it could actually parse.
//!
//! ```
//! use coach_rag_context::heading::{HeadingExtractor, PatternHeadingExtractor};
//!
//! let extractor = PatternHeadingExtractor::new();
//! let found = extractor.extract("C H A P T E R  T H R E E\nVolume landmarks\n");
//! assert_eq!(found.chapter.as_deref(), Some("3"));
//! ```

use regex::Regex;
use std::sync::LazyLock;

/// Headings found on a single page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageHeadings {
    pub chapter: Option<String>,
    pub section: Option<String>,
}

/// Strategy for pulling chapter/section labels out of raw page text.
pub trait HeadingExtractor: Send + Sync {
    fn extract(&self, page_text: &str) -> PageHeadings;
}

/// Regex source matching `word` with optional blanks between its letters.
pub(crate) fn letter_spaced(word: &str) -> String {
    word.chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| regex::escape(&c.to_string()))
        .collect::<Vec<_>>()
        .join(r"[ \t]*")
}

/// `Chapter` or `CHAPTER` (optionally letter-spaced) opening a single line.
static CHAPTER_LINE: LazyLock<Regex> = LazyLock::new(|| {
    let pattern = format!(
        r"^[ \t]*(?:Chapter|{})[ \t]+(?:(?i:no)\.[ \t]*|(?i:no)[ \t]+)?(?P<rest>.*)$",
        letter_spaced("CHAPTER")
    );
    Regex::new(&pattern).expect("chapter pattern is valid")
});

static SECTION_LINE: LazyLock<Regex> = LazyLock::new(|| {
    let pattern = format!(
        r"(?im)^[ \t]*{}[ \t]+(?P<label>[^\n]+)$",
        letter_spaced("section")
    );
    Regex::new(&pattern).expect("section pattern is valid")
});

const NUMBER_WORDS: &[&str] = &[
    "one",
    "two",
    "three",
    "four",
    "five",
    "six",
    "seven",
    "eight",
    "nine",
    "ten",
    "eleven",
    "twelve",
    "thirteen",
    "fourteen",
    "fifteen",
    "sixteen",
    "seventeen",
    "eighteen",
    "nineteen",
    "twenty",
];

const MAX_ROMAN: u32 = 200;
const MAX_SECTION_LABEL_WORDS: usize = 8;
/// Longest line that can still be a chapter heading.
pub const MAX_CHAPTER_LINE_CHARS: usize = 80;
/// Most title words allowed after the chapter numeral.
const MAX_CHAPTER_TITLE_WORDS: usize = 8;

fn roman_value(c: char) -> Option<u32> {
    match c {
        'I' => Some(1),
        'V' => Some(5),
        'X' => Some(10),
        'L' => Some(50),
        'C' => Some(100),
        'D' => Some(500),
        'M' => Some(1000),
        _ => None,
    }
}

fn to_roman(mut n: u32) -> String {
    const TABLE: &[(u32, &str)] = &[
        (1000, "M"),
        (900, "CM"),
        (500, "D"),
        (400, "CD"),
        (100, "C"),
        (90, "XC"),
        (50, "L"),
        (40, "XL"),
        (10, "X"),
        (9, "IX"),
        (5, "V"),
        (4, "IV"),
        (1, "I"),
    ];
    let mut out = String::new();
    for &(value, symbol) in TABLE {
        while n >= value {
            out.push_str(symbol);
            n -= value;
        }
    }
    out
}

/// Parse a canonical roman numeral such as `XIV`.
pub fn parse_roman(token: &str) -> Option<u32> {
    let upper = token.to_ascii_uppercase();
    let values: Vec<u32> = upper.chars().map(roman_value).collect::<Option<_>>()?;
    if values.is_empty() {
        return None;
    }

    let mut total: i64 = 0;
    for (i, value) in values.iter().enumerate() {
        match values.get(i + 1) {
            Some(next) if next > value => total -= i64::from(*value),
            _ => total += i64::from(*value),
        }
    }
    let total = u32::try_from(total).ok()?;
    // Reject sequences like IIII or VX that merely sum to something
    (total > 0 && total <= MAX_ROMAN && to_roman(total) == upper).then_some(total)
}

fn parse_single(token: &str) -> Option<u32> {
    if token.chars().all(|c| c.is_ascii_digit()) {
        return token.parse::<u32>().ok().filter(|n| (1..1000).contains(n));
    }
    let lower = token.to_lowercase();
    if let Some(pos) = NUMBER_WORDS.iter().position(|w| *w == lower) {
        return Some(pos as u32 + 1);
    }
    parse_roman(token)
}

/// Parse the numeral at the start of a heading remainder.
///
/// Accepts digits, roman numerals and English number words up to twenty, also
/// when letter-spaced (`T H R E E`). Returns `None` rather than guessing.
pub fn parse_numeral(raw: &str) -> Option<u32> {
    numeral_prefix(&heading_words(raw)).map(|(n, _)| n)
}

fn heading_words(raw: &str) -> Vec<&str> {
    raw.split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()))
        .filter(|w| !w.is_empty())
        .collect()
}

/// The numeral opening `words` and how many words it spans.
fn numeral_prefix(words: &[&str]) -> Option<(u32, usize)> {
    let first = *words.first()?;

    let spaced = words.iter().take_while(|w| w.chars().count() == 1).count();
    if spaced > 1 {
        for len in (2..=spaced).rev() {
            if let Some(n) = parse_single(&words[..len].concat()) {
                return Some((n, len));
            }
        }
    }
    parse_single(first).map(|n| (n, 1))
}

/// Number of title words, counting a letter-spaced run as one word.
fn title_word_count(words: &[&str]) -> usize {
    words
        .iter()
        .enumerate()
        .filter(|(i, w)| {
            let single = w.chars().count() == 1;
            !(single && *i > 0 && words[i - 1].chars().count() == 1)
        })
        .count()
}

/// Chapter number of `line` when the whole line reads as a chapter heading.
///
/// The line has to open with `Chapter` or `CHAPTER` (letter spacing allowed)
/// followed by a numeral and at most a short title. A title starting with a
/// lowercase word is prose that wrapped onto a new line, not a heading.
pub fn chapter_heading(line: &str) -> Option<u32> {
    let line = line.trim();
    if line.chars().count() > MAX_CHAPTER_LINE_CHARS {
        return None;
    }
    let caps = CHAPTER_LINE.captures(line)?;
    let words = heading_words(caps.name("rest")?.as_str());
    let (number, used) = numeral_prefix(&words)?;

    let title = &words[used..];
    let lowercase_start = title
        .first()
        .is_some_and(|w| w.starts_with(char::is_lowercase));
    (!lowercase_start && title_word_count(title) <= MAX_CHAPTER_TITLE_WORDS).then_some(number)
}

/// Default heading extractor based on tolerant line patterns.
#[derive(Debug, Clone, Default)]
pub struct PatternHeadingExtractor {
    section_titles: Vec<(String, Regex)>,
}

impl PatternHeadingExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also recognise these standalone lines as section headings.
    ///
    /// Titles are matched case-insensitively and tolerate letter spacing.
    pub fn with_section_titles<I, S>(mut self, titles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for title in titles {
            let title = title.as_ref().trim();
            if title.is_empty() {
                continue;
            }
            let pattern = format!(r"(?im)^[ \t]*{}[ \t]*$", letter_spaced(title));
            // Escaped literal input always compiles
            if let Ok(re) = Regex::new(&pattern) {
                self.section_titles.push((title.to_string(), re));
            }
        }
        self
    }

    fn find_chapter(&self, text: &str) -> Option<String> {
        text.lines().find_map(chapter_heading).map(|n| n.to_string())
    }

    fn find_section(&self, text: &str) -> Option<String> {
        let generic = SECTION_LINE.captures_iter(text).find_map(|caps| {
            let label = caps.name("label")?;
            let words: Vec<&str> = label.as_str().split_whitespace().collect();
            if words.is_empty() || words.len() > MAX_SECTION_LABEL_WORDS {
                return None;
            }
            let start = caps.get(0).map_or(0, |m| m.start());
            Some((start, words.join(" ")))
        });

        let titled = self
            .section_titles
            .iter()
            .filter_map(|(title, re)| re.find(text).map(|m| (m.start(), title.clone())));

        generic
            .into_iter()
            .chain(titled)
            .min_by_key(|(start, _)| *start)
            .map(|(_, label)| label)
    }
}

impl HeadingExtractor for PatternHeadingExtractor {
    fn extract(&self, page_text: &str) -> PageHeadings {
        PageHeadings {
            chapter: self.find_chapter(page_text),
            section: self.find_section(page_text),
        }
    }
}
