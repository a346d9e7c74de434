//! Research-query derivation: pick a short web search query from PDF text.
//!
//! Titles and opening lines carry most of a document's topic, so the query
//! is built from the first meaningful lines: words are normalised, stop
//! words and very short tokens dropped, duplicates removed, and the result
//! capped at `max_words`. A PDF with no usable text falls back to its file
//! name, which is still derived from the upload and never empty.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use std::path::Path;

static RE_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\p{L}\p{N}][\p{L}\p{N}'&.-]*").unwrap());

const STOP_WORDS: &[&str] = &[
    "a", "about", "after", "all", "also", "an", "and", "any", "are", "as", "at", "be", "been",
    "but", "by", "can", "could", "did", "do", "does", "for", "from", "had", "has", "have", "how",
    "if", "in", "into", "is", "it", "its", "may", "more", "most", "no", "not", "of", "on", "or",
    "other", "our", "page", "should", "so", "such", "than", "that", "the", "their", "them",
    "then", "there", "these", "they", "this", "those", "to", "was", "we", "were", "what", "when",
    "which", "who", "will", "with", "would", "you", "your",
];

/// Lines scanned from the top of the document.
const MAX_LINES_SCANNED: usize = 40;

/// Derive a search query from the extracted text, or from `filename` when
/// the text yields nothing.
pub fn derive_research_query(text: &str, max_words: usize, filename: &str) -> String {
    let from_text = keywords(
        text.lines()
            .map(str::trim)
            .filter(|l| is_meaningful_line(l))
            .take(MAX_LINES_SCANNED),
        max_words,
    );
    if !from_text.is_empty() {
        return from_text;
    }

    let stem = Path::new(filename)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(filename)
        .replace(['_', '-', '.'], " ");
    let from_name = keywords(std::iter::once(stem.as_str()), max_words);
    if from_name.is_empty() {
        stem.trim().to_string()
    } else {
        from_name
    }
}

/// A line worth reading: at least two alphabetic words and not just a
/// page number or a rule.
fn is_meaningful_line(line: &str) -> bool {
    line.split_whitespace()
        .filter(|w| w.chars().any(char::is_alphabetic))
        .count()
        >= 2
}

fn keywords<'a>(lines: impl Iterator<Item = &'a str>, max_words: usize) -> String {
    let mut seen = HashSet::new();
    let mut words = Vec::new();
    'outer: for line in lines {
        for m in RE_WORD.find_iter(line) {
            let word = m.as_str().trim_end_matches(['.', '-', '\'']);
            let lower = word.to_lowercase();
            if word.chars().count() < 3 && !word.chars().all(char::is_uppercase) {
                continue;
            }
            if STOP_WORDS.contains(&lower.as_str()) || !seen.insert(lower) {
                continue;
            }
            words.push(word.to_string());
            if words.len() >= max_words {
                break 'outer;
            }
        }
    }
    words.join(" ")
}
