//! Sentence splitter for TTS chunking
//!
//! Splits agent responses into sentence-sized chunks so the first short
//! chunk reaches synthesis immediately. Protects abbreviations, decimal
//! numbers, and ellipses from false splits; merges fragments below the
//! minimum chunk length; breaks overlong sentences on clause boundaries.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

/// Abbreviations whose trailing period is not a sentence boundary
static ABBREVIATIONS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "mr", "mrs", "ms", "dr", "prof", "sr", "jr", "vs", "etc", "inc", "ltd", "co", "corp",
        "st", "ave", "blvd", "rd", "apt", "dept", "est", "vol", "rev", "gen", "col", "lt", "sgt",
        "capt", "cmdr", "adm", "gov", "pres", "sen", "rep", "hon", "jan", "feb", "mar", "apr",
        "jun", "jul", "aug", "sep", "oct", "nov", "dec", "mon", "tue", "wed", "thu", "fri",
        "sat", "sun", "i.e", "e.g", "cf", "al", "approx", "govt", "univ", "assn",
    ]
    .into_iter()
    .collect()
});

/// Clause boundaries used to break overlong sentences
static CLAUSE_BREAK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[,;]\s+|\s(?:and|but|or|so|because|however|therefore)\s").unwrap()
});

/// True when the period ending at `idx` terminates a protected abbreviation.
fn is_abbreviation_period(chars: &[char], idx: usize) -> bool {
    // Collect the token before the period (letters and interior periods).
    let mut start = idx;
    while start > 0 {
        let c = chars[start - 1];
        if c.is_alphabetic() || c == '.' {
            start -= 1;
        } else {
            break;
        }
    }
    if start == idx {
        return false;
    }
    let token: String = chars[start..idx]
        .iter()
        .collect::<String>()
        .trim_matches('.')
        .to_lowercase();
    ABBREVIATIONS.contains(token.as_str())
}

/// True when position `idx` (a `.`/`!`/`?`) ends a sentence.
fn is_sentence_boundary(chars: &[char], idx: usize) -> bool {
    let c = chars[idx];

    if c == '.' {
        // Part of an ellipsis
        if (idx > 0 && chars[idx - 1] == '.') || chars.get(idx + 1) == Some(&'.') {
            return false;
        }
        // Decimal point
        let digit_before = idx > 0 && chars[idx - 1].is_ascii_digit();
        let digit_after = chars.get(idx + 1).map_or(false, |c| c.is_ascii_digit());
        if digit_before && digit_after {
            return false;
        }
        if is_abbreviation_period(chars, idx) {
            return false;
        }
    }

    // End of string (ignoring trailing whitespace) is a boundary.
    let mut next = idx + 1;
    while next < chars.len() && chars[next].is_whitespace() {
        next += 1;
    }
    if next == chars.len() {
        return true;
    }

    // Otherwise the break requires whitespace then an uppercase letter.
    next > idx + 1 && chars[next].is_uppercase()
}

/// Split text into sentences, merging short ones forward to reach
/// `min_chunk_length` characters.
pub fn split_sentences(text: &str, min_chunk_length: usize) -> Vec<String> {
    let text = text.trim();
    if text.is_empty() {
        return Vec::new();
    }

    let chars: Vec<char> = text.chars().collect();
    let mut sentences: Vec<String> = Vec::new();
    let mut start = 0;

    for idx in 0..chars.len() {
        let c = chars[idx];
        if (c == '.' || c == '!' || c == '?') && is_sentence_boundary(&chars, idx) {
            let sentence: String = chars[start..=idx].iter().collect::<String>().trim().to_string();
            if !sentence.is_empty() {
                sentences.push(sentence);
            }
            start = idx + 1;
        }
    }
    if start < chars.len() {
        let tail: String = chars[start..].iter().collect::<String>().trim().to_string();
        if !tail.is_empty() {
            sentences.push(tail);
        }
    }

    // Merge short sentences with the next one.
    let mut merged: Vec<String> = Vec::new();
    let mut buffer = String::new();
    for sentence in sentences {
        if buffer.is_empty() {
            buffer = sentence;
        } else {
            buffer.push(' ');
            buffer.push_str(&sentence);
        }
        if buffer.chars().count() >= min_chunk_length {
            merged.push(std::mem::take(&mut buffer));
        }
    }
    if !buffer.is_empty() {
        if let Some(last) = merged.last_mut() {
            last.push(' ');
            last.push_str(&buffer);
        } else {
            merged.push(buffer);
        }
    }

    merged
}

/// Split text for TTS: sentence chunks, with sentences longer than
/// `max_chunk_length` broken on comma/semicolon/conjunction boundaries.
pub fn split_for_tts(text: &str, min_chunk_length: usize, max_chunk_length: usize) -> Vec<String> {
    let sentences = split_sentences(text, min_chunk_length);

    let mut chunks = Vec::new();
    for sentence in sentences {
        if sentence.chars().count() <= max_chunk_length {
            chunks.push(sentence);
            continue;
        }

        // Break the long sentence at clause boundaries, keeping the
        // punctuation with the left part.
        let mut parts: Vec<String> = Vec::new();
        let mut last = 0;
        for m in CLAUSE_BREAK.find_iter(&sentence) {
            // One past the comma/semicolon, or past the space preceding the
            // conjunction: either way the punctuation stays left, the
            // conjunction goes right.
            let cut = m.start() + 1;
            let part = sentence[last..cut].trim().to_string();
            if !part.is_empty() {
                parts.push(part);
            }
            last = cut;
        }
        let tail = sentence[last..].trim().to_string();
        if !tail.is_empty() {
            parts.push(tail);
        }

        // Re-merge parts up to the maximum length.
        let mut current = String::new();
        for part in parts {
            if current.is_empty() {
                current = part;
            } else if current.chars().count() + 1 + part.chars().count() <= max_chunk_length {
                current.push(' ');
                current.push_str(&part);
            } else {
                chunks.push(std::mem::take(&mut current));
                current = part;
            }
        }
        if !current.is_empty() {
            chunks.push(current);
        }
    }

    chunks
}
