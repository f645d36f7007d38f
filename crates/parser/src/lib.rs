// SPDX-License-Identifier: MIT

#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! lf-parser: the response-parser registry — a pure function
//! `parse(raw_text, domain) -> ParseOutcome`, table-driven per domain,
//! with six built-in grammars ported from the original `ResponseParser`.

use std::collections::BTreeSet;

/// Result of parsing a model response for one domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseOutcome {
    /// A canonical, normalized label was extracted.
    Ok(String),
    /// No `<<...>>` tagged span was found at all.
    ParseError(String),
    /// A tagged span was found but failed domain-specific validation.
    ValidityError(String),
}

impl ParseOutcome {
    pub fn label(&self) -> Option<&str> {
        match self {
            ParseOutcome::Ok(label) => Some(label),
            _ => None,
        }
    }

    pub fn is_malformed(&self) -> bool {
        !matches!(self, ParseOutcome::Ok(_))
    }
}

/// A domain grammar: validates and normalizes the raw tagged span.
/// Pure function, no shared state — a small registry keyed by domain,
/// not a class hierarchy.
pub type Grammar = fn(&str) -> ParseOutcome;

/// Looks up the grammar registered for `domain`, or `None` if the domain
/// isn't one of the six built-ins. Exposed so callers (e.g. config
/// validation) can check a domain name is parseable before spawning a
/// worker for it.
pub fn grammar_for(domain: &str) -> Option<Grammar> {
    match domain {
        "urgency" => Some(parse_urgency as Grammar),
        "therapeutic" => Some(parse_therapeutic as Grammar),
        "intensity" => Some(parse_intensity as Grammar),
        "adjunct" => Some(parse_adjunct as Grammar),
        "modality" => Some(parse_modality as Grammar),
        "redressal" => Some(parse_redressal as Grammar),
        _ => None,
    }
}

/// Extracts the tagged span and dispatches to the domain's grammar.
/// `raw_text` with no `<<...>>` span yields `ParseError`; an unknown
/// `domain` yields `ValidityError` (the span was found, the domain
/// config itself is what's invalid).
pub fn parse(raw_text: &str, domain: &str) -> ParseOutcome {
    let Some(raw_label) = extract_tagged_span(raw_text) else {
        return ParseOutcome::ParseError("could not find << >> tags in response".to_string());
    };
    match grammar_for(domain) {
        Some(grammar) => grammar(&raw_label),
        None => ParseOutcome::ValidityError(format!("unknown domain: {domain}")),
    }
}

/// Finds the first non-empty `<<...>>` span, mirroring `re.search(r'<<(.+?)>>')`:
/// lazy match, at least one character of content, backtracking past an
/// empty `<<>>` to try the next `<<`.
fn extract_tagged_span(text: &str) -> Option<String> {
    let mut search_from = 0;
    while let Some(rel_start) = text[search_from..].find("<<") {
        let start = search_from + rel_start;
        let after = start + 2;
        if let Some(rel_end) = text[after..].find(">>") {
            let end = after + rel_end;
            if end > after {
                return Some(text[after..end].trim().to_string());
            }
        }
        search_from = start + 2;
    }
    None
}

fn parse_urgency(raw_label: &str) -> ParseOutcome {
    let upper = raw_label.to_ascii_uppercase();
    let bytes = upper.as_bytes();
    let mut search_from = 0;
    while let Some(rel) = upper[search_from..].find("LEVEL") {
        let mut i = search_from + rel + "LEVEL".len();
        while i < bytes.len() && (bytes[i] == b'_' || (bytes[i] as char).is_whitespace()) {
            i += 1;
        }
        if i < bytes.len() && (b'0'..=b'4').contains(&bytes[i]) {
            return ParseOutcome::Ok(format!("LEVEL_{}", bytes[i] as char));
        }
        search_from = search_from + rel + 1;
    }
    ParseOutcome::ValidityError(format!("invalid urgency format: {raw_label}"))
}

fn parse_intensity(raw_label: &str) -> ParseOutcome {
    let upper = raw_label.to_ascii_uppercase();
    match find_digit_code(&upper, "INT-", 1..=5) {
        Some(digit) => ParseOutcome::Ok(format!("INT-{digit}")),
        None => ParseOutcome::ValidityError(format!("invalid intensity format: {raw_label}")),
    }
}

/// First `prefix<digit>` match in `digits` where `digit` is in `range`,
/// case as given in `haystack` (caller upper-cases when the grammar is
/// case-insensitive).
fn find_digit_code(haystack: &str, prefix: &str, range: std::ops::RangeInclusive<u8>) -> Option<u8> {
    let bytes = haystack.as_bytes();
    let prefix_bytes = prefix.as_bytes();
    if bytes.len() < prefix_bytes.len() {
        return None;
    }
    for i in 0..=(bytes.len() - prefix_bytes.len()) {
        if &bytes[i..i + prefix_bytes.len()] == prefix_bytes {
            let digit_idx = i + prefix_bytes.len();
            if digit_idx < bytes.len() && bytes[digit_idx].is_ascii_digit() {
                let digit = bytes[digit_idx] - b'0';
                if range.contains(&digit) {
                    return Some(digit);
                }
            }
        }
    }
    None
}

/// All `prefix<digit>` matches (case-sensitive), deduplicated and sorted
/// ascending — "TA-3, TA-1, TA-3" becomes `[1, 3]`.
fn find_all_digit_codes(haystack: &str, prefix: &str, range: std::ops::RangeInclusive<u8>) -> Vec<u8> {
    let bytes = haystack.as_bytes();
    let prefix_bytes = prefix.as_bytes();
    let mut codes = BTreeSet::new();
    if bytes.len() < prefix_bytes.len() {
        return Vec::new();
    }
    for i in 0..=(bytes.len() - prefix_bytes.len()) {
        if &bytes[i..i + prefix_bytes.len()] == prefix_bytes {
            let digit_idx = i + prefix_bytes.len();
            if digit_idx < bytes.len() && bytes[digit_idx].is_ascii_digit() {
                let digit = bytes[digit_idx] - b'0';
                if range.contains(&digit) {
                    codes.insert(digit);
                }
            }
        }
    }
    codes.into_iter().collect()
}

fn render_codes(prefix: &str, codes: &[u8]) -> String {
    codes.iter().map(|c| format!("{prefix}{c}")).collect::<Vec<_>>().join(", ")
}

fn parse_therapeutic(raw_label: &str) -> ParseOutcome {
    let codes = find_all_digit_codes(raw_label, "TA-", 1..=9);
    if codes.is_empty() {
        ParseOutcome::ValidityError(format!("no valid TA codes found: {raw_label}"))
    } else {
        ParseOutcome::Ok(render_codes("TA-", &codes))
    }
}

fn parse_adjunct(raw_label: &str) -> ParseOutcome {
    if raw_label.to_ascii_uppercase().contains("NONE") {
        return ParseOutcome::Ok("NONE".to_string());
    }
    let codes = find_all_digit_codes(raw_label, "ADJ-", 1..=8);
    if codes.is_empty() {
        ParseOutcome::ValidityError(format!("no valid ADJ codes found: {raw_label}"))
    } else {
        ParseOutcome::Ok(render_codes("ADJ-", &codes))
    }
}

fn parse_modality(raw_label: &str) -> ParseOutcome {
    let codes = find_all_digit_codes(raw_label, "MOD-", 1..=6);
    if codes.is_empty() {
        ParseOutcome::ValidityError(format!("no valid MOD codes found: {raw_label}"))
    } else {
        ParseOutcome::Ok(render_codes("MOD-", &codes))
    }
}

fn parse_redressal(raw_label: &str) -> ParseOutcome {
    let points: serde_json::Value = match serde_json::from_str(raw_label) {
        Ok(value) => value,
        Err(err) => return ParseOutcome::ValidityError(format!("invalid JSON in redressal points: {err}")),
    };
    let Some(array) = points.as_array() else {
        return ParseOutcome::ValidityError(format!("invalid redressal format (not a list): {raw_label}"));
    };
    if !array.iter().all(|p| p.is_string()) {
        return ParseOutcome::ValidityError(format!("invalid redressal format (not all strings): {raw_label}"));
    }
    if array.len() < 2 {
        return ParseOutcome::ValidityError(format!("too few redressal points (minimum 2): {raw_label}"));
    }
    if array.len() > 10 {
        return ParseOutcome::ValidityError(format!("too many redressal points (maximum 10): {raw_label}"));
    }
    match serde_json::to_string(&points) {
        Ok(label) => ParseOutcome::Ok(label),
        Err(err) => ParseOutcome::ValidityError(format!("could not re-serialize redressal points: {err}")),
    }
}
