use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;

use super::types::{Field, LineItem};

/// Document type keyword sets, checked in this order; first hit wins.
const DOCUMENT_TYPES: &[(&str, &[&str])] = &[
    ("invoice", &["invoice", "inv#"]),
    ("receipt", &["receipt", "thanks for your purchase"]),
    ("purchase_order", &["purchase order", "po #", "po#"]),
    ("statement", &["statement", "balance forward"]),
];

const VENDOR_EXCLUDED: &[&str] = &["invoice", "bill", "statement"];

static AMOUNT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$?(-?\d{1,3}(?:,\d{3})*(?:\.\d{2})?)").unwrap());

static IDENTIFIER_RES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)\bINV[- ]?\d{4,}\b",
        r"(?i)\bPO[- ]?\d{4,}\b",
        r"\b\d{8,}\b",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

static DATE_RES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"\b\d{4}-\d{2}-\d{2}\b",
        r"\b\d{2}/\d{2}/\d{4}\b",
        r"\b\d{1,2}\s+[A-Za-z]{3,}\s+\d{4}\b",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

static LETTERS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[A-Za-z]{2,}").unwrap());
static QTY_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\bqty\b").unwrap());
static AMOUNT_TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\$?\d").unwrap());

pub fn document_type(text: &str) -> Field<String> {
    let lower = text.to_lowercase();
    DOCUMENT_TYPES
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| lower.contains(k)))
        .map(|(doc_type, _)| Field::new(doc_type.to_string(), 0.85))
        .unwrap_or_else(|| Field::new("document".into(), 0.3))
}

pub fn vendor(text: &str) -> Field<Option<String>> {
    let found = text.lines().find_map(|line| {
        let lower = line.to_lowercase();
        if VENDOR_EXCLUDED.iter().any(|k| lower.contains(k)) {
            return None;
        }
        let trimmed = line.trim();
        (trimmed.chars().count() > 4 && LETTERS_RE.is_match(line)).then(|| trimmed.to_string())
    });
    let confidence = if found.is_some() { 0.6 } else { 0.2 };
    Field::new(found, confidence)
}

/// Largest currency-like amount, formatted with two decimals.
pub fn total(text: &str) -> Field<String> {
    let best = AMOUNT_RE
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .filter_map(|m| m.as_str().replace(',', "").parse::<f64>().ok())
        .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |a| a.max(v))));
    match best {
        Some(value) => Field::new(format!("{value:.2}"), 0.9),
        None => Field::new("0.00".into(), 0.2),
    }
}

pub fn identifiers(text: &str) -> Field<Vec<String>> {
    let ids: BTreeSet<String> = IDENTIFIER_RES
        .iter()
        .flat_map(|re| re.find_iter(text).map(|m| m.as_str().to_string()))
        .collect();
    let confidence = if ids.is_empty() { 0.2 } else { 0.7 };
    Field::new(ids.into_iter().collect(), confidence)
}

/// Date-like strings, deduplicated and sorted as strings.
///
/// Lexical order only: "10 Jan 2024" sorts before "9 Jan 2024", and the
/// three formats never interleave chronologically.
pub fn dates(text: &str) -> Field<Vec<String>> {
    let found: BTreeSet<String> = DATE_RES
        .iter()
        .flat_map(|re| re.find_iter(text).map(|m| m.as_str().to_string()))
        .collect();
    let confidence = if found.is_empty() { 0.2 } else { 0.7 };
    Field::new(found.into_iter().collect(), confidence)
}

pub fn line_items(text: &str) -> Field<Vec<LineItem>> {
    let items: Vec<LineItem> = text
        .lines()
        .filter(|line| QTY_RE.is_match(line) && line.chars().any(|c| c.is_ascii_digit()))
        .filter_map(parse_line_item)
        .collect();
    let confidence = if items.is_empty() { 0.2 } else { 0.6 };
    Field::new(items, confidence)
}

fn parse_line_item(line: &str) -> Option<LineItem> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let quantity = tokens.iter().copied().find(|t| is_quantity(t));
    let amount = tokens.iter().copied().find(|t| AMOUNT_TOKEN_RE.is_match(t));
    let description = tokens
        .iter()
        .copied()
        .filter(|t| Some(*t) != quantity && Some(*t) != amount)
        .collect::<Vec<_>>()
        .join(" ");
    if description.is_empty() {
        return None;
    }
    Some(LineItem {
        description,
        quantity: quantity.map(str::to_string),
        amount: amount.map(str::to_string),
    })
}

/// Digits with at most one decimal point.
fn is_quantity(token: &str) -> bool {
    let digits = token.replacen('.', "", 1);
    !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())
}
