//! Structured metadata extraction from chunk text: identifier-shaped
//! keywords, money, vendor, entities, dates. Shares its regex families
//! with the query analyzer so documents and queries agree on what counts
//! as "structured".
//!
//! Extraction never fails; sub-parsers that find nothing contribute
//! nothing and the caller gets a partial struct.

use chrono::{DateTime, TimeZone, Utc};
use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

use crate::text;

/// Amounts at or above this are treated as parser noise and dropped.
const MAX_SANE_CENTS: i64 = 1_000_000_000_000;

pub(crate) static INVOICE_ID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[A-Z]{2,}(?:-?\d{3,})+\b").expect("invoice id regex is valid")
});
pub(crate) static DIGIT_RUN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d{8,}\b").expect("digit run regex is valid"));
pub(crate) static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b")
        .expect("email regex is valid")
});
pub(crate) static IBAN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[A-Z]{2}\d{2}[A-Z0-9]{11,30}\b").expect("iban regex is valid")
});
pub(crate) static PHONE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\+[1-9]\d{6,14}\b").expect("phone regex is valid"));
pub(crate) static MONEY_SYMBOL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[$€£]\s?\d[\d.,\u{00A0} ]*").expect("money symbol regex is valid")
});
pub(crate) static MONEY_CODE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b\d[\d.,\u{00A0} ]*\s?(USD|EUR|GBP|CZK|CHF|PLN|JPY|CAD|AUD|SEK|NOK|DKK|INR)\b")
        .expect("money code regex is valid")
});
static VENDOR_LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^\s*(?:vendor|from|supplier|seller|issued by)\s*[:\-]\s*(\S.{1,79})$")
        .expect("vendor line regex is valid")
});
pub(crate) static TITLE_SPAN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[A-Z][a-z]+(?:\s+[A-Z][a-z]+)+\b").expect("title span regex is valid")
});
static TITLE_WORD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[A-Z][A-Za-z&-]+(?:\s+[A-Z][A-Za-z&-]+)*\b")
        .expect("title word regex is valid")
});
static ISO_DATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(\d{4})-(\d{2})-(\d{2})\b").expect("iso date regex is valid")
});
static DMY_DOT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(\d{1,2})\.(\d{1,2})\.(\d{4})\b").expect("dotted date regex is valid")
});
static DMY_SLASH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(\d{1,2})/(\d{1,2})/(\d{4})\b").expect("slashed date regex is valid")
});
static MONTH_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(January|February|March|April|May|June|July|August|September|October|November|December)\s+(\d{1,2}),?\s+(\d{4})\b",
    )
    .expect("month name regex is valid")
});

/// First words that disqualify a title-cased span from being an entity.
const ENTITY_STOP_WORDS: &[&str] = &[
    "The", "This", "That", "These", "Those", "Dear", "Invoice", "Total", "Amount", "Page",
    "Date", "Due", "Please", "Thank",
];

const ENTITY_CAP: usize = 32;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedMetadata {
    /// Exact-match tokens, normalized-lowercased, first-seen order.
    pub keywords: Vec<String>,
    /// First explicit currency found in the text, uppercase, or None.
    pub currency: Option<String>,
    /// Multiset of non-negative integer cents.
    pub amounts_cents: Vec<i64>,
    pub vendor: Option<String>,
    /// Original-cased spans and identifier tokens.
    pub entities: Vec<String>,
    /// Canonicalized to UTC midnight.
    pub dates: Vec<DateTime<Utc>>,
    /// First invoice-style identifier, original casing.
    pub invoice_no: Option<String>,
}

pub struct MetadataExtractor {
    vendor_map: HashMap<String, String>,
}

impl MetadataExtractor {
    pub fn new(vendor_map: HashMap<String, String>) -> Self {
        Self { vendor_map }
    }

    pub fn extract(&self, raw: &str) -> ExtractedMetadata {
        if raw.trim().is_empty() {
            return ExtractedMetadata::default();
        }

        let mut out = ExtractedMetadata::default();

        let identifier_tokens = collect_identifier_tokens(raw);
        out.invoice_no = identifier_tokens
            .iter()
            .find(|t| INVOICE_ID_RE.is_match(t))
            .cloned();

        let (currency, amounts) = extract_money(raw);
        out.currency = currency;
        out.amounts_cents = amounts;

        out.vendor = self.extract_vendor(raw);
        out.entities = extract_entities(raw, &identifier_tokens);

        let mut seen_keywords = std::collections::HashSet::new();
        for token in &identifier_tokens {
            let normalized = text::normalize(token, true);
            if !normalized.is_empty() && seen_keywords.insert(normalized.clone()) {
                out.keywords.push(normalized);
            }
        }

        out.dates = extract_dates(raw);
        out
    }

    fn extract_vendor(&self, raw: &str) -> Option<String> {
        // Explicit vendor-like line wins.
        if let Some(caps) = VENDOR_LINE_RE.captures(raw) {
            let candidate = text::normalize(caps[1].trim(), true);
            if !candidate.is_empty() {
                return Some(
                    self.vendor_map
                        .get(&candidate)
                        .cloned()
                        .unwrap_or(candidate),
                );
            }
        }

        // Otherwise, the first title-cased proper noun within the opening
        // 200 characters that resolves through the normalization map.
        let head = text::truncate_chars(raw, 200);
        for m in TITLE_WORD_RE.find_iter(head) {
            let candidate = text::normalize(m.as_str(), true);
            if let Some(canonical) = self.vendor_map.get(&candidate) {
                return Some(canonical.clone());
            }
            // A multi-word span may over-capture a trailing word; retry on
            // shrinking prefixes ("Google Cloud Invoice" -> "Google Cloud").
            let words: Vec<&str> = candidate.split(' ').collect();
            for end in (1..words.len()).rev() {
                if let Some(canonical) = self.vendor_map.get(&words[..end].join(" ")) {
                    return Some(canonical.clone());
                }
            }
        }
        None
    }
}

/// Identifier-shaped tokens in first-seen order, original casing:
/// invoice ids, long digit runs, emails, IBANs, E.164 phones.
pub(crate) fn collect_identifier_tokens(raw: &str) -> Vec<String> {
    let mut found: Vec<(usize, String)> = Vec::new();
    for re in [&*IBAN_RE, &*INVOICE_ID_RE, &*EMAIL_RE, &*PHONE_RE, &*DIGIT_RUN_RE] {
        for m in re.find_iter(raw) {
            found.push((m.start(), m.as_str().to_string()));
        }
    }
    found.sort_by_key(|(start, _)| *start);

    let mut seen = std::collections::HashSet::new();
    let mut tokens = Vec::new();
    for (_, token) in found {
        // A digit run inside an already-captured IBAN or id is not a
        // separate keyword.
        if tokens
            .iter()
            .any(|existing: &String| existing.contains(&token))
        {
            continue;
        }
        if seen.insert(token.clone()) {
            tokens.push(token);
        }
    }
    tokens
}

/// All (amount, currency) pairs in text order. The first explicit currency
/// wins the `currency` slot; every amount lands in the multiset.
pub(crate) fn extract_money(raw: &str) -> (Option<String>, Vec<i64>) {
    let mut found: Vec<(usize, Option<String>, i64)> = Vec::new();

    for m in MONEY_SYMBOL_RE.find_iter(raw) {
        let matched = m.as_str();
        let symbol = matched.chars().next().unwrap_or('$');
        let currency = match symbol {
            '$' => "USD",
            '€' => "EUR",
            '£' => "GBP",
            _ => continue,
        };
        if let Some(cents) = parse_amount_cents(&matched[symbol.len_utf8()..]) {
            found.push((m.start(), Some(currency.to_string()), cents));
        }
    }

    for caps in MONEY_CODE_RE.captures_iter(raw) {
        let whole = caps.get(0).expect("capture 0 always present");
        let code = caps[1].to_uppercase();
        let numeric = whole.as_str().trim_end_matches(|c: char| c.is_alphabetic());
        if let Some(cents) = parse_amount_cents(numeric) {
            found.push((whole.start(), Some(code), cents));
        }
    }

    found.sort_by_key(|(start, _, _)| *start);
    let currency = found.iter().find_map(|(_, c, _)| c.clone());
    let amounts = found.into_iter().map(|(_, _, cents)| cents).collect();
    (currency, amounts)
}

/// Parse a numeric money string into integer cents.
///
/// The right-most of `[.,]` is the decimal separator when followed by one
/// or two digits, otherwise every separator is a thousands separator.
pub(crate) fn parse_amount_cents(numeric: &str) -> Option<i64> {
    let cleaned: String = numeric
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '\u{00A0}')
        .collect();
    let cleaned = cleaned.trim_matches(|c| c == '.' || c == ',');
    if cleaned.is_empty() {
        return None;
    }

    let decimal_pos = cleaned
        .rfind(|c| c == '.' || c == ',')
        .filter(|&pos| {
            let tail = cleaned.len() - pos - 1;
            (1..=2).contains(&tail)
        });

    let mut normalized = String::with_capacity(cleaned.len());
    for (i, c) in cleaned.char_indices() {
        match c {
            '.' | ',' => {
                if Some(i) == decimal_pos {
                    normalized.push('.');
                }
            }
            c if c.is_ascii_digit() => normalized.push(c),
            _ => return None,
        }
    }

    let amount: f64 = normalized.parse().ok()?;
    let cents = (amount * 100.0).round() as i64;
    if !(0..MAX_SANE_CENTS).contains(&cents) {
        return None;
    }
    Some(cents)
}

fn extract_entities(raw: &str, identifier_tokens: &[String]) -> Vec<String> {
    let mut entities = Vec::new();
    let mut seen = std::collections::HashSet::new();

    // Identifier tokens keep their original casing here; their lowercase
    // twins live in `keywords`.
    for token in identifier_tokens {
        if seen.insert(token.clone()) {
            entities.push(token.clone());
        }
    }

    for m in TITLE_SPAN_RE.find_iter(raw) {
        if entities.len() >= ENTITY_CAP {
            break;
        }
        let span = m.as_str();
        let first_word = span.split_whitespace().next().unwrap_or("");
        if ENTITY_STOP_WORDS.contains(&first_word) {
            continue;
        }
        if seen.insert(span.to_string()) {
            entities.push(span.to_string());
        }
    }

    entities.truncate(ENTITY_CAP);
    entities
}

fn extract_dates(raw: &str) -> Vec<DateTime<Utc>> {
    let mut dates = Vec::new();

    for caps in ISO_DATE_RE.captures_iter(raw) {
        push_date(&mut dates, &caps[1], &caps[3], &caps[2]);
    }
    for caps in DMY_DOT_RE.captures_iter(raw) {
        push_date(&mut dates, &caps[3], &caps[1], &caps[2]);
    }
    for caps in DMY_SLASH_RE.captures_iter(raw) {
        push_date(&mut dates, &caps[3], &caps[1], &caps[2]);
    }
    for caps in MONTH_NAME_RE.captures_iter(raw) {
        let month = month_number(&caps[1]);
        push_date_ymd(&mut dates, caps[3].parse().ok(), month, caps[2].parse().ok());
    }

    dates.sort();
    dates.dedup();
    dates
}

fn push_date(dates: &mut Vec<DateTime<Utc>>, year: &str, day: &str, month: &str) {
    push_date_ymd(dates, year.parse().ok(), month.parse().ok(), day.parse().ok());
}

fn push_date_ymd(
    dates: &mut Vec<DateTime<Utc>>,
    year: Option<i32>,
    month: Option<u32>,
    day: Option<u32>,
) {
    let (Some(year), Some(month), Some(day)) = (year, month, day) else {
        return;
    };
    if let Some(date) = Utc.with_ymd_and_hms(year, month, day, 0, 0, 0).single() {
        dates.push(date);
    }
}

fn month_number(name: &str) -> Option<u32> {
    let idx = [
        "january",
        "february",
        "march",
        "april",
        "may",
        "june",
        "july",
        "august",
        "september",
        "october",
        "november",
        "december",
    ]
    .iter()
    .position(|m| name.eq_ignore_ascii_case(m))?;
    Some(idx as u32 + 1)
}
