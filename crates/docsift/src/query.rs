//! Free-text query analysis: pull out exact filters (ids, emails, IBANs,
//! phones, money, file types), entity hints, and the clean residual text
//! used for semantic and lexical matching. Reuses the extraction regex
//! families so queries and documents agree on token shapes.

use serde::{Deserialize, Serialize};

use crate::extract::{
    DIGIT_RUN_RE, EMAIL_RE, IBAN_RE, INVOICE_ID_RE, MONEY_CODE_RE, MONEY_SYMBOL_RE, PHONE_RE,
    TITLE_SPAN_RE,
};
use crate::text;
use crate::types::FileKind;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoneyMatch {
    pub amount: f64,
    pub cents: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryStrategy {
    Exact,
    Semantic,
    Hybrid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryAnalysis {
    pub ids: Vec<String>,
    pub emails: Vec<String>,
    pub ibans: Vec<String>,
    pub phones: Vec<String>,
    pub money: Vec<MoneyMatch>,
    pub entities: Vec<String>,
    pub file_types: Vec<FileKind>,
    pub clean_text: String,
    /// Advisory only; the executor always assembles a compound query.
    pub estimated_strategy: QueryStrategy,
}

impl QueryAnalysis {
    pub fn empty() -> Self {
        Self {
            ids: Vec::new(),
            emails: Vec::new(),
            ibans: Vec::new(),
            phones: Vec::new(),
            money: Vec::new(),
            entities: Vec::new(),
            file_types: Vec::new(),
            clean_text: String::new(),
            estimated_strategy: QueryStrategy::Semantic,
        }
    }

    pub fn has_structured_match(&self) -> bool {
        !self.ids.is_empty()
            || !self.emails.is_empty()
            || !self.ibans.is_empty()
            || !self.phones.is_empty()
            || !self.money.is_empty()
            || !self.file_types.is_empty()
    }
}

pub struct QueryAnalyzer;

impl QueryAnalyzer {
    pub fn new() -> Self {
        Self
    }

    /// Pure and deterministic. An empty query yields an all-empty analysis
    /// with a `semantic` strategy estimate.
    pub fn analyze(&self, raw: &str) -> QueryAnalysis {
        if raw.trim().is_empty() {
            return QueryAnalysis::empty();
        }

        let mut analysis = QueryAnalysis::empty();
        // Byte spans of every structured match, removed from the residue.
        let mut consumed: Vec<(usize, usize)> = Vec::new();

        for m in IBAN_RE.find_iter(raw) {
            if claim_span(&mut consumed, m.start(), m.end()) {
                analysis.ibans.push(m.as_str().to_string());
            }
        }
        for m in EMAIL_RE.find_iter(raw) {
            if claim_span(&mut consumed, m.start(), m.end()) {
                analysis.emails.push(m.as_str().to_string());
            }
        }
        for m in PHONE_RE.find_iter(raw) {
            if claim_span(&mut consumed, m.start(), m.end()) {
                analysis.phones.push(m.as_str().to_string());
            }
        }
        for m in MONEY_SYMBOL_RE.find_iter(raw) {
            let symbol = m.as_str().chars().next().unwrap_or('$');
            let currency = match symbol {
                '$' => Some("USD"),
                '€' => Some("EUR"),
                '£' => Some("GBP"),
                _ => None,
            };
            let numeric = &m.as_str()[symbol.len_utf8()..];
            if let Some(cents) = crate::extract::parse_amount_cents(numeric) {
                if claim_span(&mut consumed, m.start(), m.end()) {
                    analysis.money.push(MoneyMatch {
                        amount: cents as f64 / 100.0,
                        cents,
                        currency: currency.map(str::to_string),
                    });
                }
            }
        }
        for caps in MONEY_CODE_RE.captures_iter(raw) {
            let whole = caps.get(0).expect("capture 0 always present");
            let numeric = whole.as_str().trim_end_matches(|c: char| c.is_alphabetic());
            if let Some(cents) = crate::extract::parse_amount_cents(numeric) {
                if claim_span(&mut consumed, whole.start(), whole.end()) {
                    analysis.money.push(MoneyMatch {
                        amount: cents as f64 / 100.0,
                        cents,
                        currency: Some(caps[1].to_uppercase()),
                    });
                }
            }
        }
        for m in INVOICE_ID_RE.find_iter(raw) {
            if claim_span(&mut consumed, m.start(), m.end()) {
                analysis.ids.push(m.as_str().to_string());
            }
        }
        for m in DIGIT_RUN_RE.find_iter(raw) {
            if claim_span(&mut consumed, m.start(), m.end()) {
                analysis.ids.push(m.as_str().to_string());
            }
        }

        let residue = blank_spans(raw, &consumed);

        // Entity hints come from the residue, before normalization strips
        // the casing the heuristic depends on.
        for m in TITLE_SPAN_RE.find_iter(&residue) {
            let span = m.as_str().to_string();
            if !analysis.entities.contains(&span) {
                analysis.entities.push(span);
            }
        }

        // File-type tokens are structured matches too: collect and drop them.
        let mut remaining_words: Vec<&str> = Vec::new();
        for word in residue.split_whitespace() {
            let normalized = text::normalize(word, true);
            let cleaned = normalized.trim_matches(|c: char| !c.is_alphanumeric());
            match file_kind_token(cleaned) {
                Some(kind) => {
                    if !analysis.file_types.contains(&kind) {
                        analysis.file_types.push(kind);
                    }
                }
                None => remaining_words.push(word),
            }
        }

        analysis.clean_text = text::normalize_query(&remaining_words.join(" "));
        analysis.estimated_strategy = estimate_strategy(&analysis);
        analysis
    }
}

impl Default for QueryAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

fn estimate_strategy(analysis: &QueryAnalysis) -> QueryStrategy {
    let exact_signal = !analysis.ids.is_empty()
        || !analysis.emails.is_empty()
        || !analysis.ibans.is_empty()
        || !analysis.money.is_empty();
    if exact_signal && text::tokenize(&analysis.clean_text).len() < 2 {
        QueryStrategy::Exact
    } else if !analysis.has_structured_match() {
        QueryStrategy::Semantic
    } else {
        QueryStrategy::Hybrid
    }
}

/// Record `[start, end)` unless it overlaps an already-claimed span.
fn claim_span(consumed: &mut Vec<(usize, usize)>, start: usize, end: usize) -> bool {
    if consumed.iter().any(|&(s, e)| start < e && s < end) {
        return false;
    }
    consumed.push((start, end));
    true
}

/// Replace claimed spans with spaces, preserving the rest of the text.
fn blank_spans(raw: &str, consumed: &[(usize, usize)]) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut bytes_done = 0;
    let mut spans: Vec<(usize, usize)> = consumed.to_vec();
    spans.sort_unstable();
    for (start, end) in spans {
        if start > bytes_done {
            out.push_str(&raw[bytes_done..start]);
        }
        out.push(' ');
        bytes_done = bytes_done.max(end);
    }
    if bytes_done < raw.len() {
        out.push_str(&raw[bytes_done..]);
    }
    out
}

fn file_kind_token(token: &str) -> Option<FileKind> {
    match token {
        "pdf" | "pdfs" => Some(FileKind::Pdf),
        "csv" | "csvs" => Some(FileKind::Csv),
        "image" | "images" | "img" | "photo" | "jpg" | "jpeg" | "png" | "gif" => {
            Some(FileKind::Image)
        }
        "text" | "txt" => Some(FileKind::Text),
        _ => None,
    }
}
