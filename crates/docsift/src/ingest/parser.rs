//! Parse stage of ingestion: turn raw bytes into an ordered sequence of
//! parts, one per future chunk. Text files become paragraph windows, PDFs
//! one part per page, CSVs one part per row plus a schema summary.
//! Image parts are assembled by the pipeline from the image processor's
//! bundle, not here.

use std::collections::HashSet;

use crate::config::IngestConfig;
use crate::error::EngineError;
use crate::types::ChunkKind;

/// Distinct values tracked per CSV column before the count saturates.
const COLUMN_DISTINCT_CAP: usize = 64;

#[derive(Debug, Clone)]
pub struct Part {
    pub kind: ChunkKind,
    pub text: Option<String>,
    pub page_number: Option<u32>,
    pub row_index: Option<u32>,
}

impl Part {
    fn text(text: String) -> Self {
        Self {
            kind: ChunkKind::Text,
            text: Some(text),
            page_number: None,
            row_index: None,
        }
    }
}

pub struct PartParser {
    chunk_size: usize,
    chunk_overlap: usize,
    min_chunk_size: usize,
}

impl PartParser {
    pub fn new(config: &IngestConfig) -> Self {
        Self {
            chunk_size: config.chunk_size_chars,
            chunk_overlap: config.chunk_overlap_chars,
            min_chunk_size: config.min_chunk_chars,
        }
    }

    /// A short document is a single part; a long one becomes overlapping
    /// windows snapped to paragraph/sentence boundaries where possible.
    pub fn parse_text(&self, content: &str) -> Result<Vec<Part>, EngineError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(EngineError::ParseFailed(
                "text document is empty".to_string(),
            ));
        }
        if content.len() <= self.chunk_size {
            return Ok(vec![Part::text(content.to_string())]);
        }

        let mut parts = Vec::new();
        let mut start = 0;
        while start < content.len() {
            let raw_end = (start + self.chunk_size).min(content.len());
            let end = snap_to_char_boundary(content, raw_end);
            let actual_end = if end < content.len() {
                self.find_break_point(content, start, end)
            } else {
                end
            };

            let window = &content[start..actual_end];
            if window.len() >= self.min_chunk_size {
                parts.push(Part::text(window.to_string()));
            }

            let step = if actual_end - start > self.chunk_overlap {
                actual_end - start - self.chunk_overlap
            } else {
                actual_end - start
            };
            start = snap_to_char_boundary(content, start + step);
            if start >= content.len() {
                break;
            }
        }

        if parts.is_empty() {
            return Err(EngineError::ParseFailed(
                "text document produced no parts".to_string(),
            ));
        }
        Ok(parts)
    }

    /// One part per page via lopdf; whole-document pdf-extract output is
    /// the fallback when per-page extraction yields nothing.
    pub fn parse_pdf(&self, bytes: &[u8]) -> Result<Vec<Part>, EngineError> {
        let mut parts = Vec::new();

        if let Ok(doc) = lopdf::Document::load_mem(bytes) {
            let page_numbers: Vec<u32> = doc.get_pages().keys().copied().collect();
            for page_number in page_numbers {
                let text = doc.extract_text(&[page_number]).unwrap_or_default();
                let cleaned = clean_extracted_text(&text);
                if cleaned.is_empty() {
                    continue;
                }
                parts.push(Part {
                    kind: ChunkKind::Page,
                    text: Some(cleaned),
                    page_number: Some(page_number),
                    row_index: None,
                });
            }
        }

        if parts.is_empty() {
            if let Ok(text) = pdf_extract::extract_text_from_mem(bytes) {
                let cleaned = clean_extracted_text(&text);
                if !cleaned.is_empty() {
                    parts.push(Part {
                        kind: ChunkKind::Page,
                        text: Some(cleaned),
                        page_number: Some(1),
                        row_index: None,
                    });
                }
            }
        }

        if parts.is_empty() {
            return Err(EngineError::ParseFailed(
                "PDF contains no extractable text".to_string(),
            ));
        }
        Ok(parts)
    }

    /// One part per row as "column: value" text, plus a single schema part
    /// summarizing column statistics.
    pub fn parse_csv(&self, bytes: &[u8]) -> Result<Vec<Part>, EngineError> {
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(bytes);

        let headers: Vec<String> = reader
            .headers()
            .map_err(|e| EngineError::ParseFailed(format!("CSV header: {}", e)))?
            .iter()
            .map(str::to_string)
            .collect();
        if headers.is_empty() {
            return Err(EngineError::ParseFailed("CSV has no columns".to_string()));
        }

        let mut column_stats: Vec<ColumnStats> = headers
            .iter()
            .map(|name| ColumnStats::new(name.clone()))
            .collect();

        let mut parts = Vec::new();
        let mut row_count = 0u32;
        for (row_index, record) in reader.records().enumerate() {
            let record =
                record.map_err(|e| EngineError::ParseFailed(format!("CSV row: {}", e)))?;
            let mut fields = Vec::with_capacity(headers.len());
            for (col, value) in record.iter().enumerate() {
                let header = headers
                    .get(col)
                    .map(String::as_str)
                    .unwrap_or("column");
                if !value.is_empty() {
                    fields.push(format!("{}: {}", header, value));
                }
                if let Some(stats) = column_stats.get_mut(col) {
                    stats.observe(value);
                }
            }
            if fields.is_empty() {
                continue;
            }
            parts.push(Part {
                kind: ChunkKind::Row,
                text: Some(fields.join("; ")),
                page_number: None,
                row_index: Some(row_index as u32),
            });
            row_count += 1;
        }

        if parts.is_empty() {
            return Err(EngineError::ParseFailed("CSV has no data rows".to_string()));
        }

        let schema_lines: Vec<String> = column_stats
            .iter()
            .map(|s| s.describe(row_count))
            .collect();
        parts.push(Part::text(format!(
            "CSV schema: {} rows. {}",
            row_count,
            schema_lines.join(" ")
        )));

        Ok(parts)
    }

    fn find_break_point(&self, text: &str, start: usize, preferred_end: usize) -> usize {
        let raw_search_start = if preferred_end > 200 {
            preferred_end - 200
        } else {
            start
        };
        let search_start = snap_to_char_boundary(text, raw_search_start.max(start));
        let safe_end = snap_to_char_boundary(text, preferred_end);
        if search_start >= safe_end {
            return safe_end;
        }

        let region = &text[search_start..safe_end];
        // Priority: paragraph break > sentence end > line break > word break
        if let Some(pos) = region.rfind("\n\n") {
            return search_start + pos + 2;
        }
        if let Some(pos) = region.rfind(". ") {
            return search_start + pos + 2;
        }
        if let Some(pos) = region.rfind(".\n") {
            return search_start + pos + 2;
        }
        if let Some(pos) = region.rfind('\n') {
            return search_start + pos + 1;
        }
        if let Some(pos) = region.rfind(' ') {
            return search_start + pos + 1;
        }
        safe_end
    }
}

struct ColumnStats {
    name: String,
    non_empty: usize,
    distinct: HashSet<String>,
    saturated: bool,
}

impl ColumnStats {
    fn new(name: String) -> Self {
        Self {
            name,
            non_empty: 0,
            distinct: HashSet::new(),
            saturated: false,
        }
    }

    fn observe(&mut self, value: &str) {
        if value.is_empty() {
            return;
        }
        self.non_empty += 1;
        if !self.saturated {
            self.distinct.insert(value.to_string());
            if self.distinct.len() >= COLUMN_DISTINCT_CAP {
                self.saturated = true;
            }
        }
    }

    fn describe(&self, rows: u32) -> String {
        let distinct = if self.saturated {
            format!("{}+", COLUMN_DISTINCT_CAP)
        } else {
            self.distinct.len().to_string()
        };
        format!(
            "{}: {}/{} filled, {} distinct.",
            self.name, self.non_empty, rows, distinct
        )
    }
}

fn clean_extracted_text(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Snap a byte offset to the nearest valid UTF-8 char boundary (rounding down).
fn snap_to_char_boundary(text: &str, pos: usize) -> usize {
    if pos >= text.len() {
        return text.len();
    }
    let mut p = pos;
    while p > 0 && !text.is_char_boundary(p) {
        p -= 1;
    }
    p
}
