// 📄 Raw extract table - decoding + delimited-text parsing
//
// One period's extract as it arrives: named text columns plus rows of text
// cells. Nothing here knows what the columns mean (see schema.rs).

use crate::error::{PipelineError, Result};
use csv::ReaderBuilder;
use encoding_rs::Encoding;
use serde::Serialize;
use tracing::{debug, warn};

// ============================================================================
// DECODING
// ============================================================================

/// Text plus the encoding that produced it
#[derive(Debug, Clone)]
pub struct DecodedText {
    pub text: String,
    pub encoding: &'static str,
    /// Lines dropped because neither encoding could decode them
    pub skipped_lines: usize,
}

/// Decode with `primary`, falling back to `fallback` on failure.
///
/// Whole-buffer decoding is tried first under each encoding. If both report
/// malformed input, decoding drops to line granularity: lines neither
/// encoding accepts are blanked, so later line numbers stay put.
pub fn decode_text(
    bytes: &[u8],
    primary: &'static Encoding,
    fallback: &'static Encoding,
) -> DecodedText {
    for encoding in [primary, fallback] {
        let (text, had_errors) = encoding.decode_with_bom_removal(bytes);
        if !had_errors {
            return DecodedText {
                text: text.into_owned(),
                encoding: encoding.name(),
                skipped_lines: 0,
            };
        }
        debug!(encoding = encoding.name(), "extract does not decode cleanly");
    }

    let mut text = String::with_capacity(bytes.len());
    let mut skipped_lines = 0;
    for line in bytes.split(|b| *b == b'\n') {
        let decoded = [primary, fallback].iter().find_map(|encoding| {
            encoding
                .decode_without_bom_handling_and_without_replacement(line)
                .map(|cow| cow.into_owned())
        });
        match decoded {
            Some(line) => {
                text.push_str(&line);
                text.push('\n');
            }
            None => {
                skipped_lines += 1;
                text.push('\n');
            }
        }
    }

    if skipped_lines > 0 {
        warn!(skipped_lines, "dropped undecodable lines from extract");
    }

    DecodedText {
        text,
        encoding: fallback.name(),
        skipped_lines,
    }
}

// ============================================================================
// RAW TABLE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RawTable {
    /// Column names, trimmed and stripped of quote characters
    pub headers: Vec<String>,
    /// Rows padded to the header width
    pub rows: Vec<Vec<String>>,
    /// Source line of each row (1-indexed, header is line 1)
    pub line_numbers: Vec<usize>,
}

/// Trim whitespace, quote characters and a stray BOM from a column name
pub fn clean_header(raw: &str) -> String {
    raw.replace('"', "")
        .trim_start_matches('\u{feff}')
        .trim()
        .to_string()
}

impl RawTable {
    pub fn new(headers: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        let headers: Vec<String> = headers.iter().map(|h| clean_header(h)).collect();
        let width = headers.len();
        let line_numbers = (0..rows.len()).map(|idx| idx + 2).collect();
        let rows = rows
            .into_iter()
            .map(|mut row| {
                row.resize(width, String::new());
                row
            })
            .collect();
        RawTable {
            headers,
            rows,
            line_numbers,
        }
    }

    /// Decode raw bytes and parse them as a `;`-delimited table
    pub fn decode(
        bytes: &[u8],
        primary: &'static Encoding,
        fallback: &'static Encoding,
    ) -> Result<Self> {
        let decoded = decode_text(bytes, primary, fallback);
        debug!(encoding = decoded.encoding, "decoded extract");
        Self::parse(&decoded.text)
    }

    /// Parse `;`-delimited text whose first record is the header.
    ///
    /// Records wider than the header are skipped, narrower ones are padded,
    /// and records the CSV reader rejects are skipped. A missing header is a
    /// schema error.
    pub fn parse(text: &str) -> Result<Self> {
        let mut reader = ReaderBuilder::new()
            .delimiter(b';')
            .has_headers(false)
            .flexible(true)
            .from_reader(text.as_bytes());

        let mut records = reader.records();

        let headers: Vec<String> = match records.next() {
            Some(Ok(record)) => record.iter().map(clean_header).collect(),
            Some(Err(e)) => {
                return Err(PipelineError::SchemaInference(format!(
                    "unreadable header: {}",
                    e
                )))
            }
            None => return Err(PipelineError::SchemaInference("empty extract".to_string())),
        };

        if headers.iter().all(|h| h.is_empty()) {
            return Err(PipelineError::SchemaInference(
                "header row has no column names".to_string(),
            ));
        }

        let width = headers.len();
        let mut rows = Vec::new();
        let mut line_numbers = Vec::new();

        for (idx, result) in records.enumerate() {
            let record = match result {
                Ok(record) => record,
                Err(e) => {
                    let line = e.position().map_or(idx + 2, |p| p.line() as usize);
                    warn!(line, error = %e, "skipping unreadable row");
                    continue;
                }
            };
            let line = record.position().map_or(idx + 2, |p| p.line() as usize);

            if record.len() == 1 && record.get(0).map_or(true, |c| c.trim().is_empty()) {
                continue;
            }

            if record.len() > width {
                warn!(line, fields = record.len(), expected = width, "skipping row with extra fields");
                continue;
            }

            let mut row: Vec<String> = record.iter().map(|c| c.to_string()).collect();
            row.resize(width, String::new());
            rows.push(row);
            line_numbers.push(line);
        }

        Ok(RawTable {
            headers,
            rows,
            line_numbers,
        })
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    pub fn cell(&self, row: usize, column: usize) -> Option<&str> {
        self.rows.get(row)?.get(column).map(|s| s.as_str())
    }

    /// Source line of `row`, for diagnostics
    pub fn line_number(&self, row: usize) -> usize {
        self.line_numbers.get(row).copied().unwrap_or(row + 2)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
