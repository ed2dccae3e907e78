//! Schema-free CSV codec.
//!
//! The reader is lenient: it never fails. A quote that is never closed
//! swallows the rest of the input into the current cell, and the document
//! reports it through [`CsvDocument::unterminated_quote`] so callers can
//! surface it. Quotes that appear in the middle of an unquoted cell are kept
//! as literal characters.

use crate::Record;

pub const DELIMITER: char = ',';
pub const QUOTE: char = '"';

/// Result of parsing one CSV text.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CsvDocument {
    pub records: Vec<Record>,
    pub unterminated_quote: bool,
}

/// Parse `text` into records.
///
/// Accepts `\n`, `\r\n` and bare `\r` terminators, a final record without a
/// terminator, and `""` as an escaped quote inside quoted cells. Physical
/// lines whose cells are all empty are dropped.
pub fn parse_document(text: &str) -> CsvDocument {
    let mut records = Vec::new();
    let mut record: Record = Vec::new();
    let mut cell = String::new();
    let mut in_quotes = false;
    let mut at_cell_start = true;
    let mut chars = text.chars().peekable();

    while let Some(ch) = chars.next() {
        if in_quotes {
            if ch == QUOTE {
                if chars.peek() == Some(&QUOTE) {
                    chars.next();
                    cell.push(QUOTE);
                } else {
                    in_quotes = false;
                }
            } else {
                cell.push(ch);
            }
            continue;
        }

        match ch {
            QUOTE if at_cell_start => {
                in_quotes = true;
                at_cell_start = false;
            }
            DELIMITER => {
                record.push(std::mem::take(&mut cell));
                at_cell_start = true;
            }
            '\r' | '\n' => {
                if ch == '\r' && chars.peek() == Some(&'\n') {
                    chars.next();
                }
                record.push(std::mem::take(&mut cell));
                push_unless_blank(&mut records, std::mem::take(&mut record));
                at_cell_start = true;
            }
            _ => {
                cell.push(ch);
                at_cell_start = false;
            }
        }
    }

    if !record.is_empty() || !cell.is_empty() || !at_cell_start {
        record.push(cell);
        push_unless_blank(&mut records, record);
    }

    CsvDocument {
        records,
        unterminated_quote: in_quotes,
    }
}

pub fn parse_records(text: &str) -> Vec<Record> {
    parse_document(text).records
}

fn push_unless_blank(records: &mut Vec<Record>, record: Record) {
    if record.iter().any(|cell| !cell.is_empty()) {
        records.push(record);
    }
}

/// Serialize records, quoting only the cells that need it. Every line,
/// including the last, ends with `\n`.
pub fn write_records(records: &[Record]) -> String {
    let mut out = String::new();
    for record in records {
        let line = record
            .iter()
            .map(|cell| quote_cell(cell))
            .collect::<Vec<_>>()
            .join(",");
        out.push_str(&line);
        out.push('\n');
    }
    out
}

fn quote_cell(cell: &str) -> String {
    let needs_quotes = cell
        .chars()
        .any(|c| c == DELIMITER || c == QUOTE || c == '\n' || c == '\r');
    if needs_quotes {
        format!("\"{}\"", cell.replace('"', "\"\""))
    } else {
        cell.to_string()
    }
}
