//! Tabulation: turn the service's answer into tables, and tables into CSV.
//!
//! The vision model is asked for `{"tables": [[["cell", ...], ...], ...]}`,
//! but models do not always comply exactly. Parsing tolerates an outer code
//! fence, leading or trailing commentary, a bare top-level array, and
//! non-string cells. An object with any key other than `tables` is
//! malformed, not an empty answer. Cell text is normalised before it reaches
//! the CSV writer.

use crate::error::ExtractError;
use crate::output::Table;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

/// Parse a model response into tables, in the order the model listed them.
pub fn parse_tables(response: &str) -> Result<Vec<Table>, ExtractError> {
    let body = strip_code_fences(response);

    let raw = match find_tables_value(&body)? {
        TablesResponse::Object(TablesObject { tables }) => tables,
        TablesResponse::Bare(tables) => tables,
    };

    Ok(raw
        .into_iter()
        .map(|rows| Table::new(rows.into_iter().map(|r| r.iter().map(cell_text).collect()).collect()))
        .filter(|t| !t.is_empty())
        .collect())
}

/// Render a table as CSV without a header row. Short rows are padded with
/// empty cells to the widest row.
pub fn table_to_csv(table: &Table) -> Result<String, csv::Error> {
    let width = table.rows.iter().map(Vec::len).max().unwrap_or(0);
    let mut writer = csv::WriterBuilder::new()
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());

    for row in &table.rows {
        let mut record: Vec<&str> = row.iter().map(String::as_str).collect();
        record.resize(width, "");
        writer.write_record(&record)?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| csv::Error::from(e.into_error()))?;
    Ok(strip_carriage_returns(&String::from_utf8_lossy(&bytes)))
}

/// Remove every `\r`, leaving `\n` line endings.
pub fn strip_carriage_returns(input: &str) -> String {
    input.replace('\r', "")
}

// ── Response shape ───────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(untagged)]
enum TablesResponse {
    Bare(Vec<Vec<Vec<Value>>>),
    Object(TablesObject),
}

/// `{"tables": [...]}` and nothing else; any other object is malformed.
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct TablesObject {
    tables: Vec<Vec<Vec<Value>>>,
}

/// Walk the top-level JSON values embedded in `body` and return the first one
/// shaped like a tables answer.
///
/// A value that parses as JSON but has the wrong shape is skipped as a whole,
/// so arrays nested inside a rejected object are never considered.
fn find_tables_value(body: &str) -> Result<TablesResponse, ExtractError> {
    let mut pos = 0;
    let mut rejected: Option<String> = None;

    while let Some(offset) = body[pos..].find(['{', '[']) {
        let start = pos + offset;
        let mut values = serde_json::Deserializer::from_str(&body[start..]).into_iter::<Value>();

        match values.next() {
            Some(Ok(value)) => {
                let end = start + values.byte_offset();
                match serde_json::from_value::<TablesResponse>(value) {
                    Ok(parsed) => return Ok(parsed),
                    Err(e) => {
                        rejected.get_or_insert_with(|| {
                            format!("{e}: {:?}", preview(&body[start..end]))
                        });
                        pos = end;
                    }
                }
            }
            // Not JSON from here (e.g. "[see below]"); brackets are one byte.
            _ => pos = start + 1,
        }
    }

    Err(ExtractError::Malformed(rejected.unwrap_or_else(|| {
        format!("no JSON found in response: {:?}", preview(body))
    })))
}

fn cell_text(value: &Value) -> String {
    let raw = match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    clean_cell(&raw)
}

// ── Cleanup rules ────────────────────────────────────────────────────────

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```[A-Za-z]*\s*\n(.*?)\n?```\s*$").unwrap());

static RE_WHITESPACE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

fn strip_code_fences(input: &str) -> String {
    let trimmed = input.trim();
    match RE_OUTER_FENCES.captures(trimmed) {
        Some(caps) => caps[1].to_string(),
        None => trimmed.to_string(),
    }
}

/// Drop invisible characters, fold line breaks and whitespace runs to one
/// space, trim.
fn clean_cell(input: &str) -> String {
    let visible = input.replace(
        ['\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}'],
        "",
    );
    RE_WHITESPACE_RUN.replace_all(visible.trim(), " ").into_owned()
}

fn preview(s: &str) -> String {
    s.chars().take(80).collect()
}
