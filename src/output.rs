//! Result types returned by the extraction entry points.

use crate::error::PageError;
use serde::{Deserialize, Serialize};

/// One table as returned by the extraction service: rows of cell text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    pub rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new(rows: Vec<Vec<String>>) -> Self {
        Self { rows }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.iter().all(|r| r.is_empty())
    }
}

/// What a page produced when extraction did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageOutcome {
    /// A table was found; `csv` holds the first one.
    Table,
    /// The service found no table; `csv` is empty.
    NoTable,
}

/// Result for a single page. `page_index` is 0-indexed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageResult {
    pub page_index: usize,
    /// Header-less CSV of the first table, carriage returns stripped.
    pub csv: String,
    pub outcome: PageOutcome,
    /// Number of tables the service reported on the page.
    pub tables_found: usize,
    pub attempts: u32,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<PageError>,
}

impl PageResult {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Where the returned CSV came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResultSource {
    /// Produced by the extraction service during this call.
    Extracted,
    /// Read back from existing cache entries.
    Cache,
}

/// Aggregate timing and counts for one run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractionStats {
    /// Pages in the source document (1 for images).
    pub total_pages: usize,
    pub processed_pages: usize,
    pub pages_with_tables: usize,
    /// Selected indices that did not exist in the document.
    pub skipped_pages: usize,
    pub total_duration_ms: u64,
    pub render_duration_ms: u64,
    pub extract_duration_ms: u64,
}

/// Full result of an extraction run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionOutput {
    /// Base filename of the input, without extension.
    pub file_name: String,
    pub source: ResultSource,
    /// Per-page results in page order. Empty on a cache hit.
    pub pages: Vec<PageResult>,
    /// CSV text per page, in page order.
    pub csv: Vec<String>,
    pub stats: ExtractionStats,
}
