//! # pdf2csv
//!
//! Extract tables from PDF and image documents into CSV files.
//!
//! Each selected page is rasterised and handed to a table-extraction service
//! (by default a vision-language model reached through `edgequake-llm`). The
//! first table found on each page comes back as header-less CSV. Results can
//! be cached on disk so the same document is never sent twice.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF / image
//!  │
//!  ├─ 1. Input     read a local file or download a URL
//!  ├─ 2. Render    one single-page PDF per selected page → image (pdfium)
//!  ├─ 3. Extract   concurrent service calls with retry, timeout, cancel
//!  ├─ 4. Tabulate  first table → CSV, carriage returns stripped
//!  └─ 5. Output    <name>_output_table_<n>.csv, or <hash>_<index>.csv in the cache
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pdf2csv::{extract_cached, ExtractionConfig, PageSelection};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ExtractionConfig::builder()
//!         .pages(PageSelection::All)
//!         .cache_dir("csv_output")
//!         .build()?;
//!     let output = extract_cached("statement.pdf", &config).await?;
//!     for (i, csv) in output.csv.iter().enumerate() {
//!         println!("CSV Output {}:\n{}", i + 1, csv);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdf2csv` binary (clap + anyhow + tracing-subscriber + indicatif) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod cache;
pub mod config;
pub mod convert;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use cache::{cache_key, CsvCache};
pub use config::{CacheKeyMode, ExtractionConfig, ExtractionConfigBuilder, PageSelection, RetryPolicy};
pub use convert::{extract, extract_cached, extract_from_bytes, extract_sync, output_file_name, write_outputs};
pub use error::{ExtractError, PageError, Pdf2CsvError};
pub use output::{ExtractionOutput, ExtractionStats, PageOutcome, PageResult, ResultSource, Table};
pub use pipeline::extract::{CancelToken, TableExtractor, VisionTableExtractor};
pub use pipeline::render::{PageRasterizer, PdfiumRasterizer};
pub use progress::{ExtractionProgressCallback, NoopProgressCallback, ProgressCallback};
