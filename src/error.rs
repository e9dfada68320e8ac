//! Error types for the pdf2csv library.
//!
//! Three error types, one per layer:
//!
//! * [`Pdf2CsvError`] — **Fatal**: the extraction call cannot return a
//!   usable result (bad input, unreadable PDF, provider not configured, or a
//!   page that kept failing after every retry).
//!
//! * [`PageError`] — **Per page**: stored inside
//!   [`crate::output::PageResult`] so callers can see which page failed and
//!   why, even though the batch call itself reports the first failure.
//!
//! * [`ExtractError`] — **Service boundary**: what a
//!   [`crate::pipeline::extract::TableExtractor`] returns for one attempt.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the pdf2csv library.
#[derive(Debug, Error)]
pub enum Pdf2CsvError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("Input file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    /// The input is not a decodable image.
    #[error("Could not decode image '{name}': {detail}")]
    InvalidImage { name: String, detail: String },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{name}' is corrupt: {detail}")]
    CorruptPdf { name: String, detail: String },

    /// PDF requires a password but none was provided.
    #[error("PDF '{name}' is encrypted and requires a password.\nProvide it with --password <PASSWORD>.")]
    PasswordRequired { name: String },

    /// A password was provided but it is wrong.
    #[error("Wrong password for PDF '{name}'")]
    WrongPassword { name: String },

    /// pdfium-render returned an error while splitting or rasterising a page.
    #[error("Rasterisation failed for page {page}: {detail}")]
    RasterisationFailed { page: usize, detail: String },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
Install libpdfium next to the binary or in a system library directory,\n\
or set PDFIUM_LIB_PATH=/path/to/libpdfium.\n"
    )]
    PdfiumBindingFailed(String),

    // ── Extraction errors ─────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// A page kept failing after every attempt allowed by the retry policy.
    #[error("Table extraction failed for page {page} after {attempts} attempts: {detail}")]
    PageFailed {
        page: usize,
        attempts: u32,
        detail: String,
    },

    /// The caller cancelled the extraction before it finished.
    #[error("Extraction cancelled")]
    Cancelled,

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create, list, read or write the cache directory.
    #[error("Cache I/O failed at '{path}': {source}")]
    CacheIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Could not create or write an output CSV file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Pdf2CsvError {
    /// Lift the first failed page of a batch into a fatal error.
    pub(crate) fn from_page_error(err: &PageError) -> Self {
        match err {
            PageError::Cancelled { .. } => Pdf2CsvError::Cancelled,
            PageError::ExtractionFailed {
                page,
                attempts,
                detail,
            } => Pdf2CsvError::PageFailed {
                page: *page,
                attempts: *attempts,
                detail: detail.clone(),
            },
            PageError::Timeout {
                page,
                attempts,
                secs,
            } => Pdf2CsvError::PageFailed {
                page: *page,
                attempts: *attempts,
                detail: format!("timed out after {secs}s"),
            },
            PageError::RenderFailed { page, detail } => Pdf2CsvError::RasterisationFailed {
                page: *page,
                detail: detail.clone(),
            },
        }
    }
}

/// A failure for a single page. Page numbers are 0-indexed.
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize, serde::Deserialize)]
pub enum PageError {
    /// Page rasterisation or encoding failed.
    #[error("Page {page}: rasterisation failed: {detail}")]
    RenderFailed { page: usize, detail: String },

    /// Service call failed on every attempt.
    #[error("Page {page}: extraction failed after {attempts} attempts: {detail}")]
    ExtractionFailed {
        page: usize,
        attempts: u32,
        detail: String,
    },

    /// The last attempt timed out.
    #[error("Page {page}: extraction timed out after {secs}s ({attempts} attempts)")]
    Timeout { page: usize, attempts: u32, secs: u64 },

    /// Cancelled before a result was produced.
    #[error("Page {page}: cancelled")]
    Cancelled { page: usize },
}

/// Failure of one call to the table-extraction service.
#[derive(Debug, Clone, Error)]
pub enum ExtractError {
    /// Transport or provider error.
    #[error("service error: {0}")]
    Service(String),

    /// The service answered, but the answer could not be understood.
    #[error("malformed response: {0}")]
    Malformed(String),
}
