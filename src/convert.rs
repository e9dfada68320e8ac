//! Extraction entry points.
//!
//! * [`extract`] — resolve, render, extract; nothing is cached.
//! * [`extract_cached`] — same, but consults and fills the CSV cache in
//!   [`ExtractionConfig::cache_dir`] first.
//! * [`write_outputs`] — write per-page CSV files the way the CLI names them.
//!
//! Every entry point fails as a whole if any page fails after its retries.

use crate::cache::{cache_key, CsvCache};
use crate::config::ExtractionConfig;
use crate::error::Pdf2CsvError;
use crate::output::{ExtractionOutput, ExtractionStats, PageOutcome, ResultSource};
use crate::pipeline::extract::{extract_pages, resolve_extractor};
use crate::pipeline::input::{self, DocumentKind, ResolvedInput};
use crate::pipeline::render::{self, PageRasterizer, PdfiumRasterizer};
use crate::pipeline::tabulate::strip_carriage_returns;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info};

/// Extract tables from a PDF or image file or URL.
///
/// # Errors
/// - input could not be read or downloaded
/// - PDF could not be opened or rendered, or the image could not be decoded
/// - no extraction provider is configured
/// - a page failed on every attempt ([`Pdf2CsvError::PageFailed`])
/// - the run was cancelled
pub async fn extract(
    input_str: impl AsRef<str>,
    config: &ExtractionConfig,
) -> Result<ExtractionOutput, Pdf2CsvError> {
    let input_str = input_str.as_ref();
    info!("Starting extraction: {}", input_str);

    let resolved = input::resolve_input(input_str, config.download_timeout_secs).await?;
    process_input(resolved, config).await
}

/// Extract tables from an in-memory document. `name` supplies the filename
/// and, through its extension, the document kind.
pub async fn extract_from_bytes(
    bytes: Vec<u8>,
    name: &str,
    config: &ExtractionConfig,
) -> Result<ExtractionOutput, Pdf2CsvError> {
    process_input(ResolvedInput::from_bytes(bytes, name), config).await
}

/// Synchronous wrapper around [`extract`].
///
/// Creates a temporary tokio runtime internally.
pub fn extract_sync(
    input_str: impl AsRef<str>,
    config: &ExtractionConfig,
) -> Result<ExtractionOutput, Pdf2CsvError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| Pdf2CsvError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(extract(input_str, config))
}

/// Cache-checked extraction.
///
/// If any entry exists for the input's cache key, those CSV strings are
/// returned verbatim and no extraction runs. Otherwise the input is
/// extracted and each page stored as `<key>_<index>.csv`.
pub async fn extract_cached(
    input_str: impl AsRef<str>,
    config: &ExtractionConfig,
) -> Result<ExtractionOutput, Pdf2CsvError> {
    let input_str = input_str.as_ref();
    let resolved = input::resolve_input(input_str, config.download_timeout_secs).await?;

    let key = cache_key(&resolved, config.cache_key);
    let cache = CsvCache::new(&config.cache_dir);
    cache.ensure_dir().await?;

    if let Some(csv) = cache.load(&key).await? {
        info!("{}: served {} page(s) from cache", input_str, csv.len());
        return Ok(ExtractionOutput {
            file_name: resolved.file_name,
            source: ResultSource::Cache,
            pages: Vec::new(),
            stats: ExtractionStats {
                processed_pages: csv.len(),
                ..Default::default()
            },
            csv,
        });
    }

    info!("{}: not cached, extracting", input_str);
    let output = process_input(resolved, config).await?;
    cache.store(&key, &output.csv).await?;
    Ok(output)
}

/// Write each CSV to `<dir>/<file_name>_output_table_<n>.csv`, `n` from 1.
pub async fn write_outputs(
    file_name: &str,
    csv: &[String],
    dir: impl AsRef<Path>,
) -> Result<Vec<PathBuf>, Pdf2CsvError> {
    let dir = dir.as_ref();
    let mut written = Vec::with_capacity(csv.len());

    for (i, content) in csv.iter().enumerate() {
        let path = dir.join(output_file_name(file_name, i + 1));
        tokio::fs::write(&path, strip_carriage_returns(content))
            .await
            .map_err(|e| Pdf2CsvError::OutputWriteFailed {
                path: path.clone(),
                source: e,
            })?;
        written.push(path);
    }

    Ok(written)
}

/// `<file_name>_output_table_<n>.csv`
pub fn output_file_name(file_name: &str, n: usize) -> String {
    format!("{file_name}_output_table_{n}.csv")
}

// ── Internal helpers ─────────────────────────────────────────────────────

async fn process_input(
    resolved: ResolvedInput,
    config: &ExtractionConfig,
) -> Result<ExtractionOutput, Pdf2CsvError> {
    let total_start = Instant::now();

    if config.cancel.is_cancelled() {
        return Err(Pdf2CsvError::Cancelled);
    }

    let extractor = resolve_extractor(config)?;
    let ResolvedInput {
        bytes,
        file_name,
        kind,
        ..
    } = resolved;

    // ── Page images ──────────────────────────────────────────────────────
    let render_start = Instant::now();
    let (total_pages, skipped, pages) = match kind {
        DocumentKind::Pdf => {
            let rasterizer: Arc<dyn PageRasterizer> = match config.rasterizer {
                Some(ref r) => Arc::clone(r),
                None => Arc::new(PdfiumRasterizer::new(config.pdfium_lib_path.clone())),
            };
            let doc = render::render_document(
                rasterizer,
                bytes,
                config.pages.clone(),
                config.password.clone(),
                config.max_rendered_pixels,
            )
            .await?;
            (doc.total_pages, doc.skipped, doc.pages)
        }
        DocumentKind::Image => {
            let max_pixels = config.max_rendered_pixels;
            let name = file_name.clone();
            let image = tokio::task::spawn_blocking(move || {
                render::decode_image(&bytes, &name, max_pixels)
            })
            .await
            .map_err(|e| Pdf2CsvError::Internal(format!("Decode task panicked: {}", e)))??;
            (1, 0, vec![(0, image)])
        }
    };
    let render_duration_ms = render_start.elapsed().as_millis() as u64;
    info!(
        "Prepared {} page image(s) in {}ms",
        pages.len(),
        render_duration_ms
    );

    // ── Extraction ───────────────────────────────────────────────────────
    let extract_start = Instant::now();
    let results = extract_pages(extractor, pages, config).await;
    let extract_duration_ms = extract_start.elapsed().as_millis() as u64;

    let mut first_error = None;
    for page in &results {
        if let Some(ref e) = page.error {
            error!("{}", e);
            first_error.get_or_insert_with(|| Pdf2CsvError::from_page_error(e));
        }
    }
    if let Some(e) = first_error {
        return Err(e);
    }

    let csv: Vec<String> = results
        .iter()
        .map(|p| strip_carriage_returns(&p.csv))
        .collect();

    let stats = ExtractionStats {
        total_pages,
        processed_pages: results.len(),
        pages_with_tables: results
            .iter()
            .filter(|p| p.outcome == PageOutcome::Table)
            .count(),
        skipped_pages: skipped,
        total_duration_ms: total_start.elapsed().as_millis() as u64,
        render_duration_ms,
        extract_duration_ms,
    };
    debug!("{:?}", stats);

    info!(
        "Extraction complete: {} page(s), {} with tables, {}ms total",
        stats.processed_pages, stats.pages_with_tables, stats.total_duration_ms
    );

    Ok(ExtractionOutput {
        file_name,
        source: ResultSource::Extracted,
        pages: results,
        csv,
        stats,
    })
}
