//! Integration tests for the extraction pipeline.
//!
//! pdfium and the vision model are replaced by in-process fakes injected via
//! `ExtractionConfig`, so these run offline and without a pdfium library.
//!
//! Run with:
//!   cargo test --test pipeline

use async_trait::async_trait;
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use pdf2csv::{
    extract, extract_cached, extract_from_bytes, CacheKeyMode, CancelToken, ExtractError,
    ExtractionConfig, PageOutcome, PageRasterizer, PageSelection, Pdf2CsvError, ResultSource,
    RetryPolicy, Table, TableExtractor,
};
use std::io::Cursor;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

// ── Fakes ────────────────────────────────────────────────────────────────────

/// Every document has `pages` pages; page `i` renders `i + 1` pixels wide.
struct FakeRasterizer {
    pages: usize,
}

impl PageRasterizer for FakeRasterizer {
    fn page_count(&self, _pdf: &[u8], _password: Option<&str>) -> Result<usize, Pdf2CsvError> {
        Ok(self.pages)
    }

    fn render_pages(
        &self,
        _pdf: &[u8],
        _password: Option<&str>,
        indices: &[usize],
        _max_pixels: u32,
    ) -> Result<Vec<(usize, DynamicImage)>, Pdf2CsvError> {
        Ok(indices
            .iter()
            .map(|&i| {
                let img = RgbaImage::from_pixel(i as u32 + 1, 1, Rgba([255, 255, 255, 255]));
                (i, DynamicImage::ImageRgba8(img))
            })
            .collect())
    }
}

/// Answers with a two-row table whose second row names the page (read back
/// from the image width). Counts calls.
#[derive(Default)]
struct PageEcho {
    calls: AtomicUsize,
}

#[async_trait]
impl TableExtractor for PageEcho {
    async fn extract_tables(&self, page: &DynamicImage) -> Result<Vec<Table>, ExtractError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let index = page.width() - 1;
        Ok(vec![Table::new(vec![
            vec!["Item".into(), "Amount".into()],
            vec![format!("page {index}"), "10.00".into()],
        ])])
    }
}

/// Always fails.
#[derive(Default)]
struct AlwaysDown {
    calls: AtomicUsize,
}

#[async_trait]
impl TableExtractor for AlwaysDown {
    async fn extract_tables(&self, _page: &DynamicImage) -> Result<Vec<Table>, ExtractError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(ExtractError::Service("503 Service Unavailable".into()))
    }
}

/// Finds nothing.
struct NoTables;

#[async_trait]
impl TableExtractor for NoTables {
    async fn extract_tables(&self, _page: &DynamicImage) -> Result<Vec<Table>, ExtractError> {
        Ok(Vec::new())
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn config_with(
    extractor: Arc<dyn TableExtractor>,
    pages: usize,
    selection: PageSelection,
    cache_dir: &Path,
) -> ExtractionConfig {
    ExtractionConfig::builder()
        .pages(selection)
        .extractor(extractor)
        .rasterizer(Arc::new(FakeRasterizer { pages }))
        .retry(RetryPolicy::immediate(3))
        .cache_dir(cache_dir)
        .build()
        .unwrap()
}

fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(
        width,
        height,
        Rgba([255, 255, 255, 255]),
    ));
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageFormat::Png).unwrap();
    buf.into_inner()
}

/// Write `bytes` to `<dir>/<name>` and return the path as a string.
fn write_input(dir: &Path, name: &str, bytes: &[u8]) -> String {
    let path = dir.join(name);
    std::fs::write(&path, bytes).unwrap();
    path.to_string_lossy().into_owned()
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn image_input_yields_one_headerless_csv() {
    let tmp = tempfile::tempdir().unwrap();
    let input = write_input(tmp.path(), "receipt.png", &png_bytes(1, 4));
    let extractor = Arc::new(PageEcho::default());
    let config = config_with(extractor.clone(), 0, PageSelection::default(), tmp.path());

    let out = extract(&input, &config).await.unwrap();

    assert_eq!(out.file_name, "receipt");
    assert_eq!(out.csv, vec!["Item,Amount\npage 0,10.00\n".to_string()]);
    assert!(!out.csv[0].contains('\r'));
    assert_eq!(extractor.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn all_pages_come_back_in_document_order() {
    let tmp = tempfile::tempdir().unwrap();
    let config = ExtractionConfig::builder()
        .pages(PageSelection::All)
        .extractor(Arc::new(PageEcho::default()))
        .rasterizer(Arc::new(FakeRasterizer { pages: 5 }))
        .concurrency(2)
        .cache_dir(tmp.path())
        .build()
        .unwrap();

    let out = extract_from_bytes(b"%PDF-1.7".to_vec(), "statement.pdf", &config)
        .await
        .unwrap();

    assert_eq!(out.csv.len(), 5);
    for (i, csv) in out.csv.iter().enumerate() {
        assert!(csv.contains(&format!("page {i}")), "page {i}: {csv}");
    }
    assert_eq!(out.stats.total_pages, 5);
    assert_eq!(out.stats.pages_with_tables, 5);
}

#[tokio::test]
async fn selected_page_only() {
    let tmp = tempfile::tempdir().unwrap();
    let config = config_with(
        Arc::new(PageEcho::default()),
        5,
        PageSelection::Set(vec![2]),
        tmp.path(),
    );

    let out = extract_from_bytes(b"%PDF".to_vec(), "doc.pdf", &config)
        .await
        .unwrap();

    assert_eq!(out.csv.len(), 1);
    assert!(out.csv[0].contains("page 2"));
    assert_eq!(out.pages[0].page_index, 2);
}

#[tokio::test]
async fn out_of_range_selection_is_empty_not_an_error() {
    let tmp = tempfile::tempdir().unwrap();
    let extractor = Arc::new(PageEcho::default());
    let config = config_with(
        extractor.clone(),
        5,
        PageSelection::Set(vec![99]),
        tmp.path(),
    );

    let out = extract_from_bytes(b"%PDF".to_vec(), "doc.pdf", &config)
        .await
        .unwrap();

    assert!(out.csv.is_empty());
    assert_eq!(out.stats.skipped_pages, 1);
    assert_eq!(extractor.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn page_without_table_is_empty_csv() {
    let tmp = tempfile::tempdir().unwrap();
    let config = config_with(Arc::new(NoTables), 1, PageSelection::default(), tmp.path());

    let out = extract_from_bytes(b"%PDF".to_vec(), "blank.pdf", &config)
        .await
        .unwrap();

    assert_eq!(out.csv, vec![String::new()]);
    assert_eq!(out.pages[0].outcome, PageOutcome::NoTable);
    assert_eq!(out.stats.pages_with_tables, 0);
}

#[tokio::test]
async fn persistent_failure_fails_the_whole_run() {
    let tmp = tempfile::tempdir().unwrap();
    let extractor = Arc::new(AlwaysDown::default());
    let config = config_with(extractor.clone(), 3, PageSelection::All, tmp.path());

    let err = extract_from_bytes(b"%PDF".to_vec(), "doc.pdf", &config)
        .await
        .unwrap_err();

    match err {
        Pdf2CsvError::PageFailed { attempts, .. } => assert_eq!(attempts, 3),
        other => panic!("expected PageFailed, got {other:?}"),
    }
    assert_eq!(extractor.calls.load(Ordering::SeqCst), 9);
}

#[tokio::test]
async fn failed_run_writes_nothing_to_cache() {
    let tmp = tempfile::tempdir().unwrap();
    let cache_dir = tmp.path().join("cache");
    let input = write_input(tmp.path(), "doc.pdf", b"%PDF");
    let config = config_with(
        Arc::new(AlwaysDown::default()),
        2,
        PageSelection::All,
        &cache_dir,
    );

    assert!(extract_cached(&input, &config).await.is_err());
    assert_eq!(std::fs::read_dir(&cache_dir).unwrap().count(), 0);
}

#[tokio::test]
async fn cancelled_before_dispatch() {
    let tmp = tempfile::tempdir().unwrap();
    let extractor = Arc::new(PageEcho::default());
    let cancel = CancelToken::new();
    cancel.cancel();
    let config = ExtractionConfig::builder()
        .pages(PageSelection::All)
        .extractor(extractor.clone())
        .rasterizer(Arc::new(FakeRasterizer { pages: 3 }))
        .cancel_token(cancel)
        .cache_dir(tmp.path())
        .build()
        .unwrap();

    let err = extract_from_bytes(b"%PDF".to_vec(), "doc.pdf", &config)
        .await
        .unwrap_err();

    assert!(matches!(err, Pdf2CsvError::Cancelled));
    assert_eq!(extractor.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn second_cached_run_skips_extraction() {
    let tmp = tempfile::tempdir().unwrap();
    let cache_dir = tmp.path().join("csv_output");
    let input = write_input(tmp.path(), "statement.pdf", b"%PDF-1.7 one");
    let extractor = Arc::new(PageEcho::default());
    let config = config_with(extractor.clone(), 3, PageSelection::All, &cache_dir);

    let first = extract_cached(&input, &config).await.unwrap();
    assert_eq!(first.source, ResultSource::Extracted);
    assert_eq!(extractor.calls.load(Ordering::SeqCst), 3);

    let second = extract_cached(&input, &config).await.unwrap();
    assert_eq!(second.source, ResultSource::Cache);
    assert_eq!(second.csv, first.csv);
    assert_eq!(extractor.calls.load(Ordering::SeqCst), 3);

    assert_eq!(std::fs::read_dir(&cache_dir).unwrap().count(), 3);
}

#[tokio::test]
async fn content_key_separates_same_named_files() {
    let tmp = tempfile::tempdir().unwrap();
    let cache_dir = tmp.path().join("cache");
    let a_dir = tmp.path().join("a");
    let b_dir = tmp.path().join("b");
    std::fs::create_dir_all(&a_dir).unwrap();
    std::fs::create_dir_all(&b_dir).unwrap();
    let a = write_input(&a_dir, "report.pdf", b"%PDF first");
    let b = write_input(&b_dir, "report.pdf", b"%PDF second");

    let extractor = Arc::new(PageEcho::default());
    let config = config_with(extractor.clone(), 1, PageSelection::default(), &cache_dir);

    extract_cached(&a, &config).await.unwrap();
    let out = extract_cached(&b, &config).await.unwrap();

    assert_eq!(out.source, ResultSource::Extracted);
    assert_eq!(extractor.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn filename_key_shares_entries_between_same_named_files() {
    let tmp = tempfile::tempdir().unwrap();
    let cache_dir = tmp.path().join("cache");
    let a_dir = tmp.path().join("a");
    let b_dir = tmp.path().join("b");
    std::fs::create_dir_all(&a_dir).unwrap();
    std::fs::create_dir_all(&b_dir).unwrap();
    let a = write_input(&a_dir, "report.pdf", b"%PDF first");
    let b = write_input(&b_dir, "report.pdf", b"%PDF second");

    let extractor = Arc::new(PageEcho::default());
    let config = ExtractionConfig::builder()
        .extractor(extractor.clone())
        .rasterizer(Arc::new(FakeRasterizer { pages: 1 }))
        .cache_dir(&cache_dir)
        .cache_key(CacheKeyMode::FileName)
        .build()
        .unwrap();

    let first = extract_cached(&a, &config).await.unwrap();
    let second = extract_cached(&b, &config).await.unwrap();

    assert_eq!(second.source, ResultSource::Cache);
    assert_eq!(second.csv, first.csv);
    assert_eq!(extractor.calls.load(Ordering::SeqCst), 1);
    assert!(cache_dir
        .join("e98d2f001da5678b39482efbdf5770dc_0.csv")
        .exists());
}

#[tokio::test]
async fn missing_file_is_reported() {
    let tmp = tempfile::tempdir().unwrap();
    let config = config_with(
        Arc::new(PageEcho::default()),
        1,
        PageSelection::default(),
        tmp.path(),
    );

    let err = extract(tmp.path().join("nope.pdf").to_string_lossy(), &config)
        .await
        .unwrap_err();

    assert!(matches!(err, Pdf2CsvError::FileNotFound { .. }));
}
