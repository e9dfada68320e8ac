//! Configuration types for table extraction.
//!
//! All extraction behaviour is controlled through [`ExtractionConfig`], built
//! via its [`ExtractionConfigBuilder`]. The cache directory lives here too, so
//! nothing in the library writes to a path the caller did not choose.

use crate::error::Pdf2CsvError;
use crate::pipeline::extract::{CancelToken, TableExtractor};
use crate::pipeline::render::PageRasterizer;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Default directory for cache entries, relative to the working directory.
pub const DEFAULT_CACHE_DIR: &str = "csv_output";

/// Configuration for a table extraction run.
///
/// # Example
/// ```rust
/// use pdf2csv::{ExtractionConfig, PageSelection};
///
/// let config = ExtractionConfig::builder()
///     .pages(PageSelection::All)
///     .concurrency(4)
///     .cache_dir("/tmp/pdf2csv-cache")
///     .build()
///     .unwrap();
/// assert_eq!(config.concurrency, 4);
/// ```
#[derive(Clone)]
pub struct ExtractionConfig {
    /// Which PDF pages to extract. Default: first page only.
    pub pages: PageSelection,

    /// Maximum rendered image dimension (width or height) in pixels. Default: 2000.
    pub max_rendered_pixels: u32,

    /// Number of pages sent to the extraction service at once. Default: 10.
    pub concurrency: usize,

    /// Retry policy applied to every page. Default: 3 attempts, 500 ms base backoff.
    pub retry: RetryPolicy,

    /// Per-call timeout for the extraction service in seconds. Default: 60.
    pub api_timeout_secs: u64,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Directory for cache entries. Default: `csv_output`.
    pub cache_dir: PathBuf,

    /// How cache entries are keyed. Default: [`CacheKeyMode::Content`].
    pub cache_key: CacheKeyMode,

    /// LLM model identifier for the default vision extractor.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "ollama").
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Pre-constructed extractor. Takes precedence over every provider setting.
    pub extractor: Option<Arc<dyn TableExtractor>>,

    /// Custom system prompt for the vision extractor.
    pub system_prompt: Option<String>,

    /// Maximum tokens the model may generate per page. Default: 4096.
    pub max_tokens: usize,

    /// Pre-constructed rasteriser. Default: pdfium.
    pub rasterizer: Option<Arc<dyn PageRasterizer>>,

    /// Explicit pdfium library path. Falls back to `PDFIUM_LIB_PATH`, then
    /// the working directory, then the system library search path.
    pub pdfium_lib_path: Option<PathBuf>,

    /// Cancels outstanding page extractions when triggered.
    pub cancel: CancelToken,

    /// Optional per-page progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            pages: PageSelection::default(),
            max_rendered_pixels: 2000,
            concurrency: 10,
            retry: RetryPolicy::default(),
            api_timeout_secs: 60,
            download_timeout_secs: 120,
            password: None,
            cache_dir: PathBuf::from(DEFAULT_CACHE_DIR),
            cache_key: CacheKeyMode::default(),
            model: None,
            provider_name: None,
            provider: None,
            extractor: None,
            system_prompt: None,
            max_tokens: 4096,
            rasterizer: None,
            pdfium_lib_path: None,
            cancel: CancelToken::new(),
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ExtractionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfig")
            .field("pages", &self.pages)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("concurrency", &self.concurrency)
            .field("retry", &self.retry)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("download_timeout_secs", &self.download_timeout_secs)
            .field("cache_dir", &self.cache_dir)
            .field("cache_key", &self.cache_key)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("extractor", &self.extractor.as_ref().map(|_| "<dyn TableExtractor>"))
            .field("rasterizer", &self.rasterizer.as_ref().map(|_| "<dyn PageRasterizer>"))
            .field("max_tokens", &self.max_tokens)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

impl ExtractionConfig {
    /// Create a new builder for `ExtractionConfig`.
    pub fn builder() -> ExtractionConfigBuilder {
        ExtractionConfigBuilder {
            config: Self::default(),
        }
    }

    pub(crate) fn api_timeout(&self) -> Duration {
        Duration::from_secs(self.api_timeout_secs)
    }
}

/// Builder for [`ExtractionConfig`].
#[derive(Debug)]
pub struct ExtractionConfigBuilder {
    config: ExtractionConfig,
}

impl ExtractionConfigBuilder {
    pub fn pages(mut self, selection: PageSelection) -> Self {
        self.config.pages = selection;
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.config.retry = policy;
        self
    }

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.config.retry.max_attempts = n;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.cache_dir = dir.into();
        self
    }

    pub fn cache_key(mut self, mode: CacheKeyMode) -> Self {
        self.config.cache_key = mode;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn extractor(mut self, extractor: Arc<dyn TableExtractor>) -> Self {
        self.config.extractor = Some(extractor);
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn rasterizer(mut self, rasterizer: Arc<dyn PageRasterizer>) -> Self {
        self.config.rasterizer = Some(rasterizer);
        self
    }

    pub fn pdfium_lib_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pdfium_lib_path = Some(path.into());
        self
    }

    pub fn cancel_token(mut self, token: CancelToken) -> Self {
        self.config.cancel = token;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExtractionConfig, Pdf2CsvError> {
        let c = &self.config;
        if c.retry.max_attempts == 0 {
            return Err(Pdf2CsvError::InvalidConfig(
                "Retry policy needs at least 1 attempt".into(),
            ));
        }
        if c.api_timeout_secs == 0 {
            return Err(Pdf2CsvError::InvalidConfig(
                "API timeout must be ≥ 1 second".into(),
            ));
        }
        if c.cache_dir.as_os_str().is_empty() {
            return Err(Pdf2CsvError::InvalidConfig(
                "Cache directory must not be empty".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Retry policy ─────────────────────────────────────────────────────────

/// How many times a page is sent to the extraction service, and how long to
/// wait in between.
///
/// The delay before attempt `n` (1-based, `n ≥ 2`) is
/// `initial_backoff_ms * 2^(n-2)`, capped at `max_backoff_ms`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Default: 3.
    pub max_attempts: u32,
    /// Delay before the second attempt. Default: 500.
    pub initial_backoff_ms: u64,
    /// Upper bound for any single delay. Default: 10 000.
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 10_000,
        }
    }
}

impl RetryPolicy {
    /// A policy that retries without sleeping. Useful in tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_backoff_ms: 0,
            max_backoff_ms: 0,
        }
    }

    /// Delay to wait before `attempt` (1-based). Zero for the first attempt.
    pub fn backoff(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let factor = 2u64.saturating_pow(attempt - 2);
        let ms = self
            .initial_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Specifies which pages of a PDF to extract. Page numbers are 0-indexed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageSelection {
    /// Every page of the document.
    All,
    /// Specific pages; indices past the end are skipped.
    Set(Vec<usize>),
}

impl Default for PageSelection {
    fn default() -> Self {
        PageSelection::Set(vec![0])
    }
}

impl PageSelection {
    /// Map the CLI flags onto a selection: `--all_pages` wins, then an
    /// explicit list, then the first page.
    pub fn from_flags(all_pages: bool, selected: Option<Vec<usize>>) -> Self {
        if all_pages {
            return PageSelection::All;
        }
        match selected {
            Some(pages) if !pages.is_empty() => PageSelection::Set(pages),
            _ => PageSelection::default(),
        }
    }

    /// Expand into the 0-indexed pages to render, in document order.
    ///
    /// Out-of-range indices are dropped rather than reported.
    pub fn to_indices(&self, total_pages: usize) -> Vec<usize> {
        match self {
            PageSelection::All => (0..total_pages).collect(),
            PageSelection::Set(pages) => (0..total_pages).filter(|i| pages.contains(i)).collect(),
        }
    }
}

/// How cache entries are named.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CacheKeyMode {
    /// SHA-256 of the input bytes. Two files with the same name but different
    /// content get different entries. (default)
    #[default]
    Content,
    /// MD5 of the base filename (no extension). Compatible with caches written
    /// by earlier versions; files sharing a name share entries.
    FileName,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_selection_is_first_page() {
        assert_eq!(PageSelection::default().to_indices(5), vec![0]);
        assert_eq!(PageSelection::from_flags(false, None).to_indices(5), vec![0]);
    }

    #[test]
    fn all_pages_flag_wins_over_list() {
        let sel = PageSelection::from_flags(true, Some(vec![3]));
        assert_eq!(sel, PageSelection::All);
        assert_eq!(sel.to_indices(3), vec![0, 1, 2]);
    }

    #[test]
    fn selected_pages_keep_document_order_and_dedupe() {
        let sel = PageSelection::Set(vec![4, 2, 2, 0]);
        assert_eq!(sel.to_indices(5), vec![0, 2, 4]);
    }

    #[test]
    fn out_of_range_pages_are_skipped() {
        assert_eq!(PageSelection::Set(vec![99]).to_indices(5), Vec::<usize>::new());
        assert_eq!(PageSelection::Set(vec![2]).to_indices(5), vec![2]);
        assert_eq!(PageSelection::All.to_indices(0), Vec::<usize>::new());
    }

    #[test]
    fn retry_backoff_doubles_and_caps() {
        let p = RetryPolicy {
            max_attempts: 5,
            initial_backoff_ms: 500,
            max_backoff_ms: 1500,
        };
        assert_eq!(p.backoff(1), Duration::ZERO);
        assert_eq!(p.backoff(2), Duration::from_millis(500));
        assert_eq!(p.backoff(3), Duration::from_millis(1000));
        assert_eq!(p.backoff(4), Duration::from_millis(1500));
    }

    #[test]
    fn build_rejects_zero_attempts() {
        let err = ExtractionConfig::builder().max_attempts(0).build().unwrap_err();
        assert!(matches!(err, Pdf2CsvError::InvalidConfig(_)));
    }

    #[test]
    fn builder_clamps_concurrency() {
        let c = ExtractionConfig::builder().concurrency(0).build().unwrap();
        assert_eq!(c.concurrency, 1);
    }

    #[test]
    fn defaults() {
        let c = ExtractionConfig::default();
        assert_eq!(c.retry.max_attempts, 3);
        assert_eq!(c.cache_dir, PathBuf::from("csv_output"));
        assert_eq!(c.cache_key, CacheKeyMode::Content);
    }
}
