//! Table extraction: send page images to the extraction service, with retry,
//! timeout, and cancellation, on a bounded pool of concurrent calls.
//!
//! The service sits behind the [`TableExtractor`] trait. The default
//! implementation, [`VisionTableExtractor`], asks a vision-language model
//! (through `edgequake-llm`) to transcribe the page's tables as JSON.
//!
//! ## Retry Strategy
//!
//! Every failure (transport error, unparsable answer, timeout) is retried
//! until [`RetryPolicy::max_attempts`] is reached, sleeping
//! [`RetryPolicy::backoff`] in between. A page that never succeeds carries a
//! [`PageError`] in its [`PageResult`]; it is up to the caller to escalate.

use crate::config::{ExtractionConfig, RetryPolicy};
use crate::error::{ExtractError, PageError, Pdf2CsvError};
use crate::output::{PageOutcome, PageResult, Table};
use crate::pipeline::tabulate::{parse_tables, table_to_csv};
use crate::prompts::{DEFAULT_SYSTEM_PROMPT, USER_INSTRUCTION};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider, ProviderFactory};
use futures::stream::{self, StreamExt};
use image::DynamicImage;
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::{debug, warn};

/// Model used when a provider is named without a model.
pub const DEFAULT_MODEL: &str = "gpt-4.1-mini";

/// The external table-extraction capability.
///
/// One call is one attempt; retries are handled by the pipeline. Return an
/// empty `Vec` when the page has no table.
#[async_trait]
pub trait TableExtractor: Send + Sync {
    async fn extract_tables(&self, page: &DynamicImage) -> Result<Vec<Table>, ExtractError>;
}

// ── Cancellation ─────────────────────────────────────────────────────────

/// Cooperative cancellation shared between the caller and page tasks.
///
/// Clones share state: cancelling any clone cancels them all.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelState>,
}

#[derive(Debug, Default)]
struct CancelState {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once [`cancel`](Self::cancel) has been called.
    pub async fn cancelled(&self) {
        let notified = self.inner.notify.notified();
        tokio::pin!(notified);
        // Register before checking the flag so a concurrent cancel is not missed.
        notified.as_mut().enable();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}

// ── Per-page retry loop ──────────────────────────────────────────────────

enum AttemptFailure {
    Service(String),
    Timeout,
}

/// Extract the first table of one page, retrying per `policy`.
///
/// Always returns a `PageResult`; failures are recorded in `result.error`.
/// At least one attempt is made whatever `policy.max_attempts` says.
pub async fn extract_page(
    extractor: &dyn TableExtractor,
    page_index: usize,
    image: &DynamicImage,
    policy: &RetryPolicy,
    timeout: Duration,
    cancel: &CancelToken,
) -> PageResult {
    let start = Instant::now();
    let mut last_failure = AttemptFailure::Service("no attempt made".to_string());
    let mut attempts = 0;
    let max_attempts = policy.max_attempts.max(1);

    for attempt in 1..=max_attempts {
        if cancel.is_cancelled() {
            return cancelled(page_index, attempts, start);
        }

        let backoff = policy.backoff(attempt);
        if !backoff.is_zero() {
            warn!(
                "Page {}: retry {}/{} after {}ms",
                page_index,
                attempt,
                max_attempts,
                backoff.as_millis()
            );
            tokio::select! {
                _ = cancel.cancelled() => return cancelled(page_index, attempts, start),
                _ = tokio::time::sleep(backoff) => {}
            }
        }

        attempts = attempt;
        let outcome = tokio::select! {
            _ = cancel.cancelled() => return cancelled(page_index, attempts, start),
            r = tokio::time::timeout(timeout, extractor.extract_tables(image)) => r,
        };

        let tables = match outcome {
            Ok(Ok(tables)) => tables,
            Ok(Err(e)) => {
                warn!("Page {}: attempt {} failed — {}", page_index, attempt, e);
                last_failure = AttemptFailure::Service(e.to_string());
                continue;
            }
            Err(_) => {
                warn!(
                    "Page {}: attempt {} timed out after {}s",
                    page_index,
                    attempt,
                    timeout.as_secs()
                );
                last_failure = AttemptFailure::Timeout;
                continue;
            }
        };

        let (csv, outcome) = match tables.first() {
            Some(first) => match table_to_csv(first) {
                Ok(csv) => (csv, PageOutcome::Table),
                Err(e) => {
                    last_failure = AttemptFailure::Service(format!("CSV rendering failed: {e}"));
                    continue;
                }
            },
            None => (String::new(), PageOutcome::NoTable),
        };

        debug!(
            "Page {}: {} table(s), {} bytes of CSV, attempt {}",
            page_index,
            tables.len(),
            csv.len(),
            attempt
        );

        return PageResult {
            page_index,
            csv,
            outcome,
            tables_found: tables.len(),
            attempts,
            duration_ms: start.elapsed().as_millis() as u64,
            error: None,
        };
    }

    let error = match last_failure {
        AttemptFailure::Timeout => PageError::Timeout {
            page: page_index,
            attempts,
            secs: timeout.as_secs(),
        },
        AttemptFailure::Service(detail) => PageError::ExtractionFailed {
            page: page_index,
            attempts,
            detail,
        },
    };

    failed(page_index, attempts, start, error)
}

fn cancelled(page_index: usize, attempts: u32, start: Instant) -> PageResult {
    failed(
        page_index,
        attempts,
        start,
        PageError::Cancelled { page: page_index },
    )
}

fn failed(page_index: usize, attempts: u32, start: Instant, error: PageError) -> PageResult {
    PageResult {
        page_index,
        csv: String::new(),
        outcome: PageOutcome::NoTable,
        tables_found: 0,
        attempts,
        duration_ms: start.elapsed().as_millis() as u64,
        error: Some(error),
    }
}

/// Extract every page, at most `config.concurrency` at a time.
///
/// Results come back in the order of `pages`, whatever order they finish in.
pub async fn extract_pages(
    extractor: Arc<dyn TableExtractor>,
    pages: Vec<(usize, DynamicImage)>,
    config: &ExtractionConfig,
) -> Vec<PageResult> {
    let total = pages.len();
    let timeout = config.api_timeout();

    if let Some(ref cb) = config.progress_callback {
        cb.on_extraction_start(total);
    }

    let results: Vec<PageResult> = stream::iter(pages.into_iter().map(|(idx, image)| {
        let extractor = Arc::clone(&extractor);
        let policy = config.retry;
        let cancel = config.cancel.clone();
        let progress = config.progress_callback.clone();
        async move {
            if let Some(ref cb) = progress {
                cb.on_page_start(idx, total);
            }
            let result =
                extract_page(extractor.as_ref(), idx, &image, &policy, timeout, &cancel).await;
            if let Some(ref cb) = progress {
                match &result.error {
                    None => cb.on_page_complete(idx, total, result.csv.len()),
                    Some(e) => cb.on_page_error(idx, total, &e.to_string()),
                }
            }
            result
        }
    }))
    .buffered(config.concurrency)
    .collect()
    .await;

    if let Some(ref cb) = config.progress_callback {
        cb.on_extraction_complete(total, results.iter().filter(|r| r.is_ok()).count());
    }

    results
}

// ── Vision-model extractor ───────────────────────────────────────────────

/// Extracts tables by asking a vision-language model to transcribe them.
pub struct VisionTableExtractor {
    provider: Arc<dyn LLMProvider>,
    system_prompt: String,
    max_tokens: usize,
}

impl VisionTableExtractor {
    pub fn new(provider: Arc<dyn LLMProvider>) -> Self {
        Self {
            provider,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            max_tokens: 4096,
        }
    }

    /// Build from the provider settings in `config`.
    pub fn from_config(config: &ExtractionConfig) -> Result<Self, Pdf2CsvError> {
        let provider = resolve_provider(config)?;
        Ok(Self {
            provider,
            system_prompt: config
                .system_prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            max_tokens: config.max_tokens,
        })
    }

    fn options(&self) -> CompletionOptions {
        CompletionOptions {
            temperature: Some(0.0),
            max_tokens: Some(self.max_tokens),
            ..Default::default()
        }
    }
}

#[async_trait]
impl TableExtractor for VisionTableExtractor {
    async fn extract_tables(&self, page: &DynamicImage) -> Result<Vec<Table>, ExtractError> {
        let image_data =
            encode_page(page).map_err(|e| ExtractError::Service(format!("PNG encoding failed: {e}")))?;

        let messages = vec![
            ChatMessage::system(self.system_prompt.as_str()),
            ChatMessage::user_with_images(USER_INSTRUCTION, vec![image_data]),
        ];

        let response = self
            .provider
            .chat(&messages, Some(&self.options()))
            .await
            .map_err(|e| ExtractError::Service(e.to_string()))?;

        debug!(
            "{} input tokens, {} output tokens",
            response.prompt_tokens, response.completion_tokens
        );

        parse_tables(&response.content)
    }
}

/// PNG-encode and base64-wrap a page image for a multimodal request.
///
/// PNG keeps digits and thin ruling lines crisp; `detail: "high"` lets
/// GPT-class models tile the image instead of reading a single 512 px
/// overview.
fn encode_page(img: &DynamicImage) -> Result<ImageData, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;

    let b64 = STANDARD.encode(&buf);
    debug!("Encoded image → {} bytes base64", b64.len());

    Ok(ImageData::new(b64, "image/png").with_detail("high"))
}

// ── Provider resolution ──────────────────────────────────────────────────

/// Pick the extractor for a run: an injected one, else a vision extractor.
pub fn resolve_extractor(config: &ExtractionConfig) -> Result<Arc<dyn TableExtractor>, Pdf2CsvError> {
    if let Some(ref extractor) = config.extractor {
        return Ok(Arc::clone(extractor));
    }
    Ok(Arc::new(VisionTableExtractor::from_config(config)?))
}

/// Resolve the LLM provider, from most-specific to least-specific:
///
/// 1. pre-built `config.provider`
/// 2. `config.provider_name` + `config.model`
/// 3. `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`, when both are set
/// 4. OpenAI, when `OPENAI_API_KEY` is set
/// 5. `ProviderFactory::from_env()` auto-detection
fn resolve_provider(config: &ExtractionConfig) -> Result<Arc<dyn LLMProvider>, Pdf2CsvError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);

    if let Some(ref name) = config.provider_name {
        return create_vision_provider(name, model);
    }

    if let (Ok(prov), Ok(env_model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !env_model.is_empty() {
            return create_vision_provider(&prov, &env_model);
        }
    }

    if std::env::var("OPENAI_API_KEY").is_ok_and(|k| !k.is_empty()) {
        return create_vision_provider("openai", model);
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| Pdf2CsvError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or pass --provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}

fn create_vision_provider(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, Pdf2CsvError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        Pdf2CsvError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};
    use std::sync::atomic::AtomicU32;
    use std::sync::Mutex;

    fn blank() -> DynamicImage {
        DynamicImage::ImageRgba8(RgbaImage::from_pixel(4, 4, Rgba([255, 255, 255, 255])))
    }

    /// Fails `failures` times, then returns one 1×1 table.
    struct Flaky {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl TableExtractor for Flaky {
        async fn extract_tables(&self, _page: &DynamicImage) -> Result<Vec<Table>, ExtractError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err(ExtractError::Service(format!("boom {n}")))
            } else {
                Ok(vec![Table::new(vec![vec!["ok".into()]])])
            }
        }
    }

    struct Stalls;

    #[async_trait]
    impl TableExtractor for Stalls {
        async fn extract_tables(&self, _page: &DynamicImage) -> Result<Vec<Table>, ExtractError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(vec![])
        }
    }

    #[tokio::test]
    async fn succeeds_on_last_attempt() {
        let ex = Flaky {
            failures: 2,
            calls: AtomicU32::new(0),
        };
        let r = extract_page(
            &ex,
            0,
            &blank(),
            &RetryPolicy::immediate(3),
            Duration::from_secs(5),
            &CancelToken::new(),
        )
        .await;
        assert!(r.is_ok(), "{:?}", r.error);
        assert_eq!(r.attempts, 3);
        assert_eq!(r.csv, "ok\n");
        assert_eq!(r.outcome, PageOutcome::Table);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let ex = Flaky {
            failures: 10,
            calls: AtomicU32::new(0),
        };
        let r = extract_page(
            &ex,
            7,
            &blank(),
            &RetryPolicy::immediate(3),
            Duration::from_secs(5),
            &CancelToken::new(),
        )
        .await;
        assert_eq!(ex.calls.load(Ordering::SeqCst), 3);
        match r.error {
            Some(PageError::ExtractionFailed { page, attempts, detail }) => {
                assert_eq!(page, 7);
                assert_eq!(attempts, 3);
                assert!(detail.contains("boom 2"), "{detail}");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn zero_attempt_policy_still_calls_once() {
        let ex = Flaky {
            failures: 0,
            calls: AtomicU32::new(0),
        };
        let r = extract_page(
            &ex,
            0,
            &blank(),
            &RetryPolicy::immediate(0),
            Duration::from_secs(5),
            &CancelToken::new(),
        )
        .await;
        assert!(r.is_ok(), "{:?}", r.error);
        assert_eq!(r.attempts, 1);
        assert_eq!(ex.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_is_reported() {
        let r = extract_page(
            &Stalls,
            1,
            &blank(),
            &RetryPolicy::immediate(2),
            Duration::from_secs(1),
            &CancelToken::new(),
        )
        .await;
        assert_eq!(
            r.error,
            Some(PageError::Timeout {
                page: 1,
                attempts: 2,
                secs: 1
            })
        );
    }

    #[tokio::test]
    async fn cancel_stops_a_stalled_call() {
        let cancel = CancelToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });
        let r = extract_page(
            &Stalls,
            0,
            &blank(),
            &RetryPolicy::immediate(3),
            Duration::from_secs(3600),
            &cancel,
        )
        .await;
        assert_eq!(r.error, Some(PageError::Cancelled { page: 0 }));
    }

    #[tokio::test]
    async fn cancelled_token_resolves_immediately() {
        let token = CancelToken::new();
        token.cancel();
        token.cancelled().await;
        assert!(token.is_cancelled());
    }

    /// Returns the page width as the single cell, after a delay that makes
    /// earlier pages finish last.
    struct WidthEcho {
        seen: Mutex<Vec<u32>>,
    }

    #[async_trait]
    impl TableExtractor for WidthEcho {
        async fn extract_tables(&self, page: &DynamicImage) -> Result<Vec<Table>, ExtractError> {
            let w = page.width();
            tokio::time::sleep(Duration::from_millis(50 / w as u64)).await;
            self.seen.lock().unwrap().push(w);
            Ok(vec![Table::new(vec![vec![w.to_string()]])])
        }
    }

    #[tokio::test]
    async fn results_keep_page_order() {
        let pages: Vec<(usize, DynamicImage)> = (0..5)
            .map(|i| {
                let img = RgbaImage::from_pixel(i as u32 + 1, 1, Rgba([0, 0, 0, 255]));
                (i, DynamicImage::ImageRgba8(img))
            })
            .collect();
        let echo = Arc::new(WidthEcho {
            seen: Mutex::new(Vec::new()),
        });
        let config = ExtractionConfig::builder().concurrency(5).build().unwrap();

        let results = extract_pages(echo.clone(), pages, &config).await;

        let csv: Vec<&str> = results.iter().map(|r| r.csv.as_str()).collect();
        assert_eq!(csv, vec!["1\n", "2\n", "3\n", "4\n", "5\n"]);
        assert_eq!(echo.seen.lock().unwrap().len(), 5);
    }

    #[test]
    fn encode_small_image() {
        let data = encode_page(&blank()).expect("encode should succeed");
        assert_eq!(data.mime_type, "image/png");
        let decoded = STANDARD.decode(&data.data).expect("valid base64");
        assert!(!decoded.is_empty());
    }
}
