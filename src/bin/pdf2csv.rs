//! CLI binary for pdf2csv.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `ExtractionConfig`, writes the CSV files and prints them.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use pdf2csv::{
    extract, extract_cached, output_file_name, write_outputs, CacheKeyMode, ExtractionConfig,
    ExtractionOutput, ExtractionProgressCallback, PageSelection, ProgressCallback, ResultSource,
    RetryPolicy,
};
use std::collections::HashMap;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Progress bar plus one log line per page. Pages finish out of order, so
/// start times are tracked per page.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<usize, Instant>>,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.set_prefix("Preparing");
        bar.set_message("Rendering pages…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
        })
    }

    fn elapsed_secs(&self, page_index: usize) -> f64 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut t| t.remove(&page_index))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl ExtractionProgressCallback for CliProgressCallback {
    fn on_extraction_start(&self, total_pages: usize) {
        self.bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.cyan} {prefix:.bold}  [{bar:42.green/238}] {pos:>3}/{len} pages  ⏱ {elapsed_precise}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▉▊▋▌▍▎▏  "),
        );
        self.bar.set_length(total_pages as u64);
        self.bar.set_prefix("Extracting");
    }

    fn on_page_start(&self, page_index: usize, _total: usize) {
        if let Ok(mut t) = self.start_times.lock() {
            t.insert(page_index, Instant::now());
        }
        self.bar.set_message(format!("page {page_index}"));
    }

    fn on_page_complete(&self, page_index: usize, _total: usize, csv_len: usize) {
        let secs = self.elapsed_secs(page_index);
        let detail = if csv_len == 0 {
            "no table".to_string()
        } else {
            format!("{csv_len:>5} bytes")
        };
        self.bar.println(format!(
            "  {} Page {:>3}  {:<10}  {}",
            green("✓"),
            page_index,
            dim(&detail),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_page_error(&self, page_index: usize, _total: usize, error: &str) {
        let secs = self.elapsed_secs(page_index);
        let msg: String = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} Page {:>3}  {}  {}",
            red("✗"),
            page_index,
            red(&msg),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_extraction_complete(&self, _total_pages: usize, _success_count: usize) {
        self.bar.finish_and_clear();
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # First page of a PDF (default)
  pdf2csv statement.pdf

  # Every page
  pdf2csv statement.pdf --all_pages

  # Pages 0 and 2 (0-indexed)
  pdf2csv statement.pdf --selected_pages 0 2

  # A scanned image
  pdf2csv receipt.png

  # From a URL, cached in ./csv_output
  pdf2csv https://example.com/report.pdf --all_pages --cache

OUTPUT:
  Default:  <name>_output_table_<n>.csv in --output-dir (n starts at 1)
  --cache:  <hash>_<index>.csv in --cache-dir (index starts at 0); an
            existing entry for the same input is returned without calling
            the extraction service

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_PROVIDER      Provider for --provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Model for --model
  PDFIUM_LIB_PATH         Path to libpdfium (file or directory)
"#;

/// Extract tables from PDF or image files and convert them to CSV.
#[derive(Parser, Debug)]
#[command(
    name = "pdf2csv",
    version,
    about = "Extract tables from PDF or image files and convert them to CSV.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Path to the input PDF or image file or URL.
    file: String,

    /// Extract tables from all pages of the PDF file.
    #[arg(long = "all_pages", visible_alias = "all-pages")]
    all_pages: bool,

    /// Pages to extract tables from (0-indexed).
    #[arg(long = "selected_pages", visible_alias = "selected-pages", num_args = 1..)]
    selected_pages: Option<Vec<usize>>,

    /// Directory for the `<name>_output_table_<n>.csv` files.
    #[arg(short, long, env = "PDF2CSV_OUTPUT_DIR", default_value = ".")]
    output_dir: PathBuf,

    /// Use the on-disk cache instead of writing named output files.
    #[arg(long, env = "PDF2CSV_CACHE")]
    cache: bool,

    /// Cache directory used with --cache.
    #[arg(long, env = "PDF2CSV_CACHE_DIR", default_value = "csv_output")]
    cache_dir: PathBuf,

    /// Cache key: content (hash of the file bytes) or filename (hash of the name).
    #[arg(long, env = "PDF2CSV_CACHE_KEY", value_enum, default_value = "content")]
    cache_key: CacheKeyArg,

    /// Number of pages sent to the extraction service at once.
    #[arg(short, long, env = "PDF2CSV_CONCURRENCY", default_value_t = 10)]
    concurrency: usize,

    /// Attempts per page before giving up.
    #[arg(long, env = "PDF2CSV_MAX_ATTEMPTS", default_value_t = 3,
          value_parser = clap::value_parser!(u32).range(1..))]
    max_attempts: u32,

    /// Initial retry delay in milliseconds (doubles each retry).
    #[arg(long, env = "PDF2CSV_RETRY_BACKOFF_MS", default_value_t = 500)]
    retry_backoff_ms: u64,

    /// Per-call extraction timeout in seconds.
    #[arg(long, env = "PDF2CSV_API_TIMEOUT", default_value_t = 60,
          value_parser = clap::value_parser!(u64).range(1..))]
    api_timeout: u64,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "PDF2CSV_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Maximum rendered page edge in pixels.
    #[arg(long, env = "PDF2CSV_MAX_PIXELS", default_value_t = 2000)]
    max_pixels: u32,

    /// LLM model ID (e.g. gpt-4.1-mini, claude-sonnet-4-20250514).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "PDF2CSV_PASSWORD")]
    password: Option<String>,

    /// Path to libpdfium (file or directory).
    #[arg(long, env = "PDFIUM_LIB_PATH")]
    pdfium_lib: Option<PathBuf>,

    /// Print the full result as JSON instead of CSV blocks.
    #[arg(long, env = "PDF2CSV_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "PDF2CSV_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PDF2CSV_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "PDF2CSV_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Debug)]
enum CacheKeyArg {
    Content,
    Filename,
}

impl From<CacheKeyArg> for CacheKeyMode {
    fn from(v: CacheKeyArg) -> Self {
        match v {
            CacheKeyArg::Content => CacheKeyMode::Content,
            CacheKeyArg::Filename => CacheKeyMode::FileName,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // While the progress bar is visible only errors are logged; the bar
    // already reports every page.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn ExtractionProgressCallback>)
    } else {
        None
    };

    let config = build_config(&cli, progress_cb)?;

    // ── Run extraction ───────────────────────────────────────────────────
    let output = if cli.cache {
        extract_cached(&cli.file, &config)
            .await
            .context("Extraction failed")?
    } else {
        let output = extract(&cli.file, &config)
            .await
            .context("Extraction failed")?;
        write_outputs(&output.file_name, &output.csv, &cli.output_dir)
            .await
            .context("Failed to write CSV files")?;
        output
    };

    if cli.json {
        let json = serde_json::to_string_pretty(&output).context("Failed to serialise output")?;
        println!("{json}");
    } else {
        print_csv(&output).context("Failed to write to stdout")?;
    }

    if !cli.quiet && !cli.json {
        print_summary(&cli, &output);
    }

    Ok(())
}

/// Map CLI args to `ExtractionConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ExtractionConfig> {
    let retry = RetryPolicy {
        max_attempts: cli.max_attempts,
        initial_backoff_ms: cli.retry_backoff_ms,
        ..RetryPolicy::default()
    };

    let mut builder = ExtractionConfig::builder()
        .pages(PageSelection::from_flags(
            cli.all_pages,
            cli.selected_pages.clone(),
        ))
        .concurrency(cli.concurrency)
        .retry(retry)
        .api_timeout_secs(cli.api_timeout)
        .download_timeout_secs(cli.download_timeout)
        .max_rendered_pixels(cli.max_pixels)
        .cache_dir(cli.cache_dir.clone())
        .cache_key(cli.cache_key.clone().into());

    if let Some(ref model) = cli.model {
        builder = builder.model(model.clone());
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider.clone());
    }
    if let Some(ref password) = cli.password {
        builder = builder.password(password.clone());
    }
    if let Some(ref lib) = cli.pdfium_lib {
        builder = builder.pdfium_lib_path(lib.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

/// Print each page's CSV under a `CSV Output n:` heading.
fn print_csv(output: &ExtractionOutput) -> io::Result<()> {
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    for (i, csv) in output.csv.iter().enumerate() {
        writeln!(handle, "CSV Output {}:", i + 1)?;
        writeln!(handle, "{csv}")?;
        writeln!(handle)?;
    }
    Ok(())
}

fn print_summary(cli: &Cli, output: &ExtractionOutput) {
    let pages = output.csv.len();
    match output.source {
        ResultSource::Cache => eprintln!(
            "{} {} page(s) from cache in {}",
            green("✔"),
            bold(&pages.to_string()),
            bold(&cli.cache_dir.display().to_string()),
        ),
        ResultSource::Extracted => {
            let stats = &output.stats;
            eprintln!(
                "{} {}/{} page(s) with tables  {}",
                green("✔"),
                bold(&stats.pages_with_tables.to_string()),
                pages,
                dim(&format!("{}ms", stats.total_duration_ms)),
            );
            if stats.skipped_pages > 0 {
                eprintln!(
                    "  {} selected page(s) beyond the last page were skipped",
                    stats.skipped_pages
                );
            }
            if cli.cache {
                eprintln!("  cached in {}", cli.cache_dir.display());
            } else if pages > 0 {
                eprintln!(
                    "  → {}",
                    cli.output_dir
                        .join(output_file_name(&output.file_name, 1))
                        .display()
                );
            }
        }
    }
}
