//! Input resolution: turn a user-supplied path or URL into bytes plus a name.
//!
//! The whole document is held in memory. pdfium can load from a byte slice,
//! so URL inputs never touch the file system.

use crate::error::Pdf2CsvError;
use reqwest::Url;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Fallback name for URLs whose path has no usable last segment.
const DOWNLOAD_FALLBACK_NAME: &str = "download";

/// Broad kind of input document, decided by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Pdf,
    Image,
}

impl DocumentKind {
    /// `.pdf` (any case) is a PDF; every other extension is treated as an image.
    pub fn from_extension(ext: &str) -> Self {
        if ext.eq_ignore_ascii_case("pdf") {
            DocumentKind::Pdf
        } else {
            DocumentKind::Image
        }
    }
}

/// A fully loaded input document.
#[derive(Debug, Clone)]
pub struct ResolvedInput {
    pub bytes: Vec<u8>,
    /// Base filename without extension, e.g. `report` for `/tmp/report.pdf`.
    pub file_name: String,
    /// Lower-cased extension without the dot; empty when there is none.
    pub extension: String,
    pub kind: DocumentKind,
}

impl ResolvedInput {
    /// Build from in-memory bytes and the name the document should go by.
    pub fn from_bytes(bytes: Vec<u8>, name: &str) -> Self {
        let (file_name, extension) = split_name(name);
        let kind = DocumentKind::from_extension(&extension);
        Self {
            bytes,
            file_name,
            extension,
            kind,
        }
    }
}

/// True when the input parses as a URL with both a scheme and a host.
///
/// Windows drive paths (`C:\doc.pdf`) parse with a one-letter scheme but no
/// host, so they stay local.
pub fn is_url(input: &str) -> bool {
    match Url::parse(input) {
        Ok(url) => !url.scheme().is_empty() && url.host_str().is_some_and(|h| !h.is_empty()),
        Err(_) => false,
    }
}

/// Resolve the input string to document bytes.
pub async fn resolve_input(input: &str, timeout_secs: u64) -> Result<ResolvedInput, Pdf2CsvError> {
    if is_url(input) {
        download_url(input, timeout_secs).await
    } else {
        read_local(input).await
    }
}

/// Read a local file into memory.
async fn read_local(path_str: &str) -> Result<ResolvedInput, Pdf2CsvError> {
    let path = PathBuf::from(path_str);

    let bytes = tokio::fs::read(&path).await.map_err(|e| match e.kind() {
        ErrorKind::PermissionDenied => Pdf2CsvError::PermissionDenied { path: path.clone() },
        _ => Pdf2CsvError::FileNotFound { path: path.clone() },
    })?;

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    debug!("Read local input: {} ({} bytes)", path.display(), bytes.len());
    Ok(ResolvedInput::from_bytes(bytes, &name))
}

/// Fetch a URL with a plain GET.
async fn download_url(url: &str, timeout_secs: u64) -> Result<ResolvedInput, Pdf2CsvError> {
    info!("Downloading input from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| Pdf2CsvError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            Pdf2CsvError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            Pdf2CsvError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    })?;

    if !response.status().is_success() {
        return Err(Pdf2CsvError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| Pdf2CsvError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    info!("Downloaded {} bytes", bytes.len());
    Ok(ResolvedInput::from_bytes(bytes.to_vec(), &url_file_name(url)))
}

/// Last non-empty segment of the URL path, ignoring query and fragment.
pub fn url_file_name(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|parsed| {
            parsed
                .path_segments()
                .and_then(|mut segments| segments.next_back().map(str::to_string))
        })
        .filter(|last| !last.is_empty())
        .unwrap_or_else(|| DOWNLOAD_FALLBACK_NAME.to_string())
}

/// Split `report.final.PDF` into (`report.final`, `pdf`).
pub fn split_name(name: &str) -> (String, String) {
    let path = Path::new(name);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    (stem, ext)
}
