//! Page images: split PDFs into single pages and rasterise them, or decode an
//! image input directly.
//!
//! Each selected page is first copied into its own one-page PDF and that
//! buffer is rendered, so a page never sees resources from its neighbours.
//! pdfium work is CPU-bound and not async-safe; it runs in
//! `tokio::task::spawn_blocking`.

use crate::config::PageSelection;
use crate::error::Pdf2CsvError;
use image::imageops::FilterType;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Pages rendered from one document.
#[derive(Debug)]
pub struct RenderedDocument {
    pub total_pages: usize,
    /// `(page_index_0based, image)` in document order.
    pub pages: Vec<(usize, DynamicImage)>,
    /// Selected indices that were past the end of the document.
    pub skipped: usize,
}

/// Turns PDF bytes into page images.
///
/// [`PdfiumRasterizer`] is the production implementation; tests substitute
/// their own to avoid needing a pdfium library.
pub trait PageRasterizer: Send + Sync {
    /// Number of pages in the document.
    fn page_count(&self, pdf: &[u8], password: Option<&str>) -> Result<usize, Pdf2CsvError>;

    /// Render the given 0-indexed pages, preserving the order of `indices`.
    /// Every index is guaranteed to be in range.
    fn render_pages(
        &self,
        pdf: &[u8],
        password: Option<&str>,
        indices: &[usize],
        max_pixels: u32,
    ) -> Result<Vec<(usize, DynamicImage)>, Pdf2CsvError>;
}

/// Resolve the selection against the real page count and render it.
pub async fn render_document(
    rasterizer: Arc<dyn PageRasterizer>,
    pdf: Vec<u8>,
    selection: PageSelection,
    password: Option<String>,
    max_pixels: u32,
) -> Result<RenderedDocument, Pdf2CsvError> {
    tokio::task::spawn_blocking(move || {
        let total_pages = rasterizer.page_count(&pdf, password.as_deref())?;
        info!("PDF has {} pages", total_pages);

        let indices = selection.to_indices(total_pages);
        let skipped = match &selection {
            PageSelection::All => 0,
            PageSelection::Set(requested) => {
                let mut out_of_range: Vec<usize> =
                    requested.iter().copied().filter(|&p| p >= total_pages).collect();
                out_of_range.sort_unstable();
                out_of_range.dedup();
                for p in &out_of_range {
                    warn!("Skipping page {} (out of range, total={})", p, total_pages);
                }
                out_of_range.len()
            }
        };

        let pages = if indices.is_empty() {
            Vec::new()
        } else {
            rasterizer.render_pages(&pdf, password.as_deref(), &indices, max_pixels)?
        };

        Ok(RenderedDocument {
            total_pages,
            pages,
            skipped,
        })
    })
    .await
    .map_err(|e| Pdf2CsvError::Internal(format!("Render task panicked: {}", e)))?
}

/// Decode an image input, shrinking it to fit within `max_pixels` on both edges.
pub fn decode_image(bytes: &[u8], name: &str, max_pixels: u32) -> Result<DynamicImage, Pdf2CsvError> {
    let img = image::load_from_memory(bytes).map_err(|e| Pdf2CsvError::InvalidImage {
        name: name.to_string(),
        detail: e.to_string(),
    })?;
    Ok(fit_within(img, max_pixels))
}

fn fit_within(img: DynamicImage, max_pixels: u32) -> DynamicImage {
    if img.width() <= max_pixels && img.height() <= max_pixels {
        return img;
    }
    debug!(
        "Downscaling {}x{} image to fit {} px",
        img.width(),
        img.height(),
        max_pixels
    );
    img.resize(max_pixels, max_pixels, FilterType::Lanczos3)
}

// ── pdfium ───────────────────────────────────────────────────────────────

/// Rasteriser backed by the pdfium library.
///
/// Library lookup order: explicit path, `PDFIUM_LIB_PATH`, the working
/// directory, then the system library search path. A path may name the
/// library file itself or the directory containing it.
#[derive(Debug, Clone, Default)]
pub struct PdfiumRasterizer {
    lib_path: Option<PathBuf>,
}

impl PdfiumRasterizer {
    pub fn new(lib_path: Option<PathBuf>) -> Self {
        Self { lib_path }
    }

    fn bind(&self) -> Result<Pdfium, Pdf2CsvError> {
        let explicit = self
            .lib_path
            .clone()
            .or_else(|| std::env::var_os("PDFIUM_LIB_PATH").map(PathBuf::from));

        let bindings = match explicit {
            Some(path) => Pdfium::bind_to_library(library_file(&path)),
            None => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
                .or_else(|_| Pdfium::bind_to_system_library()),
        }
        .map_err(|e| Pdf2CsvError::PdfiumBindingFailed(format!("{:?}", e)))?;

        Ok(Pdfium::new(bindings))
    }
}

fn library_file(path: &Path) -> PathBuf {
    if path.is_dir() {
        Pdfium::pdfium_platform_library_name_at_path(path)
    } else {
        path.to_path_buf()
    }
}

fn load_error(e: PdfiumError, password: Option<&str>) -> Pdf2CsvError {
    let err_str = format!("{:?}", e);
    let name = "input".to_string();
    if err_str.contains("Password") || err_str.contains("password") {
        if password.is_some() {
            Pdf2CsvError::WrongPassword { name }
        } else {
            Pdf2CsvError::PasswordRequired { name }
        }
    } else {
        Pdf2CsvError::CorruptPdf {
            name,
            detail: err_str,
        }
    }
}

impl PageRasterizer for PdfiumRasterizer {
    fn page_count(&self, pdf: &[u8], password: Option<&str>) -> Result<usize, Pdf2CsvError> {
        let pdfium = self.bind()?;
        let document = pdfium
            .load_pdf_from_byte_slice(pdf, password)
            .map_err(|e| load_error(e, password))?;
        Ok(document.pages().len() as usize)
    }

    fn render_pages(
        &self,
        pdf: &[u8],
        password: Option<&str>,
        indices: &[usize],
        max_pixels: u32,
    ) -> Result<Vec<(usize, DynamicImage)>, Pdf2CsvError> {
        let pdfium = self.bind()?;
        let source = pdfium
            .load_pdf_from_byte_slice(pdf, password)
            .map_err(|e| load_error(e, password))?;

        let render_config = PdfRenderConfig::new()
            .set_target_width(max_pixels as i32)
            .set_maximum_height(max_pixels as i32);

        let mut results = Vec::with_capacity(indices.len());

        for &idx in indices {
            let raster_err = |e: PdfiumError| Pdf2CsvError::RasterisationFailed {
                page: idx,
                detail: format!("{:?}", e),
            };

            // Isolate the page in its own document before rendering.
            let mut single = pdfium.create_new_pdf().map_err(raster_err)?;
            single
                .pages_mut()
                .copy_page_from_document(&source, idx as u16, 0)
                .map_err(raster_err)?;
            let buffer = single.save_to_bytes().map_err(raster_err)?;

            let page_doc = pdfium
                .load_pdf_from_byte_vec(buffer, None)
                .map_err(raster_err)?;
            let page = page_doc.pages().get(0).map_err(raster_err)?;
            let bitmap = page.render_with_config(&render_config).map_err(raster_err)?;

            let image = bitmap.as_image();
            debug!(
                "Rendered page {} → {}x{} px",
                idx,
                image.width(),
                image.height()
            );
            results.push((idx, image));
        }

        Ok(results)
    }
}
