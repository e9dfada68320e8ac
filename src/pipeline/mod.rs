//! Pipeline stages for table extraction.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ render ──▶ extract ──▶ tabulate
//! (URL/path)  (pdfium)   (remote,    (JSON → CSV)
//!                         retried)
//! ```
//!
//! 1. [`input`]    — load the user-supplied path or URL into memory
//! 2. [`render`]   — split and rasterise selected PDF pages, or decode an image;
//!    pdfium runs in `spawn_blocking`
//! 3. [`extract`]  — call the table-extraction service per page with retry,
//!    timeout and cancellation; the only stage with service I/O
//! 4. [`tabulate`] — parse the service's answer and render header-less CSV

pub mod extract;
pub mod input;
pub mod render;
pub mod tabulate;
