//! Upload validation and PDF text extraction.
//!
//! Validation runs synchronously in the request handler, before any job exists.
//! Extraction runs inside the first pipeline stage, on the blocking pool.

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info};

const PDF_MAGIC: &[u8] = b"%PDF-";

#[derive(Debug, Error)]
pub enum PdfError {
    #[error("Empty file uploaded")]
    Empty,

    #[error("Only PDF files are accepted")]
    WrongExtension,

    #[error("File is not a valid PDF (missing %PDF- header)")]
    BadSignature,

    #[error("File size exceeds {limit_mb}MB limit")]
    TooLarge { size: usize, limit_mb: usize },

    #[error("Error extracting text from PDF: {0}")]
    Extraction(String),

    #[error("No text content found in PDF")]
    NoText,
}

/// Checks an upload against the file constraints. Order matters for the error shown:
/// name first, then emptiness, size, and finally the content signature.
pub fn validate_upload(filename: &str, bytes: &[u8], max_size: usize) -> Result<(), PdfError> {
    if !filename.to_ascii_lowercase().ends_with(".pdf") {
        return Err(PdfError::WrongExtension);
    }
    if bytes.is_empty() {
        return Err(PdfError::Empty);
    }
    if bytes.len() > max_size {
        return Err(PdfError::TooLarge {
            size: bytes.len(),
            limit_mb: max_size / 1024 / 1024,
        });
    }
    if !bytes.starts_with(PDF_MAGIC) {
        return Err(PdfError::BadSignature);
    }
    Ok(())
}

/// Converts PDF bytes to plain text.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract_text(&self, bytes: &[u8]) -> Result<String, PdfError>;
}

/// `pdf-extract` backed extractor.
pub struct PdfTextExtractor;

#[async_trait]
impl TextExtractor for PdfTextExtractor {
    async fn extract_text(&self, bytes: &[u8]) -> Result<String, PdfError> {
        let owned = bytes.to_vec();
        let started = std::time::Instant::now();

        // pdf-extract is CPU bound and may panic on hostile input; keep both off the runtime
        let text = tokio::task::spawn_blocking(move || pdf_extract::extract_text_from_mem(&owned))
            .await
            .map_err(|e| PdfError::Extraction(format!("extractor aborted: {e}")))?
            .map_err(|e| PdfError::Extraction(e.to_string()))?;

        let text = normalize_text(&text);
        info!(
            "PDF text extracted in {:.2}s ({} characters)",
            started.elapsed().as_secs_f64(),
            text.len()
        );

        if text.is_empty() {
            return Err(PdfError::NoText);
        }
        Ok(text)
    }
}

/// Trims trailing whitespace per line and collapses runs of blank lines.
fn normalize_text(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut blank_run = 0;
    for line in raw.lines() {
        let line = line.trim_end();
        if line.is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push_str(line);
        out.push('\n');
    }
    let trimmed = out.trim();
    debug!("Normalized PDF text from {} to {} bytes", raw.len(), trimmed.len());
    trimmed.to_string()
}
