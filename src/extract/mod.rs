//! Document-text extraction for PDF attachments.
//!
//! OCR happens in a scratch area: the PDF is uploaded, converted into a
//! text-bearing document, read, and both scratch objects are deleted again.

pub mod ocr_command;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::ExtractError;

pub use ocr_command::OcrCommandDocuments;

/// Scratch storage with an OCR conversion step.
#[async_trait]
pub trait ScratchDocuments: Send + Sync {
    /// Store a PDF; returns the scratch id of the upload.
    async fn upload_pdf(&self, name: &str, bytes: &[u8]) -> Result<String, ExtractError>;

    /// OCR an uploaded PDF; returns the scratch id of the converted document.
    async fn convert_with_ocr(&self, source_id: &str, language: &str)
    -> Result<String, ExtractError>;

    /// Plain text of a converted document.
    async fn read_text(&self, converted_id: &str) -> Result<String, ExtractError>;

    /// Delete one scratch object.
    async fn delete(&self, id: &str) -> Result<(), ExtractError>;
}

/// Extract the text of a PDF.
///
/// Whatever happens after the upload succeeds, the converted document and
/// then the uploaded source are deleted, each attempt independent of the
/// other. Cleanup failures are logged, never returned.
pub async fn extract_pdf_text(
    docs: &dyn ScratchDocuments,
    name: &str,
    bytes: &[u8],
    language: &str,
) -> Result<String, ExtractError> {
    let source_id = docs.upload_pdf(name, bytes).await?;
    debug!(name = %name, id = %source_id, "Uploaded PDF for OCR");

    let result = match docs.convert_with_ocr(&source_id, language).await {
        Ok(converted_id) => {
            let text = docs.read_text(&converted_id).await;
            cleanup(docs, &converted_id).await;
            text
        }
        Err(e) => Err(e),
    };
    cleanup(docs, &source_id).await;

    result.map(|text| text.trim().to_string())
}

async fn cleanup(docs: &dyn ScratchDocuments, id: &str) {
    if let Err(e) = docs.delete(id).await {
        warn!(id = %id, error = %e, "Failed to delete scratch document");
    }
}

/// Stored in place of extracted text when extraction fails.
pub fn extraction_placeholder(err: &ExtractError) -> String {
    format!("ERROR: Could not extract text ({err})")
}
