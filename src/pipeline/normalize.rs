//! The Document Normalizer: uploaded bytes → page images for vision analysis.
//!
//! Images pass through unchanged as a single page. PDFs are rasterised page
//! by page via pdfium and re-encoded as PNG — lossless compression preserves
//! text crispness, and blurry receipt totals are exactly what the model must
//! not guess at.
//!
//! ## Why spawn_blocking?
//!
//! The `pdfium-render` crate wraps the pdfium C++ library, which uses
//! thread-local state internally and is not safe to call from async
//! contexts. `tokio::task::spawn_blocking` moves the work onto the blocking
//! thread pool so concurrent sessions are not stalled by rendering.
//!
//! ## Why a temp file?
//!
//! pdfium wants a file-system path. Writing the upload to a
//! `tempfile::NamedTempFile` gives it one while RAII guarantees the bytes
//! are gone on every exit path, including panics — receipts never outlive
//! the request that carried them.

use crate::error::ReisefixError;
use std::io::Write;
use tracing::{debug, warn};

/// One uploaded document as it crosses the upload boundary.
#[derive(Debug, Clone)]
pub struct Document {
    pub bytes: Vec<u8>,
    /// Declared media type, e.g. `"application/pdf"` or `"image/jpeg"`.
    pub media_type: String,
}

impl Document {
    pub fn new(bytes: Vec<u8>, media_type: impl Into<String>) -> Self {
        Document {
            bytes,
            media_type: media_type.into(),
        }
    }
}

/// One page image ready for the vision request.
#[derive(Debug, Clone)]
pub struct PagePart {
    pub mime_type: String,
    pub data: Vec<u8>,
}

const IMAGE_TYPES: &[&str] = &[
    "image/jpeg",
    "image/png",
    "image/gif",
    "image/bmp",
    "image/tiff",
    "image/webp",
];

/// Convert one uploaded document into page images.
///
/// # Errors
/// * [`ReisefixError::UnsupportedDocument`] — unrecognised media type, or a
///   document declared as PDF whose bytes are not a PDF.
/// * [`ReisefixError::Render`] — pdfium could not open or rasterise the
///   document.
pub async fn normalize_document(
    doc: &Document,
    max_pixels: u32,
) -> Result<Vec<PagePart>, ReisefixError> {
    let media_type = doc.media_type.to_ascii_lowercase();

    if IMAGE_TYPES.contains(&media_type.as_str()) {
        debug!("document is already an image ({media_type}), passing through");
        return Ok(vec![PagePart {
            mime_type: media_type,
            data: doc.bytes.clone(),
        }]);
    }

    if media_type == "application/pdf" {
        if !doc.bytes.starts_with(b"%PDF") {
            return Err(ReisefixError::UnsupportedDocument {
                media_type: format!("{media_type} (bytes are not a PDF)"),
            });
        }
        return rasterize_pdf(&doc.bytes, max_pixels).await;
    }

    Err(ReisefixError::UnsupportedDocument { media_type })
}

/// Normalize a whole leg bundle, concatenating pages in upload order.
///
/// A document that fails to normalize is skipped with a warning rather than
/// failing the leg — one corrupt receipt should not discard the readable
/// ones next to it.
pub async fn normalize_bundle(
    documents: &[Document],
    max_pixels: u32,
) -> Vec<PagePart> {
    let mut pages = Vec::new();
    for (i, doc) in documents.iter().enumerate() {
        match normalize_document(doc, max_pixels).await {
            Ok(mut parts) => {
                debug!("document {i}: {} page(s)", parts.len());
                pages.append(&mut parts);
            }
            Err(e) => warn!("document {i} skipped: {e}"),
        }
    }
    pages
}

/// Rasterise every page of a PDF into PNG page images.
async fn rasterize_pdf(bytes: &[u8], max_pixels: u32) -> Result<Vec<PagePart>, ReisefixError> {
    let bytes = bytes.to_vec();
    tokio::task::spawn_blocking(move || rasterize_pdf_blocking(&bytes, max_pixels))
        .await
        .map_err(|e| ReisefixError::Internal(format!("Render task panicked: {e}")))?
}

fn rasterize_pdf_blocking(bytes: &[u8], max_pixels: u32) -> Result<Vec<PagePart>, ReisefixError> {
    use pdfium_render::prelude::*;

    // pdfium loads from a path, not a buffer; the temp file is removed when
    // `tmp` drops, on success and on every error path.
    let mut tmp = tempfile::NamedTempFile::new()
        .map_err(|e| ReisefixError::Internal(format!("tempfile: {e}")))?;
    tmp.write_all(bytes)
        .map_err(|e| ReisefixError::Internal(format!("tempfile write: {e}")))?;

    let pdfium = Pdfium::default();
    let document = pdfium
        .load_pdf_from_file(tmp.path(), None)
        .map_err(|e| ReisefixError::Render {
            detail: format!("{e:?}"),
        })?;

    let render_config = PdfRenderConfig::new()
        .set_target_width(max_pixels as i32)
        .set_maximum_height(max_pixels as i32);

    let pages = document.pages();
    let mut parts = Vec::with_capacity(pages.len() as usize);

    for (idx, page) in pages.iter().enumerate() {
        let bitmap = page
            .render_with_config(&render_config)
            .map_err(|e| ReisefixError::Render {
                detail: format!("page {}: {e:?}", idx + 1),
            })?;
        let image = bitmap.as_image();

        let mut buf = Vec::new();
        image
            .write_to(&mut std::io::Cursor::new(&mut buf), image::ImageFormat::Png)
            .map_err(|e| ReisefixError::Render {
                detail: format!("page {}: PNG encoding failed: {e}", idx + 1),
            })?;

        debug!(
            "rendered page {} → {}x{} px, {} bytes",
            idx + 1,
            image.width(),
            image.height(),
            buf.len()
        );
        parts.push(PagePart {
            mime_type: "image/png".to_string(),
            data: buf,
        });
    }

    Ok(parts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn image_passes_through_as_single_page() {
        let doc = Document::new(vec![0xFF, 0xD8, 0xFF], "image/jpeg");
        let pages = normalize_document(&doc, 2000).await.unwrap();
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].mime_type, "image/jpeg");
        assert_eq!(pages[0].data, doc.bytes);
    }

    #[tokio::test]
    async fn media_type_is_case_insensitive() {
        let doc = Document::new(vec![1, 2, 3], "IMAGE/PNG");
        let pages = normalize_document(&doc, 2000).await.unwrap();
        assert_eq!(pages[0].mime_type, "image/png");
    }

    #[tokio::test]
    async fn unknown_media_type_is_unsupported() {
        let doc = Document::new(b"hello".to_vec(), "text/plain");
        let err = normalize_document(&doc, 2000).await.unwrap_err();
        assert!(matches!(err, ReisefixError::UnsupportedDocument { .. }));
    }

    #[tokio::test]
    async fn pdf_without_magic_bytes_is_unsupported() {
        let doc = Document::new(b"not a pdf at all".to_vec(), "application/pdf");
        let err = normalize_document(&doc, 2000).await.unwrap_err();
        match err {
            ReisefixError::UnsupportedDocument { media_type } => {
                assert!(media_type.contains("not a PDF"));
            }
            other => panic!("expected UnsupportedDocument, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn bundle_skips_broken_documents() {
        let docs = vec![
            Document::new(vec![1], "image/png"),
            Document::new(b"junk".to_vec(), "application/msword"),
            Document::new(vec![2], "image/jpeg"),
        ];
        let pages = normalize_bundle(&docs, 2000).await;
        assert_eq!(pages.len(), 2);
    }
}
