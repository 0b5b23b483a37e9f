//! # reisefix
//!
//! Turn a pile of travel receipts into a filled German expense-report form
//! (Reisekostenabrechnung) using a vision language model.
//!
//! ## Why this crate?
//!
//! Receipts arrive as photos and PDFs in every conceivable layout — airline
//! itineraries, hotel invoices, train tickets. Template-based extraction
//! breaks on each new layout; instead this crate rasterises every document
//! into page images and lets a VLM read them as a clerk would, then routes
//! the result through human verification before a single byte lands in the
//! official form.
//!
//! ## Pipeline Overview
//!
//! ```text
//! travel-request PDF + receipt bundles (outbound / return / hotel)
//!  │
//!  ├─ 1. Normalize  images pass through, PDFs rasterised via pdfium
//!  ├─ 2. Encode     page images → base64 inline parts
//!  ├─ 3. Extract    one Gemini call per leg, faults isolated per leg
//!  ├─ 4. Session    results parked in an in-memory TTL store
//!  ├─ 5. Verify     human corrections, syntax-validated per field
//!  └─ 6. Fill       canonical keys → byte-exact form identifiers → PDF
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use reisefix::{
//!     Document, GeminiExtractor, PipelineConfig, ReceiptService, TripDocuments, UserProfile,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PipelineConfig::default();
//!     let extractor = Arc::new(GeminiExtractor::from_env(config.clone())?);
//!     let template = std::fs::read("Reisekostenabrechnung.pdf")?;
//!     let service = ReceiptService::new(config, extractor, template)?;
//!
//!     let documents = TripDocuments {
//!         travel_request: Document::new(std::fs::read("Dienstreiseantrag.pdf")?, "application/pdf"),
//!         outbound: vec![Document::new(std::fs::read("flight.pdf")?, "application/pdf")],
//!         return_leg: vec![],
//!         hotel: vec![Document::new(std::fs::read("hotel.jpg")?, "image/jpeg")],
//!     };
//!
//!     let outcome = service.process_trip(documents, &UserProfile::default()).await?;
//!     // ... user reviews and corrects outcome.fields, then:
//!     service.fill(outcome.session_id).await?;
//!     let pdf = service.download(outcome.session_id).await?;
//!     std::fs::write("filled_form.pdf", pdf)?;
//!     Ok(())
//! }
//! ```
//!
//! ## Trust model
//!
//! Extracted values are *suggestions*: nothing reaches the form without
//! passing the Verification Engine, and the vision model's raw output is
//! reduced to the closed canonical schema at the extraction boundary.
//! Sessions are ephemeral — an idle claim expires after the configured TTL
//! and a downloaded form destroys its session.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod fill;
pub mod mapping;
pub mod pipeline;
pub mod prompts;
pub mod schema;
pub mod service;
pub mod session;
pub mod verify;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{PipelineConfig, PipelineConfigBuilder};
pub use error::{LegError, ReisefixError};
pub use mapping::{FieldMapping, MappingEntry, PdfFieldId};
pub use pipeline::extract::{ExtractionOutcome, TripDocuments, UserProfile};
pub use pipeline::normalize::{Document, PagePart};
pub use pipeline::vision::{GeminiExtractor, VisionExtractor};
pub use schema::{FieldCategory, FieldSet, FieldSpec, Leg};
pub use service::{FillOutcome, ReceiptService};
pub use session::{SessionId, SessionSnapshot, SessionStatus, SessionStore};
pub use verify::{validate_set, validate_value, FieldViolation};
