//! Error types for the reisefix library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`ReisefixError`] — **Fatal**: the operation cannot proceed at all
//!   (unusable travel-request form, unknown session, broken field mapping).
//!   Returned as `Err(ReisefixError)` from the service-level entry points.
//!
//! * [`LegError`] — **Non-fatal**: extraction for a single trip leg failed
//!   (model timeout, malformed response) but the other legs are fine. Stored
//!   inside [`crate::pipeline::extract::ExtractionOutcome`] so callers can
//!   inspect partial success rather than losing the whole claim to one bad
//!   receipt.
//!
//! The separation mirrors the processing contract: a failed leg becomes an
//! empty field set the user can fill in by hand, while a failed travel-request
//! form aborts the session because everything downstream depends on it.

use crate::schema::Leg;
use thiserror::Error;

/// All fatal errors returned by the reisefix library.
///
/// Leg-level failures use [`LegError`] and are collected in the extraction
/// outcome rather than propagated here.
#[derive(Debug, Error)]
pub enum ReisefixError {
    // ── Document errors ───────────────────────────────────────────────────
    /// The uploaded document has a media type the normalizer cannot handle.
    #[error("Unsupported document type '{media_type}'. Upload a PDF or a common image format.")]
    UnsupportedDocument { media_type: String },

    /// Page rasterisation failed (corrupt or unreadable document).
    #[error("Could not render document pages: {detail}")]
    Render { detail: String },

    // ── Extraction errors ─────────────────────────────────────────────────
    /// The travel-request form could not be processed. Fatal for the whole
    /// session: applicant identity and bank data come from this document.
    #[error("Could not read the travel-request form: {detail}")]
    RequiredDocumentExtraction { detail: String },

    // ── Session lifecycle errors ──────────────────────────────────────────
    /// Session id is unknown or the session expired. Recoverable by
    /// re-running extraction.
    #[error("Session '{id}' was not found or has expired. Re-upload the documents to start over.")]
    SessionNotFound { id: String },

    /// An operation arrived out of order for the session's current status.
    #[error("Session is in state '{actual}' but this operation requires '{expected}'")]
    InvalidSessionState { expected: String, actual: String },

    // ── Verification ──────────────────────────────────────────────────────
    /// Submitted field values failed syntax validation. Filling is blocked
    /// until every violation is resolved.
    #[error("{} field value(s) failed validation", violations.len())]
    VerificationRejected {
        violations: Vec<crate::verify::FieldViolation>,
    },

    // ── Form filling ──────────────────────────────────────────────────────
    /// A mapped field identifier does not exist in the loaded form template.
    /// Checked once at service construction; indicates mapping/template drift
    /// that would silently produce a wrong form.
    #[error("Field mapping references '{identifier}' which is not present in the form template")]
    MappingIntegrity { identifier: String },

    /// The PDF filling step itself failed.
    #[error("Failed to fill the form template: {detail}")]
    FillInvocation { detail: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal extraction error for a single trip leg.
///
/// A failing leg yields an empty field set plus one of these; processing of
/// the remaining legs always continues.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum LegError {
    /// The vision model call exceeded the configured timeout.
    #[error("{leg}: extraction timed out after {secs}s")]
    Timeout { leg: Leg, secs: u64 },

    /// The model responded, but not with the expected JSON shape.
    #[error("{leg}: could not parse model output: {detail}")]
    Parse { leg: Leg, detail: String },

    /// The vision API returned an error response.
    #[error("{leg}: vision API error{}: {message}", status.map(|s| format!(" (HTTP {s})")).unwrap_or_default())]
    Api {
        leg: Leg,
        status: Option<u16>,
        message: String,
    },

    /// Documents were uploaded for the leg but none produced a usable page.
    #[error("{leg}: no pages could be prepared from the uploaded documents")]
    NoPages { leg: Leg },
}

impl LegError {
    /// The leg this error belongs to.
    pub fn leg(&self) -> Leg {
        match self {
            LegError::Timeout { leg, .. }
            | LegError::Parse { leg, .. }
            | LegError::Api { leg, .. }
            | LegError::NoPages { leg } => *leg,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leg_error_display_names_leg() {
        let e = LegError::Parse {
            leg: Leg::Outbound,
            detail: "expected JSON array".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("outbound"), "got: {msg}");
        assert!(msg.contains("expected JSON array"));
    }

    #[test]
    fn api_error_display_with_status() {
        let e = LegError::Api {
            leg: Leg::Hotel,
            status: Some(429),
            message: "rate limited".into(),
        };
        assert!(e.to_string().contains("429"));
        assert!(e.to_string().contains("hotel"));
    }

    #[test]
    fn invalid_state_display() {
        let e = ReisefixError::InvalidSessionState {
            expected: "awaiting-verification".into(),
            actual: "extracting".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("extracting"));
        assert!(msg.contains("awaiting-verification"));
    }

    #[test]
    fn session_not_found_mentions_recovery() {
        let e = ReisefixError::SessionNotFound { id: "abc".into() };
        assert!(e.to_string().contains("Re-upload"));
    }
}
