//! The service facade: the four operations a frontend drives.
//!
//! One [`ReceiptService`] owns the whole pipeline — config, extraction
//! client, session store, and the expense-report template — and exposes the
//! claim lifecycle as four calls:
//!
//! 1. [`process_trip`](ReceiptService::process_trip) — documents in, session out
//! 2. [`submit_verification`](ReceiptService::submit_verification) — corrected values in
//! 3. [`fill`](ReceiptService::fill) — render the verified state into the form
//! 4. [`download`](ReceiptService::download) — take the filled PDF, destroying the session
//!
//! Construction verifies the field mapping against the loaded template, so a
//! template/mapping mismatch is a startup failure instead of a silently
//! half-filled form weeks later.

use crate::config::PipelineConfig;
use crate::error::ReisefixError;
use crate::fill::{fill_form, resolve_fields, verify_mapping};
use crate::pipeline::extract::{run_extraction, ExtractionOutcome, TripDocuments, UserProfile};
use crate::pipeline::vision::VisionExtractor;
use crate::schema::{FieldSet, Leg};
use crate::session::{SessionId, SessionSnapshot, SessionStore};
use crate::verify::{validate_set, FieldViolation};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Result of a completed fill, shaped for handing straight to a frontend.
#[derive(Debug, Clone, serde::Serialize)]
pub struct FillOutcome {
    pub status: crate::session::SessionStatus,
    pub message: String,
    /// True when the filled document is waiting behind
    /// [`ReceiptService::download`].
    pub document_ready: bool,
    /// Extraction-time leg errors, repeated here so the final screen can
    /// remind the user which legs were filled in by hand.
    pub leg_errors: Vec<crate::error::LegError>,
}

pub struct ReceiptService {
    config: PipelineConfig,
    extractor: Arc<dyn VisionExtractor>,
    store: SessionStore,
    template: Vec<u8>,
}

impl ReceiptService {
    /// Build the service around a loaded expense-report template.
    ///
    /// Fails with [`ReisefixError::MappingIntegrity`] if any mapped field
    /// identifier is missing from the template.
    pub fn new(
        config: PipelineConfig,
        extractor: Arc<dyn VisionExtractor>,
        template: Vec<u8>,
    ) -> Result<Self, ReisefixError> {
        verify_mapping(&template)?;
        let store = SessionStore::new(config.session_ttl());
        info!("service ready (model {}, template verified)", config.model);
        Ok(ReceiptService {
            config,
            extractor,
            store,
            template,
        })
    }

    /// Run extraction over a trip submission and open a session.
    pub async fn process_trip(
        &self,
        documents: TripDocuments,
        profile: &UserProfile,
    ) -> Result<ExtractionOutcome, ReisefixError> {
        run_extraction(
            &self.config,
            self.extractor.as_ref(),
            &self.store,
            documents,
            profile,
        )
        .await
    }

    /// Current state of a session.
    pub async fn session(&self, id: SessionId) -> Result<SessionSnapshot, ReisefixError> {
        self.store.get(id).await
    }

    /// Store corrected field values for a session awaiting verification.
    ///
    /// All submitted sets are validated first; any violation rejects the
    /// whole submission and leaves the session untouched, so the stored
    /// verified state only ever moves between validated snapshots.
    pub async fn submit_verification(
        &self,
        id: SessionId,
        updates: HashMap<Leg, FieldSet>,
    ) -> Result<(), ReisefixError> {
        let violations: Vec<FieldViolation> = updates
            .iter()
            .flat_map(|(leg, fields)| validate_set(*leg, fields))
            .collect();
        if !violations.is_empty() {
            return Err(ReisefixError::VerificationRejected { violations });
        }
        self.store.update(id, updates).await
    }

    /// Fill the expense-report template from the session's verified state.
    ///
    /// The verified state must pass validation in full — extraction output is
    /// stored unvalidated, so a session whose values were never corrected can
    /// still carry a malformed date. Validation failures reject without
    /// touching the session; only a genuine fill failure marks it `failed`.
    pub async fn fill(&self, id: SessionId) -> Result<FillOutcome, ReisefixError> {
        let snapshot = self.store.get(id).await?;
        let violations: Vec<FieldViolation> = Leg::ALL
            .iter()
            .filter_map(|&leg| snapshot.verified.get(&leg).map(|set| (leg, set)))
            .flat_map(|(leg, set)| validate_set(leg, set))
            .collect();
        if !violations.is_empty() {
            return Err(ReisefixError::VerificationRejected { violations });
        }

        self.store
            .fill_with(id, |session| {
                let values = resolve_fields(&session.applicant, &session.verified);
                fill_form(&self.template, &values)
            })
            .await?;

        Ok(FillOutcome {
            status: crate::session::SessionStatus::Complete,
            message: "Expense report filled and ready for download".to_string(),
            document_ready: true,
            leg_errors: snapshot.leg_errors,
        })
    }

    /// Take the filled document and destroy the session. One-shot.
    pub async fn download(&self, id: SessionId) -> Result<Vec<u8>, ReisefixError> {
        self.store.take_filled(id).await
    }

    /// Drop a session without downloading (user abandoned the claim).
    pub async fn abandon(&self, id: SessionId) {
        self.store.delete(id).await
    }

    /// Live session count, for health reporting.
    pub async fn active_sessions(&self) -> usize {
        self.store.len().await
    }
}
