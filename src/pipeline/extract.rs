//! The Extraction Orchestrator: one trip submission → one session.
//!
//! The travel-request form is the only required document and the only fatal
//! dependency; its data lives in its own form fields, so it is read directly
//! and never sent to the vision model. The three receipt legs are processed
//! with per-leg fault isolation: a leg that times out, returns garbage, or
//! has no readable pages contributes an empty field set and a recorded
//! [`LegError`], and the session is still created so the user can fill those
//! fields by hand during verification.
//!
//! The outbound leg runs first because the return leg's prompt embeds the
//! outbound output — a roundtrip ticket must be split between the two legs,
//! not counted twice.

use crate::config::PipelineConfig;
use crate::error::{LegError, ReisefixError};
use crate::pipeline::normalize::{normalize_bundle, Document};
use crate::pipeline::vision::VisionExtractor;
use crate::prompts::leg_prompt;
use crate::schema::{canonicalize, empty_field_set, FieldSet, Leg};
use crate::session::{Session, SessionId, SessionStore};
use serde::Deserialize;
use std::collections::HashMap;
use tracing::{info, warn};

/// Everything one reimbursement submission carries.
pub struct TripDocuments {
    /// The filled travel-request form (Dienstreiseantrag). Required.
    pub travel_request: Document,
    /// Receipts for the outbound journey. May be empty.
    pub outbound: Vec<Document>,
    /// Receipts for the return journey. May be empty.
    pub return_leg: Vec<Document>,
    /// Hotel and conference receipts. May be empty.
    pub hotel: Vec<Document>,
}

/// Applicant data supplied by the caller, used to prefill the applicant
/// block. Bank data is deliberately not representable here: the account
/// fields are always sourced from the travel-request form, so a profile can
/// never inject someone else's IBAN.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct UserProfile {
    pub full_name: String,
    pub phone_number: String,
    pub email: String,
    pub postal_address: String,
    pub institute: String,
}

/// What the caller gets back when extraction completes.
#[derive(Debug)]
pub struct ExtractionOutcome {
    pub session_id: SessionId,
    pub applicant: FieldSet,
    pub fields: HashMap<Leg, FieldSet>,
    pub leg_errors: Vec<LegError>,
}

/// Run the whole extraction pipeline and create the session.
///
/// Fatal only when the travel-request form cannot be read; everything else
/// degrades per leg.
pub async fn run_extraction(
    config: &PipelineConfig,
    extractor: &dyn VisionExtractor,
    store: &SessionStore,
    documents: TripDocuments,
    profile: &UserProfile,
) -> Result<ExtractionOutcome, ReisefixError> {
    // The session exists from the moment processing is requested, so its
    // status is observable as `extracting` while the model calls run. A
    // fatal travel-request failure tears it down again.
    let session_id = store.create(Session::extracting()).await;

    let applicant = match extract_applicant(&documents.travel_request, profile) {
        Ok(applicant) => applicant,
        Err(e) => {
            store.delete(session_id).await;
            return Err(e);
        }
    };

    // The return prompt embeds the outbound output so receipts covering
    // both directions are split, not double counted; the hotel leg has no
    // such dependency and runs concurrently with that chain.
    let journey = async {
        let (outbound, out_err) =
            extract_leg(config, extractor, Leg::Outbound, &documents.outbound, None).await;
        let context = serde_json::to_string(&outbound).unwrap_or_else(|_| String::from("{}"));
        let (return_set, ret_err) = extract_leg(
            config,
            extractor,
            Leg::Return,
            &documents.return_leg,
            Some(&context),
        )
        .await;
        (outbound, out_err, return_set, ret_err)
    };
    let hotel_leg = extract_leg(config, extractor, Leg::Hotel, &documents.hotel, None);

    let ((outbound, out_err, return_set, ret_err), (hotel, hotel_err)) =
        tokio::join!(journey, hotel_leg);

    let mut fields = HashMap::new();
    let mut leg_errors = Vec::new();
    leg_errors.extend(out_err);
    leg_errors.extend(ret_err);
    leg_errors.extend(hotel_err);

    fields.insert(Leg::Outbound, outbound);
    fields.insert(Leg::Return, return_set);
    fields.insert(Leg::Hotel, hotel);

    store
        .complete_extraction(
            session_id,
            applicant.clone(),
            fields.clone(),
            leg_errors.clone(),
        )
        .await?;
    info!(
        "extraction complete: session {session_id}, {} leg error(s)",
        leg_errors.len()
    );

    Ok(ExtractionOutcome {
        session_id,
        applicant,
        fields,
        leg_errors,
    })
}

/// Process one leg with fault isolation.
///
/// A leg with no documents never reaches the extraction client; a leg whose
/// documents all fail to normalize, or whose extraction call fails, yields
/// an empty canonical set plus the error that explains why.
async fn extract_leg(
    config: &PipelineConfig,
    extractor: &dyn VisionExtractor,
    leg: Leg,
    documents: &[Document],
    outbound_context: Option<&str>,
) -> (FieldSet, Option<LegError>) {
    if documents.is_empty() {
        info!("{leg}: no documents uploaded, leaving fields empty");
        return (empty_field_set(leg), None);
    }

    let pages = normalize_bundle(documents, config.max_rendered_pixels).await;
    if pages.is_empty() {
        warn!("{leg}: none of {} document(s) produced pages", documents.len());
        return (empty_field_set(leg), Some(LegError::NoPages { leg }));
    }

    let prompt = leg_prompt(leg, outbound_context);
    match extractor.extract(leg, &pages, &prompt).await {
        Ok(raw) => (canonicalize(leg, &raw), None),
        Err(e) => {
            warn!("{leg}: extraction failed — fields left empty: {e}");
            (empty_field_set(leg), Some(e))
        }
    }
}

/// Read the applicant block from the travel-request form's own field values.
///
/// Prefill priority: a non-empty profile value wins, the form value is the
/// fallback. The three bank fields always come from the form. Failure here
/// is fatal — without the applicant block the expense report is useless.
fn extract_applicant(
    travel_request: &Document,
    profile: &UserProfile,
) -> Result<FieldSet, ReisefixError> {
    if !travel_request.bytes.starts_with(b"%PDF") {
        return Err(ReisefixError::RequiredDocumentExtraction {
            detail: "travel-request form is not a PDF".to_string(),
        });
    }
    let values = crate::fill::read_form_values(&travel_request.bytes).map_err(|e| {
        ReisefixError::RequiredDocumentExtraction {
            detail: format!("travel-request form has no readable fields: {e}"),
        }
    })?;

    let form = |key: &str| values.get(key).map(|v| v.trim().to_string()).unwrap_or_default();
    let prefer = |profile_value: &str, form_key: &str| {
        let p = profile_value.trim();
        if p.is_empty() {
            form(form_key)
        } else {
            p.to_string()
        }
    };

    let mut out = FieldSet::new();
    out.insert(
        "antragsteller_name".into(),
        prefer(&profile.full_name, "Name Vorname"),
    );
    out.insert(
        "email_dienstlich".into(),
        prefer(&profile.email, "EMa Adresse"),
    );
    out.insert(
        "telefon_dienstlich".into(),
        prefer(&profile.phone_number, "Telefon dienstlich"),
    );
    out.insert(
        "private_anschrift".into(),
        prefer(&profile.postal_address, "Wohnort"),
    );
    out.insert("institut".into(), prefer(&profile.institute, "Institut"));

    // Bank data: form only, never the profile.
    out.insert("kreditinstitut".into(), form("Kreditinstitut"));
    out.insert("bic".into(), form("BIC"));
    out.insert("iban".into(), form("IBAN"));

    // Derived values carried over from the request form's conventions: the
    // per-diem box defaults to "nein", cost centres are written with a "P"
    // prefix, and the approval field keeps a trailing space for the
    // approver's name to be appended by hand.
    out.insert("tagegeld".into(), "nein".into());
    out.insert(
        "drittmittelprojekt".into(),
        format!("P{}", form("Kostenstelle")),
    );
    out.insert("genehmigung_am_von".into(), format!("{} ", form("Datum_6")));

    Ok(out)
}
