//! End-to-end tests for the claim lifecycle, driven through the service
//! facade with a scripted extractor standing in for the vision model.

use async_trait::async_trait;
use lopdf::{dictionary, Dictionary, Document as PdfDocument, Object, StringFormat};
use reisefix::fill::read_form_values;
use reisefix::pipeline::normalize::PagePart;
use reisefix::{
    Document, FieldMapping, Leg, LegError, PipelineConfig, ReceiptService, ReisefixError,
    SessionStatus, TripDocuments, UserProfile, VisionExtractor,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

/// Build a minimal fillable PDF carrying the given raw field names/values.
fn form_pdf(fields: &[(&[u8], &str)]) -> Vec<u8> {
    let mut doc = PdfDocument::with_version("1.5");
    let mut refs = Vec::new();
    for (name, value) in fields {
        let mut d = Dictionary::new();
        d.set(b"FT".to_vec(), Object::Name(b"Tx".to_vec()));
        d.set(
            b"T".to_vec(),
            Object::String(name.to_vec(), StringFormat::Literal),
        );
        if !value.is_empty() {
            d.set(
                b"V".to_vec(),
                Object::String(value.as_bytes().to_vec(), StringFormat::Literal),
            );
        }
        refs.push(Object::Reference(doc.add_object(d)));
    }
    let acro_id = doc.add_object(dictionary! { "Fields" => Object::Array(refs) });
    let pages_id = doc.add_object(dictionary! {
        "Type" => "Pages",
        "Count" => 0,
        "Kids" => Object::Array(vec![]),
    });
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => Object::Reference(pages_id),
        "AcroForm" => Object::Reference(acro_id),
    });
    doc.trailer.set("Root", catalog_id);
    let mut buf = Vec::new();
    doc.save_to(&mut buf).expect("in-memory save");
    buf
}

/// Expense-report template carrying every identifier the mapping expects.
fn template() -> Vec<u8> {
    let names: Vec<Vec<u8>> = FieldMapping::shared()
        .entries()
        .map(|e| e.pdf_field.as_bytes().to_vec())
        .collect();
    let fields: Vec<(&[u8], &str)> = names.iter().map(|n| (n.as_slice(), "")).collect();
    form_pdf(&fields)
}

/// A plausible filled travel-request form.
fn antrag() -> Document {
    Document::new(
        form_pdf(&[
            (b"Name Vorname", "Mustermann Erika"),
            (b"EMa Adresse", "erika@uni.example"),
            (b"Telefon dienstlich", "0731-50-123"),
            (b"Wohnort", "Musterweg 1, 89073 Ulm"),
            (b"Institut", "Institut f. Beispiele"),
            (b"Kreditinstitut", "Sparkasse Ulm"),
            (b"BIC", "SOLADES1ULM"),
            (b"IBAN", "DE02120300000000202051"),
            (b"Kostenstelle", "12345"),
            (b"Datum_6", "01.11.2024"),
        ]),
        "application/pdf",
    )
}

fn receipt() -> Document {
    Document::new(vec![0x89, b'P', b'N', b'G'], "image/png")
}

/// Scripted extractor: canned per-leg results plus a call counter.
struct ScriptedExtractor {
    results: Mutex<HashMap<Leg, Result<BTreeMap<String, String>, LegError>>>,
    calls: Mutex<usize>,
}

impl ScriptedExtractor {
    fn new() -> Self {
        ScriptedExtractor {
            results: Mutex::new(HashMap::new()),
            calls: Mutex::new(0),
        }
    }

    fn with(self, leg: Leg, result: Result<BTreeMap<String, String>, LegError>) -> Self {
        self.results.lock().unwrap().insert(leg, result);
        self
    }

    fn call_count(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl VisionExtractor for ScriptedExtractor {
    async fn extract(
        &self,
        leg: Leg,
        _pages: &[PagePart],
        _prompt: &str,
    ) -> Result<BTreeMap<String, String>, LegError> {
        *self.calls.lock().unwrap() += 1;
        self.results
            .lock()
            .unwrap()
            .remove(&leg)
            .unwrap_or_else(|| Ok(BTreeMap::new()))
    }
}

fn raw(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn service(extractor: Arc<ScriptedExtractor>) -> ReceiptService {
    init_logs();
    ReceiptService::new(PipelineConfig::default(), extractor, template()).expect("valid template")
}

/// `RUST_LOG=debug cargo test -- --nocapture` shows the pipeline's tracing.
fn init_logs() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

#[tokio::test]
async fn happy_path_from_upload_to_download() {
    let extractor = Arc::new(
        ScriptedExtractor::new()
            .with(
                Leg::Outbound,
                Ok(raw(&[
                    ("hinreise_von", "Blaustein-Arnegg"),
                    ("hinreise_nach", "Bangkok"),
                    ("hinreise_beginn", "12.12.2024"),
                    ("hinreise_uhrzeit", "17:00"),
                    ("flugzeug_hinreise", "717,31€"),
                ])),
            )
            .with(
                Leg::Return,
                Ok(raw(&[
                    ("rueckreise_von", "Bangkok"),
                    ("rueckreise_am", "22.12.2024"),
                    ("flugzeug_rueckreise", "717,31€"),
                ])),
            )
            .with(
                Leg::Hotel,
                Ok(raw(&[
                    ("geschaeftsort_am", "13.12.2024"),
                    ("kosten_unterkunft", "540,00€"),
                ])),
            ),
    );
    let service = service(Arc::clone(&extractor));

    let outcome = service
        .process_trip(
            TripDocuments {
                travel_request: antrag(),
                outbound: vec![receipt()],
                return_leg: vec![receipt()],
                hotel: vec![receipt()],
            },
            &UserProfile::default(),
        )
        .await
        .unwrap();

    assert_eq!(extractor.call_count(), 3);
    assert!(outcome.leg_errors.is_empty());
    assert_eq!(outcome.fields[&Leg::Outbound]["hinreise_nach"], "Bangkok");

    let snap = service.session(outcome.session_id).await.unwrap();
    assert_eq!(snap.status, SessionStatus::AwaitingVerification);

    // Correct one value, then fill and download.
    let mut outbound = snap.verified[&Leg::Outbound].clone();
    outbound.insert("hinreise_uhrzeit".into(), "17:30".into());
    let mut updates = HashMap::new();
    updates.insert(Leg::Outbound, outbound);
    service
        .submit_verification(outcome.session_id, updates)
        .await
        .unwrap();

    let fill_outcome = service.fill(outcome.session_id).await.unwrap();
    assert!(fill_outcome.document_ready);
    assert_eq!(fill_outcome.status, SessionStatus::Complete);
    assert_eq!(
        service.session(outcome.session_id).await.unwrap().status,
        SessionStatus::Complete
    );

    let pdf = service.download(outcome.session_id).await.unwrap();
    let values = read_form_values(&pdf).unwrap();
    // Corrected value, extracted value, applicant prefill, and derived
    // fields all land under the template's identifiers.
    assert_eq!(values["Hinreise_Uhrzeit"], "17:30");
    assert_eq!(values["Flugzeug_Rückreise"], "717,31€");
    assert_eq!(values["AntragstellerIn_Name_Vorname"], "Mustermann Erika");
    assert_eq!(values["BAN"], "DE02120300000000202051");
    assert_eq!(values["Drittmittelprojekt"], "P12345");
    assert_eq!(values["Tagegeld"], "nein");

    // Download is one-shot: the session is gone.
    let err = service.session(outcome.session_id).await.unwrap_err();
    assert!(matches!(err, ReisefixError::SessionNotFound { .. }));
}

#[tokio::test]
async fn failed_leg_still_yields_a_usable_session() {
    let extractor = Arc::new(
        ScriptedExtractor::new()
            .with(
                Leg::Outbound,
                Err(LegError::Timeout {
                    leg: Leg::Outbound,
                    secs: 60,
                }),
            )
            .with(Leg::Hotel, Ok(raw(&[("kosten_unterkunft", "300,00€")]))),
    );
    let service = service(extractor);

    let outcome = service
        .process_trip(
            TripDocuments {
                travel_request: antrag(),
                outbound: vec![receipt()],
                return_leg: vec![],
                hotel: vec![receipt()],
            },
            &UserProfile::default(),
        )
        .await
        .unwrap();

    assert_eq!(outcome.leg_errors.len(), 1);
    assert_eq!(outcome.leg_errors[0].leg(), Leg::Outbound);

    // The user fills the failed leg by hand during verification; the claim
    // can still complete.
    let mut outbound = outcome.fields[&Leg::Outbound].clone();
    outbound.insert("hinreise_von".into(), "Ulm".into());
    outbound.insert("hinreise_beginn".into(), "12.12.2024".into());
    let mut updates = HashMap::new();
    updates.insert(Leg::Outbound, outbound);
    service
        .submit_verification(outcome.session_id, updates)
        .await
        .unwrap();
    let fill_outcome = service.fill(outcome.session_id).await.unwrap();
    // The final screen can still tell the user which leg needed hand-filling.
    assert_eq!(fill_outcome.leg_errors.len(), 1);

    let pdf = service.download(outcome.session_id).await.unwrap();
    let values = read_form_values(&pdf).unwrap();
    assert_eq!(values["Hinreise_von"], "Ulm");
    assert_eq!(values["Geschäftskort_Kosten_Unterkunft"], "300,00€");
}

#[tokio::test]
async fn invalid_verification_is_rejected_without_mutating() {
    let extractor = Arc::new(ScriptedExtractor::new());
    let service = service(extractor);
    let outcome = service
        .process_trip(
            TripDocuments {
                travel_request: antrag(),
                outbound: vec![],
                return_leg: vec![],
                hotel: vec![],
            },
            &UserProfile::default(),
        )
        .await
        .unwrap();

    let mut outbound = outcome.fields[&Leg::Outbound].clone();
    outbound.insert("hinreise_beginn".into(), "12-12-2024".into());
    outbound.insert("hinreise_uhrzeit".into(), "9:00".into());
    let mut updates = HashMap::new();
    updates.insert(Leg::Outbound, outbound);

    let err = service
        .submit_verification(outcome.session_id, updates)
        .await
        .unwrap_err();
    match err {
        ReisefixError::VerificationRejected { violations } => {
            assert_eq!(violations.len(), 2);
            assert!(violations.iter().all(|v| v.leg == Leg::Outbound));
        }
        other => panic!("expected VerificationRejected, got {other:?}"),
    }

    // Nothing was stored.
    let snap = service.session(outcome.session_id).await.unwrap();
    assert_eq!(snap.verified[&Leg::Outbound]["hinreise_beginn"], "");
    assert_eq!(snap.status, SessionStatus::AwaitingVerification);
}

#[tokio::test]
async fn fill_rejects_uncorrected_invalid_extraction() {
    // The model returned a malformed time; it parks in the session but must
    // not reach the form until corrected.
    let extractor = Arc::new(
        ScriptedExtractor::new().with(Leg::Outbound, Ok(raw(&[("hinreise_uhrzeit", "9:00")]))),
    );
    let service = service(extractor);
    let outcome = service
        .process_trip(
            TripDocuments {
                travel_request: antrag(),
                outbound: vec![receipt()],
                return_leg: vec![],
                hotel: vec![],
            },
            &UserProfile::default(),
        )
        .await
        .unwrap();

    let err = service.fill(outcome.session_id).await.unwrap_err();
    assert!(matches!(err, ReisefixError::VerificationRejected { .. }));

    // The rejection did not consume the session.
    let snap = service.session(outcome.session_id).await.unwrap();
    assert_eq!(snap.status, SessionStatus::AwaitingVerification);

    // Correct and retry.
    let mut outbound = snap.verified[&Leg::Outbound].clone();
    outbound.insert("hinreise_uhrzeit".into(), "09:00".into());
    let mut updates = HashMap::new();
    updates.insert(Leg::Outbound, outbound);
    service
        .submit_verification(outcome.session_id, updates)
        .await
        .unwrap();
    service.fill(outcome.session_id).await.unwrap();
}

#[tokio::test]
async fn out_of_order_operations_fail_cleanly() {
    let extractor = Arc::new(ScriptedExtractor::new());
    let service = service(extractor);
    let outcome = service
        .process_trip(
            TripDocuments {
                travel_request: antrag(),
                outbound: vec![],
                return_leg: vec![],
                hotel: vec![],
            },
            &UserProfile::default(),
        )
        .await
        .unwrap();

    // Download before fill.
    let err = service.download(outcome.session_id).await.unwrap_err();
    assert!(matches!(err, ReisefixError::InvalidSessionState { .. }));

    // Verification after fill.
    service.fill(outcome.session_id).await.unwrap();
    let mut updates = HashMap::new();
    updates.insert(Leg::Hotel, reisefix::schema::empty_field_set(Leg::Hotel));
    let err = service
        .submit_verification(outcome.session_id, updates)
        .await
        .unwrap_err();
    assert!(matches!(err, ReisefixError::InvalidSessionState { .. }));
}

#[tokio::test]
async fn unreadable_travel_request_aborts_without_a_session() {
    let extractor = Arc::new(ScriptedExtractor::new());
    let service = service(extractor);
    let err = service
        .process_trip(
            TripDocuments {
                travel_request: Document::new(b"scan.jpg bytes".to_vec(), "application/pdf"),
                outbound: vec![receipt()],
                return_leg: vec![],
                hotel: vec![],
            },
            &UserProfile::default(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ReisefixError::RequiredDocumentExtraction { .. }));
    assert_eq!(service.active_sessions().await, 0);
}

#[tokio::test]
async fn construction_fails_on_template_mapping_drift() {
    let bad_template = form_pdf(&[(b"Kreditinstitut", "")]);
    let err = ReceiptService::new(
        PipelineConfig::default(),
        Arc::new(ScriptedExtractor::new()),
        bad_template,
    )
    .err()
    .expect("must fail");
    assert!(matches!(err, ReisefixError::MappingIntegrity { .. }));
}

#[tokio::test]
async fn abandoned_session_is_deleted() {
    let extractor = Arc::new(ScriptedExtractor::new());
    let service = service(extractor);
    let outcome = service
        .process_trip(
            TripDocuments {
                travel_request: antrag(),
                outbound: vec![],
                return_leg: vec![],
                hotel: vec![],
            },
            &UserProfile::default(),
        )
        .await
        .unwrap();

    assert_eq!(service.active_sessions().await, 1);
    service.abandon(outcome.session_id).await;
    assert_eq!(service.active_sessions().await, 0);
}
