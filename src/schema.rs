//! The canonical field schema: trip legs, field categories, and the fixed
//! per-leg catalog of canonical keys.
//!
//! Everything downstream of the vision model speaks this schema and nothing
//! else. Model output is reduced to it immediately at the extraction boundary
//! (unknown keys are dropped), verification resolves categories through it,
//! and the form filler translates it into the external form's identifiers via
//! [`crate::mapping`]. The catalogs are process-wide constants shared
//! read-only by all sessions.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// One segment of the trip, each with its own documents, extraction call,
/// canonical fields, and mapping subset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Leg {
    /// Outbound journey (Hinreise).
    Outbound,
    /// Return journey (Rückreise).
    Return,
    /// Hotel stay and conference attendance.
    Hotel,
}

impl Leg {
    /// All legs in processing order. Outbound runs first because the return
    /// leg's prompt uses its output as context.
    pub const ALL: [Leg; 3] = [Leg::Outbound, Leg::Return, Leg::Hotel];
}

impl fmt::Display for Leg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Leg::Outbound => "outbound",
            Leg::Return => "return",
            Leg::Hotel => "hotel",
        };
        f.write_str(s)
    }
}

/// Semantic category of a canonical field, used by the Verification Engine
/// to pick the syntax rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FieldCategory {
    /// `DD.MM.YYYY`, no calendar validity check.
    Date,
    /// `HH:MM`, 24-hour, zero-padded.
    Time,
    /// Non-empty, at least two characters after trimming.
    Location,
    /// Amount plus currency symbol, e.g. "717,31€". Free-form.
    Monetary,
    /// Anything, including checkbox values like "ja"/"nein".
    FreeText,
}

/// One entry in a leg's canonical field catalog.
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    /// Stable canonical key, e.g. `"hinreise_beginn"`.
    pub key: &'static str,
    pub category: FieldCategory,
}

const fn spec(key: &'static str, category: FieldCategory) -> FieldSpec {
    FieldSpec { key, category }
}

use FieldCategory::{Date, FreeText, Location, Monetary, Time};

/// Canonical fields of the outbound journey.
pub const OUTBOUND_FIELDS: &[FieldSpec] = &[
    spec("hinreise_von", Location),
    spec("hinreise_nach", Location),
    spec("hinreise_beginn", Date),
    spec("hinreise_uhrzeit", Time),
    spec("hinreise_ort", FreeText),
    spec("hinreise_urlaubsort", FreeText),
    spec("verkehrsmittel_hinreise", FreeText),
    spec("klasse_hinreise", FreeText),
    spec("flugzeug_hinreise", Monetary),
    spec("bahn_1u2_klasse_hinreise", Monetary),
    spec("eigenes_kfz_hinreise", FreeText),
    spec("dienstwagen_hinreise", FreeText),
    spec("fahrgemeinschaft_hinreise", FreeText),
    spec("sonstiges_hinreise", FreeText),
    spec("bus_bahn_strassenbahn_hinreise", Monetary),
    spec("planmaessige_abfahrt", FreeText),
    spec("schwerbeschaedigt_hinreise", FreeText),
];

/// Canonical fields of the return journey.
pub const RETURN_FIELDS: &[FieldSpec] = &[
    spec("rueckreise_von", Location),
    spec("rueckreise_nach", Location),
    spec("rueckreise_am", Date),
    spec("rueckreise_uhrzeit", Time),
    spec("rueckreise_ende_am", Date),
    spec("rueckreise_ende_uhrzeit", Time),
    spec("rueckreise_ort", FreeText),
    spec("verkehrsmittel_rueckreise", FreeText),
    spec("klasse_rueckreise", FreeText),
    spec("flugzeug_rueckreise", Monetary),
    spec("bahn_1u2_klasse_rueckreise", Monetary),
    spec("eigenes_kfz_rueckreise", FreeText),
    spec("dienstwagen_rueckreise", FreeText),
    spec("fahrgemeinschaft_rueckreise", FreeText),
    spec("sonstiges_rueckreise", FreeText),
    spec("bus_bahn_strassenbahn_rueckreise", Monetary),
    spec("schwerbeschaedigt_rueckreise", FreeText),
];

/// Canonical fields of the hotel/conference bundle.
pub const HOTEL_FIELDS: &[FieldSpec] = &[
    spec("geschaeftsort_am", Date),
    spec("geschaeftsort_uhrzeit", Time),
    spec("dienstgeschaeft_am", Date),
    spec("dienstgeschaeft_um", Time),
    spec("ende_dienstgeschaeft_am", Date),
    spec("ende_dienstgeschaeft_um", Time),
    spec("kosten_unterkunft", Monetary),
    spec("sonstige_kosten", Monetary),
    spec("bus_geschaeftsort", FreeText),
    spec("fahrtkosten_bahn", Monetary),
    spec("sonstige_geschaeftsort", FreeText),
    spec("fahrtkosten_sonstiges", Monetary),
];

/// Applicant fields, read from the travel-request form rather than extracted
/// by the vision model. Bank data is always sourced from the form itself.
pub const APPLICANT_FIELDS: &[FieldSpec] = &[
    spec("antragsteller_name", FreeText),
    spec("email_dienstlich", FreeText),
    spec("telefon_dienstlich", FreeText),
    spec("private_anschrift", FreeText),
    spec("institut", FreeText),
    spec("kreditinstitut", FreeText),
    spec("bic", FreeText),
    spec("iban", FreeText),
    spec("tagegeld", FreeText),
    spec("drittmittelprojekt", FreeText),
    spec("genehmigung_am_von", FreeText),
];

/// The catalog for one leg.
pub fn leg_fields(leg: Leg) -> &'static [FieldSpec] {
    match leg {
        Leg::Outbound => OUTBOUND_FIELDS,
        Leg::Return => RETURN_FIELDS,
        Leg::Hotel => HOTEL_FIELDS,
    }
}

/// Look up the category of a canonical key within a leg's catalog.
pub fn field_category(leg: Leg, key: &str) -> Option<FieldCategory> {
    leg_fields(leg).iter().find(|s| s.key == key).map(|s| s.category)
}

/// A flat map of canonical keys to string values for one leg (or for the
/// applicant block). Empty string means "not found / not applicable", as in
/// the extraction prompts. `BTreeMap` keeps iteration order deterministic so
/// filled forms are reproducible across runs.
pub type FieldSet = BTreeMap<String, String>;

/// Reduce an arbitrary key/value map to the leg's canonical schema.
///
/// Unknown keys are dropped; keys the model omitted become empty strings so
/// every field set always carries the complete catalog.
pub fn canonicalize(leg: Leg, raw: &BTreeMap<String, String>) -> FieldSet {
    let mut out = FieldSet::new();
    for spec in leg_fields(leg) {
        let value = raw.get(spec.key).cloned().unwrap_or_default();
        out.insert(spec.key.to_string(), value);
    }
    for key in raw.keys() {
        if !out.contains_key(key.as_str()) {
            tracing::debug!("{leg}: dropping unknown extracted key '{key}'");
        }
    }
    out
}

/// An all-empty field set for a leg (used when a leg has no documents or its
/// extraction failed).
pub fn empty_field_set(leg: Leg) -> FieldSet {
    canonicalize(leg, &BTreeMap::new())
}
