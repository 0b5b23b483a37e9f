//! The Field Mapping: canonical keys → the external form's literal field
//! identifiers.
//!
//! The Reisekostenabrechnung template names many of its fields with UTF-16BE
//! byte strings (a `FE FF` byte-order mark followed by two-byte code units),
//! because the form's authoring tool wrote non-ASCII names that way. The
//! PDF-filling primitive matches `/T` entries by exact byte equality, so the
//! mapping carries every identifier as an opaque byte sequence and never
//! treats it as a display string. The human-readable decoding exists only for
//! error messages.
//!
//! The mapping is a deliberate strict subset of the canonical catalog: a
//! canonical field with no entry here is silently dropped by the Form Filler.

use crate::schema::FieldCategory;
use once_cell::sync::Lazy;
use std::collections::BTreeMap;
use std::fmt;

/// An external form field identifier, compared byte-exact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PdfFieldId(Vec<u8>);

impl PdfFieldId {
    /// Identifier stored as plain Latin-1 bytes (ASCII names and the handful
    /// of plain names carrying umlauts, e.g. "Bus Geschäftsort").
    pub fn latin1(name: &str) -> Self {
        let bytes = name
            .chars()
            .map(|c| {
                debug_assert!((c as u32) < 256, "latin1 identifier with non-latin1 char");
                c as u8
            })
            .collect();
        PdfFieldId(bytes)
    }

    /// Identifier stored as a UTF-16BE byte string with leading BOM, the way
    /// the form template encodes its non-ASCII field names.
    pub fn utf16be(name: &str) -> Self {
        let mut bytes = vec![0xFE, 0xFF];
        for unit in name.encode_utf16() {
            bytes.extend_from_slice(&unit.to_be_bytes());
        }
        PdfFieldId(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Best-effort human-readable form, for diagnostics only.
    pub fn display_name(&self) -> String {
        if self.0.len() >= 2 && self.0[0] == 0xFE && self.0[1] == 0xFF {
            let units: Vec<u16> = self.0[2..]
                .chunks_exact(2)
                .map(|c| u16::from_be_bytes([c[0], c[1]]))
                .collect();
            String::from_utf16_lossy(&units)
        } else {
            self.0.iter().map(|&b| b as char).collect()
        }
    }
}

impl fmt::Display for PdfFieldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display_name())
    }
}

/// One static mapping record: canonical key → external identifier plus the
/// category used for validation.
#[derive(Debug, Clone)]
pub struct MappingEntry {
    pub canonical_key: &'static str,
    pub pdf_field: PdfFieldId,
    pub category: FieldCategory,
}

/// The full canonical-key → form-identifier table, keyed by leg (applicant
/// fields live under `None`).
pub struct FieldMapping {
    entries: BTreeMap<&'static str, MappingEntry>,
}

impl FieldMapping {
    /// The process-wide mapping instance.
    pub fn shared() -> &'static FieldMapping {
        &MAPPING
    }

    /// Resolve a canonical key to its external identifier, if mapped.
    pub fn resolve(&self, key: &str) -> Option<&MappingEntry> {
        self.entries.get(key)
    }

    /// All entries, in deterministic key order.
    pub fn entries(&self) -> impl Iterator<Item = &MappingEntry> {
        self.entries.values()
    }

    /// Startup integrity check: every mapped identifier must exist among the
    /// template's field names (byte-exact). A miss means the mapping and the
    /// template have drifted apart and filling would silently lose data.
    pub fn verify_against_template<'a>(
        &self,
        template_field_names: impl IntoIterator<Item = &'a [u8]>,
    ) -> Result<(), crate::error::ReisefixError> {
        let names: std::collections::HashSet<&[u8]> =
            template_field_names.into_iter().collect();
        for entry in self.entries.values() {
            if !names.contains(entry.pdf_field.as_bytes()) {
                return Err(crate::error::ReisefixError::MappingIntegrity {
                    identifier: entry.pdf_field.display_name(),
                });
            }
        }
        Ok(())
    }
}

static MAPPING: Lazy<FieldMapping> = Lazy::new(build_mapping);

fn build_mapping() -> FieldMapping {
    use FieldCategory::{Date, FreeText, Location, Monetary, Time};

    let mut entries = BTreeMap::new();
    let mut add = |key: &'static str, id: PdfFieldId, category: FieldCategory| {
        entries.insert(
            key,
            MappingEntry {
                canonical_key: key,
                pdf_field: id,
                category,
            },
        );
    };

    // ── Applicant block (from the travel-request form) ───────────────────
    add("antragsteller_name", PdfFieldId::latin1("AntragstellerIn_Name_Vorname"), FreeText);
    add("email_dienstlich", PdfFieldId::latin1("E-Mail-dienstlich"), FreeText);
    add("telefon_dienstlich", PdfFieldId::latin1("Telefon_dienstlich"), FreeText);
    add("private_anschrift", PdfFieldId::utf16be("Private_Anschrift_Straße_PLZ_Wohnort"), FreeText);
    add("institut", PdfFieldId::utf16be("BeschäftigungsstelleInstitut_einschl_Anschrift"), FreeText);
    add("kreditinstitut", PdfFieldId::latin1("Kreditinstitut"), FreeText);
    add("bic", PdfFieldId::latin1("BIC"), FreeText);
    // The template misspells this field; the byte sequence below is what the
    // form actually carries.
    add("iban", PdfFieldId::latin1("BAN"), FreeText);
    add("tagegeld", PdfFieldId::latin1("Tagegeld"), FreeText);
    add("drittmittelprojekt", PdfFieldId::latin1("Drittmittelprojekt"), FreeText);
    add("genehmigung_am_von", PdfFieldId::latin1("Genehmigung_der_Dienstreise_am__von"), FreeText);

    // ── Outbound journey ─────────────────────────────────────────────────
    add("hinreise_von", PdfFieldId::latin1("Hinreise_von"), Location);
    add("hinreise_nach", PdfFieldId::latin1("Hinreise_nach"), Location);
    add("hinreise_beginn", PdfFieldId::latin1("Hinreise_Beginn"), Date);
    add("hinreise_uhrzeit", PdfFieldId::latin1("Hinreise_Uhrzeit"), Time);
    add("hinreise_ort", PdfFieldId::latin1("Hinreise_Ort"), FreeText);
    add("hinreise_urlaubsort", PdfFieldId::latin1("Hinreise_Urlaubsort"), FreeText);
    add("verkehrsmittel_hinreise", PdfFieldId::latin1("Verkehrsmittel Hinreise"), FreeText);
    add("klasse_hinreise", PdfFieldId::latin1("Klasse Hinreise"), FreeText);
    add("flugzeug_hinreise", PdfFieldId::latin1("Flugzeug_Hinreise"), Monetary);
    add("bahn_1u2_klasse_hinreise", PdfFieldId::latin1("Bahn_1u2_Klasse_Hinreise"), Monetary);
    add("eigenes_kfz_hinreise", PdfFieldId::latin1("Eigenes_KfZ_Hinreise"), FreeText);
    add("dienstwagen_hinreise", PdfFieldId::latin1("Dienstwagen_Hinreise"), FreeText);
    add("fahrgemeinschaft_hinreise", PdfFieldId::latin1("Fahrgemeinschaft Hinreise"), FreeText);
    add("sonstiges_hinreise", PdfFieldId::latin1("Sonstiges_Hinreise"), FreeText);
    add("bus_bahn_strassenbahn_hinreise", PdfFieldId::latin1("Bus_Bahn_Strassenbahn_Hinreise"), Monetary);
    // Plain names despite the umlauts, like "Rückreise_Ort" below: the
    // template stores these two as single-byte strings, not UTF-16BE.
    add("planmaessige_abfahrt", PdfFieldId::latin1("planmäßige_Abfahrt"), FreeText);
    add("schwerbeschaedigt_hinreise", PdfFieldId::latin1("Schwerbeschädigt Hinreise"), FreeText);

    // ── Return journey ───────────────────────────────────────────────────
    add("rueckreise_von", PdfFieldId::utf16be("Rückreise von"), Location);
    add("rueckreise_nach", PdfFieldId::utf16be("Rückreise nach"), Location);
    add("rueckreise_am", PdfFieldId::utf16be("Rückreise am"), Date);
    add("rueckreise_uhrzeit", PdfFieldId::utf16be("Rückreise Uhrzeit"), Time);
    add("rueckreise_ende_am", PdfFieldId::utf16be("Rückreise Ende am"), Date);
    add("rueckreise_ende_uhrzeit", PdfFieldId::utf16be("Rückreise Ende Uhrzeit"), Time);
    add("rueckreise_ort", PdfFieldId::latin1("Rückreise_Ort"), FreeText);
    add("verkehrsmittel_rueckreise", PdfFieldId::latin1("Verkehrsmittel Rückreise"), FreeText);
    add("klasse_rueckreise", PdfFieldId::latin1("Klasse Rückreise"), FreeText);
    add("flugzeug_rueckreise", PdfFieldId::utf16be("Flugzeug_Rückreise"), Monetary);
    add("bahn_1u2_klasse_rueckreise", PdfFieldId::utf16be("Bahn_1u2_Klasse_Rückreise"), Monetary);
    add("eigenes_kfz_rueckreise", PdfFieldId::utf16be("Eigenes_KfZ_Rückreise"), FreeText);
    add("dienstwagen_rueckreise", PdfFieldId::utf16be("Dienstwagen_Rückreise"), FreeText);
    add("fahrgemeinschaft_rueckreise", PdfFieldId::utf16be("Fahrgemeinschaft_Rückreise"), FreeText);
    add("sonstiges_rueckreise", PdfFieldId::utf16be("Sonstiges_Rückreise"), FreeText);
    add("bus_bahn_strassenbahn_rueckreise", PdfFieldId::utf16be("Bus_Bahn_Straßenbahn_Rückreise"), Monetary);
    add("schwerbeschaedigt_rueckreise", PdfFieldId::utf16be("Schwerbeschädigt_Rückreise"), FreeText);

    // ── Hotel / conference ───────────────────────────────────────────────
    add("geschaeftsort_am", PdfFieldId::utf16be("Geschäftsort_am"), Date);
    add("geschaeftsort_uhrzeit", PdfFieldId::utf16be("Geschäftsort_Uhrzeit"), Time);
    add("dienstgeschaeft_am", PdfFieldId::utf16be("Dienstgeschäft_am"), Date);
    add("dienstgeschaeft_um", PdfFieldId::utf16be("Dienstgeschäft_um"), Time);
    add("ende_dienstgeschaeft_am", PdfFieldId::utf16be("Ende_Dienstgeschäft_am"), Date);
    add("ende_dienstgeschaeft_um", PdfFieldId::utf16be("Ende_Dienstgeschäft_um"), Time);
    add("kosten_unterkunft", PdfFieldId::utf16be("Geschäftskort_Kosten_Unterkunft"), Monetary);
    add("sonstige_kosten", PdfFieldId::utf16be("Geschäftskort_sonstige_Kosten"), Monetary);
    add("bus_geschaeftsort", PdfFieldId::latin1("Bus Geschäftsort"), FreeText);
    add("fahrtkosten_bahn", PdfFieldId::utf16be("Geschäftskort_Fahrtkosten_Bahn_Straßenbahn"), Monetary);
    add("sonstige_geschaeftsort", PdfFieldId::latin1("Sonstige Geschäftsort"), FreeText);
    add("fahrtkosten_sonstiges", PdfFieldId::utf16be("Geschäftskort_Fahrtkosten_sonstiges"), Monetary);

    FieldMapping { entries }
}

/// Sanity cross-check used by tests: every mapped key that names a leg field
/// must exist in that leg's catalog with the same category.
#[cfg(test)]
fn catalog_entry(key: &str) -> Option<FieldCategory> {
    for leg in crate::schema::Leg::ALL {
        if let Some(cat) = crate::schema::field_category(leg, key) {
            return Some(cat);
        }
    }
    crate::schema::APPLICANT_FIELDS
        .iter()
        .find(|s| s.key == key)
        .map(|s| s.category)
}
