//! The Form Filler: verified field sets → filled Reisekostenabrechnung PDF.
//!
//! Filling is mechanical by design. Values arrive here already validated and
//! already canonical; this module only translates canonical keys to the
//! template's literal field identifiers via [`crate::mapping`] and writes
//! `/V` entries. Field names are matched byte-exact against the raw `/T`
//! bytes — the template encodes many names as UTF-16BE byte strings and any
//! re-encoding on our side would silently miss them.
//!
//! The same AcroForm walk also reads the travel-request form, whose field
//! *values* carry the applicant data the orchestrator prefills from.

use crate::error::ReisefixError;
use crate::mapping::{FieldMapping, PdfFieldId};
use crate::schema::{FieldSet, Leg};
use lopdf::{Dictionary, Document as PdfDocument, Object, ObjectId, StringFormat};
use std::collections::HashMap;
use tracing::debug;

fn load(pdf: &[u8]) -> Result<PdfDocument, ReisefixError> {
    PdfDocument::load_mem(pdf).map_err(|e| ReisefixError::FillInvocation {
        detail: format!("could not parse PDF: {e}"),
    })
}

fn resolve<'a>(doc: &'a PdfDocument, obj: &'a Object) -> Option<&'a Object> {
    match obj {
        Object::Reference(id) => doc.get_object(*id).ok(),
        other => Some(other),
    }
}

/// Object ids of every terminal form field (a dict carrying `/T`), walking
/// `/Kids` so grouped fields are found too.
fn field_object_ids(doc: &PdfDocument) -> Result<Vec<ObjectId>, ReisefixError> {
    let missing = |what: &str| ReisefixError::FillInvocation {
        detail: format!("PDF has no fillable form ({what} missing)"),
    };

    let root = doc
        .trailer
        .get(b"Root")
        .ok()
        .and_then(|o| resolve(doc, o))
        .and_then(|o| o.as_dict().ok())
        .ok_or_else(|| missing("catalog"))?;
    let acro_form = root
        .get(b"AcroForm")
        .ok()
        .and_then(|o| resolve(doc, o))
        .and_then(|o| o.as_dict().ok())
        .ok_or_else(|| missing("AcroForm"))?;
    let fields = acro_form
        .get(b"Fields")
        .ok()
        .and_then(|o| resolve(doc, o))
        .and_then(|o| o.as_array().ok())
        .ok_or_else(|| missing("Fields"))?;

    let mut out = Vec::new();
    let mut stack: Vec<ObjectId> = fields
        .iter()
        .filter_map(|o| match o {
            Object::Reference(id) => Some(*id),
            _ => None,
        })
        .collect();

    while let Some(id) = stack.pop() {
        let Ok(dict) = doc.get_object(id).and_then(Object::as_dict) else {
            continue;
        };
        if dict.get(b"T").is_ok() {
            out.push(id);
        }
        if let Some(kids) = dict
            .get(b"Kids")
            .ok()
            .and_then(|o| resolve(doc, o))
            .and_then(|o| o.as_array().ok())
        {
            stack.extend(kids.iter().filter_map(|o| match o {
                Object::Reference(id) => Some(*id),
                _ => None,
            }));
        }
    }
    Ok(out)
}

fn field_name(doc: &PdfDocument, id: ObjectId) -> Option<Vec<u8>> {
    let dict = doc.get_object(id).and_then(Object::as_dict).ok()?;
    match dict.get(b"T").ok().and_then(|o| resolve(doc, o))? {
        Object::String(bytes, _) => Some(bytes.clone()),
        _ => None,
    }
}

/// Raw `/T` bytes of every form field in the document.
pub fn list_field_names(pdf: &[u8]) -> Result<Vec<Vec<u8>>, ReisefixError> {
    let doc = load(pdf)?;
    let ids = field_object_ids(&doc)?;
    Ok(ids.into_iter().filter_map(|id| field_name(&doc, id)).collect())
}

/// Decode a PDF text string: UTF-16BE when BOM-prefixed, Latin-1 otherwise.
fn decode_pdf_text(bytes: &[u8]) -> String {
    if bytes.len() >= 2 && bytes[0] == 0xFE && bytes[1] == 0xFF {
        let units: Vec<u16> = bytes[2..]
            .chunks_exact(2)
            .map(|c| u16::from_be_bytes([c[0], c[1]]))
            .collect();
        String::from_utf16_lossy(&units)
    } else {
        bytes.iter().map(|&b| b as char).collect()
    }
}

/// Encode a value for a `/V` entry. ASCII stays literal; anything else is
/// written as UTF-16BE with BOM, which every conforming reader accepts.
fn encode_pdf_text(value: &str) -> Object {
    if value.is_ascii() {
        Object::String(value.as_bytes().to_vec(), StringFormat::Literal)
    } else {
        let mut bytes = vec![0xFE, 0xFF];
        for unit in value.encode_utf16() {
            bytes.extend_from_slice(&unit.to_be_bytes());
        }
        Object::String(bytes, StringFormat::Hexadecimal)
    }
}

/// Read every form field's current value, keyed by decoded field name.
///
/// This is how the travel-request form is processed: its data lives in the
/// `/V` entries the applicant typed in, so no vision call is needed.
pub fn read_form_values(pdf: &[u8]) -> Result<HashMap<String, String>, ReisefixError> {
    let doc = load(pdf)?;
    let ids = field_object_ids(&doc)?;
    let mut out = HashMap::new();
    for id in ids {
        let Some(name) = field_name(&doc, id) else { continue };
        let dict = doc
            .get_object(id)
            .and_then(Object::as_dict)
            .map_err(|e| ReisefixError::Internal(format!("field dict vanished: {e}")))?;
        let value = match dict.get(b"V").ok().and_then(|o| resolve(&doc, o)) {
            Some(Object::String(bytes, _)) => decode_pdf_text(bytes),
            Some(Object::Name(bytes)) => decode_pdf_text(bytes),
            _ => String::new(),
        };
        out.insert(decode_pdf_text(&name), value);
    }
    Ok(out)
}

/// Translate verified session state into `(identifier, value)` pairs.
///
/// Canonical keys with no mapping entry are dropped here, quietly: the
/// mapping is a deliberate subset of the catalog and dropping is the
/// specified behavior, not an error.
pub fn resolve_fields(
    applicant: &FieldSet,
    verified: &HashMap<Leg, FieldSet>,
) -> Vec<(PdfFieldId, String)> {
    let mapping = FieldMapping::shared();
    let mut out = Vec::new();
    let mut push_set = |set: &FieldSet| {
        for (key, value) in set {
            match mapping.resolve(key) {
                Some(entry) => out.push((entry.pdf_field.clone(), value.clone())),
                None => debug!("canonical key '{key}' has no form mapping, dropped"),
            }
        }
    };
    push_set(applicant);
    for leg in Leg::ALL {
        if let Some(set) = verified.get(&leg) {
            push_set(set);
        }
    }
    out
}

/// Fill the expense-report template with the resolved values.
///
/// Every identifier must match a `/T` byte-exact; a miss means mapping and
/// template have drifted, which the startup integrity check should have
/// caught, so it is surfaced as [`ReisefixError::MappingIntegrity`] rather
/// than being skipped. `NeedAppearances` is set so viewers regenerate the
/// widget appearance streams for the new values.
pub fn fill_form(
    template: &[u8],
    values: &[(PdfFieldId, String)],
) -> Result<Vec<u8>, ReisefixError> {
    let mut doc = load(template)?;

    let ids = field_object_ids(&doc)?;
    let mut by_name: HashMap<Vec<u8>, ObjectId> = HashMap::new();
    for id in ids {
        if let Some(name) = field_name(&doc, id) {
            by_name.insert(name, id);
        }
    }

    for (field, value) in values {
        let id = by_name
            .get(field.as_bytes())
            .copied()
            .ok_or_else(|| ReisefixError::MappingIntegrity {
                identifier: field.display_name(),
            })?;
        let dict = doc
            .get_object_mut(id)
            .and_then(Object::as_dict_mut)
            .map_err(|e| ReisefixError::Internal(format!("field dict vanished: {e}")))?;
        dict.set(b"V".to_vec(), encode_pdf_text(value));
        // Stale appearance streams would keep showing the old (empty) value.
        dict.remove(b"AP");
    }

    set_need_appearances(&mut doc)?;

    let mut buf = Vec::new();
    doc.save_to(&mut buf)
        .map_err(|e| ReisefixError::FillInvocation {
            detail: format!("could not serialise filled PDF: {e}"),
        })?;
    Ok(buf)
}

fn set_need_appearances(doc: &mut PdfDocument) -> Result<(), ReisefixError> {
    let corrupt = |what: &str| ReisefixError::FillInvocation {
        detail: format!("template lost its {what} during filling"),
    };

    let root_id = match doc.trailer.get(b"Root") {
        Ok(Object::Reference(id)) => *id,
        _ => return Err(corrupt("catalog")),
    };
    // AcroForm may be inline in the catalog or an indirect object.
    let acro_ref = {
        let root = doc
            .get_object(root_id)
            .and_then(Object::as_dict)
            .map_err(|_| corrupt("catalog"))?;
        match root.get(b"AcroForm") {
            Ok(Object::Reference(id)) => Some(*id),
            Ok(Object::Dictionary(_)) => None,
            _ => return Err(corrupt("AcroForm")),
        }
    };
    let form: &mut Dictionary = match acro_ref {
        Some(id) => doc
            .get_object_mut(id)
            .and_then(Object::as_dict_mut)
            .map_err(|_| corrupt("AcroForm"))?,
        None => {
            let root = doc
                .get_object_mut(root_id)
                .and_then(Object::as_dict_mut)
                .map_err(|_| corrupt("catalog"))?;
            root.get_mut(b"AcroForm")
                .and_then(Object::as_dict_mut)
                .map_err(|_| corrupt("AcroForm"))?
        }
    };
    form.set(b"NeedAppearances".to_vec(), Object::Boolean(true));
    Ok(())
}

/// Startup integrity check: every mapped identifier exists in the template.
pub fn verify_mapping(template: &[u8]) -> Result<(), ReisefixError> {
    let names = list_field_names(template)?;
    FieldMapping::shared().verify_against_template(names.iter().map(|v| v.as_slice()))
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use lopdf::dictionary;

    /// Build a minimal fillable PDF with the given raw field names and values.
    pub fn form_pdf(fields: &[(&[u8], &str)]) -> Vec<u8> {
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
                d.set(b"V".to_vec(), encode_pdf_text(value));
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

    /// A template carrying every identifier the mapping knows about.
    pub fn full_template() -> Vec<u8> {
        let names: Vec<Vec<u8>> = FieldMapping::shared()
            .entries()
            .map(|e| e.pdf_field.as_bytes().to_vec())
            .collect();
        let fields: Vec<(&[u8], &str)> = names.iter().map(|n| (n.as_slice(), "")).collect();
        form_pdf(&fields)
    }
}
