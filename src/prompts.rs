//! Extraction prompts for the vision model, one per trip leg.
//!
//! Centralising every prompt here serves two purposes:
//!
//! 1. **Single source of truth** — the canonical keys the model is told to
//!    emit are exactly the keys in [`crate::schema`]; changing a field means
//!    editing the catalog and this file, nowhere else.
//!
//! 2. **Testability** — unit tests can inspect prompts directly without a
//!    live model, so a renamed key can't silently desynchronise prompt and
//!    schema.
//!
//! The model is asked for a JSON list of objects; the Extraction Client takes
//! the first element and coerces values to strings. Keys the model invents
//! are dropped at the canonicalisation boundary.

use crate::schema::Leg;

const COMMON_PREAMBLE: &str = r#"You are an expert at extracting travel expense details from receipts. You will be provided with one or more document images (converted from original images or PDF pages). Extract the information below and return it as a JSON object within a list. The JSON keys MUST exactly match the specified field names. If a field cannot be found or is not applicable, return its value as an empty string. For amounts, extract the numerical value followed by the currency symbol. If there are several documents, infer the data that is likely to be connected and merge it into one output.

Date format: DD.MM.YYYY
Time format: HH:MM (24-hour, two digits each)

Output format: a JSON list where each element is a JSON object representing the merged extracted data. Do not wrap the output in markdown fences."#;

/// Prompt for the outbound journey (Hinreise).
pub const OUTBOUND_PROMPT_FIELDS: &str = r#"
If a receipt represents both the outbound and return journeys (e.g. a roundtrip flight ticket), split the cost evenly between the two journeys, dividing the total by two.

Required fields:
- "hinreise_von": origin city/location of the outbound journey, e.g. "Blaustein-Arnegg"
- "hinreise_nach": destination city/location of the outbound journey, e.g. "Bangkok"
- "hinreise_beginn": start date of the outbound journey, e.g. "12.12.2024"
- "hinreise_uhrzeit": start time of the outbound journey, e.g. "17:00"
- "hinreise_ort": specific place of departure, either "Wohnung" or "Dienststelle"
- "hinreise_urlaubsort": if the outbound journey ends at a vacation spot before the official trip, otherwise empty string
- "verkehrsmittel_hinreise": primary mode of transport, e.g. "Flugzeug", "Bahn", "Eigenes_KfZ", "Fahrgemeinschaft", "Bus_Bahn_Strassenbahn", "Schiff", "Sonstiges"
- "klasse_hinreise": class of travel if applicable, either "Klasse 2" or "Klasse 1"; empty string if not specified
- "flugzeug_hinreise": cost for air travel on the outbound journey, e.g. "1234,56€". This cannot be left empty
- "bahn_1u2_klasse_hinreise": cost for train travel including class details, e.g. "44,00€" or "1. Klasse"
- "eigenes_kfz_hinreise": details for personal car usage, distance in km and any parking notes, e.g. "88km Parken Freising"
- "dienstwagen_hinreise": details for company car usage, if applicable
- "fahrgemeinschaft_hinreise": if part of a carpool, state "Fahrgemeinschaft"
- "sonstiges_hinreise": any other relevant notes or costs not covered above, e.g. "(Hin- und Rückflug)" or "Taxi 25€"
- "bus_bahn_strassenbahn_hinreise": cost for bus, tram, or local train travel, e.g. "67,00€ (Parken)"; do not put the flight cost here
- "planmaessige_abfahrt": if the outbound departure was scheduled on time, otherwise empty string
- "schwerbeschaedigt_hinreise": if the traveler is severely disabled for the outbound journey, otherwise empty string"#;

/// Prompt for the return journey (Rückreise). `{context}` is replaced with
/// the outbound leg's extracted JSON so overlapping receipts are not double
/// counted.
pub const RETURN_PROMPT_FIELDS: &str = r#"
You are also given the JSON output of the outbound journey to help identify overlapping information and prevent duplication:
{context}

If a receipt represents both the outbound and return journeys, split the cost evenly (divide the total by two). If it only covers the outbound trip, ignore it. If it only covers the return trip, extract it normally.

Required fields:
- "rueckreise_von": origin city/location of the return journey, e.g. "Bangkok"
- "rueckreise_nach": destination city/location of the return journey, e.g. "Blaustein-Arnegg"
- "rueckreise_am": start date of the return journey, e.g. "22.12.2024"
- "rueckreise_uhrzeit": start time of the return journey, e.g. "23:30"
- "rueckreise_ende_am": end date of the return journey, e.g. "23.12.2024"
- "rueckreise_ende_uhrzeit": end time of the return journey, e.g. "10:00"
- "rueckreise_ort": specific place of arrival, e.g. "Wohnung" or "Dienststelle"
- "verkehrsmittel_rueckreise": primary mode of transport, e.g. "Flugzeug", "Bahn", "Eigenes_KfZ", "Fahrgemeinschaft", "Bus_Bahn_Strassenbahn", "Schiff", "Sonstiges"
- "klasse_rueckreise": class of travel, "Klasse 1" or "Klasse 2"; empty if not specified
- "flugzeug_rueckreise": cost for air travel on the return journey, e.g. "717,31€". This cannot be left empty
- "bahn_1u2_klasse_rueckreise": cost for train travel, e.g. "44,00€" or "1. Klasse"
- "eigenes_kfz_rueckreise": details for personal car usage, e.g. "174km"
- "dienstwagen_rueckreise": details for company car usage
- "fahrgemeinschaft_rueckreise": if part of a carpool, e.g. "Fahrgemeinschaft"
- "sonstiges_rueckreise": any other relevant notes or costs, e.g. "Taxi 25€"
- "bus_bahn_strassenbahn_rueckreise": cost for local transport, e.g. "15,00€ (Parken)"
- "schwerbeschaedigt_rueckreise": if the traveler is severely disabled for the return journey"#;

/// Prompt for the hotel/conference bundle.
pub const HOTEL_PROMPT_FIELDS: &str = r#"
If a receipt only covers the flights, ignore it.

Required fields:
- "geschaeftsort_am": date of arrival at the conference venue; use the hotel arrival date
- "geschaeftsort_uhrzeit": time of arrival at the venue, or the hotel check-in time; if neither is available, put "15:00"
- "dienstgeschaeft_am": start date of the conference
- "dienstgeschaeft_um": start time of the conference
- "ende_dienstgeschaeft_am": end date of the conference
- "ende_dienstgeschaeft_um": end time of the conference
- "kosten_unterkunft": costs for accommodation including breakfast if included; if the room capacity is more than one person, divide the total by the number of persons. This cannot be left empty and should carry a euro symbol
- "sonstige_kosten": other costs (conference fee, parking fees, ...) with the currency symbol
- "bus_geschaeftsort": checkbox; "ja" if bus or tram is used for business travel at the venue, else "nein"
- "fahrtkosten_bahn": costs for train or tram tickets at the venue
- "sonstige_geschaeftsort": checkbox; "ja" if other means of transport (e.g. taxi) are used at the venue, else "nein"
- "fahrtkosten_sonstiges": costs for other means of transport (e.g. taxi)"#;

/// Assemble the full prompt for one leg. `outbound_context` is the outbound
/// leg's extracted JSON, used only by the return-leg prompt.
pub fn leg_prompt(leg: Leg, outbound_context: Option<&str>) -> String {
    match leg {
        Leg::Outbound => format!("{COMMON_PREAMBLE}\n{OUTBOUND_PROMPT_FIELDS}"),
        Leg::Return => {
            let fields =
                RETURN_PROMPT_FIELDS.replace("{context}", outbound_context.unwrap_or("{}"));
            format!("{COMMON_PREAMBLE}\n{fields}")
        }
        Leg::Hotel => format!("{COMMON_PREAMBLE}\n{HOTEL_PROMPT_FIELDS}"),
    }
}
