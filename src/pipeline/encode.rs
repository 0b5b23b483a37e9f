//! Image encoding: page bytes → base64 inline data for the vision request.
//!
//! The Gemini API accepts images as base64 `inlineData` parts embedded in
//! the JSON request body. Encoding is kept separate from the HTTP client so
//! the client's request-building stays a pure data transformation that tests
//! can inspect without network access.

use crate::pipeline::normalize::PagePart;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Serialize;
use tracing::debug;

/// One base64 inline image part of a `generateContent` request.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InlinePart {
    pub mime_type: String,
    pub data: String,
}

/// Encode a normalized page for the vision API.
pub fn encode_page(page: &PagePart) -> InlinePart {
    let data = STANDARD.encode(&page.data);
    debug!("encoded {} page → {} bytes base64", page.mime_type, data.len());
    InlinePart {
        mime_type: page.mime_type.clone(),
        data,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_round_trips() {
        let page = PagePart {
            mime_type: "image/png".to_string(),
            data: vec![1, 2, 3, 4, 5],
        };
        let part = encode_page(&page);
        assert_eq!(part.mime_type, "image/png");
        let decoded = STANDARD.decode(&part.data).expect("valid base64");
        assert_eq!(decoded, page.data);
    }

    #[test]
    fn serialises_with_camel_case_keys() {
        let part = encode_page(&PagePart {
            mime_type: "image/jpeg".to_string(),
            data: vec![0xFF],
        });
        let json = serde_json::to_value(&part).unwrap();
        assert!(json.get("mimeType").is_some());
        assert!(json.get("data").is_some());
    }
}
