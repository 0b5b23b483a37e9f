//! The Extraction Client: one vision-model call per trip leg.
//!
//! [`VisionExtractor`] is the seam between the pipeline and the external
//! model. It is a pure function from page images + prompt to a flat
//! key/value map — it never touches session state. Tests substitute a mock;
//! production uses [`GeminiExtractor`] against the Gemini REST API.
//!
//! The model is not schema-constrained, so malformed output is the principal
//! failure mode to defend against: anything that does not parse as a JSON
//! list of objects becomes [`LegError::Parse`] at this boundary and raw model
//! text never travels further into the pipeline.
//!
//! ## Retry Strategy
//!
//! HTTP 429 / 5xx responses are transient and frequent under concurrent
//! load. Exponential backoff (`retry_backoff_ms * 2^attempt`) avoids
//! thundering-herd; parse failures and timeouts are not retried — a model
//! that answered garbage once will usually answer garbage again, and the
//! timeout exists to bound total leg latency.

use crate::config::PipelineConfig;
use crate::error::LegError;
use crate::pipeline::encode::{encode_page, InlinePart};
use crate::pipeline::normalize::PagePart;
use crate::schema::Leg;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, warn};

/// Boundary abstraction around the external vision model.
#[async_trait]
pub trait VisionExtractor: Send + Sync {
    /// Extract a flat key/value structure from the leg's page images.
    ///
    /// Implementations must respect the upstream input limits, enforce a
    /// timeout, and reject non-JSON output — never propagate garbage values.
    async fn extract(
        &self,
        leg: Leg,
        pages: &[PagePart],
        prompt: &str,
    ) -> Result<BTreeMap<String, String>, LegError>;
}

const BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// [`VisionExtractor`] implementation that talks to the Gemini HTTP API.
pub struct GeminiExtractor {
    client: reqwest::Client,
    api_key: String,
    config: PipelineConfig,
}

impl GeminiExtractor {
    pub fn new(api_key: impl Into<String>, config: PipelineConfig) -> Self {
        GeminiExtractor {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            config,
        }
    }

    /// Read the API key from `GEMINI_API_KEY`.
    pub fn from_env(config: PipelineConfig) -> Result<Self, crate::error::ReisefixError> {
        let api_key = std::env::var("GEMINI_API_KEY").map_err(|_| {
            crate::error::ReisefixError::InvalidConfig(
                "GEMINI_API_KEY not found in environment variables".into(),
            )
        })?;
        Ok(Self::new(api_key, config))
    }

    fn build_request(&self, pages: &[InlinePart], prompt: &str) -> GenerateContentRequest {
        let mut parts = vec![Part::Text {
            text: prompt.to_string(),
        }];
        parts.extend(pages.iter().map(|p| Part::InlineData {
            inline_data: p.clone(),
        }));
        GenerateContentRequest {
            contents: vec![Content {
                role: "user".to_string(),
                parts,
            }],
        }
    }

    async fn call_once(
        &self,
        leg: Leg,
        body: &GenerateContentRequest,
    ) -> Result<String, LegError> {
        let url = format!(
            "{BASE_URL}/{model}:generateContent?key={key}",
            model = self.config.model,
            key = self.api_key
        );

        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| LegError::Api {
                leg,
                status: None,
                message: format!("request failed: {e}"),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response
                .text()
                .await
                .unwrap_or_else(|_| "failed to read error body".to_string());
            let message = serde_json::from_str::<ErrorWrapper>(&body_text)
                .map(|w| w.error.message.unwrap_or(body_text.clone()))
                .unwrap_or(body_text);
            return Err(LegError::Api {
                leg,
                status: Some(status.as_u16()),
                message,
            });
        }

        let parsed: GenerateContentResponse =
            response.json().await.map_err(|e| LegError::Parse {
                leg,
                detail: format!("response envelope: {e}"),
            })?;

        parsed
            .candidates
            .and_then(|mut c| if c.is_empty() { None } else { Some(c.remove(0)) })
            .and_then(|c| c.content)
            .and_then(|c| c.parts.into_iter().find_map(|p| p.text))
            .ok_or_else(|| LegError::Parse {
                leg,
                detail: "no text in response candidates".to_string(),
            })
    }
}

#[async_trait]
impl VisionExtractor for GeminiExtractor {
    async fn extract(
        &self,
        leg: Leg,
        pages: &[PagePart],
        prompt: &str,
    ) -> Result<BTreeMap<String, String>, LegError> {
        let cap = self.config.max_pages_per_call;
        if pages.len() > cap {
            warn!(
                "{leg}: {} pages exceed the per-call cap of {cap}; extra pages dropped",
                pages.len()
            );
        }
        let encoded: Vec<InlinePart> = pages.iter().take(cap).map(encode_page).collect();
        let body = self.build_request(&encoded, prompt);

        let mut last_err = None;
        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let backoff = self.config.retry_backoff_ms * 2u64.pow(attempt - 1);
                warn!(
                    "{leg}: retry {attempt}/{} after {backoff}ms",
                    self.config.max_retries
                );
                sleep(Duration::from_millis(backoff)).await;
            }

            let call = self.call_once(leg, &body);
            match timeout(self.config.extraction_timeout(), call).await {
                Err(_) => {
                    return Err(LegError::Timeout {
                        leg,
                        secs: self.config.extraction_timeout_secs,
                    });
                }
                Ok(Ok(text)) => {
                    debug!("{leg}: model responded with {} chars", text.len());
                    return parse_extraction(leg, &text);
                }
                Ok(Err(e)) => {
                    if !is_retryable(&e) {
                        return Err(e);
                    }
                    warn!("{leg}: attempt {} failed — {e}", attempt + 1);
                    last_err = Some(e);
                }
            }
        }

        Err(last_err.unwrap_or(LegError::Api {
            leg,
            status: None,
            message: "retries exhausted".to_string(),
        }))
    }
}

fn is_retryable(err: &LegError) -> bool {
    match err {
        LegError::Api { status, .. } => {
            matches!(status, None | Some(429) | Some(500..=599))
        }
        _ => false,
    }
}

/// Parse the model's raw text into a flat string map.
///
/// The expected shape is a JSON list of objects; the first object wins
/// (the prompts instruct the model to merge receipts into one). Models
/// routinely wrap JSON in markdown fences despite being told not to, so
/// fences are stripped before parsing. A bare object is tolerated for the
/// same reason. Everything else is a parse failure.
pub fn parse_extraction(leg: Leg, raw: &str) -> Result<BTreeMap<String, String>, LegError> {
    let cleaned = strip_fences(raw);

    let value: serde_json::Value =
        serde_json::from_str(cleaned).map_err(|e| LegError::Parse {
            leg,
            detail: format!("not valid JSON: {e}"),
        })?;

    let map = match value {
        serde_json::Value::Array(items) => items
            .into_iter()
            .find_map(|v| match v {
                serde_json::Value::Object(m) => Some(m),
                _ => None,
            })
            .ok_or(LegError::Parse {
                leg,
                detail: "JSON list contains no object".to_string(),
            })?,
        serde_json::Value::Object(m) => m,
        other => {
            return Err(LegError::Parse {
                leg,
                detail: format!("expected a JSON list of objects, got {}", kind_of(&other)),
            })
        }
    };

    let mut out = BTreeMap::new();
    for (key, value) in &map {
        let coerced = match value {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Null => String::new(),
            serde_json::Value::Number(n) => n.to_string(),
            serde_json::Value::Bool(b) => b.to_string(),
            other => {
                return Err(LegError::Parse {
                    leg,
                    detail: format!("field '{key}' is {}, not a scalar", kind_of(other)),
                })
            }
        };
        out.insert(key.clone(), coerced);
    }
    Ok(out)
}

/// Strip a surrounding markdown code fence, if present.
fn strip_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string ("json") up to the first newline.
    let body = rest.split_once('\n').map(|(_, b)| b).unwrap_or(rest);
    body.strip_suffix("```").unwrap_or(body).trim()
}

// ── Gemini wire types ────────────────────────────────────────────────────

#[derive(Serialize)]
struct GenerateContentRequest {
    contents: Vec<Content>,
}

#[derive(Serialize)]
struct Content {
    role: String,
    parts: Vec<Part>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum Part {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: InlinePart,
    },
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    candidates: Option<Vec<Candidate>>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<ContentResponse>,
}

#[derive(Deserialize)]
struct ContentResponse {
    parts: Vec<PartResponse>,
}

#[derive(Deserialize)]
struct PartResponse {
    text: Option<String>,
}

#[derive(Deserialize)]
struct ErrorWrapper {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

fn kind_of(v: &serde_json::Value) -> &'static str {
    match v {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "a list",
        serde_json::Value::Object(_) => "an object",
    }
}
