//! Configuration for the receipt-processing pipeline.
//!
//! All behaviour is controlled through [`PipelineConfig`], built via its
//! [`PipelineConfigBuilder`]. Keeping every knob in one struct makes it
//! trivial to share across sessions, log, and diff two runs to understand
//! why their outputs differ.
//!
//! # Design choice: builder over constructor
//! A ten-field constructor is unreadable and breaks on every new field. The
//! builder lets callers set only what they care about and rely on documented
//! defaults for the rest.

use crate::error::ReisefixError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a receipt-processing run.
///
/// Built via [`PipelineConfig::builder()`] or [`PipelineConfig::default()`].
///
/// # Example
/// ```rust
/// use reisefix::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .model("gemini-3-flash-preview")
///     .extraction_timeout_secs(90)
///     .build()
///     .unwrap();
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Vision model identifier. Default: `"gemini-3-flash-preview"`.
    pub model: String,

    /// Maximum rendered page dimension (width or height) in pixels. Default: 2000.
    ///
    /// A safety cap independent of the document's physical page size. An A0
    /// poster rendered at print resolution would exhaust memory; capping the
    /// longest edge keeps allocations bounded while staying well above the
    /// legibility floor for receipt text.
    pub max_rendered_pixels: u32,

    /// Maximum page images sent in one extraction call. Default: 16.
    ///
    /// Vision APIs cap inline request size; a leg with many multi-page
    /// receipts can exceed it. Pages beyond the cap are dropped with a
    /// warning rather than failing the leg.
    pub max_pages_per_call: usize,

    /// Per-extraction-call timeout in seconds. Default: 60.
    ///
    /// The model call is the only unbounded suspension point in the
    /// pipeline; without this cap a stuck upstream would hold the session in
    /// `extracting` forever.
    pub extraction_timeout_secs: u64,

    /// Maximum retry attempts on a transient vision API failure. Default: 2.
    ///
    /// Most 5xx and 429 errors clear within seconds. Permanent errors
    /// (bad API key, malformed request) are not retried.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds (exponential backoff). Default: 500.
    ///
    /// Doubles after each attempt: 500 ms → 1 s → 2 s. Exponential backoff
    /// avoids hammering a recovering API endpoint.
    pub retry_backoff_ms: u64,

    /// Idle session lifetime in seconds. Default: 1800 (30 minutes).
    ///
    /// Sessions are purely ephemeral: no receipt or applicant data may
    /// outlive the claim it belongs to. A session untouched for this long is
    /// purged on the next store access.
    pub session_ttl_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            model: "gemini-3-flash-preview".to_string(),
            max_rendered_pixels: 2000,
            max_pages_per_call: 16,
            extraction_timeout_secs: 60,
            max_retries: 2,
            retry_backoff_ms: 500,
            session_ttl_secs: 1800,
        }
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }

    pub fn extraction_timeout(&self) -> Duration {
        Duration::from_secs(self.extraction_timeout_secs)
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn max_pages_per_call(mut self, n: usize) -> Self {
        self.config.max_pages_per_call = n.max(1);
        self
    }

    pub fn extraction_timeout_secs(mut self, secs: u64) -> Self {
        self.config.extraction_timeout_secs = secs;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn session_ttl_secs(mut self, secs: u64) -> Self {
        self.config.session_ttl_secs = secs;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, ReisefixError> {
        let c = &self.config;
        if c.model.trim().is_empty() {
            return Err(ReisefixError::InvalidConfig("Model must not be empty".into()));
        }
        if c.extraction_timeout_secs == 0 {
            return Err(ReisefixError::InvalidConfig(
                "Extraction timeout must be ≥ 1s".into(),
            ));
        }
        if c.session_ttl_secs == 0 {
            return Err(ReisefixError::InvalidConfig(
                "Session TTL must be ≥ 1s".into(),
            ));
        }
        Ok(self.config)
    }
}
