//! Pipeline stages from uploaded documents to extracted field sets.
//!
//! Each submodule implements exactly one transformation step.
//! Keeping stages separate makes each independently testable and lets us
//! swap implementations (e.g. a different vision provider) without touching
//! other stages.
//!
//! ## Data Flow
//!
//! ```text
//! documents ──▶ normalize ──▶ encode ──▶ vision ──▶ extract
//! (bytes+mime)   (pdfium)     (base64)   (Gemini)   (per-leg orchestration)
//! ```
//!
//! 1. [`normalize`] — turn each uploaded document into page images; runs PDF
//!    rasterisation in `spawn_blocking` because pdfium is not async-safe
//! 2. [`encode`]    — base64-wrap each page for the multimodal request body
//! 3. [`vision`]    — the Extraction Client: one model call per leg with
//!    timeout, retry/backoff, and strict JSON parsing; the only stage with
//!    network I/O
//! 4. [`extract`]   — the orchestrator: sequences the three legs, isolates
//!    per-leg failures, and creates the session

pub mod encode;
pub mod extract;
pub mod normalize;
pub mod vision;
