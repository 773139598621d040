// ABOUTME: Upstream answer-service types: configuration and relay events
// ABOUTME: Defines the uniform event sequence every upstream response is normalized into
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Charla Project

//! # Upstream relay
//!
//! The external answer-generation service is consumed as an opaque webhook:
//! one POST per exchange, returning either a single JSON object (or array),
//! or a byte stream. [`relay::UpstreamClient`] normalizes whichever shape
//! arrives into a lazy sequence of [`RelayEvent`]s, re-chunking single-shot
//! answers into a pseudo-stream so the client renders incrementally either
//! way.

mod relay;

pub use relay::UpstreamClient;

use serde::{Deserialize, Serialize};
use std::env;
use std::pin::Pin;
use tokio_stream::Stream;

/// Default history window sent upstream (most recent messages)
pub const DEFAULT_HISTORY_WINDOW: i64 = 10;

/// Default size of pseudo-stream chunks, in characters
const DEFAULT_CHUNK_SIZE: usize = 750;

/// Default delay between pseudo-stream chunks, in milliseconds
const DEFAULT_CHUNK_DELAY_MS: u64 = 10;

/// Substituted when the upstream reply carries none of the answer fields
pub const NO_RESPONSE_PLACEHOLDER: &str = "No response from AI";

/// Upstream webhook configuration
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    /// Base URL of the upstream service (`UPSTREAM_BASE_URL`)
    pub base_url: String,
    /// Webhook path appended to the base URL (`UPSTREAM_WEBHOOK_PATH`)
    pub webhook_path: String,
    /// Optional bearer key (`UPSTREAM_API_KEY`)
    pub api_key: Option<String>,
    /// Candidate answer fields, checked in order on single-shot replies
    pub answer_fields: Vec<String>,
    /// Pseudo-stream chunk size in characters
    pub chunk_size: usize,
    /// Delay between pseudo-stream chunks in milliseconds
    pub chunk_delay_ms: u64,
}

impl UpstreamConfig {
    /// Build a config with default normalization constants
    #[must_use]
    pub fn new(base_url: impl Into<String>, webhook_path: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            webhook_path: webhook_path.into(),
            api_key: None,
            answer_fields: vec!["output".to_owned(), "answer".to_owned(), "text".to_owned()],
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_delay_ms: DEFAULT_CHUNK_DELAY_MS,
        }
    }

    /// Load from environment; `None` when base URL or webhook path is unset
    #[must_use]
    pub fn from_env() -> Option<Self> {
        let base_url = env::var("UPSTREAM_BASE_URL").ok()?;
        let webhook_path = env::var("UPSTREAM_WEBHOOK_PATH").ok()?;

        let mut config = Self::new(base_url, webhook_path);
        config.api_key = env::var("UPSTREAM_API_KEY").ok();
        Some(config)
    }

    /// Full webhook endpoint URL
    #[must_use]
    pub fn endpoint(&self) -> String {
        format!("{}{}", self.base_url, self.webhook_path)
    }
}

/// A citation attached to an assistant reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    /// Source title
    #[serde(default)]
    pub title: String,
    /// Source URL
    #[serde(default)]
    pub url: String,
    /// Supporting snippet
    #[serde(default)]
    pub snippet: String,
}

/// Completion payload carried by the terminal event of a successful exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompleteInfo {
    /// Durable conversation id the exchange landed in
    pub conversation_id: String,
    /// Persisted assistant message id
    pub message_id: Option<String>,
}

/// One element of the normalized upstream event sequence
#[derive(Debug, Clone, PartialEq)]
pub enum RelayEvent {
    /// A piece of answer text
    Content(String),
    /// Citations for the answer
    Sources(Vec<SourceRef>),
    /// Token/cost accounting
    Usage(serde_json::Value),
    /// Terminal: the exchange succeeded and was persisted
    Complete(CompleteInfo),
    /// Terminal: the exchange failed; no `Complete` follows
    Error {
        /// Human-readable failure description
        message: String,
        /// Machine-readable failure code
        code: String,
    },
}

/// Lazy relay event sequence
pub type RelayStream = Pin<Box<dyn Stream<Item = RelayEvent> + Send>>;

/// One history entry in the upstream request payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Sender role (user, assistant)
    pub role: String,
    /// Message content
    pub content: String,
}

/// Per-exchange settings forwarded upstream
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeSettings {
    /// Retrieval depth
    #[serde(default = "default_top_k", rename = "topK")]
    pub top_k: u32,
    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    /// Upstream model variant for this conversation
    #[serde(default = "default_model")]
    pub model: String,
}

impl Default for ExchangeSettings {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            temperature: default_temperature(),
            model: default_model(),
        }
    }
}

const fn default_top_k() -> u32 {
    5
}

fn default_temperature() -> f64 {
    0.7
}

fn default_model() -> String {
    "n8n".to_owned()
}
