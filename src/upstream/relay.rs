// ABOUTME: Upstream webhook client producing the normalized relay event sequence
// ABOUTME: Handles single-shot JSON, JSON arrays, and raw byte streams uniformly
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Charla Project

use super::{
    ExchangeSettings, HistoryEntry, RelayEvent, RelayStream, SourceRef, UpstreamConfig,
    NO_RESPONSE_PLACEHOLDER,
};
use crate::errors::ErrorCode;
use async_stream::stream;
use futures_util::StreamExt;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, error, instrument, warn};

/// Client for the upstream answer-generation webhook
pub struct UpstreamClient {
    client: Client,
    config: UpstreamConfig,
}

impl UpstreamClient {
    /// Create a client over the given configuration
    #[must_use]
    pub fn new(config: UpstreamConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    /// Send one exchange upstream and normalize the reply into a lazy
    /// [`RelayEvent`] sequence.
    ///
    /// The sequence never carries a `Complete` event; the chat flow appends
    /// it after persisting the assistant message. Failures of any kind are
    /// emitted as a single `Error` event terminating the sequence, never as
    /// a panic or an abrupt stream drop.
    #[instrument(skip(self, history), fields(model = %settings.model))]
    pub fn relay(
        &self,
        message: &str,
        history: Vec<HistoryEntry>,
        settings: &ExchangeSettings,
    ) -> RelayStream {
        let payload = json!({
            "chatInput": message,
            "topK": settings.top_k,
            "temperature": settings.temperature,
            "model": settings.model,
            "history": history,
            "metadata": {
                "source": "webapp",
                "appVersion": env!("CARGO_PKG_VERSION"),
            },
        });

        let client = self.client.clone();
        let config = self.config.clone();

        Box::pin(stream! {
            let mut request = client.post(config.endpoint()).json(&payload);
            if let Some(ref key) = config.api_key {
                request = request.header(http::header::AUTHORIZATION, format!("Bearer {key}"));
            }

            debug!("dispatching exchange to upstream");

            let response = match request.send().await {
                Ok(response) => response,
                Err(e) => {
                    error!("failed to reach upstream: {e}");
                    yield RelayEvent::Error {
                        message: format!("Failed to reach upstream service: {e}"),
                        code: ErrorCode::UpstreamServiceError.as_str().to_owned(),
                    };
                    return;
                }
            };

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                warn!("upstream returned {status}");
                yield RelayEvent::Error {
                    message: format!("Upstream returned {status}: {body}"),
                    code: ErrorCode::UpstreamServiceError.as_str().to_owned(),
                };
                return;
            }

            let content_type = response
                .headers()
                .get(http::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                .to_owned();

            if content_type.starts_with("application/json") {
                // Single-shot reply: buffer, extract the answer, pseudo-stream it
                let raw: Value = match response.json().await {
                    Ok(raw) => raw,
                    Err(e) => {
                        yield RelayEvent::Error {
                            message: format!("Invalid response from upstream: {e}"),
                            code: ErrorCode::UpstreamServiceError.as_str().to_owned(),
                        };
                        return;
                    }
                };

                let Some(data) = unwrap_reply(raw) else {
                    yield RelayEvent::Error {
                        message: "Invalid response from upstream".to_owned(),
                        code: ErrorCode::UpstreamServiceError.as_str().to_owned(),
                    };
                    return;
                };

                let answer = extract_answer(&data, &config.answer_fields);

                for chunk in chunk_text(&answer, config.chunk_size) {
                    yield RelayEvent::Content(chunk);
                    // Small pause so the client renders incrementally even
                    // though the upstream replied all at once
                    tokio::time::sleep(Duration::from_millis(config.chunk_delay_ms)).await;
                }

                if let Some(sources) = parse_sources(&data) {
                    yield RelayEvent::Sources(sources);
                }

                if let Some(usage) = data.get("usage").filter(|u| u.is_object()) {
                    yield RelayEvent::Usage(usage.clone());
                }
            } else {
                // Byte stream: decode each chunk as it arrives. The framing
                // is not contractually fixed, so JSON objects and raw text
                // both have to work.
                let mut byte_stream = response.bytes_stream();

                while let Some(chunk_result) = byte_stream.next().await {
                    let bytes = match chunk_result {
                        Ok(bytes) => bytes,
                        Err(e) => {
                            error!("error reading upstream stream: {e}");
                            yield RelayEvent::Error {
                                message: format!("Stream read error: {e}"),
                                code: ErrorCode::StreamError.as_str().to_owned(),
                            };
                            return;
                        }
                    };

                    let text = String::from_utf8_lossy(&bytes).to_string();

                    match serde_json::from_str::<Value>(&text) {
                        Ok(parsed) if parsed.is_object() => {
                            if let Some(content) = parsed.get("content").and_then(Value::as_str) {
                                yield RelayEvent::Content(content.to_owned());
                            }
                            if let Some(sources) = parse_sources(&parsed) {
                                yield RelayEvent::Sources(sources);
                            }
                            if let Some(usage) = parsed.get("usage").filter(|u| u.is_object()) {
                                yield RelayEvent::Usage(usage.clone());
                            }
                        }
                        _ => {
                            yield RelayEvent::Content(text);
                        }
                    }
                }
            }
        })
    }
}

/// Unwrap the upstream reply body: arrays yield their first element
fn unwrap_reply(raw: Value) -> Option<Value> {
    match raw {
        Value::Array(mut items) => {
            if items.is_empty() {
                None
            } else {
                Some(items.swap_remove(0))
            }
        }
        Value::Object(_) => Some(raw),
        _ => None,
    }
}

/// First present answer field wins; falls back to the fixed placeholder
fn extract_answer(data: &Value, answer_fields: &[String]) -> String {
    answer_fields
        .iter()
        .find_map(|field| data.get(field).and_then(Value::as_str))
        .unwrap_or(NO_RESPONSE_PLACEHOLDER)
        .to_owned()
}

/// Parse a `sources` array into citation records, skipping malformed entries
fn parse_sources(data: &Value) -> Option<Vec<SourceRef>> {
    let items = data.get("sources")?.as_array()?;
    let sources: Vec<SourceRef> = items
        .iter()
        .filter_map(|item| serde_json::from_value(item.clone()).ok())
        .collect();
    Some(sources)
}

/// Split text into fixed-size character windows
fn chunk_text(text: &str, chunk_size: usize) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }

    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(chunk_size.max(1))
        .map(|window| window.iter().collect())
        .collect()
}
