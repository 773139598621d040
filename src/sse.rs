// ABOUTME: Server-Sent Events wire envelope for the chat exchange stream
// ABOUTME: Fixed {type, data} JSON frames: message, sources, usage, complete, error
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Charla Project

//! SSE wire envelope.
//!
//! Every frame on the `/chat/send` stream is
//! `data: {"type": <kind>, "data": {...}}\n\n`. The envelope is the browser
//! contract, so the shapes here are wire-exact and pinned by tests.

use crate::upstream::{CompleteInfo, RelayEvent, SourceRef};
use axum::response::sse::Event;
use serde::Serialize;
use serde_json::Value;

/// One SSE frame payload
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum SseEnvelope {
    /// A piece of answer text
    Message {
        /// Text chunk
        content: String,
    },
    /// Citations for the answer
    Sources {
        /// Citation records
        sources: Vec<SourceRef>,
    },
    /// Token/cost accounting
    Usage {
        /// Usage statistics, passed through from upstream
        usage: Value,
    },
    /// Terminal success frame
    Complete {
        /// Always true
        ok: bool,
        /// Durable conversation id
        #[serde(rename = "conversationId")]
        conversation_id: String,
        /// Persisted assistant message id
        #[serde(rename = "messageId", skip_serializing_if = "Option::is_none")]
        message_id: Option<String>,
    },
    /// Terminal failure frame
    Error {
        /// Human-readable failure description
        message: String,
        /// Machine-readable failure code
        code: String,
    },
}

impl SseEnvelope {
    /// Build the terminal success frame
    #[must_use]
    pub fn complete(info: CompleteInfo) -> Self {
        Self::Complete {
            ok: true,
            conversation_id: info.conversation_id,
            message_id: info.message_id,
        }
    }

    /// Build a failure frame
    pub fn error(message: impl Into<String>, code: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
            code: code.into(),
        }
    }

    /// Encode as an axum SSE event (`data: <json>`)
    #[must_use]
    pub fn into_event(self) -> Event {
        Event::default().data(self.json())
    }

    /// Encode as a raw SSE frame, `data: <json>\n\n`, for responses built
    /// outside the streaming path
    #[must_use]
    pub fn frame(&self) -> String {
        format!("data: {}\n\n", self.json())
    }

    fn json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            // Envelope serialization cannot fail for these shapes; keep the
            // stream alive with a generic error frame if it ever does
            r#"{"type":"error","data":{"message":"encoding failure","code":"SERIALIZATION_ERROR"}}"#
                .to_owned()
        })
    }
}

impl From<RelayEvent> for SseEnvelope {
    fn from(event: RelayEvent) -> Self {
        match event {
            RelayEvent::Content(content) => Self::Message { content },
            RelayEvent::Sources(sources) => Self::Sources { sources },
            RelayEvent::Usage(usage) => Self::Usage { usage },
            RelayEvent::Complete(info) => Self::complete(info),
            RelayEvent::Error { message, code } => Self::Error { message, code },
        }
    }
}
