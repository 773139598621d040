// ABOUTME: Chat send route: one exchange in, one SSE event stream out
// ABOUTME: Validates before any side effect, then streams relay events as they land
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Charla Project

//! `POST /chat/send`.
//!
//! Validation, identity, and conversation resolution all happen before the
//! stream opens and surface as plain JSON error responses. Once the SSE
//! stream has started every failure becomes a single `error` frame so the
//! client renders a message instead of hanging on a dropped connection.

use super::{attach_guest_cookie, AppState};
use crate::errors::{AppError, ErrorCode};
use crate::services::chat_flow;
use crate::sse::SseEnvelope;
use crate::upstream::ExchangeSettings;
use axum::extract::State;
use axum::response::sse::{KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use futures_util::StreamExt;
use http::{header, HeaderMap, StatusCode};
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;

/// Request to send a message
#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    /// Message content
    #[serde(default)]
    pub message: Option<String>,
    /// Target conversation; absent or ephemeral ids create a new one
    #[serde(default, rename = "conversationId")]
    pub conversation_id: Option<String>,
    /// Per-exchange settings forwarded upstream
    #[serde(default)]
    pub settings: Option<ExchangeSettings>,
}

/// Chat routes handler
pub struct ChatRoutes;

impl ChatRoutes {
    /// Create the chat routes
    pub fn routes(state: Arc<AppState>) -> Router {
        Router::new()
            .route("/chat/send", post(Self::send_message))
            .with_state(state)
    }

    /// Send a message and stream the exchange back as SSE
    async fn send_message(
        State(state): State<Arc<AppState>>,
        headers: HeaderMap,
        Json(request): Json<SendMessageRequest>,
    ) -> Result<Response, AppError> {
        let message = request.message.unwrap_or_default();
        if message.trim().is_empty() {
            return Err(AppError::invalid_input("Message is required"));
        }

        let identity = state
            .resolver
            .resolve(&headers, &state.db.sessions())
            .await?;
        let owner = identity.owner();

        let Some(upstream) = state.upstream.clone() else {
            // Degrade to an immediate error frame rather than a hang; the
            // body is already in the SSE shape the client parses
            let frame = SseEnvelope::error(
                "Upstream configuration is missing",
                ErrorCode::UpstreamConfigError.as_str(),
            )
            .frame();
            let mut response = (
                StatusCode::INTERNAL_SERVER_ERROR,
                [
                    (header::CONTENT_TYPE, "text/event-stream"),
                    (header::CACHE_CONTROL, "no-cache"),
                ],
                frame,
            )
                .into_response();
            attach_guest_cookie(&mut response, &identity, state.secure_cookies);
            return Ok(response);
        };

        let settings = request.settings.unwrap_or_default();
        let store = Arc::new(state.db.conversations());

        let prepared = chat_flow::prepare_exchange(
            &store,
            &owner,
            &message,
            request.conversation_id.as_deref(),
            &settings,
        )
        .await?;

        let events = chat_flow::exchange_events(store, upstream, prepared, settings)
            .map(|envelope| Ok::<_, Infallible>(envelope.into_event()));

        let mut response = Sse::new(events)
            .keep_alive(KeepAlive::default())
            .into_response();
        response.headers_mut().insert(
            header::CACHE_CONTROL,
            header::HeaderValue::from_static("no-cache"),
        );
        attach_guest_cookie(&mut response, &identity, state.secure_cookies);
        Ok(response)
    }
}
