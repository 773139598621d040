// ABOUTME: Chat exchange orchestration: conversation reconciliation and event streaming
// ABOUTME: Guarantees append-before-relay ordering and exactly one terminal event
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Charla Project

//! The multi-step flow behind `POST /chat/send`.
//!
//! Business rules:
//! - A missing or ephemeral (`temp_`-prefixed) conversation id creates a new
//!   durable conversation titled from the first message.
//! - An explicit id must resolve to a conversation owned by the caller;
//!   anything else is `CONVERSATION_NOT_FOUND`, never a silent reassign.
//! - The user message is durably appended before the upstream dispatch, so a
//!   crash mid-relay cannot lose the user's input.
//! - The assistant row is inserted (empty) before the relay and finalized at
//!   completion; a mid-stream observer may see it empty.
//! - The event stream terminates with exactly one `complete` or `error`
//!   frame, never zero, never both.

use crate::auth::OwnerRef;
use crate::database::{ConversationRecord, ConversationStore, MessageExtras, MessageRecord, MessageRole};
use crate::errors::{AppError, AppResult, ErrorCode};
use crate::sse::SseEnvelope;
use crate::titles;
use crate::upstream::{
    CompleteInfo, ExchangeSettings, HistoryEntry, RelayEvent, UpstreamClient,
    DEFAULT_HISTORY_WINDOW,
};
use async_stream::stream;
use futures_util::StreamExt;
use std::sync::Arc;
use tokio_stream::Stream;
use tracing::{info, warn};

/// Marker prefix of client-local conversation ids that have no durable row
pub const EPHEMERAL_ID_PREFIX: &str = "temp_";

/// Whether an id is client-local and must not be looked up server-side
#[must_use]
pub fn is_ephemeral_id(id: &str) -> bool {
    id.starts_with(EPHEMERAL_ID_PREFIX)
}

/// Everything persisted before the upstream dispatch starts
pub struct PreparedExchange {
    /// The durable conversation the exchange belongs to
    pub conversation: ConversationRecord,
    /// True when this request created the conversation
    pub created: bool,
    /// The durably appended user message
    pub user_message: MessageRecord,
    /// The eagerly inserted (still empty) assistant row
    pub assistant_message: MessageRecord,
    /// History window for the upstream request, including the new user turn
    pub history: Vec<HistoryEntry>,
}

/// Resolve the target conversation for an incoming message.
///
/// Absent and ephemeral ids create a new durable conversation; explicit ids
/// are fetched and ownership-checked. A still-placeholder title is replaced
/// with one synthesized from this message.
///
/// # Errors
///
/// `CONVERSATION_NOT_FOUND` when the id is unknown or owned by someone else;
/// database errors otherwise.
pub async fn ensure_conversation(
    store: &ConversationStore,
    owner: &OwnerRef,
    existing_id: Option<&str>,
    first_message: &str,
    settings: &ExchangeSettings,
) -> AppResult<(ConversationRecord, bool)> {
    match existing_id {
        None => create(store, owner, first_message, settings).await,
        Some(id) if is_ephemeral_id(id) => create(store, owner, first_message, settings).await,
        Some(id) => {
            let conversation = store
                .get_conversation(id)
                .await?
                .ok_or_else(AppError::conversation_not_found)?;

            if !conversation.owned_by(owner) {
                return Err(AppError::conversation_not_found());
            }

            let mut conversation = conversation;
            if titles::is_placeholder(&conversation.title) {
                let title = titles::synthesize(first_message);
                if store.rename_if_placeholder(id, &title).await? {
                    conversation.title = title;
                }
            }

            Ok((conversation, false))
        }
    }
}

async fn create(
    store: &ConversationStore,
    owner: &OwnerRef,
    first_message: &str,
    settings: &ExchangeSettings,
) -> AppResult<(ConversationRecord, bool)> {
    let title = titles::synthesize(first_message);
    let settings_json = serde_json::to_string(&serde_json::json!({ "model": settings.model }))?;

    let conversation = store
        .create_conversation(owner, &title, Some(&settings_json))
        .await?;

    info!(conversation_id = %conversation.id, "created conversation");
    Ok((conversation, true))
}

/// Persist everything that must survive an upstream failure, in order: the
/// conversation row, the user's message, then the empty assistant row.
///
/// # Errors
///
/// Propagates conversation resolution and persistence failures; nothing has
/// been sent upstream when this errors.
pub async fn prepare_exchange(
    store: &ConversationStore,
    owner: &OwnerRef,
    message: &str,
    conversation_id: Option<&str>,
    settings: &ExchangeSettings,
) -> AppResult<PreparedExchange> {
    let (conversation, created) =
        ensure_conversation(store, owner, conversation_id, message, settings).await?;

    let user_message = store
        .append_message(
            &conversation.id,
            MessageRole::User,
            message,
            MessageExtras::default(),
        )
        .await?;

    // History is captured before the assistant row exists so the window
    // carries only real turns
    let history = store
        .get_recent_messages(&conversation.id, DEFAULT_HISTORY_WINDOW)
        .await?
        .into_iter()
        .map(|m| HistoryEntry {
            role: m.role,
            content: m.content,
        })
        .collect();

    let assistant_message = store.begin_assistant_message(&conversation.id).await?;

    Ok(PreparedExchange {
        conversation,
        created,
        user_message,
        assistant_message,
        history,
    })
}

/// Drive the upstream relay and produce the SSE envelope sequence.
///
/// Exactly one terminal frame is emitted: `error` as soon as the relay
/// fails, otherwise `complete` once the assistant message is finalized. The
/// user's message is never rolled back on failure.
pub fn exchange_events(
    store: Arc<ConversationStore>,
    upstream: Arc<UpstreamClient>,
    prepared: PreparedExchange,
    settings: ExchangeSettings,
) -> impl Stream<Item = SseEnvelope> + Send {
    stream! {
        let message = prepared.user_message.content.clone();
        let mut relay = upstream.relay(&message, prepared.history, &settings);

        let mut full_content = String::new();
        let mut sources_json: Option<String> = None;
        let mut usage_json: Option<String> = None;

        while let Some(event) = relay.next().await {
            match event {
                RelayEvent::Content(chunk) => {
                    full_content.push_str(&chunk);
                    yield SseEnvelope::Message { content: chunk };
                }
                RelayEvent::Sources(sources) => {
                    sources_json = serde_json::to_string(&sources).ok();
                    yield SseEnvelope::Sources { sources };
                }
                RelayEvent::Usage(usage) => {
                    usage_json = serde_json::to_string(&usage).ok();
                    yield SseEnvelope::Usage { usage };
                }
                RelayEvent::Error { message, code } => {
                    // Terminal: the user turn stays persisted, the assistant
                    // row stays empty, and no complete frame follows
                    warn!(conversation_id = %prepared.conversation.id, code, "exchange failed");
                    yield SseEnvelope::Error { message, code };
                    return;
                }
                RelayEvent::Complete(_) => {
                    // The relay never emits completion; it is appended below
                }
            }
        }

        let metadata = serde_json::json!({
            "source": "webapp",
            "appVersion": env!("CARGO_PKG_VERSION"),
        })
        .to_string();

        let finalized = store
            .finalize_assistant_message(
                &prepared.assistant_message.id,
                &prepared.conversation.id,
                &full_content,
                MessageExtras {
                    sources: sources_json.as_deref(),
                    usage: usage_json.as_deref(),
                    metadata: Some(&metadata),
                },
            )
            .await;

        match finalized {
            Ok(()) => {
                yield SseEnvelope::complete(CompleteInfo {
                    conversation_id: prepared.conversation.id.clone(),
                    message_id: Some(prepared.assistant_message.id.clone()),
                });
            }
            Err(e) => {
                warn!(conversation_id = %prepared.conversation.id, "failed to save assistant message: {e}");
                yield SseEnvelope::error(
                    format!("Failed to save message: {e}"),
                    ErrorCode::DatabaseError.as_str(),
                );
            }
        }
    }
}
