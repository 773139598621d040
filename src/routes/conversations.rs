// ABOUTME: Conversation CRUD route handlers for users and guests
// ABOUTME: Owner-scoped listing, fetch, delete, and the sign-in migration check
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Charla Project

//! Conversation management routes.
//!
//! All handlers work for both authenticated users and guests; ownership is
//! resolved per request. `GET /conversations` doubles as the migration
//! point: the first authenticated request still carrying a guest cookie has
//! its guest conversations reassigned and the cookie expired.

use super::{attach_guest_cookie, AppState};
use crate::auth::Classification;
use crate::database::{ConversationRecord, MessageRecord};
use crate::errors::AppError;
use crate::security::cookies::expired_guest_cookie;
use crate::services::guest_migration;
use crate::titles;
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use http::header::SET_COOKIE;
use http::{HeaderMap, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Listing cap for a single owner
const LIST_LIMIT: i64 = 50;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request to create a conversation explicitly
#[derive(Debug, Default, Deserialize)]
pub struct CreateConversationRequest {
    /// Title; defaults to the placeholder until the first message names it
    #[serde(default)]
    pub title: Option<String>,
    /// Opaque settings bag (selected upstream model, etc.)
    #[serde(default)]
    pub settings: Option<Value>,
}

/// Conversation payload returned by every conversation endpoint
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationResponse {
    /// Durable conversation id
    pub id: String,
    /// Conversation title
    pub title: String,
    /// Parsed settings bag
    pub settings: Option<Value>,
    /// Creation timestamp (RFC 3339)
    pub created_at: String,
    /// Last-message timestamp (RFC 3339)
    pub updated_at: String,
}

impl From<ConversationRecord> for ConversationResponse {
    fn from(record: ConversationRecord) -> Self {
        let settings = record
            .settings
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok());
        Self {
            id: record.id,
            title: record.title,
            settings,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

/// Message payload returned by the messages listing
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageResponse {
    /// Message id
    pub id: String,
    /// Sender role (user, assistant)
    pub role: String,
    /// Message content
    pub content: String,
    /// Creation timestamp (RFC 3339)
    pub timestamp: String,
    /// Citations, assistant messages only
    pub sources: Option<Value>,
    /// Usage statistics, assistant messages only
    pub usage: Option<Value>,
    /// Free-form metadata
    pub metadata: Option<Value>,
}

impl From<MessageRecord> for MessageResponse {
    fn from(record: MessageRecord) -> Self {
        let parse = |raw: Option<String>| raw.as_deref().and_then(|r| serde_json::from_str(r).ok());
        Self {
            id: record.id,
            role: record.role,
            content: record.content,
            timestamp: record.created_at,
            sources: parse(record.sources),
            usage: parse(record.usage),
            metadata: parse(record.metadata),
        }
    }
}

/// Response for the bulk delete endpoint
#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteAllResponse {
    /// Number of conversations removed
    pub deleted: i64,
}

// ============================================================================
// Routes
// ============================================================================

/// Conversation routes handler
pub struct ConversationRoutes;

impl ConversationRoutes {
    /// Create all conversation routes
    pub fn routes(state: Arc<AppState>) -> Router {
        Router::new()
            .route(
                "/conversations",
                get(Self::list_conversations)
                    .post(Self::create_conversation)
                    .delete(Self::delete_all),
            )
            .route(
                "/conversations/:conversation_id",
                get(Self::get_conversation).delete(Self::delete_conversation),
            )
            .route(
                "/conversations/:conversation_id/messages",
                get(Self::get_messages),
            )
            .with_state(state)
    }

    /// Create a conversation; the guest path issues or reuses the session
    /// cookie
    async fn create_conversation(
        State(state): State<Arc<AppState>>,
        headers: HeaderMap,
        body: Option<Json<CreateConversationRequest>>,
    ) -> Result<Response, AppError> {
        let identity = state
            .resolver
            .resolve(&headers, &state.db.sessions())
            .await?;
        let owner = identity.owner();

        let request = body.map(|Json(request)| request).unwrap_or_default();
        let title = request
            .title
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or(titles::PLACEHOLDER_TITLE);
        let settings = request.settings.map(|v| v.to_string());

        let conversation = state
            .db
            .conversations()
            .create_conversation(&owner, title, settings.as_deref())
            .await?;

        let mut response = (
            StatusCode::CREATED,
            Json(ConversationResponse::from(conversation)),
        )
            .into_response();
        attach_guest_cookie(&mut response, &identity, state.secure_cookies);
        Ok(response)
    }

    /// List the owner's conversations; also the migration point when a
    /// guest cookie accompanies a valid authenticated session
    async fn list_conversations(
        State(state): State<Arc<AppState>>,
        headers: HeaderMap,
    ) -> Result<Response, AppError> {
        let classification = state.resolver.classify(&headers)?;

        let mut expire_guest_cookie = false;
        if let Classification::Authenticated {
            user_id,
            stale_guest_token: Some(ref token),
        } = classification
        {
            // Cookie is expired only after the transaction committed, so a
            // failed migration retries on the next request
            if guest_migration::migrate_guest_data(&state.db, token, user_id)
                .await
                .is_ok()
            {
                expire_guest_cookie = true;
            }
        }

        let conversations = match classification.owner() {
            Some(owner) => state
                .db
                .conversations()
                .list_conversations(&owner, LIST_LIMIT)
                .await?
                .into_iter()
                .map(ConversationResponse::from)
                .collect(),
            None => Vec::new(),
        };

        let mut response = (StatusCode::OK, Json(conversations)).into_response();
        if expire_guest_cookie {
            if let Ok(value) = expired_guest_cookie(state.secure_cookies).parse() {
                response.headers_mut().append(SET_COOKIE, value);
            }
        }
        Ok(response)
    }

    /// Delete every conversation the caller owns
    async fn delete_all(
        State(state): State<Arc<AppState>>,
        headers: HeaderMap,
    ) -> Result<Response, AppError> {
        let classification = state.resolver.classify(&headers)?;

        let deleted = match classification.owner() {
            Some(owner) => state.db.conversations().delete_all(&owner).await?,
            None => 0,
        };

        Ok((StatusCode::OK, Json(DeleteAllResponse { deleted })).into_response())
    }

    /// Fetch one conversation; 404 when missing, 403 when foreign
    async fn get_conversation(
        State(state): State<Arc<AppState>>,
        headers: HeaderMap,
        Path(conversation_id): Path<String>,
    ) -> Result<Response, AppError> {
        let owner = state
            .resolver
            .classify(&headers)?
            .owner()
            .ok_or_else(|| AppError::not_found("Conversation"))?;

        let conversation = state
            .db
            .conversations()
            .get_owned(&conversation_id, &owner)
            .await?;

        Ok((
            StatusCode::OK,
            Json(ConversationResponse::from(conversation)),
        )
            .into_response())
    }

    /// Delete one conversation; messages cascade with the row
    async fn delete_conversation(
        State(state): State<Arc<AppState>>,
        headers: HeaderMap,
        Path(conversation_id): Path<String>,
    ) -> Result<Response, AppError> {
        let owner = state
            .resolver
            .classify(&headers)?
            .owner()
            .ok_or_else(|| AppError::not_found("Conversation"))?;

        state
            .db
            .conversations()
            .delete_conversation(&conversation_id, &owner)
            .await?;

        Ok((StatusCode::NO_CONTENT, ()).into_response())
    }

    /// List a conversation's messages in send order
    async fn get_messages(
        State(state): State<Arc<AppState>>,
        headers: HeaderMap,
        Path(conversation_id): Path<String>,
    ) -> Result<Response, AppError> {
        let owner = state
            .resolver
            .classify(&headers)?
            .owner()
            .ok_or_else(|| AppError::not_found("Conversation"))?;

        let store = state.db.conversations();
        store.get_owned(&conversation_id, &owner).await?;

        let messages: Vec<MessageResponse> = store
            .get_messages(&conversation_id)
            .await?
            .into_iter()
            .map(MessageResponse::from)
            .collect();

        Ok((StatusCode::OK, Json(messages)).into_response())
    }
}
