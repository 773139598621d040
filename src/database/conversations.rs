// ABOUTME: Database operations for conversations and messages
// ABOUTME: Owner-scoped CRUD with append-only messages and placeholder title fill
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Charla Project

use crate::auth::OwnerRef;
use crate::errors::{AppError, AppResult};
use crate::titles;
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

// ============================================================================
// Database Record Types
// ============================================================================

/// Database representation of a conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationRecord {
    /// Unique conversation ID
    pub id: String,
    /// Owning user id; present only for authenticated owners
    pub user_id: Option<String>,
    /// Owning guest session token; mutually exclusive with `user_id`
    pub guest_session_id: Option<String>,
    /// Conversation title (synthesized or user-defined)
    pub title: String,
    /// Opaque settings bag as JSON (selected upstream model, etc.)
    pub settings: Option<String>,
    /// When the conversation was created (RFC 3339)
    pub created_at: String,
    /// When the conversation last received a message (RFC 3339)
    pub updated_at: String,
}

impl ConversationRecord {
    /// Whether the given caller owns this conversation
    #[must_use]
    pub fn owned_by(&self, owner: &OwnerRef) -> bool {
        match owner {
            OwnerRef::User(id) => self.user_id.as_deref() == Some(id.to_string().as_str()),
            OwnerRef::Guest(token) => self.guest_session_id.as_deref() == Some(token.as_str()),
        }
    }
}

/// Role of a message sender
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// End-user input
    User,
    /// Upstream-generated reply
    Assistant,
}

impl MessageRole {
    /// String representation stored in the `role` column
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// Database representation of a message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRecord {
    /// Unique message ID
    pub id: String,
    /// Conversation this message belongs to
    pub conversation_id: String,
    /// Sender role (user, assistant)
    pub role: String,
    /// Message content
    pub content: String,
    /// Citation records as JSON, assistant messages only
    pub sources: Option<String>,
    /// Token/cost accounting as JSON, assistant messages only
    pub usage: Option<String>,
    /// Free-form metadata as JSON
    pub metadata: Option<String>,
    /// When the message was created (RFC 3339)
    pub created_at: String,
}

// ============================================================================
// Conversation Store
// ============================================================================

/// Conversation and message database operations
pub struct ConversationStore {
    pool: SqlitePool,
}

impl ConversationStore {
    /// Create a new store over the given pool
    #[must_use]
    pub const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    // ========================================================================
    // Conversation Operations
    // ========================================================================

    /// Create a new conversation owned by `owner`
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    pub async fn create_conversation(
        &self,
        owner: &OwnerRef,
        title: &str,
        settings: Option<&str>,
    ) -> AppResult<ConversationRecord> {
        let id = Uuid::new_v4().to_string();
        let now = chrono::Utc::now().to_rfc3339();
        let user_id = owner.user_id().map(ToString::to_string);
        let guest_session_id = owner.guest_id().map(ToOwned::to_owned);

        sqlx::query(
            r"
            INSERT INTO conversations (id, user_id, guest_session_id, title, settings, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $6)
            ",
        )
        .bind(&id)
        .bind(&user_id)
        .bind(&guest_session_id)
        .bind(title)
        .bind(settings)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to create conversation: {e}")))?;

        Ok(ConversationRecord {
            id,
            user_id,
            guest_session_id,
            title: title.to_owned(),
            settings: settings.map(ToOwned::to_owned),
            created_at: now.clone(),
            updated_at: now,
        })
    }

    /// Fetch a conversation by id, regardless of owner.
    ///
    /// Callers are responsible for the ownership check; route handlers use
    /// [`ConversationStore::get_owned`] instead.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    pub async fn get_conversation(&self, id: &str) -> AppResult<Option<ConversationRecord>> {
        let row = sqlx::query(
            r"
            SELECT id, user_id, guest_session_id, title, settings, created_at, updated_at
            FROM conversations
            WHERE id = $1
            ",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to get conversation: {e}")))?;

        Ok(row.map(|r| record_from_row(&r)))
    }

    /// Fetch a conversation and verify ownership.
    ///
    /// # Errors
    ///
    /// `RESOURCE_NOT_FOUND` when the id is unknown, `PERMISSION_DENIED` when
    /// the conversation belongs to a different owner.
    pub async fn get_owned(&self, id: &str, owner: &OwnerRef) -> AppResult<ConversationRecord> {
        let conversation = self
            .get_conversation(id)
            .await?
            .ok_or_else(|| AppError::not_found("Conversation"))?;

        if !conversation.owned_by(owner) {
            return Err(AppError::forbidden(
                "Conversation belongs to a different owner",
            ));
        }

        Ok(conversation)
    }

    /// List the owner's conversations, most recently updated first
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    pub async fn list_conversations(
        &self,
        owner: &OwnerRef,
        limit: i64,
    ) -> AppResult<Vec<ConversationRecord>> {
        let query = match owner {
            OwnerRef::User(id) => sqlx::query(
                r"
                SELECT id, user_id, guest_session_id, title, settings, created_at, updated_at
                FROM conversations
                WHERE user_id = $1
                ORDER BY updated_at DESC, created_at DESC
                LIMIT $2
                ",
            )
            .bind(id.to_string()),
            OwnerRef::Guest(token) => sqlx::query(
                r"
                SELECT id, user_id, guest_session_id, title, settings, created_at, updated_at
                FROM conversations
                WHERE guest_session_id = $1
                ORDER BY updated_at DESC, created_at DESC
                LIMIT $2
                ",
            )
            .bind(token.clone()),
        };

        let rows = query
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to list conversations: {e}")))?;

        Ok(rows.iter().map(record_from_row).collect())
    }

    /// Overwrite the title only while it is still empty or the placeholder.
    /// Never touches a user-assigned or previously synthesized title.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    pub async fn rename_if_placeholder(&self, id: &str, new_title: &str) -> AppResult<bool> {
        let result = sqlx::query(
            r"
            UPDATE conversations
            SET title = $1
            WHERE id = $2 AND (title = '' OR title = $3)
            ",
        )
        .bind(new_title)
        .bind(id)
        .bind(titles::PLACEHOLDER_TITLE)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to rename conversation: {e}")))?;

        Ok(result.rows_affected() > 0)
    }

    /// Delete a conversation after verifying ownership; messages cascade
    ///
    /// # Errors
    ///
    /// `RESOURCE_NOT_FOUND` / `PERMISSION_DENIED` per [`ConversationStore::get_owned`],
    /// or a database error.
    pub async fn delete_conversation(&self, id: &str, owner: &OwnerRef) -> AppResult<()> {
        self.get_owned(id, owner).await?;

        sqlx::query("DELETE FROM conversations WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to delete conversation: {e}")))?;

        Ok(())
    }

    /// Delete every conversation owned by `owner`; returns the count removed
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    pub async fn delete_all(&self, owner: &OwnerRef) -> AppResult<i64> {
        let query = match owner {
            OwnerRef::User(id) => {
                sqlx::query("DELETE FROM conversations WHERE user_id = $1").bind(id.to_string())
            }
            OwnerRef::Guest(token) => {
                sqlx::query("DELETE FROM conversations WHERE guest_session_id = $1")
                    .bind(token.clone())
            }
        };

        let result = query
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to delete conversations: {e}")))?;

        #[allow(clippy::cast_possible_wrap)]
        Ok(result.rows_affected() as i64)
    }

    // ========================================================================
    // Message Operations
    // ========================================================================

    /// Append a message. Assistant appends bump the conversation's
    /// `updated_at`; user appends do not (the exchange bumps once, when the
    /// reply lands).
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    pub async fn append_message(
        &self,
        conversation_id: &str,
        role: MessageRole,
        content: &str,
        extras: MessageExtras<'_>,
    ) -> AppResult<MessageRecord> {
        let id = Uuid::new_v4().to_string();
        let now = chrono::Utc::now().to_rfc3339();

        sqlx::query(
            r"
            INSERT INTO messages (id, conversation_id, role, content, sources, usage, metadata, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ",
        )
        .bind(&id)
        .bind(conversation_id)
        .bind(role.as_str())
        .bind(content)
        .bind(extras.sources)
        .bind(extras.usage)
        .bind(extras.metadata)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to append message: {e}")))?;

        if role == MessageRole::Assistant {
            self.touch_conversation(conversation_id, &now).await?;
        }

        Ok(MessageRecord {
            id,
            conversation_id: conversation_id.to_owned(),
            role: role.as_str().to_owned(),
            content: content.to_owned(),
            sources: extras.sources.map(ToOwned::to_owned),
            usage: extras.usage.map(ToOwned::to_owned),
            metadata: extras.metadata.map(ToOwned::to_owned),
            created_at: now,
        })
    }

    /// Insert the assistant's row eagerly, before the relay call. An
    /// observer polling mid-stream may see it empty; its content lands via
    /// [`ConversationStore::finalize_assistant_message`].
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    pub async fn begin_assistant_message(&self, conversation_id: &str) -> AppResult<MessageRecord> {
        let id = Uuid::new_v4().to_string();
        let now = chrono::Utc::now().to_rfc3339();

        sqlx::query(
            r"
            INSERT INTO messages (id, conversation_id, role, content, created_at)
            VALUES ($1, $2, 'assistant', '', $3)
            ",
        )
        .bind(&id)
        .bind(conversation_id)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to begin assistant message: {e}")))?;

        Ok(MessageRecord {
            id,
            conversation_id: conversation_id.to_owned(),
            role: MessageRole::Assistant.as_str().to_owned(),
            content: String::new(),
            sources: None,
            usage: None,
            metadata: None,
            created_at: now,
        })
    }

    /// Fill in the assistant row once the relay completed, and bump the
    /// conversation's `updated_at`
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    pub async fn finalize_assistant_message(
        &self,
        message_id: &str,
        conversation_id: &str,
        content: &str,
        extras: MessageExtras<'_>,
    ) -> AppResult<()> {
        let now = chrono::Utc::now().to_rfc3339();

        sqlx::query(
            r"
            UPDATE messages
            SET content = $1, sources = $2, usage = $3, metadata = $4
            WHERE id = $5
            ",
        )
        .bind(content)
        .bind(extras.sources)
        .bind(extras.usage)
        .bind(extras.metadata)
        .bind(message_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to finalize assistant message: {e}")))?;

        self.touch_conversation(conversation_id, &now).await
    }

    /// All messages for a conversation in send order
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    pub async fn get_messages(&self, conversation_id: &str) -> AppResult<Vec<MessageRecord>> {
        let rows = sqlx::query(
            r"
            SELECT id, conversation_id, role, content, sources, usage, metadata, created_at
            FROM messages
            WHERE conversation_id = $1
            ORDER BY created_at ASC
            ",
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to get messages: {e}")))?;

        Ok(rows.iter().map(message_from_row).collect())
    }

    /// Last `limit` messages in send order, for the upstream history window
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    pub async fn get_recent_messages(
        &self,
        conversation_id: &str,
        limit: i64,
    ) -> AppResult<Vec<MessageRecord>> {
        let rows = sqlx::query(
            r"
            SELECT id, conversation_id, role, content, sources, usage, metadata, created_at
            FROM messages
            WHERE conversation_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            ",
        )
        .bind(conversation_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to get recent messages: {e}")))?;

        let mut messages: Vec<MessageRecord> = rows.iter().map(message_from_row).collect();
        messages.reverse();

        Ok(messages)
    }

    async fn touch_conversation(&self, conversation_id: &str, now: &str) -> AppResult<()> {
        sqlx::query("UPDATE conversations SET updated_at = $1 WHERE id = $2")
            .bind(now)
            .bind(conversation_id)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to touch conversation: {e}")))?;
        Ok(())
    }
}

/// Optional JSON extras persisted alongside a message
#[derive(Debug, Clone, Copy, Default)]
pub struct MessageExtras<'a> {
    /// Citation records as JSON
    pub sources: Option<&'a str>,
    /// Usage statistics as JSON
    pub usage: Option<&'a str>,
    /// Free-form metadata as JSON
    pub metadata: Option<&'a str>,
}

fn record_from_row(r: &sqlx::sqlite::SqliteRow) -> ConversationRecord {
    ConversationRecord {
        id: r.get("id"),
        user_id: r.get("user_id"),
        guest_session_id: r.get("guest_session_id"),
        title: r.get("title"),
        settings: r.get("settings"),
        created_at: r.get("created_at"),
        updated_at: r.get("updated_at"),
    }
}

fn message_from_row(r: &sqlx::sqlite::SqliteRow) -> MessageRecord {
    MessageRecord {
        id: r.get("id"),
        conversation_id: r.get("conversation_id"),
        role: r.get("role"),
        content: r.get("content"),
        sources: r.get("sources"),
        usage: r.get("usage"),
        metadata: r.get("metadata"),
        created_at: r.get("created_at"),
    }
}
