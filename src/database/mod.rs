// ABOUTME: SQLite persistence layer: pool setup, schema bootstrap, store accessors
// ABOUTME: All coordination between requests happens through this store
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Charla Project

//! Relational store for conversations, messages, and guest sessions.
//!
//! Timestamps are stored as RFC 3339 UTC strings and ids as UUID strings,
//! so ordering clauses work on plain text columns.

mod conversations;
mod sessions;

pub use conversations::{
    ConversationRecord, ConversationStore, MessageExtras, MessageRecord, MessageRole,
};
pub use sessions::GuestSessionStore;

use crate::errors::{AppError, AppResult};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use tracing::info;

const SCHEMA: &str = r"
    CREATE TABLE IF NOT EXISTS guest_sessions (
        id TEXT PRIMARY KEY,
        created_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS conversations (
        id TEXT PRIMARY KEY,
        user_id TEXT,
        guest_session_id TEXT,
        title TEXT NOT NULL,
        settings TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_conversations_user
        ON conversations(user_id, updated_at);
    CREATE INDEX IF NOT EXISTS idx_conversations_guest
        ON conversations(guest_session_id, updated_at);

    CREATE TABLE IF NOT EXISTS messages (
        id TEXT PRIMARY KEY,
        conversation_id TEXT NOT NULL,
        role TEXT NOT NULL,
        content TEXT NOT NULL,
        sources TEXT,
        usage TEXT,
        metadata TEXT,
        created_at TEXT NOT NULL,
        FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE
    );

    CREATE INDEX IF NOT EXISTS idx_messages_conversation
        ON messages(conversation_id, created_at);
";

/// Handle to the relational store
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Connect to the store and bootstrap the schema
    ///
    /// # Errors
    ///
    /// Returns an error if the connection string is invalid, the database
    /// cannot be opened, or schema creation fails.
    pub async fn connect(database_url: &str) -> AppResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| AppError::config(format!("Invalid DATABASE_URL: {e}")))?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| AppError::database(format!("Failed to open database: {e}")))?;

        sqlx::raw_sql(SCHEMA)
            .execute(&pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to bootstrap schema: {e}")))?;

        info!("database ready at {database_url}");

        Ok(Self { pool })
    }

    /// Conversation and message operations
    #[must_use]
    pub fn conversations(&self) -> ConversationStore {
        ConversationStore::new(self.pool.clone())
    }

    /// Guest session operations, including the sign-in migration
    #[must_use]
    pub fn sessions(&self) -> GuestSessionStore {
        GuestSessionStore::new(self.pool.clone())
    }

    /// Access the underlying pool (test setup, health checks)
    #[must_use]
    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
