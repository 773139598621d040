// ABOUTME: Guest session rows and the sign-in migration transaction
// ABOUTME: Reassigns guest-owned conversations to an authenticated user atomically
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Charla Project

use crate::errors::{AppError, AppResult};
use sqlx::SqlitePool;
use uuid::Uuid;

/// Guest session database operations
pub struct GuestSessionStore {
    pool: SqlitePool,
}

impl GuestSessionStore {
    /// Create a new store over the given pool
    #[must_use]
    pub const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert the session row if it does not exist yet.
    ///
    /// Concurrent first-requests race on this insert; `INSERT OR IGNORE`
    /// makes the loser a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    pub async fn ensure(&self, session_id: &str) -> AppResult<()> {
        let now = chrono::Utc::now().to_rfc3339();

        sqlx::query("INSERT OR IGNORE INTO guest_sessions (id, created_at) VALUES ($1, $2)")
            .bind(session_id)
            .bind(&now)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to ensure guest session: {e}")))?;

        Ok(())
    }

    /// Whether the session row exists
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    pub async fn exists(&self, session_id: &str) -> AppResult<bool> {
        let row = sqlx::query("SELECT 1 FROM guest_sessions WHERE id = $1")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to check guest session: {e}")))?;

        Ok(row.is_some())
    }

    /// Reassign every conversation owned by the guest session to `user_id`
    /// and delete the session row, in one transaction.
    ///
    /// Only rows still without an owning user are touched, so replaying a
    /// stale token can never re-claim migrated conversations. Running this
    /// twice is a no-op, not an error. Returns the number of conversations
    /// migrated.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction fails; no partial application is
    /// visible in that case.
    pub async fn migrate_to_user(&self, session_id: &str, user_id: Uuid) -> AppResult<u64> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::database(format!("Failed to begin migration: {e}")))?;

        let result = sqlx::query(
            r"
            UPDATE conversations
            SET user_id = $1, guest_session_id = NULL
            WHERE guest_session_id = $2 AND user_id IS NULL
            ",
        )
        .bind(user_id.to_string())
        .bind(session_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::database(format!("Failed to migrate conversations: {e}")))?;

        sqlx::query("DELETE FROM guest_sessions WHERE id = $1")
            .bind(session_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::database(format!("Failed to delete guest session: {e}")))?;

        tx.commit()
            .await
            .map_err(|e| AppError::database(format!("Failed to commit migration: {e}")))?;

        Ok(result.rows_affected())
    }
}
