// ABOUTME: Guest-to-user conversation migration service
// ABOUTME: Runs at sign-in when a leftover guest cookie accompanies a valid session
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Charla Project

//! Migration of guest-owned conversations into a user account.
//!
//! Triggered the first time a request carries both a valid authenticated
//! session and a leftover guest session cookie. The reassignment and the
//! guest session deletion run in one transaction; the caller expires the
//! cookie only when the transaction committed, so a failed attempt is
//! retried on the next request instead of stranding the guest's data.

use crate::database::Database;
use crate::errors::AppResult;
use tracing::{info, warn};

/// Move every conversation owned by `guest_token` to `user_id` and drop the
/// guest session. Idempotent: a second run with the same token matches no
/// rows and is a no-op.
///
/// Returns the number of conversations migrated.
///
/// # Errors
///
/// Returns the underlying database error; no partial application is visible
/// (single transaction), and the failure is logged as a degraded state.
pub async fn migrate_guest_data(
    db: &Database,
    guest_token: &str,
    user_id: uuid::Uuid,
) -> AppResult<u64> {
    match db.sessions().migrate_to_user(guest_token, user_id).await {
        Ok(migrated) => {
            if migrated > 0 {
                info!(%user_id, migrated, "migrated guest conversations");
            }
            Ok(migrated)
        }
        Err(e) => {
            warn!(%user_id, "guest migration failed, will retry on next request: {e}");
            Err(e)
        }
    }
}
