// ABOUTME: Per-request identity resolution for users and anonymous guests
// ABOUTME: Validates identity-provider session tokens and issues guest session cookies
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Charla Project

//! Identity resolution.
//!
//! Every request is classified three ways: an authenticated owner (valid
//! session token from the identity provider), an anonymous caller with an
//! established guest session cookie, or a brand-new anonymous caller for
//! whom a guest session is created on the spot.
//!
//! Token *issuance* belongs to the external identity provider; this module
//! only validates the HS256-signed session token it hands out and reads the
//! durable user id from its subject claim.

use crate::database::GuestSessionStore;
use crate::errors::{AppError, AppResult};
use crate::security::cookies::{get_cookie_value, AUTH_COOKIE, GUEST_COOKIE};
use http::HeaderMap;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

/// Owner reference used to scope every repository operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OwnerRef {
    /// Authenticated user, keyed by the identity provider's durable id
    User(Uuid),
    /// Anonymous caller, keyed by the guest session token
    Guest(String),
}

impl OwnerRef {
    /// User id when the owner is authenticated
    #[must_use]
    pub const fn user_id(&self) -> Option<&Uuid> {
        match self {
            Self::User(id) => Some(id),
            Self::Guest(_) => None,
        }
    }

    /// Guest session token when the owner is anonymous
    #[must_use]
    pub fn guest_id(&self) -> Option<&str> {
        match self {
            Self::User(_) => None,
            Self::Guest(token) => Some(token.as_str()),
        }
    }
}

/// Result of classifying a request's credentials
#[derive(Debug, Clone)]
pub enum Identity {
    /// Valid session token; `stale_guest_token` carries a leftover guest
    /// cookie whose conversations have not been migrated yet
    Authenticated {
        /// Durable user id from the token subject
        user_id: Uuid,
        /// Guest cookie observed alongside the authenticated session
        stale_guest_token: Option<String>,
    },
    /// Anonymous caller with a guest session
    Guest {
        /// Guest session token
        session_id: String,
        /// True when the session was created by this request and the
        /// response must set the cookie
        newly_issued: bool,
    },
}

impl Identity {
    /// Owner reference for repository scoping
    #[must_use]
    pub fn owner(&self) -> OwnerRef {
        match self {
            Self::Authenticated { user_id, .. } => OwnerRef::User(*user_id),
            Self::Guest { session_id, .. } => OwnerRef::Guest(session_id.clone()),
        }
    }
}

/// Side-effect-free three-way classification of a request's credentials
#[derive(Debug, Clone)]
pub enum Classification {
    /// Valid session token from the identity provider
    Authenticated {
        /// Durable user id from the token subject
        user_id: Uuid,
        /// Guest cookie observed alongside the authenticated session
        stale_guest_token: Option<String>,
    },
    /// Anonymous caller with an established guest session cookie
    GuestWithSession(String),
    /// Anonymous caller with no credentials at all
    GuestNoSession,
}

impl Classification {
    /// Owner reference, when the caller can own anything yet
    #[must_use]
    pub fn owner(&self) -> Option<OwnerRef> {
        match self {
            Self::Authenticated { user_id, .. } => Some(OwnerRef::User(*user_id)),
            Self::GuestWithSession(token) => Some(OwnerRef::Guest(token.clone())),
            Self::GuestNoSession => None,
        }
    }
}

/// Claims carried by the identity provider's session token
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Durable user id
    pub sub: String,
    /// Expiry (seconds since epoch)
    pub exp: usize,
}

/// Validates session tokens and classifies request identities
#[derive(Clone)]
pub struct IdentityResolver {
    decoding_key: Option<DecodingKey>,
}

impl IdentityResolver {
    /// Create a resolver; without a secret every caller resolves as a guest
    #[must_use]
    pub fn new(auth_secret: Option<&str>) -> Self {
        Self {
            decoding_key: auth_secret.map(|s| DecodingKey::from_secret(s.as_bytes())),
        }
    }

    /// Validate a session token and extract the user id
    ///
    /// # Errors
    ///
    /// Returns `AUTH_INVALID` when no secret is configured, the signature or
    /// expiry check fails, or the subject is not a UUID.
    pub fn verify_session_token(&self, token: &str) -> AppResult<Uuid> {
        let key = self
            .decoding_key
            .as_ref()
            .ok_or_else(|| AppError::auth_invalid("Session validation is not configured"))?;

        let data = decode::<SessionClaims>(token, key, &Validation::new(Algorithm::HS256))
            .map_err(|e| AppError::auth_invalid(format!("Invalid session token: {e}")))?;

        Uuid::parse_str(&data.claims.sub)
            .map_err(|e| AppError::auth_invalid(format!("Malformed token subject: {e}")))
    }

    /// Classify the caller from request headers, with no side effects.
    ///
    /// An invalid `Authorization: Bearer` header is rejected outright; a
    /// stale `auth_token` cookie falls through to the guest path so expired
    /// browser sessions keep working anonymously.
    ///
    /// # Errors
    ///
    /// Returns `AUTH_INVALID` for an explicit invalid bearer header.
    pub fn classify(&self, headers: &HeaderMap) -> AppResult<Classification> {
        let guest_cookie = get_cookie_value(headers, GUEST_COOKIE);

        if let Some(bearer) = bearer_token(headers) {
            let user_id = self.verify_session_token(&bearer)?;
            return Ok(Classification::Authenticated {
                user_id,
                stale_guest_token: guest_cookie,
            });
        }

        if let Some(cookie_token) = get_cookie_value(headers, AUTH_COOKIE) {
            match self.verify_session_token(&cookie_token) {
                Ok(user_id) => {
                    return Ok(Classification::Authenticated {
                        user_id,
                        stale_guest_token: guest_cookie,
                    });
                }
                Err(e) => debug!("ignoring stale auth cookie: {e}"),
            }
        }

        Ok(guest_cookie.map_or(Classification::GuestNoSession, |session_id| {
            Classification::GuestWithSession(session_id)
        }))
    }

    /// Resolve an owner for a write path, creating a guest session when the
    /// caller has none. Session-row insertion races are tolerated
    /// (`INSERT OR IGNORE`), and a cookie that outlived its row (database
    /// reset, completed migration) gets the row recreated.
    ///
    /// # Errors
    ///
    /// Returns `AUTH_INVALID` for an explicit invalid bearer header, or a
    /// database error if guest session creation fails.
    pub async fn resolve(
        &self,
        headers: &HeaderMap,
        sessions: &GuestSessionStore,
    ) -> AppResult<Identity> {
        match self.classify(headers)? {
            Classification::Authenticated {
                user_id,
                stale_guest_token,
            } => Ok(Identity::Authenticated {
                user_id,
                stale_guest_token,
            }),
            Classification::GuestWithSession(session_id) => {
                sessions.ensure(&session_id).await?;
                Ok(Identity::Guest {
                    session_id,
                    newly_issued: false,
                })
            }
            Classification::GuestNoSession => {
                let session_id = Uuid::new_v4().to_string();
                sessions.ensure(&session_id).await?;
                debug!("issued new guest session");
                Ok(Identity::Guest {
                    session_id,
                    newly_issued: true,
                })
            }
        }
    }
}

/// Extract a bearer token from the `Authorization` header
fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(http::header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(ToOwned::to_owned)
}
