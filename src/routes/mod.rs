// ABOUTME: HTTP route assembly and shared request state
// ABOUTME: Mounts conversation CRUD and the chat send stream on one router
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Charla Project

/// `POST /chat/send` streaming handler
pub mod chat;

/// Conversation CRUD handlers
pub mod conversations;

use crate::auth::{Identity, IdentityResolver};
use crate::config::ServerConfig;
use crate::database::Database;
use crate::security::cookies::guest_cookie;
use crate::upstream::UpstreamClient;
use axum::response::Response;
use axum::Router;
use http::header::SET_COOKIE;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Shared state for every route handler
pub struct AppState {
    /// Relational store handle
    pub db: Database,
    /// Request identity classification
    pub resolver: IdentityResolver,
    /// Upstream webhook client; `None` when unconfigured
    pub upstream: Option<Arc<UpstreamClient>>,
    /// Whether issued cookies carry the `Secure` attribute
    pub secure_cookies: bool,
}

impl AppState {
    /// Build state from loaded configuration and a connected store
    #[must_use]
    pub fn new(config: &ServerConfig, db: Database) -> Self {
        Self {
            db,
            resolver: IdentityResolver::new(config.auth_secret.as_deref()),
            upstream: config
                .upstream
                .clone()
                .map(|upstream| Arc::new(UpstreamClient::new(upstream))),
            secure_cookies: config.environment.is_production(),
        }
    }
}

/// Assemble the full application router
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(conversations::ConversationRoutes::routes(state.clone()))
        .merge(chat::ChatRoutes::routes(state))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Set the guest session cookie on the outgoing response when this request
/// issued a new session
pub(crate) fn attach_guest_cookie(response: &mut Response, identity: &Identity, secure: bool) {
    if let Identity::Guest {
        session_id,
        newly_issued: true,
    } = identity
    {
        if let Ok(value) = guest_cookie(session_id, secure).parse() {
            response.headers_mut().append(SET_COOKIE, value);
        }
    }
}
