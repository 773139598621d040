// ABOUTME: Main library entry point for the charla conversation relay server
// ABOUTME: Exposes HTTP routes, persistence, upstream relay, and the client session model
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Charla Project

#![deny(unsafe_code)]

//! # Charla
//!
//! A web chat relay: it forwards user messages to an external
//! answer-generation webhook and persists conversation history for both
//! registered users and anonymous guests.
//!
//! The interesting parts live in three layers:
//!
//! - **Identity & ownership**: every request resolves to an [`auth::OwnerRef`],
//!   either an authenticated user id or a guest session token carried in a
//!   session-scoped cookie. Guest conversations are migrated into the user's
//!   account at sign-in.
//! - **Relay & streaming**: one upstream HTTP call per exchange, normalized
//!   into a uniform event sequence ([`upstream::RelayEvent`]) and encoded as
//!   Server-Sent Events, whether or not the upstream actually streamed.
//! - **Client session model**: an embeddable state machine
//!   ([`client::ChatSession`]) that owns the active conversation, optimistic
//!   message appends, and the model-switch confirmation flow.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use charla::config::ServerConfig;
//! use charla::errors::AppResult;
//!
//! fn main() -> AppResult<()> {
//!     let config = ServerConfig::from_env()?;
//!     println!("charla configured for port {}", config.http_port);
//!     Ok(())
//! }
//! ```

/// Identity resolution: authenticated users, guest sessions, cookie issuance
pub mod auth;

/// Embeddable client-side conversation session model and notification bus
pub mod client;

/// Environment-based server configuration
pub mod config;

/// Conversation, message, and guest-session persistence (SQLite via sqlx)
pub mod database;

/// Unified error handling with standard error codes and HTTP responses
pub mod errors;

/// Structured logging configuration
pub mod logging;

/// HTTP route handlers and router assembly
pub mod routes;

/// Cookie parsing and construction helpers
pub mod security;

/// Server-Sent Events wire envelope encoding
pub mod sse;

/// Conversation title synthesis from the first user message
pub mod titles;

/// Upstream answer-service client and relay event normalization
pub mod upstream;

/// Domain services: chat exchange flow and guest-to-user migration
pub mod services;
