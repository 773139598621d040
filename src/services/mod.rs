// ABOUTME: Domain services extracted from route handlers
// ABOUTME: Chat exchange orchestration and guest-to-user migration
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Charla Project

/// Conversation reconciliation and the exchange event stream
pub mod chat_flow;

/// Reassigning guest conversations to a freshly authenticated user
pub mod guest_migration;
