// ABOUTME: Security helpers shared across route handlers
// ABOUTME: Currently cookie parsing and construction
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Charla Project

/// Cookie parsing and `Set-Cookie` construction
pub mod cookies;
