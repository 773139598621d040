// ABOUTME: Shared helpers for integration tests
// ABOUTME: Re-exports the axum oneshot request utilities

#![allow(dead_code)]

pub mod axum_test;
