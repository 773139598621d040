// ABOUTME: Environment configuration management for deployment-specific settings
// ABOUTME: Handles environment variables and runtime configuration parsing
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Charla Project

//! Environment-based configuration management

use crate::errors::{AppError, AppResult};
use crate::upstream::UpstreamConfig;
use serde::{Deserialize, Serialize};
use std::env;
use tracing::warn;

/// Environment type for security-sensitive configuration
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Local development
    #[default]
    Development,
    /// Production deployment
    Production,
    /// Test runs
    Testing,
}

impl Environment {
    /// Parse from string with fallback
    #[must_use]
    pub fn from_str_or_default(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "production" | "prod" => Self::Production,
            "testing" | "test" => Self::Testing,
            _ => Self::Development,
        }
    }

    /// Check if this is a production environment
    #[must_use]
    pub const fn is_production(self) -> bool {
        matches!(self, Self::Production)
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Development => write!(f, "development"),
            Self::Production => write!(f, "production"),
            Self::Testing => write!(f, "testing"),
        }
    }
}

/// Server configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP listen port (`CHARLA_HTTP_PORT`)
    pub http_port: u16,
    /// Relational store connection string (`DATABASE_URL`)
    pub database_url: String,
    /// HMAC secret for validating session tokens from the identity provider
    /// (`AUTH_TOKEN_SECRET`). When absent every caller is treated as a guest.
    pub auth_secret: Option<String>,
    /// Upstream answer-service configuration; absence degrades `/chat/send`
    /// to an immediate error event instead of a hang
    pub upstream: Option<UpstreamConfig>,
    /// Deployment environment (`ENVIRONMENT`), controls the `Secure` cookie
    /// attribute
    pub environment: Environment,
}

impl ServerConfig {
    /// Load configuration from environment variables
    ///
    /// # Errors
    ///
    /// Returns an error if `CHARLA_HTTP_PORT` is set but not a valid port.
    pub fn from_env() -> AppResult<Self> {
        let http_port = match env::var("CHARLA_HTTP_PORT") {
            Ok(raw) => raw
                .parse::<u16>()
                .map_err(|e| AppError::config(format!("Invalid CHARLA_HTTP_PORT '{raw}': {e}")))?,
            Err(_) => 8080,
        };

        let database_url =
            env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite:data/charla.db".into());

        let auth_secret = env::var("AUTH_TOKEN_SECRET").ok();
        if auth_secret.is_none() {
            warn!("AUTH_TOKEN_SECRET not set; all callers will be treated as guests");
        }

        let upstream = UpstreamConfig::from_env();
        if upstream.is_none() {
            warn!("UPSTREAM_BASE_URL / UPSTREAM_WEBHOOK_PATH not set; /chat/send will report a configuration error");
        }

        let environment = Environment::from_str_or_default(
            &env::var("ENVIRONMENT").unwrap_or_else(|_| "development".into()),
        );

        Ok(Self {
            http_port,
            database_url,
            auth_secret,
            upstream,
            environment,
        })
    }
}
