// ABOUTME: Shared test fixtures: temp database, app state, session tokens
// ABOUTME: Builds a full router against a tempfile-backed SQLite store

#![allow(dead_code)]

use charla::config::{Environment, ServerConfig};
use charla::database::Database;
use charla::routes::{self, AppState};
use charla::upstream::UpstreamConfig;
use jsonwebtoken::{encode, EncodingKey, Header};
use std::sync::Arc;
use tempfile::TempDir;
use uuid::Uuid;

/// HMAC secret shared between tests and the resolver
pub const TEST_SECRET: &str = "test-secret";

/// Everything a test needs to talk to the app
pub struct TestContext {
    /// Fully assembled router
    pub app: axum::Router,
    /// Direct store access for assertions
    pub db: Database,
    /// Shared state (for rebuilding routers)
    pub state: Arc<AppState>,
    _tmp: TempDir,
}

/// Build a context with an optional upstream base URL (mockito server)
pub async fn test_context(upstream_base_url: Option<String>) -> TestContext {
    let tmp = TempDir::new().expect("tempdir");
    let db_path = tmp.path().join("charla-test.db");
    let database_url = format!("sqlite:{}", db_path.display());

    let upstream = upstream_base_url.map(|base| {
        let mut config = UpstreamConfig::new(base, "/webhook");
        // No artificial pacing in tests
        config.chunk_delay_ms = 0;
        config
    });

    let config = ServerConfig {
        http_port: 0,
        database_url: database_url.clone(),
        auth_secret: Some(TEST_SECRET.to_owned()),
        upstream,
        environment: Environment::Testing,
    };

    let db = Database::connect(&database_url).await.expect("database");
    let state = Arc::new(AppState::new(&config, db.clone()));
    let app = routes::router(state.clone());

    TestContext {
        app,
        db,
        state,
        _tmp: tmp,
    }
}

/// Sign a session token the way the identity provider would
pub fn session_token(user_id: Uuid) -> String {
    let claims = charla::auth::SessionClaims {
        sub: user_id.to_string(),
        exp: usize::MAX,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(TEST_SECRET.as_bytes()),
    )
    .expect("token")
}
