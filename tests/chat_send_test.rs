// ABOUTME: Integration tests for the chat send stream
// ABOUTME: Covers append-before-relay, stream termination, titles, and degradations

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

mod common;
mod helpers;

use common::{session_token, test_context};
use helpers::axum_test::{event_types, joined_content, TestRequest};

use axum::http::StatusCode;
use charla::auth::OwnerRef;
use charla::routes::conversations::ConversationResponse;
use serde_json::json;
use uuid::Uuid;

/// Mock a single-shot JSON upstream reply
async fn mock_upstream(server: &mut mockito::ServerGuard, body: serde_json::Value) -> mockito::Mock {
    server
        .mock("POST", "/webhook")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(body.to_string())
        .create_async()
        .await
}

fn complete_event(events: &[serde_json::Value]) -> Option<&serde_json::Value> {
    events
        .iter()
        .find(|e| e.get("type").and_then(|t| t.as_str()) == Some("complete"))
}

#[tokio::test]
async fn test_guest_first_message_creates_conversation_with_short_title() {
    // Scenario A: "Hi" (2 chars) as first message, no conversation id
    let mut server = mockito::Server::new_async().await;
    let _mock = mock_upstream(&mut server, json!({"output": "Hello there"})).await;
    let ctx = test_context(Some(server.url())).await;

    let response = TestRequest::post("/chat/send")
        .guest_cookie("guest-1")
        .json(&json!({"message": "Hi"}))
        .send(ctx.app.clone())
        .await;

    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(
        response.header("content-type").as_deref(),
        Some("text/event-stream")
    );

    let events = response.sse_events();
    assert_eq!(joined_content(&events), "Hello there");

    let complete = complete_event(&events).expect("complete event");
    assert_eq!(complete.pointer("/data/ok"), Some(&json!(true)));
    let conversation_id = complete
        .pointer("/data/conversationId")
        .and_then(|v| v.as_str())
        .expect("conversationId in complete event");

    // The durable row exists, owned by the guest, titled from the message
    let record = ctx
        .db
        .conversations()
        .get_conversation(conversation_id)
        .await
        .unwrap()
        .expect("conversation persisted");
    assert_eq!(record.title, "Hi");
    assert_eq!(record.guest_session_id.as_deref(), Some("guest-1"));
    assert!(record.user_id.is_none());
}

#[tokio::test]
async fn test_question_message_becomes_question_title() {
    // Scenario B: the whole question (18 chars, ends in '?') becomes the title
    let mut server = mockito::Server::new_async().await;
    let _mock = mock_upstream(&mut server, json!({"output": "La gracia es..."})).await;
    let ctx = test_context(Some(server.url())).await;
    let token = session_token(Uuid::new_v4());

    let response = TestRequest::post("/chat/send")
        .bearer(&token)
        .json(&json!({"message": "¿Qué es la gracia?"}))
        .send(ctx.app.clone())
        .await;

    let events = response.sse_events();
    let conversation_id = complete_event(&events)
        .and_then(|e| e.pointer("/data/conversationId"))
        .and_then(|v| v.as_str())
        .unwrap()
        .to_owned();

    let record = ctx
        .db
        .conversations()
        .get_conversation(&conversation_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.title, "¿Qué es la gracia?");
}

#[tokio::test]
async fn test_upstream_failure_emits_single_error_and_keeps_user_message() {
    // Scenario D + append-before-relay: upstream 503
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("POST", "/webhook")
        .with_status(503)
        .with_body("Service Unavailable")
        .create_async()
        .await;
    let ctx = test_context(Some(server.url())).await;

    let response = TestRequest::post("/chat/send")
        .guest_cookie("guest-err")
        .json(&json!({"message": "se cae el servicio"}))
        .send(ctx.app.clone())
        .await;

    assert_eq!(response.status_code(), StatusCode::OK);
    let events = response.sse_events();

    // Exactly one terminal event, and it is the error; no complete frame
    assert_eq!(event_types(&events), vec!["error"]);
    let error = &events[0];
    assert_eq!(
        error.pointer("/data/code"),
        Some(&json!("UPSTREAM_SERVICE_ERROR"))
    );
    let message = error
        .pointer("/data/message")
        .and_then(|m| m.as_str())
        .unwrap();
    assert!(message.contains("503"));

    // The user's message is durable even though the relay failed, and the
    // assistant row carries no content
    let owner = OwnerRef::Guest("guest-err".to_owned());
    let conversations = ctx
        .db
        .conversations()
        .list_conversations(&owner, 50)
        .await
        .unwrap();
    assert_eq!(conversations.len(), 1);

    let messages = ctx
        .db
        .conversations()
        .get_messages(&conversations[0].id)
        .await
        .unwrap();
    assert_eq!(messages[0].role, "user");
    assert_eq!(messages[0].content, "se cae el servicio");
    let assistant_content: String = messages
        .iter()
        .filter(|m| m.role == "assistant")
        .map(|m| m.content.clone())
        .collect();
    assert_eq!(assistant_content, "");
}

#[tokio::test]
async fn test_stream_terminates_with_exactly_one_terminal_event() {
    let mut server = mockito::Server::new_async().await;
    let _mock = mock_upstream(&mut server, json!({"output": "respuesta"})).await;
    let ctx = test_context(Some(server.url())).await;

    let response = TestRequest::post("/chat/send")
        .guest_cookie("guest-t")
        .json(&json!({"message": "una pregunta cualquiera"}))
        .send(ctx.app.clone())
        .await;

    let events = response.sse_events();
    let terminals = events
        .iter()
        .filter(|e| {
            matches!(
                e.get("type").and_then(|t| t.as_str()),
                Some("complete" | "error")
            )
        })
        .count();
    assert_eq!(terminals, 1);
    // The terminal event is the last one
    assert!(matches!(
        events.last().and_then(|e| e.get("type")).and_then(|t| t.as_str()),
        Some("complete")
    ));
}

#[tokio::test]
async fn test_missing_message_is_rejected_before_any_side_effect() {
    let mut server = mockito::Server::new_async().await;
    let mock = mock_upstream(&mut server, json!({"output": "nunca"})).await;
    let ctx = test_context(Some(server.url())).await;

    let response = TestRequest::post("/chat/send")
        .guest_cookie("guest-v")
        .json(&json!({"message": "   "}))
        .send(ctx.app.clone())
        .await;

    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);

    // Nothing reached the upstream and nothing was persisted
    assert!(!mock.matched_async().await);
    let owner = OwnerRef::Guest("guest-v".to_owned());
    assert!(ctx
        .db
        .conversations()
        .list_conversations(&owner, 50)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_unknown_conversation_id_is_conversation_not_found() {
    let mut server = mockito::Server::new_async().await;
    let _mock = mock_upstream(&mut server, json!({"output": "nunca"})).await;
    let ctx = test_context(Some(server.url())).await;

    let response = TestRequest::post("/chat/send")
        .guest_cookie("guest-x")
        .json(&json!({"message": "hola hola", "conversationId": "no-such-id"}))
        .send(ctx.app.clone())
        .await;

    assert_eq!(response.status_code(), StatusCode::NOT_FOUND);
    let body: serde_json::Value = response.json();
    assert_eq!(
        body.pointer("/error/code"),
        Some(&json!("CONVERSATION_NOT_FOUND"))
    );
}

#[tokio::test]
async fn test_foreign_conversation_id_is_never_reassigned() {
    let mut server = mockito::Server::new_async().await;
    let _mock = mock_upstream(&mut server, json!({"output": "nunca"})).await;
    let ctx = test_context(Some(server.url())).await;

    let owner_token = session_token(Uuid::new_v4());
    let created: ConversationResponse = TestRequest::post("/conversations")
        .bearer(&owner_token)
        .json(&json!({"title": "privada"}))
        .send(ctx.app.clone())
        .await
        .json();

    // A guest tries to send into someone else's conversation
    let response = TestRequest::post("/chat/send")
        .guest_cookie("guest-intruso")
        .json(&json!({"message": "hola hola", "conversationId": created.id}))
        .send(ctx.app.clone())
        .await;

    assert_eq!(response.status_code(), StatusCode::NOT_FOUND);
    let body: serde_json::Value = response.json();
    assert_eq!(
        body.pointer("/error/code"),
        Some(&json!("CONVERSATION_NOT_FOUND"))
    );
}

#[tokio::test]
async fn test_ephemeral_id_creates_new_durable_conversation() {
    let mut server = mockito::Server::new_async().await;
    let _mock = mock_upstream(&mut server, json!({"output": "ok"})).await;
    let ctx = test_context(Some(server.url())).await;

    let response = TestRequest::post("/chat/send")
        .guest_cookie("guest-eph")
        .json(&json!({
            "message": "mensaje desde almacenamiento local",
            "conversationId": "temp_1722_abc123",
        }))
        .send(ctx.app.clone())
        .await;

    let events = response.sse_events();
    let conversation_id = complete_event(&events)
        .and_then(|e| e.pointer("/data/conversationId"))
        .and_then(|v| v.as_str())
        .unwrap();

    // The ephemeral id was replaced by a durable one
    assert!(!conversation_id.starts_with("temp_"));
    assert!(ctx
        .db
        .conversations()
        .get_conversation(conversation_id)
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn test_second_message_reuses_conversation_and_keeps_title() {
    let mut server = mockito::Server::new_async().await;
    let _mock = mock_upstream(&mut server, json!({"output": "respuesta"})).await;
    let ctx = test_context(Some(server.url())).await;

    let first = TestRequest::post("/chat/send")
        .guest_cookie("guest-2m")
        .json(&json!({"message": "Hola"}))
        .send(ctx.app.clone())
        .await;
    let conversation_id = complete_event(&first.sse_events())
        .and_then(|e| e.pointer("/data/conversationId"))
        .and_then(|v| v.as_str())
        .unwrap()
        .to_owned();

    let second = TestRequest::post("/chat/send")
        .guest_cookie("guest-2m")
        .json(&json!({
            "message": "una segunda pregunta mucho mas larga que la primera",
            "conversationId": conversation_id,
        }))
        .send(ctx.app.clone())
        .await;
    assert_eq!(second.status_code(), StatusCode::OK);

    let record = ctx
        .db
        .conversations()
        .get_conversation(&conversation_id)
        .await
        .unwrap()
        .unwrap();
    // Title still comes from the first message
    assert_eq!(record.title, "Hola");

    let messages = ctx
        .db
        .conversations()
        .get_messages(&conversation_id)
        .await
        .unwrap();
    let roles: Vec<&str> = messages.iter().map(|m| m.role.as_str()).collect();
    assert_eq!(roles, vec!["user", "assistant", "user", "assistant"]);
}

#[tokio::test]
async fn test_sources_and_usage_are_streamed_and_persisted() {
    let mut server = mockito::Server::new_async().await;
    let _mock = mock_upstream(
        &mut server,
        json!({
            "output": "respuesta con fuentes",
            "sources": [{"title": "Lección 7", "url": "https://example.org/l7", "snippet": "..."}],
            "usage": {"total_tokens": 42},
        }),
    )
    .await;
    let ctx = test_context(Some(server.url())).await;

    let response = TestRequest::post("/chat/send")
        .guest_cookie("guest-src")
        .json(&json!({"message": "fuentes por favor"}))
        .send(ctx.app.clone())
        .await;

    let events = response.sse_events();
    assert_eq!(
        event_types(&events),
        vec!["message", "sources", "usage", "complete"]
    );
    assert_eq!(
        events[1].pointer("/data/sources/0/title"),
        Some(&json!("Lección 7"))
    );
    assert_eq!(
        events[2].pointer("/data/usage/total_tokens"),
        Some(&json!(42))
    );

    // Extras landed on the persisted assistant row
    let complete = complete_event(&events).unwrap();
    let conversation_id = complete
        .pointer("/data/conversationId")
        .and_then(|v| v.as_str())
        .unwrap();
    let message_id = complete
        .pointer("/data/messageId")
        .and_then(|v| v.as_str())
        .unwrap();

    let messages = ctx
        .db
        .conversations()
        .get_messages(conversation_id)
        .await
        .unwrap();
    let assistant = messages.iter().find(|m| m.id == message_id).unwrap();
    assert_eq!(assistant.content, "respuesta con fuentes");
    assert!(assistant.sources.as_deref().unwrap().contains("Lección 7"));
    assert!(assistant.usage.as_deref().unwrap().contains("42"));
}

#[tokio::test]
async fn test_array_reply_uses_first_element() {
    let mut server = mockito::Server::new_async().await;
    let _mock = mock_upstream(
        &mut server,
        json!([{"answer": "primero"}, {"answer": "segundo"}]),
    )
    .await;
    let ctx = test_context(Some(server.url())).await;

    let response = TestRequest::post("/chat/send")
        .guest_cookie("guest-arr")
        .json(&json!({"message": "respuesta en lote"}))
        .send(ctx.app.clone())
        .await;

    assert_eq!(joined_content(&response.sse_events()), "primero");
}

#[tokio::test]
async fn test_long_answer_is_rechunked() {
    let long_answer = "x".repeat(1600);
    let mut server = mockito::Server::new_async().await;
    let _mock = mock_upstream(&mut server, json!({ "output": long_answer })).await;
    let ctx = test_context(Some(server.url())).await;

    let response = TestRequest::post("/chat/send")
        .guest_cookie("guest-long")
        .json(&json!({"message": "respuesta larga por favor"}))
        .send(ctx.app.clone())
        .await;

    let events = response.sse_events();
    let message_count = events
        .iter()
        .filter(|e| e.get("type").and_then(|t| t.as_str()) == Some("message"))
        .count();
    // 1600 chars in 750-char windows
    assert_eq!(message_count, 3);
    assert_eq!(joined_content(&events).len(), 1600);
}

#[tokio::test]
async fn test_streaming_upstream_raw_text_passes_through() {
    // Non-JSON content type takes the incremental path; raw text chunks are
    // forwarded verbatim
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("POST", "/webhook")
        .with_status(200)
        .with_header("content-type", "text/plain")
        .with_body("respuesta transmitida")
        .create_async()
        .await;
    let ctx = test_context(Some(server.url())).await;

    let response = TestRequest::post("/chat/send")
        .guest_cookie("guest-raw")
        .json(&json!({"message": "transmite esto"}))
        .send(ctx.app.clone())
        .await;

    let events = response.sse_events();
    assert_eq!(joined_content(&events), "respuesta transmitida");
    assert!(complete_event(&events).is_some());
}

#[tokio::test]
async fn test_streaming_upstream_json_chunk_is_unwrapped() {
    // A stream chunk that parses as a JSON object with a content field is
    // unwrapped instead of forwarded verbatim
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("POST", "/webhook")
        .with_status(200)
        .with_header("content-type", "application/octet-stream")
        .with_body(r#"{"content":"hola","sources":[{"title":"t","url":"u","snippet":"s"}]}"#)
        .create_async()
        .await;
    let ctx = test_context(Some(server.url())).await;

    let response = TestRequest::post("/chat/send")
        .guest_cookie("guest-jsonchunk")
        .json(&json!({"message": "chunk json"}))
        .send(ctx.app.clone())
        .await;

    let events = response.sse_events();
    assert_eq!(joined_content(&events), "hola");
    assert!(events
        .iter()
        .any(|e| e.get("type").and_then(|t| t.as_str()) == Some("sources")));
}

#[tokio::test]
async fn test_history_window_is_forwarded_upstream() {
    let mut server = mockito::Server::new_async().await;
    // The mock asserts the request body carries the current message and a
    // history array that includes the just-persisted user turn
    let mock = server
        .mock("POST", "/webhook")
        .match_body(mockito::Matcher::AllOf(vec![
            mockito::Matcher::PartialJson(json!({
                "chatInput": "segunda pregunta",
                "topK": 5,
            })),
            // The history window is a non-empty array carrying the
            // just-persisted user turn
            mockito::Matcher::Regex(r#""history":\[\{"#.to_owned()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(json!({"output": "ok"}).to_string())
        .create_async()
        .await;
    let ctx = test_context(Some(server.url())).await;

    let first = TestRequest::post("/chat/send")
        .guest_cookie("guest-hist")
        .json(&json!({"message": "segunda pregunta"}))
        .send(ctx.app.clone())
        .await;
    assert_eq!(first.status_code(), StatusCode::OK);

    mock.assert_async().await;
}

#[tokio::test]
async fn test_missing_upstream_config_degrades_to_error_event() {
    let ctx = test_context(None).await;

    let response = TestRequest::post("/chat/send")
        .guest_cookie("guest-cfg")
        .json(&json!({"message": "hola"}))
        .send(ctx.app.clone())
        .await;

    assert_eq!(response.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        response.header("content-type").as_deref(),
        Some("text/event-stream")
    );

    let events = response.sse_events();
    assert_eq!(event_types(&events), vec!["error"]);
    assert_eq!(
        events[0].pointer("/data/code"),
        Some(&json!("UPSTREAM_CONFIG_ERROR"))
    );
}

#[tokio::test]
async fn test_new_guest_send_issues_cookie() {
    let mut server = mockito::Server::new_async().await;
    let _mock = mock_upstream(&mut server, json!({"output": "hola"})).await;
    let ctx = test_context(Some(server.url())).await;

    let response = TestRequest::post("/chat/send")
        .json(&json!({"message": "primer contacto"}))
        .send(ctx.app.clone())
        .await;

    assert_eq!(response.status_code(), StatusCode::OK);
    let cookie = response.header("set-cookie").expect("guest cookie issued");
    assert!(cookie.starts_with("guest_token="));
}
