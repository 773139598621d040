// ABOUTME: Embeddable chat client session: state machine, notices, completion signal
// ABOUTME: The controller wires streaming transitions to an awaitable idle signal
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Charla Project

//! # Client session model
//!
//! [`ChatSession`] is the pure state machine; [`ChatController`] wraps it
//! for async consumers, exposing a watch-based completion signal so flows
//! like a model switch can *await* the end of an in-flight stream instead
//! of polling a loading flag.

mod events;
mod state;

pub use events::{ConversationEvents, ConversationNotice};
pub use state::{
    ChatEntry, ChatSession, EntryRole, SelectOutcome, SessionState, SubmitError, SwitchOutcome,
};

use crate::upstream::SourceRef;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::watch;

/// Result of waiting for the stream to finish before a model switch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchWait {
    /// The stream finished (or none was running); the switch proceeded
    Completed(SwitchOutcome),
    /// The stream did not finish in time; surfaced as a warning, the
    /// switch did not proceed
    TimedOut,
}

/// Async wrapper around [`ChatSession`] with conversation notices and an
/// awaitable streaming signal
pub struct ChatController {
    session: Mutex<ChatSession>,
    streaming_tx: watch::Sender<bool>,
    events: ConversationEvents,
}

impl ChatController {
    /// Create a controller on the given model
    #[must_use]
    pub fn new(model: impl Into<String>) -> Self {
        let (streaming_tx, _) = watch::channel(false);
        Self {
            session: Mutex::new(ChatSession::new(model)),
            streaming_tx,
            events: ConversationEvents::new(),
        }
    }

    /// The conversation notice hub
    #[must_use]
    pub const fn events(&self) -> &ConversationEvents {
        &self.events
    }

    /// Run a closure against the session, then refresh the streaming signal
    pub fn with_session<R>(&self, f: impl FnOnce(&mut ChatSession) -> R) -> R {
        #[allow(clippy::unwrap_used)] // Safe: no code path panics while holding the lock
        let mut session = self.session.lock().unwrap();
        let result = f(&mut session);
        // send_replace updates the value even with no subscribers yet
        self.streaming_tx.send_replace(session.is_streaming());
        result
    }

    /// Submit a message (optimistic append + enter streaming)
    ///
    /// # Errors
    ///
    /// Propagates [`SubmitError`] when the session is busy.
    pub fn submit(&self, text: impl Into<String>) -> Result<(), SubmitError> {
        self.with_session(|s| s.submit(text))
    }

    /// Feed a content chunk into the session
    pub fn chunk(&self, text: &str) {
        self.with_session(|s| s.chunk(text));
    }

    /// Feed citations into the session
    pub fn sources_received(&self, sources: Vec<SourceRef>) {
        self.with_session(|s| s.sources_received(sources));
    }

    /// Finalize the exchange and notify subscribers of the change
    pub fn complete(&self, conversation_id: Option<String>, message_id: Option<String>) {
        let notice = self.with_session(|s| {
            let had_id = s.conversation_id().map(ToOwned::to_owned);
            s.complete(conversation_id, message_id)?;
            let id = s.conversation_id()?.to_owned();
            let first_user_turn = s
                .messages()
                .iter()
                .find(|m| m.role == EntryRole::User)
                .map(|m| m.content.clone())
                .unwrap_or_default();
            Some(match had_id {
                None => ConversationNotice::Created {
                    id,
                    title: crate::titles::synthesize(&first_user_turn),
                },
                Some(_) => ConversationNotice::Updated {
                    id,
                    title: None,
                    last_message_at: None,
                },
            })
        });

        if let Some(notice) = notice {
            self.events.emit(notice);
        }
    }

    /// Surface a stream failure
    pub fn stream_error(&self, message: impl Into<String>) {
        self.with_session(|s| s.stream_error(message));
    }

    /// Abort the in-flight exchange
    pub fn abort_stream(&self) {
        self.with_session(ChatSession::abort_stream);
    }

    /// Wait until no exchange is streaming, up to `timeout`.
    ///
    /// Returns false on timeout.
    pub async fn await_stream_end(&self, timeout: Duration) -> bool {
        let mut rx = self.streaming_tx.subscribe();
        if !*rx.borrow() {
            return true;
        }

        tokio::time::timeout(timeout, async {
            while rx.changed().await.is_ok() {
                if !*rx.borrow() {
                    return;
                }
            }
        })
        .await
        .is_ok()
    }

    /// Switch models, waiting for any in-flight stream to finish first. A
    /// timeout is surfaced to the caller as [`SwitchWait::TimedOut`] rather
    /// than silently proceeding mid-stream.
    pub async fn switch_model(&self, model: &str, timeout: Duration) -> SwitchWait {
        if !self.await_stream_end(timeout).await {
            return SwitchWait::TimedOut;
        }
        SwitchWait::Completed(self.with_session(|s| s.request_model_switch(model)))
    }
}
