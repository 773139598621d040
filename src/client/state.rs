// ABOUTME: Conversation session state machine for embedding in a chat client
// ABOUTME: Models selection, optimistic sends, streaming, logout, and model switches
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Charla Project

//! The in-client counterpart of the server's conversation handling.
//!
//! Every "ignore this event, we're mid-transition" rule is a modeled state,
//! not an out-of-band flag: stale history loads, double-clicked selections,
//! and post-abort chunks all fall out of the state checks below.

use crate::upstream::SourceRef;

/// Sender of a client-side chat entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryRole {
    /// End-user input
    User,
    /// Assistant reply
    Assistant,
}

/// One rendered message in the client transcript
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatEntry {
    /// Message id (server-assigned, or client-local for optimistic entries)
    pub id: String,
    /// Sender role
    pub role: EntryRole,
    /// Message content
    pub content: String,
}

/// Lifecycle of the active conversation.
///
/// `Active(None)` / `Streaming(None)` mean the conversation was implicitly
/// started client-side and its durable id is still pending; the id arrives
/// with the stream's `complete` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// No active conversation
    NoConversation,
    /// A sidebar selection is fetching its history
    LoadingHistory(String),
    /// Conversation ready for input
    Active(Option<String>),
    /// An exchange is streaming in
    Streaming(Option<String>),
}

/// Outcome of a selection request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectOutcome {
    /// History load started
    Started,
    /// Same selection already in flight or active; nothing to do
    AlreadyCurrent,
}

/// Outcome of a model switch request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchOutcome {
    /// No messages yet: the switch applied in place
    Applied,
    /// Existing messages: confirmation required before the new conversation
    ConfirmationRequired,
    /// Already on the requested model
    Unchanged,
}

/// Why a submit was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SubmitError {
    /// A history load is in flight
    #[error("history load in progress")]
    LoadingHistory,
    /// An exchange is already streaming
    #[error("an exchange is already streaming")]
    StreamInFlight,
}

/// Client-side conversation session state machine
#[derive(Debug)]
pub struct ChatSession {
    state: SessionState,
    messages: Vec<ChatEntry>,
    partial: String,
    sources: Vec<SourceRef>,
    error: Option<String>,
    model: String,
    pending_switch: Option<String>,
    last_auth: Option<bool>,
    optimistic_counter: u64,
}

impl ChatSession {
    /// Create a fresh session on the given model
    #[must_use]
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            state: SessionState::NoConversation,
            messages: Vec::new(),
            partial: String::new(),
            sources: Vec::new(),
            error: None,
            model: model.into(),
            pending_switch: None,
            last_auth: None,
            optimistic_counter: 0,
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Current lifecycle state
    #[must_use]
    pub const fn state(&self) -> &SessionState {
        &self.state
    }

    /// Finalized transcript entries
    #[must_use]
    pub fn messages(&self) -> &[ChatEntry] {
        &self.messages
    }

    /// Partial assistant text accumulated mid-stream
    #[must_use]
    pub fn partial(&self) -> &str {
        &self.partial
    }

    /// Citations received for the current exchange
    #[must_use]
    pub fn sources(&self) -> &[SourceRef] {
        &self.sources
    }

    /// Last surfaced error, if any
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Selected upstream model
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Durable id of the active conversation, when known
    #[must_use]
    pub fn conversation_id(&self) -> Option<&str> {
        match &self.state {
            SessionState::NoConversation => None,
            SessionState::LoadingHistory(id) => Some(id),
            SessionState::Active(id) | SessionState::Streaming(id) => id.as_deref(),
        }
    }

    /// Whether an exchange is streaming in
    #[must_use]
    pub const fn is_streaming(&self) -> bool {
        matches!(self.state, SessionState::Streaming(_))
    }

    // ========================================================================
    // Selection
    // ========================================================================

    /// Handle a sidebar selection. Idempotent against rapid repeats: a
    /// selection already loading or already active is a no-op, so a
    /// double-click cannot start two divergent loads.
    pub fn select_conversation(&mut self, id: &str) -> SelectOutcome {
        match &self.state {
            SessionState::LoadingHistory(current) if current == id => {
                return SelectOutcome::AlreadyCurrent
            }
            SessionState::Active(Some(current)) if current == id => {
                return SelectOutcome::AlreadyCurrent
            }
            SessionState::Streaming(_) => {
                // Selecting away mid-stream aborts the in-flight exchange
                self.abort_stream();
            }
            _ => {}
        }

        self.messages.clear();
        self.sources.clear();
        self.partial.clear();
        self.error = None;
        self.state = SessionState::LoadingHistory(id.to_owned());
        SelectOutcome::Started
    }

    /// History fetch finished. Loads for anything but the in-flight
    /// selection are stale and dropped.
    pub fn history_loaded(&mut self, id: &str, entries: Vec<ChatEntry>) -> bool {
        match &self.state {
            SessionState::LoadingHistory(current) if current == id => {
                self.messages = entries;
                self.state = SessionState::Active(Some(id.to_owned()));
                true
            }
            _ => false,
        }
    }

    /// Clear the active conversation and start fresh
    pub fn reset(&mut self) {
        self.messages.clear();
        self.sources.clear();
        self.partial.clear();
        self.error = None;
        self.pending_switch = None;
        self.state = SessionState::NoConversation;
    }

    // ========================================================================
    // Exchange
    // ========================================================================

    /// Submit a message: appends the user's entry optimistically (before
    /// any network round trip) and enters `Streaming`.
    ///
    /// # Errors
    ///
    /// Rejected while history is loading or another exchange is in flight.
    pub fn submit(&mut self, text: impl Into<String>) -> Result<(), SubmitError> {
        let id = match &self.state {
            SessionState::LoadingHistory(_) => return Err(SubmitError::LoadingHistory),
            SessionState::Streaming(_) => return Err(SubmitError::StreamInFlight),
            SessionState::NoConversation => None,
            SessionState::Active(id) => id.clone(),
        };

        self.optimistic_counter += 1;
        self.messages.push(ChatEntry {
            id: format!("local-{}", self.optimistic_counter),
            role: EntryRole::User,
            content: text.into(),
        });
        self.partial.clear();
        self.sources.clear();
        self.error = None;
        self.state = SessionState::Streaming(id);
        Ok(())
    }

    /// A content chunk arrived. Chunks outside `Streaming` (after an abort
    /// or error) are dropped.
    pub fn chunk(&mut self, text: &str) {
        if self.is_streaming() {
            self.partial.push_str(text);
        }
    }

    /// Citations arrived for the in-flight exchange
    pub fn sources_received(&mut self, sources: Vec<SourceRef>) {
        if self.is_streaming() {
            self.sources = sources;
        }
    }

    /// The stream completed: finalize the assistant entry from the partial
    /// buffer and adopt the durable ids the server reported.
    ///
    /// Returns the finalized entry, or `None` outside `Streaming`.
    pub fn complete(
        &mut self,
        conversation_id: Option<String>,
        message_id: Option<String>,
    ) -> Option<&ChatEntry> {
        if !self.is_streaming() {
            return None;
        }

        let current = match &self.state {
            SessionState::Streaming(id) => id.clone(),
            _ => None,
        };
        let resolved = conversation_id.or(current);

        self.optimistic_counter += 1;
        let id =
            message_id.unwrap_or_else(|| format!("local-assistant-{}", self.optimistic_counter));
        self.messages.push(ChatEntry {
            id,
            role: EntryRole::Assistant,
            content: std::mem::take(&mut self.partial),
        });
        self.state = SessionState::Active(resolved);
        self.messages.last()
    }

    /// The stream failed: surface the error, keep every prior message
    /// intact, and discard the partial assistant text.
    pub fn stream_error(&mut self, message: impl Into<String>) {
        if !self.is_streaming() {
            return;
        }
        let current = match &self.state {
            SessionState::Streaming(id) => id.clone(),
            _ => None,
        };
        self.partial.clear();
        self.error = Some(message.into());
        self.state = SessionState::Active(current);
    }

    /// Abort the in-flight exchange: client-side partial content is
    /// discarded, not persisted; prior messages stay.
    pub fn abort_stream(&mut self) {
        if !self.is_streaming() {
            return;
        }
        let current = match &self.state {
            SessionState::Streaming(id) => id.clone(),
            _ => None,
        };
        self.partial.clear();
        self.state = SessionState::Active(current);
    }

    // ========================================================================
    // Authentication edge
    // ========================================================================

    /// Observe the authentication state. Only an authenticated→anonymous
    /// edge clears the session; the first observation (initial mount) never
    /// wipes a guest's freshly started chat.
    pub fn auth_changed(&mut self, authenticated: bool) {
        let logged_out = self.last_auth == Some(true) && !authenticated;
        self.last_auth = Some(authenticated);
        if logged_out {
            self.reset();
        }
    }

    // ========================================================================
    // Model switch
    // ========================================================================

    /// Request a switch to another upstream model. With no messages the
    /// switch applies in place; with existing messages it needs
    /// confirmation because the new model implies a new conversation.
    pub fn request_model_switch(&mut self, model: &str) -> SwitchOutcome {
        if model == self.model {
            return SwitchOutcome::Unchanged;
        }

        if self.messages.is_empty() {
            self.model = model.to_owned();
            return SwitchOutcome::Applied;
        }

        self.pending_switch = Some(model.to_owned());
        SwitchOutcome::ConfirmationRequired
    }

    /// Confirm the pending switch: adopt the model and start a brand-new
    /// conversation. Returns false when nothing was pending.
    pub fn confirm_model_switch(&mut self) -> bool {
        let Some(model) = self.pending_switch.take() else {
            return false;
        };
        if self.is_streaming() {
            self.abort_stream();
        }
        self.model = model;
        self.reset();
        true
    }

    /// Cancel the pending switch
    pub fn cancel_model_switch(&mut self) {
        self.pending_switch = None;
    }

    /// Model switch awaiting confirmation, if any
    #[must_use]
    pub fn pending_model_switch(&self) -> Option<&str> {
        self.pending_switch.as_deref()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::panic)]

    use super::*;

    fn streaming_session() -> ChatSession {
        let mut session = ChatSession::new("n8n");
        session.submit("hola").unwrap();
        session
    }

    #[test]
    fn test_submit_appends_optimistic_user_entry() {
        let mut session = ChatSession::new("n8n");
        session.submit("¿Qué es la gracia?").unwrap();

        assert_eq!(session.messages().len(), 1);
        assert_eq!(session.messages()[0].role, EntryRole::User);
        assert_eq!(session.messages()[0].content, "¿Qué es la gracia?");
        assert!(matches!(session.state(), SessionState::Streaming(None)));
    }

    #[test]
    fn test_submit_rejected_while_streaming() {
        let mut session = streaming_session();
        assert_eq!(session.submit("otra"), Err(SubmitError::StreamInFlight));
        assert_eq!(session.messages().len(), 1);
    }

    #[test]
    fn test_chunks_accumulate_and_complete_finalizes() {
        let mut session = streaming_session();
        session.chunk("Hola, ");
        session.chunk("¿en qué puedo ayudarte?");
        assert_eq!(session.partial(), "Hola, ¿en qué puedo ayudarte?");

        let entry = session
            .complete(Some("conv-1".to_owned()), Some("msg-1".to_owned()))
            .unwrap();
        assert_eq!(entry.content, "Hola, ¿en qué puedo ayudarte?");
        assert_eq!(entry.id, "msg-1");

        assert_eq!(session.partial(), "");
        assert_eq!(session.conversation_id(), Some("conv-1"));
        assert!(matches!(session.state(), SessionState::Active(_)));
    }

    #[test]
    fn test_stream_error_keeps_history() {
        let mut session = streaming_session();
        session.chunk("partial answer");
        session.stream_error("upstream unavailable");

        // The user's message survives; the partial assistant text does not
        assert_eq!(session.messages().len(), 1);
        assert_eq!(session.messages()[0].role, EntryRole::User);
        assert_eq!(session.partial(), "");
        assert_eq!(session.error(), Some("upstream unavailable"));
        assert!(matches!(session.state(), SessionState::Active(None)));
    }

    #[test]
    fn test_abort_discards_partial_without_error() {
        let mut session = streaming_session();
        session.chunk("half an ans");
        session.abort_stream();

        assert_eq!(session.partial(), "");
        assert!(session.error().is_none());
        assert_eq!(session.messages().len(), 1);
    }

    #[test]
    fn test_chunks_after_abort_are_dropped() {
        let mut session = streaming_session();
        session.abort_stream();
        session.chunk("late chunk");
        assert_eq!(session.partial(), "");
    }

    #[test]
    fn test_selection_is_idempotent() {
        let mut session = ChatSession::new("n8n");

        assert_eq!(session.select_conversation("conv-1"), SelectOutcome::Started);
        // Double-click while the load is in flight
        assert_eq!(
            session.select_conversation("conv-1"),
            SelectOutcome::AlreadyCurrent
        );

        assert!(session.history_loaded("conv-1", vec![]));
        assert_eq!(
            session.select_conversation("conv-1"),
            SelectOutcome::AlreadyCurrent
        );
    }

    #[test]
    fn test_stale_history_load_is_dropped() {
        let mut session = ChatSession::new("n8n");
        session.select_conversation("conv-1");
        session.select_conversation("conv-2");

        // conv-1's fetch resolves after the user moved on
        assert!(!session.history_loaded(
            "conv-1",
            vec![ChatEntry {
                id: "m1".into(),
                role: EntryRole::User,
                content: "old".into(),
            }]
        ));
        assert!(session.messages().is_empty());
        assert!(session.history_loaded("conv-2", vec![]));
        assert_eq!(session.conversation_id(), Some("conv-2"));
    }

    #[test]
    fn test_selecting_away_mid_stream_aborts() {
        let mut session = streaming_session();
        session.chunk("partial");
        assert_eq!(session.select_conversation("conv-9"), SelectOutcome::Started);
        assert!(matches!(
            session.state(),
            SessionState::LoadingHistory(id) if id == "conv-9"
        ));
        assert_eq!(session.partial(), "");
    }

    #[test]
    fn test_logout_edge_clears_session() {
        let mut session = ChatSession::new("n8n");
        session.auth_changed(true);
        session.submit("hola").unwrap();
        session.complete(Some("conv-1".to_owned()), None);

        session.auth_changed(false);
        assert!(matches!(session.state(), SessionState::NoConversation));
        assert!(session.messages().is_empty());
    }

    #[test]
    fn test_initial_mount_does_not_wipe_guest_chat() {
        let mut session = ChatSession::new("n8n");
        session.submit("hola").unwrap();
        session.complete(None, None);

        // First auth observation is the mount, not a logout edge
        session.auth_changed(false);
        assert_eq!(session.messages().len(), 2);
        assert!(matches!(session.state(), SessionState::Active(None)));
    }

    #[test]
    fn test_model_switch_without_messages_applies_in_place() {
        let mut session = ChatSession::new("n8n");
        assert_eq!(session.request_model_switch("python"), SwitchOutcome::Applied);
        assert_eq!(session.model(), "python");
        assert!(session.pending_model_switch().is_none());
    }

    #[test]
    fn test_model_switch_with_messages_needs_confirmation() {
        let mut session = ChatSession::new("n8n");
        session.submit("hola").unwrap();
        session.complete(Some("conv-1".to_owned()), None);

        assert_eq!(
            session.request_model_switch("python"),
            SwitchOutcome::ConfirmationRequired
        );
        assert_eq!(session.model(), "n8n");
        assert_eq!(session.pending_model_switch(), Some("python"));

        assert!(session.confirm_model_switch());
        assert_eq!(session.model(), "python");
        assert!(matches!(session.state(), SessionState::NoConversation));
        assert!(session.messages().is_empty());
    }

    #[test]
    fn test_model_switch_cancel_keeps_everything() {
        let mut session = ChatSession::new("n8n");
        session.submit("hola").unwrap();
        session.complete(Some("conv-1".to_owned()), None);

        session.request_model_switch("python");
        session.cancel_model_switch();

        assert_eq!(session.model(), "n8n");
        assert!(session.pending_model_switch().is_none());
        assert_eq!(session.messages().len(), 2);
    }

    #[test]
    fn test_switch_to_same_model_is_unchanged() {
        let mut session = ChatSession::new("n8n");
        assert_eq!(session.request_model_switch("n8n"), SwitchOutcome::Unchanged);
    }
}
