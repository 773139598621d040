// ABOUTME: Typed conversation notification bus for cross-component sync
// ABOUTME: Sidebar and other views subscribe instead of listening to a global channel
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Charla Project

//! Conversation change notifications.
//!
//! Components that render conversation lists register interest here instead
//! of relying on an untyped broadcast channel. Notices are fire-and-forget:
//! emitting with no subscribers is fine.

use tokio::sync::broadcast;

/// Capacity of the notification channel per subscriber
const CHANNEL_CAPACITY: usize = 64;

/// A conversation change another component may care about
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversationNotice {
    /// A conversation came into existence
    Created {
        /// Durable conversation id
        id: String,
        /// Title at creation time
        title: String,
    },
    /// An existing conversation changed
    Updated {
        /// Durable conversation id
        id: String,
        /// New title, when it changed
        title: Option<String>,
        /// Timestamp of the latest message (RFC 3339)
        last_message_at: Option<String>,
    },
}

/// Subscription hub for conversation notices
#[derive(Debug, Clone)]
pub struct ConversationEvents {
    sender: broadcast::Sender<ConversationNotice>,
}

impl Default for ConversationEvents {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationEvents {
    /// Create an empty hub
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Register interest in conversation notices
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ConversationNotice> {
        self.sender.subscribe()
    }

    /// Publish a notice; dropped silently when nobody listens
    pub fn emit(&self, notice: ConversationNotice) {
        let _ = self.sender.send(notice);
    }
}
