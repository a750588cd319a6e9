//! Shared data model for the switchboard

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// What kind of payload a message carries
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Audio,
    System,
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Audio => write!(f, "audio"),
            Self::System => write!(f, "system"),
        }
    }
}

/// Who authored a message
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageSource {
    User,
    Ai,
    Human,
}

/// The communication backends a session can be routed across.
///
/// Channel identity is this closed enum everywhere: registry keys, routing
/// decisions, and transfer records. There is no string-based dispatch.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    /// Low-latency bidirectional voice/realtime channel
    Realtime,
    /// Cost-efficient batched text channel
    Batched,
    /// Incrementally-streamed text channel
    Streaming,
    /// Asynchronous human-operator channel
    Human,
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Realtime => write!(f, "realtime"),
            Self::Batched => write!(f, "batched"),
            Self::Streaming => write!(f, "streaming"),
            Self::Human => write!(f, "human"),
        }
    }
}

/// Routing-relevant facts about a message
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessageMetadata {
    pub source: MessageSource,
    pub channel: ChannelKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

/// A single conversational message. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub id: String,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub kind: MessageKind,
    pub content: String,
    pub metadata: MessageMetadata,
}

impl Message {
    /// A text message authored by the end user.
    pub fn user_text(
        session_id: impl Into<String>,
        channel: ChannelKind,
        content: impl Into<String>,
    ) -> Self {
        Self::new(session_id, channel, MessageKind::Text, MessageSource::User, content)
    }

    /// An audio message authored by the end user.
    pub fn user_audio(
        session_id: impl Into<String>,
        channel: ChannelKind,
        content: impl Into<String>,
    ) -> Self {
        Self::new(session_id, channel, MessageKind::Audio, MessageSource::User, content)
    }

    /// A system-authored message on the given channel.
    pub fn system(
        session_id: impl Into<String>,
        channel: ChannelKind,
        content: impl Into<String>,
    ) -> Self {
        Self::new(session_id, channel, MessageKind::System, MessageSource::Ai, content)
    }

    /// A reply authored by a human operator.
    pub fn human_reply(
        request: &Message,
        channel: ChannelKind,
        operator: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let mut msg = Self::new(
            request.session_id.clone(),
            channel,
            MessageKind::Text,
            MessageSource::Human,
            content,
        );
        msg.metadata.agent_name = Some(operator.into());
        msg
    }

    /// An AI-authored text reply to `request` on the given channel.
    pub fn ai_reply(
        request: &Message,
        channel: ChannelKind,
        content: impl Into<String>,
    ) -> Self {
        Self::new(
            request.session_id.clone(),
            channel,
            MessageKind::Text,
            MessageSource::Ai,
            content,
        )
    }

    /// Immediate acknowledgment for a message whose real reply arrives
    /// out-of-band (realtime and streaming channels).
    pub fn ack_reply(
        request: &Message,
        channel: ChannelKind,
        content: impl Into<String>,
    ) -> Self {
        Self::system(request.session_id.clone(), channel, content)
    }

    /// System-tagged error reply. This is the never-fails convention: paths
    /// that cannot return an error to the caller return one of these instead.
    pub fn error_reply(
        request: &Message,
        channel: ChannelKind,
        content: impl Into<String>,
    ) -> Self {
        Self::system(request.session_id.clone(), channel, content)
    }

    fn new(
        session_id: impl Into<String>,
        channel: ChannelKind,
        kind: MessageKind,
        source: MessageSource,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            timestamp: Utc::now(),
            kind,
            content: content.into(),
            metadata: MessageMetadata {
                source,
                channel,
                agent_name: None,
                language: None,
            },
        }
    }
}

/// Which channel the user wants, if they want a say at all
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PreferredChannel {
    #[default]
    Auto,
    Realtime,
    Normal,
    Human,
}

impl PreferredChannel {
    /// The channel this preference pins the session to, or `None` for auto.
    pub fn as_kind(&self) -> Option<ChannelKind> {
        match self {
            Self::Auto => None,
            Self::Realtime => Some(ChannelKind::Realtime),
            Self::Normal => Some(ChannelKind::Batched),
            Self::Human => Some(ChannelKind::Human),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct UserPreferences {
    pub preferred_channel: PreferredChannel,
    pub voice_enabled: bool,
}

/// One completed channel switch. Immutable once appended.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransferRecord {
    pub from: ChannelKind,
    pub to: ChannelKind,
    pub timestamp: DateTime<Utc>,
    pub reason: String,
    pub context_transferred: bool,
}

/// The shared state of one conversational session.
///
/// Owned by an external session layer and handed into the orchestration layer
/// as a [`SharedContext`]. Only the channel manager mutates it, and only
/// `active_channel` and `transfer_history`; `history` is append-only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationContext {
    pub session_id: String,
    pub history: Vec<Message>,
    pub language: String,
    pub active_channel: ChannelKind,
    pub user_preferences: UserPreferences,
    pub transfer_history: Vec<TransferRecord>,
}

impl ConversationContext {
    pub fn new(session_id: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            history: Vec::new(),
            language: language.into(),
            active_channel: ChannelKind::Batched,
            user_preferences: UserPreferences::default(),
            transfer_history: Vec::new(),
        }
    }

    /// Append a message to the history. There is deliberately no API for
    /// removing or reordering entries.
    pub fn push_message(&mut self, message: Message) {
        self.history.push(message);
    }

    /// The most recent `limit` history entries, oldest first.
    pub fn recent_history(&self, limit: usize) -> &[Message] {
        let start = self.history.len().saturating_sub(limit);
        &self.history[start..]
    }

    pub fn into_shared(self) -> SharedContext {
        Arc::new(RwLock::new(self))
    }
}

/// How a conversation context travels through the orchestration layer.
pub type SharedContext = Arc<RwLock<ConversationContext>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_kind_display() {
        assert_eq!(ChannelKind::Realtime.to_string(), "realtime");
        assert_eq!(ChannelKind::Batched.to_string(), "batched");
        assert_eq!(ChannelKind::Streaming.to_string(), "streaming");
        assert_eq!(ChannelKind::Human.to_string(), "human");
    }

    #[test]
    fn test_channel_kind_serde() {
        let json = serde_json::to_string(&ChannelKind::Human).unwrap();
        assert_eq!(json, "\"human\"");
        let kind: ChannelKind = serde_json::from_str("\"realtime\"").unwrap();
        assert_eq!(kind, ChannelKind::Realtime);
    }

    #[test]
    fn test_preferred_channel_mapping() {
        assert_eq!(PreferredChannel::Auto.as_kind(), None);
        assert_eq!(
            PreferredChannel::Normal.as_kind(),
            Some(ChannelKind::Batched)
        );
        assert_eq!(
            PreferredChannel::Realtime.as_kind(),
            Some(ChannelKind::Realtime)
        );
        assert_eq!(PreferredChannel::Human.as_kind(), Some(ChannelKind::Human));
    }

    #[test]
    fn test_user_text_message() {
        let msg = Message::user_text("s1", ChannelKind::Batched, "hello");
        assert_eq!(msg.kind, MessageKind::Text);
        assert_eq!(msg.metadata.source, MessageSource::User);
        assert_eq!(msg.session_id, "s1");
        assert!(!msg.id.is_empty());
    }

    #[test]
    fn test_error_reply_is_system_tagged() {
        let request = Message::user_text("s1", ChannelKind::Batched, "hi");
        let reply = Message::error_reply(&request, ChannelKind::Batched, "something went wrong");
        assert_eq!(reply.kind, MessageKind::System);
        assert_eq!(reply.session_id, "s1");
        assert_ne!(reply.id, request.id);
    }

    #[test]
    fn test_human_reply_carries_operator() {
        let request = Message::user_text("s1", ChannelKind::Human, "help");
        let reply = Message::human_reply(&request, ChannelKind::Human, "desk-7", "on it");
        assert_eq!(reply.metadata.source, MessageSource::Human);
        assert_eq!(reply.metadata.agent_name.as_deref(), Some("desk-7"));
    }

    #[test]
    fn test_recent_history_window() {
        let mut ctx = ConversationContext::new("s1", "en");
        for i in 0..5 {
            ctx.push_message(Message::user_text(
                "s1",
                ChannelKind::Batched,
                format!("message {i}"),
            ));
        }
        let recent = ctx.recent_history(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].content, "message 3");
        assert_eq!(recent[1].content, "message 4");

        // asking for more than exists returns everything
        assert_eq!(ctx.recent_history(100).len(), 5);
    }

    #[test]
    fn test_context_defaults() {
        let ctx = ConversationContext::new("s1", "en");
        assert_eq!(ctx.active_channel, ChannelKind::Batched);
        assert_eq!(
            ctx.user_preferences.preferred_channel,
            PreferredChannel::Auto
        );
        assert!(!ctx.user_preferences.voice_enabled);
        assert!(ctx.transfer_history.is_empty());
    }
}
