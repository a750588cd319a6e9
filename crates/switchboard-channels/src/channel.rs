//! Channel capability contract

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use switchboard_core::error::SwitchboardError;
use switchboard_core::types::{ChannelKind, ConversationContext, Message};

/// What a channel can do with a message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Text,
    Audio,
    Streaming,
    HumanEscalation,
}

/// Contract every backend adapter satisfies.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Bring the channel up. Idempotent: a second call is a no-op. On return
    /// the channel is healthy-and-ready; anything less is a fatal
    /// [`SwitchboardError::Initialization`].
    async fn initialize(&self) -> Result<(), SwitchboardError>;

    /// Turn a message into a response. Never fails: internal failures and
    /// unsupported message kinds come back as system-tagged error messages.
    async fn process_message(&self, message: &Message, context: &ConversationContext) -> Message;

    /// Prepare the channel to continue this conversation. Must not mutate the
    /// context's history.
    async fn transfer_context(&self, context: &ConversationContext)
    -> Result<(), SwitchboardError>;

    /// Release channel-specific resources. Idempotent.
    async fn close(&self) -> Result<(), SwitchboardError>;

    /// Cheap, non-blocking, read-only serviceability probe.
    fn is_healthy(&self) -> bool;

    fn kind(&self) -> ChannelKind;

    fn capabilities(&self) -> &[Capability];

    /// Higher wins during emergency fallback selection.
    fn priority(&self) -> u8;

    /// The channel to try first when this one is unhealthy.
    fn fallback(&self) -> Option<ChannelKind>;

    /// Whether the channel is administratively enabled as a switch target.
    fn is_active(&self) -> bool;
}

/// Error-message convention for a message kind the channel does not support.
pub(crate) fn unsupported_kind_reply(message: &Message, kind: ChannelKind) -> Message {
    Message::error_reply(
        message,
        kind,
        format!(
            "The {kind} channel cannot handle {} messages.",
            message.kind
        ),
    )
}
