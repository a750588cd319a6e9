//! Realtime channel adapter driving an externally supplied live transport

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use switchboard_core::error::SwitchboardError;
use switchboard_core::transfer::history_digest;
use switchboard_core::types::{ChannelKind, ConversationContext, Message, MessageKind};

use crate::channel::{Capability, Channel, unsupported_kind_reply};

/// How many history entries ride along in a session update.
const SESSION_DIGEST_WINDOW: usize = 10;

const CAPABILITIES: &[Capability] = &[Capability::Text, Capability::Audio, Capability::Streaming];

/// Events the realtime channel submits to its transport.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransportEvent {
    /// A user message for the live session. The reply arrives out-of-band
    /// through the transport's own event stream, not through this call.
    UserMessage {
        session_id: String,
        kind: String,
        content: String,
    },
    /// Updated session instructions carrying conversation continuity after
    /// a channel switch.
    SessionUpdate {
        session_id: String,
        instructions: String,
    },
}

/// The live voice/realtime stack this adapter drives. The transport internals
/// (WebRTC, audio codecs) are out of scope; the switchboard needs an
/// event-send primitive and a connectivity probe.
#[async_trait]
pub trait RealtimeTransport: Send + Sync {
    async fn send_event(&self, event: TransportEvent) -> Result<()>;

    fn is_connected(&self) -> bool;
}

/// Low-latency bidirectional voice/realtime channel.
///
/// Unhealthy until a connected transport has been attached and
/// `initialize` has run. Replies to processed messages arrive via the
/// transport's event stream; `process_message` returns an immediate
/// acknowledgment.
pub struct RealtimeChannel {
    transport: RwLock<Option<Arc<dyn RealtimeTransport>>>,
    initialized: AtomicBool,
    active: AtomicBool,
}

impl Default for RealtimeChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl RealtimeChannel {
    pub fn new() -> Self {
        Self {
            transport: RwLock::new(None),
            initialized: AtomicBool::new(false),
            active: AtomicBool::new(true),
        }
    }

    /// Attach the live transport. May happen before or after construction of
    /// the rest of the switchboard; the channel reports unhealthy until then.
    pub fn attach_transport(&self, transport: Arc<dyn RealtimeTransport>) {
        info!("Attaching realtime transport");
        let mut slot = self.transport.write().expect("transport lock poisoned");
        *slot = Some(transport);
    }

    fn current_transport(&self) -> Option<Arc<dyn RealtimeTransport>> {
        self.transport
            .read()
            .expect("transport lock poisoned")
            .clone()
    }
}

#[async_trait]
impl Channel for RealtimeChannel {
    async fn initialize(&self) -> Result<(), SwitchboardError> {
        if self.initialized.load(Ordering::SeqCst) {
            debug!("Realtime channel already initialized");
            return Ok(());
        }

        match self.current_transport() {
            Some(transport) if transport.is_connected() => {
                self.initialized.store(true, Ordering::SeqCst);
                info!("Realtime channel initialized");
                Ok(())
            }
            Some(_) => Err(SwitchboardError::Initialization(
                "realtime transport is not connected".to_string(),
            )),
            None => Err(SwitchboardError::Initialization(
                "no realtime transport attached".to_string(),
            )),
        }
    }

    async fn process_message(&self, message: &Message, _context: &ConversationContext) -> Message {
        if !matches!(message.kind, MessageKind::Text | MessageKind::Audio) {
            return unsupported_kind_reply(message, ChannelKind::Realtime);
        }

        let Some(transport) = self.current_transport() else {
            warn!("Realtime channel has no transport attached");
            return Message::error_reply(
                message,
                ChannelKind::Realtime,
                "The realtime channel is not connected right now.",
            );
        };

        let event = TransportEvent::UserMessage {
            session_id: message.session_id.clone(),
            kind: message.kind.to_string(),
            content: message.content.clone(),
        };

        match transport.send_event(event).await {
            Ok(()) => {
                debug!("Submitted {} message to realtime transport", message.kind);
                Message::ack_reply(
                    message,
                    ChannelKind::Realtime,
                    "Message received; the reply will arrive over the live session.",
                )
            }
            Err(e) => {
                warn!("Realtime transport rejected message: {}", e);
                Message::error_reply(
                    message,
                    ChannelKind::Realtime,
                    "The realtime channel could not deliver your message.",
                )
            }
        }
    }

    async fn transfer_context(&self, context: &ConversationContext) -> Result<(), SwitchboardError> {
        let transport =
            self.current_transport()
                .ok_or_else(|| SwitchboardError::TransferExecution {
                    to: ChannelKind::Realtime,
                    reason: "no realtime transport attached".to_string(),
                })?;

        let digest = history_digest(context, SESSION_DIGEST_WINDOW);
        let event = TransportEvent::SessionUpdate {
            session_id: context.session_id.clone(),
            instructions: format!(
                "Continue this conversation in {}. Prior exchange: {}",
                context.language, digest
            ),
        };

        transport
            .send_event(event)
            .await
            .map_err(|e| SwitchboardError::TransferExecution {
                to: ChannelKind::Realtime,
                reason: e.to_string(),
            })?;

        debug!("Sent session update to realtime transport");
        Ok(())
    }

    async fn close(&self) -> Result<(), SwitchboardError> {
        if self.initialized.swap(false, Ordering::SeqCst) {
            info!("Closing realtime channel");
            let mut slot = self.transport.write().expect("transport lock poisoned");
            *slot = None;
        }
        Ok(())
    }

    fn is_healthy(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
            && self
                .current_transport()
                .map(|t| t.is_connected())
                .unwrap_or(false)
    }

    fn kind(&self) -> ChannelKind {
        ChannelKind::Realtime
    }

    fn capabilities(&self) -> &[Capability] {
        CAPABILITIES
    }

    fn priority(&self) -> u8 {
        6
    }

    fn fallback(&self) -> Option<ChannelKind> {
        Some(ChannelKind::Batched)
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Transport that records every event it is handed.
    struct MockTransport {
        connected: AtomicBool,
        events: Mutex<Vec<TransportEvent>>,
        fail_sends: AtomicBool,
    }

    impl MockTransport {
        fn connected() -> Arc<Self> {
            Arc::new(Self {
                connected: AtomicBool::new(true),
                events: Mutex::new(Vec::new()),
                fail_sends: AtomicBool::new(false),
            })
        }
    }

    #[async_trait]
    impl RealtimeTransport for MockTransport {
        async fn send_event(&self, event: TransportEvent) -> Result<()> {
            if self.fail_sends.load(Ordering::SeqCst) {
                anyhow::bail!("transport gone");
            }
            self.events.lock().unwrap().push(event);
            Ok(())
        }

        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }
    }

    #[tokio::test]
    async fn test_initialize_requires_transport() {
        let channel = RealtimeChannel::new();
        let result = channel.initialize().await;
        assert!(matches!(result, Err(SwitchboardError::Initialization(_))));
        assert!(!channel.is_healthy());
    }

    #[tokio::test]
    async fn test_initialize_requires_connected_transport() {
        let channel = RealtimeChannel::new();
        let transport = MockTransport::connected();
        transport.connected.store(false, Ordering::SeqCst);
        channel.attach_transport(transport);

        let result = channel.initialize().await;
        assert!(matches!(result, Err(SwitchboardError::Initialization(_))));
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let channel = RealtimeChannel::new();
        channel.attach_transport(MockTransport::connected());
        channel.initialize().await.unwrap();
        channel.initialize().await.unwrap();
        assert!(channel.is_healthy());
    }

    #[tokio::test]
    async fn test_audio_message_returns_ack() {
        let channel = RealtimeChannel::new();
        let transport = MockTransport::connected();
        channel.attach_transport(transport.clone());
        channel.initialize().await.unwrap();

        let msg = Message::user_audio("s1", ChannelKind::Realtime, "audio-frame-ref");
        let ctx = ConversationContext::new("s1", "en");
        let reply = channel.process_message(&msg, &ctx).await;

        assert_eq!(reply.kind, MessageKind::System);
        assert!(reply.content.contains("live session"));

        let events = transport.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            TransportEvent::UserMessage { kind, .. } if kind == "audio"
        ));
    }

    #[tokio::test]
    async fn test_send_failure_becomes_error_reply() {
        let channel = RealtimeChannel::new();
        let transport = MockTransport::connected();
        transport.fail_sends.store(true, Ordering::SeqCst);
        channel.attach_transport(transport);
        channel.initialize().await.unwrap();

        let msg = Message::user_text("s1", ChannelKind::Realtime, "hi");
        let ctx = ConversationContext::new("s1", "en");
        let reply = channel.process_message(&msg, &ctx).await;
        assert_eq!(reply.kind, MessageKind::System);
        assert!(reply.content.contains("could not deliver"));
    }

    #[tokio::test]
    async fn test_transfer_sends_session_update() {
        let channel = RealtimeChannel::new();
        let transport = MockTransport::connected();
        channel.attach_transport(transport.clone());
        channel.initialize().await.unwrap();

        let mut ctx = ConversationContext::new("s1", "en");
        ctx.push_message(Message::user_text("s1", ChannelKind::Batched, "hello"));
        channel.transfer_context(&ctx).await.unwrap();

        let events = transport.events.lock().unwrap();
        assert!(matches!(
            &events[0],
            TransportEvent::SessionUpdate { instructions, .. }
                if instructions.contains("user: hello")
        ));
    }

    #[tokio::test]
    async fn test_close_detaches_transport() {
        let channel = RealtimeChannel::new();
        channel.attach_transport(MockTransport::connected());
        channel.initialize().await.unwrap();

        channel.close().await.unwrap();
        channel.close().await.unwrap();
        assert!(!channel.is_healthy());
    }

    #[test]
    fn test_transport_event_serde() {
        let event = TransportEvent::SessionUpdate {
            session_id: "s1".to_string(),
            instructions: "continue".to_string(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"session_update\""));
    }
}
