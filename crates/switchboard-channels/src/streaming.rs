//! Streaming text channel forwarding incremental events to a caller sink

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use switchboard_core::error::SwitchboardError;
use switchboard_core::types::{ChannelKind, ConversationContext, Message, MessageKind};

use crate::channel::{Capability, Channel, unsupported_kind_reply};

const CAPABILITIES: &[Capability] = &[Capability::Text, Capability::Streaming];

/// Named events a streaming response is delivered as.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StreamEvent {
    ResponseStart { id: String },
    Delta { content: String },
    ResponseDone { content: String },
    AgentTransfer { agent: String },
    Debug { message: String },
    Error { message: String },
}

/// The streaming endpoint this adapter reads from. Each call opens one
/// incremental event stream for one message.
#[async_trait]
pub trait StreamSource: Send + Sync {
    async fn open_stream(
        &self,
        message: &Message,
        history: &[Message],
    ) -> Result<mpsc::Receiver<StreamEvent>>;
}

/// Incrementally-streamed text channel.
///
/// `process_message` returns an immediate acknowledgment while the stream's
/// delta/response-done/agent-transfer events are forwarded to the
/// caller-supplied sink from a spawned task. Wiring the sink's far end is the
/// caller's concern.
pub struct StreamingChannel {
    source: Arc<dyn StreamSource>,
    sink: RwLock<Option<mpsc::Sender<StreamEvent>>>,
    /// How many history entries accompany each stream request.
    history_window: usize,
    initialized: AtomicBool,
    active: AtomicBool,
}

impl StreamingChannel {
    pub fn new(source: Arc<dyn StreamSource>) -> Self {
        Self {
            source,
            sink: RwLock::new(None),
            history_window: 20,
            initialized: AtomicBool::new(false),
            active: AtomicBool::new(true),
        }
    }

    /// Attach the sink that receives this channel's stream events.
    pub fn set_sink(&self, sink: mpsc::Sender<StreamEvent>) {
        let mut slot = self.sink.write().expect("sink lock poisoned");
        *slot = Some(sink);
    }

    fn current_sink(&self) -> Option<mpsc::Sender<StreamEvent>> {
        self.sink.read().expect("sink lock poisoned").clone()
    }
}

#[async_trait]
impl Channel for StreamingChannel {
    async fn initialize(&self) -> Result<(), SwitchboardError> {
        if self.initialized.swap(true, Ordering::SeqCst) {
            debug!("Streaming channel already initialized");
        } else {
            info!("Streaming channel initialized");
        }
        Ok(())
    }

    async fn process_message(&self, message: &Message, context: &ConversationContext) -> Message {
        if message.kind != MessageKind::Text {
            return unsupported_kind_reply(message, ChannelKind::Streaming);
        }

        let Some(sink) = self.current_sink() else {
            warn!("Streaming channel has no event sink attached");
            return Message::error_reply(
                message,
                ChannelKind::Streaming,
                "The streaming channel has nowhere to deliver events right now.",
            );
        };

        let history = context.recent_history(self.history_window).to_vec();
        let mut stream = match self.source.open_stream(message, &history).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Failed to open response stream: {}", e);
                return Message::error_reply(
                    message,
                    ChannelKind::Streaming,
                    "The streaming channel could not start a response.",
                );
            }
        };

        let message_id = message.id.clone();
        tokio::spawn(async move {
            while let Some(event) = stream.recv().await {
                if sink.send(event).await.is_err() {
                    debug!("Stream sink dropped; abandoning stream for {}", message_id);
                    break;
                }
            }
        });

        Message::ack_reply(
            message,
            ChannelKind::Streaming,
            "Response streaming has started.",
        )
    }

    async fn transfer_context(&self, context: &ConversationContext) -> Result<(), SwitchboardError> {
        // stateless: each stream request rebuilds its window from the history
        debug!(
            "Streaming channel ready to continue session {}",
            context.session_id
        );
        Ok(())
    }

    async fn close(&self) -> Result<(), SwitchboardError> {
        if self.initialized.swap(false, Ordering::SeqCst) {
            info!("Closing streaming channel");
            let mut slot = self.sink.write().expect("sink lock poisoned");
            *slot = None;
        }
        Ok(())
    }

    fn is_healthy(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    fn kind(&self) -> ChannelKind {
        ChannelKind::Streaming
    }

    fn capabilities(&self) -> &[Capability] {
        CAPABILITIES
    }

    fn priority(&self) -> u8 {
        7
    }

    fn fallback(&self) -> Option<ChannelKind> {
        Some(ChannelKind::Batched)
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}
