//! Batched text channel over a completion endpoint

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use switchboard_core::error::SwitchboardError;
use switchboard_core::types::{
    ChannelKind, ConversationContext, Message, MessageKind, MessageSource,
};

use crate::channel::{Capability, Channel, unsupported_kind_reply};

const CAPABILITIES: &[Capability] = &[Capability::Text];

/// Tuning for the batched completion requests.
#[derive(Debug, Clone)]
pub struct CompletionConfig {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// How many history entries accompany each request.
    pub history_window: usize,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            temperature: 0.7,
            max_tokens: 1024,
            history_window: 20,
        }
    }
}

/// The completion endpoint the batched channel talks to.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse>;
}

/// HTTP client for an OpenAI-shaped chat completion endpoint.
pub struct HttpCompletionClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl std::fmt::Debug for HttpCompletionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpCompletionClient")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl HttpCompletionClient {
    pub fn new(api_key: String, base_url: String) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            api_key,
            base_url,
        }
    }
}

#[async_trait]
impl CompletionBackend for HttpCompletionClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse> {
        let url = format!("{}/v1/chat/completions", self.base_url);

        debug!(
            "Completion request: model={}, messages={}",
            request.model,
            request.messages.len()
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await
            .context("Failed to send completion request")?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(anyhow!(
                "Completion request failed with status {}: {}",
                status,
                error_text
            ));
        }

        response
            .json()
            .await
            .context("Failed to parse completion response")
    }
}

/// Cost-efficient batched text channel. Stateless: each request rebuilds its
/// window from the conversation history.
pub struct BatchedChannel {
    backend: Arc<dyn CompletionBackend>,
    config: CompletionConfig,
    initialized: AtomicBool,
    active: AtomicBool,
}

impl BatchedChannel {
    pub fn new(backend: Arc<dyn CompletionBackend>, config: CompletionConfig) -> Self {
        Self {
            backend,
            config,
            initialized: AtomicBool::new(false),
            active: AtomicBool::new(true),
        }
    }

    /// Assemble the last `history_window` entries plus the new message into a
    /// single completion request.
    fn build_request(&self, message: &Message, context: &ConversationContext) -> CompletionRequest {
        let mut messages = vec![WireMessage {
            role: "system".to_string(),
            content: format!(
                "You are a helpful assistant. Reply in {}.",
                context.language
            ),
        }];

        for entry in context.recent_history(self.config.history_window) {
            if entry.kind == MessageKind::System {
                continue;
            }
            let role = match entry.metadata.source {
                MessageSource::User => "user",
                MessageSource::Ai | MessageSource::Human => "assistant",
            };
            messages.push(WireMessage {
                role: role.to_string(),
                content: entry.content.clone(),
            });
        }

        messages.push(WireMessage {
            role: "user".to_string(),
            content: message.content.clone(),
        });

        CompletionRequest {
            model: self.config.model.clone(),
            messages,
            tools: None,
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        }
    }
}

#[async_trait]
impl Channel for BatchedChannel {
    async fn initialize(&self) -> Result<(), SwitchboardError> {
        if self.initialized.swap(true, Ordering::SeqCst) {
            debug!("Batched channel already initialized");
        }
        Ok(())
    }

    async fn process_message(&self, message: &Message, context: &ConversationContext) -> Message {
        if message.kind != MessageKind::Text {
            return unsupported_kind_reply(message, ChannelKind::Batched);
        }

        let request = self.build_request(message, context);

        match self.backend.complete(&request).await {
            Ok(response) => match response.completion_text() {
                Some(content) => Message::ai_reply(message, ChannelKind::Batched, content),
                None => {
                    warn!("Completion response had no content");
                    Message::error_reply(
                        message,
                        ChannelKind::Batched,
                        "The assistant did not produce a reply. Please try again.",
                    )
                }
            },
            Err(e) => {
                warn!("Completion request failed: {}", e);
                Message::error_reply(
                    message,
                    ChannelKind::Batched,
                    "The assistant is temporarily unavailable. Please try again.",
                )
            }
        }
    }

    async fn transfer_context(&self, context: &ConversationContext) -> Result<(), SwitchboardError> {
        // stateless: the next request rebuilds its window from the history
        debug!(
            "Batched channel ready to continue session {} ({} history entries)",
            context.session_id,
            context.history.len()
        );
        Ok(())
    }

    async fn close(&self) -> Result<(), SwitchboardError> {
        self.initialized.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_healthy(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    fn kind(&self) -> ChannelKind {
        ChannelKind::Batched
    }

    fn capabilities(&self) -> &[Capability] {
        CAPABILITIES
    }

    fn priority(&self) -> u8 {
        8
    }

    fn fallback(&self) -> Option<ChannelKind> {
        Some(ChannelKind::Streaming)
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

// ── Completion wire types ──

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Value>,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompletionResponse {
    pub choices: Vec<CompletionChoice>,
}

impl CompletionResponse {
    /// The assistant text of the first choice, if any.
    pub fn completion_text(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|c| c.message.content.as_deref())
            .filter(|text| !text.is_empty())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompletionChoice {
    pub message: CompletionChoiceMessage,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompletionChoiceMessage {
    pub content: Option<String>,
    pub tool_calls: Option<Value>,
}
