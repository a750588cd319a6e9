//! Human operator channel using post-and-poll messaging

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use tracing::{debug, info, warn};

use switchboard_core::error::SwitchboardError;
use switchboard_core::transfer::conversation_summary;
use switchboard_core::types::{ChannelKind, ConversationContext, Message, MessageKind};

use crate::channel::{Capability, Channel, unsupported_kind_reply};

const CAPABILITIES: &[Capability] = &[Capability::Text, Capability::HumanEscalation];

/// How many history entries go into the operator briefing.
const SUMMARY_WINDOW: usize = 10;

/// Timing and identity for the operator desk conversation.
#[derive(Debug, Clone)]
pub struct HumanChannelConfig {
    pub operator_id: String,
    /// How long to wait for an operator reply before sending a delay notice.
    pub reply_timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for HumanChannelConfig {
    fn default() -> Self {
        Self {
            operator_id: "default".to_string(),
            reply_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_secs(2),
        }
    }
}

/// A reply fetched from the operator desk.
#[derive(Debug, Clone, PartialEq)]
pub struct OperatorReply {
    pub operator: String,
    pub content: String,
}

/// The operator messaging endpoint: post a message, poll for the reply,
/// probe whether anyone is on shift. Keyed by session and operator id.
#[async_trait]
pub trait OperatorDesk: Send + Sync {
    async fn post(&self, session_id: &str, operator_id: &str, content: &str) -> Result<()>;

    async fn fetch_reply(
        &self,
        session_id: &str,
        operator_id: &str,
    ) -> Result<Option<OperatorReply>>;

    async fn probe(&self) -> bool;
}

/// Asynchronous human-operator channel.
///
/// `process_message` posts to the desk and polls for a reply up to
/// `reply_timeout`; when no operator answers in time the caller gets a delay
/// notice instead of an error.
pub struct HumanChannel {
    desk: Arc<dyn OperatorDesk>,
    config: HumanChannelConfig,
    initialized: AtomicBool,
    active: AtomicBool,
    available: AtomicBool,
}

impl HumanChannel {
    pub fn new(desk: Arc<dyn OperatorDesk>, config: HumanChannelConfig) -> Self {
        Self {
            desk,
            config,
            initialized: AtomicBool::new(false),
            active: AtomicBool::new(true),
            available: AtomicBool::new(false),
        }
    }

    /// Poll the desk until an operator answers or the reply timeout passes.
    /// Transient fetch failures are retried until the deadline.
    async fn poll_for_reply(&self, session_id: &str) -> Option<OperatorReply> {
        let poll = async {
            loop {
                match self
                    .desk
                    .fetch_reply(session_id, &self.config.operator_id)
                    .await
                {
                    Ok(Some(reply)) => return reply,
                    Ok(None) => {}
                    Err(e) => {
                        debug!("Reply poll failed, will retry: {}", e);
                    }
                }
                tokio::time::sleep(self.config.poll_interval).await;
            }
        };

        tokio::time::timeout(self.config.reply_timeout, poll).await.ok()
    }
}

#[async_trait]
impl Channel for HumanChannel {
    async fn initialize(&self) -> Result<(), SwitchboardError> {
        if self.initialized.load(Ordering::SeqCst) {
            debug!("Human channel already initialized");
            return Ok(());
        }

        if !self.desk.probe().await {
            return Err(SwitchboardError::Initialization(
                "no operators reachable at the desk".to_string(),
            ));
        }

        self.available.store(true, Ordering::SeqCst);
        self.initialized.store(true, Ordering::SeqCst);
        info!("Human operator channel initialized");
        Ok(())
    }

    async fn process_message(&self, message: &Message, _context: &ConversationContext) -> Message {
        if message.kind != MessageKind::Text {
            return unsupported_kind_reply(message, ChannelKind::Human);
        }

        if let Err(e) = self
            .desk
            .post(&message.session_id, &self.config.operator_id, &message.content)
            .await
        {
            warn!("Failed to post message to operator desk: {}", e);
            self.available.store(false, Ordering::SeqCst);
            return Message::error_reply(
                message,
                ChannelKind::Human,
                "We could not reach an operator right now. Please try again.",
            );
        }

        match self.poll_for_reply(&message.session_id).await {
            Some(reply) => {
                debug!("Operator {} replied to session {}", reply.operator, message.session_id);
                Message::human_reply(message, ChannelKind::Human, reply.operator, reply.content)
            }
            None => {
                info!(
                    "No operator reply for session {} within {:?}",
                    message.session_id, self.config.reply_timeout
                );
                Message::system(
                    message.session_id.clone(),
                    ChannelKind::Human,
                    "All operators are currently busy. Someone will reply to you shortly.",
                )
            }
        }
    }

    async fn transfer_context(&self, context: &ConversationContext) -> Result<(), SwitchboardError> {
        let summary = conversation_summary(context, SUMMARY_WINDOW);
        self.desk
            .post(&context.session_id, &self.config.operator_id, &summary)
            .await
            .map_err(|e| SwitchboardError::TransferExecution {
                to: ChannelKind::Human,
                reason: e.to_string(),
            })?;

        debug!(
            "Posted handoff briefing for session {} to operator {}",
            context.session_id, self.config.operator_id
        );
        Ok(())
    }

    async fn close(&self) -> Result<(), SwitchboardError> {
        if self.initialized.swap(false, Ordering::SeqCst) {
            info!("Closing human operator channel");
            self.available.store(false, Ordering::SeqCst);
        }
        Ok(())
    }

    fn is_healthy(&self) -> bool {
        self.initialized.load(Ordering::SeqCst) && self.available.load(Ordering::SeqCst)
    }

    fn kind(&self) -> ChannelKind {
        ChannelKind::Human
    }

    fn capabilities(&self) -> &[Capability] {
        CAPABILITIES
    }

    fn priority(&self) -> u8 {
        4
    }

    fn fallback(&self) -> Option<ChannelKind> {
        Some(ChannelKind::Batched)
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

/// HTTP implementation of the operator desk.
pub struct HttpOperatorDesk {
    client: reqwest::Client,
    base_url: String,
    auth_token: String,
}

impl std::fmt::Debug for HttpOperatorDesk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpOperatorDesk")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl HttpOperatorDesk {
    pub fn new(base_url: String, auth_token: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            base_url,
            auth_token,
        }
    }
}

#[async_trait]
impl OperatorDesk for HttpOperatorDesk {
    async fn post(&self, session_id: &str, operator_id: &str, content: &str) -> Result<()> {
        let url = format!("{}/sessions/{}/messages", self.base_url, session_id);
        let body = serde_json::json!({
            "operator_id": operator_id,
            "content": content,
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.auth_token)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(anyhow!("Operator desk HTTP error: {}", response.status()));
        }
        Ok(())
    }

    async fn fetch_reply(
        &self,
        session_id: &str,
        operator_id: &str,
    ) -> Result<Option<OperatorReply>> {
        let url = format!("{}/sessions/{}/reply", self.base_url, session_id);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.auth_token)
            .query(&[("operator_id", operator_id)])
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NO_CONTENT {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(anyhow!("Operator desk HTTP error: {}", response.status()));
        }

        let body: serde_json::Value = response.json().await?;
        let content = body
            .get("content")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow!("Operator reply had no content"))?
            .to_string();
        let operator = body
            .get("operator")
            .and_then(|v| v.as_str())
            .unwrap_or(operator_id)
            .to_string();

        Ok(Some(OperatorReply { operator, content }))
    }

    async fn probe(&self) -> bool {
        let url = format!("{}/availability", self.base_url);
        match self
            .client
            .get(&url)
            .bearer_auth(&self.auth_token)
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!("Operator desk availability probe failed: {}", e);
                false
            }
        }
    }
}
