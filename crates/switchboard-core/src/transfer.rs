//! Context transfer validation, preparation, and audit log
//!
//! Validates a conversation context before a channel switch, runs the
//! target-specific preparation step, and records every attempt, success or
//! failure, in a bounded ring buffer for observability. Appending to the
//! context's own `transfer_history` is the channel manager's job, after the
//! full switch has succeeded.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::SwitchboardError;
use crate::types::{ChannelKind, ConversationContext, MessageSource};

const DEFAULT_LOG_CAPACITY: usize = 100;

/// How many history entries feed the realtime digest and human summary.
const DIGEST_WINDOW: usize = 10;

/// One audited transfer attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransferLogEntry {
    pub from: ChannelKind,
    pub to: ChannelKind,
    pub timestamp: DateTime<Utc>,
    /// Approximate serialized size of the context, in bytes.
    pub context_size: usize,
    pub success: bool,
}

/// Cumulative transfer counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransferStats {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Validates and prepares contexts for channel switches.
pub struct ContextTransferService {
    log: Mutex<VecDeque<TransferLogEntry>>,
    capacity: usize,
    total: AtomicUsize,
    succeeded: AtomicUsize,
}

impl Default for ContextTransferService {
    fn default() -> Self {
        Self::new()
    }
}

impl ContextTransferService {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_LOG_CAPACITY)
    }

    /// A service whose audit log retains the last `capacity` entries.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            log: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            total: AtomicUsize::new(0),
            succeeded: AtomicUsize::new(0),
        }
    }

    /// Validate `context` and run the preparation step for `to`.
    ///
    /// The outcome is always recorded in the audit log, win or fail. The
    /// context is never mutated.
    pub async fn transfer_context(
        &self,
        from: ChannelKind,
        to: ChannelKind,
        context: &ConversationContext,
    ) -> Result<(), SwitchboardError> {
        let result = match Self::validate(context) {
            Ok(()) => self.prepare(to, context).await,
            Err(e) => Err(e),
        };

        if let Err(e) = &result {
            warn!(%from, %to, error = %e, "context transfer failed");
        }

        self.record(from, to, context, result.is_ok());
        result
    }

    fn validate(context: &ConversationContext) -> Result<(), SwitchboardError> {
        if context.session_id.trim().is_empty() {
            return Err(SwitchboardError::ContextValidation(
                "session id is empty".to_string(),
            ));
        }
        if context.language.trim().is_empty() {
            return Err(SwitchboardError::ContextValidation(
                "language is empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Target-specific preparation. Builds the continuity payload the new
    /// channel needs; reads the history, never mutates it.
    async fn prepare(
        &self,
        to: ChannelKind,
        context: &ConversationContext,
    ) -> Result<(), SwitchboardError> {
        match to {
            ChannelKind::Human => {
                let summary = conversation_summary(context, DIGEST_WINDOW);
                debug!(
                    to = %to,
                    summary_len = summary.len(),
                    "prepared operator summary"
                );
            }
            ChannelKind::Realtime => {
                let digest = history_digest(context, DIGEST_WINDOW);
                debug!(to = %to, digest_len = digest.len(), "prepared realtime digest");
            }
            ChannelKind::Batched | ChannelKind::Streaming => {
                // stateless backends rebuild their window per request
                debug!(to = %to, "no preparation needed");
            }
        }
        Ok(())
    }

    fn record(&self, from: ChannelKind, to: ChannelKind, context: &ConversationContext, success: bool) {
        let context_size = serde_json::to_vec(context).map(|v| v.len()).unwrap_or(0);
        let entry = TransferLogEntry {
            from,
            to,
            timestamp: Utc::now(),
            context_size,
            success,
        };

        let mut log = self.log.lock().expect("transfer log lock poisoned");
        if log.len() == self.capacity {
            log.pop_front();
        }
        log.push_back(entry);

        self.total.fetch_add(1, Ordering::Relaxed);
        if success {
            self.succeeded.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// The most recent `limit` audit entries, oldest first.
    pub fn recent_transfers(&self, limit: usize) -> Vec<TransferLogEntry> {
        let log = self.log.lock().expect("transfer log lock poisoned");
        let start = log.len().saturating_sub(limit);
        log.iter().skip(start).cloned().collect()
    }

    pub fn log_len(&self) -> usize {
        self.log.lock().expect("transfer log lock poisoned").len()
    }

    pub fn stats(&self) -> TransferStats {
        let total = self.total.load(Ordering::Relaxed);
        let succeeded = self.succeeded.load(Ordering::Relaxed);
        TransferStats {
            total,
            succeeded,
            failed: total - succeeded,
        }
    }

    pub fn clear_log(&self) {
        self.log.lock().expect("transfer log lock poisoned").clear();
        self.total.store(0, Ordering::Relaxed);
        self.succeeded.store(0, Ordering::Relaxed);
    }
}

/// Compact single-string digest of the last `limit` history entries, for
/// carrying continuity into a live session.
pub fn history_digest(context: &ConversationContext, limit: usize) -> String {
    context
        .recent_history(limit)
        .iter()
        .map(|m| {
            let who = match m.metadata.source {
                MessageSource::User => "user",
                MessageSource::Ai => "assistant",
                MessageSource::Human => "operator",
            };
            format!("{who}: {}", m.content)
        })
        .collect::<Vec<_>>()
        .join(" | ")
}

/// Human-readable handoff summary for an operator picking up the session.
pub fn conversation_summary(context: &ConversationContext, limit: usize) -> String {
    let mut summary = format!(
        "Session {} ({}), {} messages so far, currently on the {} channel.\n",
        context.session_id,
        context.language,
        context.history.len(),
        context.active_channel,
    );
    summary.push_str("Recent exchange:\n");
    for message in context.recent_history(limit) {
        let who = match message.metadata.source {
            MessageSource::User => "User",
            MessageSource::Ai => "Assistant",
            MessageSource::Human => "Operator",
        };
        summary.push_str(&format!("  {who}: {}\n", message.content));
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Message;

    fn context_with_history(messages: usize) -> ConversationContext {
        let mut ctx = ConversationContext::new("s1", "en");
        for i in 0..messages {
            ctx.push_message(Message::user_text(
                "s1",
                ChannelKind::Batched,
                format!("message {i}"),
            ));
        }
        ctx
    }

    #[tokio::test]
    async fn test_transfer_succeeds_and_logs() {
        let service = ContextTransferService::new();
        let ctx = context_with_history(3);
        service
            .transfer_context(ChannelKind::Batched, ChannelKind::Human, &ctx)
            .await
            .unwrap();

        let entries = service.recent_transfers(10);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].from, ChannelKind::Batched);
        assert_eq!(entries[0].to, ChannelKind::Human);
        assert!(entries[0].success);
        assert!(entries[0].context_size > 0);
    }

    #[tokio::test]
    async fn test_rejects_empty_session_id() {
        let service = ContextTransferService::new();
        let mut ctx = context_with_history(1);
        ctx.session_id = String::new();

        let result = service
            .transfer_context(ChannelKind::Batched, ChannelKind::Realtime, &ctx)
            .await;
        assert!(matches!(
            result,
            Err(SwitchboardError::ContextValidation(_))
        ));
    }

    #[tokio::test]
    async fn test_rejects_empty_language() {
        let service = ContextTransferService::new();
        let mut ctx = context_with_history(1);
        ctx.language = "  ".to_string();

        let result = service
            .transfer_context(ChannelKind::Batched, ChannelKind::Realtime, &ctx)
            .await;
        assert!(matches!(
            result,
            Err(SwitchboardError::ContextValidation(_))
        ));
    }

    #[tokio::test]
    async fn test_failed_transfer_still_logged() {
        let service = ContextTransferService::new();
        let mut ctx = context_with_history(1);
        ctx.session_id = String::new();

        let _ = service
            .transfer_context(ChannelKind::Batched, ChannelKind::Human, &ctx)
            .await;

        let entries = service.recent_transfers(10);
        assert_eq!(entries.len(), 1);
        assert!(!entries[0].success);
        assert_eq!(service.stats().failed, 1);
    }

    #[tokio::test]
    async fn test_transfer_never_mutates_context() {
        let service = ContextTransferService::new();
        let ctx = context_with_history(5);
        let before = ctx.clone();

        service
            .transfer_context(ChannelKind::Batched, ChannelKind::Human, &ctx)
            .await
            .unwrap();
        assert_eq!(ctx, before);

        // same for the failing path
        let mut bad = ctx.clone();
        bad.language = String::new();
        let bad_before = bad.clone();
        let _ = service
            .transfer_context(ChannelKind::Batched, ChannelKind::Human, &bad)
            .await;
        assert_eq!(bad, bad_before);
    }

    #[tokio::test]
    async fn test_ring_buffer_is_bounded() {
        let service = ContextTransferService::with_capacity(3);
        let ctx = context_with_history(1);
        for _ in 0..5 {
            service
                .transfer_context(ChannelKind::Batched, ChannelKind::Realtime, &ctx)
                .await
                .unwrap();
        }
        assert_eq!(service.log_len(), 3);
        // cumulative stats survive eviction
        assert_eq!(service.stats().total, 5);
        assert_eq!(service.stats().succeeded, 5);
    }

    #[tokio::test]
    async fn test_clear_log() {
        let service = ContextTransferService::new();
        let ctx = context_with_history(1);
        service
            .transfer_context(ChannelKind::Batched, ChannelKind::Realtime, &ctx)
            .await
            .unwrap();
        service.clear_log();
        assert_eq!(service.log_len(), 0);
        assert_eq!(service.stats(), TransferStats::default());
    }

    #[test]
    fn test_history_digest_labels_sources() {
        let mut ctx = ConversationContext::new("s1", "en");
        ctx.push_message(Message::user_text("s1", ChannelKind::Batched, "hi"));
        ctx.push_message(Message::ai_reply(
            &ctx.history[0].clone(),
            ChannelKind::Batched,
            "hello",
        ));
        let digest = history_digest(&ctx, 10);
        assert_eq!(digest, "user: hi | assistant: hello");
    }

    #[test]
    fn test_conversation_summary_shape() {
        let ctx = context_with_history(2);
        let summary = conversation_summary(&ctx, 10);
        assert!(summary.contains("Session s1"));
        assert!(summary.contains("2 messages"));
        assert!(summary.contains("User: message 0"));
        assert!(summary.contains("User: message 1"));
    }
}
