//! Channel manager: the stateful orchestrator of the switchboard
//!
//! Owns the channel registry, the transition state machine, the queue for
//! messages that arrive before initialization, and the failover logic.
//! Composes the routing engine and the context transfer service.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::{Mutex, Notify, oneshot};
use tracing::{debug, error, info, warn};

use switchboard_core::error::SwitchboardError;
use switchboard_core::routing::{RoutingDecision, RoutingEngine};
use switchboard_core::transfer::{ContextTransferService, TransferLogEntry, TransferStats};
use switchboard_core::types::{
    ChannelKind, Message, PreferredChannel, SharedContext, TransferRecord,
};

use crate::channel::{Capability, Channel};

/// Lifecycle of the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    Uninitialized,
    Initializing,
    Ready,
    Closed,
}

impl std::fmt::Display for ManagerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "uninitialized"),
            Self::Initializing => write!(f, "initializing"),
            Self::Ready => write!(f, "ready"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Timing knobs for the manager.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// How long a message dispatch waits out an in-flight channel transition
    /// before force-clearing the transition flag.
    pub transition_wait: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            transition_wait: Duration::from_millis(5000),
        }
    }
}

/// Read-only snapshot of the manager for status surfaces.
#[derive(Debug, Clone)]
pub struct ManagerStatus {
    pub state: ManagerState,
    pub transitioning: bool,
    pub queue_depth: usize,
    pub channel_health: HashMap<ChannelKind, bool>,
}

/// A message that arrived before the manager was ready.
struct PendingMessage {
    message: Message,
    context: SharedContext,
    resolver: oneshot::Sender<Message>,
}

/// Routes a session's messages across the registered channels.
///
/// Concurrent `send_message` calls while the manager is stable are NOT
/// serialized against each other: each may consult the router and the two can
/// race to different channel choices. The transitioning flag turns the loser
/// of a switch race away; its message is then processed on whatever channel
/// is active once the winner's transition settles. Callers that need strict
/// ordering must provide it themselves.
pub struct ChannelManager {
    channels: DashMap<ChannelKind, Arc<dyn Channel>>,
    router: RoutingEngine,
    transfers: ContextTransferService,
    config: ManagerConfig,
    state: StdMutex<ManagerState>,
    transitioning: AtomicBool,
    transition_done: Notify,
    queue: Mutex<VecDeque<PendingMessage>>,
}

impl ChannelManager {
    pub fn new(router: RoutingEngine, config: ManagerConfig) -> Self {
        Self {
            channels: DashMap::new(),
            router,
            transfers: ContextTransferService::new(),
            config,
            state: StdMutex::new(ManagerState::Uninitialized),
            transitioning: AtomicBool::new(false),
            transition_done: Notify::new(),
            queue: Mutex::new(VecDeque::new()),
        }
    }

    /// Register and sequentially initialize the given channels.
    ///
    /// Fails fast: if any channel refuses to come up, the registry is cleared
    /// and the manager stays uninitialized. On success the manager becomes
    /// ready and drains any messages queued in the meantime, in FIFO order.
    pub async fn initialize_channels(
        &self,
        channels: Vec<Arc<dyn Channel>>,
    ) -> Result<(), SwitchboardError> {
        {
            let mut state = self.state.lock().expect("state lock poisoned");
            match *state {
                ManagerState::Uninitialized | ManagerState::Closed => {
                    *state = ManagerState::Initializing;
                }
                ManagerState::Initializing => {
                    return Err(SwitchboardError::Initialization(
                        "initialization already in progress".to_string(),
                    ));
                }
                ManagerState::Ready => {
                    return Err(SwitchboardError::Initialization(
                        "channels are already initialized".to_string(),
                    ));
                }
            }
        }

        info!("Initializing {} channels", channels.len());
        self.channels.clear();
        for channel in &channels {
            self.channels.insert(channel.kind(), channel.clone());
        }

        for channel in &channels {
            if let Err(e) = channel.initialize().await {
                error!("Failed to initialize {} channel: {}", channel.kind(), e);
                self.channels.clear();
                *self.state.lock().expect("state lock poisoned") = ManagerState::Uninitialized;
                return Err(SwitchboardError::Initialization(format!(
                    "{} channel: {e}",
                    channel.kind()
                )));
            }
            debug!("Initialized {} channel", channel.kind());
        }

        self.drain_queue().await;
        info!("All channels initialized");
        Ok(())
    }

    /// Flip to ready and work through the pending queue in arrival order.
    async fn drain_queue(&self) {
        let pending: Vec<PendingMessage> = {
            let mut queue = self.queue.lock().await;
            // becoming ready and emptying the queue happen under the same
            // lock, so no message can slip between the two
            *self.state.lock().expect("state lock poisoned") = ManagerState::Ready;
            queue.drain(..).collect()
        };

        if pending.is_empty() {
            return;
        }

        info!("Draining {} queued messages", pending.len());
        for entry in pending {
            let reply = self.dispatch(entry.message, &entry.context).await;
            // the caller may have given up on the pending send
            let _ = entry.resolver.send(reply);
        }
    }

    /// Handle one message. Never fails: every failure mode becomes a
    /// system-tagged error message so per-message traffic degrades gracefully.
    pub async fn send_message(&self, message: Message, context: &SharedContext) -> Message {
        let queue = self.queue.lock().await;
        let state = *self.state.lock().expect("state lock poisoned");
        match state {
            ManagerState::Uninitialized | ManagerState::Initializing => {
                let mut queue = queue;
                debug!("Manager not ready; queueing message {}", message.id);
                let fallback = message.clone();
                let (tx, rx) = oneshot::channel();
                queue.push_back(PendingMessage {
                    message,
                    context: context.clone(),
                    resolver: tx,
                });
                drop(queue);

                match rx.await {
                    Ok(reply) => reply,
                    Err(_) => {
                        let active = context.read().await.active_channel;
                        Message::error_reply(
                            &fallback,
                            active,
                            "Your message could not be processed. Please try again.",
                        )
                    }
                }
            }
            ManagerState::Closed => {
                drop(queue);
                let active = context.read().await.active_channel;
                Message::error_reply(
                    &message,
                    active,
                    "The conversation service has shut down.",
                )
            }
            ManagerState::Ready => {
                drop(queue);
                self.dispatch(message, context).await
            }
        }
    }

    async fn dispatch(&self, message: Message, context: &SharedContext) -> Message {
        self.wait_for_transition().await;

        let (preferred, active) = {
            let ctx = context.read().await;
            (ctx.user_preferences.preferred_channel, ctx.active_channel)
        };

        if preferred == PreferredChannel::Auto {
            let decision = {
                let ctx = context.read().await;
                self.router.determine_route(&message, &ctx)
            };
            if decision.channel != active && self.channels.contains_key(&decision.channel) {
                debug!(
                    "Routing {} -> {} ({})",
                    active, decision.channel, decision.reason
                );
                // per-message traffic degrades gracefully: a failed switch
                // leaves the message on the current channel
                if let Err(e) = self
                    .switch_channel(decision.channel, context, &decision.reason)
                    .await
                {
                    warn!("Auto-routed switch to {} failed: {}", decision.channel, e);
                }
            }
        }

        let active = context.read().await.active_channel;
        let channel = match self.resolve_healthy(active, context).await {
            Ok(channel) => channel,
            Err(e) => {
                error!("Dispatch failed: {}", e);
                return Message::error_reply(
                    &message,
                    active,
                    "No channel is available to handle your message right now.",
                );
            }
        };

        let snapshot = context.read().await.clone();
        channel.process_message(&message, &snapshot).await
    }

    /// The active channel if it is healthy; otherwise the declared fallback,
    /// then any other healthy channel by descending priority. A successful
    /// failover updates the context's active channel and records the move.
    async fn resolve_healthy(
        &self,
        active: ChannelKind,
        context: &SharedContext,
    ) -> Result<Arc<dyn Channel>, SwitchboardError> {
        let channel = self
            .channels
            .get(&active)
            .map(|entry| entry.value().clone())
            .ok_or(SwitchboardError::ChannelUnavailable(active))?;

        if channel.is_healthy() {
            return Ok(channel);
        }
        warn!("Active channel {} is unhealthy; searching for a fallback", active);

        let mut candidates: Vec<ChannelKind> = Vec::new();
        if let Some(declared) = channel.fallback() {
            candidates.push(declared);
        }
        let mut emergency: Vec<(u8, ChannelKind)> = self
            .channels
            .iter()
            .filter(|entry| *entry.key() != active && !candidates.contains(entry.key()))
            .map(|entry| (entry.value().priority(), *entry.key()))
            .collect();
        emergency.sort_by(|a, b| b.0.cmp(&a.0));
        candidates.extend(emergency.into_iter().map(|(_, kind)| kind));

        let mut tried = 0;
        for kind in candidates {
            tried += 1;
            let Some(candidate) = self.channels.get(&kind).map(|entry| entry.value().clone())
            else {
                continue;
            };
            if candidate.is_active() && candidate.is_healthy() {
                info!("Failing over from {} to {}", active, kind);
                let mut ctx = context.write().await;
                ctx.active_channel = kind;
                ctx.transfer_history.push(TransferRecord {
                    from: active,
                    to: kind,
                    timestamp: Utc::now(),
                    reason: "unhealthy_channel_failover".to_string(),
                    context_transferred: false,
                });
                return Ok(candidate);
            }
        }

        Err(SwitchboardError::NoHealthyChannel { active, tried })
    }

    /// Block while a channel transition is in flight, up to the configured
    /// bound. A transition that overstays gets its flag force-cleared so
    /// dispatch can proceed instead of hanging forever.
    async fn wait_for_transition(&self) {
        if !self.transitioning.load(Ordering::SeqCst) {
            return;
        }
        debug!("Waiting out an in-flight channel transition");

        let wait = async {
            loop {
                let notified = self.transition_done.notified();
                if !self.transitioning.load(Ordering::SeqCst) {
                    break;
                }
                notified.await;
            }
        };

        if tokio::time::timeout(self.config.transition_wait, wait)
            .await
            .is_err()
        {
            warn!(
                "Channel transition exceeded {:?}; force-clearing the transition flag",
                self.config.transition_wait
            );
            self.transitioning.store(false, Ordering::SeqCst);
            self.transition_done.notify_waiters();
        }
    }

    /// Move the session to `target`.
    ///
    /// No-op when already there. Mutually exclusive: a switch arriving while
    /// another is in flight is turned away with an error, not queued. On
    /// success the context's active channel is updated and a transfer record
    /// appended; on failure the error is re-raised after the manager has
    /// returned to stable.
    pub async fn switch_channel(
        &self,
        target: ChannelKind,
        context: &SharedContext,
        reason: &str,
    ) -> Result<(), SwitchboardError> {
        let from = context.read().await.active_channel;
        if from == target {
            debug!("Already on {}; nothing to switch", target);
            return Ok(());
        }

        if self.transitioning.swap(true, Ordering::SeqCst) {
            warn!("Rejecting switch to {}: another transition is in flight", target);
            return Err(SwitchboardError::TransitionInProgress(target));
        }

        info!("Switching channel {} -> {} ({})", from, target, reason);
        let result = self.perform_switch(from, target, context, reason).await;

        // back to stable whatever happened above
        self.transitioning.store(false, Ordering::SeqCst);
        self.transition_done.notify_waiters();

        if let Err(e) = &result {
            error!("Channel switch {} -> {} failed: {}", from, target, e);
        }
        result
    }

    async fn perform_switch(
        &self,
        from: ChannelKind,
        target: ChannelKind,
        context: &SharedContext,
        reason: &str,
    ) -> Result<(), SwitchboardError> {
        let channel = self
            .channels
            .get(&target)
            .map(|entry| entry.value().clone())
            .filter(|channel| channel.is_active())
            .ok_or(SwitchboardError::ChannelUnavailable(target))?;

        let snapshot = context.read().await.clone();
        self.transfers.transfer_context(from, target, &snapshot).await?;
        channel.transfer_context(&snapshot).await?;

        let mut ctx = context.write().await;
        ctx.active_channel = target;
        ctx.transfer_history.push(TransferRecord {
            from,
            to: target,
            timestamp: Utc::now(),
            reason: reason.to_string(),
            context_transferred: true,
        });
        Ok(())
    }

    /// Ask the routing engine for a decision without acting on it.
    pub async fn determine_optimal_channel(
        &self,
        message: &Message,
        context: &SharedContext,
    ) -> RoutingDecision {
        let ctx = context.read().await;
        self.router.determine_route(message, &ctx)
    }

    /// Shut the manager down. Idempotent.
    ///
    /// Resolves any still-queued messages with a shutdown notice, closes every
    /// channel (continuing past individual failures), and clears the transfer
    /// log.
    pub async fn cleanup(&self) {
        info!("Cleaning up channel manager");
        self.transitioning.store(false, Ordering::SeqCst);
        self.transition_done.notify_waiters();

        let pending: Vec<PendingMessage> = {
            let mut queue = self.queue.lock().await;
            *self.state.lock().expect("state lock poisoned") = ManagerState::Closed;
            queue.drain(..).collect()
        };
        for entry in pending {
            let active = entry.context.read().await.active_channel;
            let _ = entry.resolver.send(Message::error_reply(
                &entry.message,
                active,
                "The conversation service is shutting down.",
            ));
        }

        let channels: Vec<Arc<dyn Channel>> = self
            .channels
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        for channel in channels {
            if let Err(e) = channel.close().await {
                warn!("Failed to close {} channel: {}", channel.kind(), e);
            }
        }
        self.channels.clear();
        self.transfers.clear_log();
    }

    // ── Read-only status surface ──

    pub fn state(&self) -> ManagerState {
        *self.state.lock().expect("state lock poisoned")
    }

    pub fn is_transitioning(&self) -> bool {
        self.transitioning.load(Ordering::SeqCst)
    }

    pub async fn queue_depth(&self) -> usize {
        self.queue.lock().await.len()
    }

    pub async fn active_channel(&self, context: &SharedContext) -> ChannelKind {
        context.read().await.active_channel
    }

    /// Current health of every registered channel.
    pub fn channel_health(&self) -> HashMap<ChannelKind, bool> {
        self.channels
            .iter()
            .map(|entry| (*entry.key(), entry.value().is_healthy()))
            .collect()
    }

    pub fn capabilities(&self, kind: ChannelKind) -> Option<Vec<Capability>> {
        self.channels
            .get(&kind)
            .map(|entry| entry.value().capabilities().to_vec())
    }

    pub fn transfer_stats(&self) -> TransferStats {
        self.transfers.stats()
    }

    pub fn recent_transfers(&self, limit: usize) -> Vec<TransferLogEntry> {
        self.transfers.recent_transfers(limit)
    }

    pub async fn status(&self) -> ManagerStatus {
        ManagerStatus {
            state: self.state(),
            transitioning: self.is_transitioning(),
            queue_depth: self.queue_depth().await,
            channel_health: self.channel_health(),
        }
    }
}
