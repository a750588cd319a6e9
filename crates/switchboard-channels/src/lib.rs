//! Channel adapters and orchestration for the switchboard
//!
//! This crate provides the channel capability contract, the four backend
//! adapters (realtime, batched text, streaming text, human operator), and the
//! channel manager that routes a session across them.

pub mod batched;
pub mod channel;
pub mod human;
pub mod manager;
pub mod realtime;
pub mod streaming;

// Re-export main types
pub use batched::{BatchedChannel, CompletionBackend, CompletionConfig, HttpCompletionClient};
pub use channel::{Capability, Channel};
pub use human::{HttpOperatorDesk, HumanChannel, HumanChannelConfig, OperatorDesk, OperatorReply};
pub use manager::{ChannelManager, ManagerConfig, ManagerState, ManagerStatus};
pub use realtime::{RealtimeChannel, RealtimeTransport, TransportEvent};
pub use streaming::{StreamEvent, StreamSource, StreamingChannel};
