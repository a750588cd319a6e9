//! switchboard-core - data model and decision layer of the switchboard
//!
//! This crate provides:
//! - The shared message/context/transfer data model
//! - The error taxonomy for switch and control operations
//! - The pure keyword-cascade routing engine
//! - The context transfer service with its bounded audit log
//!
//! Channel adapters and the orchestrating manager live in
//! `switchboard-channels`.

pub mod error;
pub mod routing;
pub mod transfer;
pub mod types;

// Re-export main types for convenience
pub use error::SwitchboardError;
pub use routing::{KeywordCategory, RoutingConfig, RoutingDecision, RoutingEngine};
pub use transfer::{ContextTransferService, TransferLogEntry, TransferStats};
pub use types::{
    ChannelKind, ConversationContext, Message, MessageKind, MessageMetadata, MessageSource,
    PreferredChannel, SharedContext, TransferRecord, UserPreferences,
};
