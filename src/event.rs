//! Core data model: conversation events, queue envelopes, dead letters.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Source channel of a conversation event.
///
/// Wire names are the provider-facing upper-case forms; storage rows use
/// the lower-case label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelType {
    #[serde(rename = "SMS")]
    Sms,
    #[serde(rename = "CHAT")]
    Chat,
    #[serde(rename = "VOICE")]
    Voice,
}

impl ChannelType {
    /// Lower-case label used in storage rows and logs.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Sms => "sms",
            Self::Chat => "chat",
            Self::Voice => "voice",
        }
    }
}

/// A normalized inbound conversation event.
///
/// Built once by channel normalization and immutable afterwards.
/// `provider_message_id` is the external system's own identifier and is
/// the deduplication key for the whole admission pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationEvent {
    pub event_id: Uuid,
    pub provider_message_id: String,
    pub tenant_id: String,
    pub channel_type: ChannelType,
    /// RFC 3339 timestamp supplied by the provider (or stamped at
    /// normalization time when absent).
    pub timestamp: String,
    pub content: String,
    /// Channel-normalized fields (sender, chat id, call id, ...).
    pub metadata: serde_json::Value,
    /// The full original payload as received, for audit and replay.
    pub raw_metadata: serde_json::Value,
}

/// The unit carried on the work queue. Opaque beyond its event field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event: ConversationEvent,
}

/// A terminal-failure record, produced exactly once per envelope that
/// exhausts its retry budget. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DlqEntry {
    /// RFC 3339 timestamp of the final failed attempt.
    pub failed_at: String,
    /// Number of insert attempts made before giving up.
    pub retries: u32,
    /// Message of the last error observed.
    pub error: String,
    pub event: ConversationEvent,
}
