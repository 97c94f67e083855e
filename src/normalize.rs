//! Channel payload normalization.
//!
//! Converts channel-native ingest payloads (SMS webhook, chat message,
//! voice transcript segment) into the unified `ConversationEvent`. The
//! admission pipeline never sees raw payloads; this is the only place
//! that knows provider field names.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::event::{ChannelType, ConversationEvent};

// ── Validation ──────────────────────────────────────────────────────

/// A single invalid field.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FieldError {
    pub path: String,
    pub message: String,
}

/// Payload validation failure with per-field details.
#[derive(Debug, Clone, thiserror::Error)]
#[error("Invalid payload: {}", summary(.issues))]
pub struct PayloadError {
    pub issues: Vec<FieldError>,
}

fn summary(issues: &[FieldError]) -> String {
    issues
        .iter()
        .map(|i| format!("{}: {}", i.path, i.message))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Collects field errors while a payload is checked.
#[derive(Default)]
struct Checker {
    issues: Vec<FieldError>,
}

impl Checker {
    fn require(&mut self, path: &str, value: &str) {
        if value.trim().is_empty() {
            self.push(path, "required");
        }
    }

    fn require_opt(&mut self, path: &str, value: &Option<String>) {
        if let Some(v) = value {
            if v.trim().is_empty() {
                self.push(path, "must not be empty when present");
            }
        }
    }

    fn timestamp_opt(&mut self, path: &str, value: &Option<String>) {
        if let Some(v) = value {
            if DateTime::parse_from_rfc3339(v).is_err() {
                self.push(path, "invalid timestamp");
            }
        }
    }

    fn push(&mut self, path: &str, message: &str) {
        self.issues.push(FieldError {
            path: path.to_string(),
            message: message.to_string(),
        });
    }

    fn finish(self) -> Result<(), PayloadError> {
        if self.issues.is_empty() {
            Ok(())
        } else {
            Err(PayloadError {
                issues: self.issues,
            })
        }
    }
}

// ── SMS ─────────────────────────────────────────────────────────────

/// SMS webhook payload, provider field names preserved.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SmsPayload {
    #[serde(default)]
    pub tenant_id: String,
    #[serde(rename = "From", default)]
    pub from: String,
    #[serde(rename = "To", default)]
    pub to: String,
    #[serde(rename = "Body", default)]
    pub body: String,
    #[serde(rename = "MessageSid", default)]
    pub message_sid: String,
    #[serde(rename = "Timestamp", default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl SmsPayload {
    pub fn validate(&self) -> Result<(), PayloadError> {
        let mut check = Checker::default();
        check.require("tenant_id", &self.tenant_id);
        check.require("From", &self.from);
        check.require("To", &self.to);
        check.require("Body", &self.body);
        check.require("MessageSid", &self.message_sid);
        check.timestamp_opt("Timestamp", &self.timestamp);
        check.finish()
    }
}

/// Normalize an SMS payload. The provider message id is the SMS SID.
pub fn normalize_sms(payload: SmsPayload) -> ConversationEvent {
    let raw_metadata = raw(&payload);
    ConversationEvent {
        event_id: Uuid::new_v4(),
        provider_message_id: payload.message_sid,
        tenant_id: payload.tenant_id,
        channel_type: ChannelType::Sms,
        timestamp: payload.timestamp.unwrap_or_else(default_timestamp),
        content: payload.body,
        metadata: serde_json::json!({
            "from": payload.from,
            "to": payload.to,
        }),
        raw_metadata,
    }
}

// ── Chat ────────────────────────────────────────────────────────────

/// Chat message payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatPayload {
    #[serde(default)]
    pub tenant_id: String,
    #[serde(rename = "userId", default)]
    pub user_id: String,
    #[serde(default)]
    pub message: String,
    #[serde(rename = "chatId", default)]
    pub chat_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(rename = "messageId", default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Map<String, serde_json::Value>>,
}

impl ChatPayload {
    pub fn validate(&self) -> Result<(), PayloadError> {
        let mut check = Checker::default();
        check.require("tenant_id", &self.tenant_id);
        check.require("userId", &self.user_id);
        check.require("message", &self.message);
        check.require("chatId", &self.chat_id);
        check.require_opt("messageId", &self.message_id);
        check.timestamp_opt("timestamp", &self.timestamp);
        check.finish()
    }
}

/// Normalize a chat payload.
///
/// Chat providers do not always issue a message id; the fallback key
/// `"{chatId}:{timestamp}:{userId}"` keeps retransmissions of the same
/// logical message deduplicable.
pub fn normalize_chat(payload: ChatPayload) -> ConversationEvent {
    let raw_metadata = raw(&payload);
    let timestamp = payload.timestamp.unwrap_or_else(default_timestamp);
    let provider_message_id = payload.message_id.unwrap_or_else(|| {
        format!("{}:{}:{}", payload.chat_id, timestamp, payload.user_id)
    });

    let mut metadata = serde_json::Map::new();
    metadata.insert("userId".into(), payload.user_id.into());
    metadata.insert("chatId".into(), payload.chat_id.into());
    if let Some(extra) = payload.metadata {
        metadata.extend(extra);
    }

    ConversationEvent {
        event_id: Uuid::new_v4(),
        provider_message_id,
        tenant_id: payload.tenant_id,
        channel_type: ChannelType::Chat,
        timestamp,
        content: payload.message,
        metadata: serde_json::Value::Object(metadata),
        raw_metadata,
    }
}

// ── Voice ───────────────────────────────────────────────────────────

/// Voice transcript payload, one segment per call (or per segment id).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VoicePayload {
    #[serde(default)]
    pub tenant_id: String,
    #[serde(rename = "callId", default)]
    pub call_id: String,
    #[serde(default)]
    pub transcript_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(rename = "segmentId", default, skip_serializing_if = "Option::is_none")]
    pub segment_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Map<String, serde_json::Value>>,
}

impl VoicePayload {
    pub fn validate(&self) -> Result<(), PayloadError> {
        let mut check = Checker::default();
        check.require("tenant_id", &self.tenant_id);
        check.require("callId", &self.call_id);
        check.require("transcript_text", &self.transcript_text);
        match self.confidence {
            None => check.push("confidence", "required"),
            Some(c) if !(0.0..=1.0).contains(&c) => {
                check.push("confidence", "must be between 0 and 1")
            }
            _ => {}
        }
        if let Some(d) = self.duration {
            if d < 0.0 {
                check.push("duration", "must be >= 0");
            }
        }
        check.require_opt("segmentId", &self.segment_id);
        check.timestamp_opt("timestamp", &self.timestamp);
        check.finish()
    }
}

/// Normalize a voice payload. Segmented transcripts key on
/// `"{callId}:{segmentId}"` so each segment admits independently.
pub fn normalize_voice(payload: VoicePayload) -> ConversationEvent {
    let raw_metadata = raw(&payload);
    let provider_message_id = match &payload.segment_id {
        Some(segment_id) => format!("{}:{}", payload.call_id, segment_id),
        None => payload.call_id.clone(),
    };

    let mut metadata = serde_json::Map::new();
    metadata.insert("callId".into(), payload.call_id.into());
    metadata.insert(
        "confidence".into(),
        serde_json::json!(payload.confidence.unwrap_or(0.0)),
    );
    metadata.insert(
        "duration".into(),
        serde_json::json!(payload.duration.unwrap_or(0.0)),
    );
    if let Some(extra) = payload.metadata {
        metadata.extend(extra);
    }

    ConversationEvent {
        event_id: Uuid::new_v4(),
        provider_message_id,
        tenant_id: payload.tenant_id,
        channel_type: ChannelType::Voice,
        timestamp: payload.timestamp.unwrap_or_else(default_timestamp),
        content: payload.transcript_text,
        metadata: serde_json::Value::Object(metadata),
        raw_metadata,
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

fn default_timestamp() -> String {
    Utc::now().to_rfc3339()
}

/// The full payload as received, kept on the event for audit/replay.
fn raw<T: Serialize>(payload: &T) -> serde_json::Value {
    serde_json::to_value(payload).unwrap_or_else(|_| serde_json::json!({}))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sms_payload() -> SmsPayload {
        SmsPayload {
            tenant_id: "tenant-1".into(),
            from: "+10000000001".into(),
            to: "+10000000002".into(),
            body: "hello world".into(),
            message_sid: "SM-001".into(),
            timestamp: Some("2026-02-09T10:00:00+00:00".into()),
        }
    }

    #[test]
    fn sms_maps_provider_fields() {
        let event = normalize_sms(sms_payload());
        assert_eq!(event.provider_message_id, "SM-001");
        assert_eq!(event.tenant_id, "tenant-1");
        assert_eq!(event.channel_type, ChannelType::Sms);
        assert_eq!(event.content, "hello world");
        assert_eq!(event.metadata["from"], "+10000000001");
        assert_eq!(event.metadata["to"], "+10000000002");
        assert_eq!(event.raw_metadata["MessageSid"], "SM-001");
        assert_eq!(event.raw_metadata["Body"], "hello world");
    }

    #[test]
    fn sms_defaults_missing_timestamp() {
        let mut payload = sms_payload();
        payload.timestamp = None;
        let event = normalize_sms(payload);
        assert!(DateTime::parse_from_rfc3339(&event.timestamp).is_ok());
    }

    #[test]
    fn sms_validation_flags_each_missing_field() {
        let err = SmsPayload::default().validate().unwrap_err();
        let paths: Vec<&str> = err.issues.iter().map(|i| i.path.as_str()).collect();
        assert!(paths.contains(&"tenant_id"));
        assert!(paths.contains(&"From"));
        assert!(paths.contains(&"Body"));
        assert!(paths.contains(&"MessageSid"));
    }

    #[test]
    fn chat_uses_message_id_when_present() {
        let event = normalize_chat(ChatPayload {
            tenant_id: "tenant-1".into(),
            user_id: "user-1".into(),
            message: "hi".into(),
            chat_id: "chat-1".into(),
            timestamp: Some("2026-02-09T10:00:00+00:00".into()),
            message_id: Some("chat-msg-1".into()),
            metadata: None,
        });
        assert_eq!(event.provider_message_id, "chat-msg-1");
        assert_eq!(event.metadata["userId"], "user-1");
        assert_eq!(event.metadata["chatId"], "chat-1");
    }

    #[test]
    fn chat_falls_back_to_composite_id() {
        let event = normalize_chat(ChatPayload {
            tenant_id: "tenant-1".into(),
            user_id: "user-1".into(),
            message: "hi".into(),
            chat_id: "chat-1".into(),
            timestamp: Some("2026-02-09T10:00:00+00:00".into()),
            message_id: None,
            metadata: None,
        });
        assert_eq!(
            event.provider_message_id,
            "chat-1:2026-02-09T10:00:00+00:00:user-1"
        );
    }

    #[test]
    fn chat_caller_metadata_wins_on_conflict() {
        let mut extra = serde_json::Map::new();
        extra.insert("userId".into(), "overridden".into());
        extra.insert("locale".into(), "en-US".into());

        let event = normalize_chat(ChatPayload {
            tenant_id: "tenant-1".into(),
            user_id: "user-1".into(),
            message: "hi".into(),
            chat_id: "chat-1".into(),
            timestamp: None,
            message_id: Some("m-1".into()),
            metadata: Some(extra),
        });
        assert_eq!(event.metadata["userId"], "overridden");
        assert_eq!(event.metadata["locale"], "en-US");
    }

    #[test]
    fn voice_keys_on_call_and_segment() {
        let base = VoicePayload {
            tenant_id: "tenant-1".into(),
            call_id: "call-1".into(),
            transcript_text: "so anyway".into(),
            confidence: Some(0.9),
            duration: Some(12.5),
            timestamp: None,
            segment_id: None,
            metadata: None,
        };

        let whole_call = normalize_voice(base.clone());
        assert_eq!(whole_call.provider_message_id, "call-1");
        assert_eq!(whole_call.metadata["duration"], 12.5);

        let segmented = normalize_voice(VoicePayload {
            segment_id: Some("seg-2".into()),
            ..base
        });
        assert_eq!(segmented.provider_message_id, "call-1:seg-2");
    }

    #[test]
    fn voice_duration_defaults_to_zero() {
        let event = normalize_voice(VoicePayload {
            tenant_id: "tenant-1".into(),
            call_id: "call-1".into(),
            transcript_text: "hello".into(),
            confidence: Some(0.5),
            duration: None,
            timestamp: None,
            segment_id: None,
            metadata: None,
        });
        assert_eq!(event.metadata["duration"], 0.0);
    }

    #[test]
    fn voice_validation_rejects_out_of_range() {
        let err = VoicePayload {
            tenant_id: "tenant-voice".into(),
            call_id: "call-1".into(),
            transcript_text: String::new(),
            confidence: Some(2.0),
            duration: Some(-10.0),
            timestamp: None,
            segment_id: None,
            metadata: None,
        }
        .validate()
        .unwrap_err();

        let paths: Vec<&str> = err.issues.iter().map(|i| i.path.as_str()).collect();
        assert!(paths.contains(&"transcript_text"));
        assert!(paths.contains(&"confidence"));
        assert!(paths.contains(&"duration"));
    }

    #[test]
    fn invalid_timestamp_is_rejected() {
        let mut payload = sms_payload();
        payload.timestamp = Some("yesterday".into());
        let err = payload.validate().unwrap_err();
        assert_eq!(err.issues[0].path, "Timestamp");
    }
}
