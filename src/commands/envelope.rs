//! # Command envelope: the immutable instruction received from the control plane.
//!
//! A [`CommandEnvelope`] arrives fully deserialized from the transport layer
//! (mTLS/HTTP is not this crate's concern) and is treated as an immutable
//! value from that point on. The envelope carries everything the validator
//! needs to decide replay/tenancy/expiry questions without I/O.
//!
//! Field limits enforced by the validator:
//! - `command_type` ≤ 128 characters
//! - `payload` ≤ [`MAX_PAYLOAD_BYTES`] measured in **encoded bytes**, so
//!   multi-byte encodings cannot smuggle oversized payloads past a
//!   character-count check
//! - `signature` ≤ 2048 characters, `correlation_id` ≤ 128 characters

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum accepted payload size in encoded bytes (256 KiB).
pub const MAX_PAYLOAD_BYTES: usize = 256 * 1024;

/// Scheduling hint attached by the control plane.
///
/// Priority informs queue ordering upstream of the dispatcher; the dispatcher
/// itself executes whatever it is handed and does not reorder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CommandPriority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

/// An instruction issued by the control plane to this node agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandEnvelope {
    /// Primary dedup/audit key.
    pub command_id: Uuid,
    /// Routing key into the dispatcher registry.
    pub command_type: String,
    /// The node this command is addressed to.
    pub node_id: Uuid,
    /// The tenant this command is scoped to.
    pub organization_id: Uuid,
    /// Issuing user; `None` means system-initiated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initiated_by_user_id: Option<Uuid>,
    /// When the control plane issued the command.
    pub issued_at: DateTime<Utc>,
    /// Optional hard expiry; past-due envelopes are rejected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    /// Serialized command payload (JSON for the built-in handlers).
    pub payload: String,
    /// Optional signature (verification is currently fail-closed).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    /// Scheduling hint.
    #[serde(default)]
    pub priority: CommandPriority,
    /// Propagated for tracing across the control plane and agent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl CommandEnvelope {
    /// Creates an envelope issued now, with defaults for the optional fields.
    pub fn new(
        command_type: impl Into<String>,
        node_id: Uuid,
        organization_id: Uuid,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            command_id: Uuid::new_v4(),
            command_type: command_type.into(),
            node_id,
            organization_id,
            initiated_by_user_id: None,
            issued_at: Utc::now(),
            expires_at: None,
            payload: payload.into(),
            signature: None,
            priority: CommandPriority::Normal,
            correlation_id: None,
        }
    }

    /// Sets the issue timestamp.
    #[inline]
    pub fn with_issued_at(mut self, at: DateTime<Utc>) -> Self {
        self.issued_at = at;
        self
    }

    /// Sets the expiry timestamp.
    #[inline]
    pub fn with_expires_at(mut self, at: DateTime<Utc>) -> Self {
        self.expires_at = Some(at);
        self
    }

    /// Attaches a signature.
    #[inline]
    pub fn with_signature(mut self, signature: impl Into<String>) -> Self {
        self.signature = Some(signature.into());
        self
    }

    /// Attaches a correlation id.
    #[inline]
    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Sets the priority hint.
    #[inline]
    pub fn with_priority(mut self, priority: CommandPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the initiating user.
    #[inline]
    pub fn with_initiated_by(mut self, user_id: Uuid) -> Self {
        self.initiated_by_user_id = Some(user_id);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_fills_defaults() {
        let node = Uuid::new_v4();
        let org = Uuid::new_v4();
        let env = CommandEnvelope::new("process.start", node, org, "{}");
        assert!(!env.command_id.is_nil());
        assert_eq!(env.node_id, node);
        assert_eq!(env.organization_id, org);
        assert_eq!(env.priority, CommandPriority::Normal);
        assert!(env.signature.is_none());
        assert!(env.correlation_id.is_none());
    }

    #[test]
    fn test_priority_ordering() {
        assert!(CommandPriority::Low < CommandPriority::Normal);
        assert!(CommandPriority::Normal < CommandPriority::High);
        assert!(CommandPriority::High < CommandPriority::Critical);
    }

    #[test]
    fn test_serde_round_trip() {
        let env = CommandEnvelope::new(
            "process.stop",
            Uuid::new_v4(),
            Uuid::new_v4(),
            r#"{"processId":"x"}"#,
        )
        .with_correlation_id("trace-42")
        .with_priority(CommandPriority::High);

        let json = serde_json::to_string(&env).unwrap();
        assert!(json.contains("commandId"), "camelCase wire names: {json}");
        let parsed: CommandEnvelope = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.command_id, env.command_id);
        assert_eq!(parsed.correlation_id.as_deref(), Some("trace-42"));
        assert_eq!(parsed.priority, CommandPriority::High);
    }

    #[test]
    fn test_missing_optionals_deserialize() {
        let json = format!(
            r#"{{"commandId":"{}","commandType":"t","nodeId":"{}","organizationId":"{}","issuedAt":"2026-08-29T10:00:00Z","payload":"{{}}"}}"#,
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4()
        );
        let parsed: CommandEnvelope = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.priority, CommandPriority::Normal);
        assert!(parsed.expires_at.is_none());
    }
}
