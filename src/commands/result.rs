//! # Command result: the outcome reported back to the control plane.
//!
//! Every dispatched envelope resolves into exactly one [`CommandResult`] —
//! rejected, failed, and cancelled commands included. The only failure mode
//! not representable here is transport silence, which belongs to the layer
//! above this crate.
//!
//! ## Invariant
//! `completed_at >= started_at`, always. Constructors clamp rather than trust
//! the wall clock; an NTP step must not produce a negative duration in the
//! control plane's books.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::envelope::CommandEnvelope;

/// Terminal status of a dispatched command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandStatus {
    /// Handler completed successfully.
    Succeeded,
    /// Handler (or the operation it drove) failed after acceptance.
    Failed,
    /// Validation or routing refused the command; no handler ran.
    Rejected,
    /// A deadline-bounded operation hit its deadline (the operation itself
    /// was still completed, e.g. via forced kill).
    TimedOut,
    /// Cooperative cancellation was observed.
    Cancelled,
}

/// Outcome of one command, echoing enough of the envelope for correlation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResult {
    pub command_id: Uuid,
    pub node_id: Uuid,
    pub status: CommandStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    /// Serialized output; only present on `Succeeded`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_payload: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl CommandResult {
    fn base(envelope: &CommandEnvelope, status: CommandStatus, started_at: DateTime<Utc>) -> Self {
        Self {
            command_id: envelope.command_id,
            node_id: envelope.node_id,
            status,
            started_at,
            completed_at: Utc::now().max(started_at),
            result_payload: None,
            error_message: None,
            error_code: None,
            correlation_id: envelope.correlation_id.clone(),
        }
    }

    /// Successful outcome with an optional serialized payload.
    pub fn succeeded(
        envelope: &CommandEnvelope,
        started_at: DateTime<Utc>,
        result_payload: Option<String>,
    ) -> Self {
        let mut r = Self::base(envelope, CommandStatus::Succeeded, started_at);
        r.result_payload = result_payload;
        r
    }

    /// Handler or process-operation failure after acceptance.
    pub fn failed(
        envelope: &CommandEnvelope,
        started_at: DateTime<Utc>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        let mut r = Self::base(envelope, CommandStatus::Failed, started_at);
        r.error_code = Some(code.into());
        r.error_message = Some(message.into());
        r
    }

    /// Validation/policy refusal; the handler never ran.
    pub fn rejected(
        envelope: &CommandEnvelope,
        started_at: DateTime<Utc>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        let mut r = Self::base(envelope, CommandStatus::Rejected, started_at);
        r.error_code = Some(code.into());
        r.error_message = Some(message.into());
        r
    }

    /// Deadline-bounded operation completed only after its deadline forced
    /// the hard path.
    pub fn timed_out(
        envelope: &CommandEnvelope,
        started_at: DateTime<Utc>,
        message: impl Into<String>,
    ) -> Self {
        let mut r = Self::base(envelope, CommandStatus::TimedOut, started_at);
        r.error_message = Some(message.into());
        r
    }

    /// Cooperative cancellation observed before or during execution.
    pub fn cancelled(envelope: &CommandEnvelope, started_at: DateTime<Utc>) -> Self {
        Self::base(envelope, CommandStatus::Cancelled, started_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use uuid::Uuid;

    fn envelope() -> CommandEnvelope {
        CommandEnvelope::new("demo", Uuid::new_v4(), Uuid::new_v4(), "{}")
            .with_correlation_id("corr-1")
    }

    #[test]
    fn test_completed_at_clamped_to_started_at() {
        let env = envelope();
        // A started_at in the future simulates a backwards clock step between
        // dispatch start and completion.
        let future = Utc::now() + Duration::seconds(120);
        let r = CommandResult::succeeded(&env, future, None);
        assert_eq!(r.completed_at, future);
        assert!(r.completed_at >= r.started_at);
    }

    #[test]
    fn test_succeeded_carries_payload_only() {
        let env = envelope();
        let r = CommandResult::succeeded(&env, Utc::now(), Some("{\"ok\":true}".into()));
        assert_eq!(r.status, CommandStatus::Succeeded);
        assert!(r.result_payload.is_some());
        assert!(r.error_code.is_none());
        assert_eq!(r.correlation_id.as_deref(), Some("corr-1"));
    }

    #[test]
    fn test_rejected_carries_code_and_message() {
        let env = envelope();
        let r = CommandResult::rejected(&env, Utc::now(), "PayloadTooLarge", "too big");
        assert_eq!(r.status, CommandStatus::Rejected);
        assert_eq!(r.error_code.as_deref(), Some("PayloadTooLarge"));
        assert!(r.result_payload.is_none());
        assert_eq!(r.command_id, env.command_id);
        assert_eq!(r.node_id, env.node_id);
    }
}
