//! # Command validator: the stateless gate in front of every handler.
//!
//! [`CommandValidator`] is a pure function of the envelope plus the locally
//! configured node/organization identity and a freshness window. No I/O, no
//! side effects; the dispatcher calls it before any handler lookup.
//!
//! ## Check order (first failure wins)
//! 1. `command_id` present (non-nil)
//! 2. `command_type` present and ≤ 128 chars
//! 3. node identity match (when configured)
//! 4. organization identity match (when configured) — tenant isolation is
//!    absolute
//! 5. `expires_at` not in the past
//! 6. freshness: `now − issued_at` within `[0, max_command_age]`; too old
//!    bounds the blast radius of a captured-and-replayed command, negative
//!    means a future-dated clock
//! 7. signing policy (see below)
//! 8. payload present and ≤ 256 KiB in encoded bytes
//! 9. signature/correlation-id length caps
//!
//! ## Signing is fail-closed
//! When signing is required, a missing signature is rejected — and a present
//! one is rejected too, with [`ValidationError::SignatureVerificationUnavailable`]:
//! verification logic does not exist yet, and a presence-only check would be
//! a false sense of security. Do not add a bypass here; accepting unsigned
//! commands is strictly worse than refusing signed-required ones.

use chrono::{Duration as ChronoDuration, Utc};
use thiserror::Error;
use uuid::Uuid;

use super::envelope::{CommandEnvelope, MAX_PAYLOAD_BYTES};

/// Maximum `command_type` length in characters.
const MAX_COMMAND_TYPE_CHARS: usize = 128;
/// Maximum `signature` length in characters.
const MAX_SIGNATURE_CHARS: usize = 2048;
/// Maximum `correlation_id` length in characters.
const MAX_CORRELATION_ID_CHARS: usize = 128;

/// A rejected envelope, tagged with a stable code for observability.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("command id is missing")]
    MissingCommandId,

    #[error("command type is missing")]
    MissingCommandType,

    #[error("command type exceeds {MAX_COMMAND_TYPE_CHARS} characters")]
    CommandTypeTooLong,

    /// Defense against misrouted or spoofed commands.
    #[error("command node id {actual} does not match this node {expected}")]
    NodeIdMismatch { expected: Uuid, actual: Uuid },

    /// Tenant isolation: a command scoped to another organization is never
    /// accepted, whatever else is valid.
    #[error("command organization id {actual} does not match this tenant {expected}")]
    OrganizationIdMismatch { expected: Uuid, actual: Uuid },

    #[error("command expired at {expired_at}")]
    CommandExpired {
        expired_at: chrono::DateTime<Utc>,
    },

    #[error("command issued {age_seconds}s ago exceeds the {max_age_seconds}s replay window")]
    CommandTooOld {
        age_seconds: i64,
        max_age_seconds: i64,
    },

    #[error("command issued_at is in the future")]
    FutureTimestamp,

    #[error("signature required but missing")]
    MissingSignature,

    /// Deliberate fail-closed stance: signature verification is not
    /// implemented, so signed-required commands are refused outright.
    #[error("signature verification is not available; command refused")]
    SignatureVerificationUnavailable,

    #[error("payload is missing")]
    MissingPayload,

    #[error("payload of {actual} bytes exceeds {MAX_PAYLOAD_BYTES} bytes")]
    PayloadTooLarge { actual: usize },

    #[error("signature exceeds {MAX_SIGNATURE_CHARS} characters")]
    SignatureTooLong,

    #[error("correlation id exceeds {MAX_CORRELATION_ID_CHARS} characters")]
    CorrelationIdTooLong,
}

impl ValidationError {
    /// Returns the stable code reported to the control plane and in logs.
    pub fn as_code(&self) -> &'static str {
        match self {
            ValidationError::MissingCommandId => "MissingCommandId",
            ValidationError::MissingCommandType => "MissingCommandType",
            ValidationError::CommandTypeTooLong => "CommandTypeTooLong",
            ValidationError::NodeIdMismatch { .. } => "NodeIdMismatch",
            ValidationError::OrganizationIdMismatch { .. } => "OrganizationIdMismatch",
            ValidationError::CommandExpired { .. } => "CommandExpired",
            ValidationError::CommandTooOld { .. } => "CommandTooOld",
            ValidationError::FutureTimestamp => "FutureTimestamp",
            ValidationError::MissingSignature => "MissingSignature",
            ValidationError::SignatureVerificationUnavailable => {
                "SignatureVerificationUnavailable"
            }
            ValidationError::MissingPayload => "MissingPayload",
            ValidationError::PayloadTooLarge { .. } => "PayloadTooLarge",
            ValidationError::SignatureTooLong => "SignatureTooLong",
            ValidationError::CorrelationIdTooLong => "CorrelationIdTooLong",
        }
    }
}

/// Stateless envelope gate.
///
/// Identity is injected at construction rather than read from ambient state,
/// so a validator instance is an explicit statement of "who this agent is".
#[derive(Debug, Clone)]
pub struct CommandValidator {
    node_id: Option<Uuid>,
    organization_id: Option<Uuid>,
    max_command_age: ChronoDuration,
    require_signed: bool,
}

impl CommandValidator {
    /// Creates a validator for the given agent identity.
    ///
    /// `None` for an identity disables that check (useful before enrollment
    /// completes); a configured identity is matched exactly.
    pub fn new(
        node_id: Option<Uuid>,
        organization_id: Option<Uuid>,
        max_command_age: std::time::Duration,
    ) -> Self {
        Self {
            node_id,
            organization_id,
            max_command_age: ChronoDuration::from_std(max_command_age)
                .unwrap_or(ChronoDuration::MAX),
            require_signed: false,
        }
    }

    /// Requires envelopes to be signed. Currently fail-closed: see the
    /// module docs before touching this.
    pub fn with_signing_required(mut self, required: bool) -> Self {
        self.require_signed = required;
        self
    }

    /// Validates one envelope. First failure wins; no side effects.
    pub fn validate(&self, envelope: &CommandEnvelope) -> Result<(), ValidationError> {
        if envelope.command_id.is_nil() {
            return Err(ValidationError::MissingCommandId);
        }

        if envelope.command_type.is_empty() {
            return Err(ValidationError::MissingCommandType);
        }
        if envelope.command_type.chars().count() > MAX_COMMAND_TYPE_CHARS {
            return Err(ValidationError::CommandTypeTooLong);
        }

        if let Some(expected) = self.node_id {
            if envelope.node_id != expected {
                return Err(ValidationError::NodeIdMismatch {
                    expected,
                    actual: envelope.node_id,
                });
            }
        }

        if let Some(expected) = self.organization_id {
            if envelope.organization_id != expected {
                return Err(ValidationError::OrganizationIdMismatch {
                    expected,
                    actual: envelope.organization_id,
                });
            }
        }

        let now = Utc::now();

        if let Some(expires_at) = envelope.expires_at {
            if expires_at < now {
                return Err(ValidationError::CommandExpired {
                    expired_at: expires_at,
                });
            }
        }

        let age = now.signed_duration_since(envelope.issued_at);
        if age < ChronoDuration::zero() {
            return Err(ValidationError::FutureTimestamp);
        }
        if age > self.max_command_age {
            return Err(ValidationError::CommandTooOld {
                age_seconds: age.num_seconds(),
                max_age_seconds: self.max_command_age.num_seconds(),
            });
        }

        if self.require_signed {
            if envelope.signature.is_none() {
                return Err(ValidationError::MissingSignature);
            }
            // Fail closed until real verification exists.
            return Err(ValidationError::SignatureVerificationUnavailable);
        }

        if envelope.payload.is_empty() {
            return Err(ValidationError::MissingPayload);
        }
        // String::len is the encoded byte count, which is exactly the limit
        // we want: multi-byte characters must not bypass it.
        if envelope.payload.len() > MAX_PAYLOAD_BYTES {
            return Err(ValidationError::PayloadTooLarge {
                actual: envelope.payload.len(),
            });
        }

        if let Some(sig) = &envelope.signature {
            if sig.chars().count() > MAX_SIGNATURE_CHARS {
                return Err(ValidationError::SignatureTooLong);
            }
        }
        if let Some(corr) = &envelope.correlation_id {
            if corr.chars().count() > MAX_CORRELATION_ID_CHARS {
                return Err(ValidationError::CorrelationIdTooLong);
            }
        }

        Ok(())
    }
}
