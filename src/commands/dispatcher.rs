//! # Command dispatcher: validate, route, execute with isolation.
//!
//! The dispatcher owns a `command_type → handler` registry and turns every
//! inbound envelope into exactly one [`CommandResult`]:
//!
//! ```text
//! dispatch(envelope, cancel)
//!   ├─► cancel already observed ──────────────► Cancelled
//!   ├─► CommandValidator::validate ── Err ────► Rejected (stable code,
//!   │                                           handler never consulted)
//!   ├─► registry lookup ── absent ────────────► Rejected (NoHandlerRegistered)
//!   └─► handler.execute(envelope, cancel)
//!         ├─ returns result ──────────────────► that result
//!         └─ panics ── caught at the boundary ► Failed (HandlerPanicked)
//! ```
//!
//! ## Rules
//! - A broken handler must never take the dispatcher down: handler futures
//!   run under `catch_unwind`, and a panic becomes a `Failed` result.
//! - Registration is last-wins and deterministic; re-registering a command
//!   type replaces the previous handler.
//! - The registry is read-heavy after startup; a concurrent map keeps
//!   `dispatch` lock-free on the hot path.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use futures::FutureExt;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::envelope::CommandEnvelope;
use super::result::CommandResult;
use super::validator::CommandValidator;

/// A handler for one command type.
///
/// Implementations receive an already-validated envelope and a cooperative
/// cancellation token, and must produce a [`CommandResult`] — error paths
/// included. Handlers that can fail should return `Failed` results rather
/// than panic; panics are caught and converted, but only as a last line of
/// defense.
#[async_trait]
pub trait CommandHandler: Send + Sync + 'static {
    /// The command type this handler serves (the registry key).
    fn command_type(&self) -> &str;

    /// Executes the command.
    async fn execute(
        &self,
        envelope: &CommandEnvelope,
        cancel: CancellationToken,
    ) -> CommandResult;
}

/// A strongly-typed handler that works on a deserialized payload.
///
/// Wrap with [`Typed`] to register it: the adapter deserializes the envelope
/// payload into [`PayloadHandler::Payload`] and surfaces a malformed payload
/// as a `Failed` result with the `InvalidPayload` code — never as an
/// unhandled error.
#[async_trait]
pub trait PayloadHandler: Send + Sync + 'static {
    type Payload: DeserializeOwned + Send;

    /// The command type this handler serves.
    fn command_type(&self) -> &str;

    /// Executes the command with the deserialized payload.
    async fn handle(
        &self,
        envelope: &CommandEnvelope,
        payload: Self::Payload,
        cancel: CancellationToken,
    ) -> CommandResult;
}

/// Adapter turning a [`PayloadHandler`] into a [`CommandHandler`].
pub struct Typed<H>(pub H);

#[async_trait]
impl<H: PayloadHandler> CommandHandler for Typed<H> {
    fn command_type(&self) -> &str {
        self.0.command_type()
    }

    async fn execute(
        &self,
        envelope: &CommandEnvelope,
        cancel: CancellationToken,
    ) -> CommandResult {
        let started_at = Utc::now();
        match serde_json::from_str::<H::Payload>(&envelope.payload) {
            Ok(payload) => self.0.handle(envelope, payload, cancel).await,
            Err(e) => {
                warn!(
                    command_id = %envelope.command_id,
                    command_type = %envelope.command_type,
                    error = %e,
                    "payload deserialization failed"
                );
                CommandResult::failed(
                    envelope,
                    started_at,
                    "InvalidPayload",
                    format!("payload deserialization failed: {e}"),
                )
            }
        }
    }
}

/// Registry plus dispatch loop entry point.
pub struct CommandDispatcher {
    validator: CommandValidator,
    handlers: DashMap<String, Arc<dyn CommandHandler>>,
}

impl CommandDispatcher {
    /// Creates a dispatcher guarded by the given validator.
    pub fn new(validator: CommandValidator) -> Self {
        Self {
            validator,
            handlers: DashMap::new(),
        }
    }

    /// Registers a handler for its command type. Last registration wins.
    pub fn register_handler(&self, handler: Arc<dyn CommandHandler>) {
        let command_type = handler.command_type().to_string();
        if self
            .handlers
            .insert(command_type.clone(), handler)
            .is_some()
        {
            debug!(%command_type, "handler replaced");
        } else {
            debug!(%command_type, "handler registered");
        }
    }

    /// Returns true if a handler is registered for this command type.
    pub fn has_handler(&self, command_type: &str) -> bool {
        self.handlers.contains_key(command_type)
    }

    /// Validates, routes, and executes one envelope.
    ///
    /// Always returns a well-formed result; validation failures, unknown
    /// command types, handler panics, and cancellation all resolve to a
    /// [`CommandResult`] the control plane can record.
    pub async fn dispatch(
        &self,
        envelope: &CommandEnvelope,
        cancel: CancellationToken,
    ) -> CommandResult {
        let started_at = Utc::now();

        if cancel.is_cancelled() {
            return CommandResult::cancelled(envelope, started_at);
        }

        if let Err(e) = self.validator.validate(envelope) {
            warn!(
                command_id = %envelope.command_id,
                command_type = %envelope.command_type,
                code = e.as_code(),
                "command rejected"
            );
            return CommandResult::rejected(envelope, started_at, e.as_code(), e.to_string());
        }

        // Clone the Arc out so no registry guard is held across the await.
        let handler = self
            .handlers
            .get(envelope.command_type.as_str())
            .map(|h| Arc::clone(h.value()));

        let handler = match handler {
            Some(h) => h,
            None => {
                warn!(
                    command_id = %envelope.command_id,
                    command_type = %envelope.command_type,
                    "no handler registered"
                );
                return CommandResult::rejected(
                    envelope,
                    started_at,
                    "NoHandlerRegistered",
                    format!("no handler registered for `{}`", envelope.command_type),
                );
            }
        };

        debug!(
            command_id = %envelope.command_id,
            command_type = %envelope.command_type,
            "dispatching"
        );

        match AssertUnwindSafe(handler.execute(envelope, cancel))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(panic) => {
                let message = panic_message(panic);
                error!(
                    command_id = %envelope.command_id,
                    command_type = %envelope.command_type,
                    panic = %message,
                    "handler panicked"
                );
                CommandResult::failed(envelope, started_at, "HandlerPanicked", message)
            }
        }
    }
}

/// Best-effort extraction of a panic payload message.
fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::envelope::MAX_PAYLOAD_BYTES;
    use crate::commands::result::CommandStatus;
    use serde::Deserialize;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;
    use uuid::Uuid;

    fn node() -> Uuid {
        Uuid::parse_str("11111111-1111-1111-1111-111111111111").unwrap()
    }

    fn org() -> Uuid {
        Uuid::parse_str("22222222-2222-2222-2222-222222222222").unwrap()
    }

    fn dispatcher() -> CommandDispatcher {
        CommandDispatcher::new(CommandValidator::new(
            Some(node()),
            Some(org()),
            Duration::from_secs(300),
        ))
    }

    fn envelope(command_type: &str) -> CommandEnvelope {
        CommandEnvelope::new(command_type, node(), org(), "{}")
    }

    struct OkHandler {
        command_type: &'static str,
        invocations: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl CommandHandler for OkHandler {
        fn command_type(&self) -> &str {
            self.command_type
        }

        async fn execute(
            &self,
            envelope: &CommandEnvelope,
            _cancel: CancellationToken,
        ) -> CommandResult {
            self.invocations.fetch_add(1, Ordering::SeqCst);
            CommandResult::succeeded(envelope, Utc::now(), Some("\"ok\"".into()))
        }
    }

    struct PanicHandler;

    #[async_trait]
    impl CommandHandler for PanicHandler {
        fn command_type(&self) -> &str {
            "demo.panic"
        }

        async fn execute(
            &self,
            _envelope: &CommandEnvelope,
            _cancel: CancellationToken,
        ) -> CommandResult {
            panic!("boom");
        }
    }

    #[tokio::test]
    async fn test_dispatch_success_path() {
        let d = dispatcher();
        let invocations = Arc::new(AtomicUsize::new(0));
        d.register_handler(Arc::new(OkHandler {
            command_type: "demo.ok",
            invocations: invocations.clone(),
        }));
        assert!(d.has_handler("demo.ok"));

        let result = d
            .dispatch(&envelope("demo.ok"), CancellationToken::new())
            .await;
        assert_eq!(result.status, CommandStatus::Succeeded);
        assert_eq!(invocations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_no_handler_is_rejected() {
        let d = dispatcher();
        let result = d
            .dispatch(&envelope("demo.unknown"), CancellationToken::new())
            .await;
        assert_eq!(result.status, CommandStatus::Rejected);
        assert_eq!(result.error_code.as_deref(), Some("NoHandlerRegistered"));
    }

    #[tokio::test]
    async fn test_validation_failure_never_reaches_handler() {
        let d = dispatcher();
        let invocations = Arc::new(AtomicUsize::new(0));
        d.register_handler(Arc::new(OkHandler {
            command_type: "demo.ok",
            invocations: invocations.clone(),
        }));

        let mut env = envelope("demo.ok");
        env.organization_id = Uuid::new_v4();
        let result = d.dispatch(&env, CancellationToken::new()).await;
        assert_eq!(result.status, CommandStatus::Rejected);
        assert_eq!(
            result.error_code.as_deref(),
            Some("OrganizationIdMismatch")
        );
        assert_eq!(invocations.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_oversized_payload_rejected_before_handler_lookup() {
        let d = dispatcher();
        let invocations = Arc::new(AtomicUsize::new(0));
        d.register_handler(Arc::new(OkHandler {
            command_type: "demo.ok",
            invocations: invocations.clone(),
        }));

        let mut env = envelope("demo.ok");
        env.payload = "a".repeat(300 * 1024);
        assert!(env.payload.len() > MAX_PAYLOAD_BYTES);

        let result = d.dispatch(&env, CancellationToken::new()).await;
        assert_eq!(result.status, CommandStatus::Rejected);
        assert_eq!(result.error_code.as_deref(), Some("PayloadTooLarge"));
        assert_eq!(invocations.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_panicking_handler_is_isolated_and_dispatcher_survives() {
        let d = dispatcher();
        d.register_handler(Arc::new(PanicHandler));
        let invocations = Arc::new(AtomicUsize::new(0));
        d.register_handler(Arc::new(OkHandler {
            command_type: "demo.ok",
            invocations: invocations.clone(),
        }));

        let result = d
            .dispatch(&envelope("demo.panic"), CancellationToken::new())
            .await;
        assert_eq!(result.status, CommandStatus::Failed);
        assert_eq!(result.error_code.as_deref(), Some("HandlerPanicked"));
        assert_eq!(result.error_message.as_deref(), Some("boom"));

        // The dispatcher is still usable after the panic.
        let result = d
            .dispatch(&envelope("demo.ok"), CancellationToken::new())
            .await;
        assert_eq!(result.status, CommandStatus::Succeeded);
        assert_eq!(invocations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_reregistration_is_last_wins() {
        let d = dispatcher();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        d.register_handler(Arc::new(OkHandler {
            command_type: "demo.ok",
            invocations: first.clone(),
        }));
        d.register_handler(Arc::new(OkHandler {
            command_type: "demo.ok",
            invocations: second.clone(),
        }));

        d.dispatch(&envelope("demo.ok"), CancellationToken::new())
            .await;
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_pre_cancelled_token_yields_cancelled() {
        let d = dispatcher();
        let invocations = Arc::new(AtomicUsize::new(0));
        d.register_handler(Arc::new(OkHandler {
            command_type: "demo.ok",
            invocations: invocations.clone(),
        }));

        let token = CancellationToken::new();
        token.cancel();
        let result = d.dispatch(&envelope("demo.ok"), token).await;
        assert_eq!(result.status, CommandStatus::Cancelled);
        assert_eq!(invocations.load(Ordering::SeqCst), 0);
    }

    // --- typed handler adapter ---

    #[derive(Deserialize)]
    struct EchoPayload {
        message: String,
    }

    struct EchoHandler {
        seen: Arc<AtomicBool>,
    }

    #[async_trait]
    impl PayloadHandler for EchoHandler {
        type Payload = EchoPayload;

        fn command_type(&self) -> &str {
            "demo.echo"
        }

        async fn handle(
            &self,
            envelope: &CommandEnvelope,
            payload: Self::Payload,
            _cancel: CancellationToken,
        ) -> CommandResult {
            self.seen.store(true, Ordering::SeqCst);
            CommandResult::succeeded(
                envelope,
                Utc::now(),
                Some(format!("\"{}\"", payload.message)),
            )
        }
    }

    #[tokio::test]
    async fn test_typed_handler_deserializes_payload() {
        let d = dispatcher();
        let seen = Arc::new(AtomicBool::new(false));
        d.register_handler(Arc::new(Typed(EchoHandler { seen: seen.clone() })));

        let mut env = envelope("demo.echo");
        env.payload = r#"{"message":"hi"}"#.to_string();
        let result = d.dispatch(&env, CancellationToken::new()).await;
        assert_eq!(result.status, CommandStatus::Succeeded);
        assert_eq!(result.result_payload.as_deref(), Some("\"hi\""));
        assert!(seen.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_typed_handler_malformed_payload_is_failed_result() {
        let d = dispatcher();
        let seen = Arc::new(AtomicBool::new(false));
        d.register_handler(Arc::new(Typed(EchoHandler { seen: seen.clone() })));

        let mut env = envelope("demo.echo");
        env.payload = r#"{"wrong":"shape"}"#.to_string();
        let result = d.dispatch(&env, CancellationToken::new()).await;
        assert_eq!(result.status, CommandStatus::Failed);
        assert_eq!(result.error_code.as_deref(), Some("InvalidPayload"));
        assert!(!seen.load(Ordering::SeqCst));
    }
}
