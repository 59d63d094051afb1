//! Inbound command handling: envelope/result value types, the stateless
//! validator, the type→handler dispatcher, and the built-in process-control
//! handlers.

mod dispatcher;
mod envelope;
mod handlers;
mod result;
mod validator;

pub use dispatcher::{CommandDispatcher, CommandHandler, PayloadHandler, Typed};
pub use envelope::{CommandEnvelope, CommandPriority, MAX_PAYLOAD_BYTES};
pub use handlers::{
    register_process_handlers, KillProcessHandler, KillProcessRequest, StartProcessHandler,
    StartProcessRequest, StopProcessHandler, StopProcessRequest, UpdateLimitsHandler,
    UpdateLimitsRequest,
};
pub use result::{CommandResult, CommandStatus};
pub use validator::{CommandValidator, ValidationError};
