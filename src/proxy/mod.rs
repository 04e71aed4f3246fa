//! Intercepting proxy core
//!
//! Two connections are wired together through a pair of one-way stages.
//! Each stage decodes STOMP frames, hands them to the command registry, and
//! writes whatever the handlers return to the opposite connection.

pub mod channel;
pub mod codec;
pub mod engine;
pub mod events;
pub mod registry;
pub mod session;
pub mod stage;

pub use channel::Side;
pub use codec::StompCodec;
pub use engine::{error_frame, DispatchOutcome, StompProxy};
pub use events::{ProxyError, ProxyEvent};
pub use registry::{handler_fn, CommandHandler, CommandRegistry, HandlerError, HandlerResult, PassThrough};
pub use session::Session;
pub use stage::StageState;
