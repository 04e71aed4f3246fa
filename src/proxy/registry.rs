//! Per-command handler registry
//!
//! Every STOMP command resolves to a handler slot named `on` + the command in
//! capitalized form (`SEND` -> `onSend`). All known client and server commands
//! start out with [`PassThrough`]; embedders may replace any slot, or add
//! slots for commands the protocol does not define, at any time.

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, RwLock};

use crate::frame::{Frame, CLIENT_COMMANDS, SERVER_COMMANDS};
use crate::proxy::session::Session;

/// What a handler hands back: a frame to forward, `None` to drop the frame
/// silently, or an error that is reported to the client as an ERROR frame.
pub type HandlerResult = std::result::Result<Option<Frame>, HandlerError>;

/// Failure reported by a command handler.
#[derive(Debug, Clone, Default, PartialEq, Eq, thiserror::Error)]
#[error("{}", .message.as_deref().unwrap_or("Unknown reason"))]
pub struct HandlerError {
    /// Used for the `message` header of the synthesized ERROR frame.
    pub message: Option<String>,
    /// Replaces the generated diagnostic body of the ERROR frame.
    pub body: Option<String>,
    /// Tears the proxy down after the ERROR frame is sent.
    pub fatal: bool,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            body: None,
            fatal: false,
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            fatal: true,
            ..Self::new(message)
        }
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }
}

/// A hook invoked for every frame carrying a given command.
///
/// The frame is a private copy; handlers may mutate and return it.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn handle(&self, session: &Session, frame: Frame) -> HandlerResult;
}

/// Forwards the frame untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassThrough;

#[async_trait]
impl CommandHandler for PassThrough {
    async fn handle(&self, _session: &Session, frame: Frame) -> HandlerResult {
        Ok(Some(frame))
    }
}

/// Adapts an async closure into a [`CommandHandler`].
pub struct FnHandler<F> {
    f: F,
}

/// Builds a handler from a closure receiving a session handle and the frame.
///
/// ```rust
/// use stomp_proxy::proxy::handler_fn;
///
/// let handler = handler_fn(|session, mut frame| async move {
///     session.insert("last-destination", frame.header("destination").unwrap_or_default());
///     frame.set_header("x-proxied", "true");
///     Ok(Some(frame))
/// });
/// # let _ = handler;
/// ```
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(Session, Frame) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    FnHandler { f }
}

#[async_trait]
impl<F, Fut> CommandHandler for FnHandler<F>
where
    F: Fn(Session, Frame) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    async fn handle(&self, session: &Session, frame: Frame) -> HandlerResult {
        (self.f)(session.clone(), frame).await
    }
}

pub struct CommandRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn CommandHandler>>>,
}

impl CommandRegistry {
    /// Registry with a [`PassThrough`] handler for every known command.
    pub fn new() -> Self {
        let mut handlers: HashMap<String, Arc<dyn CommandHandler>> = HashMap::new();
        for command in CLIENT_COMMANDS.iter().chain(SERVER_COMMANDS) {
            handlers.insert(Self::handler_key(command), Arc::new(PassThrough));
        }

        Self {
            handlers: RwLock::new(handlers),
        }
    }

    /// Canonical slot name for a command: `on` followed by the command with
    /// only its first letter upper-cased.
    pub fn handler_key(command: &str) -> String {
        let lower = command.to_lowercase();
        let mut chars = lower.chars();
        match chars.next() {
            Some(first) => format!("on{}{}", first.to_uppercase(), chars.as_str()),
            None => "on".to_string(),
        }
    }

    /// Installs `handler` for `command`, replacing any previous one.
    pub fn set_handler<H>(&self, command: &str, handler: H)
    where
        H: CommandHandler + 'static,
    {
        self.set_shared_handler(command, Arc::new(handler));
    }

    pub fn set_shared_handler(&self, command: &str, handler: Arc<dyn CommandHandler>) {
        let key = Self::handler_key(command);
        self.write().insert(key, handler);
    }

    /// Removes the slot for `command`; frames carrying it become unknown.
    pub fn remove_handler(&self, command: &str) -> bool {
        self.write().remove(&Self::handler_key(command)).is_some()
    }

    pub fn handler(&self, command: &str) -> Option<Arc<dyn CommandHandler>> {
        self.read().get(&Self::handler_key(command)).cloned()
    }

    pub fn contains(&self, command: &str) -> bool {
        self.read().contains_key(&Self::handler_key(command))
    }

    /// Sorted slot names.
    pub fn commands(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Arc<dyn CommandHandler>>> {
        self.handlers.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Arc<dyn CommandHandler>>> {
        self.handlers.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CommandRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandRegistry")
            .field("handlers", &self.commands())
            .finish()
    }
}
