//! Notifications a proxy publishes to its embedder

/// Errors surfaced through [`ProxyEvent::Error`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProxyError {
    /// No handler slot exists for a frame's command.
    #[error("invalid stomp command {command}")]
    UnknownCommand { command: String },

    /// A handler reported a fatal error and the proxy is shutting down.
    #[error("received fatal error, original error was: {message}")]
    Fatal { message: String },
}

/// Lifecycle and error notifications.
///
/// `Closed` is published exactly once per proxy. The peer notifications are
/// published before it when the shutdown was caused by that side hanging up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProxyEvent {
    ClientClosed,
    ServerClosed,
    Closed,
    Error(ProxyError),
}

impl ProxyEvent {
    pub fn event_name(&self) -> &'static str {
        match self {
            ProxyEvent::ClientClosed => "clientClosed",
            ProxyEvent::ServerClosed => "serverClosed",
            ProxyEvent::Closed => "closed",
            ProxyEvent::Error(_) => "error",
        }
    }
}

impl From<ProxyError> for ProxyEvent {
    fn from(error: ProxyError) -> Self {
        ProxyEvent::Error(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names() {
        assert_eq!(ProxyEvent::ClientClosed.event_name(), "clientClosed");
        assert_eq!(ProxyEvent::ServerClosed.event_name(), "serverClosed");
        assert_eq!(ProxyEvent::Closed.event_name(), "closed");

        let event: ProxyEvent = ProxyError::UnknownCommand {
            command: "FOO".to_string(),
        }
        .into();
        assert_eq!(event.event_name(), "error");
    }

    #[test]
    fn test_error_messages() {
        let unknown = ProxyError::UnknownCommand {
            command: "FOO".to_string(),
        };
        assert_eq!(unknown.to_string(), "invalid stomp command FOO");

        let fatal = ProxyError::Fatal {
            message: "boom".to_string(),
        };
        assert_eq!(
            fatal.to_string(),
            "received fatal error, original error was: boom"
        );
    }
}
