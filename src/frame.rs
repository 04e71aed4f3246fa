//! STOMP frame model

use bytes::Bytes;
use indexmap::IndexMap;

/// Commands a client may send to a broker.
pub const CLIENT_COMMANDS: &[&str] = &[
    "STOMP",
    "CONNECT",
    "SEND",
    "SUBSCRIBE",
    "UNSUBSCRIBE",
    "ACK",
    "NACK",
    "BEGIN",
    "COMMIT",
    "ABORT",
    "DISCONNECT",
];

/// Commands a broker may send to a client.
pub const SERVER_COMMANDS: &[&str] = &["CONNECTED", "MESSAGE", "RECEIPT", "ERROR"];

/// One protocol message unit.
///
/// A frame whose command is empty or only whitespace is a heartbeat.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Frame {
    pub command: String,
    pub headers: IndexMap<String, String>,
    pub body: Bytes,
}

impl Frame {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            headers: IndexMap::new(),
            body: Bytes::new(),
        }
    }

    pub fn heartbeat() -> Self {
        Self::default()
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }

    pub fn set_header(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(key.into(), value.into());
    }

    pub fn is_heartbeat(&self) -> bool {
        self.command.trim().is_empty()
    }

    /// Body as text, replacing invalid UTF-8.
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Copy with headers and body that share nothing with `self`.
    pub fn deep_copy(&self) -> Self {
        Self {
            command: self.command.clone(),
            headers: self.headers.clone(),
            body: Bytes::copy_from_slice(&self.body),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heartbeat_detection() {
        assert!(Frame::heartbeat().is_heartbeat());
        assert!(Frame::new("\n").is_heartbeat());
        assert!(Frame::new("  ").is_heartbeat());
        assert!(!Frame::new("SEND").is_heartbeat());
    }

    #[test]
    fn test_deep_copy_is_independent() {
        let original = Frame::new("SEND")
            .with_header("destination", "/queue/a")
            .with_body("hello");
        let mut copy = original.deep_copy();
        copy.set_header("destination", "/queue/b");
        copy.command = "BOOP".to_string();

        assert_eq!(original.header("destination"), Some("/queue/a"));
        assert_eq!(original.command, "SEND");
        assert_eq!(copy.body, original.body);
    }

    #[test]
    fn test_header_order_does_not_affect_equality() {
        let a = Frame::new("SEND").with_header("a", "1").with_header("b", "2");
        let b = Frame::new("SEND").with_header("b", "2").with_header("a", "1");
        assert_eq!(a, b);
    }
}
