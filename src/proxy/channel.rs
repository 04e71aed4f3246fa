//! Write side of the two proxied connections

use std::fmt;
use std::io;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::debug;

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Which end of the proxy a connection belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Client,
    Server,
}

impl Side {
    pub fn peer(self) -> Side {
        match self {
            Side::Client => Side::Server,
            Side::Server => Side::Client,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Client => write!(f, "client"),
            Side::Server => write!(f, "server"),
        }
    }
}

/// Serializes writes to one connection.
///
/// A whole buffer is written under the lock, so frames coming from the
/// pipeline and injected ERROR frames never interleave on the wire.
pub struct ChannelWriter {
    side: Side,
    inner: Mutex<Option<BoxedWriter>>,
}

impl ChannelWriter {
    pub fn new(side: Side, writer: BoxedWriter) -> Self {
        Self {
            side,
            inner: Mutex::new(Some(writer)),
        }
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub async fn write(&self, bytes: &[u8]) -> io::Result<()> {
        let mut guard = self.inner.lock().await;
        match guard.as_mut() {
            Some(writer) => {
                writer.write_all(bytes).await?;
                writer.flush().await
            }
            None => Err(io::Error::new(
                io::ErrorKind::NotConnected,
                format!("{} channel is closed", self.side),
            )),
        }
    }

    /// Flushes and shuts the connection down, then releases it.
    pub async fn shutdown(&self) {
        if let Some(mut writer) = self.inner.lock().await.take() {
            if let Err(e) = writer.shutdown().await {
                debug!("error shutting down {} channel: {}", self.side, e);
            }
        }
    }

    /// Releases the connection without flushing.
    pub async fn destroy(&self) {
        drop(self.inner.lock().await.take());
    }

    pub async fn is_closed(&self) -> bool {
        self.inner.lock().await.is_none()
    }
}

impl fmt::Debug for ChannelWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelWriter").field("side", &self.side).finish()
    }
}
