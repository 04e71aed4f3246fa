//! TCP front end that puts a [`StompProxy`] in front of a broker
//!
//! Every accepted client gets its own upstream connection and its own proxy
//! instance. Frames are logged as they pass and counted in the session.

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::frame::{CLIENT_COMMANDS, SERVER_COMMANDS};
use crate::proxy::{handler_fn, ProxyEvent, StompProxy};
use crate::{Error, Result};

/// Session key holding the number of frames a proxy has dispatched.
pub const FRAME_COUNT_KEY: &str = "frames";

pub struct ProxyListener {
    config: Arc<Config>,
    listener: TcpListener,
}

impl ProxyListener {
    pub async fn bind(config: Config) -> Result<Self> {
        let listener = TcpListener::bind(config.listen_addr()).await?;
        Ok(Self {
            config: Arc::new(config),
            listener,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts clients until Ctrl+C.
    pub async fn run(self) -> Result<()> {
        info!("Proxy listening on {}", self.local_addr()?);
        info!("Forwarding to broker at {}", self.config.upstream_addr());

        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        debug!("New connection from {}", addr);
                        let config = Arc::clone(&self.config);
                        tokio::spawn(async move {
                            if let Err(e) = Self::handle_connection(stream, addr, config).await {
                                error!("Error handling connection from {}: {}", addr, e);
                            }
                        });
                    }
                    Err(e) => {
                        error!("Error accepting connection: {}", e);
                    }
                },
                _ = signal::ctrl_c() => {
                    info!("Received shutdown signal");
                    return Ok(());
                }
            }
        }
    }

    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        config: Arc<Config>,
    ) -> Result<()> {
        let upstream = TcpStream::connect(config.upstream_addr())
            .await
            .map_err(|e| Error::proxy(format!("cannot reach broker at {}: {}", config.upstream_addr(), e)))?;
        let proxy = StompProxy::new(stream, upstream, config.proxy.clone());
        install_logging_hooks(&proxy);

        let mut events = proxy.subscribe();
        proxy.start();
        info!(proxy = %proxy.id(), "Proxying {} to {}", addr, config.upstream_addr());

        if proxy.is_closed() {
            return Ok(());
        }
        loop {
            match events.recv().await {
                Ok(ProxyEvent::Closed) | Err(RecvError::Closed) => break,
                Ok(ProxyEvent::Error(e)) => warn!(proxy = %proxy.id(), "{}", e),
                Ok(event) => debug!(proxy = %proxy.id(), "{}", event.event_name()),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(proxy = %proxy.id(), "Missed {} proxy events", skipped)
                }
            }
        }

        info!(
            proxy = %proxy.id(),
            "Connection from {} finished after {} frames",
            addr,
            proxy.session().get(FRAME_COUNT_KEY).unwrap_or_default()
        );
        Ok(())
    }
}

/// Overrides every known command with a handler that logs the frame, bumps
/// the session frame counter, and forwards it unchanged.
pub fn install_logging_hooks(proxy: &StompProxy) {
    for command in CLIENT_COMMANDS.iter().chain(SERVER_COMMANDS) {
        proxy.set_handler(
            command,
            handler_fn(|session, frame| async move {
                session.update(|values| {
                    let count = values
                        .get(FRAME_COUNT_KEY)
                        .and_then(serde_json::Value::as_u64)
                        .unwrap_or(0);
                    values.insert(FRAME_COUNT_KEY.to_string(), (count + 1).into());
                });
                debug!(
                    "{} headers={:?} body={} bytes",
                    frame.command,
                    frame.headers,
                    frame.body.len()
                );
                Ok(Some(frame))
            }),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    async fn read_frame(stream: &mut TcpStream) -> Vec<u8> {
        let mut received = Vec::new();
        let mut buf = [0u8; 256];
        while !received.ends_with(&[0]) {
            let n = stream.read(&mut buf).await.expect("read");
            assert!(n > 0, "connection closed early");
            received.extend_from_slice(&buf[..n]);
        }
        received
    }

    #[tokio::test]
    async fn test_proxies_connect_handshake() {
        let broker = TcpListener::bind("127.0.0.1:0").await.expect("bind broker");
        let broker_addr = broker.local_addr().expect("broker addr");

        let config = Config {
            listen_host: "127.0.0.1".to_string(),
            listen_port: 0,
            upstream_host: broker_addr.ip().to_string(),
            upstream_port: broker_addr.port(),
            ..Config::default()
        };
        let listener = ProxyListener::bind(config).await.expect("bind proxy");
        let proxy_addr = listener.local_addr().expect("proxy addr");
        tokio::spawn(listener.run());

        let mut client = TcpStream::connect(proxy_addr).await.expect("connect");
        client
            .write_all(b"CONNECT\naccept-version:1.2\nhost:/\n\n\0")
            .await
            .expect("write");

        let (mut upstream, _) = broker.accept().await.expect("accept");
        assert_eq!(
            read_frame(&mut upstream).await,
            b"CONNECT\naccept-version:1.2\nhost:/\n\n\0"
        );

        upstream
            .write_all(b"CONNECTED\nversion:1.2\n\n\0")
            .await
            .expect("write");
        assert_eq!(read_frame(&mut client).await, b"CONNECTED\nversion:1.2\n\n\0");
    }

    #[tokio::test]
    async fn test_logging_hooks_count_frames() {
        let (client, _client_peer) = tokio::io::duplex(1024);
        let (server, _server_peer) = tokio::io::duplex(1024);
        let proxy = StompProxy::new(client, server, Default::default());
        install_logging_hooks(&proxy);

        let handler = proxy.registry().handler("SEND").expect("handler");
        let frame = crate::Frame::new("SEND").with_header("destination", "/queue/a");
        for _ in 0..2 {
            let result = handler.handle(proxy.session(), frame.clone()).await;
            assert_eq!(result, Ok(Some(frame.clone())));
        }
        assert_eq!(proxy.session().get(FRAME_COUNT_KEY), Some(serde_json::json!(2)));
    }
}
