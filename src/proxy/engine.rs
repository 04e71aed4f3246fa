//! The proxy engine
//!
//! [`StompProxy`] takes two already-connected streams, one facing the client
//! and one facing the broker, and relays STOMP traffic between them. Each
//! direction either runs through an [`InterceptionStage`] that hands every
//! frame to the [`CommandRegistry`], or, when configured as passthrough, is
//! copied byte for byte.
//!
//! Synthesized ERROR frames always go to the client connection, whichever
//! direction the failing frame travelled in.

use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ProxyOptions;
use crate::frame::Frame;
use crate::proxy::channel::{BoxedReader, ChannelWriter, Side};
use crate::proxy::codec::to_wire;
use crate::proxy::events::{ProxyError, ProxyEvent};
use crate::proxy::registry::{CommandHandler, CommandRegistry, HandlerError, HandlerResult};
use crate::proxy::session::Session;
use crate::proxy::stage::InterceptionStage;
use crate::Result;

/// `message` header used when an error carries no message.
pub const DEFAULT_ERROR_MESSAGE: &str = "Invalid Message Received";

/// Chunks a stage may hold in its input queue before the reader waits.
const STAGE_QUEUE_DEPTH: usize = 16;

/// The result of dispatching one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchOutcome {
    /// The frame as it was decoded, before any handler touched it.
    pub original: Frame,
    pub result: HandlerResult,
}

/// Where a reader delivers the chunks it pulls off its connection.
enum ChunkTarget {
    Peer(Arc<ChannelWriter>),
    Stage(mpsc::Sender<Bytes>),
}

/// State shared between the engine handle and its pipeline tasks.
pub(crate) struct Shared {
    id: Uuid,
    session: Session,
    registry: CommandRegistry,
    events: broadcast::Sender<ProxyEvent>,
    client: Arc<ChannelWriter>,
    server: Arc<ChannelWriter>,
    closed: AtomicBool,
    /// Set by the first peer hangup so only one side is reported.
    peer_notified: AtomicBool,
    tasks: Mutex<Vec<AbortHandle>>,
}

impl Shared {
    fn emit(&self, event: ProxyEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn track(&self, handle: AbortHandle) {
        let mut tasks = self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if self.closed.load(Ordering::SeqCst) {
            handle.abort();
        } else {
            tasks.push(handle);
        }
    }

    fn writer(&self, side: Side) -> Arc<ChannelWriter> {
        match side {
            Side::Client => Arc::clone(&self.client),
            Side::Server => Arc::clone(&self.server),
        }
    }

    /// Routes one frame to its handler.
    ///
    /// Heartbeats are forwarded as-is. Handlers receive a deep copy; the
    /// decoded frame is kept in the outcome for error reporting.
    pub(crate) async fn dispatch(&self, frame: Frame) -> DispatchOutcome {
        if frame.is_heartbeat() {
            return DispatchOutcome {
                result: Ok(Some(frame.clone())),
                original: frame,
            };
        }

        let handler = match self.registry.handler(&frame.command) {
            Some(handler) => handler,
            None => {
                let error = ProxyError::UnknownCommand {
                    command: frame.command.clone(),
                };
                warn!(proxy = %self.id, "{}", error);
                let result = Err(HandlerError::new(error.to_string()));
                self.emit(ProxyEvent::Error(error));
                return DispatchOutcome {
                    original: frame,
                    result,
                };
            }
        };

        let result = handler.handle(&self.session, frame.deep_copy()).await;
        DispatchOutcome {
            original: frame,
            result,
        }
    }

    pub(crate) async fn interject_frame(&self, frame: &Frame) -> Result<()> {
        self.client.write(&to_wire(frame)).await?;
        Ok(())
    }

    pub(crate) async fn send_error(&self, original: &Frame, error: &HandlerError) {
        let frame = error_frame(original, error);
        if let Err(e) = self.interject_frame(&frame).await {
            debug!(proxy = %self.id, "could not deliver ERROR frame to client: {}", e);
        }
    }

    pub(crate) async fn kill(&self, error: &HandlerError) {
        self.emit(ProxyEvent::Error(ProxyError::Fatal {
            message: error.to_string(),
        }));
        self.close().await;
    }

    /// Runs [`Shared::kill`] on its own task so the caller can be aborted by it.
    pub(crate) fn spawn_kill(self: &Arc<Self>, error: HandlerError) {
        let shared = Arc::clone(self);
        tokio::spawn(async move { shared.kill(&error).await });
    }

    fn peer_closed(self: &Arc<Self>, side: Side) {
        if self.closed.load(Ordering::SeqCst) || self.peer_notified.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(proxy = %self.id, "{} closed the connection", side);
        self.emit(match side {
            Side::Client => ProxyEvent::ClientClosed,
            Side::Server => ProxyEvent::ServerClosed,
        });
        let shared = Arc::clone(self);
        tokio::spawn(async move { shared.close().await });
    }

    pub(crate) async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(proxy = %self.id, "closing proxy");
        self.emit(ProxyEvent::Closed);

        let tasks: Vec<AbortHandle> = {
            let mut tasks = self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            tasks.drain(..).collect()
        };
        for task in tasks {
            task.abort();
        }

        self.client.shutdown().await;
        self.server.destroy().await;
    }
}

/// Builds the ERROR frame reported to the client for a failed frame.
pub fn error_frame(original: &Frame, error: &HandlerError) -> Frame {
    let body = error
        .body
        .clone()
        .unwrap_or_else(|| error_body(original, error));

    let mut frame = Frame::new("ERROR");
    if let Some(receipt) = original.header("receipt") {
        frame.set_header("receipt-id", receipt);
    }
    frame.set_header(
        "message",
        error.message.as_deref().unwrap_or(DEFAULT_ERROR_MESSAGE),
    );
    frame.set_header("content-length", body.len().to_string());
    frame.set_header("content-type", "text/plain");
    frame.body = Bytes::from(body);
    frame
}

fn error_body(original: &Frame, error: &HandlerError) -> String {
    let mut body = format!(
        "The message with method of {} and headers: \n",
        original.command
    );
    for (key, value) in &original.headers {
        body.push_str(&format!("{}:{}\n", key, value));
    }
    body.push_str("\nis invalid for:\n");
    body.push_str(&error.to_string());
    body
}

/// Copies chunks off one connection until it closes.
async fn read_loop(shared: Arc<Shared>, side: Side, mut reader: BoxedReader, target: ChunkTarget, buffer_size: usize) {
    let mut buf = vec![0u8; buffer_size.max(1)];
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                debug!(proxy = %shared.id, "read from {} failed: {}", side, e);
                break;
            }
        };

        let chunk = Bytes::copy_from_slice(&buf[..n]);
        let delivered = match &target {
            ChunkTarget::Peer(writer) => writer.write(&chunk).await.is_ok(),
            ChunkTarget::Stage(queue) => queue.send(chunk).await.is_ok(),
        };
        if !delivered {
            debug!(proxy = %shared.id, "{} pipeline stopped, no longer reading", side);
            return;
        }
    }
    shared.peer_closed(side);
}

/// An intercepting STOMP proxy between one client and one broker connection.
///
/// Must be created inside a tokio runtime. Intercepted directions buffer
/// their input until [`StompProxy::start`] is called; passthrough directions
/// flow immediately. Dropping the handle before `start` abandons the
/// intercepted directions.
pub struct StompProxy {
    shared: Arc<Shared>,
    client_start: Mutex<Option<oneshot::Sender<()>>>,
    server_start: Mutex<Option<oneshot::Sender<()>>>,
    started: AtomicBool,
}

impl StompProxy {
    pub fn new<C, S>(client: C, server: S, options: ProxyOptions) -> Self
    where
        C: AsyncRead + AsyncWrite + Send + 'static,
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (client_read, client_write) = tokio::io::split(client);
        let (server_read, server_write) = tokio::io::split(server);
        let (events, _) = broadcast::channel(options.event_capacity.max(1));

        let shared = Arc::new(Shared {
            id: Uuid::new_v4(),
            session: Session::new(),
            registry: CommandRegistry::new(),
            events,
            client: Arc::new(ChannelWriter::new(Side::Client, Box::new(client_write))),
            server: Arc::new(ChannelWriter::new(Side::Server, Box::new(server_write))),
            closed: AtomicBool::new(false),
            peer_notified: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
        });

        info!(
            proxy = %shared.id,
            client_passthrough = options.client_passthrough,
            server_passthrough = options.server_passthrough,
            "building proxy"
        );

        let client_start = Self::build_direction(
            &shared,
            Side::Client,
            Box::new(client_read),
            options.client_passthrough,
            options.read_buffer_size,
        );
        let server_start = Self::build_direction(
            &shared,
            Side::Server,
            Box::new(server_read),
            options.server_passthrough,
            options.read_buffer_size,
        );

        Self {
            shared,
            client_start: Mutex::new(client_start),
            server_start: Mutex::new(server_start),
            started: AtomicBool::new(false),
        }
    }

    /// Wires traffic read from `source` toward its peer. Returns the start
    /// trigger when the direction is intercepted.
    fn build_direction(
        shared: &Arc<Shared>,
        source: Side,
        reader: BoxedReader,
        passthrough: bool,
        buffer_size: usize,
    ) -> Option<oneshot::Sender<()>> {
        let peer = shared.writer(source.peer());

        if passthrough {
            let reader_task = tokio::spawn(read_loop(
                Arc::clone(shared),
                source,
                reader,
                ChunkTarget::Peer(peer),
                buffer_size,
            ));
            shared.track(reader_task.abort_handle());
            return None;
        }

        let (queue_tx, queue_rx) = mpsc::channel(STAGE_QUEUE_DEPTH);
        let (start_tx, start_rx) = oneshot::channel();
        let stage = InterceptionStage::new(source, Arc::clone(shared), peer);

        let stage_task = tokio::spawn(stage.run(queue_rx, start_rx));
        shared.track(stage_task.abort_handle());
        let reader_task = tokio::spawn(read_loop(
            Arc::clone(shared),
            source,
            reader,
            ChunkTarget::Stage(queue_tx),
            buffer_size,
        ));
        shared.track(reader_task.abort_handle());

        Some(start_tx)
    }

    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    /// State shared by every handler invocation of this proxy.
    pub fn session(&self) -> &Session {
        &self.shared.session
    }

    pub fn registry(&self) -> &CommandRegistry {
        &self.shared.registry
    }

    /// Overrides the handler for `command`. Takes effect for the next frame
    /// dispatched, even while traffic is flowing.
    pub fn set_handler<H>(&self, command: &str, handler: H)
    where
        H: CommandHandler + 'static,
    {
        self.shared.registry.set_handler(command, handler);
    }

    /// Subscribes to lifecycle and error notifications. Events published
    /// before the subscription are not replayed.
    pub fn subscribe(&self) -> broadcast::Receiver<ProxyEvent> {
        self.shared.events.subscribe()
    }

    /// Releases buffered input on both intercepted directions.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(proxy = %self.shared.id, "starting proxy");
        for trigger in [&self.client_start, &self.server_start] {
            let sender = trigger
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .take();
            if let Some(sender) = sender {
                // The stage is gone if the proxy already closed
                let _ = sender.send(());
            }
        }
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Writes `frame` straight to the client connection.
    pub async fn interject_frame(&self, frame: &Frame) -> Result<()> {
        self.shared.interject_frame(frame).await
    }

    /// Sends the client an ERROR frame describing why `original` failed.
    pub async fn send_error(&self, original: &Frame, error: &HandlerError) {
        self.shared.send_error(original, error).await
    }

    /// Publishes a fatal error notification and closes the proxy.
    pub async fn kill(&self, error: &HandlerError) {
        self.shared.kill(error).await
    }

    /// Shuts the client connection down gracefully and drops the server
    /// connection. Only the first call has any effect.
    pub async fn close(&self) {
        self.shared.close().await
    }
}

impl std::fmt::Debug for StompProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StompProxy")
            .field("id", &self.shared.id)
            .field("started", &self.is_started())
            .field("closed", &self.is_closed())
            .finish()
    }
}
