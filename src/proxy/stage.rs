//! One-way interception stage
//!
//! A stage sits between the read side of one connection and the write side of
//! the other. It starts out buffering: chunks are queued but not decoded, so
//! the embedder can finish installing handlers before the first dispatch.
//! Once started, each chunk is decoded and every frame in it is dispatched
//! concurrently. The next chunk is not touched until all dispatches of the
//! current one have completed, so frames never reorder across chunks.

use bytes::{Bytes, BytesMut};
use futures_util::future::join_all;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace, warn};

use crate::proxy::channel::{ChannelWriter, Side};
use crate::proxy::codec::{to_wire, StompCodec};
use crate::proxy::engine::Shared;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageState {
    /// Input is queued until the stage is started.
    Buffering,
    /// Input is dispatched as it arrives.
    Active,
}

pub struct InterceptionStage {
    /// Side the frames are read from.
    source: Side,
    state: StageState,
    pending: VecDeque<Bytes>,
    codec: StompCodec,
    buffer: BytesMut,
    shared: Arc<Shared>,
    output: Arc<ChannelWriter>,
}

impl InterceptionStage {
    pub(crate) fn new(source: Side, shared: Arc<Shared>, output: Arc<ChannelWriter>) -> Self {
        Self {
            source,
            state: StageState::Buffering,
            pending: VecDeque::new(),
            codec: StompCodec::new(),
            buffer: BytesMut::new(),
            shared,
            output,
        }
    }

    /// Drives the stage until its input ends, the proxy shuts down, or the
    /// start signal is abandoned.
    pub(crate) async fn run(mut self, mut input: mpsc::Receiver<Bytes>, mut start: oneshot::Receiver<()>) {
        loop {
            match self.state {
                StageState::Buffering => {
                    tokio::select! {
                        signal = &mut start => {
                            if signal.is_err() {
                                debug!("{} stage abandoned before start", self.source);
                                return;
                            }
                            if !self.activate().await {
                                return;
                            }
                        }
                        chunk = input.recv() => match chunk {
                            Some(chunk) => {
                                trace!("{} stage buffering {} bytes", self.source, chunk.len());
                                self.pending.push_back(chunk);
                            }
                            None => return,
                        }
                    }
                }
                StageState::Active => match input.recv().await {
                    Some(chunk) => {
                        if !self.process_chunk(chunk).await {
                            return;
                        }
                    }
                    None => return,
                },
            }
        }
    }

    /// Switches to active and replays everything buffered so far.
    async fn activate(&mut self) -> bool {
        self.state = StageState::Active;
        debug!(
            "{} stage started with {} buffered chunks",
            self.source,
            self.pending.len()
        );
        while let Some(chunk) = self.pending.pop_front() {
            if !self.process_chunk(chunk).await {
                return false;
            }
        }
        true
    }

    /// Returns false once the stage must stop.
    async fn process_chunk(&mut self, chunk: Bytes) -> bool {
        self.buffer.extend_from_slice(&chunk);
        let (frames, error) = self.codec.decode_all(&mut self.buffer);
        if let Some(e) = error {
            warn!("{} stage dropping undecodable input: {}", self.source, e);
            self.buffer.clear();
        }

        if frames.is_empty() {
            return true;
        }

        let shared = &self.shared;
        let outcomes = join_all(frames.into_iter().map(|frame| shared.dispatch(frame))).await;

        for outcome in outcomes {
            match outcome.result {
                Err(error) => {
                    self.shared.send_error(&outcome.original, &error).await;
                    if error.fatal {
                        warn!(
                            "fatal error handling {} from {}: {}",
                            outcome.original.command, self.source, error
                        );
                        self.shared.spawn_kill(error);
                        return false;
                    }
                }
                Ok(Some(frame)) => {
                    if let Err(e) = self.output.write(&to_wire(&frame)).await {
                        debug!("{} stage cannot forward to {}: {}", self.source, self.output.side(), e);
                        return false;
                    }
                }
                Ok(None) => {
                    trace!("{} frame from {} suppressed by handler", outcome.original.command, self.source);
                }
            }
        }
        true
    }
}
