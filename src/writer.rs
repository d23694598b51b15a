//! Dedicated writer task for outbound messages.
//!
//! Every connection owns one writer task that receives messages via an
//! mpsc channel, serializes them with the message factory, frames them and
//! writes ready messages in batches.
//!
//! # Architecture
//!
//! ```text
//! Listener 1 ─┐
//! Heartbeat  ─┼─► mpsc::Sender<OutboundMessage> ─► Writer Task ─► Socket
//! send()     ─┘
//! ```
//!
//! # Benefits
//!
//! - **No lock contention**: Channel-based, not mutex-based
//! - **Batching**: Multiple frames can be written in a single syscall via writev
//! - **Backpressure**: The queue is bounded by `max_pending_writes`; a full
//!   queue refuses sends with [`ConnectorError::NotWritable`]

use std::io::IoSlice;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::connection::{closing, ConnectionState};
use crate::error::{ConnectorError, Result};
use crate::idle::IdleMonitor;
use crate::iso::MessageFactory;
use crate::logging::{Direction, MessageLogger};
use crate::protocol::{EncodedFrame, FrameCodec};

/// Default maximum queued messages before sends are refused.
pub const DEFAULT_MAX_PENDING_WRITES: usize = 1024;

/// Maximum frames to batch in a single write operation.
const MAX_BATCH_SIZE: usize = 64;

/// A message queued for writing, with the sender's completion slot.
#[derive(Debug)]
pub(crate) struct OutboundMessage<M> {
    pub(crate) message: M,
    done: oneshot::Sender<Result<()>>,
}

impl<M> OutboundMessage<M> {
    fn complete(self, result: Result<()>) {
        // Sender may have dropped its completion; that is fine.
        let _ = self.done.send(result);
    }
}

/// Outcome of an asynchronous write.
///
/// Dropping it does not cancel the write.
#[derive(Debug)]
pub struct WriteCompletion {
    rx: oneshot::Receiver<Result<()>>,
}

impl WriteCompletion {
    /// Wait until the message was written to the socket.
    pub async fn wait(self) -> Result<()> {
        self.rx.await.unwrap_or(Err(ConnectorError::ConnectionClosed))
    }

    /// Like [`wait`](Self::wait), giving up after `timeout`.
    pub async fn wait_timeout(self, timeout: Duration) -> Result<()> {
        tokio::time::timeout(timeout, self.wait())
            .await
            .unwrap_or(Err(ConnectorError::Timeout))
    }
}

/// Configuration for the writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriterConfig {
    /// Queue bound: messages waiting for the writer task before sends
    /// are refused.
    pub max_pending_writes: usize,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            max_pending_writes: DEFAULT_MAX_PENDING_WRITES,
        }
    }
}

/// Handle for queueing messages on the writer task.
///
/// Cheaply cloneable; all clones feed the same socket.
pub struct WriterHandle<M> {
    tx: mpsc::Sender<OutboundMessage<M>>,
    /// Accepted and not yet written, including the batch in flight.
    pending: Arc<AtomicUsize>,
}

impl<M> Clone for WriterHandle<M> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            pending: self.pending.clone(),
        }
    }
}

impl<M> std::fmt::Debug for WriterHandle<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriterHandle")
            .field("pending", &self.pending_count())
            .field("max_pending", &self.tx.max_capacity())
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

impl<M> WriterHandle<M> {
    fn new(tx: mpsc::Sender<OutboundMessage<M>>, pending: Arc<AtomicUsize>) -> Self {
        Self { tx, pending }
    }

    /// Queue a message without waiting.
    ///
    /// Returns `Err(NotWritable)` immediately if the queue is full and
    /// `Err(ConnectionClosed)` if the writer task is gone.
    pub fn try_send(&self, message: M) -> Result<WriteCompletion> {
        if self.tx.is_closed() {
            return Err(ConnectorError::ConnectionClosed);
        }

        // Count before queueing so the writer never releases ahead of us
        self.pending.fetch_add(1, Ordering::AcqRel);
        let (done, rx) = oneshot::channel();
        self.tx
            .try_send(OutboundMessage { message, done })
            .map_err(|e| {
                self.pending.fetch_sub(1, Ordering::AcqRel);
                match e {
                    mpsc::error::TrySendError::Full(_) => ConnectorError::NotWritable,
                    mpsc::error::TrySendError::Closed(_) => ConnectorError::ConnectionClosed,
                }
            })?;
        Ok(WriteCompletion { rx })
    }

    /// Check if the queue is at its limit.
    #[inline]
    pub fn is_backpressure_active(&self) -> bool {
        self.tx.capacity() == 0
    }

    /// Messages accepted but not yet written to the socket.
    #[inline]
    pub fn pending_count(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Whether the writer task has stopped.
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Handle whose messages are never written, only collected.
#[cfg(test)]
pub(crate) fn test_channel<M>(capacity: usize) -> (WriterHandle<M>, mpsc::Receiver<OutboundMessage<M>>) {
    let (tx, rx) = mpsc::channel(capacity);
    (WriterHandle::new(tx, Arc::default()), rx)
}

/// Everything the writer task needs besides the socket.
pub(crate) struct WriterContext<F> {
    pub(crate) connection_id: u64,
    pub(crate) factory: Arc<F>,
    pub(crate) codec: FrameCodec,
    pub(crate) idle: Arc<IdleMonitor>,
    pub(crate) logger: Option<Arc<MessageLogger>>,
}

/// Spawn the writer task and return a handle for queueing messages.
///
/// The task ends when `shutdown` reports a closing state (after writing
/// whatever was already queued), when every handle is dropped, or on the
/// first I/O error. It shuts down the write half of the socket on a clean
/// exit.
pub(crate) fn spawn_writer_task<F, W>(
    writer: W,
    ctx: WriterContext<F>,
    config: &WriterConfig,
    shutdown: watch::Receiver<ConnectionState>,
) -> (WriterHandle<F::Message>, JoinHandle<Result<()>>)
where
    F: MessageFactory,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(config.max_pending_writes);
    let pending = Arc::new(AtomicUsize::new(0));

    let handle = WriterHandle::new(tx, pending.clone());
    let task = tokio::spawn(writer_loop(rx, writer, ctx, pending, shutdown));

    (handle, task)
}

/// Main writer loop - receives messages and writes them to the socket.
async fn writer_loop<F, W>(
    mut rx: mpsc::Receiver<OutboundMessage<F::Message>>,
    mut writer: W,
    ctx: WriterContext<F>,
    pending: Arc<AtomicUsize>,
    mut shutdown: watch::Receiver<ConnectionState>,
) -> Result<()>
where
    F: MessageFactory,
    W: AsyncWrite + Unpin,
{
    loop {
        let first = tokio::select! {
            biased;
            msg = rx.recv() => match msg {
                Some(m) => m,
                // All handles dropped, clean shutdown
                None => break,
            },
            _ = closing(&mut shutdown) => {
                rx.close();
                let mut rest = Vec::new();
                while let Ok(m) = rx.try_recv() {
                    rest.push(m);
                }
                let count = rest.len();
                let result = write_messages(&mut writer, &ctx, rest).await;
                pending.fetch_sub(count, Ordering::AcqRel);
                result?;
                break;
            }
        };

        // Collect additional ready messages (non-blocking)
        let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);
        batch.push(first);
        while batch.len() < MAX_BATCH_SIZE {
            match rx.try_recv() {
                Ok(m) => batch.push(m),
                Err(_) => break,
            }
        }

        let count = batch.len();
        let result = write_messages(&mut writer, &ctx, batch).await;
        pending.fetch_sub(count, Ordering::AcqRel);
        result?;
    }

    let _ = writer.shutdown().await;
    Ok(())
}

/// Serialize, frame and write a batch, then complete every message.
///
/// Messages that fail to serialize or frame are completed with their error
/// and skipped; the connection stays usable. An I/O error fails the whole
/// batch and is returned.
async fn write_messages<F, W>(
    writer: &mut W,
    ctx: &WriterContext<F>,
    batch: Vec<OutboundMessage<F::Message>>,
) -> Result<()>
where
    F: MessageFactory,
    W: AsyncWrite + Unpin,
{
    let mut frames = Vec::with_capacity(batch.len());
    let mut written = Vec::with_capacity(batch.len());

    for outbound in batch {
        match ctx
            .factory
            .serialize(&outbound.message)
            .and_then(|body| ctx.codec.encode(body))
        {
            Ok(frame) => {
                frames.push(frame);
                written.push(outbound);
            }
            Err(e) => {
                tracing::warn!(connection = ctx.connection_id, "Dropping outbound message: {}", e);
                outbound.complete(Err(e));
            }
        }
    }

    if frames.is_empty() {
        return Ok(());
    }

    if let Err(e) = write_batch(writer, &frames).await {
        for outbound in written {
            outbound.complete(Err(ConnectorError::ConnectionClosed));
        }
        return Err(e);
    }

    ctx.idle.record_activity();
    for outbound in written {
        if let Some(logger) = &ctx.logger {
            logger.log(ctx.connection_id, Direction::Outbound, &outbound.message);
        }
        outbound.complete(Ok(()));
    }
    Ok(())
}

/// Write a batch of frames using scatter/gather I/O (write_vectored).
async fn write_batch<W>(writer: &mut W, batch: &[EncodedFrame]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if batch.is_empty() {
        return Ok(());
    }

    let total_size: usize = batch.iter().map(EncodedFrame::size).sum();
    let mut total_written = 0;

    while total_written < total_size {
        let slices = build_remaining_slices(batch, total_written);
        if slices.is_empty() {
            break;
        }

        let written = writer.write_vectored(&slices).await?;
        if written == 0 {
            return Err(ConnectorError::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "write_vectored returned 0",
            )));
        }
        total_written += written;
    }

    writer.flush().await?;
    Ok(())
}

/// Build IoSlice array for the data remaining after `skip_bytes`.
fn build_remaining_slices(batch: &[EncodedFrame], skip_bytes: usize) -> Vec<IoSlice<'_>> {
    let mut slices = Vec::with_capacity(batch.len() * 2);
    let mut offset = 0;

    for frame in batch {
        for part in [&frame.prefix, &frame.body] {
            let start = offset;
            let end = offset + part.len();
            if !part.is_empty() && skip_bytes < end {
                let start_in_part = skip_bytes.saturating_sub(start);
                slices.push(IoSlice::new(&part[start_in_part..]));
            }
            offset = end;
        }
    }

    slices
}
