//! Per-connection transfer queue.
//!
//! Turns an ordered backlog of admitted downloads into an outbound
//! packet stream. Jobs are served strictly FIFO; admission reserves an
//! entry's full size against both the per-connection ceiling and the
//! process-wide byte budget, and both reservations are released when
//! the job leaves the queue, on every path.

use crate::budget::{ByteBudget, ByteReservation};
use crate::error::ServerError;
use depot_core::{safe_filename, ContentEntry, ContentStore};
use depot_protocol::{
    content_chunk, content_terminator, content_unavailable, Packet, ServerContentHeader,
};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::time::{timeout, timeout_at, Instant};

/// Why a transfer was not admitted.
#[derive(Debug, Error)]
pub enum AdmitError {
    #[error("connection queue ceiling exceeded: {queued} + {requested} > {limit} bytes")]
    ConnectionCeiling {
        queued: u64,
        requested: u64,
        limit: u64,
    },

    #[error("global in-flight byte ceiling exceeded: {requested} bytes unavailable")]
    GlobalCeiling { requested: u64 },
}

/// One queued outbound response.
enum TransferJob {
    /// An admitted download. The reservation rides along so the global
    /// budget is released exactly when the job is destroyed.
    Content {
        entry: Arc<ContentEntry>,
        _reservation: ByteReservation,
    },
    /// Explicit "nothing to transfer" for a requested id (unknown, or
    /// declined by admission).
    Unavailable { content_id: u32 },
}

impl TransferJob {
    fn size(&self) -> u64 {
        match self {
            TransferJob::Content { entry, .. } => entry.filesize,
            TransferJob::Unavailable { .. } => 0,
        }
    }
}

/// Timeouts and sizing applied while draining.
#[derive(Debug, Clone, Copy)]
pub struct TransferLimits {
    pub chunk_size: usize,
    pub write_timeout: Duration,
    pub backend_timeout: Duration,
    /// Absolute connection deadline.
    pub deadline: Instant,
}

/// FIFO queue of pending responses for one connection.
pub struct TransferQueue {
    jobs: VecDeque<TransferJob>,
    queued_bytes: u64,
    max_queue_bytes: u64,
    budget: Arc<ByteBudget>,
}

impl TransferQueue {
    pub fn new(max_queue_bytes: u64, budget: Arc<ByteBudget>) -> Self {
        Self {
            jobs: VecDeque::new(),
            queued_bytes: 0,
            max_queue_bytes,
            budget,
        }
    }

    /// Admits a download, reserving its size against both ceilings.
    pub fn try_admit(&mut self, entry: Arc<ContentEntry>) -> Result<(), AdmitError> {
        let requested = entry.filesize;
        if self.queued_bytes + requested > self.max_queue_bytes {
            return Err(AdmitError::ConnectionCeiling {
                queued: self.queued_bytes,
                requested,
                limit: self.max_queue_bytes,
            });
        }
        let reservation = self
            .budget
            .try_reserve(requested)
            .ok_or(AdmitError::GlobalCeiling { requested })?;

        self.queued_bytes += requested;
        self.jobs.push_back(TransferJob::Content {
            entry,
            _reservation: reservation,
        });
        Ok(())
    }

    /// Queues the explicit not-available indication for a content id.
    pub fn push_unavailable(&mut self, content_id: u32) {
        self.jobs.push_back(TransferJob::Unavailable { content_id });
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Bytes currently reserved by this connection.
    pub fn queued_bytes(&self) -> u64 {
        self.queued_bytes
    }

    fn pop(&mut self) -> Option<TransferJob> {
        let job = self.jobs.pop_front()?;
        self.queued_bytes -= job.size();
        Some(job)
    }

    /// Sends every queued job, strictly in admission order.
    ///
    /// A job that fails before its first payload byte is abandoned with
    /// the not-available indication and the queue proceeds. A failure
    /// after payload has been written cannot be signalled in-band (the
    /// client counts bytes), so it propagates and tears the connection
    /// down; dropping the queue releases the remaining reservations.
    pub async fn drain<W>(
        &mut self,
        store: &dyn ContentStore,
        writer: &mut W,
        limits: &TransferLimits,
    ) -> Result<(), ServerError>
    where
        W: AsyncWrite + Unpin + Send,
    {
        while let Some(job) = self.pop() {
            match job {
                TransferJob::Unavailable { content_id } => {
                    send_unavailable(writer, content_id, limits).await?;
                }
                TransferJob::Content {
                    entry,
                    _reservation,
                } => {
                    send_entry(store, writer, &entry, limits).await?;
                }
            }
        }
        Ok(())
    }
}

async fn send_entry<W>(
    store: &dyn ContentStore,
    writer: &mut W,
    entry: &ContentEntry,
    limits: &TransferLimits,
) -> Result<(), ServerError>
where
    W: AsyncWrite + Unpin + Send,
{
    let mut reader = match timeout(limits.backend_timeout, store.open(entry)).await {
        Ok(Ok(reader)) => reader,
        Ok(Err(e)) => {
            tracing::warn!(
                "Cannot open blob for {} ({}): {}",
                entry.content_id,
                entry.unique_id,
                e
            );
            return send_unavailable(writer, entry.content_id, limits).await;
        }
        Err(_) => {
            tracing::warn!("Opening blob for {} timed out", entry.content_id);
            return send_unavailable(writer, entry.content_id, limits).await;
        }
    };

    let header = ServerContentHeader {
        content_type: entry.content_type,
        content_id: entry.content_id,
        filesize: u32::try_from(entry.filesize).unwrap_or(u32::MAX),
        filename: safe_filename(entry),
    };
    write_packet(writer, &header.encode()?, limits).await?;

    // A chunk payload can never exceed what fits one outbound frame.
    let chunk_size = limits.chunk_size.min(depot_protocol::MAX_CHUNK_SIZE);
    let mut bytes_sent = 0u64;
    loop {
        let chunk = match timeout(limits.backend_timeout, reader.read_chunk(chunk_size)).await {
            Ok(Ok(chunk)) => chunk,
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => return Err(ServerError::BackendTimeout),
        };
        if chunk.is_empty() {
            break;
        }
        bytes_sent += chunk.len() as u64;
        write_packet(writer, &content_chunk(chunk), limits).await?;
    }

    write_packet(writer, &content_terminator(), limits).await?;
    tracing::debug!(
        "Transfer of {} complete: {} bytes",
        entry.content_id,
        bytes_sent
    );
    Ok(())
}

async fn send_unavailable<W>(
    writer: &mut W,
    content_id: u32,
    limits: &TransferLimits,
) -> Result<(), ServerError>
where
    W: AsyncWrite + Unpin + Send,
{
    write_packet(writer, &content_unavailable(content_id), limits).await?;
    write_packet(writer, &content_terminator(), limits).await
}

/// Writes one packet, bounded by the write timeout and the connection
/// deadline. Backpressure from a slow client surfaces here: when the
/// socket buffer is saturated, `write_all` suspends and no further
/// chunk is produced until it drains.
pub(crate) async fn write_packet<W>(
    writer: &mut W,
    packet: &Packet,
    limits: &TransferLimits,
) -> Result<(), ServerError>
where
    W: AsyncWrite + Unpin + Send,
{
    let buf = packet.encode()?;
    match timeout_at(limits.deadline, timeout(limits.write_timeout, writer.write_all(&buf))).await {
        Ok(Ok(Ok(()))) => Ok(()),
        Ok(Ok(Err(e))) => Err(ServerError::Io(e)),
        Ok(Err(_)) => Err(ServerError::WriteTimeout),
        Err(_) => Err(ServerError::LifetimeExceeded),
    }
}
