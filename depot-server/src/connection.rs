//! Per-connection state machine.
//!
//! One connection owns one [`TransferQueue`] and runs a strict
//! read → dispatch → drain cycle: requests are processed one at a time,
//! at most one backend call is outstanding, and response packets leave
//! in the exact order their triggering requests were accepted.

use crate::budget::ByteBudget;
use crate::config::Config;
use crate::error::ServerError;
use crate::transfer::{write_packet, TransferLimits, TransferQueue};
use depot_core::{ContentEntry, ContentIndex, ContentStore, IndexError, ListFilter};
use depot_protocol::{info_sentinel, ClientRequest, ContentType, Decoder, UniqueId};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{timeout, timeout_at, Instant};
use uuid::Uuid;

/// Connection states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Waiting for the next request frame.
    AwaitingRequest,
    /// Processing one request, including draining its transfers.
    Dispatching,
    /// Terminal; the socket is being closed.
    Closing,
}

/// One client connection.
pub struct Connection<S> {
    stream: S,
    addr: SocketAddr,
    session_id: Uuid,
    state: ConnState,
    decoder: Decoder,
    queue: TransferQueue,
    index: Arc<dyn ContentIndex>,
    store: Arc<dyn ContentStore>,
    config: Arc<Config>,
    bootstrap_unique_id: Option<UniqueId>,
    /// Absolute lifetime deadline, fixed at accept time.
    deadline: Instant,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(
        stream: S,
        addr: SocketAddr,
        index: Arc<dyn ContentIndex>,
        store: Arc<dyn ContentStore>,
        config: Arc<Config>,
        budget: Arc<ByteBudget>,
        bootstrap_unique_id: Option<UniqueId>,
    ) -> Self {
        let deadline = Instant::now() + config.network.max_lifetime();
        Self {
            stream,
            addr,
            session_id: Uuid::new_v4(),
            state: ConnState::AwaitingRequest,
            decoder: Decoder::with_max_frame_size(config.network.max_frame_size),
            queue: TransferQueue::new(
                config.transfer.max_queue_bytes_per_connection,
                budget,
            ),
            index,
            store,
            config,
            bootstrap_unique_id,
            deadline,
        }
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    /// Runs the connection to completion.
    ///
    /// Returns `Ok` on a clean close (client disconnect or idle timeout)
    /// and `Err` when the connection is torn down; either way the socket
    /// is shut down and, via drop, every queued reservation is released.
    pub async fn run(&mut self) -> Result<(), ServerError> {
        tracing::info!(
            "[{}] Client connected (session {})",
            self.addr,
            self.session_id
        );
        let result = self.serve().await;
        self.state = ConnState::Closing;
        // Fully-formed packets are already on the wire; just say goodbye.
        let _ = self.stream.shutdown().await;
        result
    }

    async fn serve(&mut self) -> Result<(), ServerError> {
        let mut buf = [0u8; 4096];
        loop {
            let idle = self.config.network.idle_timeout();
            let read = timeout_at(self.deadline, timeout(idle, self.stream.read(&mut buf))).await;
            let n = match read {
                Ok(Ok(Ok(0))) => {
                    tracing::debug!("[{}] Connection closed by client", self.addr);
                    return Ok(());
                }
                Ok(Ok(Ok(n))) => n,
                Ok(Ok(Err(e))) => return Err(ServerError::Io(e)),
                Ok(Err(_)) => {
                    tracing::debug!("[{}] Idle timeout", self.addr);
                    return Ok(());
                }
                Err(_) => return Err(ServerError::LifetimeExceeded),
            };

            self.decoder.extend(&buf[..n]);
            while let Some(request) = self.decoder.decode_request()? {
                self.state = ConnState::Dispatching;
                self.dispatch(request).await?;
                self.state = ConnState::AwaitingRequest;
            }
        }
    }

    async fn dispatch(&mut self, request: ClientRequest) -> Result<(), ServerError> {
        match request {
            ClientRequest::InfoList {
                content_type,
                client_version,
            } => {
                tracing::debug!(
                    "[{}] Listing {:?} for client {}",
                    self.addr,
                    content_type,
                    client_version
                );
                let filter = ListFilter {
                    content_type,
                    client_version: Some(client_version),
                };
                let mut entries = self.index_call("lookup", self.index.lookup(filter)).await;
                self.pin_bootstrap(content_type, &mut entries).await;
                self.send_listing(&entries).await
            }
            ClientRequest::InfoId { content_ids } => {
                let mut entries = Vec::new();
                for content_id in content_ids {
                    if let Some(entry) = self
                        .index_call("resolve", self.index.by_content_id(content_id))
                        .await
                    {
                        entries.push(entry);
                    }
                }
                self.send_listing(&entries).await
            }
            ClientRequest::InfoExtid { entries: refs } => {
                let mut entries = Vec::new();
                for r in refs {
                    if let Some(entry) = self
                        .index_call(
                            "resolve",
                            self.index.by_unique_id(r.content_type, r.unique_id),
                        )
                        .await
                    {
                        entries.push(entry);
                    }
                }
                self.send_listing(&entries).await
            }
            ClientRequest::InfoExtidMd5 { entries: refs } => {
                let mut entries = Vec::new();
                for r in refs {
                    if let Some(entry) = self
                        .index_call(
                            "resolve",
                            self.index
                                .by_unique_id_md5(r.content_type, r.unique_id, r.md5sum),
                        )
                        .await
                    {
                        entries.push(entry);
                    }
                }
                self.send_listing(&entries).await
            }
            ClientRequest::Content { content_ids } => {
                for content_id in content_ids {
                    match self
                        .index_call("resolve", self.index.by_content_id(content_id))
                        .await
                    {
                        Some(entry) => {
                            if let Err(e) = self.queue.try_admit(entry.clone()) {
                                tracing::warn!(
                                    "[{}] Transfer of {} declined: {}",
                                    self.addr,
                                    entry.content_id,
                                    e
                                );
                                self.queue.push_unavailable(content_id);
                            }
                        }
                        None => {
                            tracing::debug!(
                                "[{}] Requested content {:#010x} not found",
                                self.addr,
                                content_id
                            );
                            self.queue.push_unavailable(content_id);
                        }
                    }
                }

                let limits = self.transfer_limits();
                self.queue
                    .drain(self.store.as_ref(), &mut self.stream, &limits)
                    .await
            }
        }
    }

    /// Moves the configured bootstrap base-graphics package to the front
    /// of a listing, so a bare client picks it up first.
    async fn pin_bootstrap(
        &self,
        content_type: ContentType,
        entries: &mut Vec<Arc<ContentEntry>>,
    ) {
        if content_type != ContentType::BaseGraphics {
            return;
        }
        let Some(unique_id) = self.bootstrap_unique_id else {
            return;
        };
        match self
            .index_call("resolve", self.index.by_unique_id(content_type, unique_id))
            .await
        {
            Some(bootstrap) => {
                entries.retain(|e| e.content_id != bootstrap.content_id);
                entries.insert(0, bootstrap);
            }
            None => {
                tracing::error!("Bootstrap package with unique-id {} not found", unique_id);
            }
        }
    }

    async fn send_listing(&mut self, entries: &[Arc<ContentEntry>]) -> Result<(), ServerError> {
        let limits = self.transfer_limits();
        for entry in entries {
            let packet = entry.to_server_info().encode()?;
            write_packet(&mut self.stream, &packet, &limits).await?;
        }
        write_packet(&mut self.stream, &info_sentinel(), &limits).await
    }

    /// Runs one index call under the backend timeout. A failed or timed
    /// out call degrades to "no result", so a flaky index costs one
    /// response rather than the connection.
    async fn index_call<R, F>(&self, what: &str, call: F) -> R
    where
        R: Default,
        F: Future<Output = Result<R, IndexError>> + Send,
    {
        match timeout(self.config.network.backend_timeout(), call).await {
            Ok(Ok(value)) => value,
            Ok(Err(e)) => {
                tracing::warn!("[{}] Index {} failed: {}", self.addr, what, e);
                R::default()
            }
            Err(_) => {
                tracing::warn!("[{}] Index {} timed out", self.addr, what);
                R::default()
            }
        }
    }

    fn transfer_limits(&self) -> TransferLimits {
        TransferLimits {
            chunk_size: self.config.transfer.chunk_size,
            write_timeout: self.config.network.write_timeout(),
            backend_timeout: self.config.network.backend_timeout(),
            deadline: self.deadline,
        }
    }
}
