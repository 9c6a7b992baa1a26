//! TCP server implementation.

use crate::budget::ByteBudget;
use crate::config::Config;
use crate::connection::Connection;
use crate::error::ServerError;
use depot_core::{ContentIndex, ContentStore};
use depot_protocol::UniqueId;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, Semaphore};

/// Server statistics.
#[derive(Debug, Default)]
pub struct ServerStats {
    pub connections_total: AtomicU64,
    pub connections_active: AtomicU64,
    pub connections_refused: AtomicU64,
    pub errors_total: AtomicU64,
}

/// The content server: accepts sockets and runs one [`Connection`] task
/// per client.
pub struct Server {
    config: Arc<Config>,
    index: Arc<dyn ContentIndex>,
    store: Arc<dyn ContentStore>,
    budget: Arc<ByteBudget>,
    permits: Arc<Semaphore>,
    stats: Arc<ServerStats>,
    shutdown: broadcast::Sender<()>,
    bootstrap_unique_id: Option<UniqueId>,
}

impl Server {
    /// Creates a new server over the given backends.
    pub fn new(
        config: Config,
        index: Arc<dyn ContentIndex>,
        store: Arc<dyn ContentStore>,
    ) -> Result<Self, ServerError> {
        let bootstrap_unique_id = config
            .index
            .bootstrap_unique_id
            .as_deref()
            .map(|s| {
                UniqueId::from_hex(s)
                    .ok_or_else(|| ServerError::Config(format!("invalid bootstrap unique-id {s:?}")))
            })
            .transpose()?;

        let (shutdown, _) = broadcast::channel(1);
        Ok(Self {
            budget: Arc::new(ByteBudget::new(config.transfer.max_inflight_bytes)),
            permits: Arc::new(Semaphore::new(config.network.max_connections)),
            config: Arc::new(config),
            index,
            store,
            stats: Arc::new(ServerStats::default()),
            shutdown,
            bootstrap_unique_id,
        })
    }

    /// Binds the configured address and serves until shutdown.
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = TcpListener::bind(self.config.network.bind_addr).await?;
        tracing::info!("Content server listening on {}", listener.local_addr()?);
        self.serve(listener).await
    }

    /// Serves connections from an already-bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        let mut shutdown_rx = self.shutdown.subscribe();
        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((socket, addr)) => self.accept(socket, addr),
                        Err(e) => tracing::error!("Accept error: {}", e),
                    }
                }
                _ = shutdown_rx.recv() => {
                    tracing::info!("Server shutting down");
                    break;
                }
            }
        }
        Ok(())
    }

    fn accept(&self, socket: TcpStream, addr: SocketAddr) {
        // Refuse at the transport level once the connection ceiling is
        // reached; nothing is queued.
        let permit = match self.permits.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                tracing::warn!("Connection limit reached, refusing {}", addr);
                self.stats.connections_refused.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

        self.stats.connections_total.fetch_add(1, Ordering::Relaxed);
        self.stats.connections_active.fetch_add(1, Ordering::Relaxed);

        let mut conn = Connection::new(
            socket,
            addr,
            self.index.clone(),
            self.store.clone(),
            self.config.clone(),
            self.budget.clone(),
            self.bootstrap_unique_id,
        );
        let stats = self.stats.clone();
        let mut shutdown_rx = self.shutdown.subscribe();

        tokio::spawn(async move {
            let _permit = permit;
            tokio::select! {
                result = conn.run() => {
                    if let Err(e) = result {
                        tracing::debug!("[{}] Connection error: {}", addr, e);
                        stats.errors_total.fetch_add(1, Ordering::Relaxed);
                    }
                }
                _ = shutdown_rx.recv() => {
                    // Dropping the connection future cancels any
                    // in-flight backend read and releases its
                    // reservations with it.
                    tracing::debug!("[{}] Dropped on shutdown", addr);
                }
            }
            stats.connections_active.fetch_sub(1, Ordering::Relaxed);
            tracing::info!("Client disconnected: {}", addr);
        });
    }

    /// Initiates server shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(());
    }

    /// Returns server statistics.
    pub fn stats(&self) -> &ServerStats {
        &self.stats
    }

    /// Bytes currently admitted for transfer across all connections.
    pub fn in_flight_bytes(&self) -> u64 {
        self.budget.in_flight()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{entry, read_packets, MemIndex, MemStore};
    use depot_protocol::{ClientRequest, ContentType, ServerInfo};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    async fn start_server(config: Config, entries: Vec<depot_core::ContentEntry>, store: MemStore)
        -> (Arc<Server>, SocketAddr) {
        let server = Arc::new(
            Server::new(config, Arc::new(MemIndex::new(entries)), Arc::new(store)).unwrap(),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let serve = server.clone();
        tokio::spawn(async move {
            serve.serve(listener).await.unwrap();
        });
        (server, addr)
    }

    #[tokio::test]
    async fn test_end_to_end_info_request() {
        let (server, addr) = start_server(
            Config::default(),
            vec![entry(42, ContentType::BaseGraphics, 5000)],
            MemStore::new(),
        )
        .await;

        let mut client = TcpStream::connect(addr).await.unwrap();
        let request = ClientRequest::InfoId {
            content_ids: vec![42],
        };
        client
            .write_all(&request.encode().unwrap().encode().unwrap())
            .await
            .unwrap();

        let packets = read_packets(&mut client, 2).await;
        let info = ServerInfo::decode(&packets[0]).unwrap().unwrap();
        assert_eq!(info.content_id, 42);
        assert!(packets[1].is_empty());

        assert_eq!(server.stats().connections_total.load(Ordering::Relaxed), 1);
        server.shutdown();
    }

    #[tokio::test]
    async fn test_connection_limit_refuses_excess() {
        let mut config = Config::default();
        config.network.max_connections = 1;
        let (server, addr) = start_server(config, vec![], MemStore::new()).await;

        // First connection holds the only permit.
        let first = TcpStream::connect(addr).await.unwrap();

        // The second is accepted by the OS but immediately closed by the
        // server: the next read sees EOF.
        let mut second = TcpStream::connect(addr).await.unwrap();
        let mut buf = [0u8; 1];
        loop {
            match second.read(&mut buf).await {
                Ok(0) => break,
                Ok(_) => panic!("refused connection produced data"),
                Err(_) => break,
            }
        }
        assert_eq!(
            server.stats().connections_refused.load(Ordering::Relaxed),
            1
        );

        drop(first);
        server.shutdown();
    }

    #[tokio::test]
    async fn test_shutdown_stops_serve_loop() {
        let server = Arc::new(
            Server::new(
                Config::default(),
                Arc::new(MemIndex::new(vec![])),
                Arc::new(MemStore::new()),
            )
            .unwrap(),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let serve = server.clone();
        let handle = tokio::spawn(async move { serve.serve(listener).await });

        server.shutdown();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_invalid_bootstrap_id_rejected() {
        let mut config = Config::default();
        config.index.bootstrap_unique_id = Some("not-hex".to_string());
        let result = Server::new(
            config,
            Arc::new(MemIndex::new(vec![])),
            Arc::new(MemStore::new()),
        );
        assert!(matches!(result, Err(ServerError::Config(_))));
    }

    #[tokio::test]
    async fn test_budget_returns_to_zero_after_transfers() {
        let (server, addr) = start_server(
            Config::default(),
            vec![entry(1, ContentType::NewGrf, 64)],
            MemStore::new().with_blob(1, vec![9; 64]),
        )
        .await;

        let mut client = TcpStream::connect(addr).await.unwrap();
        let request = ClientRequest::Content {
            content_ids: vec![1],
        };
        client
            .write_all(&request.encode().unwrap().encode().unwrap())
            .await
            .unwrap();

        let packets = read_packets(&mut client, 3).await;
        assert!(packets[2].is_empty());
        assert_eq!(server.in_flight_bytes(), 0);

        server.shutdown();
    }
}
