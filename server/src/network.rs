//! Server network layer: TCP listener and per-connection read loops

use crate::config::ServerConfig;
use crate::connection::{ConnectionHandle, ConnectionId, OutboundQueue};
use crate::router::Router;
use log::{debug, error, info, warn};
use shared::{read_frame, Envelope, FrameError};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// How long a closing connection may spend writing out queued replies
pub const WRITER_FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

/// Why a connection's read loop ended
#[derive(Debug)]
pub enum Disconnect {
    Closed,
    Transport(FrameError),
    Decode(shared::ProtocolError),
}

/// Accepts connections and gives each one its own task
pub struct Server {
    listener: TcpListener,
    router: Arc<Router>,
    max_frame_size: usize,
    next_connection_id: AtomicU64,
}

impl Server {
    pub async fn bind(config: &ServerConfig) -> Result<Self, Box<dyn std::error::Error>> {
        Self::with_router(config, Arc::new(Router::new())).await
    }

    pub async fn with_router(
        config: &ServerConfig,
        router: Arc<Router>,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let listener = TcpListener::bind(config.address()).await?;
        info!("Server listening on {}", listener.local_addr()?);

        Ok(Server {
            listener,
            router,
            max_frame_size: config.max_frame_size,
            next_connection_id: AtomicU64::new(1),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn router(&self) -> Arc<Router> {
        Arc::clone(&self.router)
    }

    /// Accept loop; runs until the task is dropped
    pub async fn run(self) {
        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    let id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
                    let router = Arc::clone(&self.router);
                    let max_frame_size = self.max_frame_size;
                    tokio::spawn(async move {
                        handle_connection(stream, peer, id, router, max_frame_size).await;
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    id: ConnectionId,
    router: Arc<Router>,
    max_frame_size: usize,
) {
    info!("Connection {} accepted from {}", id, peer);
    if let Err(e) = stream.set_nodelay(true) {
        debug!("Could not disable Nagle for {}: {}", peer, e);
    }

    let (mut reader, writer) = stream.into_split();
    let (handle, outbound) = ConnectionHandle::channel(id, peer);
    let (close_tx, close_rx) = oneshot::channel();
    let mut writer_task = spawn_writer(writer, outbound, close_rx, id, peer);

    let reason = read_loop(&mut reader, &handle, &router, max_frame_size).await;
    match &reason {
        Disconnect::Closed => info!("Connection {} from {} closed", id, peer),
        Disconnect::Transport(e) => warn!("Connection {} from {} dropped: {}", id, peer, e),
        Disconnect::Decode(e) => warn!("Connection {} from {} aborted: {}", id, peer, e),
    }

    // Replies to everything routed so far are still queued
    let _ = close_tx.send(());
    if tokio::time::timeout(WRITER_FLUSH_TIMEOUT, &mut writer_task)
        .await
        .is_err()
    {
        warn!("Connection {} did not drain its replies in time", id);
        writer_task.abort();
    }
}

/// Reads, decodes and routes frames in arrival order until the stream ends
/// or delivers something that is not an envelope
pub async fn read_loop<R>(
    reader: &mut R,
    handle: &ConnectionHandle,
    router: &Router,
    max_frame_size: usize,
) -> Disconnect
where
    R: AsyncRead + Unpin,
{
    loop {
        let payload = match read_frame(reader, max_frame_size).await {
            Ok(payload) => payload,
            Err(FrameError::ConnectionClosed) => return Disconnect::Closed,
            Err(e) => return Disconnect::Transport(e),
        };

        let envelope = match Envelope::decode(&payload) {
            Ok(envelope) => envelope,
            Err(e) => return Disconnect::Decode(e),
        };

        router.route(envelope, handle).await;
    }
}

/// Drains the connection's outbound queue onto the socket.
///
/// Once `closing` fires, whatever is already queued is written out and the
/// write side is shut down; frames queued after that are refused.
fn spawn_writer<W>(
    mut writer: W,
    mut outbound: OutboundQueue,
    mut closing: oneshot::Receiver<()>,
    id: ConnectionId,
    peer: SocketAddr,
) -> JoinHandle<()>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            let frame = tokio::select! {
                biased;
                frame = outbound.recv() => frame,
                _ = &mut closing => break,
            };
            let Some(frame) = frame else {
                break;
            };
            if let Err(e) = writer.write_all(&frame).await {
                warn!("Failed to write to connection {} ({}): {}", id, peer, e);
                return;
            }
        }

        outbound.close();
        while let Ok(frame) = outbound.try_recv() {
            if let Err(e) = writer.write_all(&frame).await {
                warn!("Failed to flush connection {} ({}): {}", id, peer, e);
                return;
            }
        }
        if let Err(e) = writer.shutdown().await {
            debug!("Shutdown of connection {} failed: {}", id, e);
        }
        debug!("Writer for connection {} finished", id);
    })
}
