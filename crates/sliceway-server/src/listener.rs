//! Listener lifecycle: bind, accept, shut down.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use sliceway_http::Slice;
use tokio::net::TcpListener;
use tokio::sync::{Mutex, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::supervisor::ConnectionSupervisor;

/// Serves one [`Slice`] over HTTP/1.1.
///
/// `start` binds and spawns the accept loop; `stop` signals it through a
/// shutdown channel and waits until the listening socket is released and
/// every open connection has been torn down. Both serialize on one lock, so
/// a `stop` racing a `start` sees either nothing or a fully started server.
pub struct SliceServer {
    slice: Arc<dyn Slice>,
    config: Arc<ServerConfig>,
    state: Mutex<Option<Running>>,
}

struct Running {
    addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SliceServer {
    pub fn new(slice: impl Slice, config: ServerConfig) -> Self {
        Self {
            slice: Arc::new(slice),
            config: Arc::new(config),
            state: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Bind and start accepting. Returns the bound port, which differs from
    /// the configured one when that was `0`.
    pub async fn start(&self) -> ServerResult<u16> {
        let mut state = self.state.lock().await;
        if let Some(running) = state.as_ref() {
            return Err(ServerError::AlreadyRunning(running.addr));
        }

        let bind_addr = self.config.bind_addr();
        let listener = TcpListener::bind(&bind_addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: bind_addr.clone(),
                source,
            })?;
        let addr = listener.local_addr()?;

        let (shutdown, shutdown_rx) = watch::channel(false);
        let supervisor = ConnectionSupervisor::new(self.slice.clone(), self.config.clone());
        let task = tokio::spawn(accept_loop(listener, supervisor, shutdown_rx));

        info!(%addr, "slice server listening");
        *state = Some(Running {
            addr,
            shutdown,
            task,
        });
        Ok(addr.port())
    }

    /// Stop accepting and close every open connection. A no-op when the
    /// server is not running.
    pub async fn stop(&self) -> ServerResult<()> {
        let mut state = self.state.lock().await;
        let Some(running) = state.take() else {
            return Ok(());
        };

        let _ = running.shutdown.send(true);
        running.task.await?;
        info!(addr = %running.addr, "slice server stopped");
        Ok(())
    }

    /// Same as [`stop`](Self::stop); safe to call any number of times.
    pub async fn close(&self) -> ServerResult<()> {
        self.stop().await
    }

    /// The bound address while running.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.state.lock().await.as_ref().map(|running| running.addr)
    }
}

async fn accept_loop(
    listener: TcpListener,
    supervisor: ConnectionSupervisor,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(%peer, "connection accepted");
                    if let Err(err) = stream.set_nodelay(true) {
                        debug!(%peer, error = %err, "could not set TCP_NODELAY");
                    }
                    let supervisor = supervisor.clone();
                    connections.spawn(
                        async move { supervisor.handle(stream).await }
                            .instrument(info_span!("connection", %peer)),
                    );
                }
                Err(err) => {
                    // Usually fd exhaustion; back off instead of spinning.
                    warn!(error = %err, "accept failed");
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            },
            Some(joined) = connections.join_next(), if !connections.is_empty() => {
                if let Err(err) = joined {
                    if err.is_panic() {
                        error!(error = %err, "connection task panicked");
                    }
                }
            }
            _ = shutdown.changed() => break,
        }
    }

    drop(listener);
    let open = connections.len();
    connections.shutdown().await;
    debug!(open, "accept loop finished");
}
