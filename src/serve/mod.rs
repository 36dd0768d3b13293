mod connection;
pub mod frame;
pub mod transport;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;

use rusty_pool::ThreadPool;
use slog::{error, info};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

use crate::dispatch::ObjectAdapter;
use crate::serve::connection::Connection;
use crate::Result;

pub use transport::{CollocatedTransport, TcpTransport, Transport};

/// Accepts framed TCP connections and hands their requests to one adapter.
pub struct Server {
    adapter: Arc<ObjectAdapter>,
    logger: Arc<slog::Logger>,
    worker_pool: ThreadPool,
}

impl Server {
    pub fn new(adapter: Arc<ObjectAdapter>) -> Arc<Self> {
        let workers = adapter.communicator().options().worker_threads;
        let logger = adapter.communicator().logger.clone();
        Arc::new(Self {
            adapter,
            logger,
            worker_pool: rusty_pool::Builder::new()
                .name("slicewire-worker".to_string())
                .core_size(workers)
                .max_size(workers * 2 + 2)
                .build(),
        })
    }

    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        loop {
            let (socket, addr) = listener.accept().await?;
            info!(self.logger, "accept...{addr} ok");
            socket.set_nodelay(true)?;

            let mut conn = Connection::new(socket, self.logger.clone(), self.adapter.clone(),
                                           self.worker_pool.clone());
            tokio::spawn(async move {
                if let Err(e) = conn.handle_packets().await {
                    error!(conn.logger, "network error: {e}");
                }
            });
        }
    }

    pub async fn serve_with_shutdown<F>(self: Arc<Self>, listener: TcpListener, shutdown: F) -> Result<()>
        where F: Future<Output = ()> {
        let logger = self.logger.clone();
        tokio::select! {
            rs = self.serve(listener) => rs,
            _ = shutdown => {
                info!(logger, "server shutdown");
                Ok(())
            }
        }
    }

    /// Binds `addr` and serves on a dedicated thread with its own runtime.
    pub fn spawn(self: Arc<Self>, addr: &str) -> Result<ServerHandle> {
        let listener = std::net::TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;
        info!(self.logger, "server start listen...{}", local_addr);

        let (tx, rx) = oneshot::channel::<()>();
        let logger = self.logger.clone();
        let thread = thread::Builder::new()
            .name("slicewire-server".to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        error!(logger, "server runtime: {e}");
                        return;
                    }
                };
                runtime.block_on(async move {
                    let listener = match TcpListener::from_std(listener) {
                        Ok(listener) => listener,
                        Err(e) => {
                            error!(logger, "listener: {e}");
                            return;
                        }
                    };
                    let shutdown = async move {
                        let _ = rx.await;
                    };
                    if let Err(e) = self.serve_with_shutdown(listener, shutdown).await {
                        error!(logger, "server stopped: {e}");
                    }
                });
            })?;
        Ok(ServerHandle { local_addr, shutdown: Some(tx), thread: Some(thread) })
    }
}

/// Stops the background server when dropped.
pub struct ServerHandle {
    local_addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    thread: Option<thread::JoinHandle<()>>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr { self.local_addr }

    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Serves `adapter` on the configured bind address until the process exits.
#[tokio::main]
pub async fn start(adapter: Arc<ObjectAdapter>) -> Result<()> {
    let bind_addr = adapter.communicator().options().bind_addr.clone();
    let listener = TcpListener::bind(&bind_addr).await?;
    info!(adapter.communicator().logger, "server start listen...{}", bind_addr);
    Server::new(adapter).serve(listener).await
}
