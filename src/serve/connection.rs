use std::sync::Arc;

use bytes::Bytes;
use rusty_pool::ThreadPool;
use slog::debug;
use tokio::io::BufStream;
use tokio::net::TcpStream;
use tokio::sync::oneshot;

use crate::dispatch::ObjectAdapter;
use crate::serve::frame::{read_frame, write_frame, MessageKind};
use crate::{Corrupting, Result, Status};

/// Server side of one client connection. Requests are answered in arrival
/// order; the servant call itself runs on the worker pool.
pub struct Connection {
    socket: BufStream<TcpStream>,
    pub logger: Arc<slog::Logger>,
    adapter: Arc<ObjectAdapter>,
    worker_pool: ThreadPool,
    max_message_size: usize,
    compression_threshold: usize,
}

impl Connection {
    pub fn new(socket: TcpStream, logger: Arc<slog::Logger>, adapter: Arc<ObjectAdapter>,
               worker_pool: ThreadPool) -> Self {
        let options = adapter.communicator().options();
        let max_message_size = options.max_message_size;
        let compression_threshold = options.compression_threshold;
        Self {
            socket: BufStream::new(socket),
            logger,
            adapter,
            worker_pool,
            max_message_size,
            compression_threshold,
        }
    }

    /// Runs until the peer closes the connection or a protocol error occurs.
    pub async fn handle_packets(&mut self) -> Result<()> {
        loop {
            match read_frame(&mut self.socket, self.max_message_size).await? {
                None | Some((MessageKind::Close, _)) => {
                    debug!(self.logger, "peer closed");
                    return Ok(());
                }
                Some((MessageKind::Request, body)) => {
                    if let Some(reply) = self.dispatch(body).await? {
                        write_frame(&mut self.socket, MessageKind::Reply, &reply, self.compression_threshold).await?;
                    }
                }
                Some((MessageKind::Reply, _)) => return Err(Status::corrupted("client sent a reply frame")),
            }
        }
    }

    async fn dispatch(&self, request: Bytes) -> Result<Option<Bytes>> {
        let adapter = self.adapter.clone();
        let (tx, rx) = oneshot::channel();
        self.worker_pool.execute(move || {
            let _ = tx.send(adapter.dispatch(&request));
        });
        match rx.await {
            Ok(rs) => rs,
            Err(_) => Err(Status::UnknownLocalException("worker dropped the request".into())),
        }
    }
}
