use std::sync::{Arc, Mutex};

use bytes::Bytes;
use slog::debug;
use tokio::io::BufStream;
use tokio::net::TcpStream;
use tokio::runtime::Runtime;

use crate::config::Options;
use crate::dispatch::ObjectAdapter;
use crate::serve::frame::{read_frame, write_frame, MessageKind};
use crate::{Corrupting, Result, Status};

/// Moves opaque request bytes to a peer and brings the reply back.
pub trait Transport: Send + Sync {
    fn send(&self, request: Bytes) -> Result<Bytes>;

    fn send_oneway(&self, request: Bytes) -> Result<()>;
}

/// Calls into an adapter of the same process.
pub struct CollocatedTransport {
    adapter: Arc<ObjectAdapter>,
}

impl CollocatedTransport {
    pub fn new(adapter: Arc<ObjectAdapter>) -> Self {
        Self { adapter }
    }
}

impl Transport for CollocatedTransport {
    fn send(&self, request: Bytes) -> Result<Bytes> {
        match self.adapter.dispatch(&request)? {
            Some(reply) => Ok(reply),
            None => Err(Status::Transport("no reply for twoway request".into())),
        }
    }

    fn send_oneway(&self, request: Bytes) -> Result<()> {
        self.adapter.dispatch(&request).map(|_| ())
    }
}

/// Blocking client over one framed TCP connection. The connection is opened
/// lazily and dropped after any failure, so the next call reconnects.
///
/// Calls block the current thread on a private runtime and are refused from
/// inside an async task; use `tokio::task::spawn_blocking` there.
pub struct TcpTransport {
    addr: String,
    max_message_size: usize,
    compression_threshold: usize,
    runtime: Option<Runtime>,
    stream: Mutex<Option<BufStream<TcpStream>>>,
    logger: Arc<slog::Logger>,
}

impl TcpTransport {
    pub fn new(addr: &str, options: &Options, logger: Arc<slog::Logger>) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        Ok(Self {
            addr: addr.to_string(),
            max_message_size: options.max_message_size,
            compression_threshold: options.compression_threshold,
            runtime: Some(runtime),
            stream: Mutex::new(None),
            logger,
        })
    }

    pub fn addr(&self) -> &str { &self.addr }

    fn exchange(&self, request: Bytes, oneway: bool) -> Result<Option<Bytes>> {
        if tokio::runtime::Handle::try_current().is_ok() {
            return Err(Status::UnknownLocalException(
                format!("blocking call to {} from inside an async runtime", self.addr)));
        }
        let runtime = match self.runtime.as_ref() {
            Some(runtime) => runtime,
            None => return Err(Status::Transport(format!("transport to {} is shut down", self.addr))),
        };
        let mut slot = match self.stream.lock() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };
        let rs = runtime.block_on(self.exchange_async(&mut slot, &request, oneway));
        if let Err(e) = &rs {
            debug!(self.logger, "connection to {} dropped: {}", self.addr, e);
            *slot = None;
        }
        rs
    }

    async fn exchange_async(&self, slot: &mut Option<BufStream<TcpStream>>, request: &[u8], oneway: bool)
                            -> Result<Option<Bytes>> {
        if slot.is_none() {
            let socket = TcpStream::connect(&self.addr).await?;
            socket.set_nodelay(true)?;
            debug!(self.logger, "connected to {}", self.addr);
            *slot = Some(BufStream::new(socket));
        }
        let stream = match slot.as_mut() {
            Some(stream) => stream,
            None => return Err(Status::Transport(format!("not connected to {}", self.addr))),
        };
        write_frame(stream, MessageKind::Request, request, self.compression_threshold).await?;
        if oneway {
            return Ok(None);
        }
        match read_frame(stream, self.max_message_size).await? {
            Some((MessageKind::Reply, body)) => Ok(Some(body)),
            Some((MessageKind::Close, _)) | None => Err(Status::Transport(format!("{} closed the connection", self.addr))),
            Some((kind, _)) => Err(Status::corrupted(format!("unexpected {:?} frame from server", kind))),
        }
    }
}

impl Transport for TcpTransport {
    fn send(&self, request: Bytes) -> Result<Bytes> {
        match self.exchange(request, false)? {
            Some(reply) => Ok(reply),
            None => Err(Status::Transport("no reply for twoway request".into())),
        }
    }

    fn send_oneway(&self, request: Bytes) -> Result<()> {
        self.exchange(request, true).map(|_| ())
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        let slot = match self.stream.get_mut() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };
        let stream = slot.take();
        let runtime = match self.runtime.take() {
            Some(runtime) => runtime,
            None => return,
        };
        // inside an async task neither block_on nor a blocking runtime drop is allowed
        if tokio::runtime::Handle::try_current().is_ok() {
            drop(stream);
            runtime.shutdown_background();
            return;
        }
        if let Some(mut stream) = stream {
            let _ = runtime.block_on(write_frame(&mut stream, MessageKind::Close, &[], 0));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::new_discard_logger;

    #[test]
    fn refused_connection_is_retryable() {
        // bind then drop to get a port nobody listens on
        let addr = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().to_string()
        };
        let transport = TcpTransport::new(&addr, &Options::default(), new_discard_logger()).unwrap();
        match transport.send(Bytes::from_static(b"x")) {
            Err(e) => assert!(e.is_retryable()),
            Ok(_) => panic!("no server should be listening on {}", addr),
        }
    }

    #[tokio::test]
    async fn refuses_calls_from_async_tasks() {
        let transport = TcpTransport::new("127.0.0.1:1", &Options::default(), new_discard_logger()).unwrap();
        match transport.send(Bytes::from_static(b"x")) {
            Err(Status::UnknownLocalException(msg)) => assert!(msg.contains("async runtime")),
            rs => panic!("unexpected {:?}", rs.map(|b| b.len())),
        }
        assert!(matches!(transport.send_oneway(Bytes::from_static(b"x")), Err(Status::UnknownLocalException(_))));
        // dropping inside the task must not panic
        drop(transport);
    }
}
