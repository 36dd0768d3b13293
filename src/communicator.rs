use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use slog::info;

use crate::base::{new_logger_with_level, parse_level};
use crate::config::Options;
use crate::dispatch::ObjectAdapter;
use crate::rpc::{Identity, Proxy, Reference};
use crate::serve::{CollocatedTransport, TcpTransport, Transport};
use crate::stream::{FactoryRegistry, InputStream, ObjectPtr};
use crate::Result;

/// State shared by every proxy and adapter of one application: options,
/// logger, object factories and the request id counter.
pub struct Communicator {
    options: Options,
    pub logger: Arc<slog::Logger>,
    factories: Arc<FactoryRegistry>,
    next_request_id: AtomicI32,
}

impl Communicator {
    pub fn new(options: Options) -> Result<Arc<Self>> {
        let logger = Arc::new(new_logger_with_level(parse_level(&options.log_level)));
        Self::with_logger(options, logger)
    }

    pub fn with_logger(options: Options, logger: Arc<slog::Logger>) -> Result<Arc<Self>> {
        options.validate()?;
        info!(logger, "communicator up, max message {} bytes", options.max_message_size);
        Ok(Arc::new(Self {
            options,
            logger,
            factories: Arc::new(FactoryRegistry::new()),
            next_request_id: AtomicI32::new(1),
        }))
    }

    pub fn options(&self) -> &Options { &self.options }

    pub fn factories(&self) -> &Arc<FactoryRegistry> { &self.factories }

    pub fn add_factory<F>(&self, type_id: &str, factory: F) -> Result<()>
        where F: Fn() -> ObjectPtr + Send + Sync + 'static {
        self.factories.add(type_id, factory)
    }

    /// Never 0, which marks oneway requests.
    pub fn next_request_id(&self) -> i32 {
        loop {
            let id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
            if id > 0 {
                return id;
            }
            let _ = self.next_request_id.compare_exchange(id.wrapping_add(1), 1, Ordering::Relaxed, Ordering::Relaxed);
        }
    }

    /// A stream bound to this communicator's factories and limits.
    pub fn input_stream(&self, data: &[u8]) -> InputStream {
        InputStream::with_factories(data, self.factories.clone(), self.options.max_sequence_elements)
    }

    pub fn create_adapter(self: &Arc<Self>, name: &str) -> Arc<ObjectAdapter> {
        Arc::new(ObjectAdapter::new(name, self.clone()))
    }

    pub fn proxy(self: &Arc<Self>, reference: Reference, transport: Arc<dyn Transport>) -> Proxy {
        Proxy::new(self.clone(), transport, reference)
    }

    /// Proxy that dispatches straight into `adapter` without any framing.
    pub fn collocated_proxy(self: &Arc<Self>, adapter: &Arc<ObjectAdapter>, identity: Identity) -> Proxy {
        self.proxy(Reference::new(identity), Arc::new(CollocatedTransport::new(adapter.clone())))
    }

    /// Proxy to `identity` on a TCP server at `addr`.
    pub fn tcp_proxy(self: &Arc<Self>, addr: &str, identity: Identity) -> Result<Proxy> {
        let transport = TcpTransport::new(addr, &self.options, self.logger.clone())?;
        Ok(self.proxy(Reference::new(identity), Arc::new(transport)))
    }
}
