use std::fmt;
use std::sync::{Arc, RwLock};

use bytes::Bytes;
use slog::{debug, warn};

use crate::communicator::Communicator;
use crate::rpc::protocol::read_facet;
use crate::rpc::{Context, Identity, OperationDescriptor, Reference, ReplyHeader, ReplyStatus, RequestHeader,
                 OP_ID, OP_IDS, OP_IS_A, OP_PING};
use crate::serve::Transport;
use crate::stream::{InputStream, OutputStream, UserError};
use crate::{Corrupting, Result, Status};

#[derive(Default)]
struct TypeCache {
    // sorted
    confirmed: Vec<String>,
    // confirmed holds every id the target supports
    complete: bool,
}

/// Client-side handle to a remote object.
///
/// Cheap to clone. Derived proxies (`with_context`, `oneway`, casts) share
/// the type id cache of the proxy they came from unless they address a
/// different facet.
#[derive(Clone)]
pub struct Proxy {
    communicator: Arc<Communicator>,
    transport: Arc<dyn Transport>,
    reference: Reference,
    context: Context,
    type_id: Option<String>,
    types: Arc<RwLock<TypeCache>>,
}

impl Proxy {
    pub fn new(communicator: Arc<Communicator>, transport: Arc<dyn Transport>, reference: Reference) -> Self {
        Self {
            communicator,
            transport,
            reference,
            context: Context::new(),
            type_id: None,
            types: Arc::default(),
        }
    }

    pub fn reference(&self) -> &Reference { &self.reference }

    pub fn identity(&self) -> &Identity { &self.reference.identity }

    pub fn facet(&self) -> &str { &self.reference.facet }

    pub fn context(&self) -> &Context { &self.context }

    pub fn is_oneway(&self) -> bool { self.reference.oneway }

    /// The interface this proxy was cast to, if any.
    pub fn type_id(&self) -> Option<&str> { self.type_id.as_deref() }

    pub fn with_facet(&self, facet: &str) -> Proxy {
        let mut proxy = self.clone();
        proxy.reference.facet = facet.to_string();
        proxy.type_id = None;
        proxy.types = Arc::default();
        proxy
    }

    pub fn with_context(&self, context: Context) -> Proxy {
        let mut proxy = self.clone();
        proxy.context = context;
        proxy
    }

    pub fn oneway(&self) -> Proxy {
        let mut proxy = self.clone();
        proxy.reference.oneway = true;
        proxy
    }

    pub fn twoway(&self) -> Proxy {
        let mut proxy = self.clone();
        proxy.reference.oneway = false;
        proxy
    }

    pub fn ping(&self) -> Result<()> {
        self.invoke(&OP_PING, |_| Ok(()), |_| Ok(()))
    }

    /// Answered from the cache when possible, remotely otherwise.
    pub fn is_a(&self, type_id: &str) -> Result<bool> {
        {
            let types = self.read_types();
            if types.confirmed.binary_search_by(|id| id.as_str().cmp(type_id)).is_ok() {
                return Ok(true);
            }
            if types.complete {
                return Ok(false);
            }
        }
        let rs = self.invoke(&OP_IS_A, |os| os.write_string(type_id), |is| is.read_bool())?;
        if rs {
            let mut types = self.write_types();
            if let Err(pos) = types.confirmed.binary_search_by(|id| id.as_str().cmp(type_id)) {
                types.confirmed.insert(pos, type_id.to_string());
            }
        }
        Ok(rs)
    }

    pub fn ids(&self) -> Result<Vec<String>> {
        let ids = self.invoke(&OP_IDS, |_| Ok(()), |is| is.read_string_seq())?;
        let mut types = self.write_types();
        types.confirmed = ids.clone();
        types.confirmed.sort();
        types.confirmed.dedup();
        types.complete = true;
        Ok(ids)
    }

    pub fn id(&self) -> Result<String> {
        self.invoke(&OP_ID, |_| Ok(()), |is| is.read_string())
    }

    /// `None` if the target does not implement `type_id`.
    pub fn checked_cast(&self, type_id: &str) -> Result<Option<Proxy>> {
        if self.is_a(type_id)? {
            Ok(Some(self.unchecked_cast(type_id)))
        } else {
            Ok(None)
        }
    }

    /// No round trip; a wrong cast surfaces as `OperationNotExist` later.
    pub fn unchecked_cast(&self, type_id: &str) -> Proxy {
        let mut proxy = self.clone();
        proxy.type_id = Some(type_id.to_string());
        proxy
    }

    /// Marshals a request for `op`, sends it, and decodes the reply.
    ///
    /// `encode` writes the in-parameters, `decode` reads the results. Objects
    /// returned through `decode` are complete once this returns.
    pub fn invoke<R, E, D>(&self, op: &OperationDescriptor, encode: E, decode: D) -> Result<R>
        where E: FnOnce(&mut OutputStream) -> Result<()>,
              D: FnOnce(&mut InputStream) -> Result<R> {
        if self.reference.oneway {
            if op.returns_value() {
                return Err(Status::TwowayOnly(op.name.to_string()));
            }
            let request = self.build_request(0, op, encode)?;
            self.transport.send_oneway(request)?;
            // empty result, with an empty pending section when the decoder expects one
            let mut os = OutputStream::new();
            os.start_encaps();
            if op.uses_objects() {
                os.write_pending_objects()?;
            }
            os.end_encaps()?;
            let empty = os.finished()?;
            return Self::decode_result(op, &mut self.communicator.input_stream(&empty), decode);
        }

        let request_id = self.communicator.next_request_id();
        let request = self.build_request(request_id, op, encode)?;
        let reply = self.send_with_retry(op, request)?;
        self.decode_reply(request_id, op, &reply, decode)
    }

    fn build_request<E>(&self, request_id: i32, op: &OperationDescriptor, encode: E) -> Result<Bytes>
        where E: FnOnce(&mut OutputStream) -> Result<()> {
        let mut os = OutputStream::new();
        RequestHeader {
            request_id,
            identity: self.reference.identity.clone(),
            facet: self.reference.facet.clone(),
            operation: op.name.to_string(),
            mode: op.mode,
            context: self.context.clone(),
        }.write(&mut os)?;
        os.start_encaps();
        encode(&mut os)?;
        if op.uses_objects() {
            os.write_pending_objects()?;
        }
        os.end_encaps()?;
        os.finished()
    }

    /// Idempotent and nonmutating operations are sent again after a transport
    /// failure, at most `retry_count` times.
    fn send_with_retry(&self, op: &OperationDescriptor, request: Bytes) -> Result<Bytes> {
        let retry_count = self.communicator.options().retry_count;
        let mut attempt = 0;
        loop {
            match self.transport.send(request.clone()) {
                Ok(reply) => return Ok(reply),
                Err(e) if e.is_retryable() && op.mode.is_retryable() && attempt < retry_count => {
                    attempt += 1;
                    warn!(self.communicator.logger, "retry {} on {}: {}", op.name, self.reference.identity, e;
                          "attempt" => attempt);
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn decode_reply<R, D>(&self, request_id: i32, op: &OperationDescriptor, reply: &[u8], decode: D) -> Result<R>
        where D: FnOnce(&mut InputStream) -> Result<R> {
        let mut is = self.communicator.input_stream(reply);
        let header = ReplyHeader::read(&mut is)?;
        if header.request_id != request_id {
            return Err(Status::corrupted(format!("reply for request {} while waiting for {}",
                                                 header.request_id, request_id)));
        }
        match header.status {
            ReplyStatus::Ok => Self::decode_result(op, &mut is, decode),
            ReplyStatus::UserException => {
                is.start_read_encaps()?;
                if is.read_bool()? {
                    return Err(Status::corrupted("user exception carrying objects"));
                }
                let len = is.encaps_remaining();
                let data = is.read_blob(len)?;
                is.end_read_encaps()?;
                let error = UserError::from_wire(data)?;
                if error.find_declared(op.throws).is_some() {
                    Err(Status::UserException(error))
                } else {
                    debug!(self.communicator.logger, "{} raised undeclared {}", op.name, error.type_id());
                    Err(Status::UnknownUserException(error.type_id().to_string()))
                }
            }
            status @ (ReplyStatus::ObjectNotExist | ReplyStatus::FacetNotExist | ReplyStatus::OperationNotExist) => {
                let identity = Identity::read(&mut is)?;
                let facet = read_facet(&mut is)?;
                let operation = is.read_string()?;
                Err(match status {
                    ReplyStatus::ObjectNotExist => Status::ObjectNotExist(identity.to_string()),
                    ReplyStatus::FacetNotExist => Status::FacetNotExist { identity: identity.to_string(), facet },
                    _ => Status::OperationNotExist(operation),
                })
            }
            ReplyStatus::UnknownLocalException => Err(Status::UnknownLocalException(is.read_string()?)),
            ReplyStatus::UnknownUserException => Err(Status::UnknownUserException(is.read_string()?)),
            ReplyStatus::UnknownException => Err(Status::UnknownException(is.read_string()?)),
        }
    }

    fn decode_result<R, D>(op: &OperationDescriptor, is: &mut InputStream, decode: D) -> Result<R>
        where D: FnOnce(&mut InputStream) -> Result<R> {
        is.start_read_encaps()?;
        let rs = decode(is)?;
        if op.uses_objects() {
            is.read_pending_objects()?;
        }
        is.end_read_encaps()?;
        Ok(rs)
    }

    fn read_types(&self) -> std::sync::RwLockReadGuard<'_, TypeCache> {
        match self.types.read() {
            Ok(types) => types,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write_types(&self) -> std::sync::RwLockWriteGuard<'_, TypeCache> {
        match self.types.write() {
            Ok(types) => types,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl fmt::Debug for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Proxy")
            .field("identity", &self.reference.identity.to_string())
            .field("facet", &self.reference.facet)
            .field("oneway", &self.reference.oneway)
            .field("type_id", &self.type_id)
            .finish()
    }
}

impl OutputStream {
    pub fn write_proxy(&mut self, v: Option<&Proxy>) -> Result<()> {
        self.write_reference(v.map(|p| &p.reference))
    }
}

impl InputStream {
    /// The decoded proxy talks through the same transport as `via`.
    pub fn read_proxy(&mut self, via: &Proxy) -> Result<Option<Proxy>> {
        Ok(self.read_reference()?
            .map(|reference| Proxy::new(via.communicator.clone(), via.transport.clone(), reference)))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use super::*;
    use crate::base::new_discard_logger;
    use crate::config::Options;
    use crate::dispatch::{Incoming, ObjectAdapter, OperationTable, Skeleton};
    use crate::rpc::{OperationMode, Shape, TypeIds};
    use crate::serve::CollocatedTransport;

    const COUNTER_IDS: TypeIds = TypeIds::new(&["::Object", "::demo::Counter"], 1);
    static GET: OperationDescriptor =
        OperationDescriptor::new("get", OperationMode::Idempotent, "::demo::Counter").returns(Shape::Int);
    static BUMP: OperationDescriptor = OperationDescriptor::new("bump", OperationMode::Normal, "::demo::Counter");

    #[derive(Default)]
    struct Counter {
        value: AtomicUsize,
    }

    fn get(s: &Counter, incoming: &mut Incoming) -> Result<()> {
        incoming.read_empty_params()?;
        let value = s.value.load(Ordering::SeqCst) as i32;
        incoming.write_result(|os| {
            os.write_int(value);
            Ok(())
        })
    }

    fn bump(s: &Counter, incoming: &mut Incoming) -> Result<()> {
        incoming.read_empty_params()?;
        s.value.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    lazy_static! {
        static ref COUNTER_OPS: OperationTable<Counter> = OperationTable::with()
            .operation(&GET, get)
            .operation(&BUMP, bump)
            .build()
            .unwrap();
    }

    /// Fails the first `failures` sends, counts every attempt.
    struct Flaky {
        inner: CollocatedTransport,
        failures: Mutex<usize>,
        sent: AtomicUsize,
    }

    impl Transport for Flaky {
        fn send(&self, request: Bytes) -> Result<Bytes> {
            self.sent.fetch_add(1, Ordering::SeqCst);
            let mut failures = self.failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(Status::Transport("connection reset".into()));
            }
            self.inner.send(request)
        }

        fn send_oneway(&self, request: Bytes) -> Result<()> {
            self.sent.fetch_add(1, Ordering::SeqCst);
            self.inner.send_oneway(request)
        }
    }

    fn setup(failures: usize, retry_count: usize) -> (Arc<Counter>, Arc<Flaky>, Proxy) {
        let opts = Options::with().retry_count(retry_count).build();
        let communicator = Communicator::with_logger(opts, new_discard_logger()).unwrap();
        let adapter = Arc::new(ObjectAdapter::new("test", communicator.clone()));
        let counter = Arc::new(Counter::default());
        adapter.add(Identity::new("counter"),
                    Arc::new(Skeleton::new(counter.clone(), COUNTER_IDS, &COUNTER_OPS))).unwrap();
        let transport = Arc::new(Flaky {
            inner: CollocatedTransport::new(adapter),
            failures: Mutex::new(failures),
            sent: AtomicUsize::new(0),
        });
        let proxy = communicator.proxy(Reference::new(Identity::new("counter")), transport.clone());
        (counter, transport, proxy)
    }

    #[test]
    fn sanity() {
        let (counter, _, proxy) = setup(0, 1);
        proxy.invoke(&BUMP, |_| Ok(()), |_| Ok(())).unwrap();
        assert_eq!(1, counter.value.load(Ordering::SeqCst));
        assert_eq!(1, proxy.invoke(&GET, |_| Ok(()), |is| is.read_int()).unwrap());
        proxy.ping().unwrap();
        assert_eq!("::demo::Counter", proxy.id().unwrap());
    }

    #[test]
    fn idempotent_operations_are_retried() {
        let (_, transport, proxy) = setup(1, 1);
        assert_eq!(0, proxy.invoke(&GET, |_| Ok(()), |is| is.read_int()).unwrap());
        assert_eq!(2, transport.sent.load(Ordering::SeqCst));

        // retries exhausted
        let (_, transport, proxy) = setup(2, 1);
        assert!(matches!(proxy.invoke(&GET, |_| Ok(()), |is| is.read_int()), Err(Status::Transport(_))));
        assert_eq!(2, transport.sent.load(Ordering::SeqCst));
    }

    #[test]
    fn normal_operations_are_not_retried() {
        let (counter, transport, proxy) = setup(1, 3);
        assert!(matches!(proxy.invoke(&BUMP, |_| Ok(()), |_| Ok(())), Err(Status::Transport(_))));
        assert_eq!(1, transport.sent.load(Ordering::SeqCst));
        assert_eq!(0, counter.value.load(Ordering::SeqCst));
    }

    #[test]
    fn casts_use_the_cache() {
        let (_, transport, proxy) = setup(0, 0);
        let counter = proxy.checked_cast("::demo::Counter").unwrap().unwrap();
        assert_eq!(Some("::demo::Counter"), counter.type_id());
        assert_eq!(1, transport.sent.load(Ordering::SeqCst));

        // confirmed ids are shared with derived proxies
        assert!(counter.is_a("::demo::Counter").unwrap());
        assert_eq!(1, transport.sent.load(Ordering::SeqCst));

        assert!(proxy.checked_cast("::demo::Timer").unwrap().is_none());
        assert_eq!(2, transport.sent.load(Ordering::SeqCst));

        // after ids() negatives are known too
        assert_eq!(vec!["::Object".to_string(), "::demo::Counter".to_string()], proxy.ids().unwrap());
        assert!(!proxy.is_a("::demo::Timer").unwrap());
        assert_eq!(3, transport.sent.load(Ordering::SeqCst));

        let unchecked = proxy.unchecked_cast("::demo::Timer");
        assert_eq!(Some("::demo::Timer"), unchecked.type_id());
        assert_eq!(3, transport.sent.load(Ordering::SeqCst));
    }

    #[test]
    fn oneway_rejects_results_locally() {
        let (counter, transport, proxy) = setup(0, 0);
        let oneway = proxy.oneway();
        assert!(matches!(oneway.invoke(&GET, |_| Ok(()), |is| is.read_int()), Err(Status::TwowayOnly(_))));
        assert_eq!(0, transport.sent.load(Ordering::SeqCst));

        oneway.invoke(&BUMP, |_| Ok(()), |_| Ok(())).unwrap();
        assert_eq!(1, counter.value.load(Ordering::SeqCst));
        assert!(!oneway.twoway().is_oneway());
    }

    #[test]
    fn missing_targets() {
        let (_, _, proxy) = setup(0, 0);
        let facet = proxy.with_facet("admin");
        assert!(matches!(facet.ping(), Err(Status::FacetNotExist { .. })));

        let other = proxy.communicator.proxy(Reference::new(Identity::new("nobody")), proxy.transport.clone());
        assert!(matches!(other.ping(), Err(Status::ObjectNotExist(_))));

        static MISSING: OperationDescriptor =
            OperationDescriptor::new("reset", OperationMode::Normal, "::demo::Counter");
        assert!(matches!(proxy.invoke(&MISSING, |_| Ok(()), |_| Ok(())), Err(Status::OperationNotExist(_))));
    }

    #[test]
    fn proxies_on_the_wire() {
        let (_, _, proxy) = setup(0, 0);
        let mut os = OutputStream::new();
        os.write_proxy(Some(&proxy.with_facet("stats"))).unwrap();
        os.write_proxy(None).unwrap();
        let mut is = InputStream::new(os.as_slice());
        let decoded = is.read_proxy(&proxy).unwrap().unwrap();
        assert_eq!("stats", decoded.facet());
        assert_eq!(proxy.identity(), decoded.identity());
        assert!(is.read_proxy(&proxy).unwrap().is_none());
    }
}
