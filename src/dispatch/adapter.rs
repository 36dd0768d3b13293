use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use slog::{debug, warn};

use crate::communicator::Communicator;
use crate::dispatch::{dispatch_to, Current, Incoming, Servant};
use crate::rpc::protocol::write_facet;
use crate::rpc::{Identity, ReplyHeader, ReplyStatus, RequestHeader};
use crate::stream::{InputStream, OutputStream};
use crate::{Result, Status};

/// Servant registry keyed by identity and facet. Turns request bytes into
/// reply bytes and never lets a servant failure escape as anything but a
/// reply status.
pub struct ObjectAdapter {
    name: String,
    communicator: Arc<Communicator>,
    servants: DashMap<(Identity, String), Arc<dyn Servant>>,
    logger: Arc<slog::Logger>,
}

impl ObjectAdapter {
    pub fn new(name: &str, communicator: Arc<Communicator>) -> Self {
        let logger = Arc::new(communicator.logger.new(slog::o!("adapter" => name.to_string())));
        Self {
            name: name.to_string(),
            communicator,
            servants: DashMap::new(),
            logger,
        }
    }

    pub fn name(&self) -> &str { &self.name }

    pub fn communicator(&self) -> &Arc<Communicator> { &self.communicator }

    pub fn add(&self, identity: Identity, servant: Arc<dyn Servant>) -> Result<()> {
        self.add_facet(identity, "", servant)
    }

    pub fn add_facet(&self, identity: Identity, facet: &str, servant: Arc<dyn Servant>) -> Result<()> {
        if identity.is_null() {
            return Err(Status::DuplicateDefinition("servant with null identity".into()));
        }
        let key = (identity, facet.to_string());
        if self.servants.contains_key(&key) {
            return Err(Status::DuplicateDefinition(format!("servant {} facet {:?} already registered", key.0, key.1)));
        }
        self.servants.insert(key, servant);
        Ok(())
    }

    pub fn remove(&self, identity: &Identity, facet: &str) -> Option<Arc<dyn Servant>> {
        self.servants.remove(&(identity.clone(), facet.to_string())).map(|(_, servant)| servant)
    }

    pub fn find(&self, identity: &Identity, facet: &str) -> Option<Arc<dyn Servant>> {
        self.servants.get(&(identity.clone(), facet.to_string())).map(|e| e.value().clone())
    }

    /// Registered under any facet.
    pub fn has_identity(&self, identity: &Identity) -> bool {
        self.servants.iter().any(|e| e.key().0 == *identity)
    }

    pub fn len(&self) -> usize { self.servants.len() }

    pub fn is_empty(&self) -> bool { self.servants.is_empty() }

    /// Returns the reply, or `None` for oneway requests. Fails only when the
    /// request header itself cannot be decoded.
    pub fn dispatch(&self, request: &[u8]) -> Result<Option<Bytes>> {
        let mut is = self.communicator.input_stream(request);
        let header = RequestHeader::read(&mut is)?;
        let request_id = header.request_id;
        let current = Current::from(header);
        let target = (current.identity.clone(), current.facet.clone(), current.operation.clone());

        let outcome = self.invoke(current, is);
        if request_id == 0 {
            if let Err(e) = outcome {
                debug!(self.logger, "oneway {} on {} failed: {}", target.2, target.0, e);
            }
            return Ok(None);
        }

        let mut os = OutputStream::new();
        match outcome {
            Ok(result) => {
                ReplyHeader { request_id, status: ReplyStatus::Ok }.write(&mut os);
                os.write_encaps_bytes(&result);
            }
            Err(e) => self.write_failure(&mut os, request_id, &target, e)?,
        }
        Ok(Some(os.finished()?))
    }

    fn invoke(&self, current: Current, params: InputStream) -> Result<Bytes> {
        let servant = match self.find(&current.identity, &current.facet) {
            Some(servant) => servant,
            None if !current.facet.is_empty() && self.has_identity(&current.identity) => {
                return Err(Status::FacetNotExist {
                    identity: current.identity.to_string(),
                    facet: current.facet,
                });
            }
            None => return Err(Status::ObjectNotExist(current.identity.to_string())),
        };

        let mut incoming = Incoming::new(current, params);
        let rs = panic::catch_unwind(AssertUnwindSafe(|| dispatch_to(&*servant, &mut incoming)));
        match rs {
            Ok(Ok(())) => incoming.take_result(),
            Ok(Err(Status::UserException(e))) => {
                let declared = incoming.descriptor()
                    .map(|d| e.ids().iter().any(|id| d.declares(id)))
                    .unwrap_or(false);
                if declared {
                    Err(Status::UserException(e))
                } else {
                    Err(Status::UnknownUserException(e.type_id().to_string()))
                }
            }
            Ok(Err(e)) => Err(e),
            Err(cause) => Err(Status::UnknownException(panic_message(cause.as_ref()))),
        }
    }

    fn write_failure(&self, os: &mut OutputStream, request_id: i32,
                     target: &(Identity, String, String), e: Status) -> Result<()> {
        let (identity, facet, operation) = target;
        let status = match &e {
            Status::UserException(_) => ReplyStatus::UserException,
            Status::ObjectNotExist(_) => ReplyStatus::ObjectNotExist,
            Status::FacetNotExist { .. } => ReplyStatus::FacetNotExist,
            Status::OperationNotExist(_) => ReplyStatus::OperationNotExist,
            Status::UnknownUserException(_) => ReplyStatus::UnknownUserException,
            Status::UnknownException(_) => ReplyStatus::UnknownException,
            _ => ReplyStatus::UnknownLocalException,
        };
        match status {
            ReplyStatus::ObjectNotExist | ReplyStatus::FacetNotExist | ReplyStatus::OperationNotExist =>
                debug!(self.logger, "{} on {} facet {:?}: {}", operation, identity, facet, e),
            ReplyStatus::UserException => (),
            _ => warn!(self.logger, "{} on {} failed: {}", operation, identity, e),
        }

        ReplyHeader { request_id, status }.write(os);
        match e {
            Status::UserException(error) => {
                os.start_encaps();
                // no pending object section follows
                os.write_bool(false);
                os.write_blob(error.data());
                os.end_encaps()
            }
            Status::ObjectNotExist(_) | Status::FacetNotExist { .. } | Status::OperationNotExist(_) => {
                identity.write(os)?;
                write_facet(os, facet)?;
                os.write_string(operation)
            }
            Status::UnknownUserException(message) | Status::UnknownException(message) => os.write_string(&message),
            other => os.write_string(&other.to_string()),
        }
    }
}

fn panic_message(cause: &(dyn Any + Send)) -> String {
    if let Some(s) = cause.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = cause.downcast_ref::<String>() {
        s.clone()
    } else {
        "servant panicked".to_string()
    }
}
