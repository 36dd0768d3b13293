use std::sync::Arc;

use crate::dispatch::{Incoming, OperationTable};
use crate::rpc::{TypeIds, OP_ID, OP_IDS, OP_IS_A, OP_PING};
use crate::{Result, Status};

/// Anything that implements the operation set of one or more interfaces.
pub trait Servant: Send + Sync {
    fn type_ids(&self) -> &TypeIds;

    /// Dispatches an interface operation; built-ins never reach this.
    fn dispatch(&self, incoming: &mut Incoming) -> Result<()>;

    fn is_a(&self, type_id: &str) -> bool {
        self.type_ids().is_a(type_id)
    }

    fn most_derived_id(&self) -> &str {
        self.type_ids().most_derived()
    }
}

/// Binds an implementation to the static operation table of its interface.
pub struct Skeleton<T: Send + Sync + 'static> {
    inner: Arc<T>,
    type_ids: TypeIds,
    operations: &'static OperationTable<T>,
}

impl<T: Send + Sync + 'static> Skeleton<T> {
    pub fn new(inner: Arc<T>, type_ids: TypeIds, operations: &'static OperationTable<T>) -> Self {
        Self { inner, type_ids, operations }
    }

    pub fn inner(&self) -> &Arc<T> { &self.inner }
}

impl<T: Send + Sync + 'static> Servant for Skeleton<T> {
    fn type_ids(&self) -> &TypeIds { &self.type_ids }

    fn dispatch(&self, incoming: &mut Incoming) -> Result<()> {
        self.operations.dispatch(&self.inner, incoming)
    }
}

fn ping(_servant: &(dyn Servant + 'static), incoming: &mut Incoming) -> Result<()> {
    incoming.read_empty_params()?;
    incoming.write_empty_result()
}

fn is_a(servant: &(dyn Servant + 'static), incoming: &mut Incoming) -> Result<()> {
    let type_id = incoming.read_params(|is| is.read_string())?;
    let rs = servant.is_a(&type_id);
    incoming.write_result(|os| {
        os.write_bool(rs);
        Ok(())
    })
}

fn ids(servant: &(dyn Servant + 'static), incoming: &mut Incoming) -> Result<()> {
    incoming.read_empty_params()?;
    let ids = servant.type_ids().ids();
    incoming.write_result(|os| os.write_string_seq(ids))
}

fn id(servant: &(dyn Servant + 'static), incoming: &mut Incoming) -> Result<()> {
    incoming.read_empty_params()?;
    let id = servant.most_derived_id().to_string();
    incoming.write_result(|os| os.write_string(&id))
}

lazy_static! {
    static ref BUILTINS: Option<OperationTable<dyn Servant>> = OperationTable::with()
        .operation(&OP_PING, ping)
        .operation(&OP_IS_A, is_a)
        .operation(&OP_IDS, ids)
        .operation(&OP_ID, id)
        .build()
        .ok();
}

pub fn is_builtin(operation: &str) -> bool {
    BUILTINS.as_ref().and_then(|t| t.find(operation)).is_some()
}

/// Serves the operations every servant supports. Consulted only for names
/// starting with `_`, so interface tables keep the rest of the namespace.
pub fn dispatch_builtin(servant: &(dyn Servant + 'static), incoming: &mut Incoming) -> Result<()> {
    match BUILTINS.as_ref() {
        Some(table) => table.dispatch(servant, incoming),
        None => Err(Status::UnknownLocalException("built-in operation table unavailable".into())),
    }
}

/// Built-ins first for reserved names, then the servant's own table.
pub fn dispatch_to(servant: &(dyn Servant + 'static), incoming: &mut Incoming) -> Result<()> {
    if incoming.current().operation.starts_with('_') && is_builtin(&incoming.current().operation) {
        dispatch_builtin(servant, incoming)
    } else {
        servant.dispatch(incoming)
    }
}
