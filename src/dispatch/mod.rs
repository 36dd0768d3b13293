mod adapter;
mod incoming;
mod servant;
mod table;

pub use adapter::ObjectAdapter;
pub use incoming::{Current, Incoming};
pub use servant::{dispatch_builtin, dispatch_to, is_builtin, Servant, Skeleton};
pub use table::{OperationTable, OperationTableBuilder};
