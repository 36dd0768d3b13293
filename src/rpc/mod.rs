mod type_ids;
pub mod protocol;
pub mod reference;
pub mod proxy;

pub use type_ids::{TypeIds, ROOT_TYPE_ID};
pub use protocol::{Context, OperationDescriptor, OperationMode, ReplyHeader, ReplyStatus, RequestHeader, Shape,
                   OP_ID, OP_IDS, OP_IS_A, OP_PING};
pub use reference::{Identity, Reference};
pub use proxy::Proxy;
