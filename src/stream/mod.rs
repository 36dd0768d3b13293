mod buffer;
mod input;
mod output;
mod sequence;
mod encaps;
pub mod object;
pub mod factory;
pub mod exception;

pub use input::InputStream;
pub use output::OutputStream;
pub use sequence::{Decode, Encode};
pub use encaps::{ENCAPS_HEADER_SIZE, ENCODING_MAJOR, ENCODING_MINOR};
pub use object::{new_object, same_object, with_object, with_object_mut, Object, ObjectPtr, ObjectRef, Patcher, UnknownObject};
pub use factory::{FactoryRegistry, ObjectFactory};
pub use exception::{UserError, UserException};
