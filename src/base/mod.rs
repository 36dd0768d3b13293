mod log;

pub mod varint;
pub mod utils;

pub use log::*;
pub use utils::*;
pub use varint::Varint;
