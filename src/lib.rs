pub mod base;
pub mod status;
pub mod config;
pub mod stream;
pub mod rpc;
pub mod dispatch;
pub mod communicator;
pub mod serve;

pub type Result<T> = std::result::Result<T, Status>;

#[macro_use]
extern crate lazy_static;
extern crate serde_yaml;
#[macro_use]
extern crate serde;

pub use crate::status::*;
pub use crate::communicator::Communicator;
