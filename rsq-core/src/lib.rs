pub mod application;
mod codec;
mod connection;
mod driver;
mod endpoint;
mod manager;
mod message;
mod query;
mod settings;
pub mod uuid;
mod value;
mod worker_thread;

pub use ::anyhow::Context;
pub use codec::*;
pub use connection::*;
pub use driver::*;
pub use endpoint::*;
pub use manager::*;
pub use message::*;
pub use query::*;
pub use settings::*;
pub use value::*;
pub use worker_thread::*;

pub type Result<T> = anyhow::Result<T>;
pub type Error = anyhow::Error;
