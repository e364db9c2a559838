pub mod backend;
mod buffer;
pub mod constant;
pub mod error;
mod opts;
pub mod protocol;

#[cfg(feature = "server")]
pub mod server;

pub use backend::{BackendConn, CancelHandle, ConnState, PreparedStatement};
pub use opts::Opts;

#[cfg(test)]
mod opts_test;
