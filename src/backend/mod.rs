mod conn;
mod stream;

pub use conn::{BackendConn, CancelHandle, ConnState, PreparedStatement};
