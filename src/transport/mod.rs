pub mod socketio;
pub mod traits;

#[cfg(test)]
pub(crate) mod mock;

pub use socketio::{SocketIoConnector, DEFAULT_PATH};
pub use traits::{Link, LinkEvent, Transport};
