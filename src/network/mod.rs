//! Network boundary
//!
//! The engine performs no socket I/O. It frames objects in the peer
//! envelope and exchanges bytes with a [`Transport`] supplied by the caller.

pub mod envelope;
pub mod transport;

pub use envelope::{unwrap, unwrap_object, wrap, wrap_object, MAGIC, OBJECT_COMMAND};
pub use transport::Transport;
