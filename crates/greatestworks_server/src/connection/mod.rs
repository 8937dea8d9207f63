//! Connection management: per-connection sessions and the registry of
//! live sessions.

mod registry;
mod session;

pub use registry::ConnectionRegistry;
pub use session::{ConnectionId, Session};
