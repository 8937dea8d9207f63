//! Service bootstrap: listener, connection tasks and lifecycle.

mod core;
mod handlers;
mod stats;

pub use self::core::{DoneReason, GameService, ServiceDependencies, ServiceState};
pub use stats::{ServiceStats, StatsSnapshot};
