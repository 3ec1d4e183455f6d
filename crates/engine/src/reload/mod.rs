//! Configuration reload and graceful shutdown.

mod coordinator;
mod signals;

pub use coordinator::{DrainCoordinator, InFlight};
pub use signals::{SignalManager, SignalType};
