//! Orchestration: agent registration, the event bus, shared state and the
//! two-phase automation cycle.

mod framework;
mod report;
pub mod subscriptions;

pub use framework::{Framework, FrameworkError};
pub use report::{CycleReport, PhaseReport};
pub use subscriptions::install_standard_subscriptions;
