//! Master-side monitoring: polls snapshots and derives change events.

mod differ;
#[allow(clippy::module_inception)]
mod monitor;

pub use differ::diff;
pub use monitor::Monitor;
