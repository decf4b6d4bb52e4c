//! Slave-side execution: lot sizing and the copy state machine.

#[allow(clippy::module_inception)]
mod copier;
pub mod lots;

pub use copier::TradeCopier;
pub use lots::{calculate, LotResult};
