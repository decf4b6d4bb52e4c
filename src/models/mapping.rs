//! Mapping record linking a master position to its slave copy.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::Direction;

/// Durable record for one copied position, keyed by master ticket.
///
/// Created when a copy succeeds, mutated on modify/partial-close,
/// deleted once the master closed and the slave close is confirmed.
/// The position facts are denormalized so the monitor can keep
/// re-deriving a `Closed` event after the master position has already
/// vanished from the raw snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingRecord {
    pub master_ticket: u64,
    pub slave_ticket: u64,
    pub symbol: String,
    pub direction: Direction,
    pub master_volume: Decimal,
    pub slave_volume: Decimal,
    pub master_open_price: Decimal,
    pub slave_open_price: Decimal,
    #[serde(default)]
    pub master_stop_loss: Decimal,
    #[serde(default)]
    pub master_take_profit: Decimal,
    /// Risk fraction used at open (informational)
    #[serde(default)]
    pub risk_percent: Decimal,
    pub opened_at: chrono::DateTime<chrono::Utc>,
}

impl MappingRecord {
    /// Reconstruct the last known master position from the stored facts.
    ///
    /// Used by the monitor when a mapped ticket is missing from the
    /// previous raw snapshot, so the differ keeps seeing it until the
    /// slave-side close is confirmed.
    pub fn as_master_position(&self) -> crate::models::Position {
        crate::models::Position {
            ticket: self.master_ticket,
            symbol: self.symbol.clone(),
            direction: self.direction,
            volume: self.master_volume,
            open_price: self.master_open_price,
            stop_loss: self.master_stop_loss,
            take_profit: self.master_take_profit,
            profit: Decimal::ZERO,
            opened_at: self.opened_at,
            comment: String::new(),
        }
    }
}
