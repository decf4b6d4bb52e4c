//! Position model representing an open trade on one MT5 account.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Direction of a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Buy,
    Sell,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Buy => "BUY",
            Direction::Sell => "SELL",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An open position as reported by a terminal snapshot.
///
/// The ticket is stable for the life of the position. Only `volume`
/// (via partial close), `stop_loss`/`take_profit` and `profit` change
/// in place; a SL/TP of zero means "not set".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    /// Broker-assigned ticket, unique within one account
    pub ticket: u64,

    /// Instrument symbol (e.g., "EURUSD")
    pub symbol: String,

    /// Trade direction
    pub direction: Direction,

    /// Lot size, positive
    pub volume: Decimal,

    /// Fill price at open
    pub open_price: Decimal,

    /// Stop-loss price level, zero = not set
    #[serde(default)]
    pub stop_loss: Decimal,

    /// Take-profit price level, zero = not set
    #[serde(default)]
    pub take_profit: Decimal,

    /// Floating profit, informational only (never an event trigger)
    #[serde(default)]
    pub profit: Decimal,

    /// When the position was opened
    pub opened_at: DateTime<Utc>,

    /// Broker comment field
    #[serde(default)]
    pub comment: String,
}

impl Position {
    pub fn has_stop_loss(&self) -> bool {
        !self.stop_loss.is_zero()
    }

    pub fn has_take_profit(&self) -> bool {
        !self.take_profit.is_zero()
    }

    /// Stop-loss distance from the open price in price units, if a
    /// stop-loss is set.
    pub fn stop_loss_distance(&self) -> Option<Decimal> {
        if self.has_stop_loss() {
            Some((self.open_price - self.stop_loss).abs())
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample() -> Position {
        Position {
            ticket: 1001,
            symbol: "EURUSD".to_string(),
            direction: Direction::Buy,
            volume: dec!(0.5),
            open_price: dec!(1.1000),
            stop_loss: dec!(1.0900),
            take_profit: Decimal::ZERO,
            profit: Decimal::ZERO,
            opened_at: Utc::now(),
            comment: String::new(),
        }
    }

    #[test]
    fn test_stop_loss_distance() {
        let pos = sample();
        assert_eq!(pos.stop_loss_distance(), Some(dec!(0.0100)));

        let mut no_sl = sample();
        no_sl.stop_loss = Decimal::ZERO;
        assert_eq!(no_sl.stop_loss_distance(), None);
        assert!(!no_sl.has_stop_loss());
    }
}
