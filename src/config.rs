//! Copy-engine settings: sizing mode, filters, and limits.
//!
//! Values only; loading happens in `main` via clap/env. Defaults match
//! the original deployment (500ms poll, 20 points slippage).

use clap::ValueEnum;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// How a slave order volume is derived from a master position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum CopyMode {
    /// Mirror the master's lot size exactly
    SameLot,
    /// Always use the configured fixed lot
    FixedLot,
    /// Master lot multiplied by a configured ratio
    Ratio,
    /// Match the master's risk as a fraction of balance
    RiskPercent,
}

/// Configuration consumed by the copy engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CopySettings {
    /// Sizing mode for new copies
    pub mode: CopyMode,

    /// Lot size used by `FixedLot`
    pub fixed_lot: Decimal,

    /// Multiplier used by `Ratio`
    pub ratio: Decimal,

    /// Stop-loss distance in points assumed by `RiskPercent` when the
    /// master position has no stop-loss
    pub default_sl_points: Decimal,

    /// Cap on the replicated risk fraction (0.05 = 5%)
    pub max_risk_percent: Decimal,

    /// If non-empty, only these symbols are copied
    pub symbol_whitelist: Vec<String>,

    /// These symbols are never copied
    pub symbol_blacklist: Vec<String>,

    /// Maximum number of concurrently mapped slave positions; 0 = no cap
    pub max_slave_positions: usize,

    /// Maximum allowed slippage in points, passed to the gateway
    pub max_slippage_points: u32,

    /// Master polling interval
    pub poll_interval_ms: u64,
}

impl Default for CopySettings {
    fn default() -> Self {
        Self {
            mode: CopyMode::SameLot,
            fixed_lot: dec!(0.01),
            ratio: dec!(1.0),
            default_sl_points: dec!(200),
            max_risk_percent: dec!(0.05),
            symbol_whitelist: Vec::new(),
            symbol_blacklist: Vec::new(),
            max_slave_positions: 0,
            max_slippage_points: 20,
            poll_interval_ms: 500,
        }
    }
}

impl CopySettings {
    /// Symbol filter: the blacklist always rejects; a non-empty
    /// whitelist rejects everything not on it.
    pub fn symbol_allowed(&self, symbol: &str) -> bool {
        if self.symbol_blacklist.iter().any(|s| s == symbol) {
            return false;
        }
        if !self.symbol_whitelist.is_empty() {
            return self.symbol_whitelist.iter().any(|s| s == symbol);
        }
        true
    }

    pub fn position_cap_reached(&self, mapped_count: usize) -> bool {
        self.max_slave_positions > 0 && mapped_count >= self.max_slave_positions
    }
}
