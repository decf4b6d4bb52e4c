//! Per-symbol trading metadata supplied by the terminal gateway.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Instrument constraints and tick economics.
///
/// Master and slave brokers may report different values for the
/// "same" symbol; the lot calculator always uses the metadata of the
/// account it is sizing for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstrumentMeta {
    /// Monetary value of one tick per lot
    pub tick_value: Decimal,

    /// Price increment of one tick
    pub tick_size: Decimal,

    /// Lot increment
    pub volume_step: Decimal,

    /// Smallest tradable lot
    pub volume_min: Decimal,

    /// Largest tradable lot
    pub volume_max: Decimal,
}

impl InstrumentMeta {
    /// Typical forex metadata, handy as a test fixture and mock default.
    pub fn forex_default() -> Self {
        use rust_decimal_macros::dec;
        Self {
            tick_value: dec!(1.0),
            tick_size: dec!(0.00001),
            volume_step: dec!(0.01),
            volume_min: dec!(0.01),
            volume_max: dec!(100.0),
        }
    }
}
