//! Lot calculation: master position → slave order volume.
//!
//! Pure and total: every input produces a volume, clamped into the
//! slave instrument's `[volume_min, volume_max]` and floored to its
//! `volume_step`. A result of zero means "do not copy"; callers treat
//! it as a skip, never as an order.

use rust_decimal::Decimal;

use crate::config::{CopyMode, CopySettings};
use crate::models::{InstrumentMeta, Position};

/// Computed slave volume plus bookkeeping for the notifier path.
#[derive(Debug, Clone)]
pub struct LotResult {
    /// Step-floored, clamped volume; zero = skip
    pub volume: Decimal,

    /// Risk fraction actually replicated (risk-percent mode only)
    pub risk_percent: Decimal,

    /// Set when risk inputs were degenerate and the calculator fell
    /// back to same-lot sizing
    pub fallback: Option<String>,
}

impl LotResult {
    fn plain(volume: Decimal) -> Self {
        Self {
            volume,
            risk_percent: Decimal::ZERO,
            fallback: None,
        }
    }
}

/// Floor to the step grid, then clamp. A floored value below the
/// instrument minimum becomes zero.
pub fn round_to_step(volume: Decimal, meta: &InstrumentMeta) -> Decimal {
    if volume <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    let stepped = if meta.volume_step > Decimal::ZERO {
        (volume / meta.volume_step).floor() * meta.volume_step
    } else {
        volume
    };
    if stepped < meta.volume_min {
        return Decimal::ZERO;
    }
    stepped.min(meta.volume_max)
}

/// Derive the slave order volume for a newly opened master position.
///
/// `master_facts` carries the master-side balance and instrument
/// metadata captured by the monitor at observation time; risk-percent
/// sizing needs both and degrades to same-lot when either is missing
/// or degenerate.
pub fn calculate(
    settings: &CopySettings,
    master: &Position,
    master_balance: Option<Decimal>,
    master_meta: Option<&InstrumentMeta>,
    slave_balance: Decimal,
    slave_meta: &InstrumentMeta,
) -> LotResult {
    match settings.mode {
        CopyMode::SameLot => LotResult::plain(round_to_step(master.volume, slave_meta)),
        CopyMode::FixedLot => LotResult::plain(round_to_step(settings.fixed_lot, slave_meta)),
        CopyMode::Ratio => {
            LotResult::plain(round_to_step(master.volume * settings.ratio, slave_meta))
        }
        CopyMode::RiskPercent => {
            match risk_percent_volume(
                settings,
                master,
                master_balance,
                master_meta,
                slave_balance,
                slave_meta,
            ) {
                Ok((volume, risk)) => LotResult {
                    volume,
                    risk_percent: risk,
                    fallback: None,
                },
                Err(detail) => LotResult {
                    volume: round_to_step(master.volume, slave_meta),
                    risk_percent: Decimal::ZERO,
                    fallback: Some(detail),
                },
            }
        }
    }
}

/// Risk-matching formula. Returns the failure reason when an input is
/// degenerate, so the caller falls back to same-lot and flags it.
fn risk_percent_volume(
    settings: &CopySettings,
    master: &Position,
    master_balance: Option<Decimal>,
    master_meta: Option<&InstrumentMeta>,
    slave_balance: Decimal,
    slave_meta: &InstrumentMeta,
) -> Result<(Decimal, Decimal), String> {
    let master_balance = master_balance.ok_or("master balance unavailable")?;
    let master_meta = master_meta.ok_or("master instrument metadata unavailable")?;

    if master_balance <= Decimal::ZERO {
        return Err("master balance is zero".to_string());
    }
    if master_meta.tick_size.is_zero() || slave_meta.tick_size.is_zero() {
        return Err("tick size is zero".to_string());
    }
    if master_meta.tick_value.is_zero() || slave_meta.tick_value.is_zero() {
        return Err("tick value is zero".to_string());
    }

    // Stop-loss distance in points; configured default when no SL set.
    let sl_points = match master.stop_loss_distance() {
        Some(distance) => distance / master_meta.tick_size,
        None => settings.default_sl_points,
    };
    if sl_points.is_zero() {
        return Err("stop-loss distance is zero".to_string());
    }

    let master_risk =
        master.volume * sl_points * master_meta.tick_value / master_meta.tick_size;
    let risk_percent = (master_risk / master_balance).min(settings.max_risk_percent);

    let slave_risk = slave_balance * risk_percent;
    let risk_per_lot = sl_points * slave_meta.tick_value / slave_meta.tick_size;
    if risk_per_lot.is_zero() {
        return Err("slave risk per lot is zero".to_string());
    }

    let raw = slave_risk / risk_per_lot;
    Ok((round_to_step(raw, slave_meta), risk_percent))
}
