//! Outcome reporting. Every state change the copier or reconciler makes
//! produces exactly one `Outcome`; delivery is fire-and-forget and must
//! never block or fail into the copy path.

use rust_decimal::Decimal;
use tracing::{error, info, warn};

/// Why an event was intentionally not acted on. Policy skips are never
/// retried and never treated as errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Blacklisted,
    NotWhitelisted,
    PositionCapReached,
    BelowMinimumLot,
    NoMapping,
    AlreadyCopied,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::Blacklisted => "symbol blacklisted",
            SkipReason::NotWhitelisted => "symbol not on whitelist",
            SkipReason::PositionCapReached => "max slave positions reached",
            SkipReason::BelowMinimumLot => "computed volume below minimum lot",
            SkipReason::NoMapping => "no mapping for master ticket",
            SkipReason::AlreadyCopied => "mapping already exists",
        }
    }
}

/// User-visible result of processing one event or reconcile action.
#[derive(Debug, Clone)]
pub enum Outcome {
    Copied {
        master_ticket: u64,
        slave_ticket: u64,
        symbol: String,
        volume: Decimal,
    },
    CopyFailed {
        master_ticket: u64,
        symbol: String,
        error: String,
    },
    Skipped {
        master_ticket: u64,
        symbol: String,
        reason: SkipReason,
    },
    Closed {
        master_ticket: u64,
        slave_ticket: u64,
        symbol: String,
    },
    CloseFailed {
        master_ticket: u64,
        slave_ticket: u64,
        error: String,
    },
    SlTpUpdated {
        master_ticket: u64,
        slave_ticket: u64,
        stop_loss: Decimal,
        take_profit: Decimal,
    },
    SlTpUpdateFailed {
        master_ticket: u64,
        slave_ticket: u64,
        error: String,
    },
    PartiallyClosed {
        master_ticket: u64,
        slave_ticket: u64,
        closed_volume: Decimal,
        remaining_volume: Decimal,
    },
    PartialCloseFailed {
        master_ticket: u64,
        slave_ticket: u64,
        error: String,
    },
    /// Reduction would round to zero; kept the slave position as-is
    PartialCloseDeferred { master_ticket: u64 },
    /// Lot calculator fell back to same-lot sizing (degraded, not fatal)
    LotFallback {
        master_ticket: u64,
        symbol: String,
        detail: String,
    },
    ReconcileClosedSlave {
        master_ticket: u64,
        slave_ticket: u64,
    },
    ReconcileCloseFailed {
        master_ticket: u64,
        slave_ticket: u64,
        error: String,
    },
    ReconcileForgotten {
        master_ticket: u64,
        slave_ticket: u64,
    },
}

/// Outbound reporting sink. Implementations must not panic and must
/// return promptly; the copier calls this inline.
pub trait Notifier: Send + Sync {
    fn report(&self, outcome: Outcome);
}

/// Renders outcomes through `tracing`. Stands in at the delivery
/// boundary for an external messenger.
pub struct LogNotifier;

impl LogNotifier {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LogNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Notifier for LogNotifier {
    fn report(&self, outcome: Outcome) {
        match &outcome {
            Outcome::Copied {
                master_ticket,
                slave_ticket,
                symbol,
                volume,
            } => info!(
                master = master_ticket,
                slave = slave_ticket,
                symbol = %symbol,
                volume = %volume,
                "Copied position"
            ),
            Outcome::CopyFailed {
                master_ticket,
                symbol,
                error,
            } => error!(master = master_ticket, symbol = %symbol, error = %error, "Copy failed"),
            Outcome::Skipped {
                master_ticket,
                symbol,
                reason,
            } => info!(
                master = master_ticket,
                symbol = %symbol,
                reason = reason.as_str(),
                "Skipped event"
            ),
            Outcome::Closed {
                master_ticket,
                slave_ticket,
                symbol,
            } => info!(
                master = master_ticket,
                slave = slave_ticket,
                symbol = %symbol,
                "Closed slave position"
            ),
            Outcome::CloseFailed {
                master_ticket,
                slave_ticket,
                error,
            } => error!(
                master = master_ticket,
                slave = slave_ticket,
                error = %error,
                "Close failed, will retry next cycle"
            ),
            Outcome::SlTpUpdated {
                master_ticket,
                slave_ticket,
                stop_loss,
                take_profit,
            } => info!(
                master = master_ticket,
                slave = slave_ticket,
                sl = %stop_loss,
                tp = %take_profit,
                "SL/TP updated"
            ),
            Outcome::SlTpUpdateFailed {
                master_ticket,
                slave_ticket,
                error,
            } => error!(
                master = master_ticket,
                slave = slave_ticket,
                error = %error,
                "SL/TP update failed"
            ),
            Outcome::PartiallyClosed {
                master_ticket,
                slave_ticket,
                closed_volume,
                remaining_volume,
            } => info!(
                master = master_ticket,
                slave = slave_ticket,
                closed = %closed_volume,
                remaining = %remaining_volume,
                "Partially closed slave position"
            ),
            Outcome::PartialCloseFailed {
                master_ticket,
                slave_ticket,
                error,
            } => error!(
                master = master_ticket,
                slave = slave_ticket,
                error = %error,
                "Partial close failed"
            ),
            Outcome::PartialCloseDeferred { master_ticket } => warn!(
                master = master_ticket,
                "Partial close deferred, reduction rounds to zero"
            ),
            Outcome::LotFallback {
                master_ticket,
                symbol,
                detail,
            } => warn!(
                master = master_ticket,
                symbol = %symbol,
                detail = %detail,
                "Lot calculation fell back to same-lot sizing"
            ),
            Outcome::ReconcileClosedSlave {
                master_ticket,
                slave_ticket,
            } => info!(
                master = master_ticket,
                slave = slave_ticket,
                "Reconcile: closed orphaned slave position"
            ),
            Outcome::ReconcileCloseFailed {
                master_ticket,
                slave_ticket,
                error,
            } => error!(
                master = master_ticket,
                slave = slave_ticket,
                error = %error,
                "Reconcile: slave close failed"
            ),
            Outcome::ReconcileForgotten {
                master_ticket,
                slave_ticket,
            } => warn!(
                master = master_ticket,
                slave = slave_ticket,
                "Reconcile: slave position gone, mapping dropped"
            ),
        }
    }
}
