//! Change events derived by diffing two master snapshots.
//!
//! Events are transient: they flow from the monitor side to the copier
//! side and are never persisted. Only their effects survive, via the
//! mapping store.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::Position;

/// What changed for one master ticket between two poll cycles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ChangeKind {
    /// Ticket appeared in the current snapshot
    Opened(Position),

    /// Ticket disappeared; carries the last known position
    Closed(Position),

    /// Stop-loss or take-profit changed in place
    Modified { old: Box<Position>, new: Box<Position> },

    /// Volume strictly decreased but stayed positive
    PartiallyClosed {
        old_volume: Decimal,
        new_volume: Decimal,
        position: Position,
    },
}

impl ChangeKind {
    pub fn label(&self) -> &'static str {
        match self {
            ChangeKind::Opened(_) => "opened",
            ChangeKind::Closed(_) => "closed",
            ChangeKind::Modified { .. } => "modified",
            ChangeKind::PartiallyClosed { .. } => "partial_close",
        }
    }
}

/// A single detected change on the master account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub master_ticket: u64,
    pub kind: ChangeKind,
    pub observed_at: DateTime<Utc>,
}

impl ChangeEvent {
    pub fn new(master_ticket: u64, kind: ChangeKind) -> Self {
        Self {
            master_ticket,
            kind,
            observed_at: Utc::now(),
        }
    }
}

/// Master-side sizing facts captured at observation time.
///
/// Risk-percent sizing needs the master balance and instrument
/// metadata, but only the monitor may talk to the master gateway, so
/// the facts travel with the event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SizingFacts {
    pub master_balance: Decimal,
    pub master_meta: crate::models::InstrumentMeta,
}

/// A change event plus whatever master-side context the copier needs
/// to act on it. This is what crosses the monitor→copier channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CopyJob {
    pub event: ChangeEvent,
    /// Present on `Opened` events when master facts were obtainable
    pub sizing: Option<SizingFacts>,
}

impl CopyJob {
    pub fn bare(event: ChangeEvent) -> Self {
        Self {
            event,
            sizing: None,
        }
    }
}
