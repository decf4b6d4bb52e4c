//! Execution state machine: applies master change events to the slave
//! account and keeps the mapping store consistent.
//!
//! Per master ticket the lifecycle is implicit in mapping presence:
//! untracked (no mapping) → tracked (mapping). A failed gateway call
//! mutates nothing, so the next poll cycle re-derives the event and
//! retries naturally. Only two things are fatal and abort the rest of
//! the cycle: a duplicate mapping insert and a negative computed
//! volume, both programming-invariant violations.

use std::sync::Arc;

use anyhow::Result;
use rust_decimal::Decimal;
use tracing::debug;

use crate::config::CopySettings;
use crate::copier::lots;
use crate::gateway::{OrderRequest, TerminalGateway};
use crate::models::{ChangeKind, CopyJob, MappingRecord, Position, SizingFacts};
use crate::notify::{Notifier, Outcome, SkipReason};
use crate::store::{MappingStore, ReconcileAction};

pub struct TradeCopier {
    slave: Arc<dyn TerminalGateway>,
    store: Arc<MappingStore>,
    notifier: Arc<dyn Notifier>,
    settings: CopySettings,
}

impl TradeCopier {
    pub fn new(
        slave: Arc<dyn TerminalGateway>,
        store: Arc<MappingStore>,
        notifier: Arc<dyn Notifier>,
        settings: CopySettings,
    ) -> Self {
        Self {
            slave,
            store,
            notifier,
            settings,
        }
    }

    /// Process one cycle's worth of events in order. Stops at the first
    /// invariant violation; transient failures are reported and do not
    /// interrupt the batch.
    pub async fn process_batch(&self, jobs: Vec<CopyJob>) -> Result<()> {
        for job in jobs {
            self.process(job).await?;
        }
        Ok(())
    }

    /// Process a single event. `Err` means an invariant violation; the
    /// caller must abort the remainder of the cycle.
    pub async fn process(&self, job: CopyJob) -> Result<()> {
        let ticket = job.event.master_ticket;
        debug!(master = ticket, kind = job.event.kind.label(), "Processing event");

        match job.event.kind {
            ChangeKind::Opened(position) => self.handle_opened(position, job.sizing).await,
            ChangeKind::Closed(position) => {
                self.handle_closed(ticket, &position).await;
                Ok(())
            }
            ChangeKind::Modified { new, .. } => {
                self.handle_modified(ticket, &new).await;
                Ok(())
            }
            ChangeKind::PartiallyClosed {
                old_volume,
                new_volume,
                position,
            } => {
                self.handle_partial_close(ticket, old_volume, new_volume, &position)
                    .await;
                Ok(())
            }
        }
    }

    async fn handle_opened(
        &self,
        position: Position,
        sizing: Option<SizingFacts>,
    ) -> Result<()> {
        let ticket = position.ticket;

        // Idempotence: mapping presence is the only "already copied"
        // signal, even if the differ misfires twice.
        if self.store.contains(ticket) {
            self.notifier.report(Outcome::Skipped {
                master_ticket: ticket,
                symbol: position.symbol.clone(),
                reason: SkipReason::AlreadyCopied,
            });
            return Ok(());
        }

        if !self.settings.symbol_allowed(&position.symbol) {
            let reason = if self
                .settings
                .symbol_blacklist
                .iter()
                .any(|s| s == &position.symbol)
            {
                SkipReason::Blacklisted
            } else {
                SkipReason::NotWhitelisted
            };
            self.notifier.report(Outcome::Skipped {
                master_ticket: ticket,
                symbol: position.symbol.clone(),
                reason,
            });
            return Ok(());
        }

        if self.settings.position_cap_reached(self.store.len()) {
            self.notifier.report(Outcome::Skipped {
                master_ticket: ticket,
                symbol: position.symbol.clone(),
                reason: SkipReason::PositionCapReached,
            });
            return Ok(());
        }

        let slave_meta = match self.slave.instrument_metadata(&position.symbol).await {
            Ok(meta) => meta,
            Err(e) => {
                self.notifier.report(Outcome::CopyFailed {
                    master_ticket: ticket,
                    symbol: position.symbol.clone(),
                    error: e.to_string(),
                });
                return Ok(());
            }
        };
        let slave_balance = match self.slave.balance().await {
            Ok(balance) => balance,
            Err(e) => {
                self.notifier.report(Outcome::CopyFailed {
                    master_ticket: ticket,
                    symbol: position.symbol.clone(),
                    error: e.to_string(),
                });
                return Ok(());
            }
        };

        let (master_balance, master_meta) = match &sizing {
            Some(facts) => (Some(facts.master_balance), Some(&facts.master_meta)),
            None => (None, None),
        };
        let lot = lots::calculate(
            &self.settings,
            &position,
            master_balance,
            master_meta,
            slave_balance,
            &slave_meta,
        );

        if let Some(detail) = &lot.fallback {
            self.notifier.report(Outcome::LotFallback {
                master_ticket: ticket,
                symbol: position.symbol.clone(),
                detail: detail.clone(),
            });
        }

        if lot.volume < Decimal::ZERO {
            anyhow::bail!(
                "lot calculator produced negative volume {} for #{ticket}",
                lot.volume
            );
        }
        if lot.volume.is_zero() {
            self.notifier.report(Outcome::Skipped {
                master_ticket: ticket,
                symbol: position.symbol.clone(),
                reason: SkipReason::BelowMinimumLot,
            });
            return Ok(());
        }

        let request = OrderRequest {
            symbol: position.symbol.clone(),
            direction: position.direction,
            volume: lot.volume,
            stop_loss: position.stop_loss,
            take_profit: position.take_profit,
            comment: format!("CT#{ticket}"),
            max_slippage_points: self.settings.max_slippage_points,
        };

        match self.slave.submit_order(request).await {
            Ok(slave_ticket) => {
                // A duplicate insert here is fatal: the slave order is
                // live and the state is no longer trustworthy.
                self.store.add(MappingRecord {
                    master_ticket: ticket,
                    slave_ticket,
                    symbol: position.symbol.clone(),
                    direction: position.direction,
                    master_volume: position.volume,
                    slave_volume: lot.volume,
                    master_open_price: position.open_price,
                    slave_open_price: Decimal::ZERO,
                    master_stop_loss: position.stop_loss,
                    master_take_profit: position.take_profit,
                    risk_percent: lot.risk_percent,
                    opened_at: position.opened_at,
                })?;
                self.notifier.report(Outcome::Copied {
                    master_ticket: ticket,
                    slave_ticket,
                    symbol: position.symbol,
                    volume: lot.volume,
                });
            }
            Err(e) => {
                // No mapping was created, so the master position will
                // diff as Opened again next cycle.
                self.notifier.report(Outcome::CopyFailed {
                    master_ticket: ticket,
                    symbol: position.symbol,
                    error: e.to_string(),
                });
            }
        }
        Ok(())
    }

    async fn handle_closed(&self, ticket: u64, position: &Position) {
        let Some(mapping) = self.store.lookup(ticket) else {
            // Never copied (filtered, cap, etc.), not an error.
            self.notifier.report(Outcome::Skipped {
                master_ticket: ticket,
                symbol: position.symbol.clone(),
                reason: SkipReason::NoMapping,
            });
            return;
        };

        match self.slave.close_order(mapping.slave_ticket, None).await {
            Ok(()) => {
                if let Err(e) = self.store.remove(ticket) {
                    self.notifier.report(Outcome::CloseFailed {
                        master_ticket: ticket,
                        slave_ticket: mapping.slave_ticket,
                        error: format!("mapping removal failed: {e}"),
                    });
                    return;
                }
                self.notifier.report(Outcome::Closed {
                    master_ticket: ticket,
                    slave_ticket: mapping.slave_ticket,
                    symbol: mapping.symbol,
                });
            }
            Err(crate::gateway::GatewayError::UnknownTicket(_)) => {
                // Slave side already flat; the mapping must not outlive
                // both positions being absent.
                let _ = self.store.remove(ticket);
                self.notifier.report(Outcome::Closed {
                    master_ticket: ticket,
                    slave_ticket: mapping.slave_ticket,
                    symbol: mapping.symbol,
                });
            }
            Err(e) => {
                // Mapping intact: the monitor keeps re-deriving Closed
                // until this succeeds.
                self.notifier.report(Outcome::CloseFailed {
                    master_ticket: ticket,
                    slave_ticket: mapping.slave_ticket,
                    error: e.to_string(),
                });
            }
        }
    }

    async fn handle_modified(&self, ticket: u64, new: &Position) {
        let Some(mapping) = self.store.lookup(ticket) else {
            self.notifier.report(Outcome::Skipped {
                master_ticket: ticket,
                symbol: new.symbol.clone(),
                reason: SkipReason::NoMapping,
            });
            return;
        };

        match self
            .slave
            .modify_order(mapping.slave_ticket, new.stop_loss, new.take_profit)
            .await
        {
            Ok(()) => {
                if self
                    .store
                    .update_sl_tp(ticket, new.stop_loss, new.take_profit)
                    .is_ok()
                {
                    self.notifier.report(Outcome::SlTpUpdated {
                        master_ticket: ticket,
                        slave_ticket: mapping.slave_ticket,
                        stop_loss: new.stop_loss,
                        take_profit: new.take_profit,
                    });
                }
            }
            Err(e) => {
                // Stale SL/TP persists until the next genuine change
                // retries the whole update.
                self.notifier.report(Outcome::SlTpUpdateFailed {
                    master_ticket: ticket,
                    slave_ticket: mapping.slave_ticket,
                    error: e.to_string(),
                });
            }
        }
    }

    async fn handle_partial_close(
        &self,
        ticket: u64,
        old_volume: Decimal,
        new_volume: Decimal,
        position: &Position,
    ) {
        let Some(mapping) = self.store.lookup(ticket) else {
            self.notifier.report(Outcome::Skipped {
                master_ticket: ticket,
                symbol: position.symbol.clone(),
                reason: SkipReason::NoMapping,
            });
            return;
        };

        if old_volume.is_zero() {
            self.notifier.report(Outcome::PartialCloseFailed {
                master_ticket: ticket,
                slave_ticket: mapping.slave_ticket,
                error: "previous master volume is zero".to_string(),
            });
            return;
        }

        let slave_meta = match self.slave.instrument_metadata(&mapping.symbol).await {
            Ok(meta) => meta,
            Err(e) => {
                self.notifier.report(Outcome::PartialCloseFailed {
                    master_ticket: ticket,
                    slave_ticket: mapping.slave_ticket,
                    error: e.to_string(),
                });
                return;
            }
        };

        // Proportional reduction preserves the risk ratio fixed at
        // open, independent of the sizing mode that opened it.
        let target = lots::round_to_step(
            mapping.slave_volume * new_volume / old_volume,
            &slave_meta,
        );

        // The master is still open; reducing to zero would fully close
        // the slave. Defer instead and wait for a closeable reduction.
        if target.is_zero() {
            self.notifier
                .report(Outcome::PartialCloseDeferred { master_ticket: ticket });
            return;
        }

        let close_volume = mapping.slave_volume - target;
        if close_volume <= Decimal::ZERO {
            self.notifier
                .report(Outcome::PartialCloseDeferred { master_ticket: ticket });
            return;
        }

        match self
            .slave
            .close_order(mapping.slave_ticket, Some(close_volume))
            .await
        {
            Ok(()) => {
                if self.store.update_volumes(ticket, new_volume, target).is_ok() {
                    self.notifier.report(Outcome::PartiallyClosed {
                        master_ticket: ticket,
                        slave_ticket: mapping.slave_ticket,
                        closed_volume: close_volume,
                        remaining_volume: target,
                    });
                }
            }
            Err(e) => {
                self.notifier.report(Outcome::PartialCloseFailed {
                    master_ticket: ticket,
                    slave_ticket: mapping.slave_ticket,
                    error: e.to_string(),
                });
            }
        }
    }

    /// Execute the startup reconcile actions: close slave copies whose
    /// master died while the process was down. `Forget` actions were
    /// already applied by the store and are only reported here.
    pub async fn apply_reconcile_actions(&self, actions: Vec<ReconcileAction>) {
        for action in actions {
            match action {
                ReconcileAction::CloseSlave {
                    master_ticket,
                    slave_ticket,
                } => match self.slave.close_order(slave_ticket, None).await {
                    Ok(()) => {
                        let _ = self.store.remove(master_ticket);
                        self.notifier.report(Outcome::ReconcileClosedSlave {
                            master_ticket,
                            slave_ticket,
                        });
                    }
                    Err(crate::gateway::GatewayError::UnknownTicket(_)) => {
                        let _ = self.store.remove(master_ticket);
                        self.notifier.report(Outcome::ReconcileForgotten {
                            master_ticket,
                            slave_ticket,
                        });
                    }
                    Err(e) => {
                        self.notifier.report(Outcome::ReconcileCloseFailed {
                            master_ticket,
                            slave_ticket,
                            error: e.to_string(),
                        });
                    }
                },
                ReconcileAction::Forget {
                    master_ticket,
                    slave_ticket,
                } => {
                    self.notifier.report(Outcome::ReconcileForgotten {
                        master_ticket,
                        slave_ticket,
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CopyMode;
    use crate::gateway::MockGateway;
    use crate::models::{ChangeEvent, Direction};
    use crate::notify::testing::RecordingNotifier;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn master_position(ticket: u64, symbol: &str, volume: Decimal) -> Position {
        Position {
            ticket,
            symbol: symbol.to_string(),
            direction: Direction::Buy,
            volume,
            open_price: dec!(1.1000),
            stop_loss: dec!(1.0900),
            take_profit: dec!(1.1200),
            profit: Decimal::ZERO,
            opened_at: Utc::now(),
            comment: String::new(),
        }
    }

    struct Fixture {
        copier: TradeCopier,
        slave: Arc<MockGateway>,
        store: Arc<MappingStore>,
        notifier: Arc<RecordingNotifier>,
        _dir: tempfile::TempDir,
    }

    fn fixture(settings: CopySettings) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let slave = Arc::new(MockGateway::new("slave", dec!(5000)));
        let store = Arc::new(MappingStore::open(dir.path().join("map.json")));
        let notifier = Arc::new(RecordingNotifier::new());
        let copier = TradeCopier::new(
            slave.clone(),
            store.clone(),
            notifier.clone(),
            settings,
        );
        Fixture {
            copier,
            slave,
            store,
            notifier,
            _dir: dir,
        }
    }

    fn opened(position: Position) -> CopyJob {
        CopyJob::bare(ChangeEvent::new(
            position.ticket,
            ChangeKind::Opened(position),
        ))
    }

    fn closed(position: Position) -> CopyJob {
        CopyJob::bare(ChangeEvent::new(
            position.ticket,
            ChangeKind::Closed(position),
        ))
    }

    #[tokio::test]
    async fn test_open_copies_and_maps() {
        let fx = fixture(CopySettings::default());
        let pos = master_position(1, "EURUSD", dec!(0.5));

        fx.copier.process(opened(pos)).await.unwrap();

        let mapping = fx.store.lookup(1).expect("mapping created");
        assert_eq!(mapping.slave_volume, dec!(0.5));
        let snap = fx.slave.snapshot().await.unwrap();
        let slave_pos = &snap[&mapping.slave_ticket];
        assert_eq!(slave_pos.stop_loss, dec!(1.0900));
        assert_eq!(slave_pos.take_profit, dec!(1.1200));
        assert_eq!(slave_pos.comment, "CT#1");
        assert!(matches!(
            fx.notifier.outcomes()[0],
            Outcome::Copied { master_ticket: 1, .. }
        ));
    }

    #[tokio::test]
    async fn test_duplicate_opened_submits_once() {
        let fx = fixture(CopySettings::default());
        let pos = master_position(1, "EURUSD", dec!(0.5));

        fx.copier.process(opened(pos.clone())).await.unwrap();
        fx.copier.process(opened(pos)).await.unwrap();

        assert_eq!(fx.slave.snapshot().await.unwrap().len(), 1);
        let outcomes = fx.notifier.outcomes();
        assert!(matches!(
            outcomes[1],
            Outcome::Skipped {
                reason: SkipReason::AlreadyCopied,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_blacklist_and_whitelist_skips() {
        let mut settings = CopySettings::default();
        settings.symbol_blacklist = vec!["XAUUSD".to_string()];
        settings.symbol_whitelist = vec!["EURUSD".to_string()];
        let fx = fixture(settings);

        fx.copier
            .process(opened(master_position(1, "XAUUSD", dec!(0.1))))
            .await
            .unwrap();
        fx.copier
            .process(opened(master_position(2, "GBPUSD", dec!(0.1))))
            .await
            .unwrap();

        assert!(fx.slave.snapshot().await.unwrap().is_empty());
        let outcomes = fx.notifier.outcomes();
        assert!(matches!(
            outcomes[0],
            Outcome::Skipped {
                reason: SkipReason::Blacklisted,
                ..
            }
        ));
        assert!(matches!(
            outcomes[1],
            Outcome::Skipped {
                reason: SkipReason::NotWhitelisted,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_position_cap_skips() {
        let mut settings = CopySettings::default();
        settings.max_slave_positions = 1;
        let fx = fixture(settings);

        fx.copier
            .process(opened(master_position(1, "EURUSD", dec!(0.1))))
            .await
            .unwrap();
        fx.copier
            .process(opened(master_position(2, "EURUSD", dec!(0.1))))
            .await
            .unwrap();

        assert_eq!(fx.store.len(), 1);
        assert!(matches!(
            fx.notifier.outcomes()[1],
            Outcome::Skipped {
                reason: SkipReason::PositionCapReached,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_below_minimum_lot_skips() {
        let mut settings = CopySettings::default();
        settings.mode = CopyMode::Ratio;
        settings.ratio = dec!(0.01);
        let fx = fixture(settings);

        // 0.1 * 0.01 = 0.001, floors below the 0.01 minimum.
        fx.copier
            .process(opened(master_position(1, "EURUSD", dec!(0.1))))
            .await
            .unwrap();

        assert!(fx.store.is_empty());
        assert!(matches!(
            fx.notifier.outcomes()[0],
            Outcome::Skipped {
                reason: SkipReason::BelowMinimumLot,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_failed_open_leaves_no_mapping() {
        let fx = fixture(CopySettings::default());
        fx.slave.reject_symbol("EURUSD");

        fx.copier
            .process(opened(master_position(1, "EURUSD", dec!(0.5))))
            .await
            .unwrap();

        assert!(fx.store.is_empty());
        assert!(matches!(
            fx.notifier.outcomes()[0],
            Outcome::CopyFailed { master_ticket: 1, .. }
        ));

        // Next cycle re-derives Opened; now the broker accepts.
        fx.slave.clear_rejections();
        fx.copier
            .process(opened(master_position(1, "EURUSD", dec!(0.5))))
            .await
            .unwrap();
        assert!(fx.store.contains(1));
    }

    #[tokio::test]
    async fn test_close_removes_mapping() {
        let fx = fixture(CopySettings::default());
        let pos = master_position(1, "EURUSD", dec!(0.5));
        fx.copier.process(opened(pos.clone())).await.unwrap();

        fx.copier.process(closed(pos)).await.unwrap();

        assert!(fx.store.is_empty());
        assert!(fx.slave.snapshot().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_close_without_mapping_is_policy_skip() {
        let fx = fixture(CopySettings::default());

        fx.copier
            .process(closed(master_position(9, "EURUSD", dec!(0.5))))
            .await
            .unwrap();

        let outcomes = fx.notifier.outcomes();
        assert_eq!(outcomes.len(), 1);
        assert!(matches!(
            outcomes[0],
            Outcome::Skipped {
                master_ticket: 9,
                reason: SkipReason::NoMapping,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_failed_close_keeps_mapping_for_retry() {
        let fx = fixture(CopySettings::default());
        let pos = master_position(1, "EURUSD", dec!(0.5));
        fx.copier.process(opened(pos.clone())).await.unwrap();

        fx.slave.reject_symbol("EURUSD");
        fx.copier.process(closed(pos.clone())).await.unwrap();
        assert!(fx.store.contains(1));

        fx.slave.clear_rejections();
        fx.copier.process(closed(pos)).await.unwrap();
        assert!(fx.store.is_empty());
    }

    #[tokio::test]
    async fn test_modify_updates_slave_and_mapping() {
        let fx = fixture(CopySettings::default());
        let pos = master_position(1, "EURUSD", dec!(0.5));
        fx.copier.process(opened(pos.clone())).await.unwrap();

        let mut moved = pos.clone();
        moved.stop_loss = dec!(1.0950);
        let job = CopyJob::bare(ChangeEvent::new(
            1,
            ChangeKind::Modified {
                old: Box::new(pos),
                new: Box::new(moved),
            },
        ));
        fx.copier.process(job).await.unwrap();

        let mapping = fx.store.lookup(1).unwrap();
        assert_eq!(mapping.master_stop_loss, dec!(1.0950));
        let snap = fx.slave.snapshot().await.unwrap();
        assert_eq!(snap[&mapping.slave_ticket].stop_loss, dec!(1.0950));
    }

    #[tokio::test]
    async fn test_partial_close_is_proportional() {
        let mut settings = CopySettings::default();
        settings.mode = CopyMode::Ratio;
        settings.ratio = dec!(0.1);
        let fx = fixture(settings);

        // Master 1.0 lot -> slave 0.10 lot.
        let pos = master_position(1, "EURUSD", dec!(1.0));
        fx.copier.process(opened(pos.clone())).await.unwrap();
        assert_eq!(fx.store.lookup(1).unwrap().slave_volume, dec!(0.10));

        // Master reduces 1.0 -> 0.4; slave must go 0.10 -> 0.04.
        let mut reduced = pos.clone();
        reduced.volume = dec!(0.4);
        let job = CopyJob::bare(ChangeEvent::new(
            1,
            ChangeKind::PartiallyClosed {
                old_volume: dec!(1.0),
                new_volume: dec!(0.4),
                position: reduced,
            },
        ));
        fx.copier.process(job).await.unwrap();

        let mapping = fx.store.lookup(1).unwrap();
        assert_eq!(mapping.slave_volume, dec!(0.04));
        assert_eq!(mapping.master_volume, dec!(0.4));
        let snap = fx.slave.snapshot().await.unwrap();
        assert_eq!(snap[&mapping.slave_ticket].volume, dec!(0.04));
    }

    #[tokio::test]
    async fn test_partial_close_defers_when_rounding_to_zero() {
        let fx = fixture(CopySettings::default());
        let mut pos = master_position(1, "EURUSD", dec!(0.02));
        pos.volume = dec!(0.02);
        fx.copier.process(opened(pos.clone())).await.unwrap();

        // 0.02 -> 0.005 would put the slave below one step.
        let mut reduced = pos.clone();
        reduced.volume = dec!(0.005);
        let job = CopyJob::bare(ChangeEvent::new(
            1,
            ChangeKind::PartiallyClosed {
                old_volume: dec!(0.02),
                new_volume: dec!(0.005),
                position: reduced,
            },
        ));
        fx.copier.process(job).await.unwrap();

        // Untouched: mapping volume unchanged, slave position intact.
        let mapping = fx.store.lookup(1).unwrap();
        assert_eq!(mapping.slave_volume, dec!(0.02));
        assert!(matches!(
            fx.notifier.outcomes().last().unwrap(),
            Outcome::PartialCloseDeferred { master_ticket: 1 }
        ));
    }

    #[tokio::test]
    async fn test_reconcile_close_slave_action() {
        let fx = fixture(CopySettings::default());
        let pos = master_position(1, "EURUSD", dec!(0.5));
        fx.copier.process(opened(pos)).await.unwrap();
        let slave_ticket = fx.store.lookup(1).unwrap().slave_ticket;

        fx.copier
            .apply_reconcile_actions(vec![ReconcileAction::CloseSlave {
                master_ticket: 1,
                slave_ticket,
            }])
            .await;

        assert!(fx.store.is_empty());
        assert!(fx.slave.snapshot().await.unwrap().is_empty());
        assert!(matches!(
            fx.notifier.outcomes().last().unwrap(),
            Outcome::ReconcileClosedSlave { master_ticket: 1, .. }
        ));
    }
}
