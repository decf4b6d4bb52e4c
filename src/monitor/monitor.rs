//! Poll-cycle driver for the master account.
//!
//! Owns the master gateway exclusively. The mapping store is consulted
//! read-only: a still-mapped ticket missing from the last raw snapshot
//! is synthesized back into the "previous" view, so a `Closed` event
//! keeps re-firing until the copier confirms the slave close and drops
//! the mapping. That makes the poll cycle itself the retry driver.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::gateway::{GatewayResult, TerminalGateway};
use crate::models::{ChangeKind, CopyJob, Position, SizingFacts};
use crate::monitor::diff;
use crate::store::MappingStore;

pub struct Monitor {
    master: Arc<dyn TerminalGateway>,
    store: Arc<MappingStore>,
    previous: HashMap<u64, Position>,
    initialized: bool,
}

impl Monitor {
    pub fn new(master: Arc<dyn TerminalGateway>, store: Arc<MappingStore>) -> Self {
        Self {
            master,
            store,
            previous: HashMap::new(),
            initialized: false,
        }
    }

    /// One poll cycle: snapshot, diff against the augmented previous
    /// view, enrich `Opened` events with master-side sizing facts.
    ///
    /// The first successful cycle only seeds the snapshot and emits
    /// nothing; pre-existing positions are not copied retroactively.
    pub async fn poll_once(&mut self) -> GatewayResult<Vec<CopyJob>> {
        let current = self.master.snapshot().await?;

        if !self.initialized {
            info!(
                positions = current.len(),
                "Initial master snapshot, monitoring begins"
            );
            self.previous = current;
            self.initialized = true;
            return Ok(Vec::new());
        }

        // Re-insert still-mapped tickets the raw snapshot has already
        // forgotten, so unconfirmed closes keep diffing as Closed.
        let mut effective_prev = self.previous.clone();
        for mapping in self.store.all() {
            effective_prev
                .entry(mapping.master_ticket)
                .or_insert_with(|| mapping.as_master_position());
        }

        let events = diff(&effective_prev, &current);
        self.previous = current;

        if events.is_empty() {
            return Ok(Vec::new());
        }
        debug!(count = events.len(), "Detected master changes");

        let mut jobs = Vec::with_capacity(events.len());
        let mut balance = None;
        for event in events {
            let sizing = if let ChangeKind::Opened(position) = &event.kind {
                self.sizing_facts(&position.symbol, &mut balance).await
            } else {
                None
            };
            jobs.push(CopyJob { event, sizing });
        }
        Ok(jobs)
    }

    /// Capture master balance (once per cycle) and instrument metadata
    /// for an opened symbol. Failures degrade sizing, never the cycle.
    async fn sizing_facts(
        &self,
        symbol: &str,
        cached_balance: &mut Option<rust_decimal::Decimal>,
    ) -> Option<SizingFacts> {
        if cached_balance.is_none() {
            match self.master.balance().await {
                Ok(b) => *cached_balance = Some(b),
                Err(e) => {
                    warn!(error = %e, "Master balance unavailable, sizing will degrade");
                    return None;
                }
            }
        }
        match self.master.instrument_metadata(symbol).await {
            Ok(meta) => Some(SizingFacts {
                master_balance: (*cached_balance)?,
                master_meta: meta,
            }),
            Err(e) => {
                warn!(symbol = %symbol, error = %e, "Master metadata unavailable, sizing will degrade");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::MockGateway;
    use crate::models::{Direction, MappingRecord};
    use chrono::Utc;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn position(ticket: u64, volume: Decimal) -> Position {
        Position {
            ticket,
            symbol: "EURUSD".to_string(),
            direction: Direction::Buy,
            volume,
            open_price: dec!(1.1000),
            stop_loss: Decimal::ZERO,
            take_profit: Decimal::ZERO,
            profit: Decimal::ZERO,
            opened_at: Utc::now(),
            comment: String::new(),
        }
    }

    fn mapping(master: u64, slave: u64) -> MappingRecord {
        MappingRecord {
            master_ticket: master,
            slave_ticket: slave,
            symbol: "EURUSD".to_string(),
            direction: Direction::Buy,
            master_volume: dec!(0.5),
            slave_volume: dec!(0.5),
            master_open_price: dec!(1.1000),
            slave_open_price: dec!(1.1001),
            master_stop_loss: Decimal::ZERO,
            master_take_profit: Decimal::ZERO,
            risk_percent: Decimal::ZERO,
            opened_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_first_cycle_emits_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let master = Arc::new(MockGateway::new("master", dec!(10000)));
        master.seed_position(position(1, dec!(0.5)));
        let store = Arc::new(MappingStore::open(dir.path().join("m.json")));

        let mut monitor = Monitor::new(master.clone(), store);
        assert!(monitor.poll_once().await.unwrap().is_empty());

        // Second cycle with a new position picks up only the change.
        master.seed_position(position(2, dec!(0.3)));
        let jobs = monitor.poll_once().await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].event.master_ticket, 2);
        assert!(matches!(jobs[0].event.kind, ChangeKind::Opened(_)));
        assert!(jobs[0].sizing.is_some());
    }

    #[tokio::test]
    async fn test_closed_refires_until_mapping_removed() {
        let dir = tempfile::tempdir().unwrap();
        let master = Arc::new(MockGateway::new("master", dec!(10000)));
        let ticket = master.seed_position(position(1, dec!(0.5)));
        let store = Arc::new(MappingStore::open(dir.path().join("m.json")));
        store.add(mapping(ticket, 101)).unwrap();

        let mut monitor = Monitor::new(master.clone(), store.clone());
        monitor.poll_once().await.unwrap(); // seed

        master.drop_position(ticket);

        // The close keeps diffing as Closed while the mapping exists
        // (simulating a failing slave-side close).
        for _ in 0..3 {
            let jobs = monitor.poll_once().await.unwrap();
            assert_eq!(jobs.len(), 1);
            assert!(matches!(jobs[0].event.kind, ChangeKind::Closed(_)));
            assert_eq!(jobs[0].event.master_ticket, ticket);
        }

        // Copier confirms the close; the event stops firing.
        store.remove(ticket).unwrap();
        assert!(monitor.poll_once().await.unwrap().is_empty());
    }
}
