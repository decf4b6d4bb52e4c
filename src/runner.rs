//! Engine orchestration: startup reconciliation, the two scheduling
//! topologies, and cooperative shutdown.
//!
//! Both topologies run the identical component contracts; they differ
//! only in who owns which gateway session:
//! - `Sequential`: one loop alternates between the master and slave
//!   sessions inside each cycle.
//! - `Dual`: a monitor task owns the master gateway and only writes to
//!   the event channel; a copier task owns the slave gateway and is the
//!   store's single writer. The channel is bounded and FIFO; a full
//!   channel blocks the monitor rather than dropping events.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::ValueEnum;
use tokio::sync::mpsc;
use tokio::time::interval;
use tracing::{error, info, warn};

use crate::config::CopySettings;
use crate::copier::TradeCopier;
use crate::gateway::TerminalGateway;
use crate::models::CopyJob;
use crate::monitor::Monitor;
use crate::notify::Notifier;
use crate::store::MappingStore;

/// One cycle's batch of events. Batching keeps cycle boundaries
/// visible to the copier so an invariant violation aborts exactly the
/// remainder of its own cycle.
type CycleBatch = Vec<CopyJob>;

const CHANNEL_CAPACITY: usize = 64;

/// Deployment topology, chosen at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Topology {
    /// Single control loop, one gateway session active at a time
    Sequential,
    /// Independent monitor and copier workers joined by the channel
    Dual,
}

pub struct Engine {
    master: Arc<dyn TerminalGateway>,
    slave: Arc<dyn TerminalGateway>,
    store: Arc<MappingStore>,
    notifier: Arc<dyn Notifier>,
    settings: CopySettings,
    shutdown: Arc<AtomicBool>,
}

impl Engine {
    pub fn new(
        master: Arc<dyn TerminalGateway>,
        slave: Arc<dyn TerminalGateway>,
        store: Arc<MappingStore>,
        notifier: Arc<dyn Notifier>,
        settings: CopySettings,
    ) -> Self {
        Self {
            master,
            slave,
            store,
            notifier,
            settings,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Handle for external shutdown control (signal handlers, tests).
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    fn copier(&self) -> TradeCopier {
        TradeCopier::new(
            self.slave.clone(),
            self.store.clone(),
            self.notifier.clone(),
            self.settings.clone(),
        )
    }

    /// Run until shutdown. Reconciles durable state against both live
    /// terminals before the first monitoring cycle.
    pub async fn run(&self, topology: Topology) -> Result<()> {
        self.reconcile_at_startup().await?;

        info!(?topology, poll_ms = self.settings.poll_interval_ms, "Starting copy engine");
        match topology {
            Topology::Sequential => self.run_sequential().await?,
            Topology::Dual => self.run_dual().await?,
        }

        self.store.flush().context("persisting mappings at shutdown")?;
        info!(mappings = self.store.len(), "Engine stopped, mappings persisted");
        Ok(())
    }

    /// Compare the loaded mapping state with both live accounts and
    /// apply the corrective actions before monitoring begins.
    async fn reconcile_at_startup(&self) -> Result<()> {
        let live_master = self
            .master
            .snapshot()
            .await
            .context("master snapshot for reconcile")?;
        let live_slave = self
            .slave
            .snapshot()
            .await
            .context("slave snapshot for reconcile")?;

        let actions = self.store.reconcile(&live_master, &live_slave)?;
        if actions.is_empty() {
            info!(mappings = self.store.len(), "Reconcile clean");
        } else {
            info!(actions = actions.len(), "Reconcile produced corrective actions");
            self.copier().apply_reconcile_actions(actions).await;
        }
        Ok(())
    }

    async fn run_sequential(&self) -> Result<()> {
        let mut monitor = Monitor::new(self.master.clone(), self.store.clone());
        let copier = self.copier();
        let mut tick = interval(Duration::from_millis(self.settings.poll_interval_ms));

        while !self.shutdown.load(Ordering::SeqCst) {
            tick.tick().await;

            let jobs = match monitor.poll_once().await {
                Ok(jobs) => jobs,
                Err(e) => {
                    warn!(error = %e, "Master poll failed, skipping cycle");
                    continue;
                }
            };
            if let Err(e) = copier.process_batch(jobs).await {
                error!(error = %e, "Invariant violation, aborting rest of cycle");
            }
        }
        Ok(())
    }

    async fn run_dual(&self) -> Result<()> {
        let (tx, mut rx) = mpsc::channel::<CycleBatch>(CHANNEL_CAPACITY);

        // Monitor worker: sole owner of the master gateway, write-only
        // towards the channel. Blocks on a full channel (backpressure).
        let mut monitor = Monitor::new(self.master.clone(), self.store.clone());
        let shutdown = self.shutdown.clone();
        let poll_ms = self.settings.poll_interval_ms;
        let monitor_task = tokio::spawn(async move {
            let mut tick = interval(Duration::from_millis(poll_ms));
            while !shutdown.load(Ordering::SeqCst) {
                tick.tick().await;
                match monitor.poll_once().await {
                    Ok(jobs) => {
                        if jobs.is_empty() {
                            continue;
                        }
                        if tx.send(jobs).await.is_err() {
                            // Copier side is gone; nothing left to do.
                            break;
                        }
                    }
                    Err(e) => warn!(error = %e, "Master poll failed, skipping cycle"),
                }
            }
            // tx drops here, closing the channel so the copier drains.
        });

        // Copier worker: sole owner of the slave gateway and the only
        // writer of the mapping store.
        let copier = self.copier();
        while let Some(batch) = rx.recv().await {
            if let Err(e) = copier.process_batch(batch).await {
                error!(error = %e, "Invariant violation, aborting rest of cycle");
            }
        }

        monitor_task.await.context("monitor worker panicked")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::MockGateway;
    use crate::models::{Direction, Position};
    use crate::notify::testing::RecordingNotifier;
    use chrono::Utc;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn position(ticket: u64, symbol: &str, volume: Decimal) -> Position {
        Position {
            ticket,
            symbol: symbol.to_string(),
            direction: Direction::Buy,
            volume,
            open_price: dec!(1.1000),
            stop_loss: dec!(1.0900),
            take_profit: Decimal::ZERO,
            profit: Decimal::ZERO,
            opened_at: Utc::now(),
            comment: String::new(),
        }
    }

    struct World {
        engine: Engine,
        master: Arc<MockGateway>,
        slave: Arc<MockGateway>,
        store: Arc<MappingStore>,
        _dir: tempfile::TempDir,
    }

    fn world(settings: CopySettings) -> World {
        let dir = tempfile::tempdir().unwrap();
        let master = Arc::new(MockGateway::new("master", dec!(10000)));
        let slave = Arc::new(MockGateway::new("slave", dec!(5000)));
        let store = Arc::new(MappingStore::open(dir.path().join("map.json")));
        let notifier = Arc::new(RecordingNotifier::new());
        let engine = Engine::new(
            master.clone(),
            slave.clone(),
            store.clone(),
            notifier,
            settings,
        );
        World {
            engine,
            master,
            slave,
            store,
            _dir: dir,
        }
    }

    #[tokio::test]
    async fn test_dual_topology_mirrors_master_end_to_end() {
        let mut settings = CopySettings::default();
        settings.poll_interval_ms = 10;
        let w = world(settings);

        let shutdown = w.engine.shutdown_handle();
        let master = w.master.clone();

        let driver = tokio::spawn(async move {
            // Let the first cycle seed the snapshot, then open.
            tokio::time::sleep(Duration::from_millis(50)).await;
            let ticket = master.seed_position(position(0, "EURUSD", dec!(0.5)));
            tokio::time::sleep(Duration::from_millis(100)).await;
            master.drop_position(ticket);
            tokio::time::sleep(Duration::from_millis(100)).await;
            shutdown.store(true, Ordering::SeqCst);
        });

        w.engine.run(Topology::Dual).await.unwrap();
        driver.await.unwrap();

        // Opened then closed: the slave account ends flat and the
        // mapping is gone.
        assert!(w.slave.snapshot().await.unwrap().is_empty());
        assert!(w.store.is_empty());
    }

    #[tokio::test]
    async fn test_sequential_topology_copies_open() {
        let mut settings = CopySettings::default();
        settings.poll_interval_ms = 10;
        let w = world(settings);

        let shutdown = w.engine.shutdown_handle();
        let master = w.master.clone();
        let driver = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            master.seed_position(position(0, "EURUSD", dec!(0.3)));
            tokio::time::sleep(Duration::from_millis(100)).await;
            shutdown.store(true, Ordering::SeqCst);
        });

        w.engine.run(Topology::Sequential).await.unwrap();
        driver.await.unwrap();

        let snap = w.slave.snapshot().await.unwrap();
        assert_eq!(snap.len(), 1);
        assert_eq!(snap.values().next().unwrap().volume, dec!(0.3));
        assert_eq!(w.store.len(), 1);
    }

    #[tokio::test]
    async fn test_startup_reconcile_closes_orphaned_slaves() {
        let settings = CopySettings::default();
        let w = world(settings);

        // A mapping survives from a previous run, but the master
        // position is gone; only the slave copy remains.
        let slave_ticket = w.slave.seed_position(position(0, "EURUSD", dec!(0.5)));
        w.store
            .add(crate::models::MappingRecord {
                master_ticket: 42,
                slave_ticket,
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
            })
            .unwrap();

        w.engine.reconcile_at_startup().await.unwrap();

        assert!(w.slave.snapshot().await.unwrap().is_empty());
        assert!(w.store.is_empty());
    }
}
