//! Durable master→slave ticket mapping with startup reconciliation.
//!
//! The store is the only state that must survive a restart. Every
//! mutation rewrites the full record set to disk before returning
//! (write-through), via a temp file and atomic rename. A missing or
//! corrupt file is recoverable: the store starts empty and the startup
//! reconcile pass sorts out the live terminals.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::models::{MappingRecord, Position};

/// Corrective action produced by reconciliation. Conservative by
/// construction: it only ever closes or forgets, never opens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileAction {
    /// Master closed while we were down; the slave copy must be closed.
    CloseSlave { master_ticket: u64, slave_ticket: u64 },

    /// Slave position vanished externally (manual close, stop-out);
    /// the mapping was dropped and is never re-opened.
    Forget { master_ticket: u64, slave_ticket: u64 },
}

pub struct MappingStore {
    path: PathBuf,
    mappings: Mutex<HashMap<u64, MappingRecord>>,
}

impl MappingStore {
    /// Open the store, loading the last durable state if present.
    /// A corrupt file is logged and treated as empty.
    pub fn open(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let mappings = match std::fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str::<HashMap<u64, MappingRecord>>(&raw) {
                Ok(loaded) => {
                    info!(count = loaded.len(), path = %path.display(), "Loaded position mappings");
                    for m in loaded.values() {
                        debug!(
                            master = m.master_ticket,
                            slave = m.slave_ticket,
                            symbol = %m.symbol,
                            volume = %m.slave_volume,
                            "Restored mapping"
                        );
                    }
                    loaded
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Mapping file corrupt, starting empty");
                    HashMap::new()
                }
            },
            Err(_) => {
                info!(path = %path.display(), "No mapping file found, starting fresh");
                HashMap::new()
            }
        };

        Self {
            path,
            mappings: Mutex::new(mappings),
        }
    }

    pub fn len(&self) -> usize {
        self.mappings.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, master_ticket: u64) -> bool {
        self.mappings.lock().unwrap().contains_key(&master_ticket)
    }

    pub fn lookup(&self, master_ticket: u64) -> Option<MappingRecord> {
        self.mappings.lock().unwrap().get(&master_ticket).cloned()
    }

    pub fn all(&self) -> Vec<MappingRecord> {
        self.mappings.lock().unwrap().values().cloned().collect()
    }

    /// Record a successful copy. Rejects a second mapping for the same
    /// master ticket or a slave ticket already referenced elsewhere;
    /// either is an invariant violation, not a recoverable condition.
    pub fn add(&self, record: MappingRecord) -> Result<()> {
        let mut mappings = self.mappings.lock().unwrap();
        if mappings.contains_key(&record.master_ticket) {
            anyhow::bail!(
                "duplicate mapping for master ticket #{}",
                record.master_ticket
            );
        }
        if mappings
            .values()
            .any(|m| m.slave_ticket == record.slave_ticket)
        {
            anyhow::bail!(
                "slave ticket #{} already referenced by another mapping",
                record.slave_ticket
            );
        }

        debug!(
            master = record.master_ticket,
            slave = record.slave_ticket,
            symbol = %record.symbol,
            "Mapping added"
        );
        mappings.insert(record.master_ticket, record);
        self.persist(&mappings)
    }

    /// Drop the mapping for a closed position. Removing an unknown
    /// ticket is a no-op.
    pub fn remove(&self, master_ticket: u64) -> Result<()> {
        let mut mappings = self.mappings.lock().unwrap();
        if let Some(record) = mappings.remove(&master_ticket) {
            debug!(
                master = master_ticket,
                slave = record.slave_ticket,
                "Mapping removed"
            );
            self.persist(&mappings)?;
        }
        Ok(())
    }

    /// Store the master's new SL/TP after a successful slave modify.
    pub fn update_sl_tp(
        &self,
        master_ticket: u64,
        stop_loss: Decimal,
        take_profit: Decimal,
    ) -> Result<()> {
        let mut mappings = self.mappings.lock().unwrap();
        if let Some(record) = mappings.get_mut(&master_ticket) {
            record.master_stop_loss = stop_loss;
            record.master_take_profit = take_profit;
            self.persist(&mappings)?;
        }
        Ok(())
    }

    /// Store both volumes after a successful partial close.
    pub fn update_volumes(
        &self,
        master_ticket: u64,
        master_volume: Decimal,
        slave_volume: Decimal,
    ) -> Result<()> {
        let mut mappings = self.mappings.lock().unwrap();
        if let Some(record) = mappings.get_mut(&master_ticket) {
            record.master_volume = master_volume;
            record.slave_volume = slave_volume;
            self.persist(&mappings)?;
        }
        Ok(())
    }

    /// Compare durable state against both live terminals.
    ///
    /// Mappings whose slave ticket is gone are dropped immediately
    /// (closed externally, never re-opened). Mappings whose master
    /// ticket is gone are returned as `CloseSlave` actions for the
    /// caller to execute; they stay in the store until the close is
    /// confirmed. Live master positions without a mapping are left
    /// alone: they predate management and copying them retroactively
    /// risks duplicate exposure.
    pub fn reconcile(
        &self,
        live_master: &HashMap<u64, Position>,
        live_slave: &HashMap<u64, Position>,
    ) -> Result<Vec<ReconcileAction>> {
        let mut mappings = self.mappings.lock().unwrap();
        let mut actions = Vec::new();
        let mut dropped = Vec::new();

        for (master_ticket, record) in mappings.iter() {
            if !live_slave.contains_key(&record.slave_ticket) {
                warn!(
                    master = *master_ticket,
                    slave = record.slave_ticket,
                    "Slave position gone, dropping mapping"
                );
                actions.push(ReconcileAction::Forget {
                    master_ticket: *master_ticket,
                    slave_ticket: record.slave_ticket,
                });
                dropped.push(*master_ticket);
            } else if !live_master.contains_key(master_ticket) {
                warn!(
                    master = *master_ticket,
                    slave = record.slave_ticket,
                    "Master position gone, scheduling slave close"
                );
                actions.push(ReconcileAction::CloseSlave {
                    master_ticket: *master_ticket,
                    slave_ticket: record.slave_ticket,
                });
            }
        }

        if !dropped.is_empty() {
            for ticket in &dropped {
                mappings.remove(ticket);
            }
            self.persist(&mappings)?;
        }

        actions.sort_by_key(|a| match a {
            ReconcileAction::CloseSlave { master_ticket, .. } => *master_ticket,
            ReconcileAction::Forget { master_ticket, .. } => *master_ticket,
        });
        Ok(actions)
    }

    /// Final durable write at shutdown.
    pub fn flush(&self) -> Result<()> {
        let mappings = self.mappings.lock().unwrap();
        self.persist(&mappings)
    }

    fn persist(&self, mappings: &HashMap<u64, MappingRecord>) -> Result<()> {
        let raw = serde_json::to_string_pretty(mappings)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, raw)
            .with_context(|| format!("writing mapping file {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("replacing mapping file {}", self.path.display()))?;
        Ok(())
    }
}
