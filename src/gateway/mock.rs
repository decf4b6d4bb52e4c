//! In-memory gateway used for dry-run mode and tests.
//!
//! Fills every order instantly at the requested terms and assigns
//! monotonically increasing tickets. Failures can be injected per
//! symbol to exercise the copier's retry paths.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use tracing::debug;

use crate::models::{InstrumentMeta, Position};

use super::{GatewayError, GatewayResult, OrderRequest, TerminalGateway};

pub struct MockGateway {
    label: String,
    balance: Decimal,
    next_ticket: AtomicU64,
    positions: Mutex<HashMap<u64, Position>>,
    metadata: Mutex<HashMap<String, InstrumentMeta>>,
    rejected_symbols: Mutex<HashSet<String>>,
}

impl MockGateway {
    pub fn new(label: &str, balance: Decimal) -> Self {
        Self {
            label: label.to_string(),
            balance,
            next_ticket: AtomicU64::new(1),
            positions: Mutex::new(HashMap::new()),
            metadata: Mutex::new(HashMap::new()),
            rejected_symbols: Mutex::new(HashSet::new()),
        }
    }

    /// Override metadata for a symbol (defaults to forex metadata).
    pub fn set_metadata(&self, symbol: &str, meta: InstrumentMeta) {
        self.metadata
            .lock()
            .unwrap()
            .insert(symbol.to_string(), meta);
    }

    /// Make every order operation on `symbol` fail with a rejection.
    pub fn reject_symbol(&self, symbol: &str) {
        self.rejected_symbols
            .lock()
            .unwrap()
            .insert(symbol.to_string());
    }

    pub fn clear_rejections(&self) {
        self.rejected_symbols.lock().unwrap().clear();
    }

    /// Seed a pre-existing position, e.g. for reconcile tests. Returns
    /// the assigned ticket.
    pub fn seed_position(&self, mut position: Position) -> u64 {
        let ticket = if position.ticket == 0 {
            self.next_ticket.fetch_add(1, Ordering::SeqCst)
        } else {
            position.ticket
        };
        position.ticket = ticket;
        self.positions.lock().unwrap().insert(ticket, position);
        ticket
    }

    /// Remove a position directly, simulating an external close
    /// (manual intervention or stop-out).
    pub fn drop_position(&self, ticket: u64) {
        self.positions.lock().unwrap().remove(&ticket);
    }

    fn check_symbol(&self, symbol: &str) -> GatewayResult<()> {
        if self.rejected_symbols.lock().unwrap().contains(symbol) {
            return Err(GatewayError::Rejected(10004));
        }
        Ok(())
    }
}

#[async_trait]
impl TerminalGateway for MockGateway {
    async fn snapshot(&self) -> GatewayResult<HashMap<u64, Position>> {
        Ok(self.positions.lock().unwrap().clone())
    }

    async fn balance(&self) -> GatewayResult<Decimal> {
        Ok(self.balance)
    }

    async fn submit_order(&self, request: OrderRequest) -> GatewayResult<u64> {
        self.check_symbol(&request.symbol)?;

        let ticket = self.next_ticket.fetch_add(1, Ordering::SeqCst);
        debug!(
            account = %self.label,
            ticket,
            symbol = %request.symbol,
            volume = %request.volume,
            "Simulated fill"
        );
        let position = Position {
            ticket,
            symbol: request.symbol,
            direction: request.direction,
            volume: request.volume,
            open_price: Decimal::ZERO,
            stop_loss: request.stop_loss,
            take_profit: request.take_profit,
            profit: Decimal::ZERO,
            opened_at: Utc::now(),
            comment: request.comment,
        };
        self.positions.lock().unwrap().insert(ticket, position);
        Ok(ticket)
    }

    async fn modify_order(
        &self,
        ticket: u64,
        stop_loss: Decimal,
        take_profit: Decimal,
    ) -> GatewayResult<()> {
        let mut positions = self.positions.lock().unwrap();
        let position = positions
            .get_mut(&ticket)
            .ok_or(GatewayError::UnknownTicket(ticket))?;
        let symbol = position.symbol.clone();
        self.check_symbol(&symbol)?;
        position.stop_loss = stop_loss;
        position.take_profit = take_profit;
        Ok(())
    }

    async fn close_order(&self, ticket: u64, volume: Option<Decimal>) -> GatewayResult<()> {
        let mut positions = self.positions.lock().unwrap();
        let (symbol, open_volume) = {
            let position = positions
                .get(&ticket)
                .ok_or(GatewayError::UnknownTicket(ticket))?;
            (position.symbol.clone(), position.volume)
        };
        self.check_symbol(&symbol)?;

        match volume {
            Some(v) if v < open_volume => {
                if let Some(position) = positions.get_mut(&ticket) {
                    position.volume -= v;
                }
            }
            _ => {
                positions.remove(&ticket);
            }
        }
        Ok(())
    }

    async fn instrument_metadata(&self, symbol: &str) -> GatewayResult<InstrumentMeta> {
        Ok(self
            .metadata
            .lock()
            .unwrap()
            .get(symbol)
            .cloned()
            .unwrap_or_else(InstrumentMeta::forex_default))
    }
}
