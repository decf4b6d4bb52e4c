//! Terminal gateway abstraction over one MT5 account session.
//!
//! Two logical instances exist at runtime (master-facing, slave-facing);
//! each addresses exactly one account. The core never shares a gateway
//! handle across the monitor/copier boundary.

mod mock;

pub use mock::MockGateway;

use std::collections::HashMap;

use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;

use crate::models::{Direction, InstrumentMeta, Position};

/// Failure modes of gateway calls. Timeouts and lost connections are
/// transient; the poll cycle is the retry driver, so none of these
/// carry retry state.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("connection to terminal lost")]
    ConnectionLost,

    #[error("gateway call timed out")]
    Timeout,

    #[error("order rejected by broker (retcode {0})")]
    Rejected(i32),

    #[error("requested slippage exceeded")]
    SlippageExceeded,

    #[error("symbol {0} unavailable on this account")]
    SymbolUnavailable(String),

    #[error("ticket {0} unknown to this account")]
    UnknownTicket(u64),
}

pub type GatewayResult<T> = Result<T, GatewayError>;

/// Market order request submitted to the slave account.
#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub symbol: String,
    pub direction: Direction,
    pub volume: Decimal,
    /// Zero = no stop-loss
    pub stop_loss: Decimal,
    /// Zero = no take-profit
    pub take_profit: Decimal,
    pub comment: String,
    pub max_slippage_points: u32,
}

/// One trading-account session.
///
/// `snapshot` is the only call the monitor path makes; the copier path
/// uses the order operations. All calls have a bounded timeout supplied
/// by the implementation; a timeout surfaces as `GatewayError::Timeout`.
#[async_trait]
pub trait TerminalGateway: Send + Sync {
    /// Current open positions, keyed by ticket.
    async fn snapshot(&self) -> GatewayResult<HashMap<u64, Position>>;

    /// Account balance.
    async fn balance(&self) -> GatewayResult<Decimal>;

    /// Submit a market order; returns the new ticket.
    async fn submit_order(&self, request: OrderRequest) -> GatewayResult<u64>;

    /// Update SL/TP on an open position.
    async fn modify_order(
        &self,
        ticket: u64,
        stop_loss: Decimal,
        take_profit: Decimal,
    ) -> GatewayResult<()>;

    /// Close a position; `volume = Some(v)` closes `v` lots of it,
    /// `None` closes it fully.
    async fn close_order(&self, ticket: u64, volume: Option<Decimal>) -> GatewayResult<()>;

    /// Trading metadata for a symbol on this account.
    async fn instrument_metadata(&self, symbol: &str) -> GatewayResult<InstrumentMeta>;
}
