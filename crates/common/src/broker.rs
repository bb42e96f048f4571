use async_trait::async_trait;

use crate::{Candle, Order, OrderUpdate, Result};

/// Cash and holdings of one bot, valued at the latest close.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Account {
    pub cash: f64,
    pub position_size: f64,
    pub portfolio_value: f64,
}

impl Account {
    pub fn has_position(&self) -> bool {
        self.position_size > 0.0
    }
}

/// Order execution seen from the strategy loop.
///
/// `PaperBroker` implements this for backtests and for live runs against a
/// tailed feed. The strategy loop is the only caller; it never holds more
/// than one unsettled order.
#[async_trait]
pub trait Broker: Send {
    /// Hand an order to the broker. Returns the notifications produced
    /// immediately (normally `Submitted` and `Accepted`).
    async fn submit(&mut self, order: Order) -> Result<Vec<OrderUpdate>>;

    /// Advance to a new candle: execute pending orders against it and mark
    /// holdings to its close.
    async fn settle(&mut self, candle: &Candle) -> Result<Vec<OrderUpdate>>;

    /// Cancel whatever is still pending (used at shutdown).
    async fn cancel_pending(&mut self) -> Result<Vec<OrderUpdate>>;

    fn account(&self) -> Account;
}
