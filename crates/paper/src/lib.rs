use async_trait::async_trait;
use tracing::{debug, info, warn};

use common::{Account, Broker, Candle, Error, Fill, Order, OrderPhase, OrderSide, OrderUpdate, Result};

/// Simulated broker for backtests and paper-traded live runs.
///
/// A submitted market order is accepted at once and executed at the open of
/// the next candle with configurable slippage. Buys that cost more than the
/// available cash are margin-rejected; sells larger than the held position
/// are rejected. Holdings are marked to each candle's close.
pub struct PaperBroker {
    cash: f64,
    position: f64,
    last_close: Option<f64>,
    /// Slippage in basis points applied to all fills.
    slippage_bps: f64,
    pending: Option<Order>,
}

impl PaperBroker {
    pub fn new(initial_cash: f64, slippage_bps: f64) -> Self {
        info!(cash = initial_cash, slippage_bps, "PaperBroker initialized");
        Self {
            cash: initial_cash,
            position: 0.0,
            last_close: None,
            slippage_bps,
            pending: None,
        }
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    fn fill_price(&self, side: OrderSide, reference: f64) -> f64 {
        // Buys pay more, sells receive less
        match side {
            OrderSide::Buy => reference * (1.0 + self.slippage_bps / 10_000.0),
            OrderSide::Sell => reference * (1.0 - self.slippage_bps / 10_000.0),
        }
    }

    fn execute(&mut self, order: &Order, candle: &Candle) -> OrderUpdate {
        let price = self.fill_price(order.side, candle.open);
        let phase = match order.side {
            OrderSide::Buy => {
                let cost = price * order.size;
                if cost > self.cash {
                    warn!(cost, cash = self.cash, "Paper buy exceeds available cash");
                    OrderPhase::MarginRejected
                } else {
                    self.cash -= cost;
                    self.position += order.size;
                    OrderPhase::Completed
                }
            }
            OrderSide::Sell => {
                if order.size > self.position + 1e-12 {
                    warn!(size = order.size, held = self.position, "Paper sell exceeds position");
                    OrderPhase::Rejected
                } else {
                    self.cash += price * order.size;
                    self.position = (self.position - order.size).max(0.0);
                    OrderPhase::Completed
                }
            }
        };

        debug!(
            side = %order.side,
            open = candle.open,
            fill = price,
            size = order.size,
            phase = %phase,
            "Paper order settled"
        );

        OrderUpdate {
            order_id: order.id.clone(),
            side: order.side,
            phase,
            fill: (phase == OrderPhase::Completed).then_some(Fill {
                price,
                size: order.size,
            }),
        }
    }
}

fn update(order: &Order, phase: OrderPhase) -> OrderUpdate {
    OrderUpdate {
        order_id: order.id.clone(),
        side: order.side,
        phase,
        fill: None,
    }
}

#[async_trait]
impl Broker for PaperBroker {
    async fn submit(&mut self, order: Order) -> Result<Vec<OrderUpdate>> {
        if let Some(pending) = &self.pending {
            return Err(Error::Execution(format!(
                "order {} submitted while order {} is still pending",
                order.id, pending.id
            )));
        }
        if !(order.size.is_finite() && order.size > 0.0) {
            return Ok(vec![
                update(&order, OrderPhase::Submitted),
                update(&order, OrderPhase::Rejected),
            ]);
        }
        let updates = vec![
            update(&order, OrderPhase::Submitted),
            update(&order, OrderPhase::Accepted),
        ];
        self.pending = Some(order);
        Ok(updates)
    }

    async fn settle(&mut self, candle: &Candle) -> Result<Vec<OrderUpdate>> {
        let updates = match self.pending.take() {
            Some(order) => vec![self.execute(&order, candle)],
            None => Vec::new(),
        };
        self.last_close = Some(candle.close);
        Ok(updates)
    }

    async fn cancel_pending(&mut self) -> Result<Vec<OrderUpdate>> {
        Ok(self
            .pending
            .take()
            .map(|order| vec![update(&order, OrderPhase::Canceled)])
            .unwrap_or_default())
    }

    fn account(&self) -> Account {
        let mark = self.last_close.unwrap_or(0.0);
        Account {
            cash: self.cash,
            position_size: self.position,
            portfolio_value: self.cash + self.position * mark,
        }
    }
}
