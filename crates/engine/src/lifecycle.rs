use std::future::Future;

use chrono::Local;
use tracing::{debug, info, trace, warn};

use common::{
    round2, Action, Broker, BotStatus, Candle, DecisionSummary, EngineSettings, LogBuffer, Order,
    OrderSide, OrderUpdate, Result, StatusRecord, StatusSink,
};
use strategy::{CandleWindow, DecisionAgent};

use crate::feed::CandleFeed;

/// Where the loop is within the processing of one candle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Evaluate,
    Decide,
    PlaceOrder,
    OrderPending,
    OrderSettled,
}

/// Why `StrategyLoop::run` returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// The feed has no more candles.
    Exhausted,
    /// The shutdown future resolved.
    Stopped,
}

#[derive(Debug, Clone)]
struct PendingOrder {
    id: String,
    side: OrderSide,
    size: f64,
}

/// Per-candle state machine of one bot.
///
/// Every candle settles the broker, updates the window and publishes a
/// status record. A decision is requested only while no order is pending.
pub struct StrategyLoop {
    bot_id: String,
    symbol: String,
    settings: EngineSettings,
    agent: DecisionAgent,
    broker: Box<dyn Broker>,
    sink: Box<dyn StatusSink>,
    window: CandleWindow,
    logs: LogBuffer,
    phase: Phase,
    pending: Option<PendingOrder>,
    last_candle: Option<Candle>,
    last_decision: Option<DecisionSummary>,
    decisions_requested: usize,
    orders_placed: usize,
}

impl StrategyLoop {
    pub fn new(
        bot_id: impl Into<String>,
        symbol: impl Into<String>,
        settings: EngineSettings,
        max_history: usize,
        agent: DecisionAgent,
        broker: Box<dyn Broker>,
        sink: Box<dyn StatusSink>,
    ) -> Self {
        let logs = LogBuffer::new(settings.log_capacity);
        Self {
            bot_id: bot_id.into(),
            symbol: symbol.into(),
            settings,
            agent,
            broker,
            sink,
            window: CandleWindow::new(max_history),
            logs,
            phase: Phase::Idle,
            pending: None,
            last_candle: None,
            last_decision: None,
            decisions_requested: 0,
            orders_placed: 0,
        }
    }

    pub fn bot_id(&self) -> &str {
        &self.bot_id
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn has_pending_order(&self) -> bool {
        self.pending.is_some()
    }

    pub fn decisions_requested(&self) -> usize {
        self.decisions_requested
    }

    pub fn orders_placed(&self) -> usize {
        self.orders_placed
    }

    pub fn last_decision(&self) -> Option<&DecisionSummary> {
        self.last_decision.as_ref()
    }

    pub fn recent_logs(&self) -> Vec<String> {
        self.logs.to_vec()
    }

    /// Publish the `Initializing` record.
    pub fn announce(&mut self) {
        self.log_line(format!(
            "Bot {} started on {} ({} agent)",
            self.bot_id,
            self.symbol,
            self.agent.kind()
        ));
        self.publish("Initializing", BotStatus::Initializing, None);
    }

    /// Drive the loop until the feed ends or `shutdown` resolves.
    ///
    /// The shutdown future is only observed between candles.
    pub async fn run<F>(&mut self, feed: &mut dyn CandleFeed, shutdown: F) -> Result<LoopExit>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        loop {
            let next = tokio::select! {
                biased;
                _ = &mut shutdown => return Ok(LoopExit::Stopped),
                next = feed.next_candle() => next?,
            };
            match next {
                Some(candle) => self.on_candle(candle).await?,
                None => return Ok(LoopExit::Exhausted),
            }
        }
    }

    /// Process one candle completely.
    pub async fn on_candle(&mut self, candle: Candle) -> Result<()> {
        self.transition(Phase::Evaluate);
        self.last_candle = Some(candle);

        let updates = self.broker.settle(&candle).await?;
        for update in updates {
            self.on_order_update(update);
        }

        self.window.push(candle);
        self.publish("Update", BotStatus::Running, None);

        if let Some(pending) = &self.pending {
            trace!(order_id = %pending.id, "Order pending, skipping decision");
            self.transition(Phase::OrderPending);
            return Ok(());
        }

        self.transition(Phase::Decide);
        let decision = self.agent.decide(&self.window);
        self.decisions_requested += 1;
        self.last_decision = Some(decision.summary());

        let account = self.broker.account();
        let side = match decision.action {
            Action::Buy if !account.has_position() => Some(OrderSide::Buy),
            Action::Sell if account.has_position() => Some(OrderSide::Sell),
            Action::Hold => None,
            action => {
                debug!(%action, position = account.position_size, "Decision not actionable");
                None
            }
        };

        let Some(side) = side else {
            self.transition(Phase::Idle);
            return Ok(());
        };

        self.transition(Phase::PlaceOrder);
        let size = match side {
            OrderSide::Buy => self.settings.order_size,
            OrderSide::Sell => account.position_size,
        };
        let order = Order::market(self.symbol.clone(), side, size);
        self.pending = Some(PendingOrder {
            id: order.id.clone(),
            side,
            size,
        });
        self.orders_placed += 1;

        self.log_line(format!(
            "{side} SIGNAL ({}) - Price: {:.5}",
            decision.reason, candle.close
        ));
        info!(bot_id = %self.bot_id, %side, size, reason = %decision.reason, "Placing order");

        let event = match side {
            OrderSide::Buy => format!("Buy: {}", decision.reason),
            OrderSide::Sell => format!("Sell: {}", decision.reason),
        };
        self.publish(&event, BotStatus::Running, None);

        let updates = self.broker.submit(order).await?;
        self.transition(Phase::OrderPending);
        for update in updates {
            self.on_order_update(update);
        }
        Ok(())
    }

    /// Apply a broker notification. Terminal phases release the order lock.
    pub fn on_order_update(&mut self, update: OrderUpdate) {
        let Some(pending) = &self.pending else {
            debug!(order_id = %update.order_id, phase = %update.phase, "Update for unknown order");
            return;
        };
        if pending.id != update.order_id {
            warn!(order_id = %update.order_id, expected = %pending.id, "Update for a different order");
            return;
        }
        if !update.phase.is_terminal() {
            trace!(phase = %update.phase, "Order in flight");
            return;
        }

        let pending = self.pending.take();
        self.transition(Phase::OrderSettled);
        let line = match (update.fill, pending) {
            (Some(fill), _) => format!(
                "ORDER {}: {} {} @ {:.5}",
                update.phase, update.side, fill.size, fill.price
            ),
            (None, Some(p)) => format!("ORDER {}: {} {}", update.phase, p.side, p.size),
            (None, None) => format!("ORDER {}", update.phase),
        };
        self.log_line(line);
        self.publish(&format!("Order {}", update.phase), BotStatus::Running, None);
        self.transition(Phase::Idle);
    }

    /// Cancel anything pending and publish the terminal record.
    pub async fn finish(&mut self, status: BotStatus, event: &str, error: Option<String>) -> StatusRecord {
        if self.pending.is_some() {
            match self.broker.cancel_pending().await {
                Ok(updates) => updates.into_iter().for_each(|u| self.on_order_update(u)),
                Err(e) => warn!(bot_id = %self.bot_id, "Failed to cancel pending order: {e}"),
            }
        }

        let account = self.broker.account();
        let pnl = account.portfolio_value - self.settings.initial_capital;
        match &error {
            Some(e) => self.log_line(format!("{event}: {e}")),
            None => self.log_line(format!(
                "{event}. Final value {:.2} (PnL {:+.2})",
                account.portfolio_value, pnl
            )),
        }
        info!(
            bot_id = %self.bot_id,
            status = %status,
            final_value = round2(account.portfolio_value),
            pnl = round2(pnl),
            "Strategy loop finished"
        );

        let mut record = self.record(event, status, error);
        record.initial_capital = Some(round2(self.settings.initial_capital));
        record.final_portfolio_value = Some(round2(account.portfolio_value));
        record.final_pnl = Some(round2(pnl));
        self.write(&record);
        record
    }

    fn record(&self, event: &str, status: BotStatus, error: Option<String>) -> StatusRecord {
        let account = self.broker.account();
        StatusRecord {
            bot_id: self.bot_id.clone(),
            timestamp: Local::now(),
            event: event.to_string(),
            recent_logs: self.logs.to_vec(),
            portfolio_value: round2(account.portfolio_value),
            cash: round2(account.cash),
            position_size: account.position_size,
            last_close: self.last_candle.map(|c| c.close),
            status,
            last_decision: self.last_decision.clone(),
            error,
            initial_capital: None,
            final_portfolio_value: None,
            final_pnl: None,
        }
    }

    fn publish(&mut self, event: &str, status: BotStatus, error: Option<String>) {
        let record = self.record(event, status, error);
        self.write(&record);
    }

    fn write(&mut self, record: &StatusRecord) {
        if let Err(e) = self.sink.publish(record) {
            warn!(bot_id = %self.bot_id, "Status write failed: {e}");
        }
    }

    /// Lines are prefixed with the current candle's timestamp. Only the
    /// start-up line, written before any candle arrives, goes without one.
    fn log_line(&mut self, text: String) {
        let line = match &self.last_candle {
            Some(candle) => format!("{} {text}", stamp(candle)),
            None => text,
        };
        info!(bot_id = %self.bot_id, "{line}");
        self.logs.push(line);
    }

    fn transition(&mut self, to: Phase) {
        trace!(from = ?self.phase, ?to, "Phase transition");
        self.phase = to;
    }
}

fn stamp(candle: &Candle) -> String {
    candle.timestamp.format("%Y-%m-%d %H:%M").to_string()
}
