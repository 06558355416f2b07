//! Outbound engine events for UI and monitoring collaborators.

use chrono::{DateTime, Utc};
use gridbot_core::types::{Position, Signal};
use gridbot_risk::RiskEvent;
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::broadcast;

/// Periodic portfolio summary.
#[derive(Debug, Clone, Serialize)]
pub struct PortfolioSnapshot {
    pub balance: Decimal,
    pub equity: Decimal,
    pub total_unrealized_pnl: Decimal,
    pub total_realized_pnl: Decimal,
    pub open_positions: usize,
    pub win_rate: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

/// Events published by the engine.
///
/// Consumers subscribe through a broadcast channel; a slow consumer
/// lags and drops, it never blocks the engine.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    Signal(Signal),
    PositionOpened(Position),
    PositionUpdated(Position),
    PositionClosed(Position),
    Risk(RiskEvent),
    Portfolio(PortfolioSnapshot),
}

/// Broadcast hub for engine events.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }

    /// Publish an event. Nothing listening is not an error.
    pub fn publish(&self, event: EngineEvent) {
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
