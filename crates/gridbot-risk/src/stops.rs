//! Protective stop computation and the trailing-stop state machine.

use gridbot_core::types::Side;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Compute the initial stop-loss and take-profit prices for an entry.
///
/// Long: stop below, target above; shorts mirrored.
pub fn compute_stop_levels(
    side: Side,
    entry: Decimal,
    stop_loss_pct: Decimal,
    take_profit_pct: Decimal,
) -> (Decimal, Decimal) {
    match side {
        Side::Buy => (
            entry * (Decimal::ONE - stop_loss_pct),
            entry * (Decimal::ONE + take_profit_pct),
        ),
        Side::Sell => (
            entry * (Decimal::ONE + stop_loss_pct),
            entry * (Decimal::ONE - take_profit_pct),
        ),
    }
}

/// Trailing-stop lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrailingState {
    /// Waiting for price to reach the arm level (the initial take-profit)
    Inactive,
    /// Arm level touched, trailing begins from the observed extreme
    Armed,
    /// Stop is live and ratcheting with each new favorable extreme
    Trailing,
}

/// What the caller must do after a price update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrailingAction {
    /// Nothing to do
    Hold,
    /// Stop level moved; replace the resting protective order
    StopMoved(Decimal),
    /// Price crossed the trailing stop; close the position
    Exit(Decimal),
}

/// Per-position trailing stop.
///
/// Arms when price first reaches the initial take-profit level, then
/// ratchets the stop monotonically in the favorable direction only. The
/// stop never retreats on a pullback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrailingStop {
    side: Side,
    arm_price: Decimal,
    trailing_pct: Decimal,
    state: TrailingState,
    extreme: Option<Decimal>,
    stop: Option<Decimal>,
}

impl TrailingStop {
    /// Create an inactive trailing stop for an entry at `entry`.
    pub fn new(
        side: Side,
        entry: Decimal,
        take_profit_pct: Decimal,
        trailing_pct: Decimal,
    ) -> Self {
        let arm_price = match side {
            Side::Buy => entry * (Decimal::ONE + take_profit_pct),
            Side::Sell => entry * (Decimal::ONE - take_profit_pct),
        };
        Self {
            side,
            arm_price,
            trailing_pct,
            state: TrailingState::Inactive,
            extreme: None,
            stop: None,
        }
    }

    /// Current state.
    pub fn state(&self) -> TrailingState {
        self.state
    }

    /// Current stop level, once trailing.
    pub fn stop(&self) -> Option<Decimal> {
        self.stop
    }

    /// The price at which the stop arms.
    pub fn arm_price(&self) -> Decimal {
        self.arm_price
    }

    /// Apply a price observation.
    pub fn on_price(&mut self, price: Decimal) -> TrailingAction {
        match self.state {
            TrailingState::Inactive => {
                let armed = match self.side {
                    Side::Buy => price >= self.arm_price,
                    Side::Sell => price <= self.arm_price,
                };
                if armed {
                    self.state = TrailingState::Armed;
                    self.extreme = Some(price);
                    return self.ratchet(price);
                }
                TrailingAction::Hold
            }
            TrailingState::Armed | TrailingState::Trailing => {
                if let Some(stop) = self.stop {
                    let crossed = match self.side {
                        Side::Buy => price <= stop,
                        Side::Sell => price >= stop,
                    };
                    if crossed {
                        return TrailingAction::Exit(stop);
                    }
                }
                self.update_extreme(price);
                self.ratchet(price)
            }
        }
    }

    fn update_extreme(&mut self, price: Decimal) {
        let extreme = self.extreme.get_or_insert(price);
        match self.side {
            Side::Buy => {
                if price > *extreme {
                    *extreme = price;
                }
            }
            Side::Sell => {
                if price < *extreme {
                    *extreme = price;
                }
            }
        }
    }

    /// Recompute the stop off the extreme; only ever move it favorably.
    fn ratchet(&mut self, _price: Decimal) -> TrailingAction {
        let Some(extreme) = self.extreme else {
            return TrailingAction::Hold;
        };
        let candidate = match self.side {
            Side::Buy => extreme * (Decimal::ONE - self.trailing_pct),
            Side::Sell => extreme * (Decimal::ONE + self.trailing_pct),
        };

        let improved = match (self.stop, self.side) {
            (None, _) => true,
            (Some(stop), Side::Buy) => candidate > stop,
            (Some(stop), Side::Sell) => candidate < stop,
        };

        if improved {
            self.stop = Some(candidate);
            self.state = TrailingState::Trailing;
            TrailingAction::StopMoved(candidate)
        } else {
            TrailingAction::Hold
        }
    }
}
