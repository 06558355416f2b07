//! Grid ladder placement, rung recycling and DCA scheduling.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use gridbot_core::error::EngineError;
use gridbot_core::types::{GridLadder, OrderRequest, RungState, Side};
use gridbot_risk::{DynamicLimits, RiskManager};
use gridbot_strategies::{StrategyConfig, StrategyKind};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::executor::OrderExecutor;

/// A running ladder for one strategy instance.
#[derive(Debug)]
struct ActiveGrid {
    strategy_id: String,
    ladder: GridLadder,
}

/// DCA schedule for one strategy instance.
#[derive(Debug)]
struct DcaSchedule {
    interval: ChronoDuration,
    next_due: DateTime<Utc>,
}

/// Places and maintains grid ladders, recycles filled rungs, and runs
/// the DCA timers.
pub struct GridEngine {
    executor: Arc<OrderExecutor>,
    risk: RiskManager,
    grids: HashMap<String, ActiveGrid>,
    dca: HashMap<String, DcaSchedule>,
}

impl GridEngine {
    pub fn new(executor: Arc<OrderExecutor>, risk: RiskManager) -> Self {
        Self {
            executor,
            risk,
            grids: HashMap::new(),
            dca: HashMap::new(),
        }
    }

    /// Number of active ladders.
    pub fn active_grids(&self) -> usize {
        self.grids.len()
    }

    /// Start a grid strategy: build the ladder around the reference
    /// price and rest a limit order at every sided rung.
    ///
    /// The hedged variant splits the investment by `hedge_ratio` into a
    /// long ladder and a short ladder over the same bounds.
    pub async fn start_grid(
        &mut self,
        config: &StrategyConfig,
        reference: Decimal,
        limits: &DynamicLimits,
    ) -> Result<(), EngineError> {
        let params = config
            .grid
            .as_ref()
            .ok_or_else(|| EngineError::Config(format!("{}: missing grid parameters", config.id)))?;

        if self.grids.len() >= limits.max_grids {
            return Err(EngineError::Config(format!(
                "{}: grid limit reached ({})",
                config.id, limits.max_grids
            )));
        }
        if params.investment > limits.max_investment {
            return Err(EngineError::Config(format!(
                "{}: investment {} exceeds limit {}",
                config.id, params.investment, limits.max_investment
            )));
        }

        match params.hedge_ratio {
            None => {
                let ladder = self
                    .build_and_place(config, params.investment, reference)
                    .await?;
                self.grids.insert(
                    config.id.clone(),
                    ActiveGrid {
                        strategy_id: config.id.clone(),
                        ladder,
                    },
                );
            }
            Some(ratio) => {
                let long_investment = params.investment * ratio;
                let short_investment = params.investment - long_investment;

                let long = self.build_and_place(config, long_investment, reference).await?;
                let short = self
                    .build_and_place(config, short_investment, reference)
                    .await?;

                self.grids.insert(
                    format!("{}:long", config.id),
                    ActiveGrid {
                        strategy_id: config.id.clone(),
                        ladder: long,
                    },
                );
                self.grids.insert(
                    format!("{}:short", config.id),
                    ActiveGrid {
                        strategy_id: config.id.clone(),
                        ladder: short,
                    },
                );
            }
        }

        info!(strategy = %config.id, %reference, "grid started");
        Ok(())
    }

    async fn build_and_place(
        &self,
        config: &StrategyConfig,
        investment: Decimal,
        reference: Decimal,
    ) -> Result<GridLadder, EngineError> {
        let params = config
            .grid
            .as_ref()
            .ok_or_else(|| EngineError::Config(format!("{}: missing grid parameters", config.id)))?;

        if params.levels == 0 || reference <= Decimal::ZERO {
            return Err(EngineError::Config(format!(
                "{}: degenerate grid parameters (levels {}, reference {})",
                config.id, params.levels, reference
            )));
        }
        // Spread the investment evenly across rungs at the reference price.
        let quantity_per_rung =
            investment / Decimal::from(params.levels as u64) / reference;

        let mut ladder = GridLadder::build(
            &config.symbol,
            params.lower,
            params.upper,
            params.levels,
            quantity_per_rung,
            reference,
        )?;

        for rung in ladder.rungs.iter_mut() {
            if rung.state != RungState::Idle {
                continue;
            }
            let client_order_id = OrderRequest::generate_client_order_id(&config.id);
            let request = OrderRequest::limit(&config.symbol, rung.side, rung.quantity, rung.price)
                .with_client_order_id(client_order_id.clone())
                .with_leverage(config.leverage);

            self.executor.submit(request).await?;
            rung.client_order_id = Some(client_order_id);
            rung.state = RungState::Resting;
        }

        Ok(ladder)
    }

    /// A rung order filled: rest the opposite order one spacing away.
    ///
    /// A filled buy recycles into a sell one spacing above; a filled
    /// sell into a buy one spacing below. The filled rung itself returns
    /// to idle so it can be re-armed by the recycle of its neighbor.
    pub async fn on_order_filled(&mut self, client_order_id: &str) -> Result<(), EngineError> {
        let mut placement: Option<(String, usize, Side)> = None;

        for (grid_id, grid) in self.grids.iter_mut() {
            let Some(rung) = grid.ladder.rung_by_order(client_order_id) else {
                continue;
            };
            let index = rung.index;
            let side = rung.side;
            rung.state = RungState::Idle;
            rung.client_order_id = None;

            let target = match side {
                Side::Buy => index + 1,
                Side::Sell => index.checked_sub(1).unwrap_or(usize::MAX),
            };
            if target < grid.ladder.rungs.len() {
                placement = Some((grid_id.clone(), target, side.opposite()));
            } else {
                warn!(%client_order_id, "filled rung at ladder edge, nothing to recycle");
            }
            break;
        }

        let Some((grid_id, target, side)) = placement else {
            return Ok(());
        };

        let (request, client_id) = {
            let grid = match self.grids.get_mut(&grid_id) {
                Some(g) => g,
                None => return Ok(()),
            };
            let strategy_id = grid.strategy_id.clone();
            let symbol = grid.ladder.symbol.clone();
            let rung = &mut grid.ladder.rungs[target];
            if rung.state == RungState::Resting {
                // Neighbor already has a working order.
                return Ok(());
            }
            let client_id = OrderRequest::generate_client_order_id(&strategy_id);
            rung.side = side;
            let request = OrderRequest::limit(&symbol, side, rung.quantity, rung.price)
                .with_client_order_id(client_id.clone());
            (request, client_id)
        };

        self.executor.submit(request).await?;

        if let Some(grid) = self.grids.get_mut(&grid_id) {
            let rung = &mut grid.ladder.rungs[target];
            rung.client_order_id = Some(client_id);
            rung.state = RungState::Resting;
        }
        Ok(())
    }

    /// Tear down a ladder, cancelling its resting orders.
    pub async fn stop_grid(&mut self, strategy_id: &str) -> Result<(), EngineError> {
        let grid_ids: Vec<String> = self
            .grids
            .iter()
            .filter(|(_, g)| g.strategy_id == strategy_id)
            .map(|(id, _)| id.clone())
            .collect();

        for grid_id in grid_ids {
            if let Some(grid) = self.grids.remove(&grid_id) {
                for rung in &grid.ladder.rungs {
                    if rung.state != RungState::Resting {
                        continue;
                    }
                    if let Some(client_id) = &rung.client_order_id {
                        if let Some(order) = self.executor.lookup(client_id) {
                            self.executor.cancel(&grid.ladder.symbol, &order.id).await?;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Register a DCA strategy's schedule. The first purchase is due
    /// immediately.
    pub fn schedule_dca(&mut self, config: &StrategyConfig) -> Result<(), EngineError> {
        if config.kind != StrategyKind::Dca {
            return Err(EngineError::Config(format!(
                "{}: not a DCA strategy",
                config.id
            )));
        }
        let params = config
            .dca
            .as_ref()
            .ok_or_else(|| EngineError::Config(format!("{}: missing DCA parameters", config.id)))?;

        self.dca.insert(
            config.id.clone(),
            DcaSchedule {
                interval: ChronoDuration::hours(params.interval_hours as i64),
                next_due: Utc::now(),
            },
        );
        Ok(())
    }

    /// Run due DCA purchases at `now`.
    pub async fn poll_dca(
        &mut self,
        configs: &[StrategyConfig],
        prices: &HashMap<String, Decimal>,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        for config in configs {
            let Some(schedule) = self.dca.get_mut(&config.id) else {
                continue;
            };
            if now < schedule.next_due {
                continue;
            }
            let Some(price) = prices.get(&config.symbol).copied() else {
                continue;
            };
            let Some(request) = self.risk.dca_order(config, price) else {
                continue;
            };

            schedule.next_due = now + schedule.interval;
            info!(strategy = %config.id, %price, "DCA purchase due");
            self.executor.submit(request).await?;
        }
        Ok(())
    }
}
