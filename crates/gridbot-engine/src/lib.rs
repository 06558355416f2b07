//! The trading engine: event loop, order execution, position tracking,
//! grid/DCA scheduling and persistence.

pub mod events;
pub mod executor;
pub mod grid;
pub mod persistence;
pub mod runner;
pub mod tracker;

pub use events::{EngineEvent, EventBus, PortfolioSnapshot};
pub use executor::{Bracket, Oco, OcoAction, OrderExecutor};
pub use grid::GridEngine;
pub use persistence::{JsonFileStore, TradeStore};
pub use runner::{StopMode, TradingEngine};
pub use tracker::PositionTracker;
