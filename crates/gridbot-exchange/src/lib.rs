//! Exchange connectivity.
//!
//! `RestExchange` is the live client, `SimExchange` the in-memory
//! simulator; both implement `gridbot_core::traits::Exchange`. The
//! `MarketDataFeed` streams candles, tickers and fills, and the
//! `Resequencer` restores fill ordering before position application.

pub mod backoff;
pub mod csv_source;
pub mod feed;
pub mod resequencer;
pub mod rest;
pub mod signer;
pub mod sim;

pub use backoff::ExponentialBackoff;
pub use csv_source::CsvCandleSource;
pub use feed::{FeedEvent, FeedState, MarketDataFeed, Subscription};
pub use resequencer::Resequencer;
pub use rest::RestExchange;
pub use signer::{ApiCredentials, RequestSigner, SignedRequest};
pub use sim::SimExchange;
