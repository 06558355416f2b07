//! CLI command implementations.

pub mod live;
pub mod paper;
pub mod strategies;
pub mod validate;
