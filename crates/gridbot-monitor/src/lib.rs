//! Logging setup for the gridbot binary.

mod logging;

pub use logging::setup_logging;
