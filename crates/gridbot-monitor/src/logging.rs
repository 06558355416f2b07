//! Logging setup.

use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter, Layer, Registry};

/// Setup logging with the given level.
///
/// `RUST_LOG` takes precedence over the configured level. When `file`
/// is given, logs also go to a daily-rotated file; the returned guard
/// must be kept alive for the duration of the process or buffered
/// lines are lost on exit.
pub fn setup_logging(level: &str, json: bool, file: Option<&str>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // The json and pretty layers are distinct types, so the stack is
    // assembled as boxed layers.
    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();
    if json {
        layers.push(fmt::layer().json().boxed());
    } else {
        layers.push(fmt::layer().pretty().boxed());
    }

    let guard = match file {
        Some(path) => {
            let path = Path::new(path);
            let dir = path.parent().unwrap_or_else(|| Path::new("."));
            let name = path.file_name().unwrap_or_else(|| "gridbot.log".as_ref());
            let appender = tracing_appender::rolling::daily(dir, name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            layers.push(fmt::layer().with_ansi(false).with_writer(writer).boxed());
            Some(guard)
        }
        None => None,
    };

    tracing_subscriber::registry().with(layers).with(filter).init();
    guard
}
