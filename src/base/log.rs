use std::sync::Arc;

use chrono::Local;
use slog::{Drain, Level, o};

pub const DEFAULT_LOGGING_TIME_FMT: &str = "%F %T%.6f";

pub fn new_default_logger() -> slog::Logger {
    new_logger_with_level(Level::Debug)
}

pub fn new_logger_with_level(level: Level) -> slog::Logger {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator)
        .use_file_location()
        .use_custom_timestamp(|wr| {
            let now = Local::now();
            write!(wr, "{}", now.format(DEFAULT_LOGGING_TIME_FMT))
        })
        .build()
        .fuse();
    let drain = slog_async::Async::new(drain).build().fuse();
    let drain = drain.filter_level(level).fuse();

    slog::Logger::root(drain, o!("lib" => "slicewire"))
}

pub fn new_discard_logger() -> Arc<slog::Logger> {
    Arc::new(slog::Logger::root(slog::Discard, o!()))
}

/// Accepts the usual level names, case-insensitively. Unknown names fall back to `info`.
pub fn parse_level(name: &str) -> Level {
    match name.to_ascii_lowercase().as_str() {
        "trace" => Level::Trace,
        "debug" => Level::Debug,
        "warn" | "warning" => Level::Warning,
        "error" => Level::Error,
        "critical" | "off" => Level::Critical,
        _ => Level::Info,
    }
}
