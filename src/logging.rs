//! Root logger construction. Every layer below (Store, StoreFS, VFS)
//! derives a child logger from `slog_scope::logger()` rather than taking a
//! logger parameter, so a deep call stack doesn't need to thread one
//! through every function signature.

use slog::{o, Drain};

/// Output format for the root drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Newline-delimited JSON, for library/embedded use and log shipping.
    Json,
    /// Human-readable terminal output, for example binaries and tests.
    Term,
}

/// Build a root logger writing to stdout in the given format, wrapped in
/// `slog_async::Async` so logging never blocks the calling thread.
pub fn root_logger(format: LogFormat) -> slog::Logger {
    match format {
        LogFormat::Json => {
            let drain = slog_json::Json::default(std::io::stdout()).fuse();
            let drain = slog_async::Async::new(drain).build().fuse();
            slog::Logger::root(drain, o!("component" => "vfscore"))
        }
        LogFormat::Term => {
            let decorator = slog_term::TermDecorator::new().build();
            let drain = slog_term::FullFormat::new(decorator).build().fuse();
            let drain = slog_async::Async::new(drain).build().fuse();
            slog::Logger::root(drain, o!("component" => "vfscore"))
        }
    }
}

/// Install `logger` as the process-wide logger surfaced through
/// `slog_scope::logger()`. Returns a guard that must be kept alive for the
/// duration logging should remain installed.
pub fn install(logger: slog::Logger) -> slog_scope::GlobalLoggerGuard {
    slog_scope::set_global_logger(logger)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn term_logger_can_be_built_and_installed() {
        let logger = root_logger(LogFormat::Term);
        let _guard = install(logger);
        slog_scope::info!("logging smoke test"; "ok" => true);
    }
}
