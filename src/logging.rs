//! Logging setup.
//!
//! `RUST_LOG` controls levels (default `appforge=info`). JSON output is
//! selected with `--log-json` or `APPFORGE_LOG_JSON=1`. Logs go to stderr; with a log directory,
//! output goes to a daily-rolling file through a non-blocking writer.

use std::path::Path;
use std::sync::Once;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

static INIT: Once = Once::new();

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// JSON structured logs (for production).
    Json,
    /// Human-readable logs (for development).
    #[default]
    Pretty,
}

impl LogFormat {
    /// JSON when the flag is set or `APPFORGE_LOG_JSON=1`.
    pub fn detect(json_flag: bool) -> Self {
        if json_flag || std::env::var("APPFORGE_LOG_JSON").unwrap_or_default() == "1" {
            LogFormat::Json
        } else {
            LogFormat::Pretty
        }
    }
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("appforge=info"))
}

/// Initialize the global subscriber. Subsequent calls are no-ops.
///
/// Returns the appender guard when logging to a directory; keep it alive for
/// the lifetime of the process or buffered lines are lost.
pub fn init_logging(format: LogFormat, log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let mut guard = None;
    INIT.call_once(|| match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "appforge.log");
            let (writer, worker_guard) = tracing_appender::non_blocking(appender);
            guard = Some(worker_guard);
            match format {
                LogFormat::Json => tracing_subscriber::registry()
                    .with(env_filter())
                    .with(fmt::layer().json().with_writer(writer))
                    .init(),
                LogFormat::Pretty => tracing_subscriber::registry()
                    .with(env_filter())
                    .with(fmt::layer().with_ansi(false).with_writer(writer))
                    .init(),
            }
        }
        None => match format {
            LogFormat::Json => tracing_subscriber::registry()
                .with(env_filter())
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init(),
            LogFormat::Pretty => tracing_subscriber::registry()
                .with(env_filter())
                .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
                .init(),
        },
    });
    guard
}
