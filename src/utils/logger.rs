use std::path::Path;

use once_cell::sync::OnceCell;
use tracing_subscriber::{
    fmt, fmt::time::UtcTime, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};

use crate::error::{AppError, AppResult};

static LOGGER_INIT: OnceCell<()> = OnceCell::new();
static LOGGER_GUARD: OnceCell<tracing_appender::non_blocking::WorkerGuard> = OnceCell::new();

/// Transport and workflow traces at debug, ranking chatter only on warnings.
const DEFAULT_LOG_DIRECTIVES: &str =
    "info,app::transport=debug,app::workflow=debug,app::orchestrator=debug,app::ranker=warn";
const LOG_FILE_PREFIX: &str = "slotflow.log";

/// Installs the global subscriber: a daily file under `log_dir` plus stdout.
/// Later calls return immediately.
pub fn init_logging(log_dir: &Path) -> AppResult<()> {
    LOGGER_INIT
        .get_or_try_init(|| {
            std::fs::create_dir_all(log_dir)?;

            let file_appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_PREFIX);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

            let env_filter = match EnvFilter::try_from_default_env() {
                Ok(filter) => filter,
                Err(_) => build_filter(DEFAULT_LOG_DIRECTIVES)?,
            };

            LOGGER_GUARD
                .set(guard)
                .map_err(|_| AppError::other("log writer already installed"))?;

            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    fmt::layer()
                        .with_writer(non_blocking)
                        .with_ansi(false)
                        .with_target(true)
                        .with_timer(UtcTime::rfc_3339()),
                )
                .with(
                    fmt::layer()
                        .with_target(false)
                        .with_timer(UtcTime::rfc_3339()),
                )
                .try_init()
                .map_err(|err| AppError::other(format!("failed to install subscriber: {err}")))?;

            Ok(())
        })
        .map(|_| ())
}

/// Parses `RUST_LOG`-style directives, e.g. `warn,app::transport=trace`.
pub fn build_filter(directives: &str) -> AppResult<EnvFilter> {
    EnvFilter::try_new(directives)
        .map_err(|err| AppError::config(format!("invalid log directives '{directives}': {err}")))
}
