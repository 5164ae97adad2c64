use std::path::Path;
use tracing::subscriber as tracing_subscriber_global;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::RollingFileAppender;
use tracing_log::LogTracer;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// Install the global subscriber: stdout plus, when `log_dir` is given, a
/// daily-rotated file. Honors RUST_LOG, otherwise defaults to info.
/// Keep the returned guard alive for the lifetime of the process so buffered
/// file output is flushed.
pub fn init(log_dir: Option<&Path>) -> anyhow::Result<Option<WorkerGuard>> {
    // bridge `log` records (emitted by the HTTP provider) into tracing
    let _ = LogTracer::init();
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stdout_layer = fmt::layer().with_writer(std::io::stdout);

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let file_appender: RollingFileAppender =
                tracing_appender::rolling::daily(dir, "music-dashboard.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            (
                Some(fmt::layer().with_ansi(false).with_writer(non_blocking)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer);
    tracing_subscriber_global::set_global_default(subscriber)
        .map_err(|e| anyhow::anyhow!("failed to set global tracing subscriber: {}", e))?;
    Ok(guard)
}
