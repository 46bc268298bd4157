use std::{path::PathBuf, sync::OnceLock};

// Keeps the non-blocking writer alive for the lifetime of the process.
static GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();

/// Initialise the tracing subscriber.
///
/// Verbosity is controlled by the `RUST_LOG` environment variable (defaults
/// to `info` when unset). Dependencies that emit through the `log` facade
/// are forwarded into the tracing pipeline via `LogTracer`.
///
/// When `log_dir` is `Some`, events are additionally written to a daily
/// rolling file under that directory; stderr output is always enabled.
pub fn init(log_dir: Option<PathBuf>) {
    use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let registry = tracing_subscriber::registry().with(filter).with(stderr_layer);

    if let Some(dir) = log_dir {
        std::fs::create_dir_all(&dir).ok();
        let file_appender = tracing_appender::rolling::daily(&dir, "scanforge.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        let _ = GUARD.set(guard);
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(non_blocking)
                    .with_ansi(false),
            )
            .try_init()
            .ok();
    } else {
        registry.try_init().ok();
    }

    // Forward dependencies' log-facade emissions into the tracing pipeline.
    tracing_log::LogTracer::init().ok();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "scan orchestration core started");
}

/// Default log directory: `~/.scanforge/logs`.
pub fn default_log_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".scanforge").join("logs"))
}
