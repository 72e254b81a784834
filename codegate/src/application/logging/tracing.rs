//! Tracing installation: env-filter from the configured level (RUST_LOG
//! still wins), text or json formatting, plus a rolling file under the
//! volume so the dashboard has something to show.

use once_cell::sync::OnceCell;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::application::config::configuration::{Configuration, LogFormat};

static FILE_GUARD: OnceCell<WorkerGuard> = OnceCell::new();

/// Returns false when a subscriber was already installed.
pub fn tracing_subscribe(config: &Configuration) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "codegate={level},llm_client={level},tower_http=info",
            level = config.log_level.as_filter()
        ))
    });

    let logs_dir = config.volume.join("logs");
    let _ = std::fs::create_dir_all(&logs_dir);
    let appender = tracing_appender::rolling::daily(logs_dir, "codegate.log");
    let (file_writer, guard) = tracing_appender::non_blocking(appender);
    let _ = FILE_GUARD.set(guard);

    match config.log_format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(file_writer)
                    .with_ansi(false),
            )
            .try_init()
            .is_ok(),
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(file_writer)
                    .with_ansi(false),
            )
            .try_init()
            .is_ok(),
    }
}
