use crate::domain::settings::LogSettings;
use std::str::FromStr;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub struct LoggingGuard {
    // Keeps the non-blocking file writer flushing until shutdown
    _guards: Vec<WorkerGuard>,
}

fn rotation(name: &str) -> Rotation {
    match name.to_lowercase().as_str() {
        "hourly" => Rotation::HOURLY,
        "minutely" => Rotation::MINUTELY,
        "never" => Rotation::NEVER,
        _ => Rotation::DAILY,
    }
}

pub fn init_logger(settings: &LogSettings) -> anyhow::Result<LoggingGuard> {
    let mut guards = Vec::new();

    // RUST_LOG wins over the configured level
    let level_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::from_str(&settings.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let console_layer = settings.console_logging_enabled.then(|| {
        fmt::layer()
            .with_writer(std::io::stdout)
            .with_file(settings.show_file_line)
            .with_line_number(settings.show_file_line)
            .with_thread_ids(settings.show_thread_ids)
            .with_target(settings.show_target)
            .with_ansi(settings.ansi_colors)
    });

    let file_layer = if settings.file_logging_enabled {
        std::fs::create_dir_all(&settings.log_dir)?;
        let appender = RollingFileAppender::new(
            rotation(&settings.rotation),
            &settings.log_dir,
            &settings.file_name_prefix,
        );
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);
        guards.push(guard);
        Some(
            fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_file(settings.show_file_line)
                .with_line_number(settings.show_file_line)
                .with_thread_ids(settings.show_thread_ids)
                .with_target(settings.show_target),
        )
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(level_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Logger already initialized: {}", e))?;

    tracing::debug!(
        "Logging initialized (level: {}, file: {})",
        settings.level,
        settings.file_logging_enabled
    );

    Ok(LoggingGuard { _guards: guards })
}
