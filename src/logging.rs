use crate::error::{GatecamError, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Log level for the usual `--debug`/`--verbose`/`--quiet` flags
pub fn level_from_flags(debug: bool, verbose: bool, quiet: bool) -> &'static str {
    if debug {
        "debug"
    } else if verbose {
        "info"
    } else if quiet {
        "error"
    } else {
        "warn"
    }
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` overrides `level`. When `log_file` is given, events are also
/// written there without ANSI colors; keep the returned guard alive until
/// exit so buffered lines get flushed.
pub fn init_logging(
    level: &str,
    format: Option<&str>,
    log_file: Option<&Path>,
    detailed: bool,
) -> Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("gatecam={}", level)));

    let fmt_layer = match format {
        Some("json") => fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        Some("compact") => fmt::layer()
            .compact()
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .boxed(),
        Some("pretty") | None => fmt::layer()
            .pretty()
            .with_target(true)
            .with_thread_ids(detailed)
            .with_file(detailed)
            .with_line_number(detailed)
            .boxed(),
        Some(other) => {
            eprintln!("Warning: Unknown log format '{}', using default", other);
            fmt::layer()
                .with_target(true)
                .with_thread_ids(detailed)
                .with_file(detailed)
                .with_line_number(detailed)
                .boxed()
        }
    };

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let directory = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let file_name = path
                .file_name()
                .ok_or_else(|| GatecamError::system(format!("Invalid log file path: {}", path.display())))?;

            let appender = tracing_appender::rolling::never(directory, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(file_layer)
        .with(env_filter)
        .try_init()
        .map_err(|e| GatecamError::system(format!("Failed to initialize logging: {}", e)))?;

    Ok(guard)
}
