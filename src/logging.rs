//! Logging initialisation
//!
//! Installs a `tracing` subscriber writing to stdout and, optionally, to a
//! log file through a non-blocking writer. `RUST_LOG` overrides the
//! configured level.

use crate::config::LoggingConfig;
use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Install the global subscriber
///
/// Keep the returned guard alive for as long as logs should reach the file;
/// dropping it flushes and stops the file writer.
pub fn init_logging(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("lamco_selection={},warn", config.level))
    });

    let mut layers: Vec<BoxedLayer> = vec![format_layer(&config.format, std::io::stdout, true)];
    let mut guard = None;

    if let Some(path) = &config.log_file {
        let directory = path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .unwrap_or_else(|| std::path::Path::new("."));
        let file_name = path
            .file_name()
            .context(format!("Log file has no file name: {}", path.display()))?;

        std::fs::create_dir_all(directory)
            .context(format!("Failed to create log directory: {}", directory.display()))?;

        let appender = tracing_appender::rolling::never(directory, file_name);
        let (writer, worker_guard) = tracing_appender::non_blocking(appender);
        layers.push(format_layer(&config.format, writer, false));
        guard = Some(worker_guard);
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(env_filter)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    if let Some(path) = &config.log_file {
        tracing::info!("Logging to file: {}", path.display());
    }

    Ok(guard)
}

fn format_layer<W>(format: &str, writer: W, ansi: bool) -> BoxedLayer
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = fmt::layer().with_writer(writer).with_ansi(ansi);
    match format {
        "json" => layer.json().boxed(),
        "compact" => layer.compact().boxed(),
        _ => layer.pretty().boxed(),
    }
}
