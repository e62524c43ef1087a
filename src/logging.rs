//! Tracing setup for the CLI.
//!
//! Human-readable (or JSON) events go to stderr so that stdout stays clean for
//! command output. When `[logging] directory` is set, events are also written
//! as JSON lines to a daily-rolling `playbook.log` in that directory.
//!
//! `RUST_LOG` overrides the configured level:
//!
//! ```bash
//! RUST_LOG=playbook=debug playbook advance <run-id>
//! ```

use std::path::Path;

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter, Layer, Registry, fmt, layer::SubscriberExt, util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingConfig};

pub const LOG_FILE_PREFIX: &str = "playbook.log";

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Install the global subscriber.
///
/// The returned guard flushes the file writer on drop and must be held for
/// the life of the process.
pub fn init(config: &LoggingConfig, log_dir: Option<&Path>, verbose: bool) -> Result<Option<WorkerGuard>> {
    let filter = build_filter(config, verbose)?;

    let mut layers: Vec<BoxedLayer> = Vec::new();
    layers.push(match config.format {
        LogFormat::Pretty => fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(verbose)
            .compact()
            .boxed(),
        LogFormat::Json => fmt::layer().json().with_writer(std::io::stderr).boxed(),
    });

    let mut guard = None;
    if let Some(dir) = log_dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
        let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
        let (writer, worker) = tracing_appender::non_blocking(appender);
        layers.push(
            fmt::layer()
                .json()
                .with_ansi(false)
                .with_writer(writer)
                .boxed(),
        );
        guard = Some(worker);
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(guard)
}

/// `RUST_LOG` if set, otherwise the configured level (`debug` with `--verbose`).
fn build_filter(config: &LoggingConfig, verbose: bool) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    let level = if verbose { "debug" } else { config.level.as_str() };
    EnvFilter::try_new(level).with_context(|| format!("Invalid log level '{}'", level))
}
