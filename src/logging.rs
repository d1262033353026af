//! Logging configuration with journald support on Linux.
//!
//! This module sets up tracing-based logging that integrates with systemd's
//! journal on Linux systems, with file-based fallback for other platforms
//! or when journald is unavailable.

use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Where log records go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogTarget {
    /// journald on Linux when reachable, otherwise a daily file in the given directory
    System(PathBuf),
    /// Human-readable lines on stderr
    Stderr,
}

/// Initialize the logging system.
///
/// Log level can be controlled via the `FAVDUPES_LOG` environment variable:
/// - `FAVDUPES_LOG=debug` for verbose output, including every group change
/// - `FAVDUPES_LOG=info` for standard output (default)
/// - `FAVDUPES_LOG=warn` for warnings and errors only
/// - `FAVDUPES_LOG=error` for errors only
pub fn init(target: LogTarget) -> Result<()> {
    let env_filter = EnvFilter::try_from_env("FAVDUPES_LOG")
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let log_dir = match target {
        LogTarget::Stderr => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .try_init()
                .context("Failed to set tracing subscriber")?;
            return Ok(());
        }
        LogTarget::System(log_dir) => log_dir,
    };

    #[cfg(target_os = "linux")]
    {
        // Try to use journald on Linux
        if let Ok(journald_layer) = tracing_journald::layer() {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(journald_layer)
                .try_init()
                .context("Failed to set tracing subscriber")?;

            tracing::info!("Logging initialized with journald backend");
            return Ok(());
        }
    }

    // Fallback to file-based logging
    std::fs::create_dir_all(&log_dir)
        .with_context(|| format!("Failed to create log directory {}", log_dir.display()))?;

    let file_appender = tracing_appender::rolling::daily(&log_dir, "favdupes.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    // The guard flushes on drop, so it lives for the rest of the process
    static GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> = std::sync::OnceLock::new();
    let _ = GUARD.set(guard);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .try_init()
        .context("Failed to set tracing subscriber")?;

    tracing::info!("Logging initialized with file backend at {:?}", log_dir);
    Ok(())
}
