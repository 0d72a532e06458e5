//! Logging setup using tracing

use std::path::PathBuf;

use directories::ProjectDirs;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the logging subsystem.
///
/// Logs go to stderr and to a daily rotated file under the user data
/// directory, when one is available. `RUST_LOG` overrides the default filter.
pub fn init() -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = match log_directory() {
        Some(dir) => {
            std::fs::create_dir_all(&dir)?;
            let appender = RollingFileAppender::new(Rotation::DAILY, &dir, "installer.log");
            Some(
                fmt::layer()
                    .with_writer(appender)
                    .with_ansi(false)
                    .with_target(true)
                    .with_line_number(true),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .try_init()?;

    if let Some(dir) = log_directory() {
        tracing::info!("Log directory: {}", dir.display());
    }
    Ok(())
}

fn log_directory() -> Option<PathBuf> {
    ProjectDirs::from("org", "circuitpython", "circuitpython-installer")
        .map(|dirs| dirs.data_local_dir().join("logs"))
}
