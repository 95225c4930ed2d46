use anyhow::{Context, Result};
use flexi_logger::{colored_default_format, Logger, LoggerHandle, WriteMode};
use log::LevelFilter;

/// Maps the number of `-v` flags to a level, starting from `warn`.
pub fn level_for(verbosity: u64) -> LevelFilter {
    match verbosity {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

/// Starts logging to stderr, so stdout only carries probe results. `RUST_LOG`
/// overrides the cli level. The handle must be kept alive until exit.
pub fn configure(verbosity: u64) -> Result<LoggerHandle> {
    Logger::try_with_env_or_str(level_for(verbosity).to_string())
        .context("Failed to parse logger spec from env RUST_LOG or cli level")?
        .write_mode(WriteMode::Direct)
        .format_for_stderr(colored_default_format)
        .start()
        .context("Failed to start logger handle")
}
