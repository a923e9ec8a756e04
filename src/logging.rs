//! Tracing setup
//!
//! The wizard owns the terminal, so it logs to a file. Subcommands log to
//! stderr. `PXC_LOG` takes an `EnvFilter` directive in both cases.

use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use std::sync::Mutex;

use tracing_subscriber::{fmt, EnvFilter};

pub const LOG_ENV: &str = "PXC_LOG";

fn filter(default: &str) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default))
}

/// `<cache dir>/pxc/pxc.log`
pub fn log_path() -> Option<PathBuf> {
    dirs::cache_dir().map(|d| d.join("pxc").join("pxc.log"))
}

/// Log to stderr, `warn` unless overridden
pub fn init_stderr() {
    let _ = fmt()
        .without_time()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_env_filter(filter("warn"))
        .try_init();
}

/// Log to the wizard log file, `info` unless overridden.
///
/// Returns the log path, or `None` when the file could not be opened, in
/// which case logging stays off.
pub fn init_file() -> Option<PathBuf> {
    let path = log_path()?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).ok()?;
    }
    let file = OpenOptions::new().create(true).append(true).open(&path).ok()?;

    fmt()
        .with_ansi(false)
        .with_writer(Mutex::new(file))
        .with_env_filter(filter("info"))
        .try_init()
        .ok()?;

    Some(path)
}
