use anyhow::Result;
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Environment variable holding the tracing filter
pub const LOG_ENV: &str = "HFCHAT_LOG";
const DEFAULT_DIRECTIVE: &str = "hfchat=info";

fn env_filter(verbose: bool) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("hfchat=debug")
        } else {
            EnvFilter::new(DEFAULT_DIRECTIVE)
        }
    })
}

/// Log to a file; the terminal UI owns stdout and stderr
pub fn init_file_logging(path: &Path, verbose: bool) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let log_file = OpenOptions::new().create(true).append(true).open(path)?;

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(Mutex::new(log_file)).with_ansi(false).with_target(true))
        .with(env_filter(verbose))
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    Ok(())
}

/// Log to stderr, only when asked for
pub fn init_stderr_logging(verbose: bool) -> Result<()> {
    if !verbose && std::env::var_os(LOG_ENV).is_none() {
        return Ok(());
    }

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(env_filter(verbose))
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    Ok(())
}
