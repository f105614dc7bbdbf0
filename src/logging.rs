//! Log initialization for the endpoint binaries.

use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Initializes the global subscriber from the numeric CLI level
/// (0=debug, 1=info, 2=warn, 3=error) and an optional log file. Without
/// a file, logs go to stderr.
pub fn init(level: u8, log_file: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let directive = match level {
        0 => "debug",
        1 => "info",
        2 => "warn",
        _ => "error",
    };
    let filter = EnvFilter::new(directive);

    match log_file {
        Some(path) => {
            let file = std::fs::File::create(path)?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(Arc::new(file))
                .with_ansi(false)
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
    Ok(())
}
