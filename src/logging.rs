use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

pub const LOG_FILE_NAME: &str = "forarchives.log";

fn open_log_file(dir: &Path) -> std::io::Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join(LOG_FILE_NAME))
}

/// Install the global subscriber: human output on stderr (stdout carries
/// engine output) and an append-only plain log in `log_dir`.
pub fn init_tracing(verbose: bool, log_dir: Option<&Path>) {
    let default_directive = if verbose {
        "forarchives=debug"
    } else {
        "forarchives=warn"
    };
    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| default_directive.into()),
        );

    let mut file_error = None;
    let file_layer = log_dir.and_then(|dir| match open_log_file(dir) {
        Ok(file) => Some(
            fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .with_filter(EnvFilter::new("forarchives=info")),
        ),
        Err(e) => {
            file_error = Some((dir.display().to_string(), e));
            None
        }
    });

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .init();

    if let Some((dir, e)) = file_error {
        tracing::warn!(dir = %dir, error = %e, "log file unavailable, logging to stderr only");
    }
}
