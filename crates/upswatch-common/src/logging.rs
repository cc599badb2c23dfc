//! ---
//! upswatch_section: "01-core-monitoring"
//! upswatch_subsection: "module"
//! upswatch_type: "source"
//! upswatch_scope: "code"
//! upswatch_description: "Tracing subscriber setup for the upswatch daemon."
//! upswatch_version: "v0.1.0"
//! upswatch_owner: "tbd"
//! ---
use anyhow::{Context, Result};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const LOG_ENV: &str = "UPSWATCH_LOG";
const DEFAULT_FILE_NAME: &str = "upswatchd.log";

// Non-blocking writers stop flushing once their guards drop; the daemon
// holds them for the whole process lifetime.
static WRITER_GUARDS: OnceCell<[WorkerGuard; 2]> = OnceCell::new();

/// Stdout log format. The rolling file is always JSON.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LogFormat {
    #[default]
    StructuredJson,
    Pretty,
}

/// Install the global tracing subscriber for the daemon.
///
/// Filter precedence: `UPSWATCH_LOG`, then `RUST_LOG`, then `info`.
/// Stdout carries the configured format; a rolling daily JSON file under
/// `logging.directory` survives for post-outage analysis when stdout is
/// long gone with the host.
pub fn init_tracing(config: &crate::config::LoggingConfig) -> Result<()> {
    std::fs::create_dir_all(&config.directory).with_context(|| {
        format!(
            "unable to create log directory {}",
            config.directory.display()
        )
    })?;
    let file_name = match &config.file_prefix {
        Some(prefix) => format!("{prefix}.log"),
        None => DEFAULT_FILE_NAME.to_owned(),
    };

    let (file_writer, file_guard) =
        tracing_appender::non_blocking(rolling::daily(&config.directory, file_name));
    let (stdout_writer, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());
    let _ = WRITER_GUARDS.set([file_guard, stdout_guard]);

    let file_layer = fmt::layer()
        .json()
        .with_ansi(false)
        .with_target(true)
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .with_writer(file_writer);
    let registry = tracing_subscriber::registry()
        .with(env_filter())
        .with(file_layer);

    // try_init failures (a subscriber already installed, as in tests) are
    // deliberately ignored.
    match config.format {
        LogFormat::StructuredJson => {
            registry
                .with(
                    fmt::layer()
                        .json()
                        .with_target(false)
                        .with_timer(fmt::time::UtcTime::rfc_3339())
                        .with_writer(stdout_writer),
                )
                .try_init()
                .ok();
        }
        LogFormat::Pretty => {
            registry
                .with(
                    fmt::layer()
                        .with_target(true)
                        .with_timer(fmt::time::UtcTime::rfc_3339())
                        .with_writer(stdout_writer),
                )
                .try_init()
                .ok();
        }
    }

    info!(log_dir = %config.directory.display(), format = ?config.format, "tracing initialised");
    Ok(())
}

/// First valid filter directive wins: `UPSWATCH_LOG`, `RUST_LOG`, `info`.
fn env_filter() -> EnvFilter {
    for var in [LOG_ENV, "RUST_LOG"] {
        if let Ok(directive) = std::env::var(var) {
            match EnvFilter::try_new(&directive) {
                Ok(filter) => return filter,
                Err(err) => eprintln!("ignoring invalid {var} directive ({err})"),
            }
        }
    }
    EnvFilter::new("info")
}
