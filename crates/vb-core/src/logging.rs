//! Tracing subscriber setup.
//!
//! Console output is always on. With a log directory, a daily-rotating file
//! is written as well, either as plain text or as one JSON object per line
//! for log shippers. `RUST_LOG` overrides the level passed in.

use std::fmt;
use std::str::FromStr;

use anyhow::Context;
use tracing_subscriber::{EnvFilter, fmt as tfmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Encoding of the rotating log file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" | "plain" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format '{other}' (expected text or json)")),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Text => "text",
            Self::Json => "json",
        })
    }
}

/// Install the global tracing subscriber. Call once at program start.
///
/// - `log_level`: filter used when `RUST_LOG` is unset (e.g. `"info"`)
/// - `log_dir`: optional directory for daily-rotating log files
/// - `module_name`: log file prefix (e.g. `"vb-runner"`)
/// - `file_format`: encoding of the file output
///
/// Fails if a global subscriber is already installed.
pub fn init_logging(
    log_level: &str,
    log_dir: Option<&str>,
    module_name: &str,
    file_format: LogFormat,
) -> anyhow::Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let console_layer = tfmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_ansi(true);

    let appender = log_dir.map(|dir| tracing_appender::rolling::daily(dir, module_name));
    let (text_file, json_file) = match (appender, file_format) {
        (Some(writer), LogFormat::Text) => (
            Some(
                tfmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_target(true)
                    .with_thread_ids(true),
            ),
            None,
        ),
        (Some(writer), LogFormat::Json) => (
            None,
            Some(
                tfmt::layer()
                    .json()
                    .with_writer(writer)
                    .with_target(true)
                    .with_thread_ids(true),
            ),
        ),
        (None, _) => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(text_file)
        .with(json_file)
        .try_init()
        .context("tracing subscriber already installed")
}
