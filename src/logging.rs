use serde::{Deserialize, Serialize};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::LogConfig;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    #[default]
    #[value(alias = "warn")]
    #[serde(alias = "warn")]
    Warning,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warning => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Trace => LevelFilter::TRACE,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Compact human-readable lines
    #[default]
    Basic,
    /// One JSON object per line
    Json,
}

/// Command-line values win over the config file, which wins over defaults.
pub fn effective(
    level: Option<LogLevel>,
    format: Option<LogFormat>,
    file: Option<&LogConfig>,
) -> (LogLevel, LogFormat) {
    let level = level
        .or_else(|| file.and_then(|f| f.level))
        .unwrap_or_default();
    let format = format
        .or_else(|| file.and_then(|f| f.format))
        .unwrap_or_default();
    (level, format)
}

/// Install the global subscriber. Logs go to stderr so stdout only carries
/// command output. `RUST_LOG` overrides the level when set.
pub fn init(level: LogLevel, format: LogFormat) {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from(level).into())
        .from_env_lossy();

    let layer = match format {
        LogFormat::Basic => tracing_subscriber::fmt::layer()
            .compact()
            .with_target(false)
            .with_writer(std::io::stderr)
            .with_filter(env_filter)
            .boxed(),
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_filter(env_filter)
            .boxed(),
    };

    // A second init (tests) is harmless.
    let _ = tracing_subscriber::registry().with(layer).try_init();
}
