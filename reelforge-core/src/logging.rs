//! Tracing subscriber setup
//!
//! One formatting layer, JSON or pretty, writing to stdout or appending to
//! `logging.file_path`. `RUST_LOG` overrides the configured level.

use std::fs::OpenOptions;
use std::sync::Arc;

use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan, writer::BoxMakeWriter},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

use crate::config::LoggingConfig;

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let level = parse_log_level(&config.level)?;
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));

    tracing_subscriber::registry()
        .with(format_layer(config)?)
        .with(env_filter)
        .try_init()?;
    Ok(())
}

fn format_layer(config: &LoggingConfig) -> anyhow::Result<BoxedLayer> {
    // Escape codes only make sense on a terminal.
    let (writer, ansi) = match &config.file_path {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| anyhow::anyhow!("Failed to open log file {path}: {e}"))?;
            (BoxMakeWriter::new(Arc::new(file)), false)
        }
        None => (BoxMakeWriter::new(std::io::stdout), true),
    };

    let base = fmt::layer()
        .with_writer(writer)
        .with_ansi(ansi)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(true)
        .with_line_number(true);

    let layer = if config.format == "json" {
        base.json()
            .with_current_span(true)
            .with_span_list(true)
            .with_file(true)
            .boxed()
    } else {
        base.pretty().with_file(false).boxed()
    };
    Ok(layer)
}

fn parse_log_level(level: &str) -> anyhow::Result<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" | "warning" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => Err(anyhow::anyhow!("Invalid log level: {level}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn logging(format: &str, file_path: Option<String>) -> LoggingConfig {
        LoggingConfig {
            level: "info".to_string(),
            format: format.to_string(),
            file_path,
        }
    }

    #[test]
    fn test_parse_log_level() {
        assert_eq!(parse_log_level("INFO").unwrap(), Level::INFO);
        assert_eq!(parse_log_level("warning").unwrap(), Level::WARN);
        assert_eq!(parse_log_level("trace").unwrap(), Level::TRACE);
        assert!(parse_log_level("verbose").is_err());
    }

    #[test]
    fn test_file_layer_creates_log_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reelforge.log");

        for format in ["json", "pretty"] {
            format_layer(&logging(format, Some(path.display().to_string()))).unwrap();
        }
        assert!(path.is_file());
    }

    #[test]
    fn test_unwritable_log_path_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("reelforge.log");

        let err = format_layer(&logging("json", Some(path.display().to_string())))
            .err()
            .unwrap();
        assert!(err.to_string().contains("Failed to open log file"));
    }
}
