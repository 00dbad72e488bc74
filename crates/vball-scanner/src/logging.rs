//! Structured logging for match scans.

use std::str::FromStr;
use tracing::{error, info, warn, Span};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use vball_models::MatchId;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format: {}", other)),
        }
    }
}

impl LogFormat {
    /// Format from `LOG_FORMAT`, pretty when unset or unrecognised.
    pub fn from_env() -> Self {
        std::env::var("LOG_FORMAT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or_default()
    }
}

/// Install the global subscriber: colored output for dev, JSON for production.
pub fn init_tracing(format: LogFormat) {
    let mut env_filter = EnvFilter::from_default_env();
    for directive in ["vball=info", "scan_match=info", "ort=warn", "onnxruntime=warn"] {
        if let Ok(directive) = directive.parse() {
            env_filter = env_filter.add_directive(directive);
        }
    }

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(fmt::layer().json())
                .with(env_filter)
                .init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(
                    fmt::layer()
                        .with_ansi(true)
                        .with_target(true)
                        .with_thread_ids(false)
                        .with_file(false)
                        .with_line_number(false),
                )
                .with(env_filter)
                .init();
        }
    }
}

/// Logger carrying the match being scanned.
#[derive(Debug, Clone)]
pub struct MatchLogger {
    match_id: MatchId,
    operation: String,
}

impl MatchLogger {
    pub fn new(match_id: MatchId, operation: &str) -> Self {
        Self {
            match_id,
            operation: operation.to_string(),
        }
    }

    pub fn log_start(&self, message: &str) {
        info!(
            match_id = %self.match_id,
            operation = %self.operation,
            "Scan started: {}", message
        );
    }

    pub fn log_progress(&self, message: &str) {
        info!(
            match_id = %self.match_id,
            operation = %self.operation,
            "Scan progress: {}", message
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(
            match_id = %self.match_id,
            operation = %self.operation,
            "Scan warning: {}", message
        );
    }

    pub fn log_error(&self, message: &str) {
        error!(
            match_id = %self.match_id,
            operation = %self.operation,
            "Scan error: {}", message
        );
    }

    pub fn log_completion(&self, message: &str) {
        info!(
            match_id = %self.match_id,
            operation = %self.operation,
            "Scan completed: {}", message
        );
    }

    pub fn match_id(&self) -> MatchId {
        self.match_id
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Span grouping everything logged during the scan.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "match_scan",
            match_id = %self.match_id,
            operation = %self.operation
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_match_logger() {
        let logger = MatchLogger::new(MatchId(12), "scan_match");
        assert_eq!(logger.match_id(), MatchId(12));
        assert_eq!(logger.operation(), "scan_match");
    }

    #[test]
    fn test_log_format_parse() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("pretty".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert!("xml".parse::<LogFormat>().is_err());
    }
}
