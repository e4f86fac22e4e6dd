//! Logging configuration built on `tracing-subscriber`.

use std::fmt;
use tracing_subscriber::EnvFilter;

/// Log level enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum LogLevel {
    /// Trace level - most verbose.
    Trace,
    /// Debug level.
    Debug,
    /// Info level.
    #[default]
    Info,
    /// Warning level.
    Warn,
    /// Error level.
    Error,
    /// Off - no logging.
    Off,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            LogLevel::Off => "off",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            "off" | "none" => Ok(LogLevel::Off),
            _ => Err(format!("Unknown log level: {}", s)),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Level applied to this crate's targets.
    pub level: LogLevel,
    /// Emit JSON lines instead of human-readable text.
    pub json: bool,
    /// Include the event target in each line.
    pub include_target: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            json: false,
            include_target: true,
        }
    }
}

impl LogConfig {
    /// Verbose, human-readable output for local debugging.
    pub fn debug() -> Self {
        Self {
            level: LogLevel::Debug,
            ..Default::default()
        }
    }

    /// Warnings and errors only, as JSON lines.
    pub fn production() -> Self {
        Self {
            level: LogLevel::Warn,
            json: true,
            include_target: true,
        }
    }

    /// The filter directive for this configuration.
    ///
    /// `RUST_LOG`, when set, takes precedence.
    pub fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_CRATE_NAME"), self.level))
        })
    }
}

/// Installs a global subscriber. Returns false if one was already set.
pub fn init_logging(config: &LogConfig) -> bool {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(config.filter())
        .with_target(config.include_target);

    if config.json {
        builder.json().try_init().is_ok()
    } else {
        builder.try_init().is_ok()
    }
}

/// Common sensitive field names to redact.
pub const SENSITIVE_FIELDS: &[&str] = &[
    "access_token",
    "authorization",
    "Authorization",
    "oauth_token",
    "password",
    "secret",
    "token",
];

/// Redacts bearer tokens and sensitive fields from log text.
pub fn redact_sensitive(input: &str) -> String {
    let mut result = input.to_string();

    if let Ok(bearer) = regex::Regex::new(r"(?i)bearer\s+[A-Za-z0-9\-._~+/]+=*") {
        result = bearer.replace_all(&result, "Bearer [REDACTED]").to_string();
    }

    for field in SENSITIVE_FIELDS {
        let escaped = regex::escape(field);
        let patterns = [
            (format!(r#""{}"\s*:\s*"[^"]*""#, escaped), format!(r#""{}":"[REDACTED]""#, field)),
            (format!(r"\b{}=[^&\s]*", escaped), format!("{}=[REDACTED]", field)),
        ];

        for (pattern, replacement) in &patterns {
            if let Ok(re) = regex::Regex::new(pattern) {
                result = re.replace_all(&result, replacement.as_str()).to_string();
            }
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_ordering() {
        assert!(LogLevel::Trace < LogLevel::Debug);
        assert!(LogLevel::Debug < LogLevel::Info);
        assert!(LogLevel::Warn < LogLevel::Error);
        assert!(LogLevel::Error < LogLevel::Off);
    }

    #[test]
    fn test_log_level_from_str() {
        assert_eq!("debug".parse::<LogLevel>().unwrap(), LogLevel::Debug);
        assert_eq!("WARNING".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert!("loud".parse::<LogLevel>().is_err());
    }

    #[test]
    fn test_production_config() {
        let config = LogConfig::production();
        assert_eq!(config.level, LogLevel::Warn);
        assert!(config.json);
    }

    #[test]
    fn test_redacts_bearer_and_fields() {
        let line = r#"Authorization: Bearer abc.def-123 body={"access_token":"xyz","blog":"staff"} q=token=s3cr3t&x=1"#;
        let redacted = redact_sensitive(line);

        assert!(!redacted.contains("abc.def-123"));
        assert!(!redacted.contains("xyz"));
        assert!(!redacted.contains("s3cr3t"));
        assert!(redacted.contains(r#""blog":"staff""#));
    }
}
