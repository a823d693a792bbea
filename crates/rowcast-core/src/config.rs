//! Configuration structures for rowcast.
//!
//! Configuration is loaded from TOML files and can be overridden via CLI flags
//! or environment variables. Every section has defaults so a run can be
//! configured from the environment alone; [`Config::validate`] rejects the
//! fields that have no sensible default.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// File looked up in the working directory when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "rowcast.toml";

/// Main configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Data source configuration
    #[serde(default)]
    pub source: SourceConfig,

    /// Event sink configuration
    #[serde(default)]
    pub sink: SinkConfig,

    /// Event identity configuration
    #[serde(default)]
    pub event: EventConfig,

    /// Delivery retry configuration
    #[serde(default)]
    pub retry: RetryConfig,

    /// Monitoring configuration
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

/// Data source configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SourceConfig {
    /// PostgreSQL connection string (key-value or URI form)
    #[serde(default)]
    pub connection_string: String,

    /// Query text
    #[serde(default)]
    pub query: String,

    /// Positional query parameters, bound as TEXT
    #[serde(default)]
    pub params: Vec<String>,

    /// Time allowed for the source to accept the query
    #[serde(default = "default_query_timeout_seconds")]
    pub query_timeout_seconds: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            connection_string: String::new(),
            query: String::new(),
            params: Vec::new(),
            query_timeout_seconds: default_query_timeout_seconds(),
        }
    }
}

impl SourceConfig {
    /// Query timeout as a duration.
    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_seconds)
    }
}

/// HTTP event sink configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SinkConfig {
    /// Sink host including scheme, e.g. `http://localhost`
    #[serde(default)]
    pub host: String,

    /// Sink port
    #[serde(default)]
    pub port: Option<u16>,

    /// Request path
    #[serde(default = "default_sink_path")]
    pub path: String,

    /// CloudEvents HTTP encoding
    #[serde(default)]
    pub encoding: EventEncoding,

    /// Timeout for a single delivery attempt in milliseconds
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Budget for all attempts of one envelope in milliseconds
    #[serde(default = "default_delivery_timeout_ms")]
    pub delivery_timeout_ms: u64,

    /// Extra headers sent with every request
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: None,
            path: default_sink_path(),
            encoding: EventEncoding::default(),
            request_timeout_ms: default_request_timeout_ms(),
            delivery_timeout_ms: default_delivery_timeout_ms(),
            headers: HashMap::new(),
        }
    }
}

impl SinkConfig {
    /// Full endpoint URL: `{host}:{port}{path}`.
    pub fn endpoint(&self) -> String {
        let path = if self.path.starts_with('/') {
            self.path.clone()
        } else {
            format!("/{}", self.path)
        };
        match self.port {
            Some(port) => format!("{}:{}{}", self.host.trim_end_matches('/'), port, path),
            None => format!("{}{}", self.host.trim_end_matches('/'), path),
        }
    }

    /// Per-attempt request timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Deadline for the whole retry sequence of one envelope.
    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_millis(self.delivery_timeout_ms)
    }
}

/// CloudEvents HTTP content mode.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EventEncoding {
    /// Whole envelope as the JSON body (default)
    #[default]
    Structured,
    /// Row JSON as the body, attributes as `ce-*` headers
    Binary,
}

/// Run-scoped event identity.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct EventConfig {
    /// CloudEvents `type` attribute
    #[serde(default)]
    pub event_type: String,

    /// CloudEvents `source` attribute
    #[serde(default)]
    pub event_source: String,
}

/// Delivery retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    /// Delay before the second attempt in milliseconds
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    /// Growth factor applied per attempt
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Upper bound for a single delay in milliseconds
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Maximum number of attempts per envelope, first attempt included
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            multiplier: default_multiplier(),
            max_delay_ms: default_max_delay_ms(),
            max_attempts: default_max_attempts(),
        }
    }
}

/// Monitoring configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct MonitoringConfig {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Log format
    #[serde(default)]
    pub log_format: LogFormat,

    /// Port for the health and metrics server; disabled when unset
    #[serde(default)]
    pub http_port: Option<u16>,
}

/// Log level.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace level
    Trace,
    /// Debug level
    Debug,
    /// Info level (default)
    #[default]
    Info,
    /// Warn level
    Warn,
    /// Error level
    Error,
}

impl LogLevel {
    /// Directive understood by `EnvFilter`.
    pub fn as_directive(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Log format.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON format (default)
    #[default]
    Json,
    /// Plain text format
    Text,
}

// Default value functions

fn default_query_timeout_seconds() -> u64 {
    300
}

fn default_sink_path() -> String {
    "/".to_string()
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_delivery_timeout_ms() -> u64 {
    60_000
}

fn default_initial_delay_ms() -> u64 {
    10
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_max_delay_ms() -> u64 {
    1_000
}

fn default_max_attempts() -> u32 {
    3
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            crate::Error::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load from `path`, or from [`DEFAULT_CONFIG_FILE`] when it exists,
    /// or fall back to defaults. The result is not validated so callers can
    /// apply overrides first.
    pub fn load(path: Option<&Path>) -> crate::Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => {
                let fallback = Path::new(DEFAULT_CONFIG_FILE);
                if fallback.exists() {
                    Self::from_file(fallback)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> crate::Result<()> {
        if self.source.connection_string.trim().is_empty() {
            return Err(crate::Error::Config(
                "Source connection string is required".into(),
            ));
        }

        if self.source.query.trim().is_empty() {
            return Err(crate::Error::Config("Query is required".into()));
        }

        if self.source.query_timeout_seconds == 0 {
            return Err(crate::Error::Config(
                "Query timeout must be greater than zero".into(),
            ));
        }

        if self.sink.host.trim().is_empty() {
            return Err(crate::Error::Config("Sink host is required".into()));
        }

        if !(self.sink.host.starts_with("http://") || self.sink.host.starts_with("https://")) {
            return Err(crate::Error::Config(format!(
                "Sink host must start with http:// or https://, got {}",
                self.sink.host
            )));
        }

        match self.sink.port {
            None => return Err(crate::Error::Config("Sink port is required".into())),
            Some(0) => {
                return Err(crate::Error::Config(
                    "Sink port must be greater than zero".into(),
                ))
            }
            Some(_) => {}
        }

        if self.sink.request_timeout_ms == 0 || self.sink.delivery_timeout_ms == 0 {
            return Err(crate::Error::Config(
                "Sink timeouts must be greater than zero".into(),
            ));
        }

        if self.event.event_type.trim().is_empty() {
            return Err(crate::Error::Config("Event type is required".into()));
        }

        if self.event.event_source.trim().is_empty() {
            return Err(crate::Error::Config("Event source is required".into()));
        }

        if self.retry.max_attempts == 0 {
            return Err(crate::Error::Config(
                "Retry max_attempts must be at least 1".into(),
            ));
        }

        if !self.retry.multiplier.is_finite() || self.retry.multiplier < 1.0 {
            return Err(crate::Error::Config(format!(
                "Retry multiplier must be a finite number >= 1.0, got {}",
                self.retry.multiplier
            )));
        }

        if self.retry.max_delay_ms < self.retry.initial_delay_ms {
            tracing::warn!(
                initial_delay_ms = self.retry.initial_delay_ms,
                max_delay_ms = self.retry.max_delay_ms,
                "Retry max delay is below the initial delay, every wait will be capped"
            );
        }

        if self.sink.delivery_timeout_ms < self.sink.request_timeout_ms {
            tracing::warn!(
                request_timeout_ms = self.sink.request_timeout_ms,
                delivery_timeout_ms = self.sink.delivery_timeout_ms,
                "Delivery timeout is shorter than one request timeout"
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn valid_config() -> Config {
        Config {
            source: SourceConfig {
                connection_string: "host=localhost user=app dbname=analytics".into(),
                query: "SELECT 1 AS a".into(),
                ..SourceConfig::default()
            },
            sink: SinkConfig {
                host: "http://localhost".into(),
                port: Some(8080),
                ..SinkConfig::default()
            },
            event: EventConfig {
                event_type: "dev.example.row".into(),
                event_source: "github.com/example".into(),
            },
            retry: RetryConfig::default(),
            monitoring: MonitoringConfig::default(),
        }
    }

    #[test]
    fn test_default_retry_config() {
        let config = RetryConfig::default();
        assert_eq!(config.initial_delay_ms, 10);
        assert_eq!(config.multiplier, 2.0);
        assert_eq!(config.max_delay_ms, 1000);
        assert_eq!(config.max_attempts, 3);
    }

    #[test]
    fn test_default_sink_config() {
        let config = SinkConfig::default();
        assert!(config.host.is_empty());
        assert!(config.port.is_none());
        assert_eq!(config.path, "/");
        assert_eq!(config.encoding, EventEncoding::Structured);
        assert_eq!(config.request_timeout(), Duration::from_secs(10));
        assert_eq!(config.delivery_timeout(), Duration::from_secs(60));
    }

    #[test]
    fn test_default_monitoring_config() {
        let config = MonitoringConfig::default();
        assert_eq!(config.log_level, LogLevel::Info);
        assert_eq!(config.log_format, LogFormat::Json);
        assert!(config.http_port.is_none());
    }

    #[test]
    fn test_config_validation() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_config_validation_missing_connection() {
        let mut config = valid_config();
        config.source.connection_string = String::new();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("connection string"));
    }

    #[test]
    fn test_config_validation_missing_query() {
        let mut config = valid_config();
        config.source.query = "   ".into();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Query is required"));
    }

    #[test]
    fn test_config_validation_missing_sink_host() {
        let mut config = valid_config();
        config.sink.host = String::new();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Sink host"));
    }

    #[test]
    fn test_config_validation_sink_host_scheme() {
        let mut config = valid_config();
        config.sink.host = "localhost".into();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("http://"));
    }

    #[test]
    fn test_config_validation_missing_sink_port() {
        let mut config = valid_config();
        config.sink.port = None;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Sink port"));
    }

    #[test]
    fn test_config_validation_missing_event_identity() {
        let mut config = valid_config();
        config.event.event_type = String::new();
        assert!(config
            .validate()
            .unwrap_err()
            .to_string()
            .contains("Event type"));

        let mut config = valid_config();
        config.event.event_source = String::new();
        assert!(config
            .validate()
            .unwrap_err()
            .to_string()
            .contains("Event source"));
    }

    #[test]
    fn test_config_validation_retry_bounds() {
        let mut config = valid_config();
        config.retry.max_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.retry.multiplier = 0.5;
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.retry.multiplier = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_sink_endpoint() {
        let mut sink = SinkConfig {
            host: "http://0.0.0.0/".into(),
            port: Some(8080),
            ..SinkConfig::default()
        };
        assert_eq!(sink.endpoint(), "http://0.0.0.0:8080/");

        sink.path = "events".into();
        assert_eq!(sink.endpoint(), "http://0.0.0.0:8080/events");

        sink.port = None;
        assert_eq!(sink.endpoint(), "http://0.0.0.0/events");
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            [source]
            connection_string = "postgres://app@localhost/analytics"
            query = "SELECT * FROM releases WHERE day = $1::date"
            params = ["2024-01-01"]

            [sink]
            host = "https://events.example.com"
            port = 443
            path = "/ingest"
            encoding = "binary"
            [sink.headers]
            authorization = "Bearer token"

            [event]
            event_type = "dev.example.release"
            event_source = "github.com/example"

            [retry]
            max_attempts = 5

            [monitoring]
            log_format = "text"
            http_port = 8081
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.source.params, vec!["2024-01-01".to_string()]);
        assert_eq!(config.source.query_timeout_seconds, 300);
        assert_eq!(config.sink.encoding, EventEncoding::Binary);
        assert_eq!(
            config.sink.headers.get("authorization").map(String::as_str),
            Some("Bearer token")
        );
        assert_eq!(config.sink.endpoint(), "https://events.example.com:443/ingest");
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.initial_delay_ms, 10);
        assert_eq!(config.monitoring.log_format, LogFormat::Text);
        assert_eq!(config.monitoring.http_port, Some(8081));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            [source]
            connection_string = "host=localhost"
            query = "SELECT 1"

            [sink]
            host = "http://localhost"
            port = 9000

            [event]
            event_type = "t"
            event_source = "s"
            "#
        )
        .unwrap();

        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.sink.port, Some(9000));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_from_missing_file() {
        let err = Config::load(Some(Path::new("/definitely/not/here.toml"))).unwrap_err();
        match err {
            crate::Error::Config(message) => {
                assert!(message.contains("/definitely/not/here.toml"), "{}", message)
            }
            other => panic!("expected a configuration error, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_config_is_invalid() {
        let config = Config::default();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_log_level_directive() {
        assert_eq!(LogLevel::default().as_directive(), "info");
        assert_eq!(LogLevel::Trace.as_directive(), "trace");
        assert_eq!(LogLevel::Error.as_directive(), "error");
    }
}
