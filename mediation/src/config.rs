use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::num::NonZeroUsize;
use std::str::FromStr;
use std::time;

use chrono::format::{Item, StrftimeItems};
use chrono_tz::Tz;
use envconfig::Envconfig;
use reqwest::header::HeaderMap;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::Level;
use url::Url;

use crate::stages::{FilterAction, FilterRule, TransformationRule};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),
    #[error("invalid date format {0:?}")]
    InvalidDateFormat(String),
    #[error("EXPORT_DESTINATION is required for the {0} sink")]
    MissingDestination(SinkType),
    #[error("invalid export destination {destination:?}: {reason}")]
    InvalidDestination { destination: String, reason: String },
    #[error("invalid export headers: {0}")]
    InvalidHeaders(#[source] http::Error),
}

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "3400")]
    pub port: u16,

    #[envconfig(default = "true")]
    pub export_prometheus: bool,

    pub otel_url: Option<String>,

    #[envconfig(default = "1.0")]
    pub otel_sampling_rate: f64,

    #[envconfig(default = "cdr-mediation")]
    pub otel_service_name: String,

    #[envconfig(default = "info")]
    pub log_level: Level,

    #[envconfig(from = "SHUTDOWN_GRACE_PERIOD_MS", default = "30000")]
    pub shutdown_grace_period: EnvMsDuration,

    #[envconfig(nested = true)]
    pub ingestion: IngestionConfig,

    #[envconfig(nested = true)]
    pub enrichment: EnrichmentConfig,

    #[envconfig(nested = true)]
    pub transformation: TransformationConfig,

    #[envconfig(nested = true)]
    pub filtering: FilteringConfig,

    #[envconfig(nested = true)]
    pub export: ExportConfig,
}

#[derive(Envconfig, Clone)]
pub struct IngestionConfig {
    #[envconfig(from = "INGESTION_BATCH_SIZE", default = "100")]
    pub batch_size: NonZeroUsize,

    #[envconfig(from = "INGESTION_BUFFER_SIZE", default = "1000")]
    pub buffer_size: NonZeroUsize,

    #[envconfig(from = "INGESTION_FLUSH_INTERVAL_MS", default = "1000")]
    pub flush_interval: EnvMsDuration,
}

#[derive(Envconfig, Clone)]
pub struct EnrichmentConfig {
    #[envconfig(from = "ENRICHMENT_ENABLED", default = "false")]
    pub enabled: bool,

    #[envconfig(from = "ENRICHMENT_CACHE_SIZE", default = "10000")]
    pub cache_size: NonZeroUsize,

    #[envconfig(from = "ENRICHMENT_CACHE_TTL_SECS", default = "300")]
    pub cache_ttl_secs: u64,

    /// Target field name to cache key, as a JSON object
    #[envconfig(from = "ENRICHMENT_CUSTOM_FIELDS", default = "{}")]
    pub custom_fields: JsonEnv<BTreeMap<String, String>>,
}

impl EnrichmentConfig {
    pub fn cache_ttl(&self) -> time::Duration {
        time::Duration::from_secs(self.cache_ttl_secs)
    }
}

#[derive(Envconfig, Clone)]
pub struct TransformationConfig {
    #[envconfig(from = "TRANSFORMATION_RULES", default = "[]")]
    pub rules: JsonEnv<Vec<TransformationRule>>,

    #[envconfig(from = "TRANSFORMATION_DATE_FORMAT", default = "%Y-%m-%d %H:%M:%S")]
    pub date_format: String,

    #[envconfig(from = "TRANSFORMATION_TIME_ZONE", default = "UTC")]
    pub time_zone: Tz,
}

#[derive(Envconfig, Clone)]
pub struct FilteringConfig {
    #[envconfig(from = "FILTERING_ENABLED", default = "false")]
    pub enabled: bool,

    #[envconfig(from = "FILTERING_CONDITIONS", default = "[]")]
    pub conditions: JsonEnv<Vec<FilterRule>>,

    #[envconfig(from = "FILTERING_ACTION", default = "keep")]
    pub action: FilterAction,
}

#[derive(Envconfig, Clone)]
pub struct ExportConfig {
    #[envconfig(from = "EXPORT_SINK", default = "print")]
    pub sink: SinkType,

    /// URL for the http sink, file path for the file sink, topic for kafka
    #[envconfig(from = "EXPORT_DESTINATION")]
    pub destination: Option<String>,

    #[envconfig(from = "EXPORT_BATCH_SIZE", default = "100")]
    pub batch_size: NonZeroUsize,

    #[envconfig(from = "EXPORT_FLUSH_TIMEOUT_MS", default = "5000")]
    pub flush_interval: EnvMsDuration,

    #[envconfig(from = "EXPORT_REQUEST_TIMEOUT_MS", default = "10000")]
    pub request_timeout: EnvMsDuration,

    #[envconfig(from = "EXPORT_HEADERS", default = "{}")]
    pub headers: JsonEnv<HashMap<String, String>>,
}

impl Config {
    /// Produce a host:port address for binding a TcpListener.
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Checks that envconfig parsing alone cannot catch.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, duration) in [
            ("SHUTDOWN_GRACE_PERIOD_MS", self.shutdown_grace_period),
            ("INGESTION_FLUSH_INTERVAL_MS", self.ingestion.flush_interval),
            ("EXPORT_FLUSH_TIMEOUT_MS", self.export.flush_interval),
            ("EXPORT_REQUEST_TIMEOUT_MS", self.export.request_timeout),
        ] {
            if duration.0.is_zero() {
                return Err(ConfigError::ZeroDuration(name));
            }
        }

        let date_format = &self.transformation.date_format;
        if StrftimeItems::new(date_format).any(|item| matches!(item, Item::Error)) {
            return Err(ConfigError::InvalidDateFormat(date_format.clone()));
        }

        match self.export.sink {
            SinkType::Http => {
                self.export.destination_url()?;
                self.export.header_map()?;
            }
            SinkType::File => {
                self.export.require_destination()?;
            }
            SinkType::Kafka | SinkType::Print => {}
        }

        Ok(())
    }
}

impl ExportConfig {
    pub fn require_destination(&self) -> Result<&str, ConfigError> {
        match self.destination.as_deref().map(str::trim) {
            Some(destination) if !destination.is_empty() => Ok(destination),
            _ => Err(ConfigError::MissingDestination(self.sink)),
        }
    }

    pub fn destination_url(&self) -> Result<Url, ConfigError> {
        let destination = self.require_destination()?;
        let url = Url::parse(destination).map_err(|e| ConfigError::InvalidDestination {
            destination: destination.to_owned(),
            reason: e.to_string(),
        })?;

        match url.scheme() {
            "http" | "https" => Ok(url),
            scheme => Err(ConfigError::InvalidDestination {
                destination: destination.to_owned(),
                reason: format!("unsupported scheme {scheme}"),
            }),
        }
    }

    pub fn header_map(&self) -> Result<HeaderMap, ConfigError> {
        HeaderMap::try_from(&self.headers.0).map_err(ConfigError::InvalidHeaders)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkType {
    Http,
    Kafka,
    File,
    Print,
}

impl fmt::Display for SinkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SinkType::Http => "http",
            SinkType::Kafka => "kafka",
            SinkType::File => "file",
            SinkType::Print => "print",
        };
        f.write_str(name)
    }
}

impl FromStr for SinkType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_ref() {
            "http" => Ok(SinkType::Http),
            "kafka" => Ok(SinkType::Kafka),
            "file" => Ok(SinkType::File),
            "print" => Ok(SinkType::Print),
            _ => Err(format!("Unknown export sink: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EnvMsDuration(pub time::Duration);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseEnvMsDurationError;

impl FromStr for EnvMsDuration {
    type Err = ParseEnvMsDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ms = s.parse::<u64>().map_err(|_| ParseEnvMsDurationError)?;

        Ok(EnvMsDuration(time::Duration::from_millis(ms)))
    }
}

/// A structured setting passed as a JSON string.
#[derive(Debug, Clone, PartialEq)]
pub struct JsonEnv<T>(pub T);

impl<T: DeserializeOwned> FromStr for JsonEnv<T> {
    type Err = serde_json::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_str(s).map(JsonEnv)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::{Operation, Operator};

    fn config(vars: &[(&str, &str)]) -> Result<Config, envconfig::Error> {
        let env: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::init_from_hashmap(&env)
    }

    #[test]
    fn defaults() {
        let config = config(&[]).expect("defaults should parse");

        assert_eq!(config.bind(), "0.0.0.0:3400");
        assert_eq!(config.ingestion.batch_size.get(), 100);
        assert_eq!(config.ingestion.buffer_size.get(), 1000);
        assert_eq!(config.ingestion.flush_interval.0, time::Duration::from_secs(1));
        assert!(!config.enrichment.enabled);
        assert_eq!(config.enrichment.cache_size.get(), 10000);
        assert_eq!(config.enrichment.cache_ttl(), time::Duration::from_secs(300));
        assert!(config.transformation.rules.0.is_empty());
        assert_eq!(config.transformation.time_zone, Tz::UTC);
        assert!(!config.filtering.enabled);
        assert_eq!(config.filtering.action, FilterAction::Keep);
        assert_eq!(config.export.sink, SinkType::Print);
        assert_eq!(config.export.flush_interval.0, time::Duration::from_secs(5));
        assert_eq!(config.shutdown_grace_period.0, time::Duration::from_secs(30));
        config.validate().expect("defaults should be valid");
    }

    #[test]
    fn structured_settings() {
        let config = config(&[
            ("ENRICHMENT_ENABLED", "true"),
            (
                "ENRICHMENT_CUSTOM_FIELDS",
                r#"{"plan":"subscriber:plan","region":"geo:region"}"#,
            ),
            (
                "TRANSFORMATION_RULES",
                r#"[{"field":"msisdn","operation":"mask","value":"last4"},{"field":"city","operation":"uppercase"}]"#,
            ),
            ("TRANSFORMATION_TIME_ZONE", "Europe/Paris"),
            ("FILTERING_ENABLED", "true"),
            (
                "FILTERING_CONDITIONS",
                r#"[{"field":"status","operator":"equals","value":"test"}]"#,
            ),
            ("FILTERING_ACTION", "drop"),
            ("EXPORT_SINK", "http"),
            ("EXPORT_DESTINATION", "https://billing.example.com/cdr"),
            ("EXPORT_HEADERS", r#"{"Authorization":"Bearer token"}"#),
        ])
        .expect("config should parse");

        assert_eq!(config.enrichment.custom_fields.0.len(), 2);
        assert_eq!(
            config.transformation.rules.0,
            vec![
                TransformationRule::new("msisdn", Operation::Mask, "last4"),
                TransformationRule::new("city", Operation::Uppercase, ""),
            ]
        );
        assert_eq!(config.transformation.time_zone, chrono_tz::Europe::Paris);
        assert_eq!(
            config.filtering.conditions.0,
            vec![FilterRule::new("status", Operator::Equals, "test")]
        );
        assert_eq!(config.filtering.action, FilterAction::Drop);
        assert_eq!(
            config.export.destination_url().unwrap().as_str(),
            "https://billing.example.com/cdr"
        );
        assert_eq!(
            config.export.header_map().unwrap().get("authorization").unwrap(),
            "Bearer token"
        );
        config.validate().expect("config should be valid");
    }

    #[test]
    fn unparsable_values_fail_fast() {
        assert!(config(&[("INGESTION_BATCH_SIZE", "0")]).is_err());
        assert!(config(&[("ENRICHMENT_CACHE_SIZE", "0")]).is_err());
        assert!(config(&[("TRANSFORMATION_TIME_ZONE", "Mars/Olympus")]).is_err());
        assert!(config(&[("FILTERING_ACTION", "discard")]).is_err());
        assert!(config(&[("EXPORT_SINK", "carrier-pigeon")]).is_err());
        assert!(config(&[("TRANSFORMATION_RULES", r#"[{"field":"x","operation":"reverse"}]"#)]).is_err());
        assert!(config(&[("FILTERING_CONDITIONS", r#"[{"field":"x","operator":"like"}]"#)]).is_err());
        assert!(config(&[("ENRICHMENT_CUSTOM_FIELDS", "not json")]).is_err());
    }

    #[test]
    fn validation_errors() {
        let zero = config(&[("INGESTION_FLUSH_INTERVAL_MS", "0")]).unwrap();
        assert!(matches!(
            zero.validate(),
            Err(ConfigError::ZeroDuration("INGESTION_FLUSH_INTERVAL_MS"))
        ));

        let date = config(&[("TRANSFORMATION_DATE_FORMAT", "%Y-%m-%")]).unwrap();
        assert!(matches!(
            date.validate(),
            Err(ConfigError::InvalidDateFormat(_))
        ));

        let no_destination = config(&[("EXPORT_SINK", "http")]).unwrap();
        assert!(matches!(
            no_destination.validate(),
            Err(ConfigError::MissingDestination(SinkType::Http))
        ));

        let bad_scheme = config(&[
            ("EXPORT_SINK", "http"),
            ("EXPORT_DESTINATION", "ftp://billing.example.com"),
        ])
        .unwrap();
        assert!(matches!(
            bad_scheme.validate(),
            Err(ConfigError::InvalidDestination { .. })
        ));

        let bad_header = config(&[
            ("EXPORT_SINK", "http"),
            ("EXPORT_DESTINATION", "http://localhost:8080/cdr"),
            ("EXPORT_HEADERS", r#"{"bad header":"x"}"#),
        ])
        .unwrap();
        assert!(matches!(
            bad_header.validate(),
            Err(ConfigError::InvalidHeaders(_))
        ));

        let no_file = config(&[("EXPORT_SINK", "file"), ("EXPORT_DESTINATION", " ")]).unwrap();
        assert!(matches!(
            no_file.validate(),
            Err(ConfigError::MissingDestination(SinkType::File))
        ));

        // The queue sink only logs, a topic is optional
        let kafka = config(&[("EXPORT_SINK", "kafka")]).unwrap();
        kafka.validate().unwrap();
    }
}
