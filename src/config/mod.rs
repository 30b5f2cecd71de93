//! Configuration layer: typed settings with layered precedence (file → env).

use std::{
    num::{NonZeroU64, NonZeroUsize},
    path::Path,
    str::FromStr,
};

use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "respcache";
const ENV_PREFIX: &str = "RESPCACHE";
const DEFAULT_CACHE_TTL_SECS: u64 = 300;
const DEFAULT_CACHE_MAX_BODY_BYTES: u64 = 1024 * 1024;

#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub cache: CacheSettings,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub enabled: bool,
    pub default_ttl: NonZeroU64,
    pub shared_partition: bool,
    pub max_body_bytes: NonZeroUsize,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment).
///
/// `config_file`, when given, must exist and overrides the default files.
pub fn load(config_file: Option<&Path>) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = config_file {
        builder = builder.add_source(File::from(path).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let raw: RawSettings = builder.build()?.try_deserialize()?;
    Settings::from_raw(raw)
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings { logging, cache } = raw;

        let logging = build_logging_settings(logging)?;
        let cache = build_cache_settings(cache)?;

        Ok(Self { logging, cache })
    }
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let ttl_value = cache.default_ttl_seconds.unwrap_or(DEFAULT_CACHE_TTL_SECS);
    let default_ttl = NonZeroU64::new(ttl_value).ok_or_else(|| {
        LoadError::invalid("cache.default_ttl_seconds", "must be greater than zero")
    })?;

    let max_body_value = cache
        .max_body_bytes
        .unwrap_or(DEFAULT_CACHE_MAX_BODY_BYTES);
    let max_body_bytes = non_zero_usize(max_body_value, "cache.max_body_bytes")?;

    Ok(CacheSettings {
        enabled: cache.enabled.unwrap_or(true),
        default_ttl,
        shared_partition: cache.shared_partition.unwrap_or(false),
        max_body_bytes,
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    cache: RawCacheSettings,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    enabled: Option<bool>,
    default_ttl_seconds: Option<u64>,
    shared_partition: Option<bool>,
    max_body_bytes: Option<u64>,
}

fn non_zero_usize(value: u64, key: &'static str) -> Result<NonZeroUsize, LoadError> {
    let value: usize = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for usize"))?;
    NonZeroUsize::new(value).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn defaults_apply_without_sources() {
        let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");

        assert_eq!(settings.logging.level, LevelFilter::INFO);
        assert!(matches!(settings.logging.format, LogFormat::Compact));
        assert!(settings.cache.enabled);
        assert!(!settings.cache.shared_partition);
        assert_eq!(settings.cache.default_ttl.get(), DEFAULT_CACHE_TTL_SECS);
        assert_eq!(settings.cache.max_body_bytes.get(), 1024 * 1024);
    }

    #[test]
    fn json_logging_selects_json_format() {
        let mut raw = RawSettings::default();
        raw.logging.json = Some(true);
        raw.logging.level = Some("debug".to_string());

        let settings = Settings::from_raw(raw).expect("valid settings");
        assert!(matches!(settings.logging.format, LogFormat::Json));
        assert_eq!(settings.logging.level, LevelFilter::DEBUG);
    }

    #[test]
    fn invalid_log_level_is_rejected() {
        let mut raw = RawSettings::default();
        raw.logging.level = Some("loud".to_string());

        let err = Settings::from_raw(raw).expect_err("level must parse");
        assert!(matches!(err, LoadError::Invalid { key: "logging.level", .. }));
    }

    #[test]
    fn zero_ttl_is_rejected() {
        let mut raw = RawSettings::default();
        raw.cache.default_ttl_seconds = Some(0);

        let err = Settings::from_raw(raw).expect_err("ttl must be positive");
        assert!(matches!(
            err,
            LoadError::Invalid {
                key: "cache.default_ttl_seconds",
                ..
            }
        ));
    }

    #[test]
    fn zero_body_limit_is_rejected() {
        let mut raw = RawSettings::default();
        raw.cache.max_body_bytes = Some(0);

        let err = Settings::from_raw(raw).expect_err("limit must be positive");
        assert!(matches!(
            err,
            LoadError::Invalid {
                key: "cache.max_body_bytes",
                ..
            }
        ));
    }

    #[test]
    fn explicit_file_is_layered_over_defaults() {
        let dir = std::env::temp_dir().join(format!("respcache-config-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).expect("create temp dir");
        let path = dir.join("cache.toml");
        let mut file = std::fs::File::create(&path).expect("create config file");
        writeln!(
            file,
            "[cache]\ndefault_ttl_seconds = 60\nshared_partition = true\n\n[logging]\njson = true"
        )
        .expect("write config file");

        let settings = load(Some(path.as_path())).expect("load settings");
        std::fs::remove_dir_all(&dir).ok();

        assert_eq!(settings.cache.default_ttl.get(), 60);
        assert!(settings.cache.shared_partition);
        assert!(matches!(settings.logging.format, LogFormat::Json));
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let path = Path::new("/nonexistent/respcache/settings.toml");
        assert!(matches!(load(Some(path)), Err(LoadError::Build(_))));
    }
}
