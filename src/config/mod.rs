//! Settings for the tessera binary.
//!
//! Sources are merged in order: `tessera.toml` in the working directory, an
//! explicit `--config-file`, `TESSERA_*` environment variables such as
//! `TESSERA_CACHE__MAX_ENTRIES`, then CLI flags.

mod cli;

use std::str::FromStr;

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::cache::CacheConfig;

pub use cli::{CascadeArgs, CliArgs, Command, DemoArgs, SettingsOverrides};

const LOCAL_CONFIG_BASENAME: &str = "tessera";

/// Validated settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub cache: CacheConfig,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Compact,
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

pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix("TESSERA").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;
    raw.apply_overrides(&cli.overrides);

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    cache: RawCacheSettings,
}

impl RawSettings {
    fn apply_overrides(&mut self, overrides: &SettingsOverrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(max_entries) = overrides.cache_max_entries {
            self.cache.max_entries = Some(max_entries);
        }
        if let Some(stale_time) = overrides.cache_stale_time_ms {
            self.cache.default_stale_time_ms = Some(stale_time);
        }
        if let Some(grace) = overrides.cache_gc_grace_ms {
            self.cache.gc_grace_ms = Some(grace);
        }
        if let Some(retry) = overrides.cache_retry {
            self.cache.default_retry = Some(retry);
        }
    }
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

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheConfig, LoadError> {
    let defaults = CacheConfig::default();
    let config = CacheConfig {
        max_entries: cache.max_entries.unwrap_or(defaults.max_entries),
        gc_grace_ms: cache.gc_grace_ms.unwrap_or(defaults.gc_grace_ms),
        gc_interval_ms: cache.gc_interval_ms.unwrap_or(defaults.gc_interval_ms),
        default_stale_time_ms: cache
            .default_stale_time_ms
            .unwrap_or(defaults.default_stale_time_ms),
        default_retry: cache.default_retry.unwrap_or(defaults.default_retry),
        retry_base_delay_ms: cache
            .retry_base_delay_ms
            .unwrap_or(defaults.retry_base_delay_ms),
        retry_max_delay_ms: cache
            .retry_max_delay_ms
            .unwrap_or(defaults.retry_max_delay_ms),
        default_mutation_retry: cache
            .default_mutation_retry
            .unwrap_or(defaults.default_mutation_retry),
    };

    if config.max_entries == 0 {
        return Err(LoadError::invalid(
            "cache.max_entries",
            "must be greater than zero",
        ));
    }
    if config.gc_interval_ms == 0 {
        return Err(LoadError::invalid(
            "cache.gc_interval_ms",
            "must be greater than zero",
        ));
    }
    if config.retry_max_delay_ms < config.retry_base_delay_ms {
        return Err(LoadError::invalid(
            "cache.retry_max_delay_ms",
            format!(
                "must be at least retry_base_delay_ms ({})",
                config.retry_base_delay_ms
            ),
        ));
    }

    Ok(config)
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
    max_entries: Option<usize>,
    gc_grace_ms: Option<u64>,
    gc_interval_ms: Option<u64>,
    default_stale_time_ms: Option<u64>,
    default_retry: Option<u32>,
    retry_base_delay_ms: Option<u64>,
    retry_max_delay_ms: Option<u64>,
    default_mutation_retry: Option<u32>,
}

/// Parse the process arguments and load settings from them.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[cfg(test)]
mod tests;
