//! Cache configuration.
//!
//! Controls store capacity, garbage collection and the query/mutation defaults
//! applied when a call site leaves an option unset.

use std::num::NonZeroUsize;
use std::time::Duration;

use serde::Deserialize;

// Default values for cache configuration
const DEFAULT_MAX_ENTRIES: usize = 1000;
const DEFAULT_GC_GRACE_MS: u64 = 300_000;
const DEFAULT_GC_INTERVAL_MS: u64 = 60_000;
const DEFAULT_STALE_TIME_MS: u64 = 0;
const DEFAULT_RETRY: u32 = 3;
const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 200;
const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 10_000;
const DEFAULT_MUTATION_RETRY: u32 = 0;

/// Cache configuration, read from the `[cache]` table of `tessera.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum entries held by the store before LRU eviction.
    pub max_entries: usize,
    /// How long an entry without subscribers survives before GC removes it.
    pub gc_grace_ms: u64,
    /// Interval of the background GC sweep.
    pub gc_interval_ms: u64,
    /// Freshness window for queries that do not set `stale_time`.
    pub default_stale_time_ms: u64,
    /// Provider-call retries for queries that do not set `retry`.
    pub default_retry: u32,
    /// First retry delay; doubled per attempt.
    pub retry_base_delay_ms: u64,
    /// Upper bound of the retry delay.
    pub retry_max_delay_ms: u64,
    /// Provider-call retries for mutations that do not set `retry`.
    pub default_mutation_retry: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_MAX_ENTRIES,
            gc_grace_ms: DEFAULT_GC_GRACE_MS,
            gc_interval_ms: DEFAULT_GC_INTERVAL_MS,
            default_stale_time_ms: DEFAULT_STALE_TIME_MS,
            default_retry: DEFAULT_RETRY,
            retry_base_delay_ms: DEFAULT_RETRY_BASE_DELAY_MS,
            retry_max_delay_ms: DEFAULT_RETRY_MAX_DELAY_MS,
            default_mutation_retry: DEFAULT_MUTATION_RETRY,
        }
    }
}

impl CacheConfig {
    /// Returns the store capacity as NonZeroUsize, clamping to 1 if zero.
    pub fn max_entries_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.max_entries).unwrap_or(NonZeroUsize::MIN)
    }

    pub fn gc_grace(&self) -> Duration {
        Duration::from_millis(self.gc_grace_ms)
    }

    pub fn gc_interval(&self) -> Duration {
        Duration::from_millis(self.gc_interval_ms)
    }

    pub fn default_stale_time(&self) -> Duration {
        Duration::from_millis(self.default_stale_time_ms)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn retry_max_delay(&self) -> Duration {
        Duration::from_millis(self.retry_max_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let config = CacheConfig::default();
        assert_eq!(config.max_entries, 1000);
        assert_eq!(config.gc_grace_ms, 300_000);
        assert_eq!(config.gc_interval_ms, 60_000);
        assert_eq!(config.default_stale_time_ms, 0);
        assert_eq!(config.default_retry, 3);
        assert_eq!(config.retry_base_delay_ms, 200);
        assert_eq!(config.retry_max_delay_ms, 10_000);
        assert_eq!(config.default_mutation_retry, 0);
    }

    #[test]
    fn partial_tables_fill_in_defaults() {
        let config: CacheConfig =
            serde_json::from_str(r#"{ "max_entries": 5, "default_retry": 1 }"#).expect("parse");
        assert_eq!(config.max_entries, 5);
        assert_eq!(config.default_retry, 1);
        assert_eq!(config.gc_grace(), Duration::from_secs(300));
    }

    #[test]
    fn non_zero_clamps_to_min() {
        let config = CacheConfig {
            max_entries: 0,
            ..Default::default()
        };
        assert_eq!(config.max_entries_non_zero().get(), 1);
    }
}
