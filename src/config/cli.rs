use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};
use tessera_types::Category;

/// Command-line arguments for the Tessera binary.
#[derive(Debug, Parser)]
#[command(name = "tessera", version, about = "Tessera reactive data-access layer")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "TESSERA_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: SettingsOverrides,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the scripted optimistic update, rollback and cascade scenario.
    Demo(DemoArgs),
    /// Print the static invalidation cascade table.
    Cascade(CascadeArgs),
}

#[derive(Debug, Args, Clone)]
pub struct DemoArgs {
    /// Simulated provider latency.
    #[arg(long = "latency-ms", value_name = "MILLIS", default_value_t = 25)]
    pub latency_ms: u64,

    /// Seed records in the in-memory provider before the scenario starts.
    #[arg(long = "seed-records", value_name = "COUNT", default_value_t = 2)]
    pub seed_records: usize,
}

impl Default for DemoArgs {
    fn default() -> Self {
        Self {
            latency_ms: 25,
            seed_records: 2,
        }
    }
}

#[derive(Debug, Args, Default, Clone)]
pub struct CascadeArgs {
    /// Only print the rule for this written category.
    #[arg(long = "category", value_name = "CATEGORY")]
    pub category: Option<Category>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct SettingsOverrides {
    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub log_json: Option<bool>,

    /// Override the cache entry bound.
    #[arg(long = "cache-max-entries", value_name = "COUNT", global = true)]
    pub cache_max_entries: Option<usize>,

    /// Override the default freshness window of fetched results.
    #[arg(long = "cache-stale-time-ms", value_name = "MILLIS", global = true)]
    pub cache_stale_time_ms: Option<u64>,

    /// Override the grace window before unreferenced entries are collected.
    #[arg(long = "cache-gc-grace-ms", value_name = "MILLIS", global = true)]
    pub cache_gc_grace_ms: Option<u64>,

    /// Override the default number of query retries.
    #[arg(long = "cache-retry", value_name = "COUNT", global = true)]
    pub cache_retry: Option<u32>,
}
