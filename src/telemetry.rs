use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use thiserror::Error;
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

static METRIC_DESCRIPTIONS: Once = Once::new();

#[derive(Debug, Error)]
#[error("telemetry error: {message}")]
pub struct TelemetryError {
    message: String,
}

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), TelemetryError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| TelemetryError {
            message: format!("failed to install tracing subscriber: {err}"),
        })
}

/// Register descriptions for every metric the crate emits. Idempotent.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "tessera_cache_hit_total",
            Unit::Count,
            "Cache reads that found data."
        );
        describe_counter!(
            "tessera_cache_miss_total",
            Unit::Count,
            "Cache reads that found no entry or an entry without data."
        );
        describe_counter!(
            "tessera_cache_evict_total",
            Unit::Count,
            "Entries evicted to keep the store within its capacity."
        );
        describe_counter!(
            "tessera_cache_gc_total",
            Unit::Count,
            "Unreferenced entries collected after their grace window."
        );
        describe_counter!(
            "tessera_query_fetch_total",
            Unit::Count,
            "Settled provider fetches, labelled by outcome."
        );
        describe_counter!(
            "tessera_query_retry_total",
            Unit::Count,
            "Provider calls retried after a transient failure."
        );
        describe_histogram!(
            "tessera_query_fetch_ms",
            Unit::Milliseconds,
            "Fetch latency including retries, in milliseconds."
        );
        describe_counter!(
            "tessera_mutation_total",
            Unit::Count,
            "Settled mutations, labelled by outcome."
        );
        describe_counter!(
            "tessera_mutation_rollback_total",
            Unit::Count,
            "Optimistic patches rolled back after a failed write."
        );
        describe_counter!(
            "tessera_cascade_invalidated_total",
            Unit::Count,
            "Cache entries invalidated by cascades."
        );
        describe_counter!(
            "tessera_bridge_notification_total",
            Unit::Count,
            "Backend change notifications received by subscription bridges."
        );
    });
}
