use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use metrics_util::debugging::DebuggingRecorder;
use tessera::cache::{CacheConfig, QueryData};
use tessera::provider::{MemoryProvider, Operation};
use tessera::types::{Category, Entity, Filter, Record};
use tessera::{DataError, MutationOptions, Projection, QueryClient, QueryOptions, WriteArgs};

fn note(id: &str) -> Entity {
    Record::new(id, "note", format!("Note {id}")).into()
}

#[tokio::test(start_paused = true)]
async fn client_paths_emit_expected_metric_keys() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder
        .install()
        .expect("debug metrics recorder should install in this test process");

    let provider = Arc::new(
        MemoryProvider::new()
            .with_latency(Duration::from_millis(5))
            .with_push(),
    );
    provider.seed([note("r-1"), note("r-2")]);
    let config = CacheConfig {
        max_entries: 2,
        gc_grace_ms: 1_000,
        ..Default::default()
    };
    let client = QueryClient::new(&config);
    let _binding = client.bind(provider.clone());

    // Store hit/miss plus fetch latency
    let cached = QueryOptions::new().stale_time(Duration::from_secs(60));
    client
        .query(Category::Record, "r-1", &cached)
        .await
        .expect("query");
    client
        .query(Category::Record, "r-1", &cached)
        .await
        .expect("query");

    // Retry after a transient failure
    provider.fail_next(Operation::Get, DataError::network("connection reset"));
    client
        .query(Category::Record, "r-2", &cached.clone().retry(1))
        .await
        .expect("query");

    // Capacity eviction, then collection of what is left
    client
        .set_query_data(Category::Record, "r-3", QueryData::One(note("r-3")))
        .expect("set");
    client
        .set_query_data(Category::Record, "r-4", QueryData::One(note("r-4")))
        .expect("set");
    tokio::time::advance(Duration::from_secs(2)).await;
    assert!(client.gc() > 0);

    // Push notification through the bridge
    let mut live = client
        .watch(
            Category::Record,
            Filter::new(),
            QueryOptions::new().realtime(true).retry(0),
        )
        .expect("watch");
    live.settled().await;
    provider.insert_remote(note("r-5"));
    tokio::time::timeout(Duration::from_secs(5), async {
        while live.state().data.is_none_or(|data| data.ids().len() < 3) {
            assert!(live.changed().await);
        }
    })
    .await
    .expect("push should refresh the list");

    // Mutation confirmed with a cascade, then one rolled back
    client
        .mutate(
            Category::Record,
            WriteArgs::create(note("r-6")),
            MutationOptions::new(),
        )
        .await
        .expect("write");
    provider.fail_next(Operation::Create, DataError::validation("rejected"));
    let rejected = note("r-7");
    client
        .mutate(
            Category::Record,
            WriteArgs::create(rejected.clone()),
            MutationOptions::new().optimistic(Projection::insert(rejected)),
        )
        .await
        .expect_err("write rejected");

    let names: HashSet<String> = snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .map(|(composite_key, _, _, _)| composite_key.key().name().to_string())
        .collect();

    let expected = [
        "tessera_cache_hit_total",
        "tessera_cache_miss_total",
        "tessera_cache_evict_total",
        "tessera_cache_gc_total",
        "tessera_query_fetch_total",
        "tessera_query_fetch_ms",
        "tessera_query_retry_total",
        "tessera_bridge_notification_total",
        "tessera_cascade_invalidated_total",
        "tessera_mutation_total",
        "tessera_mutation_rollback_total",
    ];

    for metric in expected {
        assert!(names.contains(metric), "missing metric: {metric}");
    }
}
