//! Optimistic writes, exact rollback and the invalidation cascade.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tessera::cache::CacheConfig;
use tessera::provider::{MemoryProvider, Operation};
use tessera::types::{
    Category, Entity, EntityId, EntityPatch, Filter, Person, Record, Relationship,
};
use tessera::{
    DataError, DataProvider, ErrorKind, MutationOptions, Projection, ProviderResult, QueryClient,
    QueryData, QueryHandle, QueryOptions, QueryState, WriteArgs,
};

fn ids(state: &QueryState) -> Vec<String> {
    state
        .data
        .as_ref()
        .map(|data| data.ids().iter().map(|id| id.as_str().to_string()).collect())
        .unwrap_or_default()
}

fn draft(id: &str, title: &str) -> Record {
    Record::new(id, "note", title).with_status("draft")
}

fn provider() -> Arc<MemoryProvider> {
    let provider = Arc::new(MemoryProvider::new().with_latency(Duration::from_millis(40)));
    provider.seed([
        draft("a", "Alpha").with_owner("p-1").into(),
        draft("b", "Beta").into(),
        Person::new("p-1", "Ada").into(),
    ]);
    provider
}

fn watched() -> QueryOptions {
    QueryOptions::new()
        .stale_time(Duration::from_secs(60))
        .retry(0)
}

async fn wait_until<F>(handle: &mut QueryHandle, mut done: F) -> QueryState
where
    F: FnMut(&QueryState) -> bool,
{
    let waiting = async {
        loop {
            let state = handle.state();
            if done(&state) {
                return state;
            }
            assert!(handle.changed().await, "entry went away");
        }
    };
    tokio::time::timeout(Duration::from_secs(5), waiting)
        .await
        .expect("state never reached")
}

#[tokio::test(start_paused = true)]
async fn optimistic_create_shows_before_the_write_and_is_then_confirmed() {
    let provider = provider();
    let client = QueryClient::new(&CacheConfig::default());
    let _binding = client.bind(provider.clone());

    let mut list = client
        .watch(Category::Record, Filter::new().with_status("draft"), watched())
        .expect("watch");
    assert_eq!(ids(&list.settled().await), ["a", "b"]);

    let created: tessera::types::Entity = draft("c", "Gamma").into();
    let mutation = client.mutation(Category::Record, MutationOptions::new());
    let write = tokio::spawn({
        let mutation = mutation.clone();
        let created = created.clone();
        async move {
            mutation
                .mutate_with(
                    WriteArgs::create(created.clone()),
                    MutationOptions::new().optimistic(Projection::insert(created)),
                )
                .await
        }
    });

    let optimistic = wait_until(&mut list, |state| ids(state).len() == 3).await;
    assert_eq!(ids(&optimistic), ["a", "b", "c"]);
    assert!(!provider.contains(Category::Record, &EntityId::from("c")));
    assert_eq!(client.pending_mutations().len(), 1);

    let outcome = write.await.expect("join").expect("write");
    assert_eq!(outcome.entity.id().as_str(), "c");
    assert!(client.pending_mutations().is_empty());

    let confirmed = list.settled().await;
    assert_eq!(ids(&confirmed), ["a", "b", "c"]);
    assert_eq!(confirmed.error, None);
    assert_eq!(provider.calls(Operation::List), 2);
    assert!(mutation.state().data.is_some());
}

#[tokio::test(start_paused = true)]
async fn failed_update_restores_every_patched_entry() {
    let provider = provider();
    let client = QueryClient::new(&CacheConfig::default());
    let _binding = client.bind(provider.clone());

    let list = client
        .watch(Category::Record, Filter::new().with_status("draft"), watched())
        .expect("watch");
    let item = client
        .watch(Category::Record, "a", watched())
        .expect("watch");
    let list_before = list.settled().await;
    let item_before = item.settled().await;

    provider.fail_next(Operation::Update, DataError::network("gateway closed"));
    let patch = EntityPatch::new().set("status", json!("archived"));
    let err = client
        .mutate(
            Category::Record,
            WriteArgs::update("a", patch.clone()),
            MutationOptions::new().optimistic(Projection::patch(
                Category::Record,
                EntityId::from("a"),
                patch,
            )),
        )
        .await
        .expect_err("write rejected");

    assert_eq!(err.kind(), ErrorKind::Network);
    assert_eq!(list.state(), list_before);
    assert_eq!(item.state(), item_before);
    assert_eq!(provider.calls(Operation::Update), 1);
    assert_eq!(provider.calls(Operation::List), 1);
    assert!(client.pending_mutations().is_empty());
}

#[tokio::test(start_paused = true)]
async fn related_queries_refetch_after_a_relationship_is_created() {
    let provider = provider();
    let client = QueryClient::new(&CacheConfig::default());
    let _binding = client.bind(provider.clone());

    let links = client
        .watch(
            Category::Relationship,
            Filter::new().with_related_to("a"),
            watched(),
        )
        .expect("watch");
    let endpoint = client
        .watch(Category::Record, "a", watched())
        .expect("watch");
    let unrelated = client
        .watch(Category::Person, Filter::new(), watched())
        .expect("watch");
    assert!(ids(&links.settled().await).is_empty());
    endpoint.settled().await;
    unrelated.settled().await;

    let outcome = client
        .mutate(
            Category::Relationship,
            WriteArgs::create(Relationship::new("l-1", "depends_on", "a", "b")),
            MutationOptions::new(),
        )
        .await
        .expect("write");
    assert_eq!(outcome.invalidated, 2);

    assert_eq!(ids(&links.settled().await), ["l-1"]);
    assert!(endpoint.settled().await.is_success());
    assert_eq!(provider.calls(Operation::Get), 2);
    assert_eq!(ids(&unrelated.state()), ["p-1"]);
    assert_eq!(provider.calls(Operation::List), 3);
}

#[tokio::test(start_paused = true)]
async fn person_update_reaches_owned_record_lists() {
    let provider = provider();
    let client = QueryClient::new(&CacheConfig::default());
    let _binding = client.bind(provider.clone());

    let owned = client
        .watch(Category::Record, Filter::new().with_owner("p-1"), watched())
        .expect("watch");
    assert_eq!(ids(&owned.settled().await), ["a"]);

    client
        .mutate(
            Category::Person,
            WriteArgs::update("p-1", EntityPatch::new().set("display_name", json!("Ada L."))),
            MutationOptions::new(),
        )
        .await
        .expect("write");

    assert_eq!(ids(&owned.settled().await), ["a"]);
    assert_eq!(provider.calls(Operation::List), 2);
}

#[tokio::test(start_paused = true)]
async fn write_completes_after_the_caller_stops_waiting() {
    let provider = provider();
    let client = QueryClient::new(&CacheConfig::default());
    let _binding = client.bind(provider.clone());
    let mutation = client.mutation(Category::Record, MutationOptions::new());

    let abandoned = tokio::time::timeout(
        Duration::from_millis(5),
        mutation.mutate(WriteArgs::create(draft("d", "Delta"))),
    )
    .await;
    assert!(abandoned.is_err());

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(provider.contains(Category::Record, &EntityId::from("d")));
    assert!(client.pending_mutations().is_empty());
    assert!(mutation.state().data.is_some());
}

#[tokio::test(start_paused = true)]
async fn rejected_create_restores_the_list_and_reports_on_the_handle() {
    let provider = provider();
    let client = QueryClient::new(&CacheConfig::default());
    let _binding = client.bind(provider.clone());

    let list = client
        .watch(Category::Record, Filter::new().with_status("draft"), watched())
        .expect("watch");
    let before = list.settled().await;
    assert_eq!(ids(&before), ["a", "b"]);

    provider.fail_next(Operation::Create, DataError::validation("title already used"));
    let created: Entity = draft("c", "Gamma").into();
    let mutation = client.mutation(Category::Record, MutationOptions::new());
    let err = mutation
        .mutate_with(
            WriteArgs::create(created.clone()),
            MutationOptions::new().optimistic(Projection::insert(created)),
        )
        .await
        .expect_err("write rejected");

    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(list.state(), before);
    assert_eq!(ids(&list.state()), ["a", "b"]);
    let state = mutation.state();
    assert!(!state.loading);
    assert_eq!(state.error, Some(DataError::validation("title already used")));
    assert_eq!(state.data, None);
    assert_eq!(provider.calls(Operation::List), 1);
}

#[tokio::test(start_paused = true)]
async fn invalidating_a_stale_watched_query_twice_refetches_once() {
    let provider = provider();
    let client = QueryClient::new(&CacheConfig::default());
    let _binding = client.bind(provider.clone());

    let list = client
        .watch(Category::Record, Filter::new().with_status("draft"), watched())
        .expect("watch");
    list.settled().await;

    let first = client.invalidate(Category::Record);
    let second = client.invalidate(Category::Record);
    assert_eq!(first.refetch.len(), 1);
    assert!(second.is_empty());
    assert_eq!(second.already_stale, 1);

    assert_eq!(ids(&list.settled().await), ["a", "b"]);
    assert_eq!(provider.calls(Operation::List), 2);
}

/// Reads the store as soon as it is called but answers late; writes land quickly.
struct SlowReads {
    inner: Arc<MemoryProvider>,
}

const READ_DELAY: Duration = Duration::from_millis(100);
const WRITE_DELAY: Duration = Duration::from_millis(10);

#[async_trait]
impl DataProvider for SlowReads {
    fn name(&self) -> &str {
        "slow-reads"
    }

    async fn get(&self, category: Category, id: &EntityId) -> ProviderResult<Entity> {
        let read = self.inner.get(category, id).await;
        tokio::time::sleep(READ_DELAY).await;
        read
    }

    async fn list(&self, category: Category, filter: &Filter) -> ProviderResult<Vec<Entity>> {
        let read = self.inner.list(category, filter).await;
        tokio::time::sleep(READ_DELAY).await;
        read
    }

    async fn create(&self, input: Entity) -> ProviderResult<EntityId> {
        tokio::time::sleep(WRITE_DELAY).await;
        self.inner.create(input).await
    }

    async fn update(
        &self,
        category: Category,
        id: &EntityId,
        patch: &EntityPatch,
    ) -> ProviderResult<()> {
        tokio::time::sleep(WRITE_DELAY).await;
        self.inner.update(category, id, patch).await
    }

    async fn delete(&self, category: Category, id: &EntityId) -> ProviderResult<()> {
        tokio::time::sleep(WRITE_DELAY).await;
        self.inner.delete(category, id).await
    }
}

fn title(state: &QueryState) -> Option<String> {
    match state.data.as_ref()? {
        QueryData::One(Entity::Record(record)) => Some(record.title.clone()),
        _ => None,
    }
}

#[tokio::test(start_paused = true)]
async fn second_write_supersedes_the_refetch_of_the_first() {
    let store = Arc::new(MemoryProvider::new());
    store.seed([draft("r-1", "First").into()]);
    let client = QueryClient::new(&CacheConfig::default());
    let _binding = client.bind(Arc::new(SlowReads {
        inner: store.clone(),
    }));

    let item = client
        .watch(Category::Record, "r-1", watched())
        .expect("watch");
    assert_eq!(title(&item.settled().await).as_deref(), Some("First"));

    let retitle = |value: &str| EntityPatch::new().set("title", json!(value));
    client
        .mutate(
            Category::Record,
            WriteArgs::update("r-1", retitle("X")),
            MutationOptions::new(),
        )
        .await
        .expect("first write");
    assert!(client.stats().in_flight > 0);
    client
        .mutate(
            Category::Record,
            WriteArgs::update("r-1", retitle("Y")),
            MutationOptions::new(),
        )
        .await
        .expect("second write");

    tokio::time::sleep(Duration::from_millis(300)).await;
    let state = client
        .query(Category::Record, "r-1", &watched())
        .await
        .expect("query");

    assert_eq!(title(&state).as_deref(), Some("Y"));
    assert_eq!(title(&item.state()).as_deref(), Some("Y"));
    assert_eq!(store.calls(Operation::Get), 3);
}
