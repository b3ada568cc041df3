//! Query engine: serve from cache or fetch, one provider call per key at a time.

use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use metrics::{counter, histogram};
use tessera_types::{Category, ChangeNotification};
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use super::handle::QueryHandle;
use super::options::{QueryOptions, QueryState};
use super::retry::RetryPolicy;
use crate::cache::{
    CacheKey, CacheStore, EntryFlags, FetchFuture, FetchResult, FetchTicket, Invalidation,
    KeyScope, QueryData, QueryTarget, derive_key,
};
use crate::cascade::{CascadePlan, WrittenEntity};
use crate::error::DataError;
use crate::provider::{ChangeSink, DataProvider, ProviderRegistry};

const METRIC_QUERY_FETCH: &str = "tessera_query_fetch_total";
const METRIC_QUERY_FETCH_MS: &str = "tessera_query_fetch_ms";
const METRIC_CASCADE_INVALIDATED: &str = "tessera_cascade_invalidated_total";

/// How a fetch stores its result and how hard it retries.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FetchSettings {
    pub(crate) retry: RetryPolicy,
    pub(crate) stale_time: Duration,
}

/// Which cached entries a cascade may touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CascadeScope {
    /// Every cached entry; local writes.
    All,
    /// Only entries with realtime interest; backend pushes.
    Realtime,
}

#[derive(Clone)]
pub struct QueryEngine {
    store: Arc<CacheStore>,
    registry: Arc<ProviderRegistry>,
}

impl QueryEngine {
    pub fn new(store: Arc<CacheStore>, registry: Arc<ProviderRegistry>) -> Self {
        Self { store, registry }
    }

    pub fn store(&self) -> &Arc<CacheStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    pub fn key_for(
        &self,
        category: Category,
        target: impl Into<QueryTarget>,
    ) -> Result<CacheKey, DataError> {
        Ok(derive_key(category, target.into())?)
    }

    /// Read through the cache.
    ///
    /// Fresh entries are served as they are. An entry that went stale with age
    /// is served while a background refetch runs. Anything else waits for the
    /// fetch; when that fails the last good data is kept next to the error.
    pub async fn query(
        &self,
        category: Category,
        target: impl Into<QueryTarget>,
        options: &QueryOptions,
    ) -> Result<QueryState, DataError> {
        let key = self.key_for(category, target)?;
        self.query_key(&key, options).await
    }

    #[instrument(skip(self, key, options), fields(cache_key = %key))]
    pub async fn query_key(
        &self,
        key: &CacheKey,
        options: &QueryOptions,
    ) -> Result<QueryState, DataError> {
        if !options.enabled {
            debug!("Query disabled, skipping fetch");
            return Ok(QueryState::idle());
        }
        self.registry.current()?;

        let settings = self.settings(options);
        match self.store.get(key) {
            Some(view) if view.is_fresh => return Ok(view.into()),
            Some(view) if view.data.is_some() && !view.is_invalidated => {
                debug!("Serving stale entry while revalidating");
                self.start_fetch(key, settings)?;
                return Ok(self.state_of(key));
            }
            _ => {}
        }

        let result = self.start_fetch(key, settings)?.await;
        let view = self.store.peek(key);
        let refetching = view.as_ref().is_some_and(|view| view.is_fetching);
        Ok(match result {
            Ok(data) => QueryState {
                data: Some(data),
                loading: false,
                error: None,
                refetching,
            },
            Err(error) => QueryState {
                data: view.and_then(|view| view.data),
                loading: false,
                error: Some(error),
                refetching,
            },
        })
    }

    /// Resolve to data: cached if fresh, otherwise the outcome of a fetch.
    pub async fn fetch(
        &self,
        category: Category,
        target: impl Into<QueryTarget>,
        options: &QueryOptions,
    ) -> Result<QueryData, DataError> {
        let key = self.key_for(category, target)?;
        if let Some(data) = self
            .store
            .get(&key)
            .filter(|view| view.is_fresh)
            .and_then(|view| view.data)
        {
            return Ok(data);
        }
        self.start_fetch(&key, self.settings(options))?.await
    }

    /// Warm the cache for a query nobody is watching yet.
    pub async fn prefetch(
        &self,
        category: Category,
        target: impl Into<QueryTarget>,
        options: &QueryOptions,
    ) -> Result<(), DataError> {
        self.fetch(category, target, options).await.map(|_| ())
    }

    /// Fetch `key` now, fresh or not. Joins a fetch already in flight.
    #[instrument(skip(self, key, options), fields(cache_key = %key))]
    pub async fn refetch(&self, key: &CacheKey, options: &QueryOptions) -> FetchResult {
        self.start_fetch(key, self.settings(options))?.await
    }

    /// Write data for a query directly, as if it had just been fetched.
    pub fn set_query_data(
        &self,
        category: Category,
        target: impl Into<QueryTarget>,
        data: QueryData,
    ) -> Result<CacheKey, DataError> {
        let key = self.key_for(category, target)?;
        self.store
            .set(&key, data, self.store.config().default_stale_time());
        Ok(key)
    }

    pub fn get_query_data(
        &self,
        category: Category,
        target: impl Into<QueryTarget>,
    ) -> Result<Option<QueryData>, DataError> {
        let key = self.key_for(category, target)?;
        Ok(self.store.peek(&key).and_then(|view| view.data))
    }

    /// Hook entry point: subscribe to a query and keep it up to date.
    pub fn watch(
        &self,
        category: Category,
        target: impl Into<QueryTarget>,
        options: QueryOptions,
    ) -> Result<QueryHandle, DataError> {
        let key = self.key_for(category, target)?;
        QueryHandle::mount(self.clone(), key, options)
    }

    /// Invalidate every cached query of `category` and refetch the watched ones.
    pub fn invalidate(&self, category: Category) -> Invalidation {
        self.invalidate_where(|key, _| key.category() == category)
    }

    pub fn invalidate_keys<I>(&self, keys: I) -> Invalidation
    where
        I: IntoIterator<Item = CacheKey>,
    {
        let keys: HashSet<CacheKey> = keys.into_iter().collect();
        self.invalidate_where(|key, _| keys.contains(key))
    }

    pub fn invalidate_where<F>(&self, predicate: F) -> Invalidation
    where
        F: FnMut(&CacheKey, EntryFlags) -> bool,
    {
        let outcome = self.store.invalidate_where(predicate);
        self.revalidate(outcome.refetch.iter().cloned());
        outcome
    }

    /// Start background fetches for `keys`. Returns how many were started.
    pub fn revalidate<I>(&self, keys: I) -> usize
    where
        I: IntoIterator<Item = CacheKey>,
    {
        let config = self.store.config();
        let mut started = 0;
        for key in keys {
            let retries = self.store.retry_of(&key).unwrap_or(config.default_retry);
            let retry = RetryPolicy::from_config(config, retries);
            let stale_time = self
                .store
                .stale_time_of(&key)
                .unwrap_or_else(|| config.default_stale_time());
            match self.start_fetch(&key, FetchSettings { retry, stale_time }) {
                Ok(_) => started += 1,
                Err(err) => {
                    warn!(cache_key = %key, error = %err, "Revalidation skipped");
                    break;
                }
            }
        }
        started
    }

    /// Refetch stale watched entries that opted into focus refetching.
    pub fn focus_gained(&self) -> usize {
        let keys = self.store.keys_where(|_, flags| {
            flags.refetch_on_focus && flags.subscribers > 0 && !flags.is_fresh
        });
        let started = self.revalidate(keys);
        debug!(started, "Focus regained");
        started
    }

    /// Invalidate everything a confirmed write makes stale.
    pub(crate) fn cascade<I>(
        &self,
        write: &WrittenEntity,
        extra: I,
        scope: CascadeScope,
        source: &'static str,
    ) -> Invalidation
    where
        I: IntoIterator<Item = CacheKey>,
    {
        let candidates = self.store.keys_where(|_, flags| match scope {
            CascadeScope::All => true,
            CascadeScope::Realtime => flags.realtime,
        });
        let mut plan = CascadePlan::for_write(write, &candidates);
        plan.extend(extra);

        let outcome = self.store.invalidate_written(|key, flags| {
            plan.contains(key) && (scope == CascadeScope::All || flags.realtime)
        });
        self.revalidate(outcome.refetch.iter().cloned());
        counter!(
            METRIC_CASCADE_INVALIDATED,
            "category" => write.category.as_str(),
            "source" => source
        )
        .increment(outcome.affected() as u64);
        info!(
            category = write.category.as_str(),
            entity_id = %write.id,
            source,
            planned = plan.len(),
            refetch = outcome.refetch.len(),
            removed = outcome.removed.len(),
            already_stale = outcome.already_stale,
            "Invalidation cascade applied"
        );
        outcome
    }

    pub(crate) fn settings(&self, options: &QueryOptions) -> FetchSettings {
        let config = self.store.config();
        FetchSettings {
            retry: RetryPolicy::from_config(config, options.retry.unwrap_or(config.default_retry)),
            stale_time: options
                .stale_time
                .unwrap_or_else(|| config.default_stale_time()),
        }
    }

    pub(crate) fn state_of(&self, key: &CacheKey) -> QueryState {
        self.store.peek(key).map(QueryState::from).unwrap_or_default()
    }

    /// Join the fetch in flight for `key` or start a new one.
    pub(crate) fn start_fetch(
        &self,
        key: &CacheKey,
        settings: FetchSettings,
    ) -> Result<FetchFuture, DataError> {
        let provider = self.registry.current()?;
        let (fetch, started) = self.store.begin_fetch(key, |ticket| {
            spawn_fetch(
                Arc::clone(&self.store),
                provider,
                key.clone(),
                ticket,
                settings,
            )
        });
        if !started {
            debug!(cache_key = %key, "Joined in-flight fetch");
        }
        Ok(fetch)
    }
}

/// Run one fetch on its own task so that it completes and populates the cache
/// even when every caller stops waiting for it.
fn spawn_fetch(
    store: Arc<CacheStore>,
    provider: Arc<dyn DataProvider>,
    key: CacheKey,
    ticket: FetchTicket,
    settings: FetchSettings,
) -> FetchFuture {
    let handle = tokio::spawn(async move {
        let started_at = Instant::now();
        let subject = key.to_string();
        debug!(cache_key = %subject, provider = provider.name(), "Fetch started");

        let call = settings
            .retry
            .run("query", &subject, || call_provider(provider.as_ref(), &key));
        let result = AssertUnwindSafe(call)
            .catch_unwind()
            .await
            .unwrap_or_else(|_| Err(DataError::network("provider call panicked")));

        store.settle(&key, ticket, &result, settings.stale_time);

        let category = key.category().as_str();
        let elapsed_ms = started_at.elapsed().as_secs_f64() * 1000.0;
        histogram!(METRIC_QUERY_FETCH_MS, "category" => category).record(elapsed_ms);
        match &result {
            Ok(_) => {
                counter!(METRIC_QUERY_FETCH, "category" => category, "outcome" => "ok").increment(1);
                debug!(cache_key = %subject, elapsed_ms, "Fetch settled");
            }
            Err(err) => {
                counter!(
                    METRIC_QUERY_FETCH,
                    "category" => category,
                    "outcome" => err.kind().as_str()
                )
                .increment(1);
                warn!(cache_key = %subject, error = %err, elapsed_ms, "Fetch failed");
            }
        }
        result
    });

    async move {
        handle.await.unwrap_or_else(|err| {
            Err(DataError::network(format!("fetch task stopped: {err}")))
        })
    }
    .boxed()
    .shared()
}

async fn call_provider(provider: &dyn DataProvider, key: &CacheKey) -> FetchResult {
    match key.scope() {
        KeyScope::Item(id) => provider.get(key.category(), id).await.map(QueryData::One),
        KeyScope::List(filter) => provider
            .list(key.category(), filter.filter())
            .await
            .map(QueryData::Many),
    }
}

impl ChangeSink for QueryEngine {
    fn apply(&self, notification: &ChangeNotification) {
        let write = WrittenEntity::from(notification);
        self.cascade(
            &write,
            std::iter::empty::<CacheKey>(),
            CascadeScope::Realtime,
            "push",
        );
    }

    fn resync(&self) {
        let outcome = self.invalidate_where(|_, flags| flags.realtime);
        info!(refetch = outcome.refetch.len(), "Realtime entries resynchronized");
    }
}
