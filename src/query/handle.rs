//! Query handles: the long-lived side of a query.

use std::fmt;

use tokio::task::JoinHandle;
use tracing::debug;

use super::engine::QueryEngine;
use super::options::{QueryOptions, QueryState};
use crate::cache::{CacheKey, Subscription};
use crate::error::DataError;

/// A subscribed query.
///
/// While the handle lives its entry is pinned in the store, takes part in
/// realtime and focus refetching as its options ask, and is refetched on
/// `refetch_interval`. Dropping the handle releases all of that; a fetch
/// already in flight still completes and populates the cache.
pub struct QueryHandle {
    engine: QueryEngine,
    subscription: Subscription,
    options: QueryOptions,
    interval: Option<JoinHandle<()>>,
}

impl QueryHandle {
    pub(crate) fn mount(
        engine: QueryEngine,
        key: CacheKey,
        options: QueryOptions,
    ) -> Result<Self, DataError> {
        if options.enabled {
            engine.registry().current()?;
        }
        let subscription = engine
            .store()
            .subscribe(&key, options.subscribe_options());

        let mut handle = Self {
            engine,
            subscription,
            options,
            interval: None,
        };
        if handle.options.enabled {
            handle.fetch_on_mount()?;
            handle.interval = handle.spawn_interval();
        }
        Ok(handle)
    }

    fn fetch_on_mount(&self) -> Result<(), DataError> {
        let key = self.key();
        let needs_fetch = match self.engine.store().peek(key) {
            Some(view) if view.data.is_some() => {
                view.is_invalidated || (!view.is_fresh && self.options.refetch_on_mount)
            }
            _ => true,
        };
        if needs_fetch {
            debug!(cache_key = %key, "Fetching on mount");
            self.engine
                .start_fetch(key, self.engine.settings(&self.options))?;
        }
        Ok(())
    }

    fn spawn_interval(&self) -> Option<JoinHandle<()>> {
        let period = self.options.active_interval()?;
        let engine = self.engine.clone();
        let key = self.key().clone();
        let settings = engine.settings(&self.options);
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await; // Skip the first immediate tick
            loop {
                ticker.tick().await;
                debug!(cache_key = %key, "Interval refetch");
                if engine.start_fetch(&key, settings).is_err() {
                    break;
                }
            }
        }))
    }

    pub fn key(&self) -> &CacheKey {
        self.subscription.key()
    }

    pub fn options(&self) -> &QueryOptions {
        &self.options
    }

    /// Current hook state.
    pub fn state(&self) -> QueryState {
        if !self.options.enabled {
            return QueryState::idle();
        }
        self.engine.state_of(self.key())
    }

    /// Fetch now and return the state once it settles.
    pub async fn refetch(&self) -> Result<QueryState, DataError> {
        match self.engine.refetch(self.key(), &self.options).await {
            Err(err @ DataError::Configuration { .. }) => Err(err),
            _ => Ok(self.engine.state_of(self.key())),
        }
    }

    /// Wait for the fetch in flight, if any, and return the resulting state.
    pub async fn settled(&self) -> QueryState {
        if let Some(fetch) = self.engine.store().in_flight(self.key()) {
            let _ = fetch.await;
        }
        self.state()
    }

    /// Wait until the entry changes. False once the entry is gone for good.
    pub async fn changed(&mut self) -> bool {
        self.subscription.changed().await
    }

    pub fn engine(&self) -> &QueryEngine {
        &self.engine
    }
}

impl fmt::Debug for QueryHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryHandle")
            .field("key", &self.key().to_string())
            .field("options", &self.options)
            .field("interval", &self.interval.is_some())
            .finish()
    }
}

impl Drop for QueryHandle {
    fn drop(&mut self) {
        if let Some(interval) = self.interval.take() {
            interval.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use tessera_types::{Category, Record};

    use super::*;
    use crate::cache::{CacheConfig, CacheStore};
    use crate::provider::{MemoryProvider, Operation, ProviderBinding, ProviderRegistry};

    fn engine_with(provider: Arc<MemoryProvider>) -> (QueryEngine, ProviderBinding) {
        let store = Arc::new(CacheStore::new(&CacheConfig::default()));
        let registry = Arc::new(ProviderRegistry::new());
        let binding = registry.bind(provider);
        (QueryEngine::new(store, registry), binding)
    }

    #[tokio::test(start_paused = true)]
    async fn mount_fetches_and_reports_loading() {
        let provider = Arc::new(MemoryProvider::new().with_latency(Duration::from_millis(50)));
        provider.seed([Record::new("r-1", "note", "A").into()]);
        let (engine, _binding) = engine_with(provider.clone());

        let handle = engine
            .watch(Category::Record, "r-1", QueryOptions::default())
            .expect("watch");
        assert!(handle.state().loading);

        let state = handle.settled().await;
        assert!(!state.loading);
        assert!(state.data.is_some());
        assert_eq!(provider.calls(Operation::Get), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn fresh_data_is_not_refetched_on_mount() {
        let provider = Arc::new(MemoryProvider::new());
        provider.seed([Record::new("r-1", "note", "A").into()]);
        let (engine, _binding) = engine_with(provider.clone());
        let options = QueryOptions::new().stale_time(Duration::from_secs(60));

        engine
            .query(Category::Record, "r-1", &options)
            .await
            .expect("query");
        let handle = engine
            .watch(Category::Record, "r-1", options)
            .expect("watch");

        assert!(handle.state().is_success());
        assert_eq!(provider.calls(Operation::Get), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn mount_refetch_can_be_turned_off() {
        let provider = Arc::new(MemoryProvider::new());
        provider.seed([Record::new("r-1", "note", "A").into()]);
        let (engine, _binding) = engine_with(provider.clone());

        engine
            .query(Category::Record, "r-1", &QueryOptions::default())
            .await
            .expect("query");
        let _handle = engine
            .watch(
                Category::Record,
                "r-1",
                QueryOptions::new().refetch_on_mount(false),
            )
            .expect("watch");

        assert_eq!(provider.calls(Operation::Get), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn invalidated_entries_are_fetched_on_mount_regardless() {
        let provider = Arc::new(MemoryProvider::new());
        provider.seed([Record::new("r-1", "note", "A").into()]);
        let (engine, _binding) = engine_with(provider.clone());
        let options = QueryOptions::new().stale_time(Duration::from_secs(60));

        engine
            .query(Category::Record, "r-1", &options)
            .await
            .expect("query");
        let key = engine.key_for(Category::Record, "r-1").expect("key");
        let _pinned = engine.store().subscribe(&key, Default::default());
        engine.store().invalidate(&key);

        let handle = engine
            .watch(Category::Record, "r-1", options.refetch_on_mount(false))
            .expect("watch");
        let state = handle.settled().await;

        assert!(state.is_success());
        assert_eq!(provider.calls(Operation::Get), 2);
        assert!(!engine.store().peek(&key).expect("entry").is_invalidated);
    }

    #[tokio::test(start_paused = true)]
    async fn interval_refetches_until_dropped() {
        let provider = Arc::new(MemoryProvider::new());
        provider.seed([Record::new("r-1", "note", "A").into()]);
        let (engine, _binding) = engine_with(provider.clone());
        let options = QueryOptions::new()
            .stale_time(Duration::from_secs(600))
            .refetch_interval(Duration::from_secs(10));

        let handle = engine
            .watch(Category::Record, "r-1", options)
            .expect("watch");
        handle.settled().await;

        tokio::time::sleep(Duration::from_secs(25)).await;
        assert_eq!(provider.calls(Operation::Get), 3);

        drop(handle);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(provider.calls(Operation::Get), 3);
    }

    #[tokio::test]
    async fn disabled_handle_stays_idle() {
        let provider = Arc::new(MemoryProvider::new());
        let (engine, _binding) = engine_with(provider.clone());

        let handle = engine
            .watch(Category::Record, "r-1", QueryOptions::new().enabled(false))
            .expect("watch");

        assert_eq!(handle.state(), QueryState::idle());
        assert_eq!(provider.total_calls(), 0);
    }
}
