//! The client owns one cache store and wires the engines, the provider
//! registry and the subscription bridge around it.
//!
//! Each client is independent; tests and embedders create as many as they need.

use std::sync::Arc;

use tessera_types::Category;
use tracing::info;

use crate::cache::{
    CacheConfig, CacheKey, CacheStats, CacheStore, GcTask, Invalidation, QueryData, QueryTarget,
};
use crate::error::DataError;
use crate::mutation::{
    MutationEngine, MutationHandle, MutationOptions, MutationOutcome, OptimisticSnapshot,
    WriteArgs,
};
use crate::provider::{DataProvider, ProviderBinding, ProviderRegistry, spawn_bridge};
use crate::query::{QueryEngine, QueryHandle, QueryOptions, QueryState};

pub struct QueryClient {
    store: Arc<CacheStore>,
    registry: Arc<ProviderRegistry>,
    queries: QueryEngine,
    mutations: MutationEngine,
    gc: Option<GcTask>,
}

impl QueryClient {
    pub fn new(config: &CacheConfig) -> Self {
        let store = Arc::new(CacheStore::new(config));
        let registry = Arc::new(ProviderRegistry::new());
        let queries = QueryEngine::new(Arc::clone(&store), Arc::clone(&registry));
        let mutations = MutationEngine::new(queries.clone());
        Self {
            store,
            registry,
            queries,
            mutations,
            gc: None,
        }
    }

    /// Same as [`QueryClient::new`], plus a periodic GC task. Needs a runtime.
    pub fn with_gc(config: &CacheConfig) -> Self {
        let mut client = Self::new(config);
        client.gc = Some(client.store.spawn_gc(config.gc_interval()));
        client
    }

    /// Bind `provider` for the lifetime of the returned guard. Providers with
    /// a push feed get a subscription bridge bound to the same guard.
    pub fn bind(&self, provider: Arc<dyn DataProvider>) -> ProviderBinding {
        let changes = provider.changes();
        let mut binding = self.registry.bind(provider);
        if let Some(receiver) = changes {
            binding.attach_bridge(spawn_bridge(receiver, Arc::new(self.queries.clone())));
            info!(provider = binding.provider_name(), "Subscription bridge attached");
        }
        binding
    }

    pub fn store(&self) -> &Arc<CacheStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    pub fn queries(&self) -> &QueryEngine {
        &self.queries
    }

    pub fn mutations(&self) -> &MutationEngine {
        &self.mutations
    }

    pub async fn query(
        &self,
        category: Category,
        target: impl Into<QueryTarget>,
        options: &QueryOptions,
    ) -> Result<QueryState, DataError> {
        self.queries.query(category, target, options).await
    }

    pub fn watch(
        &self,
        category: Category,
        target: impl Into<QueryTarget>,
        options: QueryOptions,
    ) -> Result<QueryHandle, DataError> {
        self.queries.watch(category, target, options)
    }

    pub async fn mutate(
        &self,
        category: Category,
        args: WriteArgs,
        options: MutationOptions,
    ) -> Result<MutationOutcome, DataError> {
        self.mutations.mutate(category, args, options).await
    }

    pub fn mutation(&self, category: Category, options: MutationOptions) -> MutationHandle {
        MutationHandle::new(self.mutations.clone(), category, options)
    }

    pub async fn prefetch(
        &self,
        category: Category,
        target: impl Into<QueryTarget>,
        options: &QueryOptions,
    ) -> Result<(), DataError> {
        self.queries.prefetch(category, target, options).await
    }

    pub fn set_query_data(
        &self,
        category: Category,
        target: impl Into<QueryTarget>,
        data: QueryData,
    ) -> Result<CacheKey, DataError> {
        self.queries.set_query_data(category, target, data)
    }

    pub fn get_query_data(
        &self,
        category: Category,
        target: impl Into<QueryTarget>,
    ) -> Result<Option<QueryData>, DataError> {
        self.queries.get_query_data(category, target)
    }

    pub fn invalidate(&self, category: Category) -> Invalidation {
        self.queries.invalidate(category)
    }

    pub fn focus_gained(&self) -> usize {
        self.queries.focus_gained()
    }

    pub fn pending_mutations(&self) -> Vec<OptimisticSnapshot> {
        self.mutations.pending_mutations()
    }

    pub fn stats(&self) -> CacheStats {
        self.store.stats()
    }

    pub fn gc(&self) -> usize {
        self.store.gc()
    }

    pub fn clear(&self) -> usize {
        self.store.clear()
    }
}
