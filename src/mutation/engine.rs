//! Mutation engine: optimistic patch, provider write, then cascade or rollback.

use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use dashmap::DashMap;
use futures::FutureExt;
use metrics::counter;
use tessera_types::{Category, Entity, EntityId, EntityPatch, EntityRef};
use tracing::{Span, debug, info, instrument, warn};
use uuid::Uuid;

use super::projection::Projection;
use super::snapshot::OptimisticSnapshot;
use crate::cache::{CacheKey, QueryData};
use crate::cascade::WrittenEntity;
use crate::error::{DataError, ProviderResult};
use crate::provider::DataProvider;
use crate::query::{CascadeScope, QueryEngine, RetryPolicy};

const METRIC_MUTATION: &str = "tessera_mutation_total";
const METRIC_MUTATION_ROLLBACK: &str = "tessera_mutation_rollback_total";

/// The write a mutation performs.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteArgs {
    Create(Entity),
    Update { id: EntityId, patch: EntityPatch },
    Delete { id: EntityId },
}

impl WriteArgs {
    pub fn create(entity: impl Into<Entity>) -> Self {
        Self::Create(entity.into())
    }

    pub fn update(id: impl Into<EntityId>, patch: EntityPatch) -> Self {
        Self::Update {
            id: id.into(),
            patch,
        }
    }

    pub fn delete(id: impl Into<EntityId>) -> Self {
        Self::Delete { id: id.into() }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WriteArgs::Create(_) => "create",
            WriteArgs::Update { .. } => "update",
            WriteArgs::Delete { .. } => "delete",
        }
    }

    /// Id the write targets, when known before the provider answers.
    pub fn target_id(&self) -> Option<&EntityId> {
        match self {
            WriteArgs::Create(entity) if !entity.id().as_str().is_empty() => Some(entity.id()),
            WriteArgs::Create(_) => None,
            WriteArgs::Update { id, .. } | WriteArgs::Delete { id } => Some(id),
        }
    }

    fn check(&self, category: Category) -> Result<(), DataError> {
        match self {
            WriteArgs::Create(entity) if entity.category() != category => {
                Err(DataError::validation(format!(
                    "cannot create a {} through {category} mutations",
                    entity.category()
                )))
            }
            WriteArgs::Update { id, .. } | WriteArgs::Delete { id } if id.as_str().is_empty() => {
                Err(DataError::validation("mutation target id must not be empty"))
            }
            WriteArgs::Update { patch, .. } if patch.is_empty() => {
                Err(DataError::validation("update patch must not be empty"))
            }
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MutationOptions {
    /// Provider-call retries for transient failures.
    pub retry: Option<u32>,
    /// Keys to snapshot and invalidate beyond the item key and cached lists.
    pub affected_keys: Vec<CacheKey>,
    /// Applied to affected entries before the write is sent.
    pub optimistic: Option<Projection>,
}

impl MutationOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn retry(mut self, retries: u32) -> Self {
        self.retry = Some(retries);
        self
    }

    pub fn affect(mut self, key: CacheKey) -> Self {
        self.affected_keys.push(key);
        self
    }

    pub fn optimistic(mut self, projection: Projection) -> Self {
        self.optimistic = Some(projection);
        self
    }
}

/// Result of a confirmed write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationOutcome {
    pub mutation_id: Uuid,
    pub entity: EntityRef,
    /// Cache entries whose state the cascade changed.
    pub invalidated: usize,
}

#[derive(Clone)]
pub struct MutationEngine {
    queries: QueryEngine,
    pending: Arc<DashMap<Uuid, OptimisticSnapshot>>,
}

impl MutationEngine {
    pub fn new(queries: QueryEngine) -> Self {
        Self {
            queries,
            pending: Arc::new(DashMap::new()),
        }
    }

    /// Run one write.
    ///
    /// The optimistic projection is applied before the provider is called. On
    /// success the cascade marks every dependent entry stale; on failure each
    /// entry the projection changed is put back exactly as it was. Once
    /// started, the write runs to completion even if the caller stops waiting.
    #[instrument(
        skip(self, category, args, options),
        fields(category = category.as_str(), write = args.as_str(), mutation_id = tracing::field::Empty)
    )]
    pub async fn mutate(
        &self,
        category: Category,
        args: WriteArgs,
        options: MutationOptions,
    ) -> Result<MutationOutcome, DataError> {
        let provider = self.queries.registry().current()?;
        args.check(category)?;

        let mutation_id = Uuid::new_v4();
        Span::current().record("mutation_id", tracing::field::display(mutation_id));
        let related_ids = self.related_ids(category, &args);
        let snapshot = self.apply_optimistic(mutation_id, category, &args, &options);
        debug!(patched = snapshot.len(), "Optimistic patch applied");
        self.pending.insert(mutation_id, snapshot);

        let engine = self.clone();
        let task = tokio::spawn(async move {
            engine
                .complete(provider, mutation_id, category, args, options, related_ids)
                .await
        });
        task.await.unwrap_or_else(|err| {
            Err(DataError::network(format!("mutation task stopped: {err}")))
        })
    }

    /// Snapshots of mutations whose write has not settled yet.
    pub fn pending_mutations(&self) -> Vec<OptimisticSnapshot> {
        self.pending
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn queries(&self) -> &QueryEngine {
        &self.queries
    }

    async fn complete(
        &self,
        provider: Arc<dyn DataProvider>,
        mutation_id: Uuid,
        category: Category,
        args: WriteArgs,
        options: MutationOptions,
        related_ids: Vec<EntityId>,
    ) -> Result<MutationOutcome, DataError> {
        let config = self.queries.store().config();
        let retry = RetryPolicy::from_config(
            config,
            options.retry.unwrap_or(config.default_mutation_retry),
        );
        let subject = format!("{category}:{}", args.as_str());
        let call = retry.run("mutation", &subject, || write(provider.as_ref(), category, &args));
        let result = AssertUnwindSafe(call)
            .catch_unwind()
            .await
            .unwrap_or_else(|_| Err(DataError::network("provider write panicked")));

        let snapshot = self.pending.remove(&mutation_id).map(|(_, snapshot)| snapshot);
        match result {
            Ok(id) => {
                let patched: Vec<CacheKey> = snapshot
                    .iter()
                    .flat_map(|snapshot| snapshot.affected_keys().cloned())
                    .chain(options.affected_keys.iter().cloned())
                    .collect();
                let write = WrittenEntity::new(category, id.clone()).with_related(related_ids);
                let invalidation =
                    self.queries
                        .cascade(&write, patched, CascadeScope::All, "mutation");

                counter!(
                    METRIC_MUTATION,
                    "category" => category.as_str(),
                    "write" => args.as_str(),
                    "outcome" => "ok"
                )
                .increment(1);
                info!(
                    %mutation_id,
                    entity_id = %id,
                    invalidated = invalidation.affected(),
                    "Mutation confirmed"
                );
                Ok(MutationOutcome {
                    mutation_id,
                    entity: EntityRef::new(category, id),
                    invalidated: invalidation.affected(),
                })
            }
            Err(err) => {
                if let Some(snapshot) = snapshot {
                    let restored = snapshot.restore(self.queries.store());
                    counter!(METRIC_MUTATION_ROLLBACK, "category" => category.as_str())
                        .increment(1);
                    warn!(
                        %mutation_id,
                        restored,
                        error = %err,
                        "Mutation failed, optimistic patch rolled back"
                    );
                }
                counter!(
                    METRIC_MUTATION,
                    "category" => category.as_str(),
                    "write" => args.as_str(),
                    "outcome" => err.kind().as_str()
                )
                .increment(1);
                Err(err)
            }
        }
    }

    fn apply_optimistic(
        &self,
        mutation_id: Uuid,
        category: Category,
        args: &WriteArgs,
        options: &MutationOptions,
    ) -> OptimisticSnapshot {
        let mut snapshot = OptimisticSnapshot::new(mutation_id, category);
        let Some(projection) = options.optimistic.as_ref() else {
            return snapshot;
        };

        let store = self.queries.store();
        let mut candidates = store.list_keys(category);
        if let Some(id) = args.target_id() {
            candidates.push(CacheKey::item(category, id.clone()));
        }
        candidates.extend(options.affected_keys.iter().cloned());

        let mut seen = HashSet::new();
        for key in candidates {
            if !seen.insert(key.clone()) {
                continue;
            }
            if let Some(prior) = store.update_data(&key, |current| projection.project(&key, current)) {
                snapshot.record(key, prior);
            }
        }
        snapshot
    }

    /// Ids the cascade follows besides the written one, taken from the
    /// payload or from whatever the cache holds for the target.
    fn related_ids(&self, category: Category, args: &WriteArgs) -> Vec<EntityId> {
        let cached = args.target_id().and_then(|id| {
            self.queries
                .store()
                .peek(&CacheKey::item(category, id.clone()))
                .and_then(|view| view.data)
        });
        let mut related = match (args, cached) {
            (WriteArgs::Create(entity), _) => entity.related_ids(),
            (WriteArgs::Update { patch, .. }, Some(QueryData::One(current))) => {
                let mut ids = current.related_ids();
                if let Ok(patched) = patch.apply_to(&current) {
                    ids.extend(patched.related_ids());
                }
                ids
            }
            (_, Some(QueryData::One(current))) => current.related_ids(),
            _ => Vec::new(),
        };
        let mut seen = HashSet::new();
        related.retain(|id| seen.insert(id.clone()));
        related
    }
}

async fn write(
    provider: &dyn DataProvider,
    category: Category,
    args: &WriteArgs,
) -> ProviderResult<EntityId> {
    match args {
        WriteArgs::Create(entity) => provider.create(entity.clone()).await,
        WriteArgs::Update { id, patch } => provider
            .update(category, id, patch)
            .await
            .map(|()| id.clone()),
        WriteArgs::Delete { id } => provider.delete(category, id).await.map(|()| id.clone()),
    }
}
