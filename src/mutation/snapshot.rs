//! Optimistic snapshots: the prior state of every entry a mutation patched.

use tessera_types::Category;
use tokio::time::Instant;
use uuid::Uuid;

use crate::cache::{CacheKey, CacheStore, QueryData, SlotState};

#[derive(Debug, Clone, PartialEq)]
pub struct OptimisticSnapshot {
    mutation_id: Uuid,
    category: Category,
    prior: Vec<(CacheKey, Option<SlotState>)>,
    created_at: Instant,
}

impl OptimisticSnapshot {
    pub fn new(mutation_id: Uuid, category: Category) -> Self {
        Self {
            mutation_id,
            category,
            prior: Vec::new(),
            created_at: Instant::now(),
        }
    }

    pub fn mutation_id(&self) -> Uuid {
        self.mutation_id
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Remember `state` as the value `key` had before this mutation touched
    /// it. Only the first capture per key counts.
    pub fn record(&mut self, key: CacheKey, state: Option<SlotState>) {
        if !self.contains(&key) {
            self.prior.push((key, state));
        }
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.prior.iter().any(|(captured, _)| captured == key)
    }

    pub fn affected_keys(&self) -> impl Iterator<Item = &CacheKey> {
        self.prior.iter().map(|(key, _)| key)
    }

    /// Data `key` held before the mutation; `None` if it held none.
    pub fn prior_value(&self, key: &CacheKey) -> Option<&QueryData> {
        self.prior
            .iter()
            .find(|(captured, _)| captured == key)
            .and_then(|(_, state)| state.as_ref())
            .and_then(SlotState::data)
    }

    pub fn len(&self) -> usize {
        self.prior.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prior.is_empty()
    }

    /// Put every captured entry back. Returns how many were restored.
    pub fn restore(self, store: &CacheStore) -> usize {
        let restored = self.prior.len();
        for (key, state) in self.prior.into_iter().rev() {
            store.restore_slot(&key, state);
        }
        restored
    }
}
