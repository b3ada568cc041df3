//! In-memory provider.
//!
//! Backs every category with a vector in insertion order. Used by the demo
//! command and by tests, which script failures, latency and push
//! notifications through it.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tessera_types::{
    Category, ChangeNotification, ChangeType, Entity, EntityId, EntityPatch, EntityRef, Filter,
};
use tokio::sync::broadcast;
use tracing::debug;

use super::DataProvider;
use crate::cache::{mutex_lock, rw_read, rw_write};
use crate::error::{DataError, ProviderResult};

const SOURCE: &str = "provider::memory";
const DEFAULT_PUSH_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Get,
    List,
    Create,
    Update,
    Delete,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Get => "get",
            Operation::List => "list",
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }
}

#[derive(Default)]
struct Failures {
    next: VecDeque<DataError>,
    always: Option<DataError>,
}

pub struct MemoryProvider {
    name: String,
    items: RwLock<HashMap<Category, Vec<Entity>>>,
    failures: Mutex<HashMap<Operation, Failures>>,
    calls: DashMap<Operation, usize>,
    latency: Duration,
    changes: Option<broadcast::Sender<ChangeNotification>>,
}

impl Default for MemoryProvider {
    fn default() -> Self {
        Self::named("memory")
    }
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            items: RwLock::new(HashMap::new()),
            failures: Mutex::new(HashMap::new()),
            calls: DashMap::new(),
            latency: Duration::ZERO,
            changes: None,
        }
    }

    /// Delay every call by `latency` before it touches storage.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Enable the push feed.
    pub fn with_push(self) -> Self {
        self.with_push_capacity(DEFAULT_PUSH_CAPACITY)
    }

    pub fn with_push_capacity(mut self, capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        self.changes = Some(sender);
        self
    }

    /// Insert items directly, without notifications or call accounting.
    pub fn seed<I>(&self, entities: I)
    where
        I: IntoIterator<Item = Entity>,
    {
        let mut items = rw_write(&self.items, SOURCE, "seed");
        for entity in entities {
            let bucket = items.entry(entity.category()).or_default();
            match bucket.iter_mut().find(|existing| existing.id() == entity.id()) {
                Some(existing) => *existing = entity,
                None => bucket.push(entity),
            }
        }
    }

    /// Apply a change as if another client had written it, and push it.
    pub fn insert_remote(&self, entity: Entity) -> bool {
        let change_type = if self.contains(entity.category(), entity.id()) {
            ChangeType::Updated
        } else {
            ChangeType::Created
        };
        let notification = ChangeNotification::new(entity.category(), entity.id().clone(), change_type)
            .with_related(entity.related_ids());
        self.seed([entity]);
        self.push(notification)
    }

    /// Send a notification on the push feed. False when nobody listens.
    pub fn push(&self, notification: ChangeNotification) -> bool {
        self.changes
            .as_ref()
            .is_some_and(|sender| sender.send(notification).is_ok())
    }

    pub fn contains(&self, category: Category, id: &EntityId) -> bool {
        rw_read(&self.items, SOURCE, "contains")
            .get(&category)
            .is_some_and(|bucket| bucket.iter().any(|entity| entity.id() == id))
    }

    pub fn snapshot(&self, category: Category) -> Vec<Entity> {
        rw_read(&self.items, SOURCE, "snapshot")
            .get(&category)
            .cloned()
            .unwrap_or_default()
    }

    /// Fail the next call of `operation` with `error`. Queued failures stack.
    pub fn fail_next(&self, operation: Operation, error: DataError) {
        mutex_lock(&self.failures, SOURCE, "fail_next")
            .entry(operation)
            .or_default()
            .next
            .push_back(error);
    }

    /// Fail every call of `operation` until cleared.
    pub fn fail_always(&self, operation: Operation, error: DataError) {
        mutex_lock(&self.failures, SOURCE, "fail_always")
            .entry(operation)
            .or_default()
            .always = Some(error);
    }

    pub fn clear_failures(&self) {
        mutex_lock(&self.failures, SOURCE, "clear_failures").clear();
    }

    pub fn calls(&self, operation: Operation) -> usize {
        self.calls.get(&operation).map_or(0, |count| *count)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.iter().map(|count| *count.value()).sum()
    }

    pub fn reset_calls(&self) {
        self.calls.clear();
    }

    async fn enter(&self, operation: Operation) -> ProviderResult<()> {
        *self.calls.entry(operation).or_insert(0) += 1;
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let mut failures = mutex_lock(&self.failures, SOURCE, "enter");
        let Some(scripted) = failures.get_mut(&operation) else {
            return Ok(());
        };
        match scripted.next.pop_front().or_else(|| scripted.always.clone()) {
            Some(error) => {
                debug!(operation = operation.as_str(), error = %error, "Scripted failure");
                Err(error)
            }
            None => Ok(()),
        }
    }

    fn notify(&self, entity: &Entity, change_type: ChangeType) {
        let notification =
            ChangeNotification::new(entity.category(), entity.id().clone(), change_type)
                .with_related(entity.related_ids());
        self.push(notification);
    }
}

fn check_schema(entity: &Entity) -> ProviderResult<()> {
    match entity {
        Entity::Record(record) if record.title.trim().is_empty() => {
            Err(DataError::validation("record title must not be empty"))
        }
        Entity::Organization(organization) if organization.name.trim().is_empty() => {
            Err(DataError::validation("organization name must not be empty"))
        }
        Entity::Person(person) if person.display_name.trim().is_empty() => {
            Err(DataError::validation("person display name must not be empty"))
        }
        Entity::Relationship(relationship) if relationship.source == relationship.target => {
            Err(DataError::validation("relationship endpoints must differ"))
        }
        _ => Ok(()),
    }
}

#[async_trait]
impl DataProvider for MemoryProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, category: Category, id: &EntityId) -> ProviderResult<Entity> {
        self.enter(Operation::Get).await?;
        rw_read(&self.items, SOURCE, "get")
            .get(&category)
            .and_then(|bucket| bucket.iter().find(|entity| entity.id() == id))
            .cloned()
            .ok_or_else(|| DataError::not_found(EntityRef::new(category, id.clone())))
    }

    async fn list(&self, category: Category, filter: &Filter) -> ProviderResult<Vec<Entity>> {
        self.enter(Operation::List).await?;
        filter.validate()?;
        let candidates = self.snapshot(category);
        Ok(filter.apply(candidates))
    }

    async fn create(&self, input: Entity) -> ProviderResult<EntityId> {
        self.enter(Operation::Create).await?;
        check_schema(&input)?;

        let entity = if input.id().as_str().is_empty() {
            input.with_id(EntityId::generate())
        } else {
            input
        };
        let id = entity.id().clone();
        {
            let mut items = rw_write(&self.items, SOURCE, "create");
            let bucket = items.entry(entity.category()).or_default();
            if bucket.iter().any(|existing| existing.id() == &id) {
                return Err(DataError::validation(format!(
                    "{} already exists",
                    entity.entity_ref()
                )));
            }
            bucket.push(entity.clone());
        }

        self.notify(&entity, ChangeType::Created);
        Ok(id)
    }

    async fn update(
        &self,
        category: Category,
        id: &EntityId,
        patch: &EntityPatch,
    ) -> ProviderResult<()> {
        self.enter(Operation::Update).await?;
        let updated = {
            let mut items = rw_write(&self.items, SOURCE, "update");
            let slot = items
                .get_mut(&category)
                .and_then(|bucket| bucket.iter_mut().find(|entity| entity.id() == id))
                .ok_or_else(|| DataError::not_found(EntityRef::new(category, id.clone())))?;
            let updated = patch.apply_to(slot)?;
            check_schema(&updated)?;
            *slot = updated.clone();
            updated
        };

        self.notify(&updated, ChangeType::Updated);
        Ok(())
    }

    async fn delete(&self, category: Category, id: &EntityId) -> ProviderResult<()> {
        self.enter(Operation::Delete).await?;
        let removed = {
            let mut items = rw_write(&self.items, SOURCE, "delete");
            let bucket = items.entry(category).or_default();
            let position = bucket
                .iter()
                .position(|entity| entity.id() == id)
                .ok_or_else(|| DataError::not_found(EntityRef::new(category, id.clone())))?;
            bucket.remove(position)
        };

        self.notify(&removed, ChangeType::Deleted);
        Ok(())
    }

    fn changes(&self) -> Option<broadcast::Receiver<ChangeNotification>> {
        self.changes.as_ref().map(broadcast::Sender::subscribe)
    }
}
