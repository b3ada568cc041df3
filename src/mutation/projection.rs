//! Optimistic projections: how a pending write is expected to change cached results.

use std::fmt;
use std::sync::Arc;

use tessera_types::{Category, Entity, EntityId, EntityPatch};

use crate::cache::{CacheKey, DataUpdate, KeyScope, QueryData};

type ProjectFn = dyn Fn(&CacheKey, Option<&QueryData>) -> DataUpdate + Send + Sync;

/// Caller-supplied projection of a write onto cached data.
#[derive(Clone)]
pub struct Projection(Arc<ProjectFn>);

impl Projection {
    pub fn new<F>(project: F) -> Self
    where
        F: Fn(&CacheKey, Option<&QueryData>) -> DataUpdate + Send + Sync + 'static,
    {
        Self(Arc::new(project))
    }

    pub fn project(&self, key: &CacheKey, current: Option<&QueryData>) -> DataUpdate {
        (self.0)(key, current)
    }

    /// A created item: its own key holds it, and it is appended to every
    /// cached list of its category whose filter it matches.
    pub fn insert(entity: Entity) -> Self {
        Self::new(move |key, current| {
            if key.category() != entity.category() {
                return DataUpdate::Keep;
            }
            match (key.scope(), current) {
                (KeyScope::Item(id), _) if id == entity.id() => {
                    DataUpdate::Set(QueryData::One(entity.clone()))
                }
                (KeyScope::List(filter), Some(QueryData::Many(items)))
                    if filter.filter().matches(&entity)
                        && !items.iter().any(|item| item.id() == entity.id()) =>
                {
                    let mut items = items.clone();
                    items.push(entity.clone());
                    DataUpdate::Set(QueryData::Many(items))
                }
                _ => DataUpdate::Keep,
            }
        })
    }

    /// A patched item: replaced wherever it is cached, and dropped from lists
    /// whose filter it stops matching.
    pub fn patch(category: Category, id: EntityId, patch: EntityPatch) -> Self {
        Self::new(move |key, current| {
            if key.category() != category {
                return DataUpdate::Keep;
            }
            match (key.scope(), current) {
                (KeyScope::Item(item_id), Some(QueryData::One(entity))) if *item_id == id => {
                    match patch.apply_to(entity) {
                        Ok(patched) => DataUpdate::Set(QueryData::One(patched)),
                        Err(_) => DataUpdate::Keep,
                    }
                }
                (KeyScope::List(filter), Some(QueryData::Many(items)))
                    if items.iter().any(|item| *item.id() == id) =>
                {
                    let mut projected = Vec::with_capacity(items.len());
                    for item in items {
                        if *item.id() != id {
                            projected.push(item.clone());
                            continue;
                        }
                        let Ok(patched) = patch.apply_to(item) else {
                            return DataUpdate::Keep;
                        };
                        if filter.filter().matches(&patched) {
                            projected.push(patched);
                        }
                    }
                    DataUpdate::Set(QueryData::Many(projected))
                }
                _ => DataUpdate::Keep,
            }
        })
    }

    /// A deleted item: its own key is cleared and it leaves every list.
    pub fn remove(category: Category, id: EntityId) -> Self {
        Self::new(move |key, current| {
            if key.category() != category {
                return DataUpdate::Keep;
            }
            match (key.scope(), current) {
                (KeyScope::Item(item_id), Some(_)) if *item_id == id => DataUpdate::Clear,
                (KeyScope::List(_), Some(QueryData::Many(items)))
                    if items.iter().any(|item| *item.id() == id) =>
                {
                    let kept = items
                        .iter()
                        .filter(|item| *item.id() != id)
                        .cloned()
                        .collect();
                    DataUpdate::Set(QueryData::Many(kept))
                }
                _ => DataUpdate::Keep,
            }
        })
    }
}

impl fmt::Debug for Projection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Projection(..)")
    }
}
