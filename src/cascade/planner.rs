//! Cascade planning.
//!
//! Turns one successful write into the de-duplicated set of cache keys that
//! must be invalidated, by evaluating the rule table against the keys
//! currently cached.

use std::collections::HashSet;
use std::fmt;

use tessera_types::{Category, ChangeNotification, EntityId};

use super::rules::{CascadeTarget, Subject, rule_for};
use crate::cache::CacheKey;

/// A write that has been confirmed by the provider or pushed by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenEntity {
    pub category: Category,
    pub id: EntityId,
    pub related_ids: Vec<EntityId>,
}

impl WrittenEntity {
    pub fn new(category: Category, id: impl Into<EntityId>) -> Self {
        Self {
            category,
            id: id.into(),
            related_ids: Vec::new(),
        }
    }

    pub fn with_related(mut self, related_ids: Vec<EntityId>) -> Self {
        self.related_ids = related_ids;
        self
    }

    fn subject_ids(&self, subject: Subject) -> &[EntityId] {
        match subject {
            Subject::Written => std::slice::from_ref(&self.id),
            Subject::Related => &self.related_ids,
        }
    }
}

impl From<&ChangeNotification> for WrittenEntity {
    fn from(notification: &ChangeNotification) -> Self {
        Self {
            category: notification.category,
            id: notification.id.clone(),
            related_ids: notification.related_ids.clone(),
        }
    }
}

/// Keys to invalidate for one write, in rule order without duplicates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CascadePlan {
    keys: Vec<CacheKey>,
    seen: HashSet<CacheKey>,
}

impl fmt::Display for CascadePlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CascadePlan {{ keys: [")?;
        for (index, key) in self.keys.iter().enumerate() {
            if index > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{key}")?;
        }
        write!(f, "] }}")
    }
}

impl CascadePlan {
    /// Evaluate the rule for `write.category` against `cached` keys.
    ///
    /// The item key of the written id is always part of the plan, whether or
    /// not it is cached.
    pub fn for_write<'a, I>(write: &WrittenEntity, cached: I) -> Self
    where
        I: IntoIterator<Item = &'a CacheKey>,
    {
        let cached: Vec<&CacheKey> = cached.into_iter().collect();
        let mut plan = Self::default();
        plan.push(CacheKey::item(write.category, write.id.clone()));

        for target in rule_for(write.category).targets {
            match *target {
                CascadeTarget::AllLists(category) => {
                    for key in cached
                        .iter()
                        .filter(|key| key.category() == category && key.is_list())
                    {
                        plan.push((*key).clone());
                    }
                }
                CascadeTarget::ListsWhere {
                    category,
                    field,
                    subject,
                } => {
                    let ids = write.subject_ids(subject);
                    for key in cached.iter().filter(|key| key.category() == category) {
                        let matches = key
                            .filter()
                            .and_then(|filter| field.value(filter))
                            .is_some_and(|value| ids.contains(value));
                        if matches {
                            plan.push((*key).clone());
                        }
                    }
                }
                CascadeTarget::Items { category, subject } => {
                    for id in write.subject_ids(subject) {
                        plan.push(CacheKey::item(category, id.clone()));
                    }
                }
            }
        }

        plan
    }

    fn push(&mut self, key: CacheKey) {
        if self.seen.insert(key.clone()) {
            self.keys.push(key);
        }
    }

    /// Add keys outside the rule table, e.g. the keys a mutation patched.
    pub fn extend<I>(&mut self, keys: I)
    where
        I: IntoIterator<Item = CacheKey>,
    {
        for key in keys {
            self.push(key);
        }
    }

    pub fn keys(&self) -> &[CacheKey] {
        &self.keys
    }

    pub fn into_keys(self) -> Vec<CacheKey> {
        self.keys
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.seen.contains(key)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Set of keys to invalidate after a successful write.
pub fn on_write_succeeded<'a, I>(
    category: Category,
    written_id: &EntityId,
    related_ids: &[EntityId],
    cached: I,
) -> HashSet<CacheKey>
where
    I: IntoIterator<Item = &'a CacheKey>,
{
    let write = WrittenEntity::new(category, written_id.clone()).with_related(related_ids.to_vec());
    CascadePlan::for_write(&write, cached).seen
}

#[cfg(test)]
mod tests {
    use tessera_types::{ChangeType, Filter};

    use super::*;

    fn list(category: Category, filter: Filter) -> CacheKey {
        CacheKey::list(category, filter).expect("valid filter")
    }

    #[test]
    fn record_write_hits_item_all_record_lists_and_related_relationships() {
        let drafts = list(Category::Record, Filter::new().with_status("draft"));
        let published = list(Category::Record, Filter::new().with_status("published"));
        let links_of_r1 = list(Category::Relationship, Filter::new().with_related_to("r-1"));
        let links_of_r2 = list(Category::Relationship, Filter::new().with_related_to("r-2"));
        let people = list(Category::Person, Filter::new());
        let cached = vec![
            drafts.clone(),
            published.clone(),
            links_of_r1.clone(),
            links_of_r2.clone(),
            people.clone(),
        ];

        let plan = CascadePlan::for_write(&WrittenEntity::new(Category::Record, "r-1"), &cached);

        assert!(plan.contains(&CacheKey::item(Category::Record, "r-1")));
        assert!(plan.contains(&drafts));
        assert!(plan.contains(&published));
        assert!(plan.contains(&links_of_r1));
        assert!(!plan.contains(&links_of_r2));
        assert!(!plan.contains(&people));
        assert_eq!(plan.len(), 4);
    }

    #[test]
    fn relationship_write_hits_endpoint_items() {
        let write = WrittenEntity::new(Category::Relationship, "l-1")
            .with_related(vec![EntityId::from("r-1"), EntityId::from("r-2")]);
        let plan = CascadePlan::for_write(&write, std::iter::empty());

        assert!(plan.contains(&CacheKey::item(Category::Relationship, "l-1")));
        assert!(plan.contains(&CacheKey::item(Category::Record, "r-1")));
        assert!(plan.contains(&CacheKey::item(Category::Record, "r-2")));
    }

    #[test]
    fn event_write_is_deduplicated_across_overlapping_rules() {
        let feed = list(Category::Event, Filter::new().with_actor("p-1"));
        let cached = vec![feed.clone()];
        let write =
            WrittenEntity::new(Category::Event, "e-1").with_related(vec![EntityId::from("p-1")]);

        let plan = CascadePlan::for_write(&write, &cached);
        assert_eq!(plan.keys(), &[CacheKey::item(Category::Event, "e-1"), feed]);
    }

    #[test]
    fn person_write_reaches_owned_records_and_activity() {
        let owned = list(Category::Record, Filter::new().with_owner("p-1"));
        let activity = list(Category::Event, Filter::new().with_actor("p-1"));
        let other = list(Category::Record, Filter::new().with_owner("p-2"));
        let cached = vec![owned.clone(), activity.clone(), other.clone()];

        let keys = on_write_succeeded(Category::Person, &EntityId::from("p-1"), &[], &cached);
        assert!(keys.contains(&owned));
        assert!(keys.contains(&activity));
        assert!(!keys.contains(&other));
    }

    #[test]
    fn plans_are_order_independent() {
        let a = list(Category::Record, Filter::new().with_status("a"));
        let b = list(Category::Record, Filter::new().with_status("b"));
        let write = WrittenEntity::new(Category::Record, "r-1");

        let forward = on_write_succeeded(write.category, &write.id, &[], &[a.clone(), b.clone()]);
        let backward = on_write_succeeded(write.category, &write.id, &[], &[b, a]);
        assert_eq!(forward, backward);
    }

    #[test]
    fn notifications_convert_into_writes() {
        let notification = ChangeNotification::new(Category::Event, "e-9", ChangeType::Created)
            .with_related(vec![EntityId::from("p-1")]);
        let write = WrittenEntity::from(&notification);
        assert_eq!(write.id, EntityId::from("e-9"));
        assert_eq!(write.related_ids, vec![EntityId::from("p-1")]);
    }
}
