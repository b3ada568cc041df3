//! Entity categories and identifiers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The fixed set of entity kinds exposed by every provider.
///
/// Categories are not extensible at runtime; the invalidation cascade is
/// defined over exactly this set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// Generic records.
    Record,
    /// Typed relationships between two records.
    Relationship,
    /// Append-only event log.
    Event,
    /// Semantic/knowledge store items.
    Knowledge,
    /// Tenant/organization records.
    Organization,
    /// Actor/identity records.
    Person,
}

impl Category {
    pub const ALL: [Category; 6] = [
        Category::Record,
        Category::Relationship,
        Category::Event,
        Category::Knowledge,
        Category::Organization,
        Category::Person,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Record => "record",
            Category::Relationship => "relationship",
            Category::Event => "event",
            Category::Knowledge => "knowledge",
            Category::Organization => "organization",
            Category::Person => "person",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .into_iter()
            .find(|category| category.as_str() == value)
            .ok_or_else(|| format!("unknown category `{value}`"))
    }
}

/// Opaque identifier of one persisted item.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Generate a fresh random identifier (UUIDv4 text form).
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for EntityId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// `(category, id)` pair identifying one persisted item. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    category: Category,
    id: EntityId,
}

impl EntityRef {
    pub fn new(category: Category, id: impl Into<EntityId>) -> Self {
        Self {
            category,
            id: id.into(),
        }
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn id(&self) -> &EntityId {
        &self.id
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.category, self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_round_trips_through_str() {
        for category in Category::ALL {
            assert_eq!(category.as_str().parse::<Category>(), Ok(category));
        }
        assert!("widget".parse::<Category>().is_err());
    }

    #[test]
    fn category_serializes_snake_case() {
        let json = serde_json::to_string(&Category::Knowledge).expect("serialize");
        assert_eq!(json, "\"knowledge\"");
    }

    #[test]
    fn entity_ref_display() {
        let entity = EntityRef::new(Category::Person, "p-1");
        assert_eq!(entity.to_string(), "person/p-1");
        assert_eq!(entity.id().as_str(), "p-1");
    }

    #[test]
    fn generated_ids_are_unique() {
        assert_ne!(EntityId::generate(), EntityId::generate());
    }
}
