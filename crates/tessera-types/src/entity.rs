//! Per-category payload schemas.
//!
//! Payloads cross the provider boundary as the tagged [`Entity`] enum. Patches
//! are JSON objects that are merged into a payload and re-validated against the
//! category's schema before they are accepted.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use time::OffsetDateTime;

use crate::category::{Category, EntityId, EntityRef};

const DEFAULT_STATUS: &str = "active";

/// Generic record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: EntityId,
    #[serde(rename = "type")]
    pub kind: String,
    pub status: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<EntityId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization: Option<EntityId>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, Value>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl Record {
    pub fn new(id: impl Into<EntityId>, kind: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            status: DEFAULT_STATUS.to_string(),
            title: title.into(),
            owner: None,
            organization: None,
            attributes: BTreeMap::new(),
            created_at: OffsetDateTime::now_utc(),
        }
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = status.into();
        self
    }

    pub fn with_owner(mut self, owner: impl Into<EntityId>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn with_organization(mut self, organization: impl Into<EntityId>) -> Self {
        self.organization = Some(organization.into());
        self
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(name.into(), value);
        self
    }
}

/// Typed, directed relationship between two records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub id: EntityId,
    #[serde(rename = "type")]
    pub kind: String,
    pub source: EntityId,
    pub target: EntityId,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, Value>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl Relationship {
    pub fn new(
        id: impl Into<EntityId>,
        kind: impl Into<String>,
        source: impl Into<EntityId>,
        target: impl Into<EntityId>,
    ) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            source: source.into(),
            target: target.into(),
            attributes: BTreeMap::new(),
            created_at: OffsetDateTime::now_utc(),
        }
    }
}

/// Entry in the append-only event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: EntityId,
    #[serde(rename = "type")]
    pub kind: String,
    pub actor: EntityId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<EntityId>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub payload: Value,
    #[serde(with = "time::serde::rfc3339")]
    pub occurred_at: OffsetDateTime,
}

impl Event {
    pub fn new(id: impl Into<EntityId>, kind: impl Into<String>, actor: impl Into<EntityId>) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            actor: actor.into(),
            target: None,
            payload: Value::Null,
            occurred_at: OffsetDateTime::now_utc(),
        }
    }

    pub fn with_target(mut self, target: impl Into<EntityId>) -> Self {
        self.target = Some(target.into());
        self
    }
}

/// Item of the semantic/knowledge store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeItem {
    pub id: EntityId,
    #[serde(rename = "type")]
    pub kind: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<EntityId>,
    /// Record this item was derived from, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<EntityId>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, Value>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl KnowledgeItem {
    pub fn new(id: impl Into<EntityId>, kind: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            content: content.into(),
            owner: None,
            source: None,
            attributes: BTreeMap::new(),
            created_at: OffsetDateTime::now_utc(),
        }
    }
}

/// Tenant/organization record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Organization {
    pub id: EntityId,
    pub name: String,
    pub status: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl Organization {
    pub fn new(id: impl Into<EntityId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            status: DEFAULT_STATUS.to_string(),
            created_at: OffsetDateTime::now_utc(),
        }
    }
}

/// Actor/identity record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Person {
    pub id: EntityId,
    pub display_name: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization: Option<EntityId>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl Person {
    pub fn new(id: impl Into<EntityId>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            status: DEFAULT_STATUS.to_string(),
            organization: None,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    pub fn with_organization(mut self, organization: impl Into<EntityId>) -> Self {
        self.organization = Some(organization.into());
        self
    }
}

/// Any persisted item, tagged by its category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "category", rename_all = "snake_case")]
pub enum Entity {
    Record(Record),
    Relationship(Relationship),
    Event(Event),
    Knowledge(KnowledgeItem),
    Organization(Organization),
    Person(Person),
}

impl Entity {
    pub fn category(&self) -> Category {
        match self {
            Entity::Record(_) => Category::Record,
            Entity::Relationship(_) => Category::Relationship,
            Entity::Event(_) => Category::Event,
            Entity::Knowledge(_) => Category::Knowledge,
            Entity::Organization(_) => Category::Organization,
            Entity::Person(_) => Category::Person,
        }
    }

    pub fn id(&self) -> &EntityId {
        match self {
            Entity::Record(item) => &item.id,
            Entity::Relationship(item) => &item.id,
            Entity::Event(item) => &item.id,
            Entity::Knowledge(item) => &item.id,
            Entity::Organization(item) => &item.id,
            Entity::Person(item) => &item.id,
        }
    }

    pub fn entity_ref(&self) -> EntityRef {
        EntityRef::new(self.category(), self.id().clone())
    }

    /// Replace the identifier, e.g. once a provider has assigned the real one.
    pub fn with_id(mut self, id: EntityId) -> Self {
        match &mut self {
            Entity::Record(item) => item.id = id,
            Entity::Relationship(item) => item.id = id,
            Entity::Event(item) => item.id = id,
            Entity::Knowledge(item) => item.id = id,
            Entity::Organization(item) => item.id = id,
            Entity::Person(item) => item.id = id,
        }
        self
    }

    /// Ids of other entities this item points at (endpoints, actor, owner...).
    pub fn related_ids(&self) -> Vec<EntityId> {
        let candidates: Vec<Option<&EntityId>> = match self {
            Entity::Record(item) => vec![item.owner.as_ref(), item.organization.as_ref()],
            Entity::Relationship(item) => vec![Some(&item.source), Some(&item.target)],
            Entity::Event(item) => vec![Some(&item.actor), item.target.as_ref()],
            Entity::Knowledge(item) => vec![item.owner.as_ref(), item.source.as_ref()],
            Entity::Organization(_) => Vec::new(),
            Entity::Person(item) => vec![item.organization.as_ref()],
        };
        let mut ids: Vec<EntityId> = candidates.into_iter().flatten().cloned().collect();
        ids.dedup();
        ids
    }

    /// The `type` discriminator, for categories that carry one.
    pub fn kind(&self) -> Option<&str> {
        match self {
            Entity::Record(item) => Some(&item.kind),
            Entity::Relationship(item) => Some(&item.kind),
            Entity::Event(item) => Some(&item.kind),
            Entity::Knowledge(item) => Some(&item.kind),
            Entity::Organization(_) | Entity::Person(_) => None,
        }
    }

    pub fn status(&self) -> Option<&str> {
        match self {
            Entity::Record(item) => Some(&item.status),
            Entity::Organization(item) => Some(&item.status),
            Entity::Person(item) => Some(&item.status),
            Entity::Relationship(_) | Entity::Event(_) | Entity::Knowledge(_) => None,
        }
    }

    pub fn owner(&self) -> Option<&EntityId> {
        match self {
            Entity::Record(item) => item.owner.as_ref(),
            Entity::Knowledge(item) => item.owner.as_ref(),
            _ => None,
        }
    }

    pub fn organization(&self) -> Option<&EntityId> {
        match self {
            Entity::Record(item) => item.organization.as_ref(),
            Entity::Person(item) => item.organization.as_ref(),
            _ => None,
        }
    }

    pub fn actor(&self) -> Option<&EntityId> {
        match self {
            Entity::Event(item) => Some(&item.actor),
            _ => None,
        }
    }

    pub fn target(&self) -> Option<&EntityId> {
        match self {
            Entity::Relationship(item) => Some(&item.target),
            Entity::Event(item) => item.target.as_ref(),
            _ => None,
        }
    }

    /// Creation or occurrence timestamp.
    pub fn timestamp(&self) -> OffsetDateTime {
        match self {
            Entity::Record(item) => item.created_at,
            Entity::Relationship(item) => item.created_at,
            Entity::Event(item) => item.occurred_at,
            Entity::Knowledge(item) => item.created_at,
            Entity::Organization(item) => item.created_at,
            Entity::Person(item) => item.created_at,
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&Value> {
        match self {
            Entity::Record(item) => item.attributes.get(name),
            Entity::Relationship(item) => item.attributes.get(name),
            Entity::Knowledge(item) => item.attributes.get(name),
            _ => None,
        }
    }
}

impl From<Record> for Entity {
    fn from(value: Record) -> Self {
        Entity::Record(value)
    }
}

impl From<Relationship> for Entity {
    fn from(value: Relationship) -> Self {
        Entity::Relationship(value)
    }
}

impl From<Event> for Entity {
    fn from(value: Event) -> Self {
        Entity::Event(value)
    }
}

impl From<KnowledgeItem> for Entity {
    fn from(value: KnowledgeItem) -> Self {
        Entity::Knowledge(value)
    }
}

impl From<Organization> for Entity {
    fn from(value: Organization) -> Self {
        Entity::Organization(value)
    }
}

impl From<Person> for Entity {
    fn from(value: Person) -> Self {
        Entity::Person(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatchError {
    #[error("field `{field}` cannot be patched")]
    ImmutableField { field: String },
    #[error("patch for {category} does not match its schema: {reason}")]
    Schema { category: Category, reason: String },
}

/// Partial update expressed as a JSON object.
///
/// Keys present in the patch replace the payload's fields; a `null` value
/// clears an optional field. `id` and `category` are immutable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityPatch(Map<String, Value>);

impl EntityPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, field: impl Into<String>, value: Value) -> Self {
        self.0.insert(field.into(), value);
        self
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Merge the patch into `entity` and re-validate against its schema.
    pub fn apply_to(&self, entity: &Entity) -> Result<Entity, PatchError> {
        let category = entity.category();
        let schema_error = |reason: String| PatchError::Schema { category, reason };

        for field in ["id", "category"] {
            if self.0.contains_key(field) {
                return Err(PatchError::ImmutableField {
                    field: field.to_string(),
                });
            }
        }

        let mut value = serde_json::to_value(entity).map_err(|err| schema_error(err.to_string()))?;
        let Some(object) = value.as_object_mut() else {
            return Err(schema_error("entity did not serialize to an object".to_string()));
        };
        for (field, patch_value) in &self.0 {
            if patch_value.is_null() {
                object.remove(field);
            } else {
                object.insert(field.clone(), patch_value.clone());
            }
        }

        serde_json::from_value(value).map_err(|err| schema_error(err.to_string()))
    }
}

impl From<Map<String, Value>> for EntityPatch {
    fn from(value: Map<String, Value>) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn entity_serializes_with_category_tag() {
        let entity = Entity::from(Record::new("r-1", "note", "First"));
        let value = serde_json::to_value(&entity).expect("serialize");
        assert_eq!(value["category"], "record");
        assert_eq!(value["type"], "note");

        let back: Entity = serde_json::from_value(value).expect("deserialize");
        assert_eq!(back, entity);
    }

    #[test]
    fn related_ids_cover_endpoints() {
        let relationship = Entity::from(Relationship::new("l-1", "cites", "a", "b"));
        assert_eq!(
            relationship.related_ids(),
            vec![EntityId::from("a"), EntityId::from("b")]
        );

        let event = Entity::from(Event::new("e-1", "comment", "p-1").with_target("r-1"));
        assert_eq!(
            event.related_ids(),
            vec![EntityId::from("p-1"), EntityId::from("r-1")]
        );

        let organization = Entity::from(Organization::new("o-1", "Acme"));
        assert!(organization.related_ids().is_empty());
    }

    #[test]
    fn patch_updates_fields_and_revalidates() {
        let entity = Entity::from(Record::new("r-1", "note", "First").with_owner("p-1"));
        let patch = EntityPatch::new()
            .set("status", json!("archived"))
            .set("owner", Value::Null);

        let patched = patch.apply_to(&entity).expect("valid patch");
        let Entity::Record(record) = patched else {
            panic!("category must be preserved");
        };
        assert_eq!(record.status, "archived");
        assert_eq!(record.owner, None);
        assert_eq!(record.title, "First");
    }

    #[test]
    fn patch_rejects_schema_violations() {
        let entity = Entity::from(Record::new("r-1", "note", "First"));
        let patch = EntityPatch::new().set("title", json!(42));
        assert!(matches!(
            patch.apply_to(&entity),
            Err(PatchError::Schema {
                category: Category::Record,
                ..
            })
        ));
    }

    #[test]
    fn patch_rejects_immutable_fields() {
        let entity = Entity::from(Person::new("p-1", "Ada"));
        let patch = EntityPatch::new().set("id", json!("p-2"));
        assert_eq!(
            patch.apply_to(&entity),
            Err(PatchError::ImmutableField {
                field: "id".to_string()
            })
        );
    }
}
