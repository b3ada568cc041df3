//! Typed query filters.
//!
//! A [`Filter`] names the well-known list parameters explicitly and keeps any
//! other serializable parameter in an ordered `extra` bag. Filters are
//! validated before they are used to derive a cache key.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use time::OffsetDateTime;

use crate::category::EntityId;
use crate::entity::Entity;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FilterError {
    #[error("filter must be a JSON object")]
    NotAnObject,
    #[error("filter does not match its schema: {0}")]
    Schema(String),
    #[error("filter field `{field}` must not be empty")]
    EmptyField { field: String },
    #[error("filter limit must be greater than zero")]
    ZeroLimit,
    #[error("filter time range ends before it starts")]
    InvertedRange,
}

/// Query parameters for a list request.
///
/// Absent fields are omitted from the serialized form, so a field that was
/// never set and a field explicitly set to `None` are indistinguishable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<EntityId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization: Option<EntityId>,
    /// Matches items whose related ids contain this id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_to: Option<EntityId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<EntityId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<EntityId>,
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub since: Option<OffsetDateTime>,
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub until: Option<OffsetDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    /// Additional parameters matched against item attributes.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and validate an untyped filter object.
    pub fn from_json(value: &Value) -> Result<Self, FilterError> {
        if !value.is_object() {
            return Err(FilterError::NotAnObject);
        }
        let filter: Filter = serde_json::from_value(value.clone())
            .map_err(|err| FilterError::Schema(err.to_string()))?;
        filter.validate()?;
        Ok(filter)
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
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

    pub fn with_related_to(mut self, id: impl Into<EntityId>) -> Self {
        self.related_to = Some(id.into());
        self
    }

    pub fn with_actor(mut self, actor: impl Into<EntityId>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    pub fn with_target(mut self, target: impl Into<EntityId>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_range(mut self, since: OffsetDateTime, until: OffsetDateTime) -> Self {
        self.since = Some(since);
        self.until = Some(until);
        self
    }

    pub fn with_page(mut self, offset: u64, limit: u64) -> Self {
        self.offset = Some(offset);
        self.limit = Some(limit);
        self
    }

    pub fn with_extra(mut self, name: impl Into<String>, value: Value) -> Self {
        self.extra.insert(name.into(), value);
        self
    }

    pub fn validate(&self) -> Result<(), FilterError> {
        let text_fields = [
            ("type", self.kind.as_deref()),
            ("status", self.status.as_deref()),
            ("owner", self.owner.as_ref().map(EntityId::as_str)),
            ("organization", self.organization.as_ref().map(EntityId::as_str)),
            ("related_to", self.related_to.as_ref().map(EntityId::as_str)),
            ("actor", self.actor.as_ref().map(EntityId::as_str)),
            ("target", self.target.as_ref().map(EntityId::as_str)),
        ];
        for (field, value) in text_fields {
            if value.is_some_and(|text| text.trim().is_empty()) {
                return Err(FilterError::EmptyField {
                    field: field.to_string(),
                });
            }
        }

        if let Some(name) = self.extra.keys().find(|name| name.trim().is_empty()) {
            return Err(FilterError::EmptyField {
                field: name.clone(),
            });
        }

        if self.limit == Some(0) {
            return Err(FilterError::ZeroLimit);
        }

        if let (Some(since), Some(until)) = (self.since, self.until)
            && until < since
        {
            return Err(FilterError::InvertedRange);
        }

        Ok(())
    }

    /// Whether `entity` satisfies every predicate of this filter.
    ///
    /// Pagination is not a predicate; see [`Filter::apply`].
    pub fn matches(&self, entity: &Entity) -> bool {
        if let Some(kind) = self.kind.as_deref()
            && entity.kind() != Some(kind)
        {
            return false;
        }
        if let Some(status) = self.status.as_deref()
            && entity.status() != Some(status)
        {
            return false;
        }
        if self.owner.is_some() && entity.owner() != self.owner.as_ref() {
            return false;
        }
        if self.organization.is_some() && entity.organization() != self.organization.as_ref() {
            return false;
        }
        if self.actor.is_some() && entity.actor() != self.actor.as_ref() {
            return false;
        }
        if self.target.is_some() && entity.target() != self.target.as_ref() {
            return false;
        }
        if let Some(related) = self.related_to.as_ref()
            && !entity.related_ids().contains(related)
        {
            return false;
        }

        let timestamp = entity.timestamp();
        if self.since.is_some_and(|since| timestamp < since) {
            return false;
        }
        if self.until.is_some_and(|until| timestamp > until) {
            return false;
        }

        self.extra
            .iter()
            .filter(|(_, value)| !value.is_null())
            .all(|(name, value)| entity.attribute(name) == Some(value))
    }

    /// Filter and paginate a candidate set.
    pub fn apply<I>(&self, entities: I) -> Vec<Entity>
    where
        I: IntoIterator<Item = Entity>,
    {
        let offset = self.offset.unwrap_or(0) as usize;
        let limit = self.limit.map_or(usize::MAX, |limit| limit as usize);
        entities
            .into_iter()
            .filter(|entity| self.matches(entity))
            .skip(offset)
            .take(limit)
            .collect()
    }
}
