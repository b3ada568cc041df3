//! Push-notification types emitted by providers that support realtime updates.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::category::{Category, EntityId, EntityRef};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Created,
    Updated,
    Deleted,
}

impl ChangeType {
    pub fn as_str(self) -> &'static str {
        match self {
            ChangeType::Created => "created",
            ChangeType::Updated => "updated",
            ChangeType::Deleted => "deleted",
        }
    }
}

/// A change observed by the backend, pushed to subscribed clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeNotification {
    pub category: Category,
    pub id: EntityId,
    pub change_type: ChangeType,
    /// Ids the changed item points at, used to reach dependent queries.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub related_ids: Vec<EntityId>,
    #[serde(with = "time::serde::rfc3339")]
    pub at: OffsetDateTime,
}

impl ChangeNotification {
    pub fn new(category: Category, id: impl Into<EntityId>, change_type: ChangeType) -> Self {
        Self {
            category,
            id: id.into(),
            change_type,
            related_ids: Vec::new(),
            at: OffsetDateTime::now_utc(),
        }
    }

    pub fn with_related(mut self, related_ids: Vec<EntityId>) -> Self {
        self.related_ids = related_ids;
        self
    }

    pub fn entity_ref(&self) -> EntityRef {
        EntityRef::new(self.category, self.id.clone())
    }
}
