//! Cache key derivation.
//!
//! A [`CacheKey`] is derived from a category plus either an item id or a list
//! filter. List filters are reduced to a canonical JSON text (object keys
//! sorted, `null` members dropped) so that logically identical filters always
//! derive identical keys regardless of how they were built.

use std::fmt;
use std::fmt::Write as _;
use std::hash::{Hash, Hasher};

use serde_json::Value;
use tessera_types::{Category, EntityId, Filter, FilterError};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    #[error("item id must not be empty")]
    EmptyId,
    #[error(transparent)]
    Filter(#[from] FilterError),
    #[error("filter could not be serialized: {0}")]
    Serialize(String),
}

/// What a query asks for: a single item or a filtered list.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryTarget {
    Id(EntityId),
    Filter(Filter),
}

impl From<EntityId> for QueryTarget {
    fn from(value: EntityId) -> Self {
        QueryTarget::Id(value)
    }
}

impl From<&str> for QueryTarget {
    fn from(value: &str) -> Self {
        QueryTarget::Id(EntityId::from(value))
    }
}

impl From<Filter> for QueryTarget {
    fn from(value: Filter) -> Self {
        QueryTarget::Filter(value)
    }
}

/// A validated filter together with its canonical text.
///
/// Equality and hashing use the canonical text only.
#[derive(Debug, Clone)]
pub struct CanonicalFilter {
    text: String,
    filter: Filter,
}

impl CanonicalFilter {
    pub fn new(filter: Filter) -> Result<Self, KeyError> {
        filter.validate()?;
        let value =
            serde_json::to_value(&filter).map_err(|err| KeyError::Serialize(err.to_string()))?;
        Ok(Self {
            text: canonical_json(&value),
            filter,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn filter(&self) -> &Filter {
        &self.filter
    }
}

impl PartialEq for CanonicalFilter {
    fn eq(&self, other: &Self) -> bool {
        self.text == other.text
    }
}

impl Eq for CanonicalFilter {}

impl Hash for CanonicalFilter {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.text.hash(state);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyScope {
    Item(EntityId),
    List(CanonicalFilter),
}

/// Identifier of one query result slot in the cache store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    category: Category,
    scope: KeyScope,
}

impl CacheKey {
    /// Key of the single-item query for `id`.
    pub fn item(category: Category, id: impl Into<EntityId>) -> Self {
        Self {
            category,
            scope: KeyScope::Item(id.into()),
        }
    }

    /// Key of a list query. The filter is validated first.
    pub fn list(category: Category, filter: Filter) -> Result<Self, KeyError> {
        Ok(Self {
            category,
            scope: KeyScope::List(CanonicalFilter::new(filter)?),
        })
    }

    /// Key of a list query described by an untyped JSON object.
    pub fn list_from_json(category: Category, filter: &Value) -> Result<Self, KeyError> {
        Self::list(category, Filter::from_json(filter)?)
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn scope(&self) -> &KeyScope {
        &self.scope
    }

    pub fn is_list(&self) -> bool {
        matches!(self.scope, KeyScope::List(_))
    }

    pub fn item_id(&self) -> Option<&EntityId> {
        match &self.scope {
            KeyScope::Item(id) => Some(id),
            KeyScope::List(_) => None,
        }
    }

    pub fn filter(&self) -> Option<&Filter> {
        match &self.scope {
            KeyScope::Item(_) => None,
            KeyScope::List(canonical) => Some(canonical.filter()),
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.scope {
            KeyScope::Item(id) => write!(f, "{}:item:{}", self.category, id),
            KeyScope::List(filter) => write!(f, "{}:list:{}", self.category, filter.as_str()),
        }
    }
}

/// Derive the cache key for `(category, filter-or-id)`.
pub fn derive_key(category: Category, target: QueryTarget) -> Result<CacheKey, KeyError> {
    match target {
        QueryTarget::Id(id) if id.as_str().trim().is_empty() => Err(KeyError::EmptyId),
        QueryTarget::Id(id) => Ok(CacheKey::item(category, id)),
        QueryTarget::Filter(filter) => CacheKey::list(category, filter),
    }
}

/// Serialize `value` with object members sorted by key and `null` members omitted.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut members: Vec<(&String, &Value)> =
                map.iter().filter(|(_, member)| !member.is_null()).collect();
            members.sort_by(|(left, _), (right, _)| left.cmp(right));

            out.push('{');
            for (index, (name, member)) in members.into_iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                write_scalar(&Value::String(name.clone()), out);
                out.push(':');
                write_canonical(member, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (index, item) in items.iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => write_scalar(scalar, out),
    }
}

fn write_scalar(value: &Value, out: &mut String) {
    // Display on a scalar Value is its compact JSON encoding.
    let _ = write!(out, "{value}");
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn key_is_independent_of_member_order() {
        let left = CacheKey::list_from_json(
            Category::Record,
            &json!({ "type": "x", "status": "y", "meta": { "b": 1, "a": 2 } }),
        )
        .expect("valid filter");
        let right = CacheKey::list_from_json(
            Category::Record,
            &json!({ "meta": { "a": 2, "b": 1 }, "status": "y", "type": "x" }),
        )
        .expect("valid filter");

        assert_eq!(left, right);
        assert_eq!(left.to_string(), right.to_string());
    }

    #[test]
    fn absent_and_null_fields_are_equivalent() {
        let omitted = CacheKey::list_from_json(Category::Record, &json!({ "status": "draft" }))
            .expect("valid filter");
        let null = CacheKey::list_from_json(
            Category::Record,
            &json!({ "status": "draft", "owner": null, "color": null }),
        )
        .expect("valid filter");
        let typed = CacheKey::list(Category::Record, Filter::new().with_status("draft"))
            .expect("valid filter");

        assert_eq!(omitted, null);
        assert_eq!(omitted, typed);
    }

    #[test]
    fn categories_never_collide() {
        let filter = Filter::new().with_status("active");
        let records = CacheKey::list(Category::Record, filter.clone()).expect("valid");
        let people = CacheKey::list(Category::Person, filter).expect("valid");
        assert_ne!(records, people);

        assert_ne!(
            CacheKey::item(Category::Record, "1"),
            CacheKey::item(Category::Event, "1")
        );
    }

    #[test]
    fn item_and_list_scopes_differ() {
        let item = derive_key(Category::Record, QueryTarget::from("r-1")).expect("valid id");
        let list = derive_key(Category::Record, QueryTarget::from(Filter::new())).expect("valid");

        assert_eq!(item.item_id(), Some(&EntityId::from("r-1")));
        assert!(!item.is_list());
        assert!(list.is_list());
        assert_eq!(list.to_string(), "record:list:{}");
    }

    #[test]
    fn invalid_inputs_are_rejected() {
        assert_eq!(
            derive_key(Category::Record, QueryTarget::from("  ")),
            Err(KeyError::EmptyId)
        );
        assert_eq!(
            CacheKey::list(Category::Record, Filter::new().with_page(0, 0)),
            Err(KeyError::Filter(FilterError::ZeroLimit))
        );
    }

    #[test]
    fn canonical_json_sorts_nested_objects() {
        let value = json!({ "z": [ { "d": 1, "c": null, "b": "x" } ], "a": true });
        assert_eq!(canonical_json(&value), r#"{"a":true,"z":[{"b":"x","d":1}]}"#);
    }
}
