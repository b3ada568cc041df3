//! Shared types for the tessera data-access layer.
//!
//! The entity graph is partitioned into a closed set of [`Category`] values.
//! Each category carries a typed payload schema, and all payloads are united
//! in the tagged [`Entity`] enum that crosses the provider boundary.

mod category;
mod change;
mod entity;
mod filter;

pub use category::{Category, EntityId, EntityRef};
pub use change::{ChangeNotification, ChangeType};
pub use entity::{
    Entity, EntityPatch, Event, KnowledgeItem, Organization, PatchError, Person, Record,
    Relationship,
};
pub use filter::{Filter, FilterError};
