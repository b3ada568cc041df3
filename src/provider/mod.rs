//! Provider boundary.
//!
//! A provider is the concrete backend behind the data-access layer and the
//! only component that performs I/O. Every call returns a
//! [`ProviderResult`] so failures arrive already classified.

mod bridge;
mod memory;
mod registry;

use async_trait::async_trait;
use tessera_types::{Category, ChangeNotification, Entity, EntityId, EntityPatch, Filter};
use tokio::sync::broadcast;

use crate::error::ProviderResult;

pub use bridge::{BridgeTask, ChangeSink, spawn_bridge};
pub use memory::{MemoryProvider, Operation};
pub use registry::{ProviderBinding, ProviderRegistry};

/// Backend operations, uniform across the six categories.
#[async_trait]
pub trait DataProvider: Send + Sync {
    /// Short label used in logs.
    fn name(&self) -> &str;

    async fn get(&self, category: Category, id: &EntityId) -> ProviderResult<Entity>;

    async fn list(&self, category: Category, filter: &Filter) -> ProviderResult<Vec<Entity>>;

    /// Persist a new item and return the id the backend assigned.
    async fn create(&self, input: Entity) -> ProviderResult<EntityId>;

    async fn update(
        &self,
        category: Category,
        id: &EntityId,
        patch: &EntityPatch,
    ) -> ProviderResult<()>;

    async fn delete(&self, category: Category, id: &EntityId) -> ProviderResult<()>;

    /// Push feed of backend-side changes, for providers that support one.
    fn changes(&self) -> Option<broadcast::Receiver<ChangeNotification>> {
        None
    }
}
