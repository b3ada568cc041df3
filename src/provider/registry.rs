//! Scoped provider bindings.
//!
//! Bindings form a stack: the most recent live binding answers `current()`.
//! Dropping a binding removes it, which restores whatever was bound before,
//! and stops its subscription bridge.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use tracing::{debug, info};

use super::DataProvider;
use super::bridge::BridgeTask;
use crate::cache::{rw_read, rw_write};
use crate::error::DataError;

const SOURCE: &str = "provider::registry";

struct Bound {
    id: u64,
    provider: Arc<dyn DataProvider>,
}

#[derive(Default)]
pub struct ProviderRegistry {
    stack: RwLock<Vec<Bound>>,
    next_id: AtomicU64,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `provider` for as long as the returned guard lives.
    pub fn bind(self: &Arc<Self>, provider: Arc<dyn DataProvider>) -> ProviderBinding {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let name = provider.name().to_string();
        let depth = {
            let mut stack = rw_write(&self.stack, SOURCE, "bind");
            stack.push(Bound { id, provider });
            stack.len()
        };

        info!(provider = %name, binding_id = id, depth, "Provider bound");

        ProviderBinding {
            registry: Arc::clone(self),
            id,
            name,
            bridge: None,
        }
    }

    /// The provider of the innermost live binding.
    pub fn current(&self) -> Result<Arc<dyn DataProvider>, DataError> {
        rw_read(&self.stack, SOURCE, "current")
            .last()
            .map(|bound| Arc::clone(&bound.provider))
            .ok_or_else(|| DataError::configuration("no data provider is bound"))
    }

    pub fn is_bound(&self) -> bool {
        !rw_read(&self.stack, SOURCE, "is_bound").is_empty()
    }

    pub fn depth(&self) -> usize {
        rw_read(&self.stack, SOURCE, "depth").len()
    }

    fn release(&self, id: u64) {
        let mut stack = rw_write(&self.stack, SOURCE, "release");
        stack.retain(|bound| bound.id != id);
        debug!(binding_id = id, depth = stack.len(), "Provider binding released");
    }
}

/// Guard of one binding.
pub struct ProviderBinding {
    registry: Arc<ProviderRegistry>,
    id: u64,
    name: String,
    bridge: Option<BridgeTask>,
}

impl ProviderBinding {
    pub fn provider_name(&self) -> &str {
        &self.name
    }

    pub fn has_bridge(&self) -> bool {
        self.bridge.is_some()
    }

    pub(crate) fn attach_bridge(&mut self, bridge: BridgeTask) {
        self.bridge = Some(bridge);
    }
}

impl fmt::Debug for ProviderBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderBinding")
            .field("id", &self.id)
            .field("provider", &self.name)
            .field("bridge", &self.bridge.is_some())
            .finish()
    }
}

impl Drop for ProviderBinding {
    fn drop(&mut self) {
        // Stop the bridge before the provider is released.
        self.bridge.take();
        self.registry.release(self.id);
    }
}
