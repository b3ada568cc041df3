//! Tessera cache layer.
//!
//! - **Keys**: canonical, order-independent identifiers for query results
//! - **Store**: the single owner of all cached entries, with per-entry
//!   freshness, request de-duplication, subscriptions, LRU bounding and GC
//!
//! ## Configuration
//!
//! Store behavior is controlled via `tessera.toml`:
//!
//! ```toml
//! [cache]
//! max_entries = 1000
//! gc_grace_ms = 300000
//! default_stale_time_ms = 0
//! # ... see config.rs for all options
//! ```

mod config;
mod entry;
mod keys;
mod lock;
mod store;

pub(crate) use lock::{mutex_lock, rw_read, rw_write};

pub use config::CacheConfig;
pub use entry::{
    CachedQuery, DataUpdate, EntryFlags, FetchFuture, FetchResult, FetchTicket, QueryData,
    SlotState,
};
pub use keys::{
    CacheKey, CanonicalFilter, KeyError, KeyScope, QueryTarget, canonical_json, derive_key,
};
pub use store::{CacheStats, CacheStore, GcTask, Invalidation, SubscribeOptions, Subscription};
