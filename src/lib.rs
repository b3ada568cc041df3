//! Tessera: a backend-agnostic reactive data-access layer.
//!
//! Queries are cached under canonical keys, deduplicated while in flight and
//! kept live through subscriptions. Mutations apply optimistic projections,
//! roll back exactly on failure and invalidate dependent queries across the
//! six entity categories.

pub mod cache;
pub mod cascade;
pub mod client;
pub mod config;
pub mod demo;
pub mod error;
pub mod mutation;
pub mod provider;
pub mod query;
pub mod telemetry;

pub use cache::{CacheConfig, CacheKey, QueryData, QueryTarget};
pub use client::QueryClient;
pub use error::{DataError, ErrorKind, ProviderResult};
pub use mutation::{
    MutationHandle, MutationOptions, MutationOutcome, MutationState, Projection, WriteArgs,
};
pub use provider::{DataProvider, MemoryProvider, ProviderBinding};
pub use query::{QueryHandle, QueryOptions, QueryState};
pub use tessera_types as types;
