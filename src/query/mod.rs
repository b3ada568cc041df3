//! Query engine and hook handles.

mod engine;
mod handle;
mod options;
mod retry;

pub(crate) use engine::CascadeScope;

pub use engine::QueryEngine;
pub use handle::QueryHandle;
pub use options::{QueryOptions, QueryState};
pub use retry::RetryPolicy;
