//! Mutation handles: the hook surface over [`MutationEngine`].

use std::sync::{Arc, Mutex};

use tessera_types::Category;

use super::engine::{MutationEngine, MutationOptions, MutationOutcome, WriteArgs};
use crate::cache::mutex_lock;
use crate::error::DataError;

const SOURCE: &str = "mutation::handle";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MutationState {
    pub loading: bool,
    pub error: Option<DataError>,
    pub data: Option<MutationOutcome>,
}

#[derive(Default)]
struct Tracked {
    state: MutationState,
    /// Bumped by `reset` and by every new call so a stale completion cannot
    /// overwrite newer state.
    generation: u64,
}

/// One mutation call site: fixed category and options, tracked state.
#[derive(Clone)]
pub struct MutationHandle {
    engine: MutationEngine,
    category: Category,
    options: MutationOptions,
    tracked: Arc<Mutex<Tracked>>,
}

impl MutationHandle {
    pub fn new(engine: MutationEngine, category: Category, options: MutationOptions) -> Self {
        Self {
            engine,
            category,
            options,
            tracked: Arc::new(Mutex::new(Tracked::default())),
        }
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn state(&self) -> MutationState {
        mutex_lock(&self.tracked, SOURCE, "state").state.clone()
    }

    /// Run the write with the handle's options.
    pub async fn mutate(&self, args: WriteArgs) -> Result<MutationOutcome, DataError> {
        self.mutate_with(args, self.options.clone()).await
    }

    /// Run the write with per-call options, e.g. a projection built from `args`.
    pub async fn mutate_with(
        &self,
        args: WriteArgs,
        options: MutationOptions,
    ) -> Result<MutationOutcome, DataError> {
        let generation = {
            let mut tracked = mutex_lock(&self.tracked, SOURCE, "mutate");
            tracked.generation += 1;
            tracked.state = MutationState {
                loading: true,
                error: None,
                data: None,
            };
            tracked.generation
        };

        let engine = self.engine.clone();
        let tracked = Arc::clone(&self.tracked);
        let category = self.category;
        let task = tokio::spawn(async move {
            let result = engine.mutate(category, args, options).await;
            let mut guard = mutex_lock(&tracked, SOURCE, "settle");
            if guard.generation == generation {
                guard.state = match &result {
                    Ok(outcome) => MutationState {
                        loading: false,
                        error: None,
                        data: Some(outcome.clone()),
                    },
                    Err(err) => MutationState {
                        loading: false,
                        error: Some(err.clone()),
                        data: None,
                    },
                };
            }
            result
        });

        task.await.unwrap_or_else(|err| {
            Err(DataError::network(format!("mutation task stopped: {err}")))
        })
    }

    /// Forget the last outcome. A call still in flight no longer reports here.
    pub fn reset(&self) {
        let mut tracked = mutex_lock(&self.tracked, SOURCE, "reset");
        tracked.generation += 1;
        tracked.state = MutationState::default();
    }
}
