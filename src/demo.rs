//! Scripted walk through the optimistic update, rollback, stale-while-error and
//! realtime paths against the in-memory provider.

use std::sync::Arc;
use std::time::Duration;

use tessera_types::{Category, Entity, Filter, Record};
use tracing::info;

use crate::cache::CacheConfig;
use crate::client::QueryClient;
use crate::config::DemoArgs;
use crate::error::DataError;
use crate::mutation::{MutationOptions, Projection, WriteArgs};
use crate::provider::{MemoryProvider, Operation};
use crate::query::{QueryHandle, QueryOptions, QueryState};

const STEP_TIMEOUT: Duration = Duration::from_secs(10);

/// What each step of the scenario observed.
#[derive(Debug, Clone, PartialEq)]
pub struct DemoReport {
    pub initial: Vec<String>,
    pub optimistic: Vec<String>,
    pub confirmed: Vec<String>,
    pub rolled_back: Vec<String>,
    pub rollback_error: Option<DataError>,
    pub stale_while_error: Vec<String>,
    pub refetch_error: Option<DataError>,
    pub after_push: Vec<String>,
}

impl DemoReport {
    pub fn log(&self) {
        info!(items = ?self.initial, "Initial draft list");
        info!(items = ?self.optimistic, "Optimistic create visible before the write settled");
        info!(items = ?self.confirmed, "Authoritative list after the cascade refetch");
        info!(
            items = ?self.rolled_back,
            error = ?self.rollback_error,
            "Rejected create rolled back"
        );
        info!(
            items = ?self.stale_while_error,
            error = ?self.refetch_error,
            "Last good data kept while the backend is unreachable"
        );
        info!(items = ?self.after_push, "List after a remote change was pushed");
    }
}

fn draft(id: impl Into<String>, title: impl Into<String>) -> Entity {
    let id: String = id.into();
    Record::new(id, "note", title).with_status("draft").into()
}

fn ids(state: &QueryState) -> Vec<String> {
    state
        .data
        .as_ref()
        .map(|data| data.ids().iter().map(|id| id.as_str().to_string()).collect())
        .unwrap_or_default()
}

async fn wait_for_item(handle: &mut QueryHandle, id: &str) -> Result<Vec<String>, DataError> {
    let waiting = async {
        loop {
            let current = ids(&handle.state());
            if current.iter().any(|item| item == id) {
                return Ok(current);
            }
            if !handle.changed().await {
                return Err(DataError::configuration("watched entry disappeared"));
            }
        }
    };
    tokio::time::timeout(STEP_TIMEOUT, waiting)
        .await
        .map_err(|_| DataError::timeout(format!("waiting for `{id}`")))?
}

pub async fn run(config: &CacheConfig, args: &DemoArgs) -> Result<DemoReport, DataError> {
    let provider = Arc::new(
        MemoryProvider::named("demo")
            .with_latency(Duration::from_millis(args.latency_ms))
            .with_push(),
    );
    provider.seed((1..=args.seed_records).map(|n| draft(format!("r-{n}"), format!("Draft {n}"))));

    let client = QueryClient::new(config);
    let _binding = client.bind(provider.clone());

    let drafts = Filter::new().with_status("draft");
    let options = QueryOptions::new()
        .realtime(true)
        .stale_time(Duration::from_secs(30))
        .retry(0);
    let mut handle = client.watch(Category::Record, drafts, options)?;
    let initial = ids(&handle.settled().await);

    let mutation = client.mutation(Category::Record, MutationOptions::new());
    let created = draft("r-new", "Written optimistically");
    let pending = tokio::spawn({
        let mutation = mutation.clone();
        let created = created.clone();
        async move {
            mutation
                .mutate_with(
                    WriteArgs::Create(created.clone()),
                    MutationOptions::new().optimistic(Projection::insert(created)),
                )
                .await
        }
    });
    let optimistic = wait_for_item(&mut handle, "r-new").await?;
    pending
        .await
        .map_err(|err| DataError::network(format!("mutation task stopped: {err}")))??;
    let confirmed = ids(&handle.settled().await);

    provider.fail_next(
        Operation::Create,
        DataError::validation("title rejected by backend"),
    );
    let rejected = draft("r-bad", "Rejected");
    let rollback_error = mutation
        .mutate_with(
            WriteArgs::Create(rejected.clone()),
            MutationOptions::new().optimistic(Projection::insert(rejected)),
        )
        .await
        .err();
    let rolled_back = ids(&handle.state());

    provider.fail_always(Operation::List, DataError::network("backend unreachable"));
    let refetched = handle.refetch().await?;
    provider.clear_failures();

    provider.insert_remote(draft("r-remote", "Pushed by another client"));
    let after_push = wait_for_item(&mut handle, "r-remote").await?;

    Ok(DemoReport {
        initial,
        optimistic,
        confirmed,
        rolled_back,
        rollback_error,
        stale_while_error: ids(&refetched),
        refetch_error: refetched.error,
        after_push,
    })
}
