//! Cache entry state and the read-only views handed out by the store.

use std::time::Duration;

use futures::future::{BoxFuture, Shared};
use tessera_types::{Entity, EntityId};
use tokio::sync::watch;
use tokio::time::Instant;

use crate::error::DataError;

/// Result slot payload: a single item or a list.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryData {
    One(Entity),
    Many(Vec<Entity>),
}

impl QueryData {
    pub fn as_one(&self) -> Option<&Entity> {
        match self {
            QueryData::One(entity) => Some(entity),
            QueryData::Many(_) => None,
        }
    }

    pub fn as_many(&self) -> Option<&[Entity]> {
        match self {
            QueryData::One(_) => None,
            QueryData::Many(entities) => Some(entities),
        }
    }

    pub fn ids(&self) -> Vec<&EntityId> {
        match self {
            QueryData::One(entity) => vec![entity.id()],
            QueryData::Many(entities) => entities.iter().map(Entity::id).collect(),
        }
    }
}

/// What a projection does to the data of one entry.
#[derive(Debug, Clone, PartialEq)]
pub enum DataUpdate {
    Keep,
    Set(QueryData),
    Clear,
}

pub type FetchResult = Result<QueryData, DataError>;

/// Handle to an outstanding provider call; every clone resolves to the same result.
pub type FetchFuture = Shared<BoxFuture<'static, FetchResult>>;

/// Identifies one fetch against the entry generation it was started for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchTicket {
    pub(crate) generation: u64,
    pub(crate) fetch_id: u64,
}

/// Point-in-time view of an entry.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedQuery {
    pub data: Option<QueryData>,
    pub error: Option<DataError>,
    pub fetched_at: Option<Instant>,
    pub is_fresh: bool,
    pub is_invalidated: bool,
    pub is_fetching: bool,
    pub subscribers: usize,
}

/// Everything a rollback needs to put a slot back exactly as it was.
#[derive(Debug, Clone, PartialEq)]
pub struct SlotState {
    pub(crate) data: Option<QueryData>,
    pub(crate) error: Option<DataError>,
    pub(crate) fetched_at: Option<Instant>,
    pub(crate) stale_after: Option<Instant>,
    pub(crate) invalidated: bool,
}

impl SlotState {
    pub fn data(&self) -> Option<&QueryData> {
        self.data.as_ref()
    }
}

/// Interest registered on an entry by its live subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryFlags {
    pub subscribers: usize,
    pub realtime: bool,
    pub refetch_on_focus: bool,
    pub is_fresh: bool,
}

pub(crate) struct CacheEntry {
    pub(crate) data: Option<QueryData>,
    pub(crate) error: Option<DataError>,
    pub(crate) fetched_at: Option<Instant>,
    pub(crate) stale_after: Option<Instant>,
    pub(crate) stale_time: Duration,
    pub(crate) invalidated: bool,
    pub(crate) generation: u64,
    pub(crate) subscribers: usize,
    pub(crate) realtime: usize,
    pub(crate) refetch_on_focus: usize,
    pub(crate) cache_time: Option<Duration>,
    pub(crate) retry: Option<u32>,
    pub(crate) unreferenced_since: Option<Instant>,
    pub(crate) in_flight: Option<(u64, FetchFuture)>,
    pub(crate) notify: watch::Sender<u64>,
}

impl CacheEntry {
    pub(crate) fn new(now: Instant) -> Self {
        let (notify, _) = watch::channel(0);
        Self {
            data: None,
            error: None,
            fetched_at: None,
            stale_after: None,
            stale_time: Duration::ZERO,
            invalidated: false,
            generation: 0,
            subscribers: 0,
            realtime: 0,
            refetch_on_focus: 0,
            cache_time: None,
            retry: None,
            unreferenced_since: Some(now),
            in_flight: None,
            notify,
        }
    }

    pub(crate) fn is_fresh(&self, now: Instant) -> bool {
        !self.invalidated
            && self.data.is_some()
            && self.stale_after.is_some_and(|stale_after| now < stale_after)
    }

    /// Pinned entries are never evicted or collected.
    pub(crate) fn is_pinned(&self) -> bool {
        self.subscribers > 0 || self.in_flight.is_some()
    }

    pub(crate) fn is_collectable(&self, now: Instant, default_grace: Duration) -> bool {
        if self.is_pinned() {
            return false;
        }
        let grace = self.cache_time.unwrap_or(default_grace);
        self.unreferenced_since
            .is_some_and(|since| now.saturating_duration_since(since) >= grace)
    }

    /// Wake every subscription watching this entry.
    pub(crate) fn touch(&self) {
        self.notify.send_modify(|version| *version = version.wrapping_add(1));
    }

    pub(crate) fn view(&self, now: Instant) -> CachedQuery {
        CachedQuery {
            data: self.data.clone(),
            error: self.error.clone(),
            fetched_at: self.fetched_at,
            is_fresh: self.is_fresh(now),
            is_invalidated: self.invalidated,
            is_fetching: self.in_flight.is_some(),
            subscribers: self.subscribers,
        }
    }

    pub(crate) fn flags(&self, now: Instant) -> EntryFlags {
        EntryFlags {
            subscribers: self.subscribers,
            realtime: self.realtime > 0,
            refetch_on_focus: self.refetch_on_focus > 0,
            is_fresh: self.is_fresh(now),
        }
    }

    pub(crate) fn slot_state(&self) -> SlotState {
        SlotState {
            data: self.data.clone(),
            error: self.error.clone(),
            fetched_at: self.fetched_at,
            stale_after: self.stale_after,
            invalidated: self.invalidated,
        }
    }

    pub(crate) fn restore(&mut self, state: SlotState) {
        self.data = state.data;
        self.error = state.error;
        self.fetched_at = state.fetched_at;
        self.stale_after = state.stale_after;
        self.invalidated = state.invalidated;
    }

    /// Reset to the empty state a never-fetched entry has.
    pub(crate) fn reset(&mut self) {
        self.data = None;
        self.error = None;
        self.fetched_at = None;
        self.stale_after = None;
        self.invalidated = false;
    }
}
