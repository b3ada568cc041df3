//! Per-call query options and the state a query reports.

use std::time::Duration;

use crate::cache::{CachedQuery, QueryData, SubscribeOptions};
use crate::error::DataError;

/// Options accepted by every query call. Unset durations fall back to the
/// cache configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryOptions {
    /// Skip the fetch entirely when false.
    pub enabled: bool,
    /// Reconcile this entry with backend push notifications.
    pub realtime: bool,
    /// How long a fetched result is served without refetching.
    pub stale_time: Option<Duration>,
    /// Grace window after the last handle is dropped.
    pub cache_time: Option<Duration>,
    /// Period of forced background refetches. `None` or zero disables.
    pub refetch_interval: Option<Duration>,
    pub refetch_on_window_focus: bool,
    pub refetch_on_mount: bool,
    /// Provider-call retries for transient failures.
    pub retry: Option<u32>,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            realtime: false,
            stale_time: None,
            cache_time: None,
            refetch_interval: None,
            refetch_on_window_focus: true,
            refetch_on_mount: true,
            retry: None,
        }
    }
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn realtime(mut self, realtime: bool) -> Self {
        self.realtime = realtime;
        self
    }

    pub fn stale_time(mut self, stale_time: Duration) -> Self {
        self.stale_time = Some(stale_time);
        self
    }

    pub fn cache_time(mut self, cache_time: Duration) -> Self {
        self.cache_time = Some(cache_time);
        self
    }

    pub fn refetch_interval(mut self, interval: Duration) -> Self {
        self.refetch_interval = Some(interval);
        self
    }

    pub fn refetch_on_window_focus(mut self, refetch: bool) -> Self {
        self.refetch_on_window_focus = refetch;
        self
    }

    pub fn refetch_on_mount(mut self, refetch: bool) -> Self {
        self.refetch_on_mount = refetch;
        self
    }

    pub fn retry(mut self, retries: u32) -> Self {
        self.retry = Some(retries);
        self
    }

    pub(crate) fn active_interval(&self) -> Option<Duration> {
        self.refetch_interval.filter(|interval| !interval.is_zero())
    }

    pub(crate) fn subscribe_options(&self) -> SubscribeOptions {
        SubscribeOptions {
            realtime: self.realtime,
            refetch_on_focus: self.refetch_on_window_focus,
            cache_time: self.cache_time,
            retry: self.retry,
        }
    }
}

/// What a query hook exposes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryState {
    pub data: Option<QueryData>,
    /// No data yet and a fetch is outstanding.
    pub loading: bool,
    pub error: Option<DataError>,
    /// Data is shown while a fetch is outstanding.
    pub refetching: bool,
}

impl QueryState {
    /// State of a disabled query.
    pub fn idle() -> Self {
        Self::default()
    }

    pub fn is_success(&self) -> bool {
        self.data.is_some() && self.error.is_none()
    }
}

impl From<CachedQuery> for QueryState {
    fn from(view: CachedQuery) -> Self {
        let has_data = view.data.is_some();
        Self {
            loading: view.is_fetching && !has_data,
            refetching: view.is_fetching && has_data,
            data: view.data,
            error: view.error,
        }
    }
}

#[cfg(test)]
mod tests {
    use tessera_types::Record;

    use super::*;

    fn view(data: Option<QueryData>, is_fetching: bool) -> CachedQuery {
        CachedQuery {
            data,
            error: None,
            fetched_at: None,
            is_fresh: false,
            is_invalidated: false,
            is_fetching,
            subscribers: 0,
        }
    }

    #[test]
    fn defaults_enable_mount_and_focus_refetch() {
        let options = QueryOptions::default();
        assert!(options.enabled);
        assert!(options.refetch_on_mount);
        assert!(options.refetch_on_window_focus);
        assert!(!options.realtime);
        assert_eq!(options.active_interval(), None);
    }

    #[test]
    fn zero_interval_is_disabled() {
        let options = QueryOptions::new().refetch_interval(Duration::ZERO);
        assert_eq!(options.active_interval(), None);
    }

    #[test]
    fn fetching_without_data_is_loading() {
        let state = QueryState::from(view(None, true));
        assert!(state.loading);
        assert!(!state.refetching);
    }

    #[test]
    fn fetching_with_data_is_refetching() {
        let data = QueryData::One(Record::new("r-1", "note", "A").into());
        let state = QueryState::from(view(Some(data), true));
        assert!(!state.loading);
        assert!(state.refetching);
        assert!(state.is_success());
    }
}
