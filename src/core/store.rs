//! Marker store - the single source of truth for visible marker state
//!
//! Holds the current marker set, loading/error flags, the active filter and the
//! runtime configuration. Observers register with [`MarkerStore::subscribe`]
//! and are notified after every mutation.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, trace};

use super::config::{Configuration, ZoomLevel};
use super::error::{ConfigError, FetchError};
use super::marker::{Filter, MarkerRecord};

/// What changed in the store
#[derive(Clone, Debug, PartialEq)]
pub enum StoreChange {
    Markers,
    Loading(bool),
    Error(Option<String>),
    Filter(Filter),
    Config,
    /// The shared "now" reference advanced
    Tick(DateTime<Utc>),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Subscriber = Box<dyn FnMut(&StoreChange) + Send>;

pub struct MarkerStore {
    markers: Vec<MarkerRecord>,
    is_loading: bool,
    error: Option<String>,
    filter: Filter,
    config: Configuration,
    now: DateTime<Utc>,
    subscribers: Vec<(SubscriptionId, Subscriber)>,
    next_subscription: u64,
}

impl MarkerStore {
    pub fn new(config: Configuration, now: DateTime<Utc>) -> Self {
        Self {
            markers: Vec::new(),
            is_loading: false,
            error: None,
            filter: Filter::All,
            config,
            now,
            subscribers: Vec::new(),
            next_subscription: 0,
        }
    }

    pub fn markers(&self) -> &[MarkerRecord] {
        &self.markers
    }

    pub fn is_loading(&self) -> bool {
        self.is_loading
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn filter(&self) -> &Filter {
        &self.filter
    }

    pub fn current_filter_name(&self) -> Option<&str> {
        self.filter.name()
    }

    pub fn config(&self) -> &Configuration {
        &self.config
    }

    /// Reference time for "last seen" labels, advanced by the refresh scheduler
    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    pub fn subscribe<F>(&mut self, callback: F) -> SubscriptionId
    where
        F: FnMut(&StoreChange) + Send + 'static,
    {
        let id = SubscriptionId(self.next_subscription);
        self.next_subscription += 1;
        self.subscribers.push((id, Box::new(callback)));
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|(sid, _)| *sid != id);
        before != self.subscribers.len()
    }

    fn notify(&mut self, change: StoreChange) {
        trace!(?change, subscribers = self.subscribers.len(), "Store changed");
        for (_, callback) in self.subscribers.iter_mut() {
            callback(&change);
        }
    }

    pub fn set_loading(&mut self, loading: bool) {
        if self.is_loading != loading {
            self.is_loading = loading;
            self.notify(StoreChange::Loading(loading));
        }
    }

    pub fn set_error(&mut self, error: Option<String>) {
        if self.error != error {
            self.error = error.clone();
            self.notify(StoreChange::Error(error));
        }
    }

    /// A fetch finished: merge the records under `filter`, clear error and loading.
    pub fn fetch_succeeded(&mut self, filter: &Filter, records: Vec<MarkerRecord>) {
        self.apply_snapshot(filter, records);
        self.set_error(None);
        self.set_loading(false);
    }

    /// A fetch failed. A failed named lookup clears the visible set; a failed
    /// all-markers fetch keeps the last good one.
    pub fn fetch_failed(&mut self, filter: &Filter, error: &FetchError) {
        self.set_error(Some(error.user_message()));
        self.set_loading(false);
        if !filter.is_all() && !self.markers.is_empty() {
            debug!(%filter, "Clearing markers after failed named lookup");
            self.markers.clear();
            self.notify(StoreChange::Markers);
        }
    }

    /// Replace the set from a snapshot. For `ByName` the whole set becomes the
    /// one matching record; for `All` the snapshot is the new set.
    pub fn apply_snapshot(&mut self, filter: &Filter, records: Vec<MarkerRecord>) {
        let next = match filter {
            Filter::All => dedupe_by_name(records),
            Filter::ByName(name) => {
                let mut records = records;
                let pos = records.iter().rposition(|r| &r.name == name);
                match pos {
                    Some(pos) => vec![records.swap_remove(pos)],
                    None => {
                        debug!(%filter, count = records.len(), "Snapshot has no matching record");
                        Vec::new()
                    }
                }
            }
        };

        if next != self.markers {
            self.markers = next;
            self.notify(StoreChange::Markers);
        }
    }

    /// Merge one incremental record: replace-one for `ByName`, upsert for `All`.
    pub fn apply_update(&mut self, filter: &Filter, record: MarkerRecord) {
        match filter {
            Filter::ByName(_) => {
                if self.markers.len() == 1 && self.markers[0] == record {
                    return;
                }
                self.markers = vec![record];
            }
            Filter::All => match self.markers.iter_mut().find(|m| m.name == record.name) {
                Some(existing) if *existing == record => return,
                Some(existing) => *existing = record,
                None => self.markers.push(record),
            },
        }
        self.notify(StoreChange::Markers);
    }

    /// Switch the filter. Narrowing to `ByName` drops every other record at once.
    pub fn set_filter(&mut self, filter: Filter) {
        if self.filter == filter {
            return;
        }
        self.filter = filter.clone();
        self.notify(StoreChange::Filter(filter.clone()));

        if let Filter::ByName(name) = &filter {
            let before = self.markers.len();
            self.markers.retain(|m| &m.name == name);
            if self.markers.len() != before {
                self.notify(StoreChange::Markers);
            }
        }
    }

    pub fn set_poll_interval(&mut self, interval: Duration) -> Result<(), ConfigError> {
        if interval.is_zero() {
            return Err(ConfigError::ZeroPollInterval);
        }
        if self.config.poll_interval != interval {
            self.config.poll_interval = interval;
            self.notify(StoreChange::Config);
        }
        Ok(())
    }

    pub fn set_zoom_level(&mut self, zoom_level: ZoomLevel) {
        if self.config.zoom_level != zoom_level {
            self.config.zoom_level = zoom_level;
            self.notify(StoreChange::Config);
        }
    }

    /// User toggle of free-roam
    pub fn set_free_roam(&mut self, enabled: bool) {
        let before = self.config.free_roam;
        self.config.free_roam.set_by_user(enabled);
        if before != self.config.free_roam {
            self.notify(StoreChange::Config);
        }
    }

    /// Force free-roam on because nothing is visible
    pub fn force_free_roam(&mut self) {
        if self.config.free_roam.force() {
            debug!("Free-roam auto-forced (no markers)");
            self.notify(StoreChange::Config);
        }
    }

    /// Drop an auto-forced free-roam, restoring the user's choice
    pub fn release_free_roam(&mut self) {
        if self.config.free_roam.release() {
            debug!(
                user_choice = self.config.free_roam.user_choice(),
                "Free-roam released (markers visible again)"
            );
            self.notify(StoreChange::Config);
        }
    }

    pub fn set_now(&mut self, now: DateTime<Utc>) {
        self.now = now;
        self.notify(StoreChange::Tick(now));
    }
}

/// Unique by name, last record wins, first-seen order kept
fn dedupe_by_name(records: Vec<MarkerRecord>) -> Vec<MarkerRecord> {
    let mut index: HashMap<String, usize> = HashMap::with_capacity(records.len());
    let mut out: Vec<MarkerRecord> = Vec::with_capacity(records.len());
    for record in records {
        match index.get(&record.name) {
            Some(&idx) => out[idx] = record,
            None => {
                index.insert(record.name.clone(), out.len());
                out.push(record);
            }
        }
    }
    out
}
