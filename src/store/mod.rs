//! In-memory event store (deduplicated, insertion-ordered, optionally bounded).

use crate::event::Event;
use crate::filter::Filter;
use std::collections::{HashSet, VecDeque};
use tracing::debug;

/// Deduplicated, insertion-ordered collection of accepted events.
///
/// With a capacity bound the oldest events are evicted first (FIFO).
#[derive(Debug, Default)]
pub struct EventStore {
    events: VecDeque<Event>,
    ids: HashSet<String>,
    capacity: Option<usize>,
}

impl EventStore {
    /// Unbounded store
    pub fn new() -> Self {
        Self::default()
    }

    /// Store holding at most `capacity` events (`None` = unbounded)
    pub fn with_capacity(capacity: Option<usize>) -> Self {
        Self {
            capacity,
            ..Self::default()
        }
    }

    /// Append an event unless its id is already present.
    ///
    /// Returns `true` if the event was inserted. Membership check and insert
    /// happen in this one call; callers serialize access through the engine's
    /// lock.
    pub fn append(&mut self, event: Event) -> bool {
        if self.ids.contains(&event.id) {
            return false;
        }

        self.ids.insert(event.id.clone());
        self.events.push_back(event);

        if let Some(capacity) = self.capacity {
            while self.events.len() > capacity {
                if let Some(evicted) = self.events.pop_front() {
                    debug!(event_id = %evicted.id, "Evicting oldest event");
                    self.ids.remove(&evicted.id);
                }
            }
        }

        true
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    /// Iterate stored events oldest to newest
    pub fn iter(&self) -> impl Iterator<Item = &Event> {
        self.events.iter()
    }

    /// Historical query for a subscription.
    ///
    /// For each filter in order, scans oldest to newest and yields matches up
    /// to that filter's `limit`. An event already yielded for an earlier filter
    /// is skipped (and does not count toward the later filter's limit).
    pub fn query<'a>(&'a self, filters: &'a [Filter]) -> Replay<'a> {
        Replay {
            store: self,
            filters,
            filter_idx: 0,
            position: 0,
            remaining: filters.first().and_then(|f| f.limit),
            emitted: HashSet::new(),
        }
    }
}

/// Lazy, finite replay over an [`EventStore`], produced by [`EventStore::query`].
pub struct Replay<'a> {
    store: &'a EventStore,
    filters: &'a [Filter],
    filter_idx: usize,
    position: usize,
    remaining: Option<usize>,
    emitted: HashSet<&'a str>,
}

impl<'a> Replay<'a> {
    fn next_filter(&mut self) {
        self.filter_idx += 1;
        self.position = 0;
        self.remaining = self.filters.get(self.filter_idx).and_then(|f| f.limit);
    }
}

impl<'a> Iterator for Replay<'a> {
    type Item = &'a Event;

    fn next(&mut self) -> Option<Self::Item> {
        let (store, filters) = (self.store, self.filters);

        while let Some(filter) = filters.get(self.filter_idx) {
            if self.remaining == Some(0) || self.position >= store.events.len() {
                self.next_filter();
                continue;
            }

            let event = &store.events[self.position];
            self.position += 1;

            if filter.matches(event) && self.emitted.insert(event.id.as_str()) {
                if let Some(remaining) = self.remaining.as_mut() {
                    *remaining -= 1;
                }
                return Some(event);
            }
        }
        None
    }
}
