//! Subscription filters and the matching predicate.
//!
//! A filter is decoded from its wire object once, at the protocol boundary.
//! Tag criteria arrive as `"#<name>": [values]` keys; the `#` marker is
//! stripped here and never carried internally.

use crate::event::Event;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};


/// Marker prefix for tag criteria keys on the wire
const TAG_MARKER: char = '#';

/// Nostr subscription filter
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    /// Event id prefixes (OR)
    pub ids: Option<Vec<String>>,

    /// Author pubkey prefixes (OR)
    pub authors: Option<Vec<String>>,

    /// Event kinds (exact membership)
    pub kinds: Option<BTreeSet<u64>>,

    /// Tag name -> allowed values. Names are ANDed, values ORed.
    pub tag_criteria: BTreeMap<String, BTreeSet<String>>,

    /// Inclusive lower bound on `created_at`
    pub since: Option<i64>,

    /// Inclusive upper bound on `created_at`
    pub until: Option<i64>,

    /// Maximum number of stored events replayed for this filter
    pub limit: Option<usize>,

    /// A criterion list was non-empty on the wire but held no usable entries
    /// (e.g. `"kinds": [-1]`). Such a filter matches nothing.
    pub unsatisfiable: bool,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode a wire filter object.
    ///
    /// Returns `None` for anything that is not a JSON object. Unknown keys are
    /// ignored and known keys with the wrong type are treated as absent.
    pub fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        let mut filter = Filter {
            ids: string_list(obj.get("ids")),
            authors: string_list(obj.get("authors")),
            kinds: obj
                .get("kinds")
                .and_then(Value::as_array)
                .map(|arr| arr.iter().filter_map(Value::as_u64).collect()),
            since: obj.get("since").and_then(Value::as_i64),
            until: obj.get("until").and_then(Value::as_i64),
            limit: obj
                .get("limit")
                .and_then(Value::as_u64)
                .map(|n| n as usize),
            ..Filter::default()
        };

        filter.unsatisfiable = lost_entries(obj.get("ids"), filter.ids.as_ref().map(Vec::len))
            || lost_entries(obj.get("authors"), filter.authors.as_ref().map(Vec::len))
            || lost_entries(obj.get("kinds"), filter.kinds.as_ref().map(BTreeSet::len));

        for (key, values) in obj {
            let Some(name) = key.strip_prefix(TAG_MARKER) else {
                continue;
            };
            if name.is_empty() {
                continue;
            }
            if let Some(decoded) = string_list(Some(values)) {
                if lost_entries(Some(values), Some(decoded.len())) {
                    filter.unsatisfiable = true;
                }
                filter
                    .tag_criteria
                    .insert(name.to_string(), decoded.into_iter().collect());
            }
        }

        Some(filter)
    }

    /// Encode back into wire form (used for upstream REQs).
    pub fn to_value(&self) -> Value {
        let mut obj = Map::new();
        if let Some(ids) = &self.ids {
            obj.insert("ids".into(), Value::from(ids.clone()));
        }
        if let Some(authors) = &self.authors {
            obj.insert("authors".into(), Value::from(authors.clone()));
        }
        if let Some(kinds) = &self.kinds {
            obj.insert(
                "kinds".into(),
                Value::from(kinds.iter().copied().collect::<Vec<_>>()),
            );
        }
        for (name, values) in &self.tag_criteria {
            obj.insert(
                format!("{}{}", TAG_MARKER, name),
                Value::from(values.iter().cloned().collect::<Vec<_>>()),
            );
        }
        if let Some(since) = self.since {
            obj.insert("since".into(), Value::from(since));
        }
        if let Some(until) = self.until {
            obj.insert("until".into(), Value::from(until));
        }
        if let Some(limit) = self.limit {
            obj.insert("limit".into(), Value::from(limit));
        }
        Value::Object(obj)
    }

    /// Check if an event matches this filter.
    ///
    /// Every present criterion must hold. Empty `ids`/`authors`/`kinds` lists
    /// and empty tag value sets count as absent; lists whose entries were all
    /// of the wrong type match nothing.
    pub fn matches(&self, event: &Event) -> bool {
        if self.unsatisfiable {
            return false;
        }

        if let Some(ids) = self.ids.as_ref().filter(|ids| !ids.is_empty()) {
            if !ids.iter().any(|prefix| event.id.starts_with(prefix.as_str())) {
                return false;
            }
        }

        if let Some(authors) = self.authors.as_ref().filter(|a| !a.is_empty()) {
            if !authors
                .iter()
                .any(|prefix| event.pubkey.starts_with(prefix.as_str()))
            {
                return false;
            }
        }

        if let Some(kinds) = self.kinds.as_ref().filter(|k| !k.is_empty()) {
            if !kinds.contains(&event.kind) {
                return false;
            }
        }

        for (name, values) in &self.tag_criteria {
            if values.is_empty() {
                continue;
            }
            let has_match = event.tags.iter().any(|tag| {
                tag.first() == Some(name) && tag.get(1).map_or(false, |v| values.contains(v))
            });
            if !has_match {
                return false;
            }
        }

        if let Some(since) = self.since {
            if event.created_at < since {
                return false;
            }
        }

        if let Some(until) = self.until {
            if event.created_at > until {
                return false;
            }
        }

        true
    }

    /// Copy tag criteria between two names when only one of them is present,
    /// so both naming conventions match the same events.
    pub fn with_tag_alias(mut self, a: &str, b: &str) -> Self {
        match (
            self.tag_criteria.get(a).cloned(),
            self.tag_criteria.get(b).cloned(),
        ) {
            (Some(values), None) => {
                self.tag_criteria.insert(b.to_string(), values);
            }
            (None, Some(values)) => {
                self.tag_criteria.insert(a.to_string(), values);
            }
            _ => {}
        }
        self
    }
}

/// True if any filter in the list matches the event.
pub fn matches_any(filters: &[Filter], event: &Event) -> bool {
    filters.iter().any(|filter| filter.matches(event))
}

/// True if the wire value was a non-empty array but nothing survived decoding
fn lost_entries(wire: Option<&Value>, decoded: Option<usize>) -> bool {
    let sent = wire.and_then(Value::as_array).map_or(0, Vec::len);
    sent > 0 && decoded == Some(0)
}

fn string_list(value: Option<&Value>) -> Option<Vec<String>> {
    value.and_then(Value::as_array).map(|arr| {
        arr.iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect()
    })
}
