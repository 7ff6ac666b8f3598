//! Aggregates feature evaluation events into per-(flag,variation,version)
//! counters bounded by a time window, and dedups noticed users via an
//! [`LruCache`].
//!
//! The summarizer itself is not thread-safe: callers either run it
//! behind a mutex or own it from a single consumer task. See
//! [`crate::lib`]'s `DefaultClient`, which wraps one in a `tokio::sync::Mutex`.

use crate::{events::FeatureEvent, lru::LruCache};
use std::collections::HashMap;

/// Composite key a feature evaluation event is aggregated under.
///
/// Either of `variation`/`version` may be absent, representing "unknown
/// flag" (e.g. the flag wasn't found at evaluation time).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct CounterKey {
    flag_key: String,
    variation: Option<usize>,
    version: Option<u64>,
}

/// A single counter: how many times this (flag, variation, version) combo
/// was observed, plus the value/default seen on first occurrence.
#[derive(Clone, Debug)]
struct Counter {
    count: u64,
    value: serde_json::Value,
    default: serde_json::Value,
}

/// A point-in-time capture of summarizer state, produced by
/// [`Summarizer::snapshot`].
#[derive(Clone, Debug, Default)]
pub struct Snapshot {
    start_date: i64,
    end_date: i64,
    counters: HashMap<CounterKey, CounterSnapshot>,
}

#[derive(Clone, Debug)]
struct CounterSnapshot {
    count: u64,
    value: serde_json::Value,
    default: serde_json::Value,
}

impl Snapshot {
    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    /// Transforms this snapshot into the wire-format summary event.
    pub fn output(&self) -> crate::events::SummaryEvent {
        use crate::events::{FeatureSummary, SummaryEvent, VariationCounter};

        let mut features: HashMap<String, FeatureSummary> = HashMap::new();
        for (key, counter) in &self.counters {
            let entry = features.entry(key.flag_key.clone()).or_insert_with(|| FeatureSummary {
                default: counter.default.clone(),
                counters: Vec::new(),
            });
            entry.counters.push(VariationCounter {
                count: counter.count,
                value: counter.value.clone(),
                version: key.version,
                variation: key.variation,
                unknown: if key.version.is_none() { Some(true) } else { None },
            });
        }

        SummaryEvent {
            kind: "summary",
            start_date: self.start_date,
            end_date: self.end_date,
            features,
        }
    }
}

/// Owns summarizer state: the time-bounded counter map plus the
/// noticed-users dedup cache.
pub struct Summarizer {
    start_date: i64,
    end_date: i64,
    counters: HashMap<CounterKey, Counter>,
    noticed_users: LruCache<String, ()>,
}

impl Summarizer {
    /// Creates a summarizer whose noticed-users cache holds at most
    /// `user_cache_capacity` keys.
    pub fn new(user_cache_capacity: usize) -> Self {
        Self {
            start_date: 0,
            end_date: 0,
            counters: HashMap::new(),
            noticed_users: LruCache::new(user_cache_capacity),
        }
    }

    /// Records that `user_key` has been seen, for event-dedup purposes.
    ///
    /// Returns `false` without mutating state if `user_key` is empty
    /// (modeling a user with no key, i.e. an unspecified user). Otherwise
    /// inserts/promotes the key and returns `true` if it was already
    /// present (a dedup hit), `false` if newly added.
    pub fn notice_user(&mut self, user_key: &str) -> bool {
        if user_key.is_empty() {
            return false;
        }
        self.noticed_users.put(user_key.to_string(), ())
    }

    /// Folds a feature evaluation event into the counters.
    ///
    /// No-op for anything that isn't a feature event at the call site —
    /// callers only invoke this for `FeatureEvent`s, so the
    /// `event.kind == "feature"` distinction is encoded by the parameter
    /// type rather than a runtime tag comparison.
    pub fn summarize_event(&mut self, event: &FeatureEvent) {
        let key = CounterKey {
            flag_key: event.key.clone(),
            variation: event.variation,
            version: event.version,
        };

        self.counters
            .entry(key)
            .and_modify(|c| c.count += 1)
            .or_insert_with(|| Counter {
                count: 1,
                value: event.value.clone(),
                default: event.default.clone(),
            });

        if self.start_date == 0 || event.creation_date < self.start_date {
            self.start_date = event.creation_date;
        }
        if event.creation_date > self.end_date {
            self.end_date = event.creation_date;
        }
    }

    /// Atomically captures and resets counters/dates to empty/zero.
    ///
    /// Does not touch the noticed-users cache, which has its own
    /// capacity-driven lifecycle independent of the summary window.
    pub fn snapshot(&mut self) -> Snapshot {
        let snapshot = Snapshot {
            start_date: self.start_date,
            end_date: self.end_date,
            counters: std::mem::take(&mut self.counters)
                .into_iter()
                .map(|(k, v)| {
                    (
                        k,
                        CounterSnapshot {
                            count: v.count,
                            value: v.value,
                            default: v.default,
                        },
                    )
                })
                .collect(),
        };
        self.start_date = 0;
        self.end_date = 0;
        snapshot
    }
}
