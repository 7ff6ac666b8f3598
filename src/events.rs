//! Event types emitted by the evaluator and client, and the sink they are
//! dispatched to.
//!
//! The HTTP dispatch pipeline itself lives outside this crate; this
//! module only defines the wire-adjacent event shapes and a `Sink` trait a
//! caller can implement to plug one in, mirroring the
//! exposure-hook pattern used by this pack's adjacent `loom-flags`
//! analytics integration (`AnalyticsHook` / `on_flag_evaluated`).

use crate::{evaluator::Reason, models::User};
use serde::Serialize;
use std::collections::HashMap;

/// A single feature-flag evaluation event.
///
/// Emitted once per top-level `evaluate` call, and once per prerequisite
/// flag visited along the way (with `prereq_of` set).
#[derive(Clone, Debug, Serialize)]
pub struct FeatureEvent {
    pub kind: &'static str,
    pub key: String,
    pub user: User,
    pub value: serde_json::Value,
    pub variation: Option<usize>,
    pub default: serde_json::Value,
    pub version: Option<u64>,
    #[serde(rename = "prereqOf", skip_serializing_if = "Option::is_none")]
    pub prereq_of: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<Reason>,
    #[serde(rename = "creationDate")]
    pub creation_date: i64,
}

/// Emitted when a user is seen for the first time by the caller (e.g. on
/// identify); conceptually resets dedup in the noticed-users cache.
#[derive(Clone, Debug, Serialize)]
pub struct IdentifyEvent {
    pub kind: &'static str,
    pub key: String,
    #[serde(rename = "creationDate")]
    pub creation_date: i64,
    pub user: User,
}

/// A caller-tracked custom analytics event.
#[derive(Clone, Debug, Serialize)]
pub struct CustomEvent {
    pub kind: &'static str,
    pub key: String,
    #[serde(rename = "creationDate")]
    pub creation_date: i64,
    pub user: User,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(rename = "metricValue", skip_serializing_if = "Option::is_none")]
    pub metric_value: Option<f64>,
}

/// Wire form of a [`Summarizer`](crate::summarizer::Summarizer) snapshot.
#[derive(Clone, Debug, Serialize)]
pub struct SummaryEvent {
    pub kind: &'static str,
    #[serde(rename = "startDate")]
    pub start_date: i64,
    #[serde(rename = "endDate")]
    pub end_date: i64,
    pub features: HashMap<String, FeatureSummary>,
}

#[derive(Clone, Debug, Serialize)]
pub struct FeatureSummary {
    pub default: serde_json::Value,
    pub counters: Vec<VariationCounter>,
}

#[derive(Clone, Debug, Serialize)]
pub struct VariationCounter {
    pub count: u64,
    pub value: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variation: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unknown: Option<bool>,
}

/// Any event that can reach an event sink.
#[derive(Clone, Debug)]
pub enum Event {
    Feature(FeatureEvent),
    Identify(IdentifyEvent),
    Custom(CustomEvent),
    Summary(SummaryEvent),
}

/// Receives events for eventual dispatch to the analytics endpoint.
///
/// Implementations should be fast and non-blocking, queueing work for a
/// background task rather than making the evaluation path wait on a
/// network call.
pub trait Sink: Send + Sync {
    fn send(&self, event: Event);
}

impl<T: Sink + ?Sized> Sink for std::sync::Arc<T> {
    fn send(&self, event: Event) {
        self.as_ref().send(event)
    }
}

/// A sink that discards all events; the default when no real dispatcher
/// is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl Sink for NoopSink {
    fn send(&self, _event: Event) {}
}
