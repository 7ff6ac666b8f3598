//! Hand-written data model for flags, segments and users.
//!
//! The upstream SDK this crate is descended from generated these structs
//! from the [LaunchDarkly OpenAPI spec](https://github.com/launchdarkly/ld-openapi)
//! via a `build.rs` + `paperclip` pipeline. That pipeline needs an OpenAPI
//! `launchdarkly-defs.yaml` at build time, which isn't available here, so
//! this module hand-writes the subset of the schema the evaluator actually
//! reads, keeping the same field names and `#[serde(rename = "...")]`
//! camelCase convention the generated code used.

#![allow(dead_code)]

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A feature flag as distributed by the flag data source.
///
/// Immutable once read out of a [`Store`](crate::store::Store) — the
/// evaluator never mutates a flag it is handed.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct FeatureFlagState {
    pub key: String,
    pub version: u64,
    pub on: bool,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub variations: Vec<serde_json::Value>,
    #[serde(rename = "offVariation")]
    pub off_variation: Option<usize>,
    #[serde(default)]
    pub fallthrough: Fallthrough,
    #[serde(default)]
    pub prerequisites: Vec<Prerequisite>,
    #[serde(default)]
    pub targets: Vec<Target>,
    #[serde(default)]
    pub rules: Vec<Rule>,
    #[serde(default)]
    pub salt: String,
    #[serde(rename = "trackEvents", default)]
    pub track_events: bool,
    #[serde(rename = "trackEventsFallthrough", default)]
    pub track_events_fallthrough: bool,
}

/// A reusable audience definition: include/exclude lists plus rollout rules.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct Segment {
    pub key: String,
    pub version: u64,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub included: Vec<String>,
    #[serde(default)]
    pub excluded: Vec<String>,
    #[serde(default)]
    pub rules: Vec<SegmentRule>,
    #[serde(default)]
    pub salt: String,
}

/// A single rule inside a [`Segment`].
///
/// An absent `weight` means "always match when clauses pass"; a present
/// weight applies rollout-style bucketing against `[0, 1)`.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct SegmentRule {
    #[serde(default)]
    pub clauses: Vec<Clause>,
    pub weight: Option<u32>,
    #[serde(rename = "bucketBy")]
    pub bucket_by: Option<String>,
}

/// Either a fixed variation index or a weighted [`Rollout`].
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct Fallthrough {
    pub variation: Option<i64>,
    pub rollout: Option<Rollout>,
}

/// A weighted assignment of a `[0, 1)` bucket to variations.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct Rollout {
    #[serde(rename = "bucketBy")]
    pub bucket_by: Option<String>,
    pub variations: Option<Vec<WeightedVariation>>,
}

/// A single weighted arm of a [`Rollout`]. `weight` is a hundred-thousandth
/// (100000 == 100%).
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct WeightedVariation {
    pub variation: Option<i64>,
    pub weight: Option<u32>,
}

/// Direct `variation <- [userKey, ...]` binding inside a flag.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct Target {
    pub variation: Option<i64>,
    pub values: Option<Vec<String>>,
}

/// Another flag that must evaluate to a specific variation for this flag
/// to be considered "on".
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct Prerequisite {
    pub key: Option<String>,
    pub variation: Option<i64>,
}

/// A single targeting rule: matches a user iff all its clauses match.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct Rule {
    pub id: Option<String>,
    #[serde(default)]
    pub clauses: Vec<Clause>,
    pub variation: Option<i64>,
    pub rollout: Option<Rollout>,
}

/// A single predicate over a named user attribute.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct Clause {
    pub attribute: String,
    pub op: String,
    #[serde(default)]
    pub values: Vec<serde_json::Value>,
    #[serde(default)]
    pub negate: bool,
}

/// A string representation of a JSON value usable as a rollout bucketing
/// key: strings pass through, integer-*typed* numbers stringify in
/// canonical decimal form, everything else (float-typed numbers, bool,
/// array, object, null) has none.
///
/// The integer/float distinction is made on the number's serde type, not
/// its value: a float-typed `33.0` must still reject to `None` even
/// though it happens to have no fractional part, since a float attribute
/// is never bucketable regardless of what it's equal to.
///
/// User attributes are modeled as plain [`serde_json::Value`] rather than
/// a bespoke tagged enum — the flag data this crate already deserializes
/// (variations, clause operands) is `serde_json::Value`, so reusing it for
/// user attributes avoids a redundant conversion layer between two
/// differently-shaped "heterogeneous value" types.
pub fn bucketable_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => {
            if n.is_i64() {
                n.as_i64().map(|i| i.to_string())
            } else if n.is_u64() {
                n.as_u64().map(|u| u.to_string())
            } else {
                None
            }
        }
        _ => None,
    }
}

/// An evaluation context: the user being evaluated.
///
/// `secondary` deliberately has no reader among the built-in/custom
/// attribute lookups; it is only ever consumed directly by the rollout
/// bucketing step (see [`crate::evaluator`]).
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct User {
    pub key: String,
    pub secondary: Option<String>,
    pub ip: Option<String>,
    pub country: Option<String>,
    pub email: Option<String>,
    #[serde(rename = "firstName")]
    pub first_name: Option<String>,
    #[serde(rename = "lastName")]
    pub last_name: Option<String>,
    pub avatar: Option<String>,
    pub name: Option<String>,
    pub anonymous: Option<bool>,
    #[serde(default)]
    pub custom: HashMap<String, serde_json::Value>,
}

impl User {
    pub fn new<K: Into<String>>(key: K) -> Self {
        Self {
            key: key.into(),
            ..Default::default()
        }
    }

    /// Resolves a named attribute for clause matching and bucketing.
    ///
    /// `secondary` is excluded here: it is not matchable by clauses, per
    /// the evaluator's clause-matching contract.
    pub fn attribute(&self, name: &str) -> Option<serde_json::Value> {
        match name {
            "key" => Some(serde_json::Value::String(self.key.clone())),
            "secondary" => None,
            "ip" => self.ip.clone().map(serde_json::Value::String),
            "country" => self.country.clone().map(serde_json::Value::String),
            "email" => self.email.clone().map(serde_json::Value::String),
            "firstName" => self.first_name.clone().map(serde_json::Value::String),
            "lastName" => self.last_name.clone().map(serde_json::Value::String),
            "avatar" => self.avatar.clone().map(serde_json::Value::String),
            "name" => self.name.clone().map(serde_json::Value::String),
            "anonymous" => self.anonymous.map(serde_json::Value::Bool),
            other => self.custom.get(other).cloned(),
        }
    }
}
