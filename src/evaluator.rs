//! Flag evaluation: walks prerequisites, targets, rules and the
//! fallthrough path for a single flag against a single user, per the
//! usual LaunchDarkly-style evaluation order.
//!
//! Every evaluation is total — a malformed flag, a missing flag, an
//! uninitialized store, or an unspecified user all resolve to an `ERROR`
//! [`Reason`] plus the caller-supplied default, never a panic or a
//! `Result::Err` bubbling out of [`Evaluator::evaluate`] itself. The
//! typed convenience accessors on [`Evaluate`] are where a `Result`
//! reappears, for callers that just want a `bool`/`String`/etc. and a
//! type mismatch to be reportable.

use crate::{
    models::{bucketable_string, Clause, FeatureFlagState, Rollout, Segment, User},
    store::Store,
};
use hex::ToHex;
use serde::Serialize;
use sha1::{Digest, Sha1};
use std::collections::HashSet;
use std::ops::Div;

const BUCKET_DIVIDER: f64 = 0xFFFFFFFFFFFFFFFu64 as f64;

/// Why an evaluation produced the result it did.
///
/// Serialized with an internally-tagged `kind` field matching the shape
/// analytics events carry upstream.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind")]
pub enum Reason {
    #[serde(rename = "OFF")]
    Off,
    #[serde(rename = "TARGET_MATCH")]
    TargetMatch,
    #[serde(rename = "RULE_MATCH")]
    RuleMatch {
        #[serde(rename = "ruleIndex")]
        rule_index: usize,
        #[serde(rename = "ruleId")]
        rule_id: Option<String>,
    },
    #[serde(rename = "FALLTHROUGH")]
    Fallthrough,
    #[serde(rename = "PREREQUISITE_FAILED")]
    PrerequisiteFailed {
        #[serde(rename = "prerequisiteKey")]
        prereq_key: String,
    },
    #[serde(rename = "ERROR")]
    Error {
        #[serde(rename = "errorKind")]
        error_kind: ErrorKind,
    },
}

impl Reason {
    pub fn is_error(&self) -> bool {
        matches!(self, Reason::Error { .. })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    #[serde(rename = "CLIENT_NOT_READY")]
    ClientNotReady,
    #[serde(rename = "FLAG_NOT_FOUND")]
    FlagNotFound,
    #[serde(rename = "MALFORMED_FLAG")]
    MalformedFlag,
    #[serde(rename = "USER_NOT_SPECIFIED")]
    UserNotSpecified,
    #[serde(rename = "WRONG_TYPE")]
    WrongType,
    /// Reserved for a fallible [`crate::store::Store`] adapter surfacing a
    /// read failure. The in-memory store this crate ships is infallible,
    /// so nothing here ever constructs this variant, but it stays part of
    /// the taxonomy for implementors of other store backends.
    #[serde(rename = "EXCEPTION")]
    Exception,
}

/// Error returned by the typed convenience accessors (`bool_variation`
/// etc.) when the evaluated value isn't the requested shape. The
/// evaluator itself never returns this — see [`Reason::Error`] instead.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("evaluation returned a value of the wrong type")]
    WrongType,
}

/// The full outcome of one `evaluate` call: the selected value, the
/// variation index it came from (if any), the resolved flag's version
/// (if the flag was found at all), and the reason.
#[derive(Clone, Debug, PartialEq)]
pub struct EvalResult {
    pub value: serde_json::Value,
    pub variation: Option<usize>,
    pub version: Option<u64>,
    pub reason: Reason,
}

impl EvalResult {
    fn error(kind: ErrorKind) -> Self {
        Self {
            value: serde_json::Value::Null,
            variation: None,
            version: None,
            reason: Reason::Error { error_kind: kind },
        }
    }
}

/// A record of one prerequisite flag visited while evaluating another
/// flag, independent of whether the prerequisite was satisfied. Callers
/// fold these into [`crate::summarizer::Summarizer`] alongside the
/// top-level event they construct themselves.
#[derive(Clone, Debug)]
pub struct PrereqEvent {
    pub key: String,
    pub value: serde_json::Value,
    pub variation: Option<usize>,
    pub version: u64,
    pub prereq_of: String,
    pub reason: Reason,
}

/// Evaluates flags by reading from a [`Store`] and running the flag
/// evaluation algorithm against it.
pub struct Evaluator<S> {
    store: S,
}

impl<S: Store> Evaluator<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Evaluates `flag_key` for `user`, returning the full result plus any
    /// prerequisite-flag events observed along the way.
    ///
    /// `default` is substituted whenever the reason is an error — there is
    /// no other way for the caller to get a value back in that case, since
    /// the evaluator itself is total and never raises.
    pub fn evaluate(
        &self,
        flag_key: &str,
        user: &User,
        default: serde_json::Value,
    ) -> (EvalResult, Vec<PrereqEvent>) {
        if user.key.is_empty() {
            return (EvalResult::error(ErrorKind::UserNotSpecified), Vec::new());
        }
        if !self.store.initialized() {
            return (EvalResult::error(ErrorKind::ClientNotReady), Vec::new());
        }
        let flag = match self.store.flag(flag_key) {
            Some(f) => f,
            None => return (EvalResult::error(ErrorKind::FlagNotFound), Vec::new()),
        };

        let mut visited = HashSet::new();
        let mut prereq_events = Vec::new();
        let mut outcome = eval_with_visited(&flag, user, &self.store, &mut visited, &mut prereq_events);
        if outcome.reason.is_error() {
            outcome.value = default;
        }
        (outcome, prereq_events)
    }
}

/// Recursion guard that turns a prerequisite cycle into a
/// `MALFORMED_FLAG` error instead of a stack overflow.
fn eval_with_visited<S: Store>(
    flag: &FeatureFlagState,
    user: &User,
    store: &S,
    visited: &mut HashSet<String>,
    prereq_events: &mut Vec<PrereqEvent>,
) -> EvalResult {
    if !visited.insert(flag.key.clone()) {
        return EvalResult::error(ErrorKind::MalformedFlag);
    }
    let result = eval_body(flag, user, store, visited, prereq_events);
    visited.remove(&flag.key);
    result
}

fn eval_body<S: Store>(
    flag: &FeatureFlagState,
    user: &User,
    store: &S,
    visited: &mut HashSet<String>,
    prereq_events: &mut Vec<PrereqEvent>,
) -> EvalResult {
    if !flag.on {
        return off_result(flag, Reason::Off);
    }

    if let Some(failed) = check_prerequisites(flag, user, store, visited, prereq_events) {
        return match failed {
            Ok(key) => off_result(flag, Reason::PrerequisiteFailed { prereq_key: key }),
            Err(()) => EvalResult::error(ErrorKind::MalformedFlag),
        };
    }

    if let Some(target_variation) = match_targets(flag, user) {
        return match target_variation {
            Ok(idx) => variation_result(flag, idx, Reason::TargetMatch),
            Err(()) => EvalResult::error(ErrorKind::MalformedFlag),
        };
    }

    for (index, rule) in flag.rules.iter().enumerate() {
        if rule.clauses.iter().all(|c| clause_matches(c, user, store)) {
            return match resolve_variation_or_rollout(flag, rule.variation, rule.rollout.as_ref(), user) {
                Ok(idx) => variation_result(
                    flag,
                    idx,
                    Reason::RuleMatch {
                        rule_index: index,
                        rule_id: rule.id.clone(),
                    },
                ),
                Err(()) => EvalResult::error(ErrorKind::MalformedFlag),
            };
        }
    }

    match resolve_variation_or_rollout(
        flag,
        flag.fallthrough.variation,
        flag.fallthrough.rollout.as_ref(),
        user,
    ) {
        Ok(idx) => variation_result(flag, idx, Reason::Fallthrough),
        Err(()) => EvalResult::error(ErrorKind::MalformedFlag),
    }
}

/// Returns `None` if all prerequisites are satisfied, `Some(Ok(key))` if
/// the named prerequisite failed (non-error, off path), or `Some(Err(()))`
/// if one of the flag's own prerequisite records is malformed.
fn check_prerequisites<S: Store>(
    flag: &FeatureFlagState,
    user: &User,
    store: &S,
    visited: &mut HashSet<String>,
    prereq_events: &mut Vec<PrereqEvent>,
) -> Option<Result<String, ()>> {
    for prereq in &flag.prerequisites {
        let key = match &prereq.key {
            Some(k) => k,
            None => return Some(Err(())),
        };
        let expected = match prereq.variation {
            Some(v) if v >= 0 => v as usize,
            _ => return Some(Err(())),
        };

        let prereq_flag = match store.flag(key) {
            Some(f) => f,
            None => return Some(Ok(key.clone())),
        };

        let outcome = eval_with_visited(&prereq_flag, user, store, visited, prereq_events);
        prereq_events.push(PrereqEvent {
            key: key.clone(),
            value: outcome.value.clone(),
            variation: outcome.variation,
            version: prereq_flag.version,
            prereq_of: flag.key.clone(),
            reason: outcome.reason.clone(),
        });

        let satisfied = prereq_flag.on && outcome.variation == Some(expected);
        if !satisfied {
            return Some(Ok(key.clone()));
        }
    }
    None
}

/// Returns `None` if no target matched, `Some(Ok(idx))` for a match, or
/// `Some(Err(()))` if the *matching* target's variation is missing or
/// negative. Targets the user's key isn't listed under are never
/// inspected for validity — an irrelevant malformed target ahead of a
/// valid one must not fail the whole evaluation.
fn match_targets(flag: &FeatureFlagState, user: &User) -> Option<Result<usize, ()>> {
    for target in &flag.targets {
        let matched = target
            .values
            .as_ref()
            .map(|values| values.iter().any(|v| v == &user.key))
            .unwrap_or(false);
        if !matched {
            continue;
        }
        return Some(match target.variation {
            Some(v) if v >= 0 => Ok(v as usize),
            _ => Err(()),
        });
    }
    None
}

fn off_result(flag: &FeatureFlagState, reason: Reason) -> EvalResult {
    match flag.off_variation {
        None => EvalResult {
            value: serde_json::Value::Null,
            variation: None,
            version: Some(flag.version),
            reason,
        },
        Some(idx) => variation_result(flag, idx, reason),
    }
}

fn variation_result(flag: &FeatureFlagState, idx: usize, reason: Reason) -> EvalResult {
    match flag.variations.get(idx) {
        Some(value) => EvalResult {
            value: value.clone(),
            variation: Some(idx),
            version: Some(flag.version),
            reason,
        },
        None => EvalResult::error(ErrorKind::MalformedFlag),
    }
}

/// Resolves a `{variation}` or `{rollout}` pair to a concrete variation
/// index. `Err(())` means malformed: both absent, a rollout with no
/// variations, or a weighted arm missing its weight/variation.
fn resolve_variation_or_rollout(
    flag: &FeatureFlagState,
    variation: Option<i64>,
    rollout: Option<&Rollout>,
    user: &User,
) -> Result<usize, ()> {
    if let Some(v) = variation {
        return if v >= 0 { Ok(v as usize) } else { Err(()) };
    }
    let rollout = rollout.ok_or(())?;
    let variations = rollout
        .variations
        .as_ref()
        .filter(|v| !v.is_empty())
        .ok_or(())?;

    let bucket_by = rollout.bucket_by.as_deref().unwrap_or("key");
    let bucket = bucket_user(&flag.key, &flag.salt, bucket_by, user);

    let mut sum = 0f64;
    for arm in variations {
        let weight = arm.weight.ok_or(())? as f64;
        sum += weight / 100_000f64;
        if bucket < sum {
            return arm.variation.map(|v| v as usize).ok_or(());
        }
    }
    // Weights summing to under 100%, or float rounding leaving `bucket`
    // past the accumulated sum: the remainder goes to the last arm.
    variations
        .last()
        .and_then(|arm| arm.variation)
        .map(|v| v as usize)
        .ok_or(())
}

/// Computes the `[0, 1)` rollout bucket for a user, under a salted key
/// (a flag key + salt, or a segment key + salt) and bucketing attribute.
fn bucket_user(key: &str, salt: &str, bucket_by: &str, user: &User) -> f64 {
    let attr = match user.attribute(bucket_by) {
        Some(v) => v,
        None => return 0.0,
    };
    let attr_string = match bucketable_string(&attr) {
        Some(s) => s,
        None => return 0.0,
    };

    let mut hash_input = format!("{}.{}.{}", key, salt, attr_string);
    if let Some(secondary) = &user.secondary {
        hash_input.push('.');
        hash_input.push_str(secondary);
    }

    let hash = Sha1::new().chain(hash_input.as_bytes()).finalize();
    let mut hex: String = hash.encode_hex();
    hex.truncate(15);
    let val = u64::from_str_radix(&hex, 16).unwrap_or(0) as f64;
    val.div(BUCKET_DIVIDER)
}

/// Matches a single clause against a user, including the `segmentMatch`
/// special case where `clause.values` are segment keys rather than
/// comparison operands.
fn clause_matches<S: Store>(clause: &Clause, user: &User, store: &S) -> bool {
    let raw = if clause.op == "segmentMatch" {
        clause
            .values
            .iter()
            .filter_map(|v| v.as_str())
            .any(|key| segment_matches(key, user, store))
    } else {
        let attr = match user.attribute(&clause.attribute) {
            Some(v) => v,
            // Absent attribute: the clause is false regardless of negate.
            None => return false,
        };
        match attr.as_array() {
            Some(list) => list.iter().any(|candidate| {
                clause
                    .values
                    .iter()
                    .any(|v| crate::operators::evaluate(&clause.op, candidate, v))
            }),
            None => clause
                .values
                .iter()
                .any(|v| crate::operators::evaluate(&clause.op, &attr, v)),
        }
    };
    if clause.negate {
        !raw
    } else {
        raw
    }
}

/// Matches a user against a segment. A missing segment is a non-match,
/// not an error — segments can lag behind the flags that reference them
/// during rollout.
fn segment_matches<S: Store>(segment_key: &str, user: &User, store: &S) -> bool {
    let segment: Segment = match store.segment(segment_key) {
        Some(s) => s,
        None => return false,
    };

    if segment.included.iter().any(|k| k == &user.key) {
        return true;
    }
    if segment.excluded.iter().any(|k| k == &user.key) {
        return false;
    }

    for rule in &segment.rules {
        if !rule.clauses.iter().all(|c| clause_matches(c, user, store)) {
            continue;
        }
        let passes_weight = match rule.weight {
            None => true,
            Some(weight) => {
                let bucket_by = rule.bucket_by.as_deref().unwrap_or("key");
                let bucket = bucket_user(&segment.key, &segment.salt, bucket_by, user);
                bucket < (weight as f64 / 100_000f64)
            }
        };
        if passes_weight {
            return true;
        }
    }
    false
}

/// Convenience accessors for typed flag variations, built on top of the
/// raw [`EvalResult`]-returning `evaluate`.
///
/// A type mismatch here (the resolved value isn't a bool/string/etc.)
/// surfaces as `Err(Error::WrongType)` rather than folding back into
/// [`Reason::Error`] with `ErrorKind::WrongType` — by the time the
/// mismatch is detected the [`EvalResult`] has already been returned to
/// the caller, and duplicating it just to carry a different reason isn't
/// worth the complexity for a convenience layer.
pub trait Evaluate {
    fn evaluate(&self, flag: &str, user: &User, default: serde_json::Value) -> EvalResult;

    fn bool_variation(&self, flag: &str, user: &User, default: bool) -> Result<bool, Error> {
        let result = self.evaluate(flag, user, serde_json::Value::Bool(default));
        result.value.as_bool().ok_or(Error::WrongType)
    }

    fn string_variation(&self, flag: &str, user: &User, default: &str) -> Result<String, Error> {
        let result = self.evaluate(flag, user, serde_json::Value::String(default.to_string()));
        result.value.as_str().map(str::to_string).ok_or(Error::WrongType)
    }
}
