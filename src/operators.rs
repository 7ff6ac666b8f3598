//! Pure predicate functions over `(actual, reference)` clause operand
//! pairs.
//!
//! Every operator is total: malformed input (wrong type, unparseable
//! regex/date/semver) yields `false` rather than an error, and an unknown
//! operator name yields `false` too. This mirrors the "dynamic dispatch on
//! operator name" design: a name -> predicate table with a default
//! "always false" fallback instead of an exhaustive enum match that
//! would need a catch-all anyway.

use chrono::DateTime;
use semver::Version;
use serde_json::Value;

/// Looks up the predicate for an operator name.
///
/// Returns `None` for unknown operators; callers should treat that the
/// same as "always false" (see [`evaluate`]).
pub fn lookup(op: &str) -> Option<fn(&Value, &Value) -> bool> {
    let f: fn(&Value, &Value) -> bool = match op {
        "in" => in_op,
        "startsWith" => starts_with,
        "endsWith" => ends_with,
        "contains" => contains,
        "matches" => matches,
        "lessThan" => less_than,
        "lessThanOrEqual" => less_than_or_equal,
        "greaterThan" => greater_than,
        "greaterThanOrEqual" => greater_than_or_equal,
        "before" => before,
        "after" => after,
        "semVerEqual" => sem_ver_equal,
        "semVerLessThan" => sem_ver_less_than,
        "semVerGreaterThan" => sem_ver_greater_than,
        _ => return None,
    };
    Some(f)
}

/// Evaluates `op(actual, reference)`. Unknown operators are `false`.
pub fn evaluate(op: &str, actual: &Value, reference: &Value) -> bool {
    match lookup(op) {
        Some(f) => f(actual, reference),
        None => false,
    }
}

fn in_op(actual: &Value, reference: &Value) -> bool {
    // Deep equality, exact type match: serde_json::Value's PartialEq
    // already refuses "99" == 99 (String vs Number variants differ).
    actual == reference
}

fn both_strings<'a>(actual: &'a Value, reference: &'a Value) -> Option<(&'a str, &'a str)> {
    Some((actual.as_str()?, reference.as_str()?))
}

fn starts_with(actual: &Value, reference: &Value) -> bool {
    both_strings(actual, reference)
        .map(|(a, r)| a.starts_with(r))
        .unwrap_or(false)
}

fn ends_with(actual: &Value, reference: &Value) -> bool {
    both_strings(actual, reference)
        .map(|(a, r)| a.ends_with(r))
        .unwrap_or(false)
}

fn contains(actual: &Value, reference: &Value) -> bool {
    both_strings(actual, reference)
        .map(|(a, r)| a.contains(r))
        .unwrap_or(false)
}

/// Unanchored "find" semantics: matches if the pattern matches anywhere in
/// the string. A malformed regex is absorbed to `false`, not an error.
fn matches(actual: &Value, reference: &Value) -> bool {
    let (a, pattern) = match both_strings(actual, reference) {
        Some(pair) => pair,
        None => return false,
    };
    regex::Regex::new(pattern)
        .map(|re| re.is_match(a))
        .unwrap_or(false)
}

fn both_numbers(actual: &Value, reference: &Value) -> Option<(f64, f64)> {
    Some((actual.as_f64()?, reference.as_f64()?))
}

fn less_than(actual: &Value, reference: &Value) -> bool {
    both_numbers(actual, reference)
        .map(|(a, r)| a < r)
        .unwrap_or(false)
}

fn less_than_or_equal(actual: &Value, reference: &Value) -> bool {
    both_numbers(actual, reference)
        .map(|(a, r)| a <= r)
        .unwrap_or(false)
}

fn greater_than(actual: &Value, reference: &Value) -> bool {
    both_numbers(actual, reference)
        .map(|(a, r)| a > r)
        .unwrap_or(false)
}

fn greater_than_or_equal(actual: &Value, reference: &Value) -> bool {
    both_numbers(actual, reference)
        .map(|(a, r)| a >= r)
        .unwrap_or(false)
}

/// Coerces a clause operand to milliseconds-since-epoch.
///
/// Numbers are taken as-is (may be negative). Strings are parsed as
/// RFC3339/ISO-8601 with a timezone offset; malformed strings yield
/// `None`. Booleans, arrays and objects never coerce.
fn as_instant_millis(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_f64().map(|f| f as i64),
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.timestamp_millis()),
        _ => None,
    }
}

fn before(actual: &Value, reference: &Value) -> bool {
    match (as_instant_millis(actual), as_instant_millis(reference)) {
        (Some(a), Some(r)) => a < r,
        _ => false,
    }
}

fn after(actual: &Value, reference: &Value) -> bool {
    match (as_instant_millis(actual), as_instant_millis(reference)) {
        (Some(a), Some(r)) => a > r,
        _ => false,
    }
}

/// Parses a semver string, defaulting missing minor/patch to 0 (e.g. `"2"`
/// -> `2.0.0`, `"2.1"` -> `2.1.0`), since `semver::Version::parse` requires
/// all three components.
fn parse_semver(s: &str) -> Option<Version> {
    let trimmed = s.trim();
    if let Ok(v) = Version::parse(trimmed) {
        return Some(v);
    }
    let parts: Vec<&str> = trimmed.splitn(3, '.').collect();
    let padded = match parts.len() {
        1 => format!("{}.0.0", parts[0]),
        2 => format!("{}.{}.0", parts[0], parts[1]),
        _ => return None,
    };
    Version::parse(&padded).ok()
}

fn both_semvers(actual: &Value, reference: &Value) -> Option<(Version, Version)> {
    let (a, r) = both_strings(actual, reference)?;
    Some((parse_semver(a)?, parse_semver(r)?))
}

fn sem_ver_equal(actual: &Value, reference: &Value) -> bool {
    both_semvers(actual, reference)
        .map(|(a, r)| a == r)
        .unwrap_or(false)
}

fn sem_ver_less_than(actual: &Value, reference: &Value) -> bool {
    both_semvers(actual, reference)
        .map(|(a, r)| a < r)
        .unwrap_or(false)
}

fn sem_ver_greater_than(actual: &Value, reference: &Value) -> bool {
    both_semvers(actual, reference)
        .map(|(a, r)| a > r)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn in_requires_exact_type_match() {
        assert!(evaluate("in", &json!(99), &json!(99)));
        assert!(!evaluate("in", &json!("99"), &json!(99)));
    }

    #[test]
    fn unknown_operator_is_false() {
        assert!(!evaluate("bogus", &json!(1), &json!(1)));
    }

    #[test]
    fn string_ops_require_strings() {
        assert!(evaluate("startsWith", &json!("hello world"), &json!("hello")));
        assert!(!evaluate("startsWith", &json!(5), &json!("hello")));
        assert!(evaluate("endsWith", &json!("hello world"), &json!("world")));
        assert!(evaluate("contains", &json!("hello world"), &json!("lo wo")));
    }

    #[test]
    fn matches_is_unanchored_find() {
        assert!(evaluate("matches", &json!("foobar"), &json!("oob")));
        assert!(!evaluate("matches", &json!("foobar"), &json!("[")));
    }

    #[test]
    fn numeric_ops_reject_mixed_types() {
        assert!(evaluate("lessThan", &json!(1), &json!(2)));
        assert!(!evaluate("lessThan", &json!("1"), &json!(2)));
        assert!(evaluate("greaterThanOrEqual", &json!(2), &json!(2)));
    }

    #[test]
    fn before_after_numeric() {
        assert!(evaluate("before", &json!(1000), &json!(2000)));
        assert!(evaluate("after", &json!(-1), &json!(-2)));
    }

    #[test]
    fn before_after_string_dates() {
        assert!(evaluate(
            "before",
            &json!("2020-01-01T00:00:00Z"),
            &json!("2021-01-01T00:00:00Z")
        ));
        assert!(!evaluate("before", &json!("not-a-date"), &json!("2021-01-01T00:00:00Z")));
    }

    #[test]
    fn semver_operators() {
        assert!(evaluate("semVerEqual", &json!("2.0"), &json!("2.0.0")));
        assert!(evaluate("semVerLessThan", &json!("2.0.0"), &json!("2.0.1")));
        assert!(evaluate("semVerGreaterThan", &json!("3"), &json!("2.9.9")));
        assert!(!evaluate("semVerEqual", &json!("not-semver"), &json!("2.0.0")));
    }
}
