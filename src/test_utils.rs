use crate::{
    message::Message,
    models::{Clause, Fallthrough, FeatureFlagState, Prerequisite, Rollout, Rule, Segment, SegmentRule, Target, WeightedVariation},
    source::Source,
    store::Store,
};
use std::{collections::HashMap, convert::Infallible};

pub struct MockStore {
    flags: HashMap<String, FeatureFlagState>,
    segments: HashMap<String, Segment>,
}

impl MockStore {
    pub fn new() -> Self {
        Self {
            flags: HashMap::new(),
            segments: HashMap::new(),
        }
    }

    pub fn add_flag(&mut self, flag: FeatureFlagState) {
        self.flags.insert(flag.key.clone(), flag);
    }

    pub fn add_segment(&mut self, segment: Segment) {
        self.segments.insert(segment.key.clone(), segment);
    }
}

impl Store for MockStore {
    fn flag(&self, name: &str) -> Option<FeatureFlagState> {
        self.flags.get(name).cloned()
    }

    fn segment(&self, name: &str) -> Option<Segment> {
        self.segments.get(name).cloned()
    }

    fn export_all(&self) -> HashMap<String, FeatureFlagState> {
        self.flags.clone()
    }
}

impl<T: Store> Store for &T {
    fn flag(&self, name: &str) -> Option<FeatureFlagState> {
        (**self).flag(name)
    }

    fn segment(&self, name: &str) -> Option<Segment> {
        (**self).segment(name)
    }

    fn export_all(&self) -> HashMap<String, FeatureFlagState> {
        (**self).export_all()
    }

    fn initialized(&self) -> bool {
        (**self).initialized()
    }
}

pub struct NullSource;

impl Source for NullSource {
    type Error = Infallible;
    type Stream = futures::stream::Pending<Result<Message, Self::Error>>;

    fn stream(&self) -> Self::Stream {
        futures::stream::pending()
    }
}

pub struct FlagBuilder(FeatureFlagState);

impl Default for FlagBuilder {
    fn default() -> Self {
        Self(FeatureFlagState {
            fallthrough: Fallthrough {
                variation: Some(0),
                rollout: None,
            },
            key: "my_test_flag".into(),
            off_variation: Some(0),
            on: true,
            salt: "test-salt".into(),
            variations: vec![false.into(), true.into()],
            ..Default::default()
        })
    }
}

#[allow(dead_code)]
impl FlagBuilder {
    pub fn off(mut self) -> Self {
        self.0.on = false;
        self
    }

    pub fn on(mut self) -> Self {
        self.0.on = true;
        self
    }

    pub fn with_key<K: Into<String>>(mut self, key: K) -> Self {
        self.0.key = key.into();
        self
    }

    pub fn with_version(mut self, version: u64) -> Self {
        self.0.version = version;
        self
    }

    pub fn with_variations<I: IntoIterator<Item = V>, V: Into<serde_json::Value>>(mut self, iter: I) -> Self {
        self.0.variations = iter.into_iter().map(|v| v.into()).collect();
        self
    }

    pub fn with_fallthrough_variation(mut self, idx: usize) -> Self {
        self.0.fallthrough = Fallthrough {
            variation: Some(idx as i64),
            rollout: None,
        };
        self
    }

    pub fn with_fallthrough_rollout<I: IntoIterator<Item = (i64, u32)>>(mut self, variations: I) -> Self {
        let variations = variations
            .into_iter()
            .map(|(v, w)| WeightedVariation {
                variation: Some(v),
                weight: Some(w),
            })
            .collect();
        self.0.fallthrough = Fallthrough {
            variation: None,
            rollout: Some(Rollout {
                bucket_by: None,
                variations: Some(variations),
            }),
        };
        self
    }

    pub fn clear_targets(mut self) -> Self {
        self.0.targets = Default::default();
        self
    }

    pub fn add_target<V: Into<String>>(mut self, variation: i64, value: V) -> Self {
        if let Some(target) = self.0.targets.iter_mut().find(|t| t.variation == Some(variation)) {
            let mut values = target.values.take().unwrap_or_default();
            values.push(value.into());
            target.values.replace(values);
        } else {
            self.0.targets.push(Target {
                variation: Some(variation),
                values: Some(vec![value.into()]),
            });
        }
        self
    }

    pub fn add_prerequisite<K: Into<String>>(mut self, key: K, variation: i64) -> Self {
        self.0.prerequisites.push(Prerequisite {
            key: Some(key.into()),
            variation: Some(variation),
        });
        self
    }

    /// Appends a rule matching `attribute == value` (operator `"in"`),
    /// resolving to `variation` when it matches.
    pub fn add_rule_eq<A: Into<String>, V: Into<String>>(mut self, id: &str, attribute: A, value: V, variation: i64) -> Self {
        self.0.rules.push(Rule {
            id: Some(id.to_string()),
            clauses: vec![Clause {
                attribute: attribute.into(),
                op: "in".into(),
                values: vec![serde_json::Value::String(value.into())],
                negate: false,
            }],
            variation: Some(variation),
            rollout: None,
        });
        self
    }

    pub fn add_rule_negated<A: Into<String>, V: Into<String>>(mut self, id: &str, attribute: A, value: V, variation: i64) -> Self {
        self.0.rules.push(Rule {
            id: Some(id.to_string()),
            clauses: vec![Clause {
                attribute: attribute.into(),
                op: "in".into(),
                values: vec![serde_json::Value::String(value.into())],
                negate: true,
            }],
            variation: Some(variation),
            rollout: None,
        });
        self
    }

    /// Appends a rule whose single clause is a `segmentMatch` against
    /// `segment_key`, resolving to `variation`.
    pub fn add_segment_rule<K: Into<String>>(mut self, segment_key: K, variation: i64) -> Self {
        self.0.rules.push(Rule {
            id: None,
            clauses: vec![Clause {
                attribute: String::new(),
                op: "segmentMatch".into(),
                values: vec![serde_json::Value::String(segment_key.into())],
                negate: false,
            }],
            variation: Some(variation),
            rollout: None,
        });
        self
    }

    pub fn into_inner(self) -> FeatureFlagState {
        self.0
    }
}

pub struct SegmentBuilder(Segment);

#[allow(dead_code)]
impl SegmentBuilder {
    pub fn new<K: Into<String>>(key: K) -> Self {
        Self(Segment {
            key: key.into(),
            version: 1,
            salt: "segment-salt".into(),
            ..Default::default()
        })
    }

    pub fn include<K: Into<String>>(mut self, key: K) -> Self {
        self.0.included.push(key.into());
        self
    }

    pub fn exclude<K: Into<String>>(mut self, key: K) -> Self {
        self.0.excluded.push(key.into());
        self
    }

    pub fn rule_eq_weighted<A: Into<String>, V: Into<String>>(mut self, attribute: A, value: V, weight: Option<u32>) -> Self {
        self.0.rules.push(SegmentRule {
            clauses: vec![Clause {
                attribute: attribute.into(),
                op: "in".into(),
                values: vec![serde_json::Value::String(value.into())],
                negate: false,
            }],
            weight,
            bucket_by: None,
        });
        self
    }

    pub fn into_inner(self) -> Segment {
        self.0
    }
}
