use std::{collections::BTreeMap, sync::Arc};

use serde::Serialize;

use crate::{
    bucketer::MAX_BUCKETED_NUMBER,
    datafile::{
        Allocation, Condition, DatafileContent, Feature, Force, GroupSegment, Segment, Traffic,
        TryParse, VariationValue,
    },
    regex_cache::RegexCache,
    Context,
};

/// Read-only index over one parsed datafile. Readers are never mutated: a new datafile means a
/// new reader.
#[derive(Debug)]
pub struct DatafileReader {
    content: DatafileContent,
    regex_cache: Arc<RegexCache>,
}

impl DatafileReader {
    /// Create a reader over `content`. Regex cache is shared with other readers of the same
    /// instance.
    pub fn new(content: DatafileContent, regex_cache: Arc<RegexCache>) -> Self {
        for (key, feature) in &content.features {
            if let TryParse::ParseFailed(value) = feature {
                log::warn!(target: "featurevisor",
                           feature_key = key.as_str(),
                           feature:serde = value;
                           "failed to parse feature, it will evaluate with an error");
            }
        }
        for (key, segment) in &content.segments {
            if let TryParse::ParseFailed(value) = segment {
                log::warn!(target: "featurevisor",
                           segment_key = key.as_str(),
                           segment:serde = value;
                           "failed to parse segment, it will never match");
            }
        }

        DatafileReader {
            content,
            regex_cache,
        }
    }

    /// Underlying datafile content.
    pub fn content(&self) -> &DatafileContent {
        &self.content
    }

    #[allow(missing_docs)]
    pub fn get_revision(&self) -> &str {
        &self.content.revision
    }

    #[allow(missing_docs)]
    pub fn get_schema_version(&self) -> &str {
        &self.content.schema_version
    }

    pub(crate) fn regex_cache(&self) -> &RegexCache {
        &self.regex_cache
    }

    /// Get segment by key. Segments that failed to parse are reported as missing.
    pub fn get_segment(&self, key: &str) -> Option<&Segment> {
        self.content.segments.get(key).and_then(Option::from)
    }

    /// Get feature by key. Features that failed to parse are reported as missing.
    pub fn get_feature(&self, key: &str) -> Option<&Feature> {
        self.try_get_feature(key).and_then(Option::from)
    }

    /// Get feature by key, keeping the distinction between missing and unparseable features.
    pub(crate) fn try_get_feature(&self, key: &str) -> Option<&TryParse<Feature>> {
        self.content.features.get(key)
    }

    /// Keys of all features in the datafile, sorted.
    pub fn get_feature_keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.content.features.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }

    #[allow(missing_docs)]
    pub fn all_conditions_are_matched(&self, conditions: &Condition, context: &Context) -> bool {
        conditions.is_matched(context, &self.regex_cache)
    }

    #[allow(missing_docs)]
    pub fn all_segments_are_matched(&self, segments: &GroupSegment, context: &Context) -> bool {
        segments.is_matched(self, context)
    }

    /// Find the first traffic rule whose segments match `context`.
    pub fn get_matched_traffic<'a>(
        &self,
        traffic: &'a [Traffic],
        context: &Context,
    ) -> Option<&'a Traffic> {
        traffic
            .iter()
            .find(|rule| self.all_segments_are_matched(&rule.segments, context))
    }

    /// Find the static allocation of `traffic` containing `bucket_value`.
    pub fn get_matched_allocation<'a>(
        &self,
        traffic: &'a Traffic,
        bucket_value: u32,
    ) -> Option<&'a Allocation> {
        traffic
            .allocation
            .iter()
            .find(|allocation| allocation.range.contains(bucket_value))
    }

    /// Find the first force entry matching `context`, along with its index.
    ///
    /// An entry matches through its `conditions` if present, otherwise through its `segments`. An
    /// entry with neither never matches.
    pub fn get_matched_force<'a>(
        &self,
        feature: &'a Feature,
        context: &Context,
    ) -> Option<(usize, &'a Force)> {
        feature.force.iter().enumerate().find(|(_, force)| {
            if let Some(conditions) = &force.conditions {
                self.all_conditions_are_matched(conditions, context)
            } else if let Some(segments) = &force.segments {
                self.all_segments_are_matched(segments, context)
            } else {
                false
            }
        })
    }

    /// Compare this datafile with the `previous` one.
    pub fn diff(&self, previous: &DatafileReader) -> DatafileDiff {
        let mut diff = DatafileDiff {
            previous_revision: previous.get_revision().to_owned(),
            revision: self.get_revision().to_owned(),
            added: Vec::new(),
            removed: Vec::new(),
            changed: Vec::new(),
        };

        for (key, feature) in &self.content.features {
            match previous.content.features.get(key) {
                None => diff.added.push(key.clone()),
                Some(previous_feature) if feature_changed(previous_feature, feature) => {
                    diff.changed.push(key.clone())
                }
                Some(_) => {}
            }
        }
        diff.removed.extend(
            previous
                .content
                .features
                .keys()
                .filter(|key| !self.content.features.contains_key(*key))
                .cloned(),
        );

        diff.added.sort_unstable();
        diff.removed.sort_unstable();
        diff.changed.sort_unstable();
        diff
    }
}

/// Pick a variation by laying `weights` out over the whole bucket domain in variation value
/// order. Non-positive weights get no share.
pub fn get_variation_from_weights(
    weights: &BTreeMap<VariationValue, f64>,
    bucket_value: u32,
) -> Option<&str> {
    let total: f64 = weights.values().filter(|weight| **weight > 0.0).sum();
    if total <= 0.0 {
        return None;
    }

    let mut cumulative = 0.0;
    let mut last = None;
    for (variation, weight) in weights.iter().filter(|(_, weight)| **weight > 0.0) {
        cumulative += weight;
        let end = (cumulative / total * MAX_BUCKETED_NUMBER as f64).floor() as u32;
        if bucket_value < end {
            return Some(variation);
        }
        last = Some(variation.as_str());
    }
    // Rounding may leave the tail of the domain uncovered.
    last
}

fn feature_changed(previous: &TryParse<Feature>, current: &TryParse<Feature>) -> bool {
    match (previous, current) {
        (TryParse::Parsed(previous), TryParse::Parsed(current)) => {
            match (&previous.hash, &current.hash) {
                (Some(previous_hash), Some(current_hash)) => previous_hash != current_hash,
                _ => previous != current,
            }
        }
        (TryParse::ParseFailed(previous), TryParse::ParseFailed(current)) => previous != current,
        _ => true,
    }
}

/// Difference between two datafiles, computed on datafile replacement.
#[derive(Debug, Serialize, PartialEq, Eq, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct DatafileDiff {
    /// Revision of the replaced datafile.
    pub previous_revision: String,
    /// Revision of the new datafile.
    pub revision: String,
    /// Keys of features only present in the new datafile.
    pub added: Vec<String>,
    /// Keys of features only present in the replaced datafile.
    pub removed: Vec<String>,
    /// Keys of features whose configuration changed.
    pub changed: Vec<String>,
}

impl DatafileDiff {
    /// Returns `true` if revision or any feature changed.
    pub fn has_changes(&self) -> bool {
        self.previous_revision != self.revision
            || !self.added.is_empty()
            || !self.removed.is_empty()
            || !self.changed.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::BTreeMap, sync::Arc};

    use crate::{datafile::DatafileContent, regex_cache::RegexCache, Context};

    use super::{get_variation_from_weights, DatafileReader};

    fn reader(json: &str) -> DatafileReader {
        let content: DatafileContent = serde_json::from_str(json).unwrap();
        DatafileReader::new(content, Arc::new(RegexCache::new()))
    }

    fn test_reader() -> DatafileReader {
        reader(
            r#"{
                "schemaVersion": "2",
                "revision": "1",
                "segments": {
                    "netherlands": {
                        "conditions": [{ "attribute": "country", "operator": "equals", "value": "nl" }]
                    }
                },
                "features": {
                    "checkout": {
                        "hash": "a",
                        "bucketBy": "userId",
                        "force": [
                            { "segments": "unknown", "enabled": false },
                            { "enabled": true },
                            { "conditions": [{ "attribute": "userId", "operator": "equals", "value": "qa" }], "enabled": true },
                            { "segments": "netherlands", "enabled": false }
                        ],
                        "traffic": [
                            { "key": "nl", "segments": "netherlands", "percentage": 100000 },
                            { "key": "everyone", "segments": "*", "percentage": 50000,
                              "allocation": [
                                { "variation": "control", "range": [0, 25000] },
                                { "variation": "treatment", "range": [25000, 50000] }
                              ] }
                        ]
                    },
                    "broken": { "bucketBy": 42 }
                }
            }"#,
        )
    }

    fn context(pairs: &[(&str, &str)]) -> Context {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).into()))
            .collect()
    }

    #[test]
    fn lookups() {
        let reader = test_reader();
        assert_eq!(reader.get_revision(), "1");
        assert_eq!(reader.get_schema_version(), "2");
        assert!(reader.get_feature("checkout").is_some());
        assert!(reader.get_feature("broken").is_none());
        assert!(reader.try_get_feature("broken").is_some());
        assert!(reader.get_feature("unknown").is_none());
        assert!(reader.get_segment("netherlands").is_some());
        assert_eq!(reader.get_feature_keys(), vec!["broken", "checkout"]);
    }

    #[test]
    fn matched_traffic_is_first_match() {
        let reader = test_reader();
        let feature = reader.get_feature("checkout").unwrap();

        let rule = reader
            .get_matched_traffic(&feature.traffic, &context(&[("country", "nl")]))
            .unwrap();
        assert_eq!(rule.key, "nl");

        let rule = reader
            .get_matched_traffic(&feature.traffic, &context(&[("country", "de")]))
            .unwrap();
        assert_eq!(rule.key, "everyone");
    }

    #[test]
    fn matched_allocation_uses_half_open_ranges() {
        let reader = test_reader();
        let rule = &reader.get_feature("checkout").unwrap().traffic[1];
        assert_eq!(
            reader.get_matched_allocation(rule, 0).unwrap().variation,
            "control"
        );
        assert_eq!(
            reader.get_matched_allocation(rule, 25000).unwrap().variation,
            "treatment"
        );
        assert!(reader.get_matched_allocation(rule, 50000).is_none());
    }

    #[test]
    fn matched_force() {
        let reader = test_reader();
        let feature = reader.get_feature("checkout").unwrap();

        let (index, force) = reader
            .get_matched_force(feature, &context(&[("userId", "qa"), ("country", "nl")]))
            .unwrap();
        assert_eq!(index, 2);
        assert_eq!(force.enabled, Some(true));

        let (index, _) = reader
            .get_matched_force(feature, &context(&[("country", "nl")]))
            .unwrap();
        assert_eq!(index, 3);

        assert!(reader
            .get_matched_force(feature, &context(&[("country", "de")]))
            .is_none());
    }

    #[test]
    fn variation_weights() {
        let weights: BTreeMap<String, f64> = [
            ("treatment".to_owned(), 50.0),
            ("control".to_owned(), 50.0),
        ]
        .into();
        // sorted by value: control first
        assert_eq!(get_variation_from_weights(&weights, 0), Some("control"));
        assert_eq!(get_variation_from_weights(&weights, 49999), Some("control"));
        assert_eq!(get_variation_from_weights(&weights, 50000), Some("treatment"));
        assert_eq!(get_variation_from_weights(&weights, 99999), Some("treatment"));

        let weights: BTreeMap<String, f64> = [
            ("a".to_owned(), 1.0),
            ("b".to_owned(), 0.0),
            ("c".to_owned(), 3.0),
        ]
        .into();
        assert_eq!(get_variation_from_weights(&weights, 24999), Some("a"));
        assert_eq!(get_variation_from_weights(&weights, 25000), Some("c"));

        assert_eq!(get_variation_from_weights(&BTreeMap::new(), 10), None);
    }

    #[test]
    fn diff_between_datafiles() {
        let previous = test_reader();
        let current = reader(
            r#"{
                "schemaVersion": "2",
                "revision": "2",
                "features": {
                    "checkout": { "hash": "b", "bucketBy": "userId" },
                    "search": { "hash": "c", "bucketBy": "userId" }
                }
            }"#,
        );

        let diff = current.diff(&previous);
        assert_eq!(diff.previous_revision, "1");
        assert_eq!(diff.revision, "2");
        assert_eq!(diff.added, vec!["search"]);
        assert_eq!(diff.removed, vec!["broken"]);
        assert_eq!(diff.changed, vec!["checkout"]);
        assert!(diff.has_changes());

        assert!(!current.diff(&current).has_changes());
    }
}
