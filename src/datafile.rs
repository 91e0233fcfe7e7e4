//! Datafile models. This is the configuration format produced by Featurevisor build tooling.
use std::{
    collections::{BTreeMap, HashMap},
    sync::OnceLock,
};

use derive_more::From;
use serde::{
    de::{DeserializeOwned, Error as _},
    ser::SerializeMap,
    Deserialize, Deserializer, Serialize, Serializer,
};
use serde_json::Value as JsonValue;

/// Value of a variation. Variations are always identified by their string value.
pub type VariationValue = String;

/// Value of a variable. Variables may hold any JSON value.
pub type VariableValue = JsonValue;

/// Literal that matches every context, in place of conditions or segments.
pub const EVERYONE: &str = "*";

/// Datafile content. Immutable once parsed; replaced wholesale on update.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct DatafileContent {
    /// Version of the datafile format.
    pub schema_version: String,
    /// Opaque revision string, changes with every datafile build.
    pub revision: String,
    /// Segments configuration.
    ///
    /// Values are wrapped in `TryParse` so that if we fail to parse one segment, other segments and
    /// features are still usable.
    #[serde(default)]
    pub segments: HashMap<String, TryParse<Segment>>,
    /// Features configuration.
    ///
    /// Values are wrapped in `TryParse` so that if we fail to parse one feature (e.g., new datafile
    /// format), we can still serve other features.
    #[serde(default)]
    pub features: HashMap<String, TryParse<Feature>>,
}

impl Default for DatafileContent {
    fn default() -> Self {
        DatafileContent {
            schema_version: "2".to_owned(),
            revision: "unknown".to_owned(),
            segments: HashMap::new(),
            features: HashMap::new(),
        }
    }
}

/// `TryParse` allows the subfield to fail parsing without failing the parsing of the whole
/// structure.
///
/// This can be helpful to isolate errors in a subtree. e.g., if configuration for one feature
/// parses, the rest of the features are still usable.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(untagged)]
pub enum TryParse<T> {
    /// Successfully parsed.
    Parsed(T),
    /// Parsing failed.
    ParseFailed(JsonValue),
}
impl<T> From<TryParse<T>> for Option<T> {
    fn from(value: TryParse<T>) -> Self {
        match value {
            TryParse::Parsed(v) => Some(v),
            TryParse::ParseFailed(_) => None,
        }
    }
}
impl<'a, T> From<&'a TryParse<T>> for Option<&'a T> {
    fn from(value: &TryParse<T>) -> Option<&T> {
        match value {
            TryParse::Parsed(v) => Some(v),
            TryParse::ParseFailed(_) => None,
        }
    }
}
impl<T> From<T> for TryParse<T> {
    fn from(value: T) -> Self {
        TryParse::Parsed(value)
    }
}

/// A named, reusable condition expression.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct Segment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub archived: bool,
    pub conditions: Condition,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct Feature {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// Opaque hash of the feature configuration, used to detect changes between datafiles.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    #[serde(default)]
    pub deprecated: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<Required>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub variables_schema: HashMap<String, VariableSchema>,
    /// Variation served when the feature is disabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disabled_variation_value: Option<VariationValue>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variations: Vec<Variation>,
    pub bucket_by: BucketBy,
    #[serde(default)]
    pub traffic: Vec<Traffic>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub force: Vec<Force>,
    /// Mutually exclusive bucket ranges. When non-empty, the feature is only enabled for bucket
    /// values inside one of them.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ranges: Vec<Range>,
}

impl Feature {
    /// Find variation by its value.
    pub fn get_variation(&self, value: &str) -> Option<&Variation> {
        self.variations
            .iter()
            .find(|variation| variation.value == value)
    }
}

/// Attributes used to compute the bucket key of a feature.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(untagged)]
pub enum BucketBy {
    /// A single attribute.
    Plain(String),
    /// All listed attributes, in declared order.
    And(Vec<String>),
    /// The first listed attribute present in the context.
    #[allow(missing_docs)]
    Or { or: Vec<String> },
}

/// Another feature that must be enabled (optionally, with a specific variation) for this feature
/// to be enabled.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(untagged)]
pub enum Required {
    /// Only the feature key.
    Key(String),
    /// Feature key and the variation it must evaluate to.
    #[allow(missing_docs)]
    WithVariation {
        key: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        variation: Option<VariationValue>,
    },
}

impl Required {
    /// Key of the required feature.
    pub fn key(&self) -> &str {
        match self {
            Required::Key(key) => key,
            Required::WithVariation { key, .. } => key,
        }
    }

    /// Variation the required feature must evaluate to, if specified.
    pub fn variation(&self) -> Option<&str> {
        match self {
            Required::Key(_) => None,
            Required::WithVariation { variation, .. } => variation.as_deref(),
        }
    }
}

/// Type of a variable.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub enum VariableType {
    Boolean,
    String,
    Integer,
    Double,
    Array,
    Object,
    Json,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct VariableSchema {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(rename = "type")]
    pub variable_type: VariableType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<VariableValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub deprecated: bool,
    /// Serve `default_value` when the feature is disabled.
    #[serde(default)]
    pub use_default_when_disabled: bool,
    /// Value served when the feature is disabled. Takes precedence over
    /// `use_default_when_disabled`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disabled_value: Option<VariableValue>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct Variation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub value: VariationValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub variables: HashMap<String, VariableValue>,
    /// Per-variable overrides, evaluated in order; first match wins.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub variable_overrides: HashMap<String, Vec<VariableOverride>>,
}

/// Overrides a variable value of a variation for contexts matching `conditions` or `segments`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct VariableOverride {
    pub value: VariableValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditions: Option<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segments: Option<GroupSegment>,
}

/// Traffic rule. Rules are evaluated in order; the first rule whose segments match wins.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct Traffic {
    pub key: String,
    pub segments: GroupSegment,
    /// Rollout percentage in `[0, 100_000]`.
    pub percentage: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variation: Option<VariationValue>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub variables: HashMap<String, VariableValue>,
    /// Ad hoc variation weights overriding the static allocation. A `BTreeMap` keeps variation
    /// values sorted, which defines the order bucket ranges are laid out in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variation_weights: Option<BTreeMap<VariationValue, f64>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allocation: Vec<Allocation>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct Allocation {
    pub variation: VariationValue,
    pub range: Range,
}

/// A half-open `[start, end)` range of bucket values. Serialized as a two-element array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Range(pub u32, pub u32);

impl Range {
    /// Start of the range (inclusive).
    pub fn start(&self) -> u32 {
        self.0
    }

    /// End of the range (exclusive).
    pub fn end(&self) -> u32 {
        self.1
    }

    pub(crate) fn contains(&self, v: u32) -> bool {
        self.0 <= v && v < self.1
    }
}

/// Unconditional override, evaluated before bucketing.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct Force {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditions: Option<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segments: Option<GroupSegment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variation: Option<VariationValue>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub variables: HashMap<String, VariableValue>,
}

/// A condition tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// A single predicate over one context attribute.
    Plain(PlainCondition),
    /// All children must match.
    And(Vec<Condition>),
    /// Any child must match.
    Or(Vec<Condition>),
    /// Negation of all children matching.
    Not(Vec<Condition>),
    /// A bare list; all children must match.
    Every(Vec<Condition>),
    /// `"*"`: matches everything.
    Everyone,
    /// Any other bare string. Never matches.
    Literal(String),
    /// JSON-encoded condition, parsed on first use.
    Stringified(Stringified<Condition>),
}

/// `Condition` is a check that given context `attribute` matches the condition `value` under the
/// given `operator`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct PlainCondition {
    pub attribute: String,
    pub operator: Operator,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<ConditionValue>,
    /// Regex flags for `matches`/`notMatches` (e.g., `"i"`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regex_flags: Option<String>,
}

/// Condition operators.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub enum Operator {
    Equals,
    NotEquals,
    Exists,
    NotExists,

    GreaterThan,
    GreaterThanOrEquals,
    LessThan,
    LessThanOrEquals,

    Contains,
    NotContains,
    StartsWith,
    EndsWith,

    SemverEquals,
    SemverNotEquals,
    SemverGreaterThan,
    SemverGreaterThanOrEquals,
    SemverLessThan,
    SemverLessThanOrEquals,

    Before,
    After,

    In,
    NotIn,
    Includes,
    NotIncludes,

    Matches,
    NotMatches,

    /// Operator introduced by a newer datafile format. Never matches.
    #[serde(other)]
    Unsupported,
}

/// Value side of a plain condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, From)]
#[serde(untagged)]
#[allow(missing_docs)]
pub enum ConditionValue {
    String(String),
    Number(f64),
    Boolean(bool),
    Array(Vec<ConditionValue>),
    Null,
}

impl From<&str> for ConditionValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

/// Segments expression of a traffic rule, force entry, or variable override.
#[derive(Debug, Clone, PartialEq)]
pub enum GroupSegment {
    /// `"*"`: matches everything.
    Everyone,
    /// Reference to a segment by its key.
    Key(String),
    /// All children must match.
    And(Vec<GroupSegment>),
    /// Any child must match.
    Or(Vec<GroupSegment>),
    /// Negation of all children matching.
    Not(Vec<GroupSegment>),
    /// A bare list; all children must match.
    Every(Vec<GroupSegment>),
    /// JSON-encoded segments expression, parsed on first use.
    Stringified(Stringified<GroupSegment>),
}

/// A value that arrived JSON-encoded inside a JSON string. It is decoded on first use and the
/// result (including a failure) is memoized.
#[derive(Debug, Clone)]
pub struct Stringified<T> {
    raw: String,
    parsed: OnceLock<Option<Box<T>>>,
}

impl<T> Stringified<T> {
    pub(crate) fn new(raw: String) -> Self {
        Stringified {
            raw,
            parsed: OnceLock::new(),
        }
    }

    /// The encoded string as it appeared in the datafile.
    pub fn raw(&self) -> &str {
        &self.raw
    }
}

impl<T: DeserializeOwned> Stringified<T> {
    /// Decode the value, returning `None` if it is not valid.
    pub fn get(&self) -> Option<&T> {
        self.parsed
            .get_or_init(|| match serde_json::from_str::<T>(&self.raw) {
                Ok(value) => Some(Box::new(value)),
                Err(err) => {
                    log::warn!(target: "featurevisor",
                               raw = self.raw.as_str();
                               "failed to parse stringified conditions or segments: {err}");
                    None
                }
            })
            .as_deref()
    }
}

impl<T> PartialEq for Stringified<T> {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

/// Strings starting with `{` or `[` are JSON-encoded expressions rather than keys/literals.
fn is_encoded(s: &str) -> bool {
    let s = s.trim_start();
    s.starts_with('{') || s.starts_with('[')
}

fn list_from_json<T>(
    value: JsonValue,
    from_json: fn(JsonValue) -> Result<T, String>,
) -> Result<Vec<T>, String> {
    match value {
        JsonValue::Array(items) => items.into_iter().map(from_json).collect(),
        // `not` is commonly written with a single child.
        other => Ok(vec![from_json(other)?]),
    }
}

impl Condition {
    fn from_json(value: JsonValue) -> Result<Condition, String> {
        match value {
            JsonValue::String(s) if s == EVERYONE => Ok(Condition::Everyone),
            JsonValue::String(s) if is_encoded(&s) => Ok(Condition::Stringified(Stringified::new(s))),
            JsonValue::String(s) => Ok(Condition::Literal(s)),
            JsonValue::Array(items) => Ok(Condition::Every(
                items
                    .into_iter()
                    .map(Condition::from_json)
                    .collect::<Result<_, _>>()?,
            )),
            JsonValue::Object(mut map) => {
                if map.contains_key("attribute") {
                    return serde_json::from_value(JsonValue::Object(map))
                        .map(Condition::Plain)
                        .map_err(|err| err.to_string());
                }
                if let Some(and) = map.remove("and") {
                    return Ok(Condition::And(list_from_json(and, Condition::from_json)?));
                }
                if let Some(or) = map.remove("or") {
                    return Ok(Condition::Or(list_from_json(or, Condition::from_json)?));
                }
                if let Some(not) = map.remove("not") {
                    return Ok(Condition::Not(list_from_json(not, Condition::from_json)?));
                }
                Err("unrecognized condition".to_owned())
            }
            other => Err(format!("unrecognized condition: {other}")),
        }
    }
}

impl GroupSegment {
    fn from_json(value: JsonValue) -> Result<GroupSegment, String> {
        match value {
            JsonValue::String(s) if s == EVERYONE => Ok(GroupSegment::Everyone),
            JsonValue::String(s) if is_encoded(&s) => {
                Ok(GroupSegment::Stringified(Stringified::new(s)))
            }
            JsonValue::String(s) => Ok(GroupSegment::Key(s)),
            JsonValue::Array(items) => Ok(GroupSegment::Every(
                items
                    .into_iter()
                    .map(GroupSegment::from_json)
                    .collect::<Result<_, _>>()?,
            )),
            JsonValue::Object(mut map) => {
                if let Some(and) = map.remove("and") {
                    return Ok(GroupSegment::And(list_from_json(
                        and,
                        GroupSegment::from_json,
                    )?));
                }
                if let Some(or) = map.remove("or") {
                    return Ok(GroupSegment::Or(list_from_json(or, GroupSegment::from_json)?));
                }
                if let Some(not) = map.remove("not") {
                    return Ok(GroupSegment::Not(list_from_json(
                        not,
                        GroupSegment::from_json,
                    )?));
                }
                Err("unrecognized segments expression".to_owned())
            }
            other => Err(format!("unrecognized segments expression: {other}")),
        }
    }
}

impl<'de> Deserialize<'de> for Condition {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = JsonValue::deserialize(deserializer)?;
        Condition::from_json(value).map_err(D::Error::custom)
    }
}

impl<'de> Deserialize<'de> for GroupSegment {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = JsonValue::deserialize(deserializer)?;
        GroupSegment::from_json(value).map_err(D::Error::custom)
    }
}

fn serialize_single_entry<S: Serializer, V: Serialize + ?Sized>(
    serializer: S,
    key: &str,
    value: &V,
) -> Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(Some(1))?;
    map.serialize_entry(key, value)?;
    map.end()
}

impl Serialize for Condition {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Condition::Plain(plain) => plain.serialize(serializer),
            Condition::And(children) => serialize_single_entry(serializer, "and", children),
            Condition::Or(children) => serialize_single_entry(serializer, "or", children),
            Condition::Not(children) => serialize_single_entry(serializer, "not", children),
            Condition::Every(children) => children.serialize(serializer),
            Condition::Everyone => serializer.serialize_str(EVERYONE),
            Condition::Literal(s) => serializer.serialize_str(s),
            Condition::Stringified(s) => serializer.serialize_str(s.raw()),
        }
    }
}

impl Serialize for GroupSegment {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            GroupSegment::Everyone => serializer.serialize_str(EVERYONE),
            GroupSegment::Key(key) => serializer.serialize_str(key),
            GroupSegment::And(children) => serialize_single_entry(serializer, "and", children),
            GroupSegment::Or(children) => serialize_single_entry(serializer, "or", children),
            GroupSegment::Not(children) => serialize_single_entry(serializer, "not", children),
            GroupSegment::Every(children) => children.serialize(serializer),
            GroupSegment::Stringified(s) => serializer.serialize_str(s.raw()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{fs::File, io::BufReader};

    use super::{
        BucketBy, Condition, ConditionValue, DatafileContent, Feature, GroupSegment, Operator,
        Range, Required, TryParse,
    };

    #[test]
    fn parse_test_datafile() {
        let f = File::open("tests/data/datafile.json")
            .expect("Failed to open tests/data/datafile.json");
        let datafile: DatafileContent = serde_json::from_reader(BufReader::new(f)).unwrap();
        assert!(datafile
            .features
            .values()
            .all(|feature| matches!(feature, TryParse::Parsed(_))));
        assert!(datafile
            .segments
            .values()
            .all(|segment| matches!(segment, TryParse::Parsed(_))));
    }

    #[test]
    fn parse_partially_if_unexpected() {
        let datafile: DatafileContent = serde_json::from_str(
            r#"
              {
                "schemaVersion": "2",
                "revision": "1",
                "segments": {},
                "features": {
                  "success": {
                    "bucketBy": "userId",
                    "traffic": []
                  },
                  "fail_parsing": {
                    "bucketBy": 42,
                    "traffic": []
                  }
                }
              }
            "#,
        )
        .unwrap();
        assert!(
            matches!(datafile.features.get("success").unwrap(), TryParse::Parsed(_)),
            "{:?} should match TryParse::Parsed(_)",
            datafile.features.get("success").unwrap()
        );
        assert!(
            matches!(
                datafile.features.get("fail_parsing").unwrap(),
                TryParse::ParseFailed(_)
            ),
            "{:?} should match TryParse::ParseFailed(_)",
            datafile.features.get("fail_parsing").unwrap()
        );
    }

    #[test]
    fn parse_bucket_by_shapes() {
        let plain: BucketBy = serde_json::from_str(r#""userId""#).unwrap();
        assert_eq!(plain, BucketBy::Plain("userId".into()));

        let and: BucketBy = serde_json::from_str(r#"["orgId", "userId"]"#).unwrap();
        assert_eq!(and, BucketBy::And(vec!["orgId".into(), "userId".into()]));

        let or: BucketBy = serde_json::from_str(r#"{"or": ["userId", "deviceId"]}"#).unwrap();
        assert_eq!(
            or,
            BucketBy::Or {
                or: vec!["userId".into(), "deviceId".into()]
            }
        );

        assert!(serde_json::from_str::<BucketBy>(r#"{"xor": ["userId"]}"#).is_err());
        assert!(serde_json::from_str::<BucketBy>("true").is_err());
    }

    #[test]
    fn parse_required_shapes() {
        let required: Vec<Required> =
            serde_json::from_str(r#"["a", {"key": "b", "variation": "treatment"}]"#).unwrap();
        assert_eq!(required[0].key(), "a");
        assert_eq!(required[0].variation(), None);
        assert_eq!(required[1].key(), "b");
        assert_eq!(required[1].variation(), Some("treatment"));
    }

    #[test]
    fn parse_conditions() {
        let condition: Condition = serde_json::from_str(
            r#"{
                "and": [
                    { "attribute": "country", "operator": "equals", "value": "nl" },
                    { "or": [
                        { "attribute": "age", "operator": "greaterThan", "value": 18 },
                        { "not": { "attribute": "beta", "operator": "exists" } }
                    ] }
                ]
            }"#,
        )
        .unwrap();

        let Condition::And(children) = &condition else {
            panic!("expected and, got {condition:?}");
        };
        let Condition::Plain(plain) = &children[0] else {
            panic!("expected plain condition, got {:?}", children[0]);
        };
        assert_eq!(plain.operator, Operator::Equals);
        assert_eq!(plain.value, Some(ConditionValue::from("nl")));
        let Condition::Or(or) = &children[1] else {
            panic!("expected or, got {:?}", children[1]);
        };
        assert!(matches!(&or[1], Condition::Not(not) if not.len() == 1));
    }

    #[test]
    fn parse_condition_literals() {
        assert_eq!(
            serde_json::from_str::<Condition>(r#""*""#).unwrap(),
            Condition::Everyone
        );
        assert_eq!(
            serde_json::from_str::<Condition>(r#""everyone""#).unwrap(),
            Condition::Literal("everyone".into())
        );
        assert!(matches!(
            serde_json::from_str::<Condition>(r#""[{\"attribute\":\"a\",\"operator\":\"exists\"}]""#)
                .unwrap(),
            Condition::Stringified(_)
        ));
    }

    #[test]
    fn unknown_operator_is_tolerated() {
        let condition: Condition = serde_json::from_str(
            r#"{ "attribute": "a", "operator": "someFutureOperator", "value": 1 }"#,
        )
        .unwrap();
        assert!(
            matches!(condition, Condition::Plain(plain) if plain.operator == Operator::Unsupported)
        );
    }

    #[test]
    fn stringified_segments_are_decoded_lazily() {
        let segments: GroupSegment =
            serde_json::from_str(r#""{\"and\":[\"mobile\",{\"or\":[\"germany\",\"switzerland\"]}]}""#)
                .unwrap();
        let GroupSegment::Stringified(stringified) = &segments else {
            panic!("expected stringified segments, got {segments:?}");
        };
        assert_eq!(
            stringified.get(),
            Some(&GroupSegment::And(vec![
                GroupSegment::Key("mobile".into()),
                GroupSegment::Or(vec![
                    GroupSegment::Key("germany".into()),
                    GroupSegment::Key("switzerland".into())
                ])
            ]))
        );
    }

    #[test]
    fn broken_stringified_value_resolves_to_none() {
        let segments: GroupSegment = serde_json::from_str(r#""{not json""#).unwrap();
        let GroupSegment::Stringified(stringified) = &segments else {
            panic!("expected stringified segments, got {segments:?}");
        };
        assert_eq!(stringified.get(), None);
        // Memoized: second access does not re-parse.
        assert_eq!(stringified.get(), None);
    }

    #[test]
    fn serialize_round_trips_expression_shape() {
        let json = r#"{"and":["mobile",{"not":["germany"]},"*"]}"#;
        let segments: GroupSegment = serde_json::from_str(json).unwrap();
        assert_eq!(serde_json::to_string(&segments).unwrap(), json);
    }

    #[test]
    fn parse_feature() {
        let feature: Feature = serde_json::from_str(
            r#"{
                "key": "checkout",
                "bucketBy": "userId",
                "ranges": [[0, 50000]],
                "variations": [{ "value": "control" }, { "value": "treatment" }],
                "traffic": [{
                    "key": "everyone",
                    "segments": "*",
                    "percentage": 100000,
                    "allocation": [
                        { "variation": "control", "range": [0, 50000] },
                        { "variation": "treatment", "range": [50000, 100000] }
                    ]
                }]
            }"#,
        )
        .unwrap();
        assert_eq!(feature.ranges, vec![Range(0, 50000)]);
        assert!(feature.get_variation("treatment").is_some());
        assert!(feature.get_variation("other").is_none());
        assert_eq!(feature.traffic[0].segments, GroupSegment::Everyone);
        assert!(Range(0, 50000).contains(0));
        assert!(!Range(0, 50000).contains(50000));
    }
}
