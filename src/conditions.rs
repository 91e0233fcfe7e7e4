use chrono::{DateTime, NaiveDate, Utc};
use semver::{BuildMetadata, Version};

use crate::{
    context::get_value_from_context,
    datafile::{Condition, ConditionValue, Operator, PlainCondition},
    regex_cache::RegexCache,
    AttributeValue, Context,
};

impl Condition {
    /// Evaluate the condition tree against `context`. AND/OR short-circuit.
    pub(crate) fn is_matched(&self, context: &Context, regex_cache: &RegexCache) -> bool {
        match self {
            Condition::Plain(condition) => condition.is_matched(context, regex_cache),
            Condition::And(children) | Condition::Every(children) => children
                .iter()
                .all(|child| child.is_matched(context, regex_cache)),
            Condition::Or(children) => children
                .iter()
                .any(|child| child.is_matched(context, regex_cache)),
            Condition::Not(children) => !children
                .iter()
                .all(|child| child.is_matched(context, regex_cache)),
            Condition::Everyone => true,
            Condition::Literal(_) => false,
            Condition::Stringified(stringified) => stringified
                .get()
                .is_some_and(|condition| condition.is_matched(context, regex_cache)),
        }
    }
}

impl PlainCondition {
    fn is_matched(&self, context: &Context, regex_cache: &RegexCache) -> bool {
        self.operator.eval(
            get_value_from_context(context, &self.attribute),
            self.value.as_ref(),
            self.regex_flags.as_deref().unwrap_or(""),
            regex_cache,
        )
    }
}

impl Operator {
    /// Applying `Operator` to the values. Returns `false` if the operator cannot be applied or
    /// there's a misconfiguration.
    fn eval(
        &self,
        attribute: Option<&AttributeValue>,
        condition_value: Option<&ConditionValue>,
        regex_flags: &str,
        regex_cache: &RegexCache,
    ) -> bool {
        self.try_eval(attribute, condition_value, regex_flags, regex_cache)
            .unwrap_or(false)
    }

    /// Try applying `Operator` to the values, returning `None` if the operator cannot be applied.
    fn try_eval(
        &self,
        attribute: Option<&AttributeValue>,
        condition_value: Option<&ConditionValue>,
        regex_flags: &str,
        regex_cache: &RegexCache,
    ) -> Option<bool> {
        match self {
            Self::Exists => return Some(attribute.is_some()),
            Self::NotExists => return Some(attribute.is_none()),
            _ => {}
        }

        let attribute = attribute?;
        let condition_value = condition_value?;

        match self {
            Self::Equals | Self::NotEquals => {
                let equal = typed_eq(attribute, condition_value)?;
                Some(equal == (*self == Self::Equals))
            }

            Self::GreaterThan
            | Self::GreaterThanOrEquals
            | Self::LessThan
            | Self::LessThanOrEquals => {
                let (AttributeValue::Number(a), ConditionValue::Number(b)) =
                    (attribute, condition_value)
                else {
                    return None;
                };
                Some(match self {
                    Self::GreaterThan => a > b,
                    Self::GreaterThanOrEquals => a >= b,
                    Self::LessThan => a < b,
                    Self::LessThanOrEquals => a <= b,
                    _ => {
                        // unreachable
                        return None;
                    }
                })
            }

            Self::Contains | Self::NotContains | Self::StartsWith | Self::EndsWith => {
                let (AttributeValue::String(a), ConditionValue::String(b)) =
                    (attribute, condition_value)
                else {
                    return None;
                };
                Some(match self {
                    Self::Contains => a.contains(b.as_str()),
                    Self::NotContains => !a.contains(b.as_str()),
                    Self::StartsWith => a.starts_with(b.as_str()),
                    Self::EndsWith => a.ends_with(b.as_str()),
                    _ => {
                        // unreachable
                        return None;
                    }
                })
            }

            Self::SemverEquals
            | Self::SemverNotEquals
            | Self::SemverGreaterThan
            | Self::SemverGreaterThanOrEquals
            | Self::SemverLessThan
            | Self::SemverLessThanOrEquals => {
                let (AttributeValue::String(a), ConditionValue::String(b)) =
                    (attribute, condition_value)
                else {
                    return None;
                };
                let attribute_version = parse_version(a)?;
                let condition_version = parse_version(b)?;
                Some(match self {
                    Self::SemverEquals => attribute_version == condition_version,
                    Self::SemverNotEquals => attribute_version != condition_version,
                    Self::SemverGreaterThan => attribute_version > condition_version,
                    Self::SemverGreaterThanOrEquals => attribute_version >= condition_version,
                    Self::SemverLessThan => attribute_version < condition_version,
                    Self::SemverLessThanOrEquals => attribute_version <= condition_version,
                    _ => {
                        // unreachable
                        return None;
                    }
                })
            }

            Self::Before | Self::After => {
                let (AttributeValue::String(a), ConditionValue::String(b)) =
                    (attribute, condition_value)
                else {
                    return None;
                };
                let attribute_date = parse_date(a)?;
                let condition_date = parse_date(b)?;
                Some(if *self == Self::Before {
                    attribute_date < condition_date
                } else {
                    attribute_date > condition_date
                })
            }

            Self::In | Self::NotIn => {
                if matches!(
                    attribute,
                    AttributeValue::Array(_) | AttributeValue::Object(_)
                ) {
                    return None;
                }
                let ConditionValue::Array(values) = condition_value else {
                    return None;
                };
                let is_in = values
                    .iter()
                    .any(|value| typed_eq(attribute, value) == Some(true));
                Some(is_in == (*self == Self::In))
            }

            Self::Includes | Self::NotIncludes => {
                let AttributeValue::Array(items) = attribute else {
                    return None;
                };
                if matches!(condition_value, ConditionValue::Array(_)) {
                    return None;
                }
                let includes = items
                    .iter()
                    .any(|item| typed_eq(item, condition_value) == Some(true));
                Some(includes == (*self == Self::Includes))
            }

            Self::Matches | Self::NotMatches => {
                let (AttributeValue::String(s), ConditionValue::String(pattern)) =
                    (attribute, condition_value)
                else {
                    return None;
                };
                let regex = regex_cache.get(pattern, regex_flags)?;
                Some(regex.is_match(s) == (*self == Self::Matches))
            }

            Self::Exists | Self::NotExists | Self::Unsupported => None,
        }
    }
}

/// Compare values of the same type. Returns `None` if types differ.
fn typed_eq(attribute: &AttributeValue, value: &ConditionValue) -> Option<bool> {
    match (attribute, value) {
        (AttributeValue::String(a), ConditionValue::String(b)) => Some(a == b),
        (AttributeValue::Number(a), ConditionValue::Number(b)) => Some(a == b),
        (AttributeValue::Boolean(a), ConditionValue::Boolean(b)) => Some(a == b),
        (AttributeValue::Null, ConditionValue::Null) => Some(true),
        _ => None,
    }
}

/// Parse a semantic version. A leading `v` and missing minor/patch components are tolerated
/// (`v1.2` is `1.2.0`). Build metadata is dropped, so it does not take part in comparison.
fn parse_version(s: &str) -> Option<Version> {
    let s = s.trim();
    let s = s.strip_prefix('v').unwrap_or(s);

    let mut version = match Version::parse(s) {
        Ok(version) => version,
        Err(_) => {
            let (core, suffix) = s.split_at(s.find(|c| c == '-' || c == '+').unwrap_or(s.len()));
            let mut parts: Vec<&str> = core.split('.').collect();
            if parts.len() > 3 {
                return None;
            }
            parts.resize(3, "0");
            Version::parse(&format!("{}{}", parts.join("."), suffix)).ok()?
        }
    };
    version.build = BuildMetadata::EMPTY;
    Some(version)
}

/// Parse an RFC 3339 timestamp, or a plain `YYYY-MM-DD` date (midnight UTC).
fn parse_date(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(date) = DateTime::parse_from_rfc3339(s) {
        return Some(date.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()?;
    Some(date.and_hms_opt(0, 0, 0)?.and_utc())
}
