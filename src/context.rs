use std::collections::HashMap;

use derive_more::From;
use serde::{Deserialize, Serialize};

/// Type alias for a HashMap representing the evaluation context (user attributes).
///
/// Keys are attribute names. Nested attributes are addressed with dotted paths in conditions and
/// `bucketBy` (e.g., `"user.id"`).
///
/// # Examples
/// ```
/// # use featurevisor::{Context, AttributeValue};
/// let context = [
///     ("userId".to_owned(), "123".into()),
///     ("age".to_owned(), 30.0.into()),
///     ("isPremium".to_owned(), true.into()),
/// ].into_iter().collect::<Context>();
/// ```
pub type Context = HashMap<String, AttributeValue>;

/// Enum representing possible values of a context attribute.
///
/// Conveniently implements `From` conversions for `String`, `&str`, `f64`, `i64`, and `bool`.
/// Dates are passed as RFC 3339 strings.
#[derive(Debug, Serialize, Deserialize, PartialEq, From, Clone)]
#[serde(untagged)]
pub enum AttributeValue {
    /// A string value.
    String(String),
    /// A numerical value.
    Number(f64),
    /// A boolean value.
    Boolean(bool),
    /// A list of values.
    Array(Vec<AttributeValue>),
    /// A nested object.
    Object(HashMap<String, AttributeValue>),
    /// An explicit null.
    Null,
}

impl AttributeValue {
    /// Return string slice if the value is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Return number if the value is a number.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            AttributeValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Render the value the way it takes part in a bucket key.
    pub(crate) fn to_bucket_key_part(&self) -> String {
        match self {
            AttributeValue::String(s) => s.clone(),
            AttributeValue::Number(n) => format_number(*n),
            AttributeValue::Boolean(b) => b.to_string(),
            AttributeValue::Null => String::new(),
            AttributeValue::Array(items) => items
                .iter()
                .map(AttributeValue::to_bucket_key_part)
                .collect::<Vec<_>>()
                .join(","),
            // Matches how other SDKs stringify objects, so keys stay compatible across languages.
            AttributeValue::Object(_) => "[object Object]".to_owned(),
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        Self::Number(value as f64)
    }
}

/// Integral numbers are printed without a fractional part (`123`, not `123.0`).
pub(crate) fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

/// Resolve an attribute path (possibly dotted) from the context.
///
/// Returns `None` if any segment of the path is missing or traverses a non-object value.
pub fn get_value_from_context<'a>(context: &'a Context, path: &str) -> Option<&'a AttributeValue> {
    if let Some(value) = context.get(path) {
        return Some(value);
    }

    let mut parts = path.split('.');
    let mut current = context.get(parts.next()?)?;
    for part in parts {
        match current {
            AttributeValue::Object(map) => current = map.get(part)?,
            _ => return None,
        }
    }
    Some(current)
}

/// Merge `overrides` on top of `base`, returning a new context.
pub(crate) fn merge_contexts(base: &Context, overrides: &Context) -> Context {
    let mut merged = base.clone();
    merged.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::{get_value_from_context, AttributeValue, Context};

    fn nested_context() -> Context {
        serde_json::from_str(
            r#"{
                "userId": "123",
                "age": 30,
                "user": { "id": "456", "profile": { "country": "nl" } },
                "tags": ["a", "b"],
                "nothing": null
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn resolves_top_level_attributes() {
        let context = nested_context();
        assert_eq!(
            get_value_from_context(&context, "userId"),
            Some(&"123".into())
        );
        assert_eq!(get_value_from_context(&context, "age"), Some(&30.0.into()));
        assert_eq!(
            get_value_from_context(&context, "nothing"),
            Some(&AttributeValue::Null)
        );
    }

    #[test]
    fn resolves_dotted_paths() {
        let context = nested_context();
        assert_eq!(
            get_value_from_context(&context, "user.id"),
            Some(&"456".into())
        );
        assert_eq!(
            get_value_from_context(&context, "user.profile.country"),
            Some(&"nl".into())
        );
    }

    #[test]
    fn missing_paths_resolve_to_none() {
        let context = nested_context();
        assert_eq!(get_value_from_context(&context, "user.email"), None);
        assert_eq!(get_value_from_context(&context, "userId.length"), None);
        assert_eq!(get_value_from_context(&context, "unknown"), None);
        assert_eq!(get_value_from_context(&HashMap::new(), "a.b"), None);
    }

    #[test]
    fn bucket_key_parts() {
        assert_eq!(AttributeValue::from(123.0).to_bucket_key_part(), "123");
        assert_eq!(AttributeValue::from(1.5).to_bucket_key_part(), "1.5");
        assert_eq!(AttributeValue::from(true).to_bucket_key_part(), "true");
        assert_eq!(AttributeValue::from("abc").to_bucket_key_part(), "abc");
        assert_eq!(AttributeValue::Null.to_bucket_key_part(), "");
        assert_eq!(
            AttributeValue::from(vec![AttributeValue::from("a"), 2.0.into()]).to_bucket_key_part(),
            "a,2"
        );
    }
}
