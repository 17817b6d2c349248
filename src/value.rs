use std::fmt;

use indexmap::IndexMap;

use crate::error::RenderError;
use crate::markup::Markup;

/// A dynamically-typed value seen by template expressions.
///
/// Render data, globals and every intermediate result are values. Coercions
/// follow the usual scripting-language rules: `undefined`, `null`, `false`,
/// `0`, `NaN` and `""` are falsy and everything else is truthy.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<Value>),
    Object(IndexMap<String, Value>),
    Markup(Markup),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::Array(_) => "array",
            Self::Object(_) => "object",
            Self::Markup(_) => "markup",
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Undefined | Self::Null => false,
            Self::Bool(b) => *b,
            Self::Number(n) => *n != 0.0 && !n.is_nan(),
            Self::String(s) => !s.is_empty(),
            Self::Array(_) | Self::Object(_) | Self::Markup(_) => true,
        }
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, Self::Undefined | Self::Null)
    }

    pub fn to_number(&self) -> f64 {
        match self {
            Self::Undefined => f64::NAN,
            Self::Null => 0.0,
            Self::Bool(b) => f64::from(u8::from(*b)),
            Self::Number(n) => *n,
            Self::String(s) => string_to_number(s),
            Self::Array(items) => match items.as_slice() {
                [] => 0.0,
                [only] => only.to_number(),
                _ => f64::NAN,
            },
            Self::Object(_) => f64::NAN,
            Self::Markup(m) => string_to_number(m.as_str()),
        }
    }

    /// Whether the value is a string-like primitive for the purposes of `+`
    /// and relational comparison.
    fn is_string_like(&self) -> bool {
        matches!(
            self,
            Self::String(_) | Self::Markup(_) | Self::Array(_) | Self::Object(_)
        )
    }

    pub(crate) fn add(&self, other: &Self) -> Self {
        if self.is_string_like() || other.is_string_like() {
            Self::String(format!("{self}{other}"))
        } else {
            Self::Number(self.to_number() + other.to_number())
        }
    }

    pub(crate) fn strict_equals(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Number(a), Self::Number(b)) => a == b,
            (Self::Array(_), Self::Array(_)) | (Self::Object(_), Self::Object(_)) => false,
            (a, b) => a == b,
        }
    }

    pub(crate) fn loose_equals(&self, other: &Self) -> bool {
        match (self, other) {
            (a, b) if a.is_nullish() && b.is_nullish() => true,
            (a, b) if a.is_nullish() || b.is_nullish() => false,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Bool(_), _) | (_, Self::Bool(_)) | (Self::Number(_), _) | (_, Self::Number(_)) => {
                if matches!(self, Self::Array(_) | Self::Object(_))
                    || matches!(other, Self::Array(_) | Self::Object(_))
                {
                    self.to_string() == other.to_string()
                } else {
                    self.to_number() == other.to_number()
                }
            }
            (a, b) => a.strict_equals(b),
        }
    }

    /// Relational comparison; `None` when the operands are unordered.
    pub(crate) fn compare(&self, other: &Self) -> Option<std::cmp::Ordering> {
        if self.is_string_like() && other.is_string_like() {
            Some(self.to_string().cmp(&other.to_string()))
        } else {
            self.to_number().partial_cmp(&other.to_number())
        }
    }

    /// Reads `base[key]`, failing only when `base` is `undefined` or `null`.
    pub(crate) fn property(&self, key: &Value) -> Result<Value, RenderError> {
        let name = key.to_string();
        match self {
            Self::Undefined | Self::Null => Err(RenderError::PropertyOfNullish {
                property: name,
                base: self.type_name().to_owned(),
            }),
            Self::Object(entries) => Ok(entries.get(&name).cloned().unwrap_or_default()),
            Self::Array(items) => Ok(match name.as_str() {
                "length" => Self::Number(items.len() as f64),
                _ => array_index(&name)
                    .and_then(|i| items.get(i))
                    .cloned()
                    .unwrap_or_default(),
            }),
            Self::String(s) => Ok(string_property(s, &name)),
            Self::Markup(m) => Ok(string_property(m.as_str(), &name)),
            Self::Bool(_) | Self::Number(_) => Ok(Self::Undefined),
        }
    }

    /// Returns a mutable slot for `self[key]`, creating it if needed.
    pub(crate) fn property_mut(&mut self, key: &Value) -> Result<&mut Value, RenderError> {
        let name = key.to_string();
        match self {
            Self::Object(entries) => Ok(entries.entry(name).or_default()),
            Self::Array(items) => match array_index(&name) {
                Some(index) => {
                    if index >= items.len() {
                        items.resize(index + 1, Self::Undefined);
                    }
                    Ok(&mut items[index])
                }
                None => Err(RenderError::AssignToPrimitive {
                    property: name,
                    base: "array".to_owned(),
                }),
            },
            other => Err(RenderError::AssignToPrimitive {
                property: name,
                base: other.type_name().to_owned(),
            }),
        }
    }

    /// The values a `for … of` loop visits.
    pub(crate) fn iterate(&self) -> Result<Vec<Value>, RenderError> {
        match self {
            Self::Array(items) => Ok(items.clone()),
            Self::String(s) => Ok(s.chars().map(|c| Self::String(c.to_string())).collect()),
            other => Err(RenderError::NotIterable(other.type_name().to_owned())),
        }
    }
}

fn array_index(name: &str) -> Option<usize> {
    if name.is_empty() || (name.len() > 1 && name.starts_with('0')) {
        return None;
    }
    name.parse().ok()
}

fn string_property(s: &str, name: &str) -> Value {
    match name {
        "length" => Value::Number(s.encode_utf16().count() as f64),
        _ => array_index(name)
            .and_then(|i| s.chars().nth(i))
            .map_or(Value::Undefined, |c| Value::String(c.to_string())),
    }
}

fn string_to_number(s: &str) -> f64 {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return 0.0;
    }

    if let Some(hex) = trimmed.strip_prefix("0x").or_else(|| trimmed.strip_prefix("0X")) {
        return u64::from_str_radix(hex, 16).map_or(f64::NAN, |n| n as f64);
    }

    match trimmed {
        "Infinity" | "+Infinity" => f64::INFINITY,
        "-Infinity" => f64::NEG_INFINITY,
        _ if trimmed.chars().any(|c| c.is_ascii_alphabetic() && c != 'e' && c != 'E') => f64::NAN,
        _ => trimmed.parse().unwrap_or(f64::NAN),
    }
}

pub(crate) fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_owned()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity" } else { "-Infinity" }.to_owned()
    } else if n == 0.0 {
        "0".to_owned()
    } else if n.fract() == 0.0 && n.abs() < 1e21 {
        format!("{n:.0}")
    } else {
        format!("{n}")
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undefined => f.write_str("undefined"),
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => f.write_str(&format_number(*n)),
            Self::String(s) => f.write_str(s),
            Self::Array(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    if !item.is_nullish() {
                        write!(f, "{item}")?;
                    }
                }
                Ok(())
            }
            Self::Object(_) => f.write_str("[object Object]"),
            Self::Markup(m) => f.write_str(m.as_str()),
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => Self::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Self::String(s),
            serde_json::Value::Array(items) => Self::Array(items.into_iter().map(Self::from).collect()),
            serde_json::Value::Object(entries) => {
                Self::Object(entries.into_iter().map(|(k, v)| (k, Self::from(v))).collect())
            }
        }
    }
}

impl From<&serde_json::Value> for Value {
    fn from(value: &serde_json::Value) -> Self {
        Self::from(value.clone())
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Number(f64::from(value))
    }
}

impl From<Markup> for Value {
    fn from(value: Markup) -> Self {
        Self::Markup(value)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(value: Vec<T>) -> Self {
        Self::Array(value.into_iter().map(Into::into).collect())
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for Value {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::{SerializeMap, SerializeSeq};

        match self {
            Self::Undefined | Self::Null => serializer.serialize_none(),
            Self::Bool(b) => serializer.serialize_bool(*b),
            Self::Number(n) => serializer.serialize_f64(*n),
            Self::String(s) => serializer.serialize_str(s),
            Self::Markup(m) => serializer.serialize_str(m.as_str()),
            Self::Array(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Self::Object(entries) => {
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (key, value) in entries {
                    map.serialize_entry(key, value)?;
                }
                map.end()
            }
        }
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for Value {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use serde::Deserialize as _;

        // Data arrives as JSON-shaped trees; reuse serde_json's visitor.
        serde_json::Value::deserialize(deserializer).map(Self::from)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use serde_json::json;

    use super::*;

    #[rstest]
    #[case(Value::Undefined, false)]
    #[case(Value::Null, false)]
    #[case(Value::Number(0.0), false)]
    #[case(Value::Number(f64::NAN), false)]
    #[case(Value::from(""), false)]
    #[case(Value::from("0"), true)]
    #[case(Value::Array(Vec::new()), true)]
    #[case(Value::Markup(Markup::new("")), true)]
    fn truthiness(#[case] value: Value, #[case] expected: bool) {
        assert_eq!(value.is_truthy(), expected);
    }

    #[rstest]
    #[case(1.0, "1")]
    #[case(-0.0, "0")]
    #[case(2.5, "2.5")]
    #[case(1e20, "100000000000000000000")]
    #[case(f64::NAN, "NaN")]
    #[case(f64::NEG_INFINITY, "-Infinity")]
    fn numbers_display_like_scripts(#[case] n: f64, #[case] expected: &str) {
        assert_eq!(Value::Number(n).to_string(), expected);
    }

    #[test]
    #[ntest::timeout(100)]
    fn addition_concatenates_when_either_side_is_a_string() {
        assert_eq!(Value::from(1).add(&Value::from("2")), Value::from("12"));
        assert_eq!(Value::from(1).add(&Value::from(2)), Value::Number(3.0));
        assert_eq!(Value::from(true).add(&Value::Null), Value::Number(1.0));
    }

    #[test]
    #[ntest::timeout(100)]
    fn loose_equality_coerces() {
        assert!(Value::from("1").loose_equals(&Value::from(1)));
        assert!(Value::Null.loose_equals(&Value::Undefined));
        assert!(!Value::Null.loose_equals(&Value::from(0)));
        assert!(!Value::from("1").strict_equals(&Value::from(1)));
    }

    #[test]
    #[ntest::timeout(100)]
    fn property_reads() {
        let data = Value::from(json!({"items": [1, 2, 3], "name": "héllo"}));

        let items = data.property(&Value::from("items")).unwrap();
        assert_eq!(items.property(&Value::from("length")).unwrap(), Value::Number(3.0));
        assert_eq!(items.property(&Value::from(1)).unwrap(), Value::Number(2.0));
        assert_eq!(items.property(&Value::from(7)).unwrap(), Value::Undefined);

        let name = data.property(&Value::from("name")).unwrap();
        assert_eq!(name.property(&Value::from(1)).unwrap(), Value::from("é"));

        assert_eq!(
            data.property(&Value::from("missing"))
                .unwrap()
                .property(&Value::from("x")),
            Err(RenderError::PropertyOfNullish {
                property: "x".to_owned(),
                base: "undefined".to_owned()
            })
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn arrays_display_comma_joined() {
        let value = Value::from(json!([1, null, "a", [2, 3]]));
        assert_eq!(value.to_string(), "1,,a,2,3");
    }

    #[test]
    #[ntest::timeout(100)]
    fn object_key_order_is_preserved() {
        let value = Value::from(json!({"b": 1, "a": 2}));
        let Value::Object(entries) = value else {
            panic!("expected an object");
        };
        assert_eq!(entries.keys().collect::<Vec<_>>(), ["b", "a"]);
    }
}
