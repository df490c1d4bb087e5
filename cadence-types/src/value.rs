use std::fmt;

use serde::{Deserialize, Serialize};

/// A runtime value produced by expression evaluation or held in a user variable.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
}

impl Value {
    pub fn from_json(json: &serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Int(i64::from(*b)),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => n.as_f64().map(Value::Float).unwrap_or(Value::Null),
            },
            serde_json::Value::String(s) => Value::Str(s.clone()),
            serde_json::Value::Array(items) => {
                Value::List(items.iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(_) => Value::Null,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Float(_))
    }

    /// Integer view of a numeric value; floats truncate toward zero.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Float(f) if f.is_finite() => Some(f.trunc() as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Like [`Value::as_i64`] but also accepts numeric strings.
    pub fn coerce_i64(&self) -> Option<i64> {
        match self {
            Value::Str(s) => {
                let s = s.trim();
                s.parse::<i64>()
                    .ok()
                    .or_else(|| s.parse::<f64>().ok().filter(|f| f.is_finite()).map(|f| f.trunc() as i64))
            }
            other => other.as_i64(),
        }
    }

    pub fn coerce_f64(&self) -> Option<f64> {
        match self {
            Value::Str(s) => s.trim().parse::<f64>().ok(),
            other => other.as_f64(),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(items) => !items.is_empty(),
        }
    }

    /// Equality that treats `1` and `1.0` as the same number.
    pub fn loose_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a == b,
            (a, b) if a.is_numeric() && b.is_numeric() => a.as_f64() == b.as_f64(),
            (Value::List(a), Value::List(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.loose_eq(y))
            }
            (a, b) => a == b,
        }
    }

    /// Converts `value` to the same kind as `self`, falling back to `value` unchanged.
    pub fn coerce_like(&self, value: Value) -> Value {
        match self {
            Value::Int(_) => value.coerce_i64().map(Value::Int).unwrap_or(value),
            Value::Float(_) => value.coerce_f64().map(Value::Float).unwrap_or(value),
            Value::Str(_) => match value {
                Value::Str(_) => value,
                Value::Null => value,
                other => Value::Str(other.to_string()),
            },
            Value::List(_) => match value {
                Value::List(_) => value,
                Value::Null => value,
                other => Value::List(vec![other]),
            },
            Value::Null => value,
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<u8> for Value {
    fn from(v: u8) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<usize> for Value {
    fn from(v: usize) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::List(v)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "None"),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(v) => write!(f, "{}", v),
            Value::Str(s) => write!(f, "{}", s),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
        }
    }
}

/// Linear rescale directive: `{"scale_value": expr, "range_in": [a, b], "range_out": [c, d]}`.
///
/// Absent ranges default to `[0, 127]`; a present but malformed range decodes to `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct ScaleDirective {
    pub source: Box<ConfigValue>,
    pub range_in: Option<(f64, f64)>,
    pub range_out: Option<(f64, f64)>,
}

/// Scale quantization directive: `{"scale_notes": {"scale_value", "scale_root", "scale_type"}}`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ScaleNotesDirective {
    pub value: Option<Box<ConfigValue>>,
    pub root: Option<Box<ConfigValue>>,
    pub scale_type: Option<Box<ConfigValue>>,
}

impl ScaleNotesDirective {
    pub fn is_complete(&self) -> bool {
        self.value.is_some() && self.root.is_some() && self.scale_type.is_some()
    }
}

/// A configuration leaf decoded once at load time.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ConfigValue {
    #[default]
    Null,
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<ConfigValue>),
    Scale(ScaleDirective),
    ScaleNotes(ScaleNotesDirective),
}

const DEFAULT_RANGE: (f64, f64) = (0.0, 127.0);

impl ConfigValue {
    pub fn from_json(json: &serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => ConfigValue::Null,
            serde_json::Value::Bool(b) => ConfigValue::Int(i64::from(*b)),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => ConfigValue::Int(i),
                None => n.as_f64().map(ConfigValue::Float).unwrap_or(ConfigValue::Null),
            },
            serde_json::Value::String(s) => ConfigValue::Str(s.clone()),
            serde_json::Value::Array(items) => {
                ConfigValue::List(items.iter().map(ConfigValue::from_json).collect())
            }
            serde_json::Value::Object(map) => {
                if let Some(source) = map.get("scale_value") {
                    ConfigValue::Scale(ScaleDirective {
                        source: Box::new(ConfigValue::from_json(source)),
                        range_in: decode_range(map.get("range_in")),
                        range_out: decode_range(map.get("range_out")),
                    })
                } else if let Some(body) = map.get("scale_notes") {
                    let field = |key: &str| {
                        body.get(key)
                            .filter(|v| !v.is_null())
                            .map(|v| Box::new(ConfigValue::from_json(v)))
                    };
                    ConfigValue::ScaleNotes(ScaleNotesDirective {
                        value: field("scale_value"),
                        root: field("scale_root"),
                        scale_type: field("scale_type"),
                    })
                } else {
                    ConfigValue::Null
                }
            }
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, ConfigValue::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ConfigValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Literal integer, if this leaf is one.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            ConfigValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn is_list(&self) -> bool {
        matches!(self, ConfigValue::List(_))
    }

    /// True for plain scalar leaves (not lists, directives or null).
    pub fn is_scalar(&self) -> bool {
        matches!(
            self,
            ConfigValue::Int(_) | ConfigValue::Float(_) | ConfigValue::Str(_)
        )
    }

    /// Literal contents as a runtime value; directives become `Null`.
    pub fn to_value(&self) -> Value {
        match self {
            ConfigValue::Null => Value::Null,
            ConfigValue::Int(i) => Value::Int(*i),
            ConfigValue::Float(f) => Value::Float(*f),
            ConfigValue::Str(s) => Value::Str(s.clone()),
            ConfigValue::List(items) => Value::List(items.iter().map(ConfigValue::to_value).collect()),
            ConfigValue::Scale(_) | ConfigValue::ScaleNotes(_) => Value::Null,
        }
    }
}

impl From<Value> for ConfigValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => ConfigValue::Null,
            Value::Int(i) => ConfigValue::Int(i),
            Value::Float(f) => ConfigValue::Float(f),
            Value::Str(s) => ConfigValue::Str(s),
            Value::List(items) => ConfigValue::List(items.into_iter().map(ConfigValue::from).collect()),
        }
    }
}

impl From<&str> for ConfigValue {
    fn from(v: &str) -> Self {
        ConfigValue::Str(v.to_string())
    }
}

impl From<i64> for ConfigValue {
    fn from(v: i64) -> Self {
        ConfigValue::Int(v)
    }
}

impl From<f64> for ConfigValue {
    fn from(v: f64) -> Self {
        ConfigValue::Float(v)
    }
}

fn decode_range(json: Option<&serde_json::Value>) -> Option<(f64, f64)> {
    let Some(json) = json else {
        return Some(DEFAULT_RANGE);
    };
    match json.as_array().map(Vec::as_slice) {
        Some([lo, hi]) => Some((lo.as_f64()?, hi.as_f64()?)),
        _ => None,
    }
}
