use std::collections::BTreeMap;
use std::fmt::{Debug, Display, Formatter};

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::values::objid::ObjId;

/// A G value. G is string-centric: every value coerces to a string, and the
/// numeric builtins coerce back with "parse decimal, else 0".
#[derive(Clone, PartialEq)]
pub enum Value {
    Str(String),
    Num(f64),
    Bool(bool),
    Null,
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    Obj(ObjId),
}

pub fn v_str(s: &str) -> Value {
    Value::Str(s.to_string())
}

pub fn v_string(s: String) -> Value {
    Value::Str(s)
}

pub fn v_num(n: f64) -> Value {
    Value::Num(n)
}

pub fn v_int(n: i64) -> Value {
    Value::Num(n as f64)
}

pub fn v_bool(b: bool) -> Value {
    Value::Bool(b)
}

pub fn v_null() -> Value {
    Value::Null
}

pub fn v_list(l: Vec<Value>) -> Value {
    Value::List(l)
}

pub fn v_map(m: BTreeMap<String, Value>) -> Value {
    Value::Map(m)
}

pub fn v_obj(id: ObjId) -> Value {
    Value::Obj(id)
}

/// Formats a number the way G prints it: integral values without a trailing
/// fraction, everything else as plain decimal.
pub fn format_num(n: f64) -> String {
    if n.fract() == 0.0 && n.is_finite() && n.abs() < 9.0e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Str(_) => "string",
            Value::Num(_) => "number",
            Value::Bool(_) => "boolean",
            Value::Null => "null",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Obj(_) => "object",
        }
    }

    /// String coercion. Total: every value has a string form. Null is the
    /// empty string, lists are the bracketed space-joined form.
    pub fn coerce_str(&self) -> String {
        match self {
            Value::Str(s) => s.clone(),
            Value::Num(n) => format_num(*n),
            Value::Bool(b) => {
                if *b {
                    "true".to_string()
                } else {
                    "false".to_string()
                }
            }
            Value::Null => String::new(),
            Value::List(l) => {
                let parts: Vec<String> = l.iter().map(|v| v.coerce_str()).collect();
                format!("[{}]", parts.join(" "))
            }
            Value::Map(m) => {
                let parts: Vec<String> = m
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k, v.coerce_str()))
                    .collect();
                format!("{{{}}}", parts.join(", "))
            }
            Value::Obj(id) => id.to_string(),
        }
    }

    /// Numeric coercion: parse decimal, else 0.
    pub fn coerce_num(&self) -> f64 {
        match self {
            Value::Num(n) => *n,
            Value::Bool(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            Value::Str(s) => s.trim().parse::<f64>().unwrap_or(0.0),
            _ => 0.0,
        }
    }

    /// Truthiness: false, 0, null, and the empty string are false; all else
    /// is true.
    pub fn is_true(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::Num(n) => *n != 0.0,
            Value::Null => false,
            Value::Str(s) => !s.is_empty(),
            _ => true,
        }
    }

    /// Source-literal rendering, used by diagnostics and `/eval` echo.
    /// Differs from `coerce_str` only in quoting strings.
    pub fn to_literal(&self) -> String {
        match self {
            Value::Str(s) => format!("\"{}\"", escape_str(s)),
            Value::List(l) => {
                let parts: Vec<String> = l.iter().map(|v| v.to_literal()).collect();
                format!("[{}]", parts.join(" "))
            }
            Value::Null => "null".to_string(),
            _ => self.coerce_str(),
        }
    }
}

pub fn escape_str(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            _ => out.push(c),
        }
    }
    out
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.coerce_str())
    }
}

impl Debug for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_literal())
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        v_str(s)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Num(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<ObjId> for Value {
    fn from(id: ObjId) -> Self {
        Value::Obj(id)
    }
}

// Document form: JSON, with object references wrapped as {"$ref": "id"} so
// they survive the round trip distinct from strings and maps.
impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Str(s) => serializer.serialize_str(s),
            Value::Num(n) => serializer.serialize_f64(*n),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Null => serializer.serialize_unit(),
            Value::List(l) => l.serialize(serializer),
            Value::Map(m) => m.serialize(serializer),
            Value::Obj(id) => {
                use serde::ser::SerializeMap;
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("$ref", id.as_str())?;
                map.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let json = serde_json::Value::deserialize(deserializer)?;
        from_json(&json).map_err(D::Error::custom)
    }
}

pub fn from_json(json: &serde_json::Value) -> Result<Value, String> {
    Ok(match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => {
            Value::Num(n.as_f64().ok_or_else(|| "non-finite number".to_string())?)
        }
        serde_json::Value::String(s) => Value::Str(s.clone()),
        serde_json::Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(from_json(item)?);
            }
            Value::List(out)
        }
        serde_json::Value::Object(fields) => {
            if fields.len() == 1 {
                if let Some(serde_json::Value::String(id)) = fields.get("$ref") {
                    return Ok(Value::Obj(ObjId::new(id.as_str())));
                }
            }
            let mut out = BTreeMap::new();
            for (k, v) in fields {
                out.insert(k.clone(), from_json(v)?);
            }
            Value::Map(out)
        }
    })
}
