//! Raw analytics events.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One event from the analytics stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub name: String,
    /// Milliseconds since the Unix epoch.
    pub time: i64,
    pub distinct_id: String,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

impl Event {
    pub fn new(name: impl Into<String>, distinct_id: impl Into<String>, time: i64) -> Self {
        Self {
            name: name.into(),
            time,
            distinct_id: distinct_id.into(),
            properties: Map::new(),
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Walk a property path (`["a", "b"]` reads `properties.a.b`).
    pub fn lookup<S: AsRef<str>>(&self, path: &[S]) -> Option<&Value> {
        let (first, rest) = path.split_first()?;
        let mut current = self.properties.get(first.as_ref())?;
        for part in rest {
            current = current.get(part.as_ref())?;
        }
        Some(current)
    }
}

pub(crate) fn value_as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

/// String form of a property as the engine coerces it (`value + ''`).
pub(crate) fn value_as_string(value: Option<&Value>) -> String {
    match value {
        None => "undefined".to_string(),
        Some(Value::Null) => "null".to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => match n.as_f64() {
            Some(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", f as i64),
            _ => n.to_string(),
        },
        Some(other) => other.to_string(),
    }
}
