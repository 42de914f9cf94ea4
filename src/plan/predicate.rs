//! Event predicates and value extraction.
//!
//! Every predicate answers one question, "does this event match?", through
//! the [`Matches`] trait. The script renderer turns the same structures into
//! engine expressions, so the interpreter and the generated script agree.

use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

use crate::model::event::{value_as_number, value_as_string};
use crate::model::{Condition, ConditionOperator, Event};

/// Column text that refers to the event record directly.
static EVENT_REFERENCE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\bevent\b").unwrap());

/// Column text that starts like a numeric literal.
static NUMERIC_LITERAL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[0-9][0-9.]*").unwrap());

/// Bracketed property access, e.g. `["Plan name"]`.
static BRACKET_ACCESS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"\["([^"]*)"\]"#).unwrap());

/// Anything that can be tested against a single event.
pub trait Matches {
    fn matches(&self, event: &Event) -> bool;
}

/// Split a dotted property path into its segments.
pub fn property_path(column: &str) -> Vec<String> {
    column.split('.').map(str::to_string).collect()
}

/// A compiled condition on one property.
#[derive(Debug, Clone)]
pub struct ConditionTest {
    pub path: Vec<String>,
    pub operator: ConditionOperator,
    pub value: String,
    regex: Option<Regex>,
}

impl ConditionTest {
    pub fn new(condition: &Condition) -> Self {
        let regex = match condition.operator {
            ConditionOperator::Matches | ConditionOperator::NotMatches => {
                Regex::new(&condition.value).ok()
            }
            _ => None,
        };
        Self {
            path: property_path(&condition.column),
            operator: condition.operator,
            value: condition.value.clone(),
            regex,
        }
    }

    /// The comparison operand for numeric operators.
    pub fn numeric_value(&self) -> f64 {
        self.value.trim().parse().unwrap_or(f64::NAN)
    }
}

impl Matches for ConditionTest {
    fn matches(&self, event: &Event) -> bool {
        let actual = event.lookup(&self.path);
        match self.operator {
            ConditionOperator::Eq => value_as_string(actual) == self.value,
            ConditionOperator::Ne => value_as_string(actual) != self.value,
            ConditionOperator::Matches | ConditionOperator::NotMatches => {
                let text = match actual {
                    Some(Value::String(s)) if !s.is_empty() => s.clone(),
                    None | Some(Value::Null) | Some(Value::String(_)) => String::new(),
                    Some(other) => value_as_string(Some(other)),
                };
                let found = self.regex.as_ref().is_some_and(|re| re.is_match(&text));
                found == (self.operator == ConditionOperator::Matches)
            }
            op => {
                let Some(lhs) = actual.and_then(value_as_number) else {
                    return false;
                };
                let rhs = self.numeric_value();
                match op {
                    ConditionOperator::Gt => lhs > rhs,
                    ConditionOperator::Gte => lhs >= rhs,
                    ConditionOperator::Lt => lhs < rhs,
                    ConditionOperator::Lte => lhs <= rhs,
                    _ => false,
                }
            }
        }
    }
}

/// Event-name membership plus a conjunction of conditions.
#[derive(Debug, Clone)]
pub struct EventPredicate {
    pub names: Vec<String>,
    pub conditions: Vec<ConditionTest>,
}

impl EventPredicate {
    pub fn new(names: Vec<String>, conditions: &[Condition]) -> Self {
        Self {
            names,
            conditions: conditions.iter().map(ConditionTest::new).collect(),
        }
    }
}

impl Matches for EventPredicate {
    fn matches(&self, event: &Event) -> bool {
        self.names.iter().any(|n| *n == event.name)
            && self.conditions.iter().all(|c| c.matches(event))
    }
}

/// A segment: conditions only, no event-name test.
#[derive(Debug, Clone)]
pub struct SegmentPredicate {
    pub name: String,
    pub conditions: Vec<ConditionTest>,
}

impl Matches for SegmentPredicate {
    fn matches(&self, event: &Event) -> bool {
        self.conditions.iter().all(|c| c.matches(event))
    }
}

/// The experiment exposure test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExposurePredicate {
    pub event_name: String,
    pub experiment_id_path: Vec<String>,
    pub experiment_id: String,
    pub start: i64,
    pub end: i64,
}

impl Matches for ExposurePredicate {
    fn matches(&self, event: &Event) -> bool {
        event.name == self.event_name
            && event.lookup(&self.experiment_id_path).and_then(Value::as_str)
                == Some(self.experiment_id.as_str())
            && event.time >= self.start
            && event.time <= self.end
    }
}

/// How a metric extracts a number from a matching event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueExpr {
    /// No column: each occurrence counts as 1.
    One,
    /// A numeric literal, kept verbatim.
    Literal(String),
    /// An expression over the event record, kept verbatim.
    Raw(String),
    /// A property lookup.
    Property(Vec<String>),
}

impl ValueExpr {
    pub fn from_column(column: Option<&str>) -> Self {
        match column {
            None => ValueExpr::One,
            Some(col) if EVENT_REFERENCE.is_match(col) => ValueExpr::Raw(col.to_string()),
            Some(col) if NUMERIC_LITERAL.is_match(col) => ValueExpr::Literal(col.to_string()),
            Some(col) => ValueExpr::Property(property_path(col)),
        }
    }

    /// Evaluate against an event. Non-numeric results yield `None`.
    pub fn eval(&self, event: &Event) -> Option<f64> {
        match self {
            ValueExpr::One => Some(1.0),
            ValueExpr::Literal(text) => text.parse().ok(),
            ValueExpr::Property(path) => event.lookup(path).and_then(value_as_number),
            ValueExpr::Raw(text) => eval_event_reference(text, event),
        }
    }
}

/// Resolve the simple forms of raw event references the interpreter understands:
/// `event.time`, `event.properties.a.b` and `event.properties["a"]["b"]`.
fn eval_event_reference(text: &str, event: &Event) -> Option<f64> {
    let text = text.trim();
    if text == "event.time" {
        return Some(event.time as f64);
    }
    let rest = text.strip_prefix("event.properties")?;
    let path: Vec<String> = if let Some(dotted) = rest.strip_prefix('.') {
        property_path(dotted)
    } else {
        let parts: Vec<String> = BRACKET_ACCESS
            .captures_iter(rest)
            .map(|c| c[1].to_string())
            .collect();
        if parts.is_empty() || BRACKET_ACCESS.replace_all(rest, "") != "" {
            return None;
        }
        parts
    };
    event.lookup(&path).and_then(value_as_number)
}

/// A dimension evaluated at first exposure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DimensionExpr {
    pub path: Vec<String>,
}

impl DimensionExpr {
    /// The bucket for this event, or `None` for falsy values.
    pub fn eval(&self, event: &Event) -> Option<String> {
        match event.lookup(&self.path)? {
            Value::Null | Value::Bool(false) => None,
            Value::String(s) if s.is_empty() => None,
            Value::Number(n) if n.as_f64() == Some(0.0) => None,
            other => Some(value_as_string(Some(other))),
        }
    }
}
