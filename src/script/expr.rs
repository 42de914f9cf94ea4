//! Script expression AST and builders.
//!
//! Predicates and value expressions from [`crate::plan`] are lowered into
//! [`JsExpr`] trees, then serialized through a [`TokenStream`].

use super::token::{Token, TokenStream};
use crate::model::ConditionOperator;
use crate::plan::{ConditionTest, EventPredicate, ExposurePredicate, ValueExpr};
use crate::window::WindowBound;

#[derive(Debug, Clone, PartialEq)]
pub enum JsExpr {
    Ident(String),
    Number(f64),
    Str(String),
    /// `object.property`
    Member {
        object: Box<JsExpr>,
        property: String,
    },
    /// `object[key]`
    Index {
        object: Box<JsExpr>,
        key: Box<JsExpr>,
    },
    BinaryOp {
        left: Box<JsExpr>,
        op: BinaryOperator,
        right: Box<JsExpr>,
    },
    Not(Box<JsExpr>),
    Call {
        callee: Box<JsExpr>,
        args: Vec<JsExpr>,
    },
    Array(Vec<JsExpr>),
    Paren(Box<JsExpr>),
    /// Verbatim script text.
    Raw(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    StrictEq,
    StrictNe,
    LooseEq,
    LooseNe,
    Lt,
    Lte,
    Gt,
    Gte,
    Add,
    Sub,
    And,
    Or,
}

fn binary_op_to_token(op: BinaryOperator) -> Token {
    match op {
        BinaryOperator::StrictEq => Token::StrictEq,
        BinaryOperator::StrictNe => Token::StrictNe,
        BinaryOperator::LooseEq => Token::LooseEq,
        BinaryOperator::LooseNe => Token::LooseNe,
        BinaryOperator::Lt => Token::Lt,
        BinaryOperator::Lte => Token::Lte,
        BinaryOperator::Gt => Token::Gt,
        BinaryOperator::Gte => Token::Gte,
        BinaryOperator::Add => Token::Plus,
        BinaryOperator::Sub => Token::Minus,
        BinaryOperator::And => Token::And,
        BinaryOperator::Or => Token::Or,
    }
}

impl JsExpr {
    pub fn to_tokens(&self) -> TokenStream {
        let mut ts = TokenStream::new();
        match self {
            JsExpr::Ident(name) => {
                ts.push(Token::Ident(name.clone()));
            }
            JsExpr::Number(n) => {
                ts.push(Token::Number(*n));
            }
            JsExpr::Str(s) => {
                ts.push(Token::Str(s.clone()));
            }
            JsExpr::Member { object, property } => {
                ts.append(&object.to_tokens());
                ts.push(Token::Dot).push(Token::Ident(property.clone()));
            }
            JsExpr::Index { object, key } => {
                ts.append(&object.to_tokens());
                ts.push(Token::LBracket);
                ts.append(&key.to_tokens());
                ts.push(Token::RBracket);
            }
            JsExpr::BinaryOp { left, op, right } => {
                ts.append(&left.to_tokens());
                ts.space().push(binary_op_to_token(*op)).space();
                ts.append(&right.to_tokens());
            }
            JsExpr::Not(inner) => {
                ts.push(Token::Not);
                ts.append(&inner.to_tokens());
            }
            JsExpr::Call { callee, args } => {
                ts.append(&callee.to_tokens());
                ts.lparen();
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        ts.comma().space();
                    }
                    ts.append(&arg.to_tokens());
                }
                ts.rparen();
            }
            JsExpr::Array(items) => {
                ts.push(Token::LBracket);
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        ts.comma().space();
                    }
                    ts.append(&item.to_tokens());
                }
                ts.push(Token::RBracket);
            }
            JsExpr::Paren(inner) => {
                ts.lparen();
                ts.append(&inner.to_tokens());
                ts.rparen();
            }
            JsExpr::Raw(text) => {
                ts.push(Token::Raw(text.clone()));
            }
        }
        ts
    }

    pub fn render(&self) -> String {
        self.to_tokens().serialize()
    }
}

// =============================================================================
// Builders
// =============================================================================

pub fn ident(name: &str) -> JsExpr {
    JsExpr::Ident(name.to_string())
}

pub fn lit_str(s: &str) -> JsExpr {
    JsExpr::Str(s.to_string())
}

pub fn lit_num(n: f64) -> JsExpr {
    JsExpr::Number(n)
}

pub fn raw(text: &str) -> JsExpr {
    JsExpr::Raw(text.to_string())
}

pub fn paren(expr: JsExpr) -> JsExpr {
    JsExpr::Paren(Box::new(expr))
}

pub fn not(expr: JsExpr) -> JsExpr {
    JsExpr::Not(Box::new(expr))
}

/// `event.properties["a"]["b"]` for the path `a.b`.
pub fn property(path: &[String]) -> JsExpr {
    path.iter()
        .fold(ident("event").member("properties"), |acc, part| acc.index(lit_str(part)))
}

/// Left-fold a list of expressions with `&&`; `true` when empty.
pub fn and_all(exprs: impl IntoIterator<Item = JsExpr>) -> JsExpr {
    exprs
        .into_iter()
        .reduce(|acc, e| acc.and(e))
        .unwrap_or_else(|| raw("true"))
}

/// Fluent operators for building expressions.
pub trait JsExprExt: Sized {
    fn into_expr(self) -> JsExpr;

    fn binary(self, op: BinaryOperator, other: impl Into<JsExpr>) -> JsExpr {
        JsExpr::BinaryOp {
            left: Box::new(self.into_expr()),
            op,
            right: Box::new(other.into()),
        }
    }

    fn strict_eq(self, other: impl Into<JsExpr>) -> JsExpr {
        self.binary(BinaryOperator::StrictEq, other)
    }

    fn strict_ne(self, other: impl Into<JsExpr>) -> JsExpr {
        self.binary(BinaryOperator::StrictNe, other)
    }

    fn loose_eq(self, other: impl Into<JsExpr>) -> JsExpr {
        self.binary(BinaryOperator::LooseEq, other)
    }

    fn loose_ne(self, other: impl Into<JsExpr>) -> JsExpr {
        self.binary(BinaryOperator::LooseNe, other)
    }

    fn lt(self, other: impl Into<JsExpr>) -> JsExpr {
        self.binary(BinaryOperator::Lt, other)
    }

    fn lte(self, other: impl Into<JsExpr>) -> JsExpr {
        self.binary(BinaryOperator::Lte, other)
    }

    fn gt(self, other: impl Into<JsExpr>) -> JsExpr {
        self.binary(BinaryOperator::Gt, other)
    }

    fn gte(self, other: impl Into<JsExpr>) -> JsExpr {
        self.binary(BinaryOperator::Gte, other)
    }

    fn add(self, other: impl Into<JsExpr>) -> JsExpr {
        self.binary(BinaryOperator::Add, other)
    }

    fn sub(self, other: impl Into<JsExpr>) -> JsExpr {
        self.binary(BinaryOperator::Sub, other)
    }

    fn and(self, other: impl Into<JsExpr>) -> JsExpr {
        self.binary(BinaryOperator::And, other)
    }

    fn or(self, other: impl Into<JsExpr>) -> JsExpr {
        self.binary(BinaryOperator::Or, other)
    }

    fn member(self, property: &str) -> JsExpr {
        JsExpr::Member {
            object: Box::new(self.into_expr()),
            property: property.to_string(),
        }
    }

    fn index(self, key: impl Into<JsExpr>) -> JsExpr {
        JsExpr::Index {
            object: Box::new(self.into_expr()),
            key: Box::new(key.into()),
        }
    }

    fn call(self, args: Vec<JsExpr>) -> JsExpr {
        JsExpr::Call {
            callee: Box::new(self.into_expr()),
            args,
        }
    }
}

impl JsExprExt for JsExpr {
    fn into_expr(self) -> JsExpr {
        self
    }
}

impl From<f64> for JsExpr {
    fn from(n: f64) -> Self {
        lit_num(n)
    }
}

impl From<i64> for JsExpr {
    fn from(n: i64) -> Self {
        lit_num(n as f64)
    }
}

impl From<&str> for JsExpr {
    fn from(s: &str) -> Self {
        lit_str(s)
    }
}

// =============================================================================
// Lowering from plan structures
// =============================================================================

/// `event.time`
pub fn event_time() -> JsExpr {
    ident("event").member("time")
}

pub fn condition_expr(condition: &ConditionTest) -> JsExpr {
    let column = property(&condition.path);
    match condition.operator {
        ConditionOperator::Eq => column.add("").loose_eq(condition.value.as_str()),
        ConditionOperator::Ne => column.add("").loose_ne(condition.value.as_str()),
        ConditionOperator::Matches => paren(column.or("")).member("match").call(vec![lit_str(&condition.value)]),
        ConditionOperator::NotMatches => {
            not(paren(column.or("")).member("match").call(vec![lit_str(&condition.value)]))
        }
        ConditionOperator::Gt => column.gt(condition.numeric_value()),
        ConditionOperator::Gte => column.gte(condition.numeric_value()),
        ConditionOperator::Lt => column.lt(condition.numeric_value()),
        ConditionOperator::Lte => column.lte(condition.numeric_value()),
    }
}

/// Name test plus conditions: exact match for one name, membership for several.
pub fn event_predicate_expr(predicate: &EventPredicate) -> JsExpr {
    let name_test = match predicate.names.as_slice() {
        [single] => ident("event").member("name").strict_eq(single.as_str()),
        names => JsExpr::Array(names.iter().map(|n| lit_str(n)).collect())
            .member("includes")
            .call(vec![ident("event").member("name")]),
    };
    and_all(std::iter::once(name_test).chain(predicate.conditions.iter().map(condition_expr)))
}

pub fn exposure_expr(exposure: &ExposurePredicate) -> JsExpr {
    and_all([
        ident("event").member("name").strict_eq(exposure.event_name.as_str()),
        property(&exposure.experiment_id_path).strict_eq(exposure.experiment_id.as_str()),
        event_time().gte(exposure.start),
        event_time().lte(exposure.end),
    ])
}

pub fn value_expr(value: &ValueExpr) -> JsExpr {
    match value {
        ValueExpr::One => lit_num(1.0),
        ValueExpr::Literal(text) | ValueExpr::Raw(text) => raw(text),
        ValueExpr::Property(path) => property(path),
    }
}

/// Window bounds relative to `start`, joined with `&&`, or `None` when unbounded.
pub fn window_expr(bounds: &[WindowBound], start: &str) -> Option<JsExpr> {
    if bounds.is_empty() {
        return None;
    }
    Some(and_all(bounds.iter().map(|bound| bound_expr(bound, start))))
}

fn bound_expr(bound: &WindowBound, start: &str) -> JsExpr {
    let elapsed = || event_time().sub(raw(start));
    match *bound {
        WindowBound::ElapsedAtLeast(ms) => elapsed().gte(ms),
        WindowBound::ElapsedBelow(ms) => elapsed().lt(ms),
        WindowBound::Lookback { end, length } => lit_num(end as f64).sub(event_time()).lte(length),
    }
}
