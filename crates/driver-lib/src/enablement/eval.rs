//! Evaluation of parsed expressions against the cycle input
//!
//! Evaluation is pure: the only reachable state is the input payload bound to
//! `data`. There are no function calls, assignments or loops.

use super::parser::{BinaryOp, Expr, UnaryOp};
use super::ExpressionError;
use serde_json::Value as Json;
use std::cmp::Ordering;

/// Name the input payload is bound to
pub const ROOT: &str = "data";

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    Str(String),
    /// Arrays and objects from the payload
    Json(Json),
}

impl Value {
    fn from_json(json: &Json) -> Self {
        match json {
            Json::Null => Self::Null,
            Json::Bool(b) => Self::Bool(*b),
            Json::Number(n) => n.as_f64().map(Self::Number).unwrap_or(Self::Null),
            Json::String(s) => Self::Str(s.clone()),
            other => Self::Json(other.clone()),
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Number(_) => "number",
            Self::Str(_) => "string",
            Self::Json(Json::Array(_)) => "array",
            Self::Json(_) => "object",
        }
    }
}

pub fn evaluate(expr: &Expr, input: &Json) -> Result<Value, ExpressionError> {
    match expr {
        Expr::Null => Ok(Value::Null),
        Expr::Bool(b) => Ok(Value::Bool(*b)),
        Expr::Number(n) => Ok(Value::Number(*n)),
        Expr::Str(s) => Ok(Value::Str(s.clone())),
        Expr::Ident(name) if name == ROOT => Ok(Value::from_json(input)),
        Expr::Ident(name) => Err(ExpressionError::UnknownIdentifier(name.clone())),
        Expr::Field(base, name) => {
            let base = evaluate(base, input)?;
            lookup_key(&base, name)
        }
        Expr::Index(base, index) => {
            let base = evaluate(base, input)?;
            match evaluate(index, input)? {
                Value::Str(key) => lookup_key(&base, &key),
                Value::Number(n) => lookup_index(&base, n),
                other => Err(ExpressionError::TypeMismatch(format!(
                    "cannot index with {}",
                    other.type_name()
                ))),
            }
        }
        Expr::Unary(UnaryOp::Not, operand) => {
            Ok(Value::Bool(!as_bool(&evaluate(operand, input)?, "!")?))
        }
        Expr::Unary(UnaryOp::Neg, operand) => match evaluate(operand, input)? {
            Value::Number(n) => Ok(Value::Number(-n)),
            other => Err(ExpressionError::TypeMismatch(format!(
                "cannot negate {}",
                other.type_name()
            ))),
        },
        Expr::Binary(BinaryOp::And, lhs, rhs) => {
            if !as_bool(&evaluate(lhs, input)?, "&&")? {
                return Ok(Value::Bool(false));
            }
            Ok(Value::Bool(as_bool(&evaluate(rhs, input)?, "&&")?))
        }
        Expr::Binary(BinaryOp::Or, lhs, rhs) => {
            if as_bool(&evaluate(lhs, input)?, "||")? {
                return Ok(Value::Bool(true));
            }
            Ok(Value::Bool(as_bool(&evaluate(rhs, input)?, "||")?))
        }
        Expr::Binary(op, lhs, rhs) => {
            let lhs = evaluate(lhs, input)?;
            let rhs = evaluate(rhs, input)?;
            binary(*op, lhs, rhs)
        }
    }
}

fn lookup_key(base: &Value, key: &str) -> Result<Value, ExpressionError> {
    match base {
        Value::Json(Json::Object(map)) => map
            .get(key)
            .map(Value::from_json)
            .ok_or_else(|| ExpressionError::UnknownField(key.to_string())),
        other => Err(ExpressionError::TypeMismatch(format!(
            "cannot access field '{}' on {}",
            key,
            other.type_name()
        ))),
    }
}

fn lookup_index(base: &Value, index: f64) -> Result<Value, ExpressionError> {
    match base {
        Value::Json(Json::Array(items)) => {
            if index.fract() != 0.0 || index < 0.0 {
                return Err(ExpressionError::TypeMismatch(format!(
                    "array index must be a non-negative integer, got {}",
                    index
                )));
            }
            items
                .get(index as usize)
                .map(Value::from_json)
                .ok_or(ExpressionError::IndexOutOfBounds(index as usize))
        }
        other => Err(ExpressionError::TypeMismatch(format!(
            "cannot index {} by number",
            other.type_name()
        ))),
    }
}

fn as_bool(value: &Value, op: &str) -> Result<bool, ExpressionError> {
    match value {
        Value::Bool(b) => Ok(*b),
        other => Err(ExpressionError::TypeMismatch(format!(
            "'{}' expects bool operands, got {}",
            op,
            other.type_name()
        ))),
    }
}

fn binary(op: BinaryOp, lhs: Value, rhs: Value) -> Result<Value, ExpressionError> {
    match op {
        BinaryOp::Eq => Ok(Value::Bool(lhs == rhs)),
        BinaryOp::Ne => Ok(Value::Bool(lhs != rhs)),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = compare(&lhs, &rhs)?;
            Ok(Value::Bool(match op {
                BinaryOp::Lt => ordering == Ordering::Less,
                BinaryOp::Le => ordering != Ordering::Greater,
                BinaryOp::Gt => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            }))
        }
        BinaryOp::Add => match (lhs, rhs) {
            (Value::Number(a), Value::Number(b)) => Ok(Value::Number(a + b)),
            (Value::Str(a), Value::Str(b)) => Ok(Value::Str(a + &b)),
            (a, b) => Err(mismatch("+", &a, &b)),
        },
        BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => {
            let (a, b) = match (&lhs, &rhs) {
                (Value::Number(a), Value::Number(b)) => (*a, *b),
                _ => return Err(mismatch(symbol(op), &lhs, &rhs)),
            };
            if matches!(op, BinaryOp::Div | BinaryOp::Rem) && b == 0.0 {
                return Err(ExpressionError::DivisionByZero);
            }
            Ok(Value::Number(match op {
                BinaryOp::Sub => a - b,
                BinaryOp::Mul => a * b,
                BinaryOp::Div => a / b,
                _ => a % b,
            }))
        }
        // `evaluate` short-circuits these before reaching here
        BinaryOp::And => Ok(Value::Bool(as_bool(&lhs, "&&")? && as_bool(&rhs, "&&")?)),
        BinaryOp::Or => Ok(Value::Bool(as_bool(&lhs, "||")? || as_bool(&rhs, "||")?)),
    }
}

fn compare(lhs: &Value, rhs: &Value) -> Result<Ordering, ExpressionError> {
    match (lhs, rhs) {
        (Value::Number(a), Value::Number(b)) => a
            .partial_cmp(b)
            .ok_or_else(|| ExpressionError::TypeMismatch("cannot order NaN".to_string())),
        (Value::Str(a), Value::Str(b)) => Ok(a.cmp(b)),
        (a, b) => Err(mismatch("comparison", a, b)),
    }
}

fn symbol(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Sub => "-",
        BinaryOp::Mul => "*",
        BinaryOp::Div => "/",
        _ => "%",
    }
}

fn mismatch(op: &str, lhs: &Value, rhs: &Value) -> ExpressionError {
    ExpressionError::TypeMismatch(format!(
        "'{}' not supported between {} and {}",
        op,
        lhs.type_name(),
        rhs.type_name()
    ))
}
