//! Enablement evaluation
//!
//! Decides once per adjustment cycle whether any mutation is allowed. The
//! condition is a restricted expression over the optimizer's input payload,
//! bound to `data`:
//!
//! ```text
//! data.user_data.deploy_to == "canary" && data.control.timeout >= 60
//! ```
//!
//! Only literals, field/index access, comparisons, boolean and arithmetic
//! operators are supported. Evaluation failures are reported and the cycle
//! is treated as disabled.

mod eval;
mod parser;

use crate::error::TuningError;
use thiserror::Error;
use tracing::warn;

pub use eval::Value;
pub use parser::{BinaryOp, Expr, UnaryOp};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExpressionError {
    #[error("unexpected end of expression")]
    UnexpectedEof,
    #[error("unexpected token: {0}")]
    UnexpectedToken(String),
    #[error("invalid number: {0}")]
    InvalidNumber(String),
    #[error("expression nested deeper than {0} levels")]
    TooDeep(usize),
    #[error("expression longer than {0} bytes")]
    TooLong(usize),
    #[error("unknown identifier '{0}', the input payload is bound to 'data'")]
    UnknownIdentifier(String),
    #[error("unknown field '{0}'")]
    UnknownField(String),
    #[error("index {0} out of bounds")]
    IndexOutOfBounds(usize),
    #[error("type mismatch: {0}")]
    TypeMismatch(String),
    #[error("division by zero")]
    DivisionByZero,
    #[error("expression evaluated to {0}, expected bool")]
    NotBoolean(&'static str),
}

/// A parsed enablement condition
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    source: String,
    root: Expr,
}

impl Expression {
    pub fn parse(source: &str) -> Result<Self, ExpressionError> {
        Ok(Self {
            source: source.trim().to_string(),
            root: parser::parse(source)?,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluate against the cycle input; the result must be a bool
    pub fn evaluate(&self, input: &serde_json::Value) -> Result<bool, ExpressionError> {
        match eval::evaluate(&self.root, input)? {
            Value::Bool(b) => Ok(b),
            Value::Null => Err(ExpressionError::NotBoolean("null")),
            Value::Number(_) => Err(ExpressionError::NotBoolean("number")),
            Value::Str(_) => Err(ExpressionError::NotBoolean("string")),
            Value::Json(_) => Err(ExpressionError::NotBoolean("object")),
        }
    }
}

/// Outcome of the enablement gate for one cycle
#[derive(Debug, Clone, PartialEq)]
pub struct Enablement {
    pub enabled: bool,
    /// Set when evaluation failed and the cycle was disabled because of it
    pub error: Option<TuningError>,
}

/// Gate evaluated once per cycle
#[derive(Debug, Clone, Default)]
pub struct EnablementEvaluator {
    condition: Option<Expression>,
}

impl EnablementEvaluator {
    pub fn new(condition: Option<Expression>) -> Self {
        Self { condition }
    }

    pub fn condition(&self) -> Option<&Expression> {
        self.condition.as_ref()
    }

    /// Evaluate the gate. No condition means always enabled; a failing
    /// condition disables the cycle and is returned alongside.
    pub fn evaluate(&self, input: &serde_json::Value) -> Enablement {
        let Some(condition) = &self.condition else {
            return Enablement {
                enabled: true,
                error: None,
            };
        };

        match condition.evaluate(input) {
            Ok(enabled) => Enablement {
                enabled,
                error: None,
            },
            Err(e) => {
                warn!(
                    expression = %condition.source(),
                    error = %e,
                    "Enablement expression failed, adjustments disabled for this cycle"
                );
                Enablement {
                    enabled: false,
                    error: Some(TuningError::EnablementEvaluation(e.to_string())),
                }
            }
        }
    }
}
