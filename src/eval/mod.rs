//! Payload transformation.
//!
//! The hub treats transformation as an opaque [`Transform`]: a payload goes
//! in, a rendered result or an error comes out. [`ExpressionEvaluator`] is the
//! default implementation, evaluating arithmetic, comparison and boolean
//! expressions such as `1 + 2 * 3` or `(4 > 3) && !false`.

mod lexer;
mod parser;

use std::fmt;

pub use lexer::{tokenize, Token, TokenKind};
pub use parser::{evaluate, BinaryOp, Expr, Parser, UnaryOp, MAX_DEPTH};

/// Errors produced while transforming a payload
#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    #[error("empty expression")]
    Empty,

    #[error("unexpected character '{ch}' at position {pos}")]
    UnexpectedChar { ch: char, pos: usize },

    #[error("invalid number '{0}'")]
    InvalidNumber(String),

    #[error("unexpected {found} at position {pos}")]
    UnexpectedToken { found: String, pos: usize },

    #[error("unexpected end of expression")]
    UnexpectedEnd,

    #[error("unknown identifier '{0}'")]
    UnknownIdentifier(String),

    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    #[error("division by zero")]
    DivisionByZero,

    #[error("result is not a finite number")]
    NonFinite,

    #[error("expression nested deeper than {0} levels")]
    TooDeep(usize),
}

/// Turns an inbound payload into the text that gets broadcast
pub trait Transform: Send + Sync {
    fn apply(&self, payload: &str) -> Result<String, TransformError>;
}

impl<F> Transform for F
where
    F: Fn(&str) -> Result<String, TransformError> + Send + Sync,
{
    fn apply(&self, payload: &str) -> Result<String, TransformError> {
        self(payload)
    }
}

/// Result of evaluating an expression
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Number(f64),
    Bool(bool),
}

impl Value {
    pub fn as_number(self, context: &str) -> Result<f64, TransformError> {
        match self {
            Value::Number(n) => Ok(n),
            Value::Bool(_) => Err(TransformError::TypeMismatch(format!(
                "{} expects numbers",
                context
            ))),
        }
    }

    pub fn as_bool(self, context: &str) -> Result<bool, TransformError> {
        match self {
            Value::Bool(b) => Ok(b),
            Value::Number(_) => Err(TransformError::TypeMismatch(format!(
                "{} expects booleans",
                context
            ))),
        }
    }

    /// Equality between values of the same type
    pub fn equals(&self, other: &Value) -> Result<bool, TransformError> {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) => Ok(a == b),
            (Value::Bool(a), Value::Bool(b)) => Ok(a == b),
            _ => Err(TransformError::TypeMismatch(
                "cannot compare a number with a boolean".to_string(),
            )),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            // f64's Display already drops a trailing ".0"
            Value::Number(n) => write!(f, "{}", n),
            Value::Bool(b) => write!(f, "{}", b),
        }
    }
}

/// Default [`Transform`]: evaluates the payload as an expression
#[derive(Debug, Clone, Copy, Default)]
pub struct ExpressionEvaluator;

impl ExpressionEvaluator {
    pub fn new() -> Self {
        Self
    }

    /// Parse and evaluate `source`
    pub fn evaluate(&self, source: &str) -> Result<Value, TransformError> {
        let tokens = tokenize(source)?;
        let expr = Parser::new(tokens).parse()?;
        evaluate(&expr)
    }
}

impl Transform for ExpressionEvaluator {
    fn apply(&self, payload: &str) -> Result<String, TransformError> {
        self.evaluate(payload).map(|value| value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_renders_numbers_without_fraction() {
        let evaluator = ExpressionEvaluator::new();
        assert_eq!(evaluator.apply("1+1").unwrap(), "2");
        assert_eq!(evaluator.apply("5 / 2").unwrap(), "2.5");
        assert_eq!(evaluator.apply("3 > 2").unwrap(), "true");
    }

    #[test]
    fn test_closure_transform() {
        let upper = |payload: &str| -> Result<String, TransformError> {
            Ok(payload.to_uppercase())
        };
        assert_eq!(upper.apply("abc").unwrap(), "ABC");
    }
}
