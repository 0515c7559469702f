//! Precedence-climbing parser and tree-walking evaluator.

use crate::eval::lexer::{Token, TokenKind};
use crate::eval::{TransformError, Value};

/// Parsed expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Bool(bool),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Plus,
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl BinaryOp {
    /// Operator and binding power for a token, lowest binds loosest.
    fn from_token(kind: &TokenKind) -> Option<(Self, u8)> {
        let entry = match kind {
            TokenKind::OrOr => (BinaryOp::Or, 1),
            TokenKind::AndAnd => (BinaryOp::And, 2),
            TokenKind::EqEq => (BinaryOp::Eq, 3),
            TokenKind::NotEq => (BinaryOp::NotEq, 3),
            TokenKind::Lt => (BinaryOp::Lt, 4),
            TokenKind::Le => (BinaryOp::Le, 4),
            TokenKind::Gt => (BinaryOp::Gt, 4),
            TokenKind::Ge => (BinaryOp::Ge, 4),
            TokenKind::Plus => (BinaryOp::Add, 5),
            TokenKind::Minus => (BinaryOp::Sub, 5),
            TokenKind::Star => (BinaryOp::Mul, 6),
            TokenKind::Slash => (BinaryOp::Div, 6),
            TokenKind::Percent => (BinaryOp::Rem, 6),
            _ => return None,
        };
        Some(entry)
    }
}

/// Deepest nesting the parser accepts, counting parentheses, unary operators
/// and chained binary operators alike.
///
/// Parsing, evaluation and dropping the tree all recurse once per level.
pub const MAX_DEPTH: usize = 256;

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            depth: 0,
        }
    }

    /// Parse the whole token stream as a single expression.
    pub fn parse(mut self) -> Result<Expr, TransformError> {
        if self.peek().kind == TokenKind::Eof {
            return Err(TransformError::Empty);
        }

        let (expr, _) = self.parse_binary(1)?;

        let trailing = self.peek();
        if trailing.kind != TokenKind::Eof {
            return Err(TransformError::UnexpectedToken {
                found: trailing.kind.to_string(),
                pos: trailing.pos,
            });
        }

        Ok(expr)
    }

    fn peek(&self) -> &Token {
        // tokenize always terminates the stream with Eof
        let last = self.tokens.len().saturating_sub(1);
        &self.tokens[self.pos.min(last)]
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    /// Height of a new node over children of height `height`
    fn grow(height: usize) -> Result<usize, TransformError> {
        if height >= MAX_DEPTH {
            return Err(TransformError::TooDeep(MAX_DEPTH));
        }
        Ok(height + 1)
    }

    // Each parse function returns the tree together with its height.

    fn parse_binary(&mut self, min_power: u8) -> Result<(Expr, usize), TransformError> {
        let (mut lhs, mut height) = self.parse_unary()?;

        while let Some((op, power)) = BinaryOp::from_token(&self.peek().kind) {
            if power < min_power {
                break;
            }
            self.advance();
            let (rhs, rhs_height) = self.parse_binary(power + 1)?;
            height = Self::grow(height.max(rhs_height))?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }

        Ok((lhs, height))
    }

    fn parse_unary(&mut self) -> Result<(Expr, usize), TransformError> {
        // every recursive path passes through here
        if self.depth >= MAX_DEPTH {
            return Err(TransformError::TooDeep(MAX_DEPTH));
        }
        self.depth += 1;
        let result = self.parse_unary_inner();
        self.depth -= 1;
        result
    }

    fn parse_unary_inner(&mut self) -> Result<(Expr, usize), TransformError> {
        let op = match self.peek().kind {
            TokenKind::Plus => UnaryOp::Plus,
            TokenKind::Minus => UnaryOp::Neg,
            TokenKind::Bang => UnaryOp::Not,
            _ => return self.parse_primary(),
        };
        self.advance();

        let (operand, height) = self.parse_unary()?;
        let expr = Expr::Unary {
            op,
            operand: Box::new(operand),
        };
        Ok((expr, Self::grow(height)?))
    }

    fn parse_primary(&mut self) -> Result<(Expr, usize), TransformError> {
        let token = self.advance();

        match token.kind {
            TokenKind::Number(n) => Ok((Expr::Number(n), 1)),
            TokenKind::Ident(name) => match name.as_str() {
                "true" => Ok((Expr::Bool(true), 1)),
                "false" => Ok((Expr::Bool(false), 1)),
                _ => Err(TransformError::UnknownIdentifier(name)),
            },
            TokenKind::LParen => {
                let inner = self.parse_binary(1)?;
                let close = self.advance();
                match close.kind {
                    TokenKind::RParen => Ok(inner),
                    TokenKind::Eof => Err(TransformError::UnexpectedEnd),
                    other => Err(TransformError::UnexpectedToken {
                        found: other.to_string(),
                        pos: close.pos,
                    }),
                }
            }
            TokenKind::Eof => Err(TransformError::UnexpectedEnd),
            other => Err(TransformError::UnexpectedToken {
                found: other.to_string(),
                pos: token.pos,
            }),
        }
    }
}

/// Evaluate a parsed expression.
pub fn evaluate(expr: &Expr) -> Result<Value, TransformError> {
    match expr {
        Expr::Number(n) => Ok(Value::Number(*n)),
        Expr::Bool(b) => Ok(Value::Bool(*b)),
        Expr::Unary { op, operand } => {
            let value = evaluate(operand)?;
            match op {
                UnaryOp::Plus => Ok(Value::Number(value.as_number("unary '+'")?)),
                UnaryOp::Neg => Ok(Value::Number(-value.as_number("unary '-'")?)),
                UnaryOp::Not => Ok(Value::Bool(!value.as_bool("'!'")?)),
            }
        }
        Expr::Binary { op, lhs, rhs } => evaluate_binary(*op, lhs, rhs),
    }
}

fn evaluate_binary(op: BinaryOp, lhs: &Expr, rhs: &Expr) -> Result<Value, TransformError> {
    // logical operators short-circuit
    match op {
        BinaryOp::And => {
            if !evaluate(lhs)?.as_bool("'&&'")? {
                return Ok(Value::Bool(false));
            }
            return Ok(Value::Bool(evaluate(rhs)?.as_bool("'&&'")?));
        }
        BinaryOp::Or => {
            if evaluate(lhs)?.as_bool("'||'")? {
                return Ok(Value::Bool(true));
            }
            return Ok(Value::Bool(evaluate(rhs)?.as_bool("'||'")?));
        }
        _ => {}
    }

    let left = evaluate(lhs)?;
    let right = evaluate(rhs)?;

    match op {
        BinaryOp::Eq => Ok(Value::Bool(left.equals(&right)?)),
        BinaryOp::NotEq => Ok(Value::Bool(!left.equals(&right)?)),
        BinaryOp::Lt => Ok(Value::Bool(left.as_number("'<'")? < right.as_number("'<'")?)),
        BinaryOp::Le => Ok(Value::Bool(left.as_number("'<='")? <= right.as_number("'<='")?)),
        BinaryOp::Gt => Ok(Value::Bool(left.as_number("'>'")? > right.as_number("'>'")?)),
        BinaryOp::Ge => Ok(Value::Bool(left.as_number("'>='")? >= right.as_number("'>='")?)),
        BinaryOp::Add => finite(left.as_number("'+'")? + right.as_number("'+'")?),
        BinaryOp::Sub => finite(left.as_number("'-'")? - right.as_number("'-'")?),
        BinaryOp::Mul => finite(left.as_number("'*'")? * right.as_number("'*'")?),
        BinaryOp::Div => {
            let divisor = right.as_number("'/'")?;
            if divisor == 0.0 {
                return Err(TransformError::DivisionByZero);
            }
            finite(left.as_number("'/'")? / divisor)
        }
        BinaryOp::Rem => {
            let divisor = right.as_number("'%'")?;
            if divisor == 0.0 {
                return Err(TransformError::DivisionByZero);
            }
            finite(left.as_number("'%'")? % divisor)
        }
        BinaryOp::And | BinaryOp::Or => unreachable!("logical operators are handled above"),
    }
}

fn finite(n: f64) -> Result<Value, TransformError> {
    if n.is_finite() {
        Ok(Value::Number(n))
    } else {
        Err(TransformError::NonFinite)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::lexer::tokenize;

    fn parse(source: &str) -> Result<Expr, TransformError> {
        Parser::new(tokenize(source)?).parse()
    }

    fn eval(source: &str) -> Result<Value, TransformError> {
        evaluate(&parse(source)?)
    }

    #[test]
    fn test_precedence() {
        assert_eq!(eval("1 + 2 * 3").unwrap(), Value::Number(7.0));
        assert_eq!(eval("(1 + 2) * 3").unwrap(), Value::Number(9.0));
        assert_eq!(eval("10 - 4 - 3").unwrap(), Value::Number(3.0));
        assert_eq!(eval("2 * 3 % 4").unwrap(), Value::Number(2.0));
    }

    #[test]
    fn test_unary_operators() {
        assert_eq!(eval("-3 + 5").unwrap(), Value::Number(2.0));
        assert_eq!(eval("--3").unwrap(), Value::Number(3.0));
        assert_eq!(eval("!false").unwrap(), Value::Bool(true));
    }

    #[test]
    fn test_comparisons_and_logic() {
        assert_eq!(eval("1 < 2 && 3 >= 3").unwrap(), Value::Bool(true));
        assert_eq!(eval("1 == 2 || 2 != 2").unwrap(), Value::Bool(false));
        assert_eq!(eval("true == (1 < 2)").unwrap(), Value::Bool(true));
    }

    #[test]
    fn test_short_circuit_skips_right_side() {
        // the right side would be a type error if it were evaluated
        assert_eq!(eval("false && (1 + true)").unwrap(), Value::Bool(false));
        assert_eq!(eval("true || (1 + true)").unwrap(), Value::Bool(true));
    }

    #[test]
    fn test_unknown_identifier() {
        assert!(matches!(
            parse("bad++"),
            Err(TransformError::UnknownIdentifier(name)) if name == "bad"
        ));
    }

    #[test]
    fn test_syntax_errors() {
        assert!(matches!(parse(""), Err(TransformError::Empty)));
        assert!(matches!(parse("1 +"), Err(TransformError::UnexpectedEnd)));
        assert!(matches!(parse("(1 + 2"), Err(TransformError::UnexpectedEnd)));
        assert!(matches!(
            parse("1 2"),
            Err(TransformError::UnexpectedToken { pos: 2, .. })
        ));
        assert!(matches!(
            parse(")"),
            Err(TransformError::UnexpectedToken { pos: 0, .. })
        ));
    }

    #[test]
    fn test_runtime_errors() {
        assert!(matches!(eval("1 / 0"), Err(TransformError::DivisionByZero)));
        assert!(matches!(eval("5 % 0"), Err(TransformError::DivisionByZero)));
        assert!(matches!(eval("1e308 * 10"), Err(TransformError::NonFinite)));
        assert!(matches!(eval("1 + true"), Err(TransformError::TypeMismatch(_))));
        assert!(matches!(eval("!1"), Err(TransformError::TypeMismatch(_))));
    }

    #[test]
    fn test_nesting_limit() {
        let unary = format!("{}1", "-".repeat(20_000));
        assert!(matches!(parse(&unary), Err(TransformError::TooDeep(_))));

        let parens = format!("{}1", "(".repeat(30_000));
        assert!(matches!(parse(&parens), Err(TransformError::TooDeep(_))));

        let chain = vec!["1"; 20_000].join("+");
        assert!(matches!(parse(&chain), Err(TransformError::TooDeep(_))));

        let nested = format!("{}1{}", "(".repeat(100), ")".repeat(100));
        assert_eq!(eval(&nested).unwrap(), Value::Number(1.0));

        let long_chain = vec!["1"; 200].join("+");
        assert_eq!(eval(&long_chain).unwrap(), Value::Number(200.0));
    }
}
