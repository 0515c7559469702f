//! Tokenizer for payload expressions.

use std::fmt;

use crate::eval::TransformError;

/// A token and the byte offset it starts at.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub pos: usize,
}

/// Tokens recognized in an expression.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Number(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Bang,
    Lt,
    Le,
    Gt,
    Ge,
    EqEq,
    NotEq,
    AndAnd,
    OrOr,
    LParen,
    RParen,
    Eof,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Number(n) => write!(f, "number {}", n),
            TokenKind::Ident(name) => write!(f, "identifier '{}'", name),
            TokenKind::Plus => f.write_str("'+'"),
            TokenKind::Minus => f.write_str("'-'"),
            TokenKind::Star => f.write_str("'*'"),
            TokenKind::Slash => f.write_str("'/'"),
            TokenKind::Percent => f.write_str("'%'"),
            TokenKind::Bang => f.write_str("'!'"),
            TokenKind::Lt => f.write_str("'<'"),
            TokenKind::Le => f.write_str("'<='"),
            TokenKind::Gt => f.write_str("'>'"),
            TokenKind::Ge => f.write_str("'>='"),
            TokenKind::EqEq => f.write_str("'=='"),
            TokenKind::NotEq => f.write_str("'!='"),
            TokenKind::AndAnd => f.write_str("'&&'"),
            TokenKind::OrOr => f.write_str("'||'"),
            TokenKind::LParen => f.write_str("'('"),
            TokenKind::RParen => f.write_str("')'"),
            TokenKind::Eof => f.write_str("end of expression"),
        }
    }
}

/// Split `source` into tokens, always terminated by [`TokenKind::Eof`].
pub fn tokenize(source: &str) -> Result<Vec<Token>, TransformError> {
    let bytes = source.as_bytes();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < bytes.len() {
        let start = pos;
        let b = bytes[pos];

        if b.is_ascii_whitespace() {
            pos += 1;
            continue;
        }

        if b.is_ascii_digit() || (b == b'.' && bytes.get(pos + 1).is_some_and(u8::is_ascii_digit)) {
            pos = scan_number(bytes, pos);
            let text = &source[start..pos];
            let value = text
                .parse::<f64>()
                .map_err(|_| TransformError::InvalidNumber(text.to_string()))?;
            tokens.push(Token { kind: TokenKind::Number(value), pos: start });
            continue;
        }

        if b.is_ascii_alphabetic() || b == b'_' {
            while pos < bytes.len() && (bytes[pos].is_ascii_alphanumeric() || bytes[pos] == b'_') {
                pos += 1;
            }
            let name = source[start..pos].to_string();
            tokens.push(Token { kind: TokenKind::Ident(name), pos: start });
            continue;
        }

        let next = bytes.get(pos + 1).copied();
        let (kind, width) = match (b, next) {
            (b'<', Some(b'=')) => (TokenKind::Le, 2),
            (b'>', Some(b'=')) => (TokenKind::Ge, 2),
            (b'=', Some(b'=')) => (TokenKind::EqEq, 2),
            (b'!', Some(b'=')) => (TokenKind::NotEq, 2),
            (b'&', Some(b'&')) => (TokenKind::AndAnd, 2),
            (b'|', Some(b'|')) => (TokenKind::OrOr, 2),
            (b'+', _) => (TokenKind::Plus, 1),
            (b'-', _) => (TokenKind::Minus, 1),
            (b'*', _) => (TokenKind::Star, 1),
            (b'/', _) => (TokenKind::Slash, 1),
            (b'%', _) => (TokenKind::Percent, 1),
            (b'!', _) => (TokenKind::Bang, 1),
            (b'<', _) => (TokenKind::Lt, 1),
            (b'>', _) => (TokenKind::Gt, 1),
            (b'(', _) => (TokenKind::LParen, 1),
            (b')', _) => (TokenKind::RParen, 1),
            _ => {
                let ch = source[pos..].chars().next().unwrap_or('\u{fffd}');
                return Err(TransformError::UnexpectedChar { ch, pos });
            }
        };

        tokens.push(Token { kind, pos: start });
        pos += width;
    }

    tokens.push(Token { kind: TokenKind::Eof, pos: bytes.len() });
    Ok(tokens)
}

/// Advance past `digits [. digits] [(e|E) [+|-] digits]`.
fn scan_number(bytes: &[u8], mut pos: usize) -> usize {
    while pos < bytes.len() && bytes[pos].is_ascii_digit() {
        pos += 1;
    }

    if pos < bytes.len() && bytes[pos] == b'.' {
        pos += 1;
        while pos < bytes.len() && bytes[pos].is_ascii_digit() {
            pos += 1;
        }
    }

    if pos < bytes.len() && (bytes[pos] == b'e' || bytes[pos] == b'E') {
        let mut exp = pos + 1;
        if exp < bytes.len() && (bytes[exp] == b'+' || bytes[exp] == b'-') {
            exp += 1;
        }
        if exp < bytes.len() && bytes[exp].is_ascii_digit() {
            pos = exp;
            while pos < bytes.len() && bytes[pos].is_ascii_digit() {
                pos += 1;
            }
        }
    }

    pos
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        tokenize(source).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_tokenize_arithmetic() {
        assert_eq!(
            kinds("1 + 2.5*(3)"),
            vec![
                TokenKind::Number(1.0),
                TokenKind::Plus,
                TokenKind::Number(2.5),
                TokenKind::Star,
                TokenKind::LParen,
                TokenKind::Number(3.0),
                TokenKind::RParen,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_tokenize_two_char_operators() {
        assert_eq!(
            kinds("a<=b != c && d || !e"),
            vec![
                TokenKind::Ident("a".into()),
                TokenKind::Le,
                TokenKind::Ident("b".into()),
                TokenKind::NotEq,
                TokenKind::Ident("c".into()),
                TokenKind::AndAnd,
                TokenKind::Ident("d".into()),
                TokenKind::OrOr,
                TokenKind::Bang,
                TokenKind::Ident("e".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_tokenize_exponent_and_leading_dot() {
        assert_eq!(
            kinds("1e3 .5 2E-1"),
            vec![
                TokenKind::Number(1000.0),
                TokenKind::Number(0.5),
                TokenKind::Number(0.2),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_tokenize_rejects_unknown_character() {
        let err = tokenize("1 # 2").unwrap_err();
        assert!(matches!(err, TransformError::UnexpectedChar { ch: '#', pos: 2 }));
    }

    #[test]
    fn test_tokenize_records_positions() {
        let tokens = tokenize("  12 +x").unwrap();
        assert_eq!(tokens[0].pos, 2);
        assert_eq!(tokens[1].pos, 5);
        assert_eq!(tokens[2].pos, 6);
        assert_eq!(tokens[3].pos, 7);
    }
}
