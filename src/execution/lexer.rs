//! Tokenizer for generated expressions

use crate::error::ExecutionError;

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Int(i64),
    Float(f64),
    Str(String),
    Name(String),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Colon,
    Dot,
    Assign,
    Plus,
    Minus,
    Star,
    DoubleStar,
    Slash,
    DoubleSlash,
    Percent,
    Amp,
    Pipe,
    Tilde,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    /// Character offset into the expression
    pub position: usize,
}

pub fn tokenize(source: &str) -> Result<Vec<Token>, ExecutionError> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let start = i;

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        if c.is_ascii_digit() || (c == '.' && chars.get(i + 1).map_or(false, |d| d.is_ascii_digit())) {
            let (kind, next) = number(&chars, i)?;
            tokens.push(Token { kind, position: start });
            i = next;
            continue;
        }

        if c.is_alphabetic() || c == '_' {
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            let name: String = chars[start..i].iter().collect();
            tokens.push(Token {
                kind: TokenKind::Name(name),
                position: start,
            });
            continue;
        }

        if c == '\'' || c == '"' {
            let (text, next) = string(&chars, i)?;
            tokens.push(Token {
                kind: TokenKind::Str(text),
                position: start,
            });
            i = next;
            continue;
        }

        let next = chars.get(i + 1).copied();
        let (kind, width) = match (c, next) {
            ('*', Some('*')) => (TokenKind::DoubleStar, 2),
            ('/', Some('/')) => (TokenKind::DoubleSlash, 2),
            ('=', Some('=')) => (TokenKind::Eq, 2),
            ('!', Some('=')) => (TokenKind::Ne, 2),
            ('<', Some('=')) => (TokenKind::Le, 2),
            ('>', Some('=')) => (TokenKind::Ge, 2),
            ('(', _) => (TokenKind::LParen, 1),
            (')', _) => (TokenKind::RParen, 1),
            ('[', _) => (TokenKind::LBracket, 1),
            (']', _) => (TokenKind::RBracket, 1),
            (',', _) => (TokenKind::Comma, 1),
            (':', _) => (TokenKind::Colon, 1),
            ('.', _) => (TokenKind::Dot, 1),
            ('=', _) => (TokenKind::Assign, 1),
            ('+', _) => (TokenKind::Plus, 1),
            ('-', _) => (TokenKind::Minus, 1),
            ('*', _) => (TokenKind::Star, 1),
            ('/', _) => (TokenKind::Slash, 1),
            ('%', _) => (TokenKind::Percent, 1),
            ('&', _) => (TokenKind::Amp, 1),
            ('|', _) => (TokenKind::Pipe, 1),
            ('~', _) => (TokenKind::Tilde, 1),
            ('<', _) => (TokenKind::Lt, 1),
            ('>', _) => (TokenKind::Gt, 1),
            _ => {
                return Err(ExecutionError::Syntax {
                    position: start,
                    message: format!("unexpected character '{}'", c),
                })
            }
        };
        tokens.push(Token { kind, position: start });
        i += width;
    }

    tokens.push(Token {
        kind: TokenKind::Eof,
        position: chars.len(),
    });
    Ok(tokens)
}

fn number(chars: &[char], start: usize) -> Result<(TokenKind, usize), ExecutionError> {
    let mut i = start;
    let mut is_float = false;

    while i < chars.len() {
        match chars[i] {
            d if d.is_ascii_digit() || d == '_' => i += 1,
            '.' if !is_float && chars.get(i + 1).map_or(true, |n| !n.is_alphabetic()) => {
                is_float = true;
                i += 1;
            }
            'e' | 'E'
                if chars
                    .get(i + 1)
                    .map_or(false, |n| n.is_ascii_digit() || *n == '-' || *n == '+') =>
            {
                is_float = true;
                i += 2;
            }
            _ => break,
        }
    }

    let text: String = chars[start..i].iter().filter(|c| **c != '_').collect();
    let invalid = || ExecutionError::Syntax {
        position: start,
        message: format!("invalid number '{}'", text),
    };

    let kind = if is_float {
        TokenKind::Float(text.parse().map_err(|_| invalid())?)
    } else {
        TokenKind::Int(text.parse().map_err(|_| invalid())?)
    };
    Ok((kind, i))
}

fn string(chars: &[char], start: usize) -> Result<(String, usize), ExecutionError> {
    let quote = chars[start];
    let mut text = String::new();
    let mut i = start + 1;

    while i < chars.len() {
        match chars[i] {
            c if c == quote => return Ok((text, i + 1)),
            '\\' if i + 1 < chars.len() => {
                text.push(match chars[i + 1] {
                    'n' => '\n',
                    't' => '\t',
                    other => other,
                });
                i += 2;
            }
            c => {
                text.push(c);
                i += 1;
            }
        }
    }

    Err(ExecutionError::Syntax {
        position: start,
        message: "unterminated string literal".to_string(),
    })
}
