//! Recursive-descent parser for the restricted expression grammar
//!
//! Precedence, lowest first: comparison, `|`, `&`, `+ -`, `* / // %`,
//! unary `- + ~`, `**`, then calls, attributes and subscripts.
//! Only a single expression is accepted; statements and chained comparisons
//! are syntax errors.

use super::lexer::{tokenize, Token, TokenKind};
use crate::dataset::frame::Cell;
use crate::error::ExecutionError;

type ParseResult<T> = Result<T, ExecutionError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Pos,
    Invert,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Cell),
    Name(String),
    List(Vec<Expr>),
    Tuple(Vec<Expr>),
    /// `start:stop`, only valid inside a subscript
    Slice {
        start: Option<Box<Expr>>,
        stop: Option<Box<Expr>>,
    },
    Attribute {
        target: Box<Expr>,
        name: String,
    },
    Subscript {
        target: Box<Expr>,
        index: Box<Expr>,
    },
    Call {
        func: Box<Expr>,
        args: Vec<Expr>,
        kwargs: Vec<(String, Expr)>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Compare {
        op: CompareOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
}

pub fn parse(source: &str) -> ParseResult<Expr> {
    let tokens = tokenize(source)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.expression()?;
    match parser.peek() {
        TokenKind::Eof => Ok(expr),
        TokenKind::Assign => Err(parser.error("assignments are not allowed")),
        other => Err(parser.error(&format!("unexpected token {:?}", other))),
    }
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &TokenKind {
        &self.tokens[self.pos.min(self.tokens.len() - 1)].kind
    }

    fn peek_at(&self, offset: usize) -> &TokenKind {
        &self.tokens[(self.pos + offset).min(self.tokens.len() - 1)].kind
    }

    fn position(&self) -> usize {
        self.tokens[self.pos.min(self.tokens.len() - 1)].position
    }

    fn advance(&mut self) -> TokenKind {
        let kind = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        kind
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.peek() == kind {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> ParseResult<()> {
        if self.eat(&kind) {
            Ok(())
        } else {
            Err(self.error(&format!("expected {}", what)))
        }
    }

    fn error(&self, message: &str) -> ExecutionError {
        ExecutionError::Syntax {
            position: self.position(),
            message: message.to_string(),
        }
    }

    fn expression(&mut self) -> ParseResult<Expr> {
        let left = self.bit_or()?;
        let Some(op) = self.compare_op() else {
            return Ok(left);
        };
        self.advance();
        let right = self.bit_or()?;
        if self.compare_op().is_some() {
            return Err(self.error("chained comparisons are not supported"));
        }
        Ok(Expr::Compare {
            op,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    fn compare_op(&self) -> Option<CompareOp> {
        Some(match self.peek() {
            TokenKind::Eq => CompareOp::Eq,
            TokenKind::Ne => CompareOp::Ne,
            TokenKind::Lt => CompareOp::Lt,
            TokenKind::Le => CompareOp::Le,
            TokenKind::Gt => CompareOp::Gt,
            TokenKind::Ge => CompareOp::Ge,
            _ => return None,
        })
    }

    fn bit_or(&mut self) -> ParseResult<Expr> {
        let mut left = self.bit_and()?;
        while self.eat(&TokenKind::Pipe) {
            let right = self.bit_and()?;
            left = binary(BinaryOp::Or, left, right);
        }
        Ok(left)
    }

    fn bit_and(&mut self) -> ParseResult<Expr> {
        let mut left = self.additive()?;
        while self.eat(&TokenKind::Amp) {
            let right = self.additive()?;
            left = binary(BinaryOp::And, left, right);
        }
        Ok(left)
    }

    fn additive(&mut self) -> ParseResult<Expr> {
        let mut left = self.multiplicative()?;
        loop {
            let op = match self.peek() {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Sub,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.multiplicative()?;
            left = binary(op, left, right);
        }
    }

    fn multiplicative(&mut self) -> ParseResult<Expr> {
        let mut left = self.unary()?;
        loop {
            let op = match self.peek() {
                TokenKind::Star => BinaryOp::Mul,
                TokenKind::Slash => BinaryOp::Div,
                TokenKind::DoubleSlash => BinaryOp::FloorDiv,
                TokenKind::Percent => BinaryOp::Mod,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.unary()?;
            left = binary(op, left, right);
        }
    }

    fn unary(&mut self) -> ParseResult<Expr> {
        let op = match self.peek() {
            TokenKind::Minus => UnaryOp::Neg,
            TokenKind::Plus => UnaryOp::Pos,
            TokenKind::Tilde => UnaryOp::Invert,
            _ => return self.power(),
        };
        self.advance();
        let operand = self.unary()?;
        Ok(Expr::Unary {
            op,
            operand: Box::new(operand),
        })
    }

    fn power(&mut self) -> ParseResult<Expr> {
        let base = self.postfix()?;
        if self.eat(&TokenKind::DoubleStar) {
            // Right-associative and binds tighter than a unary on its left
            let exponent = self.unary()?;
            return Ok(binary(BinaryOp::Pow, base, exponent));
        }
        Ok(base)
    }

    fn postfix(&mut self) -> ParseResult<Expr> {
        let mut expr = self.atom()?;
        loop {
            match self.peek() {
                TokenKind::Dot => {
                    self.advance();
                    match self.advance() {
                        TokenKind::Name(name) => {
                            expr = Expr::Attribute {
                                target: Box::new(expr),
                                name,
                            }
                        }
                        _ => return Err(self.error("expected attribute name after '.'")),
                    }
                }
                TokenKind::LBracket => {
                    self.advance();
                    let index = self.subscript_list()?;
                    self.expect(TokenKind::RBracket, "']'")?;
                    expr = Expr::Subscript {
                        target: Box::new(expr),
                        index: Box::new(index),
                    };
                }
                TokenKind::LParen => {
                    self.advance();
                    let (args, kwargs) = self.call_arguments()?;
                    expr = Expr::Call {
                        func: Box::new(expr),
                        args,
                        kwargs,
                    };
                }
                _ => return Ok(expr),
            }
        }
    }

    fn call_arguments(&mut self) -> ParseResult<(Vec<Expr>, Vec<(String, Expr)>)> {
        let mut args = Vec::new();
        let mut kwargs: Vec<(String, Expr)> = Vec::new();

        while !self.eat(&TokenKind::RParen) {
            let keyword = match (self.peek().clone(), self.peek_at(1)) {
                (TokenKind::Name(name), TokenKind::Assign) => Some(name),
                _ => None,
            };

            if let Some(name) = keyword {
                self.advance();
                self.advance();
                let value = self.expression()?;
                kwargs.push((name, value));
            } else {
                if !kwargs.is_empty() {
                    return Err(self.error("positional argument follows keyword argument"));
                }
                args.push(self.expression()?);
            }

            if !self.eat(&TokenKind::Comma) {
                self.expect(TokenKind::RParen, "')'")?;
                break;
            }
        }
        Ok((args, kwargs))
    }

    fn subscript_list(&mut self) -> ParseResult<Expr> {
        let mut items = vec![self.subscript_item()?];
        let mut trailing_comma = false;
        while self.eat(&TokenKind::Comma) {
            if self.peek() == &TokenKind::RBracket {
                trailing_comma = true;
                break;
            }
            items.push(self.subscript_item()?);
        }
        if items.len() == 1 && !trailing_comma {
            return Ok(items.remove(0));
        }
        Ok(Expr::Tuple(items))
    }

    fn subscript_item(&mut self) -> ParseResult<Expr> {
        let start = if self.peek() == &TokenKind::Colon {
            None
        } else {
            Some(Box::new(self.expression()?))
        };

        if !self.eat(&TokenKind::Colon) {
            return start
                .map(|s| *s)
                .ok_or_else(|| self.error("expected subscript"));
        }

        let stop = match self.peek() {
            TokenKind::Comma | TokenKind::RBracket => None,
            _ => Some(Box::new(self.expression()?)),
        };
        if self.peek() == &TokenKind::Colon {
            return Err(self.error("slice steps are not supported"));
        }
        Ok(Expr::Slice { start, stop })
    }

    fn atom(&mut self) -> ParseResult<Expr> {
        match self.advance() {
            TokenKind::Int(i) => Ok(Expr::Literal(Cell::Int(i))),
            TokenKind::Float(f) => Ok(Expr::Literal(Cell::Float(f))),
            TokenKind::Str(first) => {
                // Adjacent string literals concatenate
                let mut text = first;
                while let TokenKind::Str(next) = self.peek().clone() {
                    self.advance();
                    text.push_str(&next);
                }
                Ok(Expr::Literal(Cell::Text(text)))
            }
            TokenKind::Name(name) => Ok(match name.as_str() {
                "True" => Expr::Literal(Cell::Bool(true)),
                "False" => Expr::Literal(Cell::Bool(false)),
                "None" => Expr::Literal(Cell::Null),
                _ => Expr::Name(name),
            }),
            TokenKind::LParen => {
                if self.eat(&TokenKind::RParen) {
                    return Ok(Expr::Tuple(Vec::new()));
                }
                let first = self.expression()?;
                if self.eat(&TokenKind::RParen) {
                    return Ok(first);
                }
                let mut items = vec![first];
                while self.eat(&TokenKind::Comma) {
                    if self.peek() == &TokenKind::RParen {
                        break;
                    }
                    items.push(self.expression()?);
                }
                self.expect(TokenKind::RParen, "')'")?;
                Ok(Expr::Tuple(items))
            }
            TokenKind::LBracket => {
                let mut items = Vec::new();
                while !self.eat(&TokenKind::RBracket) {
                    items.push(self.expression()?);
                    if !self.eat(&TokenKind::Comma) {
                        self.expect(TokenKind::RBracket, "']'")?;
                        break;
                    }
                }
                Ok(Expr::List(items))
            }
            TokenKind::Eof => Err(self.error("unexpected end of expression")),
            other => {
                // step back so the reported position is the offending token
                self.pos = self.pos.saturating_sub(1);
                Err(self.error(&format!("unexpected token {:?}", other)))
            }
        }
    }
}

fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    Expr::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(n: &str) -> Box<Expr> {
        Box::new(Expr::Name(n.to_string()))
    }

    fn text(s: &str) -> Box<Expr> {
        Box::new(Expr::Literal(Cell::Text(s.to_string())))
    }

    #[test]
    fn test_method_chain() {
        let expr = parse("df['Salary'].mean()").unwrap();
        assert_eq!(
            expr,
            Expr::Call {
                func: Box::new(Expr::Attribute {
                    target: Box::new(Expr::Subscript {
                        target: name("df"),
                        index: text("Salary"),
                    }),
                    name: "mean".to_string(),
                }),
                args: vec![],
                kwargs: vec![],
            }
        );
    }

    #[test]
    fn test_comparison_binds_loosest() {
        let expr = parse("df['a'] + 1 > 2").unwrap();
        assert!(matches!(expr, Expr::Compare { op: CompareOp::Gt, .. }));
    }

    #[test]
    fn test_mask_conjunction_needs_parentheses() {
        let expr = parse("(df['a'] > 1) & (df['b'] == 'x')").unwrap();
        assert!(matches!(expr, Expr::Binary { op: BinaryOp::And, .. }));
    }

    #[test]
    fn test_loc_tuple_and_slice() {
        let expr = parse("df.loc[df['a'] > 1, ['b', 'c']]").unwrap();
        let Expr::Subscript { index, .. } = expr else {
            panic!("expected subscript");
        };
        assert!(matches!(*index, Expr::Tuple(ref items) if items.len() == 2));

        let expr = parse("df.iloc[:3]").unwrap();
        let Expr::Subscript { index, .. } = expr else {
            panic!("expected subscript");
        };
        assert!(matches!(*index, Expr::Slice { start: None, stop: Some(_) }));
    }

    #[test]
    fn test_keyword_arguments() {
        let expr = parse("df.sort_values(by='Salary', ascending=False).head(3)").unwrap();
        let Expr::Call { func, .. } = expr else {
            panic!("expected call");
        };
        let Expr::Attribute { target, .. } = *func else {
            panic!("expected attribute");
        };
        let Expr::Call { kwargs, .. } = *target else {
            panic!("expected inner call");
        };
        assert_eq!(kwargs[0].0, "by");
        assert_eq!(kwargs[1].1, Expr::Literal(Cell::Bool(false)));
    }

    #[test]
    fn test_power_is_right_associative_over_unary() {
        let expr = parse("-2 ** 2").unwrap();
        assert!(matches!(expr, Expr::Unary { op: UnaryOp::Neg, .. }));
    }

    #[test]
    fn test_rejects_assignment() {
        let err = parse("result = df['Salary'].mean()").unwrap_err();
        assert!(err.to_string().contains("assignments are not allowed"));
    }

    #[test]
    fn test_rejects_chained_comparison() {
        assert!(parse("1 < df['a'] < 3").is_err());
    }

    #[test]
    fn test_rejects_trailing_tokens() {
        assert!(parse("df['a'] df['b']").is_err());
    }
}
