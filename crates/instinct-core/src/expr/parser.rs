use regex::Regex;
use serde_json::Value;

use super::lexer::{tokenize, Spanned, Token};
use super::ExprError;

// ---------------------------------------------------------------------------
// AST
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MacroKind {
    Exists,
    All,
    Filter,
    Map,
}

#[derive(Debug, Clone)]
pub(crate) enum Pattern {
    /// Literal patterns are compiled once, with the program.
    Compiled(Regex),
    Dynamic(Box<Expr>),
}

#[derive(Debug, Clone)]
pub(crate) enum Expr {
    Literal(Value),
    Ident(String),
    List(Vec<Expr>),
    Map(Vec<(Expr, Expr)>),
    Select {
        operand: Box<Expr>,
        field: String,
    },
    Index {
        operand: Box<Expr>,
        index: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Ternary {
        cond: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    Call {
        function: String,
        target: Option<Box<Expr>>,
        args: Vec<Expr>,
    },
    Matches {
        target: Box<Expr>,
        pattern: Pattern,
    },
    Has {
        operand: Box<Expr>,
        field: String,
    },
    Comprehension {
        kind: MacroKind,
        range: Box<Expr>,
        var: String,
        body: Box<Expr>,
    },
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

pub(crate) fn parse(src: &str) -> Result<Expr, ExprError> {
    let tokens = tokenize(src)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        end: src.len(),
    };
    let expr = parser.expr()?;
    if let Some(extra) = parser.peek() {
        return Err(ExprError::Syntax {
            position: extra.position,
            message: format!("unexpected trailing token {:?}", extra.token),
        });
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    end: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Spanned> {
        self.tokens.get(self.pos)
    }

    fn peek_token(&self) -> Option<&Token> {
        self.peek().map(|s| &s.token)
    }

    fn position(&self) -> usize {
        self.peek().map(|s| s.position).unwrap_or(self.end)
    }

    fn advance(&mut self) -> Option<Spanned> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek_token() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: Token, what: &str) -> Result<(), ExprError> {
        if self.eat(&token) {
            Ok(())
        } else {
            Err(self.error(format!("expected {what}")))
        }
    }

    fn error(&self, message: String) -> ExprError {
        ExprError::Syntax {
            position: self.position(),
            message,
        }
    }

    fn expr(&mut self) -> Result<Expr, ExprError> {
        let cond = self.or()?;
        if self.eat(&Token::Question) {
            let then = self.expr()?;
            self.expect(Token::Colon, "':' in conditional expression")?;
            let otherwise = self.expr()?;
            return Ok(Expr::Ternary {
                cond: Box::new(cond),
                then: Box::new(then),
                otherwise: Box::new(otherwise),
            });
        }
        Ok(cond)
    }

    fn or(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.and()?;
        while self.eat(&Token::OrOr) {
            let rhs = self.and()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn and(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.relation()?;
        while self.eat(&Token::AndAnd) {
            let rhs = self.relation()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn relation(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.additive()?;
        loop {
            let op = match self.peek_token() {
                Some(Token::EqEq) => BinaryOp::Eq,
                Some(Token::NotEq) => BinaryOp::Ne,
                Some(Token::Lt) => BinaryOp::Lt,
                Some(Token::Le) => BinaryOp::Le,
                Some(Token::Gt) => BinaryOp::Gt,
                Some(Token::Ge) => BinaryOp::Ge,
                Some(Token::In) => BinaryOp::In,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.additive()?;
            lhs = binary(op, lhs, rhs);
        }
    }

    fn additive(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.multiplicative()?;
        loop {
            let op = match self.peek_token() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.multiplicative()?;
            lhs = binary(op, lhs, rhs);
        }
    }

    fn multiplicative(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek_token() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                Some(Token::Percent) => BinaryOp::Rem,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.unary()?;
            lhs = binary(op, lhs, rhs);
        }
    }

    fn unary(&mut self) -> Result<Expr, ExprError> {
        let op = match self.peek_token() {
            Some(Token::Bang) => UnaryOp::Not,
            Some(Token::Minus) => UnaryOp::Neg,
            _ => return self.member(),
        };
        self.pos += 1;
        let operand = self.unary()?;
        Ok(Expr::Unary {
            op,
            operand: Box::new(operand),
        })
    }

    fn member(&mut self) -> Result<Expr, ExprError> {
        let mut expr = self.primary()?;
        loop {
            if self.eat(&Token::Dot) {
                let field = self.ident("field or method name after '.'")?;
                if self.eat(&Token::LParen) {
                    let args = self.args(Token::RParen)?;
                    expr = self.method(expr, field, args)?;
                } else {
                    expr = Expr::Select {
                        operand: Box::new(expr),
                        field,
                    };
                }
            } else if self.eat(&Token::LBracket) {
                let index = self.expr()?;
                self.expect(Token::RBracket, "']'")?;
                expr = Expr::Index {
                    operand: Box::new(expr),
                    index: Box::new(index),
                };
            } else {
                return Ok(expr);
            }
        }
    }

    fn primary(&mut self) -> Result<Expr, ExprError> {
        let position = self.position();
        let Some(spanned) = self.advance() else {
            return Err(ExprError::Syntax {
                position,
                message: "unexpected end of expression".into(),
            });
        };

        match spanned.token {
            Token::Int(i) => Ok(Expr::Literal(Value::from(i))),
            Token::Float(f) => serde_json::Number::from_f64(f)
                .map(|n| Expr::Literal(Value::Number(n)))
                .ok_or_else(|| ExprError::Syntax {
                    position,
                    message: format!("non-finite number {f}"),
                }),
            Token::Str(s) => Ok(Expr::Literal(Value::String(s))),
            Token::True => Ok(Expr::Literal(Value::Bool(true))),
            Token::False => Ok(Expr::Literal(Value::Bool(false))),
            Token::Null => Ok(Expr::Literal(Value::Null)),
            Token::LParen => {
                let inner = self.expr()?;
                self.expect(Token::RParen, "')'")?;
                Ok(inner)
            }
            Token::LBracket => Ok(Expr::List(self.args(Token::RBracket)?)),
            Token::LBrace => self.map_literal(),
            Token::Ident(name) => {
                if self.eat(&Token::LParen) {
                    let args = self.args(Token::RParen)?;
                    self.global(name, args, position)
                } else {
                    Ok(Expr::Ident(name))
                }
            }
            other => Err(ExprError::Syntax {
                position,
                message: format!("unexpected token {other:?}"),
            }),
        }
    }

    fn map_literal(&mut self) -> Result<Expr, ExprError> {
        let mut entries = Vec::new();
        if self.eat(&Token::RBrace) {
            return Ok(Expr::Map(entries));
        }
        loop {
            let key = self.expr()?;
            self.expect(Token::Colon, "':' after map key")?;
            let value = self.expr()?;
            entries.push((key, value));
            if self.eat(&Token::Comma) {
                if self.eat(&Token::RBrace) {
                    return Ok(Expr::Map(entries));
                }
                continue;
            }
            self.expect(Token::RBrace, "',' or '}' in map literal")?;
            return Ok(Expr::Map(entries));
        }
    }

    /// Comma-separated expressions up to `close`; a trailing comma is allowed.
    fn args(&mut self, close: Token) -> Result<Vec<Expr>, ExprError> {
        let mut args = Vec::new();
        if self.eat(&close) {
            return Ok(args);
        }
        loop {
            args.push(self.expr()?);
            if self.eat(&Token::Comma) {
                if self.eat(&close) {
                    return Ok(args);
                }
                continue;
            }
            self.expect(close, "',' or closing delimiter")?;
            return Ok(args);
        }
    }

    fn ident(&mut self, what: &str) -> Result<String, ExprError> {
        match self.peek_token() {
            Some(Token::Ident(name)) => {
                let name = name.clone();
                self.pos += 1;
                Ok(name)
            }
            _ => Err(self.error(format!("expected {what}"))),
        }
    }

    fn global(
        &mut self,
        function: String,
        mut args: Vec<Expr>,
        position: usize,
    ) -> Result<Expr, ExprError> {
        match function.as_str() {
            "has" => {
                if args.len() != 1 {
                    return Err(ExprError::Syntax {
                        position,
                        message: "has() takes exactly one argument".into(),
                    });
                }
                match args.remove(0) {
                    Expr::Select { operand, field } => Ok(Expr::Has { operand, field }),
                    _ => Err(ExprError::Syntax {
                        position,
                        message: "has() requires a field selection such as has(event.field)"
                            .into(),
                    }),
                }
            }
            "matches" if args.len() == 2 => {
                let pattern = args.pop().map(compile_pattern).transpose()?;
                let target = args.pop();
                match (target, pattern) {
                    (Some(target), Some(pattern)) => Ok(Expr::Matches {
                        target: Box::new(target),
                        pattern,
                    }),
                    _ => Err(ExprError::Syntax {
                        position,
                        message: "matches() takes a string and a pattern".into(),
                    }),
                }
            }
            _ => Ok(Expr::Call {
                function,
                target: None,
                args,
            }),
        }
    }

    fn method(&mut self, target: Expr, name: String, mut args: Vec<Expr>) -> Result<Expr, ExprError> {
        let kind = match name.as_str() {
            "exists" => Some(MacroKind::Exists),
            "all" => Some(MacroKind::All),
            "filter" => Some(MacroKind::Filter),
            "map" => Some(MacroKind::Map),
            _ => None,
        };

        if let Some(kind) = kind {
            if args.len() != 2 {
                return Err(self.error(format!("{name}() takes a variable and an expression")));
            }
            let body = args.pop();
            let var = args.pop();
            return match (var, body) {
                (Some(Expr::Ident(var)), Some(body)) => Ok(Expr::Comprehension {
                    kind,
                    range: Box::new(target),
                    var,
                    body: Box::new(body),
                }),
                _ => Err(self.error(format!(
                    "{name}() expects an identifier as its first argument"
                ))),
            };
        }

        if name == "matches" {
            if args.len() != 1 {
                return Err(self.error("matches() takes exactly one pattern".into()));
            }
            let pattern = compile_pattern(args.remove(0))?;
            return Ok(Expr::Matches {
                target: Box::new(target),
                pattern,
            });
        }

        Ok(Expr::Call {
            function: name,
            target: Some(Box::new(target)),
            args,
        })
    }
}

fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
    Expr::Binary {
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
    }
}

fn compile_pattern(expr: Expr) -> Result<Pattern, ExprError> {
    match expr {
        Expr::Literal(Value::String(pattern)) => Regex::new(&pattern)
            .map(Pattern::Compiled)
            .map_err(|e| ExprError::Regex {
                pattern,
                message: e.to_string(),
            }),
        other => Ok(Pattern::Dynamic(Box::new(other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precedence_binds_and_tighter_than_or() {
        let expr = parse("a || b && c").unwrap();
        let Expr::Or(lhs, rhs) = expr else {
            panic!("expected Or at the root")
        };
        assert!(matches!(*lhs, Expr::Ident(ref n) if n == "a"));
        assert!(matches!(*rhs, Expr::And(_, _)));
    }

    #[test]
    fn has_requires_selection() {
        assert!(matches!(parse("has(event.x)"), Ok(Expr::Has { .. })));
        assert!(matches!(parse("has(event)"), Err(ExprError::Syntax { .. })));
    }

    #[test]
    fn macros_require_identifier() {
        assert!(matches!(
            parse("event.tags.exists(t, t == 'x')"),
            Ok(Expr::Comprehension {
                kind: MacroKind::Exists,
                ..
            })
        ));
        assert!(parse("event.tags.exists('t', true)").is_err());
    }

    #[test]
    fn literal_regex_is_compiled_at_parse_time() {
        assert!(matches!(
            parse("event.host.matches('^web-[0-9]+$')"),
            Ok(Expr::Matches {
                pattern: Pattern::Compiled(_),
                ..
            })
        ));
        assert!(matches!(
            parse("event.host.matches('(')"),
            Err(ExprError::Regex { .. })
        ));
    }

    #[test]
    fn trailing_tokens_are_rejected() {
        let err = parse("a b").unwrap_err();
        assert!(matches!(err, ExprError::Syntax { position: 2, .. }));
    }

    #[test]
    fn empty_expression_is_rejected() {
        assert!(matches!(
            parse("   "),
            Err(ExprError::Syntax { position: 3, .. })
        ));
    }
}
