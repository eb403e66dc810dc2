//! A small expression language for matching events.
//!
//! The grammar is a subset of CEL: literals, field selection and indexing,
//! boolean/arithmetic/comparison operators, a handful of string and
//! conversion functions, and the `exists`/`all`/`filter`/`map` macros.
//! Programs are compiled once and evaluated many times against an
//! [`Activation`] that binds names such as `event` and `variables`.

mod eval;
mod lexer;
mod parser;

use serde_json::Value;
use thiserror::Error;

pub use eval::Activation;

use parser::{Expr, Pattern};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExprError {
    #[error("syntax error at position {position}: {message}")]
    Syntax { position: usize, message: String },

    #[error("no such key: {0}")]
    NoSuchKey(String),

    #[error("undeclared reference to '{0}'")]
    UnknownVariable(String),

    #[error("index {index} out of range for list of length {len}")]
    IndexOutOfRange { index: i64, len: usize },

    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    #[error("division by zero")]
    DivisionByZero,

    #[error("numeric overflow")]
    Overflow,

    #[error("invalid regex '{pattern}': {message}")]
    Regex { pattern: String, message: String },

    #[error("unknown function '{0}'")]
    UnknownFunction(String),

    #[error("{function}() expects {expected} argument(s), got {found}")]
    Arity {
        function: String,
        expected: usize,
        found: usize,
    },
}

impl ExprError {
    /// True when the error means "the data isn't there" rather than "the
    /// expression is wrong for this data".
    pub fn is_absent(&self) -> bool {
        matches!(
            self,
            ExprError::NoSuchKey(_)
                | ExprError::UnknownVariable(_)
                | ExprError::IndexOutOfRange { .. }
        )
    }
}

/// A compiled expression.
#[derive(Debug, Clone)]
pub struct Program {
    source: String,
    root: Expr,
}

impl Program {
    /// Parse and check `source`. Unknown functions and wrong argument counts
    /// are reported here rather than at evaluation time.
    pub fn compile(source: &str) -> Result<Self, ExprError> {
        let root = parser::parse(source)?;
        check(&root)?;
        Ok(Self {
            source: source.to_string(),
            root,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn eval(&self, activation: &Activation<'_>) -> Result<Value, ExprError> {
        eval::evaluate(&self.root, activation)
    }
}

fn check(expr: &Expr) -> Result<(), ExprError> {
    match expr {
        Expr::Literal(_) | Expr::Ident(_) => Ok(()),
        Expr::List(items) => items.iter().try_for_each(check),
        Expr::Map(entries) => entries.iter().try_for_each(|(k, v)| {
            check(k)?;
            check(v)
        }),
        Expr::Select { operand, .. } | Expr::Has { operand, .. } => check(operand),
        Expr::Unary { operand, .. } => check(operand),
        Expr::Index { operand, index } => {
            check(operand)?;
            check(index)
        }
        Expr::Binary { lhs, rhs, .. } | Expr::And(lhs, rhs) | Expr::Or(lhs, rhs) => {
            check(lhs)?;
            check(rhs)
        }
        Expr::Ternary {
            cond,
            then,
            otherwise,
        } => {
            check(cond)?;
            check(then)?;
            check(otherwise)
        }
        Expr::Matches { target, pattern } => {
            check(target)?;
            match pattern {
                Pattern::Compiled(_) => Ok(()),
                Pattern::Dynamic(p) => check(p),
            }
        }
        Expr::Comprehension { range, body, .. } => {
            check(range)?;
            check(body)
        }
        Expr::Call {
            function,
            target,
            args,
        } => {
            let expected = eval::arity(function)
                .ok_or_else(|| ExprError::UnknownFunction(function.clone()))?;
            let found = args.len() + usize::from(target.is_some());
            if found != expected {
                return Err(ExprError::Arity {
                    function: function.clone(),
                    expected,
                    found,
                });
            }
            if let Some(target) = target {
                check(target)?;
            }
            args.iter().try_for_each(check)
        }
    }
}
