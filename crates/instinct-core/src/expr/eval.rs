use std::cmp::Ordering;

use regex::Regex;
use serde_json::{Map, Number, Value};

use super::parser::{BinaryOp, Expr, MacroKind, Pattern, UnaryOp};
use super::ExprError;

// ---------------------------------------------------------------------------
// Activation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
enum Binding<'a> {
    Map(&'a Map<String, Value>),
    Value(&'a Value),
}

/// Names visible to an expression. Later bindings shadow earlier ones.
#[derive(Debug, Clone, Default)]
pub struct Activation<'a> {
    bindings: Vec<(&'a str, Binding<'a>)>,
}

impl<'a> Activation<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(mut self, name: &'a str, value: &'a Value) -> Self {
        self.bindings.push((name, Binding::Value(value)));
        self
    }

    pub fn bind_map(mut self, name: &'a str, map: &'a Map<String, Value>) -> Self {
        self.bindings.push((name, Binding::Map(map)));
        self
    }

    fn resolve(&self, name: &str) -> Option<Operand<'a>> {
        self.bindings
            .iter()
            .rev()
            .find(|(n, _)| *n == name)
            .map(|(_, b)| match *b {
                Binding::Map(m) => Operand::Map(m),
                Binding::Value(v) => Operand::Borrowed(v),
            })
    }
}

// ---------------------------------------------------------------------------
// Operands
// ---------------------------------------------------------------------------

/// Intermediate results borrow from the activation wherever possible so
/// selecting `event.a.b` never clones the whole event.
enum Operand<'a> {
    Borrowed(&'a Value),
    Map(&'a Map<String, Value>),
    Owned(Value),
}

impl Operand<'_> {
    fn view(&self) -> Ref<'_> {
        match self {
            Operand::Borrowed(v) => Ref::from(*v),
            Operand::Map(m) => Ref::Object(m),
            Operand::Owned(v) => Ref::from(v),
        }
    }

    fn into_value(self) -> Value {
        match self {
            Operand::Borrowed(v) => v.clone(),
            Operand::Map(m) => Value::Object(m.clone()),
            Operand::Owned(v) => v,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Ref<'v> {
    Null,
    Bool(bool),
    Number(&'v Number),
    String(&'v str),
    Array(&'v [Value]),
    Object(&'v Map<String, Value>),
}

impl<'v> From<&'v Value> for Ref<'v> {
    fn from(value: &'v Value) -> Self {
        match value {
            Value::Null => Ref::Null,
            Value::Bool(b) => Ref::Bool(*b),
            Value::Number(n) => Ref::Number(n),
            Value::String(s) => Ref::String(s),
            Value::Array(a) => Ref::Array(a),
            Value::Object(m) => Ref::Object(m),
        }
    }
}

impl Ref<'_> {
    fn type_name(self) -> &'static str {
        match self {
            Ref::Null => "null",
            Ref::Bool(_) => "bool",
            Ref::Number(n) if n.is_i64() => "int",
            Ref::Number(_) => "double",
            Ref::String(_) => "string",
            Ref::Array(_) => "list",
            Ref::Object(_) => "map",
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    fn of(n: &Number) -> Self {
        match n.as_i64() {
            Some(i) => Num::Int(i),
            None => Num::Float(n.as_f64().unwrap_or(f64::NAN)),
        }
    }

    fn as_f64(self) -> f64 {
        match self {
            Num::Int(i) => i as f64,
            Num::Float(f) => f,
        }
    }
}

fn mismatch(message: impl Into<String>) -> ExprError {
    ExprError::TypeMismatch(message.into())
}

fn float_value(f: f64) -> Result<Value, ExprError> {
    Number::from_f64(f)
        .map(Value::Number)
        .ok_or(ExprError::Overflow)
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

pub(super) fn evaluate(root: &Expr, activation: &Activation<'_>) -> Result<Value, ExprError> {
    let mut evaluator = Evaluator {
        activation,
        locals: Vec::new(),
    };
    evaluator.eval(root).map(Operand::into_value)
}

struct Evaluator<'s, 'a> {
    activation: &'s Activation<'a>,
    /// Comprehension variables, innermost last.
    locals: Vec<(String, Value)>,
}

impl<'a> Evaluator<'_, 'a> {
    fn eval(&mut self, expr: &Expr) -> Result<Operand<'a>, ExprError> {
        match expr {
            Expr::Literal(v) => Ok(Operand::Owned(v.clone())),
            Expr::Ident(name) => self.ident(name),
            Expr::List(items) => {
                let values = items
                    .iter()
                    .map(|e| self.eval(e).map(Operand::into_value))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Operand::Owned(Value::Array(values)))
            }
            Expr::Map(entries) => {
                let mut map = Map::new();
                for (k, v) in entries {
                    let key = match self.eval(k)?.into_value() {
                        Value::String(s) => s,
                        other => {
                            return Err(mismatch(format!(
                                "map keys must be strings, got {}",
                                Ref::from(&other).type_name()
                            )))
                        }
                    };
                    let value = self.eval(v)?.into_value();
                    map.insert(key, value);
                }
                Ok(Operand::Owned(Value::Object(map)))
            }
            Expr::Select { operand, field } => {
                let container = self.eval(operand)?;
                select(container, field)
            }
            Expr::Index { operand, index } => {
                let container = self.eval(operand)?;
                let key = self.eval(index)?.into_value();
                index_into(container, key)
            }
            Expr::Unary { op, operand } => {
                let value = self.eval(operand)?;
                unary(*op, value.view()).map(Operand::Owned)
            }
            Expr::Binary { op, lhs, rhs } => {
                let l = self.eval(lhs)?;
                let r = self.eval(rhs)?;
                binary(*op, l.view(), r.view()).map(Operand::Owned)
            }
            Expr::And(lhs, rhs) => {
                let l = self.eval_bool(lhs);
                if matches!(l, Ok(false)) {
                    return Ok(Operand::Owned(Value::Bool(false)));
                }
                let r = self.eval_bool(rhs);
                // false absorbs an error on either side.
                let result = match (l, r) {
                    (Ok(a), Ok(b)) => Ok(a && b),
                    (_, Ok(false)) => Ok(false),
                    (Err(e), _) | (_, Err(e)) => Err(e),
                };
                result.map(|b| Operand::Owned(Value::Bool(b)))
            }
            Expr::Or(lhs, rhs) => {
                let l = self.eval_bool(lhs);
                if matches!(l, Ok(true)) {
                    return Ok(Operand::Owned(Value::Bool(true)));
                }
                let r = self.eval_bool(rhs);
                // true absorbs an error on either side.
                let result = match (l, r) {
                    (Ok(a), Ok(b)) => Ok(a || b),
                    (_, Ok(true)) => Ok(true),
                    (Err(e), _) | (_, Err(e)) => Err(e),
                };
                result.map(|b| Operand::Owned(Value::Bool(b)))
            }
            Expr::Ternary {
                cond,
                then,
                otherwise,
            } => {
                if self.eval_bool(cond)? {
                    self.eval(then)
                } else {
                    self.eval(otherwise)
                }
            }
            Expr::Call {
                function,
                target,
                args,
            } => {
                let mut values = Vec::with_capacity(args.len() + 1);
                if let Some(target) = target {
                    values.push(self.eval(target)?);
                }
                for arg in args {
                    values.push(self.eval(arg)?);
                }
                let refs: Vec<Ref<'_>> = values.iter().map(Operand::view).collect();
                call(function, &refs).map(Operand::Owned)
            }
            Expr::Matches { target, pattern } => {
                let target = self.eval(target)?;
                let Ref::String(text) = target.view() else {
                    return Err(mismatch(format!(
                        "matches() requires a string, got {}",
                        target.view().type_name()
                    )));
                };
                let found = match pattern {
                    Pattern::Compiled(re) => re.is_match(text),
                    Pattern::Dynamic(expr) => {
                        let Value::String(pattern) = self.eval(expr)?.into_value() else {
                            return Err(mismatch("matches() pattern must be a string"));
                        };
                        let re = Regex::new(&pattern).map_err(|e| ExprError::Regex {
                            message: e.to_string(),
                            pattern: pattern.clone(),
                        })?;
                        re.is_match(text)
                    }
                };
                Ok(Operand::Owned(Value::Bool(found)))
            }
            Expr::Has { operand, field } => {
                let container = match self.eval(operand) {
                    Ok(c) => c,
                    Err(e) if e.is_absent() => return Ok(Operand::Owned(Value::Bool(false))),
                    Err(e) => return Err(e),
                };
                let present = match container.view() {
                    Ref::Object(m) => m.contains_key(field.as_str()),
                    Ref::Null => false,
                    other => {
                        return Err(mismatch(format!(
                            "has() requires a map, got {}",
                            other.type_name()
                        )))
                    }
                };
                Ok(Operand::Owned(Value::Bool(present)))
            }
            Expr::Comprehension {
                kind,
                range,
                var,
                body,
            } => {
                let items = match self.eval(range)?.into_value() {
                    Value::Array(items) => items,
                    Value::Object(m) => m.into_iter().map(|(k, _)| Value::String(k)).collect(),
                    other => {
                        return Err(mismatch(format!(
                            "cannot iterate over {}",
                            Ref::from(&other).type_name()
                        )))
                    }
                };
                self.comprehension(*kind, items, var, body)
                    .map(Operand::Owned)
            }
        }
    }

    fn ident(&self, name: &str) -> Result<Operand<'a>, ExprError> {
        if let Some((_, v)) = self.locals.iter().rev().find(|(n, _)| n == name) {
            return Ok(Operand::Owned(v.clone()));
        }
        self.activation
            .resolve(name)
            .ok_or_else(|| ExprError::UnknownVariable(name.to_string()))
    }

    fn eval_bool(&mut self, expr: &Expr) -> Result<bool, ExprError> {
        match self.eval(expr)?.view() {
            Ref::Bool(b) => Ok(b),
            other => Err(mismatch(format!("expected bool, got {}", other.type_name()))),
        }
    }

    fn with_local<T>(
        &mut self,
        name: &str,
        value: Value,
        f: impl FnOnce(&mut Self) -> T,
    ) -> T {
        self.locals.push((name.to_string(), value));
        let out = f(self);
        self.locals.pop();
        out
    }

    fn comprehension(
        &mut self,
        kind: MacroKind,
        items: Vec<Value>,
        var: &str,
        body: &Expr,
    ) -> Result<Value, ExprError> {
        match kind {
            MacroKind::Exists | MacroKind::All => {
                // exists() stops at the first true, all() at the first false;
                // an error only surfaces when no element decides the result.
                let decisive = kind == MacroKind::Exists;
                let mut error = None;
                for item in items {
                    match self.with_local(var, item, |ev| ev.eval_bool(body)) {
                        Ok(b) if b == decisive => return Ok(Value::Bool(decisive)),
                        Ok(_) => {}
                        Err(e) => {
                            error.get_or_insert(e);
                        }
                    }
                }
                match error {
                    Some(e) => Err(e),
                    None => Ok(Value::Bool(!decisive)),
                }
            }
            MacroKind::Filter => {
                let mut kept = Vec::new();
                for item in items {
                    if self.with_local(var, item.clone(), |ev| ev.eval_bool(body))? {
                        kept.push(item);
                    }
                }
                Ok(Value::Array(kept))
            }
            MacroKind::Map => {
                let mut mapped = Vec::with_capacity(items.len());
                for item in items {
                    let value = self.with_local(var, item, |ev| {
                        ev.eval(body).map(Operand::into_value)
                    })?;
                    mapped.push(value);
                }
                Ok(Value::Array(mapped))
            }
        }
    }
}

fn select<'a>(container: Operand<'a>, field: &str) -> Result<Operand<'a>, ExprError> {
    let missing = || ExprError::NoSuchKey(field.to_string());
    match container {
        Operand::Map(m) => m.get(field).map(Operand::Borrowed).ok_or_else(missing),
        Operand::Borrowed(Value::Object(m)) => {
            m.get(field).map(Operand::Borrowed).ok_or_else(missing)
        }
        Operand::Owned(Value::Object(mut m)) => {
            m.remove(field).map(Operand::Owned).ok_or_else(missing)
        }
        Operand::Borrowed(Value::Null) | Operand::Owned(Value::Null) => Err(missing()),
        other => Err(mismatch(format!(
            "cannot select field '{field}' from {}",
            other.view().type_name()
        ))),
    }
}

fn index_into(container: Operand<'_>, key: Value) -> Result<Operand<'_>, ExprError> {
    match (container, key) {
        (Operand::Map(m), Value::String(k)) => {
            m.get(&k).map(Operand::Borrowed).ok_or(ExprError::NoSuchKey(k))
        }
        (Operand::Borrowed(Value::Object(m)), Value::String(k)) => {
            m.get(&k).map(Operand::Borrowed).ok_or(ExprError::NoSuchKey(k))
        }
        (Operand::Owned(Value::Object(mut m)), Value::String(k)) => m
            .remove(&k)
            .map(Operand::Owned)
            .ok_or(ExprError::NoSuchKey(k)),
        (Operand::Borrowed(Value::Array(items)), Value::Number(n)) => {
            let i = list_index(&n, items.len())?;
            Ok(Operand::Borrowed(&items[i]))
        }
        (Operand::Owned(Value::Array(mut items)), Value::Number(n)) => {
            let i = list_index(&n, items.len())?;
            Ok(Operand::Owned(items.swap_remove(i)))
        }
        (Operand::Borrowed(Value::Null) | Operand::Owned(Value::Null), Value::String(k)) => {
            Err(ExprError::NoSuchKey(k))
        }
        (container, key) => Err(mismatch(format!(
            "cannot index {} with {}",
            container.view().type_name(),
            Ref::from(&key).type_name()
        ))),
    }
}

fn list_index(n: &Number, len: usize) -> Result<usize, ExprError> {
    let index = n
        .as_i64()
        .ok_or_else(|| mismatch("list index must be an integer"))?;
    match usize::try_from(index) {
        Ok(i) if i < len => Ok(i),
        _ => Err(ExprError::IndexOutOfRange { index, len }),
    }
}

fn unary(op: UnaryOp, operand: Ref<'_>) -> Result<Value, ExprError> {
    match (op, operand) {
        (UnaryOp::Not, Ref::Bool(b)) => Ok(Value::Bool(!b)),
        (UnaryOp::Neg, Ref::Number(n)) => match Num::of(n) {
            Num::Int(i) => i.checked_neg().map(Value::from).ok_or(ExprError::Overflow),
            Num::Float(f) => float_value(-f),
        },
        (UnaryOp::Not, other) => Err(mismatch(format!("cannot negate {}", other.type_name()))),
        (UnaryOp::Neg, other) => Err(mismatch(format!(
            "unary minus requires a number, got {}",
            other.type_name()
        ))),
    }
}

fn binary(op: BinaryOp, l: Ref<'_>, r: Ref<'_>) -> Result<Value, ExprError> {
    match op {
        BinaryOp::Eq => Ok(Value::Bool(equals(l, r))),
        BinaryOp::Ne => Ok(Value::Bool(!equals(l, r))),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ord = compare(l, r)?;
            let result = match op {
                BinaryOp::Lt => ord.is_lt(),
                BinaryOp::Le => ord.is_le(),
                BinaryOp::Gt => ord.is_gt(),
                _ => ord.is_ge(),
            };
            Ok(Value::Bool(result))
        }
        BinaryOp::In => membership(l, r).map(Value::Bool),
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => {
            arithmetic(op, l, r)
        }
    }
}

fn equals(l: Ref<'_>, r: Ref<'_>) -> bool {
    match (l, r) {
        (Ref::Null, Ref::Null) => true,
        (Ref::Bool(a), Ref::Bool(b)) => a == b,
        (Ref::String(a), Ref::String(b)) => a == b,
        (Ref::Number(a), Ref::Number(b)) => match (Num::of(a), Num::of(b)) {
            (Num::Int(x), Num::Int(y)) => x == y,
            (x, y) => x.as_f64() == y.as_f64(),
        },
        (Ref::Array(a), Ref::Array(b)) => {
            a.len() == b.len()
                && a.iter()
                    .zip(b)
                    .all(|(x, y)| equals(Ref::from(x), Ref::from(y)))
        }
        (Ref::Object(a), Ref::Object(b)) => {
            a.len() == b.len()
                && a.iter().all(|(k, v)| {
                    b.get(k)
                        .is_some_and(|w| equals(Ref::from(v), Ref::from(w)))
                })
        }
        _ => false,
    }
}

fn compare(l: Ref<'_>, r: Ref<'_>) -> Result<Ordering, ExprError> {
    match (l, r) {
        (Ref::Number(a), Ref::Number(b)) => match (Num::of(a), Num::of(b)) {
            (Num::Int(x), Num::Int(y)) => Ok(x.cmp(&y)),
            (x, y) => x
                .as_f64()
                .partial_cmp(&y.as_f64())
                .ok_or_else(|| mismatch("cannot order NaN")),
        },
        (Ref::String(a), Ref::String(b)) => Ok(a.cmp(b)),
        (Ref::Bool(a), Ref::Bool(b)) => Ok(a.cmp(&b)),
        (l, r) => Err(mismatch(format!(
            "cannot compare {} with {}",
            l.type_name(),
            r.type_name()
        ))),
    }
}

fn membership(needle: Ref<'_>, haystack: Ref<'_>) -> Result<bool, ExprError> {
    match (needle, haystack) {
        (_, Ref::Array(items)) => Ok(items.iter().any(|v| equals(needle, Ref::from(v)))),
        (Ref::String(key), Ref::Object(m)) => Ok(m.contains_key(key)),
        (needle, haystack) => Err(mismatch(format!(
            "'in' is not defined for {} in {}",
            needle.type_name(),
            haystack.type_name()
        ))),
    }
}

fn arithmetic(op: BinaryOp, l: Ref<'_>, r: Ref<'_>) -> Result<Value, ExprError> {
    match (l, r) {
        (Ref::Number(a), Ref::Number(b)) => numeric(op, Num::of(a), Num::of(b)),
        (Ref::String(a), Ref::String(b)) if op == BinaryOp::Add => {
            Ok(Value::String(format!("{a}{b}")))
        }
        (Ref::Array(a), Ref::Array(b)) if op == BinaryOp::Add => {
            Ok(Value::Array(a.iter().chain(b).cloned().collect()))
        }
        (l, r) => Err(mismatch(format!(
            "no arithmetic overload for {} and {}",
            l.type_name(),
            r.type_name()
        ))),
    }
}

fn numeric(op: BinaryOp, a: Num, b: Num) -> Result<Value, ExprError> {
    if let (Num::Int(x), Num::Int(y)) = (a, b) {
        if y == 0 && matches!(op, BinaryOp::Div | BinaryOp::Rem) {
            return Err(ExprError::DivisionByZero);
        }
        let result = match op {
            BinaryOp::Add => x.checked_add(y),
            BinaryOp::Sub => x.checked_sub(y),
            BinaryOp::Mul => x.checked_mul(y),
            BinaryOp::Div => x.checked_div(y),
            BinaryOp::Rem => x.checked_rem(y),
            _ => return Err(mismatch("not an arithmetic operator")),
        };
        return result.map(Value::from).ok_or(ExprError::Overflow);
    }

    let (x, y) = (a.as_f64(), b.as_f64());
    let result = match op {
        BinaryOp::Add => x + y,
        BinaryOp::Sub => x - y,
        BinaryOp::Mul => x * y,
        BinaryOp::Div if y == 0.0 => return Err(ExprError::DivisionByZero),
        BinaryOp::Div => x / y,
        BinaryOp::Rem => return Err(mismatch("'%' requires integer operands")),
        _ => return Err(mismatch("not an arithmetic operator")),
    };
    float_value(result)
}

// ---------------------------------------------------------------------------
// Functions
// ---------------------------------------------------------------------------

/// Number of arguments a function takes, counting the receiver of a
/// method-style call. `None` for functions that don't exist.
pub(super) fn arity(function: &str) -> Option<usize> {
    match function {
        "size" | "int" | "double" | "string" | "lowerAscii" | "upperAscii" => Some(1),
        "contains" | "startsWith" | "endsWith" => Some(2),
        _ => None,
    }
}

fn call(function: &str, args: &[Ref<'_>]) -> Result<Value, ExprError> {
    match (function, args) {
        ("size", [x]) => size(*x),
        ("int", [x]) => to_int(*x),
        ("double", [x]) => to_double(*x),
        ("string", [x]) => to_string(*x),
        ("contains", [Ref::String(s), Ref::String(sub)]) => Ok(Value::Bool(s.contains(*sub))),
        ("startsWith", [Ref::String(s), Ref::String(p)]) => Ok(Value::Bool(s.starts_with(*p))),
        ("endsWith", [Ref::String(s), Ref::String(p)]) => Ok(Value::Bool(s.ends_with(*p))),
        ("lowerAscii", [Ref::String(s)]) => Ok(Value::String(s.to_ascii_lowercase())),
        ("upperAscii", [Ref::String(s)]) => Ok(Value::String(s.to_ascii_uppercase())),
        _ => match arity(function) {
            None => Err(ExprError::UnknownFunction(function.to_string())),
            Some(expected) if expected != args.len() => Err(ExprError::Arity {
                function: function.to_string(),
                expected,
                found: args.len(),
            }),
            Some(_) => {
                let types: Vec<&str> = args.iter().map(|a| a.type_name()).collect();
                Err(mismatch(format!(
                    "no matching overload for {function}({})",
                    types.join(", ")
                )))
            }
        },
    }
}

fn size(x: Ref<'_>) -> Result<Value, ExprError> {
    let len = match x {
        Ref::String(s) => s.chars().count(),
        Ref::Array(a) => a.len(),
        Ref::Object(m) => m.len(),
        other => return Err(mismatch(format!("size() is not defined for {}", other.type_name()))),
    };
    i64::try_from(len)
        .map(Value::from)
        .map_err(|_| ExprError::Overflow)
}

fn to_int(x: Ref<'_>) -> Result<Value, ExprError> {
    match x {
        Ref::Number(n) => match Num::of(n) {
            Num::Int(i) => Ok(Value::from(i)),
            Num::Float(f) if f.is_finite() && f >= i64::MIN as f64 && f < i64::MAX as f64 => {
                Ok(Value::from(f.trunc() as i64))
            }
            Num::Float(_) => Err(ExprError::Overflow),
        },
        Ref::String(s) => s
            .trim()
            .parse::<i64>()
            .map(Value::from)
            .map_err(|e| mismatch(format!("cannot convert '{s}' to int: {e}"))),
        other => Err(mismatch(format!("int() is not defined for {}", other.type_name()))),
    }
}

fn to_double(x: Ref<'_>) -> Result<Value, ExprError> {
    match x {
        Ref::Number(n) => float_value(Num::of(n).as_f64()),
        Ref::String(s) => {
            let f = s
                .trim()
                .parse::<f64>()
                .map_err(|e| mismatch(format!("cannot convert '{s}' to double: {e}")))?;
            float_value(f)
        }
        other => Err(mismatch(format!(
            "double() is not defined for {}",
            other.type_name()
        ))),
    }
}

fn to_string(x: Ref<'_>) -> Result<Value, ExprError> {
    match x {
        Ref::String(s) => Ok(Value::String(s.to_string())),
        Ref::Number(n) => Ok(Value::String(n.to_string())),
        Ref::Bool(b) => Ok(Value::String(b.to_string())),
        other => Err(mismatch(format!(
            "string() is not defined for {}",
            other.type_name()
        ))),
    }
}
