//! Expression evaluation for dynamic rule parameters.
//!
//! Strings in a rule file are small expressions over the event context, the
//! user variables and a fixed set of builtins. Anything that does not evaluate
//! comes back as the trimmed string itself, so scale names, arpeggiator modes
//! and duration strings pass through untouched.

mod builtins;
mod lexer;
mod parser;

use std::collections::HashMap;
use std::fmt;

use cadence_types::{ConfigValue, EventType, MidiMessage, MusicLibrary, Value};

use crate::rng::Rng;
use crate::variables::UserVariables;

use parser::{BinOp, Expr};

#[derive(Debug, Clone, PartialEq)]
pub enum EvalError {
    Syntax(String),
    UnknownName(String),
    UnknownFunction(String),
    Type(&'static str),
    DivisionByZero,
    Overflow,
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvalError::Syntax(msg) => write!(f, "syntax error: {}", msg),
            EvalError::UnknownName(name) => write!(f, "unknown name '{}'", name),
            EvalError::UnknownFunction(name) => write!(f, "unknown function '{}'", name),
            EvalError::Type(msg) => write!(f, "type error: {}", msg),
            EvalError::DivisionByZero => write!(f, "division by zero"),
            EvalError::Overflow => write!(f, "integer overflow"),
        }
    }
}

impl std::error::Error for EvalError {}

pub const CHANNEL_IN: &str = "channel_in";
pub const VALUE_1_IN: &str = "value_1_in";
pub const VALUE_2_IN: &str = "value_2_in";
pub const DELTA_IN: &str = "delta_in";
pub const CC_VALUE_SAVED: &str = "cc_val2_saved";
pub const EVENT_IN: &str = "event_in";
pub const CC_TYPE_IN: &str = "cc_type_in";

/// Public alias → canonical context key.
const ALIASES: &[(&str, &str)] = &[
    ("ch_in", CHANNEL_IN),
    ("channel", CHANNEL_IN),
    ("value_1", VALUE_1_IN),
    ("value_2", VALUE_2_IN),
    ("event", EVENT_IN),
    ("cc_type", CC_TYPE_IN),
];

/// Per-event (or per-step) evaluation context.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvalContext {
    fields: HashMap<String, Value>,
}

impl EvalContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Context for an inbound message. Note-on with velocity 0 reads as note-off.
    pub fn from_message(message: &MidiMessage) -> Self {
        let message = message.normalized();
        let mut ctx = Self::new();
        ctx.set(CHANNEL_IN, Value::from(message.channel()));
        ctx.set(VALUE_1_IN, Value::from(message.value1()));
        ctx.set(VALUE_2_IN, Value::from(message.value2()));
        ctx.set(EVENT_IN, Value::from(message.event_type().name()));
        ctx.set(CC_TYPE_IN, Value::from("abs"));
        ctx
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.fields.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    pub fn channel(&self) -> Option<i64> {
        self.get(CHANNEL_IN).and_then(Value::as_i64)
    }

    pub fn value1(&self) -> Option<i64> {
        self.get(VALUE_1_IN).and_then(Value::as_i64)
    }

    pub fn value2(&self) -> Option<i64> {
        self.get(VALUE_2_IN).and_then(Value::as_i64)
    }

    pub fn event_type(&self) -> Option<EventType> {
        self.get(EVENT_IN).and_then(Value::as_str).and_then(EventType::parse)
    }
}

/// Read access to the named step and channel arrays used by `get_var`.
pub trait ArraySource {
    fn sequencer_value(&self, sequencer: usize, name: &str, index: usize) -> Option<Value>;
    fn channel_value(&self, name: &str, index: usize) -> Option<Value>;
}

/// An [`ArraySource`] with no arrays.
pub struct NoArrays;

impl ArraySource for NoArrays {
    fn sequencer_value(&self, _: usize, _: &str, _: usize) -> Option<Value> {
        None
    }

    fn channel_value(&self, _: &str, _: usize) -> Option<Value> {
        None
    }
}

/// Everything an expression may read. Built fresh for each evaluation site.
pub struct Scope<'a> {
    pub ctx: &'a EvalContext,
    pub vars: &'a UserVariables,
    pub library: &'a MusicLibrary,
    pub arrays: &'a dyn ArraySource,
    pub rng: &'a Rng,
    /// Sequencer whose arrays `get_var` falls back to.
    pub current_sequencer: Option<usize>,
    /// Rule or module id used in log lines.
    pub source: &'a str,
}

impl<'a> Scope<'a> {
    /// Evaluates a config leaf. Numeric literals come back as integers.
    pub fn evaluate(&self, expr: &ConfigValue) -> Value {
        match expr {
            ConfigValue::Float(f) if f.is_finite() => Value::Int(f.trunc() as i64),
            other => self.evaluate_exact(other),
        }
    }

    /// Evaluates a config leaf, keeping fractional literals.
    pub fn evaluate_exact(&self, expr: &ConfigValue) -> Value {
        match expr {
            ConfigValue::Null => Value::Null,
            ConfigValue::Int(i) => Value::Int(*i),
            ConfigValue::Float(f) => Value::Float(*f),
            ConfigValue::Str(s) => self.evaluate_str(s),
            ConfigValue::List(items) => {
                Value::List(items.iter().map(|item| self.evaluate_exact(item)).collect())
            }
            ConfigValue::Scale(_) | ConfigValue::ScaleNotes(_) => self.resolve(expr, Value::Null),
        }
    }

    pub fn evaluate_str(&self, src: &str) -> Value {
        let trimmed = src.trim();
        if let Ok(i) = trimmed.parse::<i64>() {
            return Value::Int(i);
        }
        if let Some(value) = self.lookup(trimmed) {
            return value;
        }
        match lexer::tokenize(trimmed)
            .and_then(|tokens| parser::parse(&tokens))
            .and_then(|expr| self.eval_expr(&expr))
        {
            Ok(value) => value,
            Err(e) => {
                log::trace!(target: "eval", "[{}] '{}' kept as text: {}", self.source, trimmed, e);
                Value::Str(trimmed.to_string())
            }
        }
    }

    /// Name lookup: user variables win over context fields and their aliases.
    pub fn lookup(&self, name: &str) -> Option<Value> {
        if let Some(value) = self.vars.get(name) {
            return Some(value.clone());
        }
        if let Some((_, canonical)) = ALIASES.iter().find(|(alias, _)| *alias == name) {
            if let Some(value) = self.ctx.get(canonical) {
                return Some(value.clone());
            }
        }
        self.ctx.get(name).cloned()
    }

    fn eval_expr(&self, expr: &Expr) -> Result<Value, EvalError> {
        match expr {
            Expr::Int(i) => Ok(Value::Int(*i)),
            Expr::Float(f) => Ok(Value::Float(*f)),
            Expr::Str(s) => Ok(Value::Str(s.clone())),
            Expr::None => Ok(Value::Null),
            Expr::List(items) => items
                .iter()
                .map(|item| self.eval_expr(item))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::List),
            Expr::Name(name) => self
                .lookup(name)
                .ok_or_else(|| EvalError::UnknownName(name.clone())),
            Expr::Call(name, args) => {
                let args = args
                    .iter()
                    .map(|arg| self.eval_expr(arg))
                    .collect::<Result<Vec<_>, _>>()?;
                builtins::call(self, name, args)
            }
            Expr::Index(target, index) => {
                let target = self.eval_expr(target)?;
                let index = self.eval_expr(index)?;
                index_value(&target, &index)
            }
            Expr::Neg(inner) => match self.eval_expr(inner)? {
                Value::Int(i) => i.checked_neg().map(Value::Int).ok_or(EvalError::Overflow),
                Value::Float(f) => Ok(Value::Float(-f)),
                _ => Err(EvalError::Type("bad operand for unary -")),
            },
            Expr::Not(inner) => Ok(Value::from(!self.eval_expr(inner)?.is_truthy())),
            Expr::And(lhs, rhs) => {
                let left = self.eval_expr(lhs)?;
                if !left.is_truthy() {
                    return Ok(left);
                }
                self.eval_expr(rhs)
            }
            Expr::Or(lhs, rhs) => {
                let left = self.eval_expr(lhs)?;
                if left.is_truthy() {
                    return Ok(left);
                }
                self.eval_expr(rhs)
            }
            Expr::Conditional { then, cond, otherwise } => {
                if self.eval_expr(cond)?.is_truthy() {
                    self.eval_expr(then)
                } else {
                    self.eval_expr(otherwise)
                }
            }
            Expr::Binary(op, lhs, rhs) => {
                let left = self.eval_expr(lhs)?;
                let right = self.eval_expr(rhs)?;
                binary(*op, &left, &right)
            }
        }
    }
}

fn index_value(target: &Value, index: &Value) -> Result<Value, EvalError> {
    let Value::Int(i) = index else {
        return Err(EvalError::Type("index must be an integer"));
    };
    let resolve = |len: usize| -> Result<usize, EvalError> {
        let idx = if *i < 0 { *i + len as i64 } else { *i };
        if idx < 0 || idx >= len as i64 {
            Err(EvalError::Type("index out of range"))
        } else {
            Ok(idx as usize)
        }
    };
    match target {
        Value::List(items) => Ok(items[resolve(items.len())?].clone()),
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            Ok(Value::Str(chars[resolve(chars.len())?].to_string()))
        }
        _ => Err(EvalError::Type("value is not indexable")),
    }
}

fn binary(op: BinOp, a: &Value, b: &Value) -> Result<Value, EvalError> {
    use Value::{Float, Int};

    match op {
        BinOp::Eq => return Ok(Value::from(a.loose_eq(b))),
        BinOp::Ne => return Ok(Value::from(!a.loose_eq(b))),
        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
            let ordering = match (a, b) {
                (Value::Str(x), Value::Str(y)) => x.partial_cmp(y),
                (Int(x), Int(y)) => x.partial_cmp(y),
                _ => match (a.as_f64(), b.as_f64()) {
                    (Some(x), Some(y)) => x.partial_cmp(&y),
                    _ => return Err(EvalError::Type("values are not comparable")),
                },
            };
            let Some(ordering) = ordering else {
                return Ok(Value::from(false));
            };
            let result = match op {
                BinOp::Lt => ordering.is_lt(),
                BinOp::Le => ordering.is_le(),
                BinOp::Gt => ordering.is_gt(),
                _ => ordering.is_ge(),
            };
            return Ok(Value::from(result));
        }
        _ => {}
    }

    match (op, a, b) {
        (BinOp::Add, Value::Str(x), Value::Str(y)) => return Ok(Value::Str(format!("{}{}", x, y))),
        (BinOp::Add, Value::List(x), Value::List(y)) => {
            return Ok(Value::List(x.iter().chain(y).cloned().collect()))
        }
        _ => {}
    }

    if let (Int(x), Int(y)) = (a, b) {
        let (x, y) = (*x, *y);
        return match op {
            BinOp::Add => x.checked_add(y).map(Int).ok_or(EvalError::Overflow),
            BinOp::Sub => x.checked_sub(y).map(Int).ok_or(EvalError::Overflow),
            BinOp::Mul => x.checked_mul(y).map(Int).ok_or(EvalError::Overflow),
            BinOp::Div => {
                if y == 0 {
                    Err(EvalError::DivisionByZero)
                } else {
                    Ok(Float(x as f64 / y as f64))
                }
            }
            BinOp::FloorDiv => {
                if y == 0 {
                    return Err(EvalError::DivisionByZero);
                }
                let q = x.checked_div(y).ok_or(EvalError::Overflow)?;
                if x % y != 0 && ((x < 0) != (y < 0)) {
                    Ok(Int(q - 1))
                } else {
                    Ok(Int(q))
                }
            }
            BinOp::Mod => {
                if y == 0 {
                    return Err(EvalError::DivisionByZero);
                }
                let r = x.checked_rem(y).ok_or(EvalError::Overflow)?;
                if r != 0 && ((r < 0) != (y < 0)) {
                    Ok(Int(r + y))
                } else {
                    Ok(Int(r))
                }
            }
            BinOp::Pow => {
                if y >= 0 {
                    let exp = u32::try_from(y).map_err(|_| EvalError::Overflow)?;
                    x.checked_pow(exp).map(Int).ok_or(EvalError::Overflow)
                } else {
                    Ok(Float((x as f64).powf(y as f64)))
                }
            }
            _ => Err(EvalError::Type("unsupported operator")),
        };
    }

    let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) else {
        return Err(EvalError::Type("unsupported operand types"));
    };
    match op {
        BinOp::Add => Ok(Float(x + y)),
        BinOp::Sub => Ok(Float(x - y)),
        BinOp::Mul => Ok(Float(x * y)),
        BinOp::Div if y == 0.0 => Err(EvalError::DivisionByZero),
        BinOp::Div => Ok(Float(x / y)),
        BinOp::FloorDiv if y == 0.0 => Err(EvalError::DivisionByZero),
        BinOp::FloorDiv => Ok(Float((x / y).floor())),
        BinOp::Mod if y == 0.0 => Err(EvalError::DivisionByZero),
        BinOp::Mod => Ok(Float(x - y * (x / y).floor())),
        BinOp::Pow => Ok(Float(x.powf(y))),
        _ => Err(EvalError::Type("unsupported operator")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixture {
        ctx: EvalContext,
        vars: UserVariables,
        library: MusicLibrary,
        rng: Rng,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                ctx: EvalContext::from_message(&MidiMessage::NoteOn {
                    channel: 2,
                    note: 60,
                    velocity: 100,
                }),
                vars: UserVariables::default(),
                library: MusicLibrary::default(),
                rng: Rng::new(3),
            }
        }

        fn scope(&self) -> Scope<'_> {
            Scope {
                ctx: &self.ctx,
                vars: &self.vars,
                library: &self.library,
                arrays: &NoArrays,
                rng: &self.rng,
                current_sequencer: None,
                source: "test",
            }
        }

        fn eval(&self, src: &str) -> Value {
            self.scope().evaluate(&ConfigValue::Str(src.to_string()))
        }
    }

    #[test]
    fn test_integer_literal() {
        let f = Fixture::new();
        assert_eq!(f.eval("5"), Value::Int(5));
        assert_eq!(f.eval("  -3 "), Value::Int(-3));
    }

    #[test]
    fn test_numeric_config_literal_coerced() {
        let f = Fixture::new();
        assert_eq!(f.scope().evaluate(&ConfigValue::Float(2.9)), Value::Int(2));
        assert_eq!(f.scope().evaluate_exact(&ConfigValue::Float(2.9)), Value::Float(2.9));
    }

    #[test]
    fn test_random_bounds() {
        let f = Fixture::new();
        assert_eq!(f.eval("random(3,3)"), Value::Int(3));
        for _ in 0..100 {
            let v = f.eval("random(10,1)").as_i64().unwrap();
            assert!((1..=10).contains(&v));
        }
    }

    #[test]
    fn test_random_non_integer_bounds_is_null() {
        let f = Fixture::new();
        assert_eq!(f.eval("random(1, 'x')"), Value::Null);
    }

    #[test]
    fn test_toggle() {
        let f = Fixture::new();
        assert_eq!(f.eval("toggle(0)"), Value::Int(1));
        assert_eq!(f.eval("toggle(5)"), Value::Int(0));
    }

    #[test]
    fn test_unresolvable_returns_trimmed_text() {
        let f = Fixture::new();
        assert_eq!(f.eval("  major "), Value::Str("major".into()));
        assert_eq!(f.eval("1/16t"), Value::Str("1/16t".into()));
        assert_eq!(f.eval("C#"), Value::Str("C#".into()));
    }

    #[test]
    fn test_context_aliases() {
        let f = Fixture::new();
        assert_eq!(f.eval("value_1"), Value::Int(60));
        assert_eq!(f.eval("ch_in + 1"), Value::Int(3));
        assert_eq!(f.eval("event"), Value::Str("note_on".into()));
    }

    #[test]
    fn test_user_variables_win() {
        let mut f = Fixture::new();
        f.vars.insert("value_1", Value::Int(7));
        assert_eq!(f.eval("value_1 * 2"), Value::Int(14));
    }

    #[test]
    fn test_arithmetic_semantics() {
        let f = Fixture::new();
        assert_eq!(f.eval("7 // 2"), Value::Int(3));
        assert_eq!(f.eval("-7 // 2"), Value::Int(-4));
        assert_eq!(f.eval("-7 % 3"), Value::Int(2));
        assert_eq!(f.eval("1/4"), Value::Float(0.25));
        assert_eq!(f.eval("2 ** 3"), Value::Int(8));
        assert_eq!(f.eval("1/0"), Value::Str("1/0".into()));
    }

    #[test]
    fn test_conditional_and_logic() {
        let f = Fixture::new();
        assert_eq!(f.eval("100 if value_2 > 64 else 0"), Value::Int(100));
        assert_eq!(f.eval("0 or 5"), Value::Int(5));
        assert_eq!(f.eval("not value_1"), Value::Int(0));
        assert_eq!(f.eval("value_1 == 60 and ch_in == 2"), Value::Int(1));
    }

    #[test]
    fn test_list_and_index() {
        let f = Fixture::new();
        assert_eq!(
            f.eval("[value_1, value_1 + 4]"),
            Value::List(vec![Value::Int(60), Value::Int(64)])
        );
        assert_eq!(f.eval("[1, 2, 3][-1]"), Value::Int(3));
    }
}
