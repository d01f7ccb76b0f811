//! Runtime values for the tree-walking interpreter.
//!
//! Values use `Rc`/`RefCell` and never leave the thread that created them:
//! every suite run builds its own interpreter.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::tree::Stmt;
use crate::unparse;

pub type Namespace = Rc<RefCell<HashMap<String, Value>>>;

pub fn namespace() -> Namespace {
    Rc::new(RefCell::new(HashMap::new()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Print,
    Len,
    Abs,
    Range,
    Int,
    Float,
    Str,
    Bool,
    IsInstance,
    Min,
    Max,
    List,
    Tuple,
    Dict,
    Round,
    Sum,
    Sorted,
    Any,
    All,
    Enumerate,
    Zip,
    ListAppend,
    DictGet,
    DictKeys,
    DictValues,
    DictItems,
    DictPop,
    AssertEqual,
    AssertNotEqual,
    AssertTrue,
    AssertFalse,
    AssertIsNone,
    AssertIsNotNone,
    AssertAlmostEqual,
    AssertLess,
    AssertGreater,
    AssertIn,
    AssertRaises,
    Fail,
    PytestRaises,
}

pub struct Function {
    pub name: String,
    /// Named parameters: positional-or-keyword first, then keyword-only.
    pub params: Vec<String>,
    pub defaults: Vec<Option<Value>>,
    /// `params[..positional]` can be filled by position.
    pub positional: usize,
    /// `params[..posonly]` can only be filled by position.
    pub posonly: usize,
    pub varargs: Option<String>,
    pub kwargs: Option<String>,
    pub body: Rc<Vec<Stmt>>,
    pub globals: Namespace,
    /// Namespaces of the enclosing functions, innermost first.
    pub closure: Vec<Namespace>,
}

pub struct Class {
    pub name: String,
    pub bases: Vec<Rc<Class>>,
    pub attrs: RefCell<HashMap<String, Value>>,
}

impl Class {
    pub fn new(name: &str, bases: Vec<Rc<Class>>) -> Rc<Class> {
        Rc::new(Class {
            name: name.to_string(),
            bases,
            attrs: RefCell::new(HashMap::new()),
        })
    }

    /// Depth-first, left-to-right linearization without duplicates.
    pub fn mro(self: &Rc<Class>) -> Vec<Rc<Class>> {
        let mut out: Vec<Rc<Class>> = Vec::new();
        let mut stack = vec![self.clone()];
        while let Some(class) = stack.pop() {
            if out.iter().any(|c| Rc::ptr_eq(c, &class)) {
                continue;
            }
            for base in class.bases.iter().rev() {
                stack.push(base.clone());
            }
            out.push(class);
        }
        out
    }

    pub fn lookup(self: &Rc<Class>, name: &str) -> Option<Value> {
        self.mro()
            .iter()
            .find_map(|c| c.attrs.borrow().get(name).cloned())
    }

    pub fn is_subclass_of(self: &Rc<Class>, other: &Rc<Class>) -> bool {
        self.mro().iter().any(|c| Rc::ptr_eq(c, other))
    }
}

pub struct Instance {
    pub class: Rc<Class>,
    pub fields: RefCell<HashMap<String, Value>>,
}

pub struct Module {
    pub name: String,
    pub globals: Namespace,
}

pub struct RaisesContext {
    pub expected: Value,
    /// The exception swallowed by the `with` block, once it has run.
    pub caught: RefCell<Option<Value>>,
    /// Attribute that exposes `caught`: `exception` for unittest, `value` for pytest.
    pub attr: &'static str,
}

#[derive(Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    List(Rc<RefCell<Vec<Value>>>),
    Tuple(Rc<Vec<Value>>),
    /// Insertion-ordered entries with unique keys.
    Dict(Rc<RefCell<Vec<(Value, Value)>>>),
    Ellipsis,
    Function(Rc<Function>),
    Builtin(Builtin),
    BoundMethod(Rc<(Value, Value)>),
    Class(Rc<Class>),
    Instance(Rc<Instance>),
    Module(Rc<Module>),
    /// Context manager produced by `assertRaises(E)` / `pytest.raises(E)`.
    Raises(Rc<RaisesContext>),
}

impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.repr())
    }
}

impl Value {
    pub fn str(s: &str) -> Value {
        Value::Str(Rc::from(s))
    }

    pub fn list(items: Vec<Value>) -> Value {
        Value::List(Rc::new(RefCell::new(items)))
    }

    pub fn tuple(items: Vec<Value>) -> Value {
        Value::Tuple(Rc::new(items))
    }

    pub fn dict(entries: Vec<(Value, Value)>) -> Value {
        Value::Dict(Rc::new(RefCell::new(entries)))
    }

    pub fn type_name(&self) -> String {
        match self {
            Value::None => "NoneType".into(),
            Value::Bool(_) => "bool".into(),
            Value::Int(_) => "int".into(),
            Value::Float(_) => "float".into(),
            Value::Str(_) => "str".into(),
            Value::List(_) => "list".into(),
            Value::Tuple(_) => "tuple".into(),
            Value::Dict(_) => "dict".into(),
            Value::Ellipsis => "ellipsis".into(),
            Value::Function(_) => "function".into(),
            Value::Builtin(_) => "builtin_function_or_method".into(),
            Value::BoundMethod(_) => "method".into(),
            Value::Class(_) => "type".into(),
            Value::Instance(i) => i.class.name.clone(),
            Value::Module(_) => "module".into(),
            Value::Raises(_) => "RaisesContext".into(),
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(l) => !l.borrow().is_empty(),
            Value::Tuple(t) => !t.is_empty(),
            Value::Dict(d) => !d.borrow().is_empty(),
            _ => true,
        }
    }

    /// `str(value)`.
    pub fn display(&self) -> String {
        match self {
            Value::Str(s) => s.to_string(),
            Value::Instance(inst) => match inst.fields.borrow().get("args") {
                Some(Value::Tuple(args)) => match args.as_slice() {
                    [] => String::new(),
                    [one] => one.display(),
                    many => Value::Tuple(Rc::new(many.to_vec())).repr(),
                },
                _ => format!("<{} object>", inst.class.name),
            },
            other => other.repr(),
        }
    }

    /// `repr(value)`.
    pub fn repr(&self) -> String {
        match self {
            Value::None => "None".into(),
            Value::Bool(true) => "True".into(),
            Value::Bool(false) => "False".into(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => float_repr(*f),
            Value::Str(s) => unparse::quote(s),
            Value::List(items) => {
                let inner: Vec<String> = items.borrow().iter().map(Value::repr).collect();
                format!("[{}]", inner.join(", "))
            }
            Value::Tuple(items) => {
                let inner: Vec<String> = items.iter().map(Value::repr).collect();
                if inner.len() == 1 {
                    format!("({},)", inner[0])
                } else {
                    format!("({})", inner.join(", "))
                }
            }
            Value::Dict(entries) => {
                let inner: Vec<String> = entries
                    .borrow()
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k.repr(), v.repr()))
                    .collect();
                format!("{{{}}}", inner.join(", "))
            }
            Value::Ellipsis => "Ellipsis".into(),
            Value::Function(func) => format!("<function {}>", func.name),
            Value::Builtin(b) => format!("<built-in function {b:?}>"),
            Value::BoundMethod(_) => "<bound method>".into(),
            Value::Class(class) => format!("<class '{}'>", class.name),
            Value::Instance(inst) => match inst.fields.borrow().get("args") {
                Some(Value::Tuple(args)) => {
                    let inner: Vec<String> = args.iter().map(Value::repr).collect();
                    format!("{}({})", inst.class.name, inner.join(", "))
                }
                _ => format!("<{} object>", inst.class.name),
            },
            Value::Module(m) => format!("<module '{}'>", m.name),
            Value::Raises(_) => "<RaisesContext>".into(),
        }
    }
}

pub fn float_repr(f: f64) -> String {
    if f.is_nan() {
        "nan".into()
    } else if f.is_infinite() {
        if f > 0.0 { "inf".into() } else { "-inf".into() }
    } else if f.fract() == 0.0 && f.abs() < 1e16 {
        format!("{f:.1}")
    } else {
        format!("{f:?}")
    }
}

/// Python `==`.
pub fn py_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::None, Value::None) => true,
        (Value::Str(x), Value::Str(y)) => x == y,
        (Value::List(x), Value::List(y)) => {
            let (x, y) = (x.borrow(), y.borrow());
            x.len() == y.len() && x.iter().zip(y.iter()).all(|(p, q)| py_eq(p, q))
        }
        (Value::Tuple(x), Value::Tuple(y)) => {
            x.len() == y.len() && x.iter().zip(y.iter()).all(|(p, q)| py_eq(p, q))
        }
        (Value::Dict(x), Value::Dict(y)) => {
            let (x, y) = (x.borrow(), y.borrow());
            x.len() == y.len()
                && x.iter()
                    .all(|(k, v)| dict_lookup(&y, k).is_some_and(|other| py_eq(v, &other)))
        }
        (Value::Ellipsis, Value::Ellipsis) => true,
        (Value::Function(x), Value::Function(y)) => Rc::ptr_eq(x, y),
        (Value::Class(x), Value::Class(y)) => Rc::ptr_eq(x, y),
        (Value::Instance(x), Value::Instance(y)) => Rc::ptr_eq(x, y),
        (Value::Module(x), Value::Module(y)) => Rc::ptr_eq(x, y),
        (Value::Builtin(x), Value::Builtin(y)) => x == y,
        _ => match (Num::of(a), Num::of(b)) {
            (Some(Num::I(x)), Some(Num::I(y))) => x == y,
            (Some(x), Some(y)) => x.as_f64() == y.as_f64(),
            _ => false,
        },
    }
}

/// Python `is`, with small values compared by value.
pub fn py_is(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::None, Value::None) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Int(x), Value::Int(y)) => x == y,
        (Value::Str(x), Value::Str(y)) => Rc::ptr_eq(x, y),
        (Value::List(x), Value::List(y)) => Rc::ptr_eq(x, y),
        (Value::Tuple(x), Value::Tuple(y)) => Rc::ptr_eq(x, y),
        (Value::Dict(x), Value::Dict(y)) => Rc::ptr_eq(x, y),
        (Value::Float(_), Value::Float(_)) => false,
        _ => {
            std::mem::discriminant(a) == std::mem::discriminant(b) && py_eq(a, b)
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Num {
    I(i64),
    F(f64),
}

impl Num {
    pub fn of(v: &Value) -> Option<Num> {
        match v {
            Value::Bool(b) => Some(Num::I(*b as i64)),
            Value::Int(i) => Some(Num::I(*i)),
            Value::Float(f) => Some(Num::F(*f)),
            _ => None,
        }
    }

    pub fn as_f64(self) -> f64 {
        match self {
            Num::I(i) => i as f64,
            Num::F(f) => f,
        }
    }
}

/// Error raised by a primitive operation, turned into a Python exception by the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct OpError {
    pub kind: &'static str,
    pub message: String,
}

pub fn op_error(kind: &'static str, message: impl Into<String>) -> OpError {
    OpError {
        kind,
        message: message.into(),
    }
}

fn overflow() -> OpError {
    op_error("OverflowError", "integer overflow")
}

pub type OpResult = std::result::Result<Value, OpError>;

pub const MAX_SEQUENCE: usize = 1_000_000;

fn floor_div_int(a: i64, b: i64) -> Option<i64> {
    let q = a.checked_div(b)?;
    if a % b != 0 && ((a < 0) != (b < 0)) {
        q.checked_sub(1)
    } else {
        Some(q)
    }
}

fn mod_int(a: i64, b: i64) -> i64 {
    let r = a.wrapping_rem(b);
    if r != 0 && ((r < 0) != (b < 0)) { r + b } else { r }
}

fn mod_float(a: f64, b: f64) -> f64 {
    let r = a % b;
    if r != 0.0 && ((r < 0.0) != (b < 0.0)) { r + b } else { r }
}

fn repeat(items: &[Value], times: i64) -> std::result::Result<Vec<Value>, OpError> {
    let times = times.max(0) as usize;
    if items.len().saturating_mul(times) > MAX_SEQUENCE {
        return Err(op_error("MemoryError", "sequence too large"));
    }
    let mut out = Vec::with_capacity(items.len() * times);
    for _ in 0..times {
        out.extend(items.iter().cloned());
    }
    Ok(out)
}

fn unsupported(op: &str, a: &Value, b: &Value) -> OpError {
    op_error(
        "TypeError",
        format!(
            "unsupported operand type(s) for {}: '{}' and '{}'",
            op,
            a.type_name(),
            b.type_name()
        ),
    )
}

/// Python semantics for the binary arithmetic and bitwise operators.
pub fn binary(op: crate::tree::Operator, a: &Value, b: &Value) -> OpResult {
    use crate::tree::Operator as Op;

    match (op, a, b) {
        (Op::Add, Value::Str(x), Value::Str(y)) => {
            if x.len() + y.len() > MAX_SEQUENCE {
                return Err(op_error("MemoryError", "string too large"));
            }
            return Ok(Value::str(&format!("{x}{y}")));
        }
        (Op::Add, Value::List(x), Value::List(y)) => {
            let (x, y) = (x.borrow(), y.borrow());
            if x.len() + y.len() > MAX_SEQUENCE {
                return Err(op_error("MemoryError", "sequence too large"));
            }
            let mut items = x.clone();
            items.extend(y.iter().cloned());
            return Ok(Value::list(items));
        }
        (Op::Add, Value::Tuple(x), Value::Tuple(y)) => {
            if x.len() + y.len() > MAX_SEQUENCE {
                return Err(op_error("MemoryError", "sequence too large"));
            }
            let mut items = x.as_ref().clone();
            items.extend(y.iter().cloned());
            return Ok(Value::Tuple(Rc::new(items)));
        }
        (Op::Mult, Value::Str(s), Value::Int(n)) | (Op::Mult, Value::Int(n), Value::Str(s)) => {
            let n = (*n).max(0) as usize;
            if s.len().saturating_mul(n) > MAX_SEQUENCE {
                return Err(op_error("MemoryError", "string too large"));
            }
            return Ok(Value::str(&s.repeat(n)));
        }
        (Op::Mult, Value::List(l), Value::Int(n)) | (Op::Mult, Value::Int(n), Value::List(l)) => {
            return Ok(Value::list(repeat(&l.borrow(), *n)?));
        }
        _ => {}
    }

    let (Some(x), Some(y)) = (Num::of(a), Num::of(b)) else {
        return Err(unsupported(op.symbol(), a, b));
    };

    match (x, y) {
        (Num::I(x), Num::I(y)) => int_binary(op, x, y),
        (x, y) => float_binary(op, x.as_f64(), y.as_f64(), a, b),
    }
}

fn int_binary(op: crate::tree::Operator, x: i64, y: i64) -> OpResult {
    use crate::tree::Operator as Op;

    let v = match op {
        Op::Add => x.checked_add(y).ok_or_else(overflow)?,
        Op::Sub => x.checked_sub(y).ok_or_else(overflow)?,
        Op::Mult => x.checked_mul(y).ok_or_else(overflow)?,
        Op::Div => {
            if y == 0 {
                return Err(op_error("ZeroDivisionError", "division by zero"));
            }
            return Ok(Value::Float(x as f64 / y as f64));
        }
        Op::FloorDiv => {
            if y == 0 {
                return Err(op_error(
                    "ZeroDivisionError",
                    "integer division or modulo by zero",
                ));
            }
            floor_div_int(x, y).ok_or_else(overflow)?
        }
        Op::Mod => {
            if y == 0 {
                return Err(op_error("ZeroDivisionError", "integer modulo by zero"));
            }
            mod_int(x, y)
        }
        Op::Pow => {
            if y < 0 {
                if x == 0 {
                    return Err(op_error(
                        "ZeroDivisionError",
                        "0.0 cannot be raised to a negative power",
                    ));
                }
                return Ok(Value::Float((x as f64).powf(y as f64)));
            }
            let exp = u32::try_from(y).map_err(|_| overflow())?;
            x.checked_pow(exp).ok_or_else(overflow)?
        }
        Op::BitAnd => x & y,
        Op::BitOr => x | y,
        Op::BitXor => x ^ y,
        Op::LShift | Op::RShift => {
            if y < 0 {
                return Err(op_error("ValueError", "negative shift count"));
            }
            if op == Op::RShift {
                if y >= 64 { if x < 0 { -1 } else { 0 } } else { x >> y }
            } else if x == 0 {
                0
            } else {
                if y >= 63 {
                    return Err(overflow());
                }
                let shifted = x << y;
                if shifted >> y != x {
                    return Err(overflow());
                }
                shifted
            }
        }
        other => {
            return Err(op_error(
                "TypeError",
                format!("'{}' is not a binary arithmetic operator", other.symbol()),
            ));
        }
    };
    Ok(Value::Int(v))
}

fn float_binary(op: crate::tree::Operator, x: f64, y: f64, a: &Value, b: &Value) -> OpResult {
    use crate::tree::Operator as Op;

    let v = match op {
        Op::Add => x + y,
        Op::Sub => x - y,
        Op::Mult => x * y,
        Op::Div => {
            if y == 0.0 {
                return Err(op_error("ZeroDivisionError", "float division by zero"));
            }
            x / y
        }
        Op::FloorDiv => {
            if y == 0.0 {
                return Err(op_error("ZeroDivisionError", "float floor division by zero"));
            }
            (x / y).floor()
        }
        Op::Mod => {
            if y == 0.0 {
                return Err(op_error("ZeroDivisionError", "float modulo"));
            }
            mod_float(x, y)
        }
        Op::Pow => {
            if x == 0.0 && y < 0.0 {
                return Err(op_error(
                    "ZeroDivisionError",
                    "0.0 cannot be raised to a negative power",
                ));
            }
            if x < 0.0 && y.fract() != 0.0 {
                return Err(op_error("ValueError", "math domain error"));
            }
            let r = x.powf(y);
            if r.is_infinite() && x.is_finite() && y.is_finite() {
                return Err(op_error("OverflowError", "numerical result out of range"));
            }
            r
        }
        _ => return Err(unsupported(op.symbol(), a, b)),
    };
    Ok(Value::Float(v))
}

/// Python ordering comparisons (`<`, `<=`, `>`, `>=`).
pub fn ordering(op: crate::tree::Operator, a: &Value, b: &Value) -> std::result::Result<bool, OpError> {
    use std::cmp::Ordering;
    use crate::tree::Operator as Op;

    let ord = match (a, b) {
        (Value::Str(x), Value::Str(y)) => Some(x.cmp(y)),
        _ => match (Num::of(a), Num::of(b)) {
            (Some(Num::I(x)), Some(Num::I(y))) => Some(x.cmp(&y)),
            (Some(x), Some(y)) => x.as_f64().partial_cmp(&y.as_f64()),
            _ => {
                return Err(op_error(
                    "TypeError",
                    format!(
                        "'{}' not supported between instances of '{}' and '{}'",
                        op.symbol(),
                        a.type_name(),
                        b.type_name()
                    ),
                ));
            }
        },
    };
    // NaN compares false against everything.
    let Some(ord) = ord else { return Ok(false) };
    Ok(match op {
        Op::Lt => ord == Ordering::Less,
        Op::LtE => ord != Ordering::Greater,
        Op::Gt => ord == Ordering::Greater,
        Op::GtE => ord != Ordering::Less,
        _ => false,
    })
}

/// Python `in`.
pub fn contains(container: &Value, item: &Value) -> std::result::Result<bool, OpError> {
    match container {
        Value::List(items) => Ok(items.borrow().iter().any(|v| py_eq(v, item))),
        Value::Tuple(items) => Ok(items.iter().any(|v| py_eq(v, item))),
        Value::Dict(entries) => {
            hashable(item)?;
            Ok(dict_lookup(&entries.borrow(), item).is_some())
        }
        Value::Str(haystack) => match item {
            Value::Str(needle) => Ok(haystack.contains(needle.as_ref())),
            other => Err(op_error(
                "TypeError",
                format!(
                    "'in <string>' requires string as left operand, not {}",
                    other.type_name()
                ),
            )),
        },
        other => Err(op_error(
            "TypeError",
            format!("argument of type '{}' is not iterable", other.type_name()),
        )),
    }
}

/// Items of an iterable value.
pub fn iterate(value: &Value) -> std::result::Result<Vec<Value>, OpError> {
    match value {
        Value::List(items) => Ok(items.borrow().clone()),
        Value::Tuple(items) => Ok(items.as_ref().clone()),
        Value::Dict(entries) => Ok(entries.borrow().iter().map(|(k, _)| k.clone()).collect()),
        Value::Str(s) => Ok(s.chars().map(|c| Value::str(&c.to_string())).collect()),
        other => Err(op_error(
            "TypeError",
            format!("'{}' object is not iterable", other.type_name()),
        )),
    }
}

/// `range(start, stop, step)` as a list.
pub fn range(start: i64, stop: i64, step: i64) -> OpResult {
    if step == 0 {
        return Err(op_error("ValueError", "range() arg 3 must not be zero"));
    }
    let span = if step > 0 {
        (stop as i128 - start as i128 + step as i128 - 1) / step as i128
    } else {
        (start as i128 - stop as i128 - step as i128 - 1) / (-(step as i128))
    };
    let len = span.max(0);
    if len > MAX_SEQUENCE as i128 {
        return Err(op_error("MemoryError", "range too large"));
    }
    let items = (0..len as i64).map(|i| Value::Int(start + i * step)).collect();
    Ok(Value::list(items))
}

pub fn index(container: &Value, idx: &Value) -> OpResult {
    if let Value::Dict(entries) = container {
        hashable(idx)?;
        return dict_lookup(&entries.borrow(), idx).ok_or_else(|| op_error("KeyError", idx.repr()));
    }
    let Value::Int(i) = idx else {
        return Err(op_error(
            "TypeError",
            format!("indices must be integers, not {}", idx.type_name()),
        ));
    };
    let pick = |len: usize| -> Option<usize> {
        let i = if *i < 0 { len as i64 + *i } else { *i };
        (i >= 0 && (i as usize) < len).then_some(i as usize)
    };
    match container {
        Value::List(items) => {
            let items = items.borrow();
            pick(items.len())
                .map(|i| items[i].clone())
                .ok_or_else(|| op_error("IndexError", "list index out of range"))
        }
        Value::Tuple(items) => pick(items.len())
            .map(|i| items[i].clone())
            .ok_or_else(|| op_error("IndexError", "tuple index out of range")),
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            pick(chars.len())
                .map(|i| Value::str(&chars[i].to_string()))
                .ok_or_else(|| op_error("IndexError", "string index out of range"))
        }
        other => Err(op_error(
            "TypeError",
            format!("'{}' object is not subscriptable", other.type_name()),
        )),
    }
}

/// `container[lower:upper:step]` with Python's clamping of out-of-range bounds.
pub fn slice(
    container: &Value,
    lower: Option<i64>,
    upper: Option<i64>,
    step: Option<i64>,
) -> OpResult {
    let step = step.unwrap_or(1);
    if step == 0 {
        return Err(op_error("ValueError", "slice step cannot be zero"));
    }
    let positions = |len: usize| -> Vec<usize> {
        let len = len as i64;
        let bound = |v: Option<i64>, default: i64| match v {
            None => default,
            Some(v) => {
                let v = if v < 0 { v.saturating_add(len) } else { v };
                if step > 0 { v.clamp(0, len) } else { v.clamp(-1, len - 1) }
            }
        };
        let (mut at, stop) = if step > 0 {
            (bound(lower, 0), bound(upper, len))
        } else {
            (bound(lower, len - 1), bound(upper, -1))
        };
        let mut out = Vec::new();
        while (step > 0 && at < stop) || (step < 0 && at > stop) {
            out.push(at as usize);
            match at.checked_add(step) {
                Some(next) => at = next,
                None => break,
            }
        }
        out
    };
    match container {
        Value::List(items) => {
            let items = items.borrow();
            Ok(Value::list(
                positions(items.len()).into_iter().map(|i| items[i].clone()).collect(),
            ))
        }
        Value::Tuple(items) => Ok(Value::tuple(
            positions(items.len()).into_iter().map(|i| items[i].clone()).collect(),
        )),
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            let picked: String = positions(chars.len()).into_iter().map(|i| chars[i]).collect();
            Ok(Value::str(&picked))
        }
        other => Err(op_error(
            "TypeError",
            format!("'{}' object is not subscriptable", other.type_name()),
        )),
    }
}

/// Lists and dicts cannot be dict keys, nor can tuples holding them.
pub fn hashable(key: &Value) -> std::result::Result<(), OpError> {
    match key {
        Value::List(_) | Value::Dict(_) => Err(op_error(
            "TypeError",
            format!("unhashable type: '{}'", key.type_name()),
        )),
        Value::Tuple(items) => items.iter().try_for_each(hashable),
        _ => Ok(()),
    }
}

pub fn dict_lookup(entries: &[(Value, Value)], key: &Value) -> Option<Value> {
    entries
        .iter()
        .find(|(k, _)| py_eq(k, key))
        .map(|(_, v)| v.clone())
}

/// Insert or overwrite; an existing key keeps its position.
pub fn dict_insert(
    entries: &mut Vec<(Value, Value)>,
    key: Value,
    value: Value,
) -> std::result::Result<(), OpError> {
    hashable(&key)?;
    match entries.iter_mut().find(|(k, _)| py_eq(k, &key)) {
        Some(slot) => slot.1 = value,
        None => {
            if entries.len() >= MAX_SEQUENCE {
                return Err(op_error("MemoryError", "dict too large"));
            }
            entries.push((key, value));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::Operator;

    fn int(i: i64) -> Value {
        Value::Int(i)
    }

    #[test]
    fn floor_division_and_modulo_round_toward_negative_infinity() {
        assert_eq!(binary(Operator::FloorDiv, &int(-7), &int(2)).unwrap().repr(), "-4");
        assert_eq!(binary(Operator::Mod, &int(-7), &int(2)).unwrap().repr(), "1");
        assert_eq!(binary(Operator::Mod, &int(7), &int(-2)).unwrap().repr(), "-1");
        assert_eq!(
            binary(Operator::Mod, &Value::Float(-7.5), &int(2)).unwrap().repr(),
            "0.5"
        );
    }

    #[test]
    fn overflow_is_an_error_not_a_wrap() {
        let err = binary(Operator::Mult, &int(i64::MAX), &int(2)).unwrap_err();
        assert_eq!(err.kind, "OverflowError");
        let err = binary(Operator::LShift, &int(1), &int(64)).unwrap_err();
        assert_eq!(err.kind, "OverflowError");
        assert_eq!(binary(Operator::LShift, &int(0), &int(100)).unwrap().repr(), "0");
    }

    #[test]
    fn equality_crosses_numeric_types() {
        assert!(py_eq(&int(1), &Value::Float(1.0)));
        assert!(py_eq(&Value::Bool(true), &int(1)));
        assert!(!py_eq(&Value::str("1"), &int(1)));
        assert!(py_eq(
            &Value::list(vec![int(1), Value::str("a")]),
            &Value::list(vec![Value::Float(1.0), Value::str("a")])
        ));
    }

    #[test]
    fn huge_repeats_are_refused() {
        let err = binary(Operator::Mult, &Value::str("ab"), &int(i64::MAX)).unwrap_err();
        assert_eq!(err.kind, "MemoryError");
    }

    #[test]
    fn concatenation_past_the_sequence_limit_is_refused() {
        let half = Value::str(&"x".repeat(MAX_SEQUENCE / 2 + 1));
        assert_eq!(binary(Operator::Add, &half, &half).unwrap_err().kind, "MemoryError");
        let items = Value::list(vec![Value::None; MAX_SEQUENCE / 2 + 1]);
        assert_eq!(binary(Operator::Add, &items, &items).unwrap_err().kind, "MemoryError");
        let items = Value::tuple(vec![Value::None; MAX_SEQUENCE / 2 + 1]);
        assert_eq!(binary(Operator::Add, &items, &items).unwrap_err().kind, "MemoryError");
        let small = Value::list(vec![int(1)]);
        assert_eq!(binary(Operator::Add, &small, &small).unwrap().repr(), "[1, 1]");
    }

    #[test]
    fn slices_clamp_and_step_backwards() {
        let list = Value::list((0..5).map(int).collect());
        assert_eq!(slice(&list, Some(1), Some(3), None).unwrap().repr(), "[1, 2]");
        assert_eq!(slice(&list, Some(-2), None, None).unwrap().repr(), "[3, 4]");
        assert_eq!(slice(&list, None, Some(100), Some(2)).unwrap().repr(), "[0, 2, 4]");
        assert_eq!(slice(&list, None, None, Some(-1)).unwrap().repr(), "[4, 3, 2, 1, 0]");
        assert_eq!(slice(&Value::str("hello"), Some(1), Some(-1), None).unwrap().repr(), "'ell'");
        assert_eq!(slice(&list, None, None, Some(0)).unwrap_err().kind, "ValueError");
    }

    #[test]
    fn dict_keys_compare_by_value_and_lists_are_unhashable() {
        let mut entries = Vec::new();
        dict_insert(&mut entries, int(1), Value::str("a")).unwrap();
        dict_insert(&mut entries, Value::Float(1.0), Value::str("b")).unwrap();
        assert_eq!(Value::dict(entries.clone()).repr(), "{1: 'b'}");
        let err = dict_insert(&mut entries, Value::list(Vec::new()), Value::None).unwrap_err();
        assert_eq!(err.message, "unhashable type: 'list'");
        let missing = index(&Value::dict(entries), &Value::str("k")).unwrap_err();
        assert_eq!((missing.kind, missing.message.as_str()), ("KeyError", "'k'"));
    }

    #[test]
    fn float_repr_matches_python() {
        assert_eq!(float_repr(2.0), "2.0");
        assert_eq!(float_repr(0.5), "0.5");
        assert_eq!(float_repr(f64::INFINITY), "inf");
    }

    #[test]
    fn negative_index_counts_from_the_end() {
        let list = Value::list(vec![int(1), int(2), int(3)]);
        assert_eq!(index(&list, &int(-1)).unwrap().repr(), "3");
        assert_eq!(index(&list, &int(3)).unwrap_err().kind, "IndexError");
    }
}
