//! Runtime values of the routine language.
//!
//! RULE: Values never leave the worker thread that created them.
//! Parameters enter and results leave as `serde_json::Value`.

use super::{ast::FunctionDecl, builtins::Builtin, interpreter::Scope};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

pub type ArrayRef = Rc<RefCell<Vec<Value>>>;
pub type ObjectRef = Rc<RefCell<BTreeMap<String, Value>>>;

pub struct Closure {
    pub decl: Rc<FunctionDecl>,
    pub env:  Rc<Scope>,
}

#[derive(Clone)]
pub enum Value {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    Str(Rc<str>),
    Array(ArrayRef),
    Object(ObjectRef),
    Function(Rc<Closure>),
    Builtin(Builtin),
}

impl Value {
    pub fn array(items: Vec<Value>) -> Self {
        Value::Array(Rc::new(RefCell::new(items)))
    }

    pub fn object(fields: BTreeMap<String, Value>) -> Self {
        Value::Object(Rc::new(RefCell::new(fields)))
    }

    pub fn str(s: &str) -> Self {
        Value::Str(Rc::from(s))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::Str(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
            Value::Function(_) | Value::Builtin(_) => "function",
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::Str(s) => !s.is_empty(),
            _ => true,
        }
    }

    /// `===` semantics: primitives by value, containers by identity.
    pub fn strict_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => Rc::ptr_eq(a, b),
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Builtin(a), Value::Builtin(b)) => a == b,
            _ => false,
        }
    }

    /// `==` semantics: as `===`, except `null == undefined`.
    pub fn loose_equals(&self, other: &Value) -> bool {
        matches!(
            (self, other),
            (Value::Null | Value::Undefined, Value::Null | Value::Undefined)
        ) || self.strict_equals(other)
    }
}

/// Short form for messages. Arrays print only their length; the
/// interpreter's `stringify` gives the full conversion.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "undefined"),
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) => write!(f, "{}", format_number(*n)),
            Value::Str(s) => write!(f, "{s}"),
            Value::Array(items) => write!(f, "[array of {}]", items.borrow().len()),
            Value::Object(_) => write!(f, "[object Object]"),
            Value::Function(closure) => match &closure.decl.name {
                Some(name) => write!(f, "function {name}"),
                None => write!(f, "function"),
            },
            Value::Builtin(b) => write!(f, "function {}", b.name()),
        }
    }
}

/// Render a number the way the routine language prints it: integral
/// values without a fractional part.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n == f64::INFINITY {
        "Infinity".to_string()
    } else if n == f64::NEG_INFINITY {
        "-Infinity".to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

/// Deepest container nesting a result may have; also stops cycles.
const MAX_RESULT_DEPTH: usize = 64;

/// Most values a result may hold once shared containers are expanded.
const MAX_RESULT_NODES: usize = 1_000_000;

/// Convert a routine value into JSON. Undefined object fields are
/// dropped; undefined elsewhere, functions, and non-finite numbers are
/// rejected with the path of the offending value.
pub fn to_json(value: &Value, path: &str) -> Result<serde_json::Value, String> {
    let mut nodes = 0;
    to_json_at(value, path, 0, &mut nodes)
}

fn to_json_at(
    value: &Value,
    path: &str,
    depth: usize,
    nodes: &mut usize,
) -> Result<serde_json::Value, String> {
    use serde_json::Value as Json;

    if depth > MAX_RESULT_DEPTH {
        return Err(format!("{path} is nested too deeply (or refers to itself)"));
    }
    *nodes += 1;
    if *nodes > MAX_RESULT_NODES {
        return Err(format!("result exceeds {MAX_RESULT_NODES} values at {path}"));
    }
    match value {
        Value::Undefined => Err(format!("{path} is undefined")),
        Value::Null => Ok(Json::Null),
        Value::Bool(b) => Ok(Json::Bool(*b)),
        Value::Number(n) => number_to_json(*n)
            .ok_or_else(|| format!("{path} is not a finite number ({})", format_number(*n))),
        Value::Str(s) => Ok(Json::String(s.to_string())),
        Value::Array(items) => {
            let items = items.borrow();
            let mut out = Vec::with_capacity(items.len());
            for (i, item) in items.iter().enumerate() {
                out.push(to_json_at(item, &format!("{path}[{i}]"), depth + 1, nodes)?);
            }
            Ok(Json::Array(out))
        }
        Value::Object(fields) => {
            let fields = fields.borrow();
            let mut out = serde_json::Map::new();
            for (key, field) in fields.iter() {
                if matches!(field, Value::Undefined) {
                    continue;
                }
                out.insert(key.clone(), to_json_at(field, &format!("{path}.{key}"), depth + 1, nodes)?);
            }
            Ok(Json::Object(out))
        }
        Value::Function(_) | Value::Builtin(_) => Err(format!("{path} is a function")),
    }
}

/// Integral values inside the exact-integer range become JSON integers.
fn number_to_json(n: f64) -> Option<serde_json::Value> {
    if !n.is_finite() {
        return None;
    }
    if n.fract() == 0.0 && n.abs() <= 9_007_199_254_740_992.0 {
        return Some(serde_json::Value::from(n as i64));
    }
    serde_json::Number::from_f64(n).map(serde_json::Value::Number)
}
