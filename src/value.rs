// File: src/value.rs
//
// Runtime value types for the SandJS engine.
// Defines the tagged Value union, script functions and their closures,
// and host-callable native functions.

use ahash::AHashMap;
use indexmap::IndexMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

static NEXT_CLOSURE_ID: AtomicU64 = AtomicU64::new(1);

/// Signature shared by built-ins and host-supplied functions:
/// (arguments, receiver) -> result. A failure message is wrapped into a
/// runtime error by the VM.
pub type NativeFn = Arc<dyn Fn(&[Value], &Value) -> Result<Value, String> + Send + Sync>;

/// An opaque callable provided by the host or the built-in table
#[derive(Clone)]
pub struct NativeFunction {
    pub name: String,
    pub func: NativeFn,
}

impl NativeFunction {
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&[Value], &Value) -> Result<Value, String> + Send + Sync + 'static,
    {
        Self { name: name.into(), func: Arc::new(func) }
    }

    pub fn call(&self, args: &[Value], receiver: &Value) -> Result<Value, String> {
        (self.func)(args, receiver)
    }

    /// A copy of this function with the receiver baked in, so extracted
    /// methods keep dispatching against the object they came from.
    pub fn bind(&self, receiver: Value) -> NativeFunction {
        let inner = Arc::clone(&self.func);
        NativeFunction {
            name: self.name.clone(),
            func: Arc::new(move |args, _this| inner(args, &receiver)),
        }
    }
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "NativeFunction({})", self.name)
    }
}

/// A regex literal compiled at bytecode-compile time
#[derive(Debug)]
pub struct RegexValue {
    pub pattern: String,
    pub flags: String,
    pub regex: regex::Regex,
}

impl RegexValue {
    pub fn compile(pattern: &str, flags: &str) -> Result<Self, String> {
        let mut builder = regex::RegexBuilder::new(pattern);
        builder.case_insensitive(flags.contains('i'));
        builder.multi_line(flags.contains('m'));
        builder.dot_matches_new_line(flags.contains('s'));
        let regex = builder
            .build()
            .map_err(|e| format!("invalid regex /{}/{}: {}", pattern, flags, e))?;
        Ok(Self { pattern: pattern.to_string(), flags: flags.to_string(), regex })
    }
}

/// The captured environment of a script function
#[derive(Debug, Clone, Default)]
pub struct Closure {
    /// Unique id assigned at capture time; 0 means never captured
    pub id: u64,
    /// Set by capture-on-return: this closure belongs to exactly one
    /// function instance and is never repopulated
    pub independent: bool,
    pub vars: AHashMap<String, Value>,
}

pub fn next_closure_id() -> u64 {
    NEXT_CLOSURE_ID.fetch_add(1, Ordering::Relaxed)
}

/// A script-defined function. The bytecode body lives in the program;
/// the function value carries its entry point and captured environment.
#[derive(Debug)]
pub struct UserFunction {
    pub name: Option<String>,
    pub params: Vec<String>,
    pub entry_pc: usize,
    pub closure: Mutex<Closure>,
}

impl UserFunction {
    pub fn new(name: Option<String>, params: Vec<String>, entry_pc: usize) -> Self {
        Self { name, params, entry_pc, closure: Mutex::new(Closure::default()) }
    }

    pub fn closure_id(&self) -> u64 {
        self.closure.lock().unwrap().id
    }
}

/// A runtime value. The tag determines equality and dispatch.
#[derive(Debug, Clone)]
pub enum Value {
    Undefined,
    Null,
    Bool(bool),
    /// 64-bit float; bitwise operators coerce through 32-bit integers
    Number(f64),
    /// Reference-counted for cheap cloning
    Str(Arc<String>),
    /// Dense ordered sequence, shared by handle
    Array(Arc<Mutex<Vec<Value>>>),
    /// Insertion-ordered string-keyed map, shared by handle
    Object(Arc<Mutex<IndexMap<String, Value>>>),
    /// Compile-time regex literal
    Regex(Arc<RegexValue>),
    Native(NativeFunction),
    Function(Arc<UserFunction>),
}

impl Value {
    pub fn string(s: impl Into<String>) -> Value {
        Value::Str(Arc::new(s.into()))
    }

    pub fn array(items: Vec<Value>) -> Value {
        Value::Array(Arc::new(Mutex::new(items)))
    }

    pub fn object(map: IndexMap<String, Value>) -> Value {
        Value::Object(Arc::new(Mutex::new(map)))
    }

    pub fn empty_object() -> Value {
        Value::Object(Arc::new(Mutex::new(IndexMap::new())))
    }

    pub fn native<F>(name: impl Into<String>, func: F) -> Value
    where
        F: Fn(&[Value], &Value) -> Result<Value, String> + Send + Sync + 'static,
    {
        Value::Native(NativeFunction::new(name, func))
    }

    pub fn type_of(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "object",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::Str(_) => "string",
            Value::Array(_) | Value::Object(_) | Value::Regex(_) => "object",
            Value::Native(_) | Value::Function(_) => "function",
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::Str(s) => !s.is_empty(),
            _ => true,
        }
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null)
    }

    /// Strict equality: same tag, same value; reference values compare
    /// by handle identity.
    pub fn strict_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) => true,
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => Arc::ptr_eq(a, b),
            (Value::Object(a), Value::Object(b)) => Arc::ptr_eq(a, b),
            (Value::Regex(a), Value::Regex(b)) => Arc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => Arc::ptr_eq(a, b),
            (Value::Native(a), Value::Native(b)) => Arc::ptr_eq(&a.func, &b.func),
            _ => false,
        }
    }

    /// Numeric coercion for arithmetic and comparisons
    pub fn to_number(&self) -> f64 {
        match self {
            Value::Undefined => f64::NAN,
            Value::Null => 0.0,
            Value::Bool(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            Value::Number(n) => *n,
            Value::Str(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    0.0
                } else if let Some(hex) = trimmed
                    .strip_prefix("0x")
                    .or_else(|| trimmed.strip_prefix("0X"))
                {
                    i64::from_str_radix(hex, 16).map(|n| n as f64).unwrap_or(f64::NAN)
                } else {
                    trimmed.parse().unwrap_or(f64::NAN)
                }
            }
            _ => f64::NAN,
        }
    }

    /// ToInt32 for the bitwise operators
    pub fn to_int32(&self) -> i32 {
        let n = self.to_number();
        if !n.is_finite() || n == 0.0 {
            return 0;
        }
        let modulus = 4294967296.0; // 2^32
        let mut m = n.trunc() % modulus;
        if m < 0.0 {
            m += modulus;
        }
        if m >= 2147483648.0 {
            (m - modulus) as i32
        } else {
            m as i32
        }
    }

    pub fn to_uint32(&self) -> u32 {
        self.to_int32() as u32
    }

    /// String coercion (the `String(v)` / `+` concatenation form)
    pub fn coerce_string(&self) -> String {
        match self {
            Value::Undefined => "undefined".to_string(),
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => format_number(*n),
            Value::Str(s) => s.as_ref().clone(),
            Value::Array(items) => {
                // try_lock so self-referencing arrays render instead of
                // deadlocking on the re-entrant lock
                let items = match items.try_lock() {
                    Ok(items) => items,
                    Err(_) => return String::new(),
                };
                items
                    .iter()
                    .map(|v| match v {
                        Value::Undefined | Value::Null => String::new(),
                        other => other.coerce_string(),
                    })
                    .collect::<Vec<_>>()
                    .join(",")
            }
            Value::Object(_) => "[object Object]".to_string(),
            Value::Regex(r) => format!("/{}/{}", r.pattern, r.flags),
            Value::Native(f) => format!("function {}() {{ [native code] }}", f.name),
            Value::Function(f) => {
                format!("function {}() {{ ... }}", f.name.as_deref().unwrap_or(""))
            }
        }
    }

    /// Developer-facing rendering (console.log, REPL): strings quoted
    /// inside containers, arrays and objects expanded one level deep.
    pub fn inspect(&self) -> String {
        match self {
            Value::Str(s) => s.as_ref().clone(),
            other => other.inspect_nested(),
        }
    }

    fn inspect_nested(&self) -> String {
        match self {
            Value::Str(s) => format!("\"{}\"", s),
            Value::Array(items) => match items.try_lock() {
                Ok(items) => {
                    let parts: Vec<String> =
                        items.iter().map(|v| v.inspect_nested()).collect();
                    format!("[{}]", parts.join(", "))
                }
                Err(_) => "[circular]".to_string(),
            },
            Value::Object(map) => match map.try_lock() {
                Ok(map) => {
                    let parts: Vec<String> = map
                        .iter()
                        .map(|(k, v)| format!("{}: {}", k, v.inspect_nested()))
                        .collect();
                    format!("{{{}}}", parts.join(", "))
                }
                Err(_) => "[circular]".to_string(),
            },
            other => other.coerce_string(),
        }
    }

    /// One-level copy: arrays and objects get a fresh handle whose
    /// elements share structure with the original; everything else is a
    /// plain clone. This is the copy closure capture performs.
    pub fn shallow_clone(&self) -> Value {
        match self {
            Value::Array(items) => {
                let items = items.lock().unwrap();
                Value::array(items.clone())
            }
            Value::Object(map) => {
                let map = map.lock().unwrap();
                Value::object(map.clone())
            }
            other => other.clone(),
        }
    }
}

/// Structural equality, used by tests and constant-pool handling.
/// Containers compare by contents; functions by identity.
impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Array(a), Value::Array(b)) => {
                if Arc::ptr_eq(a, b) {
                    return true;
                }
                let a = a.lock().unwrap();
                let b = b.lock().unwrap();
                *a == *b
            }
            (Value::Object(a), Value::Object(b)) => {
                if Arc::ptr_eq(a, b) {
                    return true;
                }
                let a = a.lock().unwrap();
                let b = b.lock().unwrap();
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x == y)
            }
            (Value::Regex(a), Value::Regex(b)) => {
                a.pattern == b.pattern && a.flags == b.flags
            }
            _ => self.strict_eq(other),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.coerce_string())
    }
}

/// Number formatting with JavaScript conventions: integral values print
/// without a decimal point, NaN and infinities by name.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity".to_string() } else { "-Infinity".to_string() }
    } else if n == 0.0 {
        "0".to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e21 {
        format!("{:.0}", n)
    } else {
        format!("{}", n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthiness() {
        assert!(!Value::Undefined.is_truthy());
        assert!(!Value::Null.is_truthy());
        assert!(!Value::Number(0.0).is_truthy());
        assert!(!Value::Number(f64::NAN).is_truthy());
        assert!(!Value::string("").is_truthy());
        assert!(Value::string("x").is_truthy());
        assert!(Value::array(vec![]).is_truthy());
    }

    #[test]
    fn strict_equality_is_tag_plus_value() {
        assert!(Value::Number(1.0).strict_eq(&Value::Number(1.0)));
        assert!(!Value::Number(1.0).strict_eq(&Value::string("1")));
        assert!(!Value::Number(f64::NAN).strict_eq(&Value::Number(f64::NAN)));
        assert!(Value::string("ab").strict_eq(&Value::string("ab")));

        let a = Value::array(vec![Value::Number(1.0)]);
        let b = Value::array(vec![Value::Number(1.0)]);
        assert!(!a.strict_eq(&b));
        assert!(a.strict_eq(&a.clone()));
    }

    #[test]
    fn int32_coercion_wraps() {
        assert_eq!(Value::Number(4294967296.0).to_int32(), 0);
        assert_eq!(Value::Number(2147483648.0).to_int32(), -2147483648);
        assert_eq!(Value::Number(-1.5).to_int32(), -1);
        assert_eq!(Value::Number(f64::NAN).to_int32(), 0);
        assert_eq!(Value::string("5").to_int32(), 5);
    }

    #[test]
    fn number_formatting() {
        assert_eq!(format_number(14.0), "14");
        assert_eq!(format_number(-3.0), "-3");
        assert_eq!(format_number(2.5), "2.5");
        assert_eq!(format_number(f64::NAN), "NaN");
        assert_eq!(format_number(f64::INFINITY), "Infinity");
        assert_eq!(format_number(-0.0), "0");
    }

    #[test]
    fn shallow_clone_gives_fresh_handles() {
        let inner = Value::array(vec![Value::Number(1.0)]);
        let outer = Value::array(vec![inner.clone()]);
        let copy = outer.shallow_clone();

        // The outer handle is fresh
        match (&outer, &copy) {
            (Value::Array(a), Value::Array(b)) => assert!(!Arc::ptr_eq(a, b)),
            _ => unreachable!(),
        }
        // But the nested element is shared
        match &copy {
            Value::Array(items) => match &items.lock().unwrap()[0] {
                Value::Array(b) => match &inner {
                    Value::Array(a) => assert!(Arc::ptr_eq(a, b)),
                    _ => unreachable!(),
                },
                _ => unreachable!(),
            },
            _ => unreachable!(),
        }
    }

    #[test]
    fn coerce_string_joins_arrays() {
        let v = Value::array(vec![Value::Number(1.0), Value::Null, Value::string("x")]);
        assert_eq!(v.coerce_string(), "1,,x");
    }
}
