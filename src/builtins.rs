// File: src/builtins.rs
//
// Built-in globals for the SandJS engine and the prototype-fallback
// method tables the VM consults on property access. Built-ins are
// re-seeded on reset; hosts may shadow any of them through the context.

use crate::value::{format_number, NativeFunction, Value};
use indexmap::IndexMap;
use rand::Rng;
use std::sync::{Arc, Mutex};

/// The default global table, in seeding order
pub fn defaults() -> Vec<(String, Value)> {
    let mut globals: Vec<(String, Value)> = Vec::new();

    globals.push(("console".to_string(), console_object()));
    globals.push(("Math".to_string(), math_object()));
    globals.push(("JSON".to_string(), json_object()));

    globals.push(("parseInt".to_string(), Value::native("parseInt", parse_int)));
    globals.push(("parseFloat".to_string(), Value::native("parseFloat", parse_float)));
    globals.push((
        "isNaN".to_string(),
        Value::native("isNaN", |args, _this| {
            Ok(Value::Bool(first(args).to_number().is_nan()))
        }),
    ));
    globals.push((
        "isFinite".to_string(),
        Value::native("isFinite", |args, _this| {
            Ok(Value::Bool(first(args).to_number().is_finite()))
        }),
    ));

    // Constructors double as coercion functions
    globals.push((
        "String".to_string(),
        Value::native("String", |args, _this| {
            Ok(match args.first() {
                Some(v) => Value::string(v.coerce_string()),
                None => Value::string(""),
            })
        }),
    ));
    globals.push((
        "Number".to_string(),
        Value::native("Number", |args, _this| {
            Ok(Value::Number(args.first().map(|v| v.to_number()).unwrap_or(0.0)))
        }),
    ));
    globals.push((
        "Boolean".to_string(),
        Value::native("Boolean", |args, _this| {
            Ok(Value::Bool(first(args).is_truthy()))
        }),
    ));
    globals.push((
        "Object".to_string(),
        Value::native("Object", |args, _this| {
            Ok(match args.first() {
                Some(v @ (Value::Object(_) | Value::Array(_))) => v.clone(),
                _ => Value::empty_object(),
            })
        }),
    ));
    globals.push((
        "Array".to_string(),
        Value::native("Array", |args, _this| {
            Ok(match args {
                [Value::Number(n)] if n.fract() == 0.0 && *n >= 0.0 => {
                    Value::array(vec![Value::Undefined; *n as usize])
                }
                _ => Value::array(args.to_vec()),
            })
        }),
    ));

    globals.push(("undefined".to_string(), Value::Undefined));
    globals.push(("NaN".to_string(), Value::Number(f64::NAN)));
    globals.push(("Infinity".to_string(), Value::Number(f64::INFINITY)));

    // The global receiver `this` resolves against
    globals.push(("this".to_string(), Value::empty_object()));

    // Hidden helpers used by compiled code
    globals.push((
        "__object_keys".to_string(),
        Value::native("__object_keys", |args, _this| {
            Ok(Value::array(enumerate_keys(first(args))))
        }),
    ));
    globals.push((
        "__throw".to_string(),
        Value::native("__throw", |args, _this| {
            Err(format!("uncaught exception: {}", first(args).inspect()))
        }),
    ));

    globals
}

fn first(args: &[Value]) -> &Value {
    args.first().unwrap_or(&Value::Undefined)
}

fn object_of(entries: Vec<(&str, Value)>) -> Value {
    let mut map = IndexMap::new();
    for (k, v) in entries {
        map.insert(k.to_string(), v);
    }
    Value::object(map)
}

fn console_object() -> Value {
    object_of(vec![
        (
            "log",
            Value::native("log", |args, _this| {
                let line: Vec<String> = args.iter().map(|v| v.inspect()).collect();
                println!("{}", line.join(" "));
                Ok(Value::Undefined)
            }),
        ),
        (
            "warn",
            Value::native("warn", |args, _this| {
                let line: Vec<String> = args.iter().map(|v| v.inspect()).collect();
                eprintln!("{}", line.join(" "));
                Ok(Value::Undefined)
            }),
        ),
        (
            "error",
            Value::native("error", |args, _this| {
                let line: Vec<String> = args.iter().map(|v| v.inspect()).collect();
                eprintln!("{}", line.join(" "));
                Ok(Value::Undefined)
            }),
        ),
    ])
}

fn math_object() -> Value {
    fn unary(name: &str, f: fn(f64) -> f64) -> Value {
        Value::native(name, move |args: &[Value], _this: &Value| {
            Ok(Value::Number(f(first(args).to_number())))
        })
    }

    object_of(vec![
        ("PI", Value::Number(std::f64::consts::PI)),
        ("E", Value::Number(std::f64::consts::E)),
        ("abs", unary("abs", f64::abs)),
        ("floor", unary("floor", f64::floor)),
        ("ceil", unary("ceil", f64::ceil)),
        ("round", unary("round", f64::round)),
        ("sqrt", unary("sqrt", f64::sqrt)),
        ("sin", unary("sin", f64::sin)),
        ("cos", unary("cos", f64::cos)),
        ("tan", unary("tan", f64::tan)),
        (
            "pow",
            Value::native("pow", |args, _this| {
                let base = first(args).to_number();
                let exp = args.get(1).map(|v| v.to_number()).unwrap_or(f64::NAN);
                Ok(Value::Number(base.powf(exp)))
            }),
        ),
        (
            "max",
            Value::native("max", |args, _this| {
                let mut best = f64::NEG_INFINITY;
                for arg in args {
                    let n = arg.to_number();
                    if n.is_nan() {
                        return Ok(Value::Number(f64::NAN));
                    }
                    best = best.max(n);
                }
                Ok(Value::Number(best))
            }),
        ),
        (
            "min",
            Value::native("min", |args, _this| {
                let mut best = f64::INFINITY;
                for arg in args {
                    let n = arg.to_number();
                    if n.is_nan() {
                        return Ok(Value::Number(f64::NAN));
                    }
                    best = best.min(n);
                }
                Ok(Value::Number(best))
            }),
        ),
        (
            "random",
            Value::native("random", |_args, _this| {
                Ok(Value::Number(rand::thread_rng().gen::<f64>()))
            }),
        ),
    ])
}

fn json_object() -> Value {
    object_of(vec![
        (
            "parse",
            Value::native("parse", |args, _this| {
                let text = first(args).coerce_string();
                let parsed: serde_json::Value = serde_json::from_str(&text)
                    .map_err(|e| format!("JSON.parse: {}", e))?;
                Ok(from_json(&parsed))
            }),
        ),
        (
            "stringify",
            Value::native("stringify", |args, _this| {
                match to_json(first(args)) {
                    Some(json) => {
                        let pretty = matches!(args.get(2), Some(v) if v.to_number() > 0.0);
                        let text = if pretty {
                            serde_json::to_string_pretty(&json)
                        } else {
                            serde_json::to_string(&json)
                        }
                        .map_err(|e| format!("JSON.stringify: {}", e))?;
                        Ok(Value::string(text))
                    }
                    None => Ok(Value::Undefined),
                }
            }),
        ),
    ])
}

fn to_json(value: &Value) -> Option<serde_json::Value> {
    match value {
        Value::Undefined | Value::Native(_) | Value::Function(_) | Value::Regex(_) => None,
        Value::Null => Some(serde_json::Value::Null),
        Value::Bool(b) => Some(serde_json::Value::Bool(*b)),
        Value::Number(n) => Some(
            serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
        ),
        Value::Str(s) => Some(serde_json::Value::String(s.as_ref().clone())),
        // try_lock drops circular references instead of deadlocking
        Value::Array(items) => {
            let items = items.try_lock().ok()?;
            Some(serde_json::Value::Array(
                items
                    .iter()
                    .map(|v| to_json(v).unwrap_or(serde_json::Value::Null))
                    .collect(),
            ))
        }
        Value::Object(map) => {
            let map = map.try_lock().ok()?;
            let mut out = serde_json::Map::new();
            for (k, v) in map.iter() {
                if let Some(json) = to_json(v) {
                    out.insert(k.clone(), json);
                }
            }
            Some(serde_json::Value::Object(out))
        }
    }
}

fn from_json(json: &serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
        serde_json::Value::String(s) => Value::string(s.clone()),
        serde_json::Value::Array(items) => {
            Value::array(items.iter().map(from_json).collect())
        }
        serde_json::Value::Object(map) => {
            let mut out = IndexMap::new();
            for (k, v) in map {
                out.insert(k.clone(), from_json(v));
            }
            Value::object(out)
        }
    }
}

fn parse_int(args: &[Value], _this: &Value) -> Result<Value, String> {
    let text = first(args).coerce_string();
    let mut s = text.trim();
    let mut radix = args.get(1).map(|v| v.to_number()).unwrap_or(0.0) as u32;

    let mut sign = 1.0;
    if let Some(rest) = s.strip_prefix('-') {
        sign = -1.0;
        s = rest;
    } else if let Some(rest) = s.strip_prefix('+') {
        s = rest;
    }

    if radix == 0 {
        if s.starts_with("0x") || s.starts_with("0X") {
            radix = 16;
            s = &s[2..];
        } else {
            radix = 10;
        }
    } else if radix == 16 && (s.starts_with("0x") || s.starts_with("0X")) {
        s = &s[2..];
    }
    if !(2..=36).contains(&radix) {
        return Ok(Value::Number(f64::NAN));
    }

    let digits: String = s.chars().take_while(|c| c.is_digit(radix)).collect();
    if digits.is_empty() {
        return Ok(Value::Number(f64::NAN));
    }
    let mut n = 0.0f64;
    for c in digits.chars() {
        n = n * radix as f64 + c.to_digit(radix).unwrap() as f64;
    }
    Ok(Value::Number(sign * n))
}

fn parse_float(args: &[Value], _this: &Value) -> Result<Value, String> {
    let text = first(args).coerce_string();
    let s = text.trim();

    // Longest numeric prefix
    let mut end = 0;
    let bytes = s.as_bytes();
    let mut seen_dot = false;
    let mut seen_exp = false;
    let mut i = 0;
    if i < bytes.len() && (bytes[i] == b'-' || bytes[i] == b'+') {
        i += 1;
    }
    while i < bytes.len() {
        match bytes[i] {
            b'0'..=b'9' => {
                end = i + 1;
            }
            b'.' if !seen_dot && !seen_exp => {
                seen_dot = true;
            }
            b'e' | b'E' if !seen_exp && end > 0 => {
                seen_exp = true;
                if i + 1 < bytes.len() && (bytes[i + 1] == b'-' || bytes[i + 1] == b'+') {
                    i += 1;
                }
            }
            _ => break,
        }
        i += 1;
    }
    if end == 0 {
        return Ok(Value::Number(f64::NAN));
    }
    Ok(Value::Number(s[..end].parse().unwrap_or(f64::NAN)))
}

/// Keys enumerated by for-in: object keys, array and string indices
fn enumerate_keys(value: &Value) -> Vec<Value> {
    match value {
        Value::Object(map) => {
            map.lock().unwrap().keys().map(|k| Value::string(k.clone())).collect()
        }
        Value::Array(items) => {
            let len = items.lock().unwrap().len();
            (0..len).map(|i| Value::string(i.to_string())).collect()
        }
        Value::Str(s) => {
            (0..s.chars().count()).map(|i| Value::string(i.to_string())).collect()
        }
        _ => Vec::new(),
    }
}

// === Property access with prototype fallback ===

/// GET_PROP / GET_ELEM: own properties first, then the per-tag method
/// tables. Resolved functions are bound to the receiver. Misses yield
/// undefined; nullish receivers are an error.
pub fn get_property(receiver: &Value, key: &Value) -> Result<Value, String> {
    if receiver.is_nullish() {
        return Err(format!(
            "cannot read property '{}' of {}",
            key.coerce_string(),
            receiver.coerce_string()
        ));
    }
    let name = key.coerce_string();

    match receiver {
        Value::Object(map) => {
            if let Some(v) = map.lock().unwrap().get(&name) {
                return Ok(v.clone());
            }
            Ok(bind(object_method(&name), receiver))
        }
        Value::Array(items) => {
            if name == "length" {
                return Ok(Value::Number(items.lock().unwrap().len() as f64));
            }
            if let Some(idx) = array_index(key) {
                let items = items.lock().unwrap();
                return Ok(items.get(idx).cloned().unwrap_or(Value::Undefined));
            }
            Ok(bind(array_method(&name), receiver))
        }
        Value::Str(s) => {
            if name == "length" {
                return Ok(Value::Number(s.chars().count() as f64));
            }
            if let Some(idx) = array_index(key) {
                return Ok(s
                    .chars()
                    .nth(idx)
                    .map(|c| Value::string(c.to_string()))
                    .unwrap_or(Value::Undefined));
            }
            Ok(bind(string_method(&name), receiver))
        }
        Value::Number(_) | Value::Bool(_) => Ok(bind(number_method(&name), receiver)),
        Value::Regex(r) => match name.as_str() {
            "source" => Ok(Value::string(r.pattern.clone())),
            "flags" => Ok(Value::string(r.flags.clone())),
            _ => Ok(bind(regex_method(&name), receiver)),
        },
        Value::Native(f) => match name.as_str() {
            "name" => Ok(Value::string(f.name.clone())),
            _ => Ok(static_property(&f.name, &name)),
        },
        Value::Function(f) => match name.as_str() {
            "name" => Ok(Value::string(f.name.clone().unwrap_or_default())),
            "length" => Ok(Value::Number(f.params.len() as f64)),
            _ => Ok(Value::Undefined),
        },
        Value::Undefined | Value::Null => unreachable!("nullish handled above"),
    }
}

/// SET_PROP / SET_ELEM: objects take any key; arrays take indices (with
/// array-grow on out-of-range) and `length`; everything else fails.
pub fn set_property(receiver: &Value, key: &Value, value: Value) -> Result<(), String> {
    let name = key.coerce_string();
    match receiver {
        Value::Object(map) => {
            map.lock().unwrap().insert(name, value);
            Ok(())
        }
        Value::Array(items) => {
            if name == "length" {
                let n = value.to_number();
                if !n.is_finite() || n < 0.0 || n.fract() != 0.0 {
                    return Err(format!("invalid array length {}", value.coerce_string()));
                }
                items.lock().unwrap().resize(n as usize, Value::Undefined);
                return Ok(());
            }
            match array_index(key) {
                Some(idx) => {
                    let mut items = items.lock().unwrap();
                    if idx >= items.len() {
                        items.resize(idx + 1, Value::Undefined);
                    }
                    items[idx] = value;
                    Ok(())
                }
                None => Err(format!("invalid array index '{}'", name)),
            }
        }
        other => Err(format!(
            "cannot set property '{}' on {}",
            name,
            other.type_of()
        )),
    }
}

fn bind(method: Option<NativeFunction>, receiver: &Value) -> Value {
    match method {
        Some(f) => Value::Native(f.bind(receiver.clone())),
        None => Value::Undefined,
    }
}

fn array_index(key: &Value) -> Option<usize> {
    match key {
        Value::Number(n) if n.fract() == 0.0 && *n >= 0.0 => Some(*n as usize),
        Value::Str(s) => {
            let s = s.trim();
            if !s.is_empty() && s.chars().all(|c| c.is_ascii_digit()) {
                s.parse().ok()
            } else {
                None
            }
        }
        _ => None,
    }
}

// === Per-tag method tables ===

fn string_method(name: &str) -> Option<NativeFunction> {
    let f = match name {
        "charAt" => NativeFunction::new("charAt", |args, this| {
            let i = first(args).to_number();
            let s = this.coerce_string();
            Ok(if i.fract() == 0.0 && i >= 0.0 {
                s.chars()
                    .nth(i as usize)
                    .map(|c| Value::string(c.to_string()))
                    .unwrap_or_else(|| Value::string(""))
            } else {
                Value::string("")
            })
        }),
        "charCodeAt" => NativeFunction::new("charCodeAt", |args, this| {
            let i = first(args).to_number().max(0.0) as usize;
            let s = this.coerce_string();
            Ok(s.chars()
                .nth(i)
                .map(|c| Value::Number(c as u32 as f64))
                .unwrap_or(Value::Number(f64::NAN)))
        }),
        "indexOf" => NativeFunction::new("indexOf", |args, this| {
            let needle = first(args).coerce_string();
            let s = this.coerce_string();
            Ok(Value::Number(match s.find(&needle) {
                Some(byte_idx) => s[..byte_idx].chars().count() as f64,
                None => -1.0,
            }))
        }),
        "lastIndexOf" => NativeFunction::new("lastIndexOf", |args, this| {
            let needle = first(args).coerce_string();
            let s = this.coerce_string();
            Ok(Value::Number(match s.rfind(&needle) {
                Some(byte_idx) => s[..byte_idx].chars().count() as f64,
                None => -1.0,
            }))
        }),
        "slice" => NativeFunction::new("slice", |args, this| {
            let s: Vec<char> = this.coerce_string().chars().collect();
            let len = s.len() as f64;
            let start = clamp_index(args.first().map(|v| v.to_number()).unwrap_or(0.0), len);
            let end = clamp_index(args.get(1).map(|v| v.to_number()).unwrap_or(len), len);
            if start >= end {
                return Ok(Value::string(""));
            }
            Ok(Value::string(s[start..end].iter().collect::<String>()))
        }),
        "substring" => NativeFunction::new("substring", |args, this| {
            let s: Vec<char> = this.coerce_string().chars().collect();
            let len = s.len() as f64;
            let a = args.first().map(|v| v.to_number()).unwrap_or(0.0).clamp(0.0, len) as usize;
            let b = args.get(1).map(|v| v.to_number()).unwrap_or(len).clamp(0.0, len) as usize;
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            Ok(Value::string(s[lo..hi].iter().collect::<String>()))
        }),
        "toUpperCase" => NativeFunction::new("toUpperCase", |_args, this| {
            Ok(Value::string(this.coerce_string().to_uppercase()))
        }),
        "toLowerCase" => NativeFunction::new("toLowerCase", |_args, this| {
            Ok(Value::string(this.coerce_string().to_lowercase()))
        }),
        "split" => NativeFunction::new("split", |args, this| {
            let s = this.coerce_string();
            Ok(match args.first() {
                None | Some(Value::Undefined) => Value::array(vec![Value::string(s)]),
                Some(sep) => {
                    let sep = sep.coerce_string();
                    if sep.is_empty() {
                        Value::array(
                            s.chars().map(|c| Value::string(c.to_string())).collect(),
                        )
                    } else {
                        Value::array(
                            s.split(&sep).map(|p| Value::string(p.to_string())).collect(),
                        )
                    }
                }
            })
        }),
        "trim" => NativeFunction::new("trim", |_args, this| {
            Ok(Value::string(this.coerce_string().trim().to_string()))
        }),
        "replace" => NativeFunction::new("replace", |args, this| {
            let s = this.coerce_string();
            let replacement = args.get(1).map(|v| v.coerce_string()).unwrap_or_default();
            Ok(Value::string(match args.first() {
                Some(Value::Regex(r)) => {
                    if r.flags.contains('g') {
                        r.regex.replace_all(&s, replacement.as_str()).into_owned()
                    } else {
                        r.regex.replace(&s, replacement.as_str()).into_owned()
                    }
                }
                Some(pat) => s.replacen(&pat.coerce_string(), &replacement, 1),
                None => s,
            }))
        }),
        "concat" => NativeFunction::new("concat", |args, this| {
            let mut s = this.coerce_string();
            for arg in args {
                s.push_str(&arg.coerce_string());
            }
            Ok(Value::string(s))
        }),
        "repeat" => NativeFunction::new("repeat", |args, this| {
            let n = first(args).to_number();
            if !n.is_finite() || n < 0.0 {
                return Err("repeat count must be non-negative".to_string());
            }
            Ok(Value::string(this.coerce_string().repeat(n as usize)))
        }),
        "includes" => NativeFunction::new("includes", |args, this| {
            let needle = first(args).coerce_string();
            Ok(Value::Bool(this.coerce_string().contains(&needle)))
        }),
        "toString" => NativeFunction::new("toString", |_args, this| {
            Ok(Value::string(this.coerce_string()))
        }),
        _ => return None,
    };
    Some(f)
}

fn clamp_index(n: f64, len: f64) -> usize {
    let idx = if n < 0.0 { len + n } else { n };
    idx.clamp(0.0, len) as usize
}

fn array_method(name: &str) -> Option<NativeFunction> {
    fn with_items<R>(
        this: &Value,
        f: impl FnOnce(&Arc<Mutex<Vec<Value>>>) -> R,
    ) -> Result<R, String> {
        match this {
            Value::Array(items) => Ok(f(items)),
            other => Err(format!("{} is not an array", other.coerce_string())),
        }
    }

    let f = match name {
        "push" => NativeFunction::new("push", |args: &[Value], this: &Value| {
            with_items(this, |items| {
                let mut items = items.lock().unwrap();
                items.extend(args.iter().cloned());
                Value::Number(items.len() as f64)
            })
        }),
        "pop" => NativeFunction::new("pop", |_args: &[Value], this: &Value| {
            with_items(this, |items| {
                items.lock().unwrap().pop().unwrap_or(Value::Undefined)
            })
        }),
        "shift" => NativeFunction::new("shift", |_args: &[Value], this: &Value| {
            with_items(this, |items| {
                let mut items = items.lock().unwrap();
                if items.is_empty() {
                    Value::Undefined
                } else {
                    items.remove(0)
                }
            })
        }),
        "unshift" => NativeFunction::new("unshift", |args: &[Value], this: &Value| {
            with_items(this, |items| {
                let mut items = items.lock().unwrap();
                for (i, arg) in args.iter().enumerate() {
                    items.insert(i, arg.clone());
                }
                Value::Number(items.len() as f64)
            })
        }),
        "slice" => NativeFunction::new("slice", |args: &[Value], this: &Value| {
            with_items(this, |items| {
                let items = items.lock().unwrap();
                let len = items.len() as f64;
                let start = clamp_index(args.first().map(|v| v.to_number()).unwrap_or(0.0), len);
                let end = clamp_index(args.get(1).map(|v| v.to_number()).unwrap_or(len), len);
                if start >= end {
                    Value::array(Vec::new())
                } else {
                    Value::array(items[start..end].to_vec())
                }
            })
        }),
        "indexOf" => NativeFunction::new("indexOf", |args: &[Value], this: &Value| {
            with_items(this, |items| {
                let needle = first(args);
                let items = items.lock().unwrap();
                Value::Number(
                    items
                        .iter()
                        .position(|v| v.strict_eq(needle))
                        .map(|i| i as f64)
                        .unwrap_or(-1.0),
                )
            })
        }),
        "includes" => NativeFunction::new("includes", |args: &[Value], this: &Value| {
            with_items(this, |items| {
                let needle = first(args);
                Value::Bool(items.lock().unwrap().iter().any(|v| v.strict_eq(needle)))
            })
        }),
        "join" => NativeFunction::new("join", |args: &[Value], this: &Value| {
            with_items(this, |items| {
                let sep = args.first().map(|v| v.coerce_string()).unwrap_or_else(|| ",".into());
                let items = items.lock().unwrap();
                let parts: Vec<String> = items
                    .iter()
                    .map(|v| match v {
                        Value::Undefined | Value::Null => String::new(),
                        other => other.coerce_string(),
                    })
                    .collect();
                Value::string(parts.join(&sep))
            })
        }),
        "concat" => NativeFunction::new("concat", |args: &[Value], this: &Value| {
            with_items(this, |items| {
                let mut out = items.lock().unwrap().clone();
                for arg in args {
                    match arg {
                        Value::Array(more) => out.extend(more.lock().unwrap().iter().cloned()),
                        other => out.push(other.clone()),
                    }
                }
                Value::array(out)
            })
        }),
        "reverse" => NativeFunction::new("reverse", |_args: &[Value], this: &Value| {
            let this = this.clone();
            with_items(&this, |items| {
                items.lock().unwrap().reverse();
            })?;
            Ok(this)
        }),
        "toString" => NativeFunction::new("toString", |_args: &[Value], this: &Value| {
            Ok(Value::string(this.coerce_string()))
        }),
        _ => return None,
    };
    Some(f)
}

fn number_method(name: &str) -> Option<NativeFunction> {
    let f = match name {
        "toFixed" => NativeFunction::new("toFixed", |args: &[Value], this: &Value| {
            let digits = first(args).to_number().clamp(0.0, 100.0) as usize;
            Ok(Value::string(format!("{:.*}", digits, this.to_number())))
        }),
        "toString" => NativeFunction::new("toString", |args: &[Value], this: &Value| {
            let n = this.to_number();
            Ok(Value::string(match args.first() {
                Some(radix) => {
                    let radix = radix.to_number() as u32;
                    if !(2..=36).contains(&radix) {
                        return Err(format!("invalid radix {}", radix));
                    }
                    if radix == 10 {
                        format_number(n)
                    } else {
                        format_radix(n, radix)
                    }
                }
                None => format_number(n),
            }))
        }),
        _ => return None,
    };
    Some(f)
}

fn format_radix(n: f64, radix: u32) -> String {
    if !n.is_finite() {
        return format_number(n);
    }
    let negative = n < 0.0;
    let mut i = n.abs().trunc() as u64;
    let mut digits = Vec::new();
    loop {
        let d = (i % radix as u64) as u32;
        digits.push(std::char::from_digit(d, radix).unwrap());
        i /= radix as u64;
        if i == 0 {
            break;
        }
    }
    if negative {
        digits.push('-');
    }
    digits.iter().rev().collect()
}

fn object_method(name: &str) -> Option<NativeFunction> {
    let f = match name {
        "hasOwnProperty" => {
            NativeFunction::new("hasOwnProperty", |args: &[Value], this: &Value| {
                let key = first(args).coerce_string();
                Ok(Value::Bool(match this {
                    Value::Object(map) => map.lock().unwrap().contains_key(&key),
                    _ => false,
                }))
            })
        }
        "toString" => NativeFunction::new("toString", |_args: &[Value], this: &Value| {
            Ok(Value::string(this.coerce_string()))
        }),
        _ => return None,
    };
    Some(f)
}

fn regex_method(name: &str) -> Option<NativeFunction> {
    let f = match name {
        "test" => NativeFunction::new("test", |args: &[Value], this: &Value| {
            let text = first(args).coerce_string();
            Ok(Value::Bool(match this {
                Value::Regex(r) => r.regex.is_match(&text),
                _ => false,
            }))
        }),
        "exec" => NativeFunction::new("exec", |args: &[Value], this: &Value| {
            let text = first(args).coerce_string();
            let r = match this {
                Value::Regex(r) => r,
                _ => return Ok(Value::Null),
            };
            Ok(match r.regex.captures(&text) {
                Some(caps) => Value::array(
                    caps.iter()
                        .map(|m| match m {
                            Some(m) => Value::string(m.as_str().to_string()),
                            None => Value::Undefined,
                        })
                        .collect(),
                ),
                None => Value::Null,
            })
        }),
        _ => return None,
    };
    Some(f)
}

/// Static properties on the well-known constructor natives
fn static_property(owner: &str, key: &str) -> Value {
    match (owner, key) {
        ("Object", "keys") => Value::native("keys", |args, _this| {
            Ok(Value::array(enumerate_keys(first(args))))
        }),
        ("Object", "values") => Value::native("values", |args, _this| {
            Ok(match first(args) {
                Value::Object(map) => {
                    Value::array(map.lock().unwrap().values().cloned().collect())
                }
                Value::Array(items) => Value::array(items.lock().unwrap().clone()),
                _ => Value::array(Vec::new()),
            })
        }),
        ("Array", "isArray") => Value::native("isArray", |args, _this| {
            Ok(Value::Bool(matches!(first(args), Value::Array(_))))
        }),
        ("String", "fromCharCode") => Value::native("fromCharCode", |args, _this| {
            let s: String = args
                .iter()
                .filter_map(|v| char::from_u32(v.to_uint32()))
                .collect();
            Ok(Value::string(s))
        }),
        ("Number", "isInteger") => Value::native("isInteger", |args, _this| {
            Ok(Value::Bool(match first(args) {
                Value::Number(n) => n.is_finite() && n.fract() == 0.0,
                _ => false,
            }))
        }),
        _ => Value::Undefined,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_the_required_names() {
        let names: Vec<String> = defaults().into_iter().map(|(n, _)| n).collect();
        for required in [
            "console", "Math", "JSON", "parseInt", "parseFloat", "isNaN", "isFinite",
            "String", "Number", "Boolean", "Object", "Array", "undefined", "NaN",
            "Infinity", "this",
        ] {
            assert!(names.iter().any(|n| n == required), "missing builtin {}", required);
        }
    }

    #[test]
    fn parse_int_radix_handling() {
        let n = |args: &[Value]| match parse_int(args, &Value::Undefined).unwrap() {
            Value::Number(n) => n,
            _ => unreachable!(),
        };
        assert_eq!(n(&[Value::string("42")]), 42.0);
        assert_eq!(n(&[Value::string("0xff")]), 255.0);
        assert_eq!(n(&[Value::string("ff"), Value::Number(16.0)]), 255.0);
        assert_eq!(n(&[Value::string("-12px")]), -12.0);
        assert!(n(&[Value::string("zz")]).is_nan());
    }

    #[test]
    fn string_prototype_fallback() {
        let s = Value::string("abc");
        let len = get_property(&s, &Value::string("length")).unwrap();
        assert_eq!(len, Value::Number(3.0));

        let upper = get_property(&s, &Value::string("toUpperCase")).unwrap();
        match upper {
            Value::Native(f) => {
                assert_eq!(f.call(&[], &Value::Undefined).unwrap(), Value::string("ABC"));
            }
            other => panic!("expected bound method, got {:?}", other),
        }
    }

    #[test]
    fn array_grow_on_out_of_range_set() {
        let arr = Value::array(vec![Value::Number(1.0)]);
        set_property(&arr, &Value::Number(3.0), Value::Number(9.0)).unwrap();
        match &arr {
            Value::Array(items) => {
                let items = items.lock().unwrap();
                assert_eq!(items.len(), 4);
                assert_eq!(items[3], Value::Number(9.0));
                assert_eq!(items[1], Value::Undefined);
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn set_on_non_container_fails() {
        let err = set_property(&Value::Number(1.0), &Value::string("x"), Value::Null);
        assert!(err.is_err());
    }

    #[test]
    fn json_round_trip_preserves_key_order() {
        let parse = get_property(&json_object(), &Value::string("parse")).unwrap();
        let stringify = get_property(&json_object(), &Value::string("stringify")).unwrap();
        let (parse, stringify) = match (parse, stringify) {
            (Value::Native(p), Value::Native(s)) => (p, s),
            _ => unreachable!(),
        };
        let text = r#"{"z":1,"a":[true,null,"x"]}"#;
        let value = parse.call(&[Value::string(text)], &Value::Undefined).unwrap();
        let back = stringify.call(&[value], &Value::Undefined).unwrap();
        assert_eq!(back, Value::string(text));
    }
}
