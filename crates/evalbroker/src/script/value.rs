use std::cell::RefCell;
use std::cmp::Ordering;
use std::mem;
use std::ops::{Deref, DerefMut};
use std::rc::Rc;

use crate::cancel::CancelToken;
use crate::unit::Binding;

use super::ast::FunctionDef;
use super::interp::{recursion_error, Flow, Interp};

/// Nesting depth at which conversion and rendering give up.
const MAX_DEPTH: usize = 128;

/// Nesting depth at which `==` and `<` raise `RecursionError`.
const MAX_COMPARE_DEPTH: usize = 1000;

pub(crate) type Kwargs = Vec<(String, Value)>;

pub(crate) type BuiltinFn = fn(&mut Interp, Vec<Value>, Kwargs) -> Flow<Value>;

#[derive(Clone, Copy)]
pub(crate) struct Builtin {
    pub name: &'static str,
    pub func: BuiltinFn,
}

#[derive(Debug)]
pub(crate) struct Function {
    pub def: Rc<FunctionDef>,
    pub defaults: Vec<Value>,
}

impl Drop for Function {
    fn drop(&mut self) {
        release(mem::take(&mut self.defaults));
    }
}

#[derive(Debug)]
pub(crate) struct Exception {
    pub kind: &'static str,
    pub args: Vec<Value>,
}

impl Exception {
    pub fn new(kind: &'static str, args: Vec<Value>) -> Self {
        Self { kind, args }
    }

    /// `str(exc)`
    pub fn message(&self) -> String {
        self.message_at(0)
    }

    fn message_at(&self, depth: usize) -> String {
        if depth > MAX_DEPTH {
            return "...".to_string();
        }
        match self.args.as_slice() {
            [] => String::new(),
            // KeyError renders its key with quotes.
            [key] if self.kind == "KeyError" => key.write_repr(&mut Vec::new(), depth + 1),
            [single] => single.str_at(depth + 1),
            many => tuple_repr(many, &mut Vec::new(), depth + 1),
        }
    }

    pub fn arg_reprs(&self) -> Vec<String> {
        self.args.iter().map(Value::repr).collect()
    }
}

impl Drop for Exception {
    fn drop(&mut self) {
        release(mem::take(&mut self.args));
    }
}

/// Elements of a list or tuple.
///
/// Dropping the last reference to a deeply nested structure would recurse
/// once per level, so nested containers are released from a work list.
pub(crate) struct Items(Vec<Value>);

/// Key/value pairs of a dict, in insertion order.
pub(crate) struct Entries(Vec<(Value, Value)>);

impl From<Vec<Value>> for Items {
    fn from(items: Vec<Value>) -> Self {
        Items(items)
    }
}

impl Deref for Items {
    type Target = Vec<Value>;

    fn deref(&self) -> &Vec<Value> {
        &self.0
    }
}

impl DerefMut for Items {
    fn deref_mut(&mut self) -> &mut Vec<Value> {
        &mut self.0
    }
}

impl Deref for Entries {
    type Target = Vec<(Value, Value)>;

    fn deref(&self) -> &Vec<(Value, Value)> {
        &self.0
    }
}

impl DerefMut for Entries {
    fn deref_mut(&mut self) -> &mut Vec<(Value, Value)> {
        &mut self.0
    }
}

impl Drop for Items {
    fn drop(&mut self) {
        release(mem::take(&mut self.0));
    }
}

impl Drop for Entries {
    fn drop(&mut self) {
        let pairs = mem::take(&mut self.0);
        release(pairs.into_iter().flat_map(|(key, value)| [key, value]).collect());
    }
}

/// Drops `pending` without recursing: containers owned only by the work list
/// hand their elements over before they are freed.
fn release(mut pending: Vec<Value>) {
    while let Some(mut value) = pending.pop() {
        value.detach_children(&mut pending);
    }
}

pub(crate) type List = Rc<RefCell<Items>>;
pub(crate) type Dict = Rc<RefCell<Entries>>;

#[derive(Clone)]
pub(crate) enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    List(List),
    Tuple(Rc<Items>),
    Dict(Dict),
    Range { start: i64, stop: i64, step: i64 },
    Function(Rc<Function>),
    Builtin(Builtin),
    /// A method bound to its receiver.
    Method(Rc<Value>, &'static str),
    ExcType(&'static str),
    Exception(Rc<Exception>),
    Module(&'static str),
    Cancel(CancelToken),
}

impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.repr())
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(Rc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(Rc::from(s.as_str()))
    }
}

/// Names of builtins that act as types for `isinstance` and `repr`.
pub(crate) const TYPE_NAMES: &[&str] = &["bool", "int", "float", "str", "list", "tuple", "dict"];

#[derive(Debug)]
pub(crate) enum Comparison {
    Ordered(Ordering),
    /// Orderable types that are not comparable, e.g. NaN.
    Unordered,
    Unsupported,
}

enum Num {
    Int(i64),
    Float(f64),
}

impl Value {
    pub fn new_list(items: Vec<Value>) -> Value {
        Value::List(Rc::new(RefCell::new(Items(items))))
    }

    pub fn new_tuple(items: Vec<Value>) -> Value {
        Value::Tuple(Rc::new(Items(items)))
    }

    pub fn new_dict(entries: Vec<(Value, Value)>) -> Value {
        Value::Dict(Rc::new(RefCell::new(Entries(entries))))
    }

    /// Moves the contents of containers referenced only by `self` into `pending`.
    fn detach_children(&mut self, pending: &mut Vec<Value>) {
        match self {
            Value::List(items) => {
                if let Some(cell) = Rc::get_mut(items) {
                    pending.append(&mut cell.get_mut().0);
                }
            }
            Value::Tuple(items) => {
                if let Some(items) = Rc::get_mut(items) {
                    pending.append(&mut items.0);
                }
            }
            Value::Dict(entries) => {
                if let Some(cell) = Rc::get_mut(entries) {
                    for (key, value) in cell.get_mut().0.drain(..) {
                        pending.push(key);
                        pending.push(value);
                    }
                }
            }
            Value::Function(func) => {
                if let Some(func) = Rc::get_mut(func) {
                    pending.append(&mut func.defaults);
                }
            }
            Value::Exception(exc) => {
                if let Some(exc) = Rc::get_mut(exc) {
                    pending.append(&mut exc.args);
                }
            }
            Value::Method(receiver, _) => {
                if let Some(receiver) = Rc::get_mut(receiver) {
                    pending.push(mem::replace(receiver, Value::None));
                }
            }
            _ => {}
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "NoneType",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Tuple(_) => "tuple",
            Value::Dict(_) => "dict",
            Value::Range { .. } => "range",
            Value::Function(_) => "function",
            Value::Builtin(_) => "builtin_function_or_method",
            Value::Method(..) => "method",
            Value::ExcType(_) => "type",
            Value::Exception(exc) => exc.kind,
            Value::Module(_) => "module",
            Value::Cancel(_) => "Synchronized",
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(items) => !items.borrow().is_empty(),
            Value::Tuple(items) => !items.is_empty(),
            Value::Dict(entries) => !entries.borrow().is_empty(),
            Value::Range { .. } => range_len(self) > 0,
            _ => true,
        }
    }

    /// Integer view of ints and bools.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Bool(b) => Some(*b as i64),
            _ => None,
        }
    }

    /// Float view of any number.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            _ => self.as_int().map(|i| i as f64),
        }
    }

    fn as_num(&self) -> Option<Num> {
        match self {
            Value::Float(f) => Some(Num::Float(*f)),
            _ => self.as_int().map(Num::Int),
        }
    }

    pub fn is_hashable(&self) -> bool {
        let mut pending = vec![self];
        while let Some(value) = pending.pop() {
            match value {
                Value::List(_) | Value::Dict(_) => return false,
                Value::Tuple(items) => pending.extend(items.iter()),
                _ => {}
            }
        }
        true
    }

    pub fn repr(&self) -> String {
        self.write_repr(&mut Vec::new(), 0)
    }

    /// `str(value)`
    pub fn str(&self) -> String {
        self.str_at(0)
    }

    fn str_at(&self, depth: usize) -> String {
        match self {
            Value::Str(s) => s.to_string(),
            Value::Exception(exc) => exc.message_at(depth),
            _ => self.write_repr(&mut Vec::new(), depth),
        }
    }

    /// `seen` holds the containers being rendered, for cycle detection.
    fn write_repr(&self, seen: &mut Vec<usize>, depth: usize) -> String {
        if depth > MAX_DEPTH {
            return "...".to_string();
        }
        match self {
            Value::None => "None".to_string(),
            Value::Bool(true) => "True".to_string(),
            Value::Bool(false) => "False".to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => float_repr(*f),
            Value::Str(s) => py_repr_str(s),
            Value::List(items) => {
                let ptr = Rc::as_ptr(items) as *const () as usize;
                if seen.contains(&ptr) {
                    return "[...]".to_string();
                }
                seen.push(ptr);
                let inner: Vec<String> = items
                    .borrow()
                    .iter()
                    .map(|v| v.write_repr(seen, depth + 1))
                    .collect();
                seen.pop();
                format!("[{}]", inner.join(", "))
            }
            Value::Tuple(items) => tuple_repr(items, seen, depth + 1),
            Value::Dict(entries) => {
                let ptr = Rc::as_ptr(entries) as *const () as usize;
                if seen.contains(&ptr) {
                    return "{...}".to_string();
                }
                seen.push(ptr);
                let inner: Vec<String> = entries
                    .borrow()
                    .iter()
                    .map(|(k, v)| {
                        format!(
                            "{}: {}",
                            k.write_repr(seen, depth + 1),
                            v.write_repr(seen, depth + 1)
                        )
                    })
                    .collect();
                seen.pop();
                format!("{{{}}}", inner.join(", "))
            }
            Value::Range { start, stop, step } => {
                if *step == 1 {
                    format!("range({start}, {stop})")
                } else {
                    format!("range({start}, {stop}, {step})")
                }
            }
            Value::Function(func) => format!("<function {}>", func.def.name),
            Value::Builtin(builtin) if TYPE_NAMES.contains(&builtin.name) => {
                format!("<class '{}'>", builtin.name)
            }
            Value::Builtin(builtin) => format!("<built-in function {}>", builtin.name),
            Value::Method(receiver, name) => {
                format!("<built-in method {} of {} object>", name, receiver.type_name())
            }
            Value::ExcType(kind) => format!("<class '{kind}'>"),
            Value::Exception(exc) => {
                let args: Vec<String> = exc
                    .args
                    .iter()
                    .map(|v| v.write_repr(seen, depth + 1))
                    .collect();
                format!("{}({})", exc.kind, args.join(", "))
            }
            Value::Module(name) => format!("<module '{name}' (built-in)>"),
            Value::Cancel(token) => {
                format!("<Synchronized wrapper for c_byte({})>", token.is_cancelled() as u8)
            }
        }
    }

    /// Converts the final value of a global into a namespace entry.
    pub fn to_binding(&self) -> Binding {
        match self {
            Value::Function(_) | Value::Builtin(_) | Value::Method(..) | Value::ExcType(_) => {
                Binding::Callable
            }
            Value::Module(_) => Binding::Module,
            Value::Cancel(_) => Binding::CancelHandle,
            _ => match self.to_json(0) {
                Ok(json) => Binding::Value(json),
                Err(kind) => Binding::Opaque(kind),
            },
        }
    }

    fn to_json(&self, depth: usize) -> Result<serde_json::Value, String> {
        if depth > MAX_DEPTH {
            return Err("deeply nested container".to_string());
        }
        Ok(match self {
            Value::None => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .ok_or_else(|| format!("float {}", float_repr(*f)))?,
            Value::Str(s) => serde_json::Value::String(s.to_string()),
            Value::List(items) => serde_json::Value::Array(
                items
                    .borrow()
                    .iter()
                    .map(|v| v.to_json(depth + 1))
                    .collect::<Result<_, _>>()?,
            ),
            Value::Tuple(items) => serde_json::Value::Array(
                items
                    .iter()
                    .map(|v| v.to_json(depth + 1))
                    .collect::<Result<_, _>>()?,
            ),
            Value::Dict(entries) => {
                let mut map = serde_json::Map::new();
                for (key, value) in entries.borrow().iter() {
                    map.insert(key.json_key()?, value.to_json(depth + 1)?);
                }
                serde_json::Value::Object(map)
            }
            other => return Err(other.type_name().to_string()),
        })
    }

    /// Object keys follow the `json` module: scalars are stringified, anything else is rejected.
    fn json_key(&self) -> Result<String, String> {
        match self {
            Value::Str(s) => Ok(s.to_string()),
            Value::Int(i) => Ok(i.to_string()),
            Value::Bool(b) => Ok(b.to_string()),
            Value::None => Ok("null".to_string()),
            Value::Float(f) if f.is_finite() => Ok(float_repr(*f)),
            other => Err(format!("{} dict key", other.type_name())),
        }
    }
}

fn tuple_repr(items: &[Value], seen: &mut Vec<usize>, depth: usize) -> String {
    let inner: Vec<String> = items.iter().map(|v| v.write_repr(seen, depth)).collect();
    if inner.len() == 1 {
        format!("({},)", inner[0])
    } else {
        format!("({})", inner.join(", "))
    }
}

pub(crate) fn range_len(range: &Value) -> i64 {
    match range {
        Value::Range { start, stop, step } => {
            let (start, stop, step) = (*start as i128, *stop as i128, *step as i128);
            let len = if step > 0 && start < stop {
                (stop - start + step - 1) / step
            } else if step < 0 && start > stop {
                (start - stop - step - 1) / -step
            } else {
                0
            };
            len as i64
        }
        _ => 0,
    }
}

/// Python's `repr` of a string.
pub(crate) fn py_repr_str(s: &str) -> String {
    let quote = if s.contains('\'') && !s.contains('"') {
        '"'
    } else {
        '\''
    };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(quote);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c if (c as u32) < 0x20 || c as u32 == 0x7f => {
                out.push_str(&format!("\\x{:02x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

/// Python's shortest round-trip `repr` of a float.
pub(crate) fn float_repr(f: f64) -> String {
    if f.is_nan() {
        return "nan".to_string();
    }
    if f.is_infinite() {
        return if f > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    if f == 0.0 {
        return if f.is_sign_negative() { "-0.0" } else { "0.0" }.to_string();
    }

    let sci = format!("{f:e}");
    let (mantissa, exponent) = sci.split_once('e').unwrap_or((sci.as_str(), "0"));
    let exponent: i32 = exponent.parse().unwrap_or(0);

    if (-4..16).contains(&exponent) {
        let plain = format!("{f}");
        if plain.contains('.') {
            plain
        } else {
            format!("{plain}.0")
        }
    } else {
        let sign = if exponent < 0 { '-' } else { '+' };
        format!("{}e{}{:02}", mantissa, sign, exponent.abs())
    }
}

/// `a == b`
pub(crate) fn py_eq(a: &Value, b: &Value) -> Flow<bool> {
    eq_at(a, b, 0)
}

fn eq_at(a: &Value, b: &Value, depth: usize) -> Flow<bool> {
    if let (Some(x), Some(y)) = (a.as_num(), b.as_num()) {
        return Ok(match (x, y) {
            (Num::Int(x), Num::Int(y)) => x == y,
            (x, y) => num_to_f64(x) == num_to_f64(y),
        });
    }
    Ok(match (a, b) {
        (Value::None, Value::None) => true,
        (Value::Str(x), Value::Str(y)) => x == y,
        (Value::List(x), Value::List(y)) => {
            Rc::ptr_eq(x, y) || seq_eq(&x.borrow(), &y.borrow(), depth)?
        }
        (Value::Tuple(x), Value::Tuple(y)) => Rc::ptr_eq(x, y) || seq_eq(x, y, depth)?,
        (Value::Dict(x), Value::Dict(y)) => Rc::ptr_eq(x, y) || dict_eq(&x.borrow(), &y.borrow(), depth)?,
        (
            Value::Range { start, stop, step },
            Value::Range {
                start: s2,
                stop: e2,
                step: st2,
            },
        ) => (start, stop, step) == (s2, e2, st2),
        (Value::ExcType(x), Value::ExcType(y)) => x == y,
        (Value::Builtin(x), Value::Builtin(y)) => x.name == y.name,
        (Value::Module(x), Value::Module(y)) => x == y,
        _ => is_same(a, b),
    })
}

fn deeper(depth: usize) -> Flow<usize> {
    if depth >= MAX_COMPARE_DEPTH {
        return Err(recursion_error("maximum recursion depth exceeded in comparison"));
    }
    Ok(depth + 1)
}

fn seq_eq(x: &[Value], y: &[Value], depth: usize) -> Flow<bool> {
    if x.len() != y.len() {
        return Ok(false);
    }
    let depth = deeper(depth)?;
    for (a, b) in x.iter().zip(y) {
        if !eq_at(a, b, depth)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn dict_eq(x: &[(Value, Value)], y: &[(Value, Value)], depth: usize) -> Flow<bool> {
    if x.len() != y.len() {
        return Ok(false);
    }
    let depth = deeper(depth)?;
    for (key, value) in x {
        let mut found = None;
        for (other, other_value) in y {
            if eq_at(key, other, depth)? {
                found = Some(other_value);
                break;
            }
        }
        match found {
            Some(other_value) if eq_at(value, other_value, depth)? => {}
            _ => return Ok(false),
        }
    }
    Ok(true)
}

/// Index of the first element equal to `item`.
pub(crate) fn position_of(items: &[Value], item: &Value) -> Flow<Option<usize>> {
    for (i, candidate) in items.iter().enumerate() {
        if py_eq(candidate, item)? {
            return Ok(Some(i));
        }
    }
    Ok(None)
}

fn num_to_f64(n: Num) -> f64 {
    match n {
        Num::Int(i) => i as f64,
        Num::Float(f) => f,
    }
}

/// `a is b`
pub(crate) fn is_same(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::None, Value::None) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Int(x), Value::Int(y)) => x == y,
        (Value::Float(x), Value::Float(y)) => x.to_bits() == y.to_bits(),
        (Value::Str(x), Value::Str(y)) => Rc::ptr_eq(x, y) || x == y,
        (Value::List(x), Value::List(y)) => Rc::ptr_eq(x, y),
        (Value::Tuple(x), Value::Tuple(y)) => Rc::ptr_eq(x, y),
        (Value::Dict(x), Value::Dict(y)) => Rc::ptr_eq(x, y),
        (Value::Function(x), Value::Function(y)) => Rc::ptr_eq(x, y),
        (Value::Exception(x), Value::Exception(y)) => Rc::ptr_eq(x, y),
        (Value::ExcType(x), Value::ExcType(y)) => x == y,
        (Value::Builtin(x), Value::Builtin(y)) => x.name == y.name,
        (Value::Module(x), Value::Module(y)) => x == y,
        (Value::Cancel(x), Value::Cancel(y)) => x.same_as(y),
        _ => false,
    }
}

/// Ordering for `<`, `sorted`, `min` and `max`.
pub(crate) fn py_cmp(a: &Value, b: &Value) -> Flow<Comparison> {
    cmp_at(a, b, 0)
}

fn cmp_at(a: &Value, b: &Value, depth: usize) -> Flow<Comparison> {
    if let (Some(x), Some(y)) = (a.as_num(), b.as_num()) {
        return Ok(match (x, y) {
            (Num::Int(x), Num::Int(y)) => Comparison::Ordered(x.cmp(&y)),
            (x, y) => match num_to_f64(x).partial_cmp(&num_to_f64(y)) {
                Some(ord) => Comparison::Ordered(ord),
                None => Comparison::Unordered,
            },
        });
    }
    match (a, b) {
        (Value::Str(x), Value::Str(y)) => Ok(Comparison::Ordered(x.cmp(y))),
        (Value::List(x), Value::List(y)) => seq_cmp(&x.borrow(), &y.borrow(), depth),
        (Value::Tuple(x), Value::Tuple(y)) => seq_cmp(x, y, depth),
        _ => Ok(Comparison::Unsupported),
    }
}

fn seq_cmp(x: &[Value], y: &[Value], depth: usize) -> Flow<Comparison> {
    let depth = deeper(depth)?;
    for (a, b) in x.iter().zip(y) {
        if eq_at(a, b, depth)? {
            continue;
        }
        return cmp_at(a, b, depth);
    }
    Ok(Comparison::Ordered(x.len().cmp(&y.len())))
}

#[cfg(test)]
mod tests {
    use super::super::interp::Unwind;
    use super::*;
    use serde_json::json;

    #[test]
    fn test_float_repr() {
        assert_eq!(float_repr(4.0), "4.0");
        assert_eq!(float_repr(0.1), "0.1");
        assert_eq!(float_repr(-2.5), "-2.5");
        assert_eq!(float_repr(1e16), "1e+16");
        assert_eq!(float_repr(1.5e-5), "1.5e-05");
        assert_eq!(float_repr(123456789.125), "123456789.125");
        assert_eq!(float_repr(f64::INFINITY), "inf");
        assert_eq!(float_repr(-0.0), "-0.0");
    }

    #[test]
    fn test_str_repr_quoting() {
        assert_eq!(py_repr_str("x"), "'x'");
        assert_eq!(py_repr_str("it's"), "\"it's\"");
        assert_eq!(py_repr_str("a\nb"), "'a\\nb'");
        assert_eq!(py_repr_str("'\""), "'\\'\"'");
    }

    #[test]
    fn test_container_repr() {
        let list = Value::new_list(vec![Value::Int(1), Value::from("a"), Value::None]);
        assert_eq!(list.repr(), "[1, 'a', None]");
        assert_eq!(Value::new_tuple(vec![Value::Int(1)]).repr(), "(1,)");
        let dict = Value::new_dict(vec![(Value::from("k"), Value::Float(2.0))]);
        assert_eq!(dict.repr(), "{'k': 2.0}");
    }

    #[test]
    fn test_cyclic_list_repr() {
        let list = Value::new_list(vec![Value::Int(1)]);
        if let Value::List(items) = &list {
            items.borrow_mut().push(list.clone());
        }
        assert_eq!(list.repr(), "[1, [...]]");
        assert!(matches!(list.to_binding(), Binding::Opaque(_)));
    }

    #[test]
    fn test_numeric_equality_crosses_types() {
        assert!(py_eq(&Value::Int(1), &Value::Float(1.0)).unwrap());
        assert!(py_eq(&Value::Bool(true), &Value::Int(1)).unwrap());
        assert!(!py_eq(&Value::Int(1), &Value::from("1")).unwrap());
        assert!(!py_eq(&Value::Float(f64::NAN), &Value::Float(f64::NAN)).unwrap());
    }

    #[test]
    fn test_ordering() {
        assert!(matches!(
            py_cmp(&Value::Int(1), &Value::Float(1.5)),
            Ok(Comparison::Ordered(Ordering::Less))
        ));
        assert!(matches!(
            py_cmp(&Value::from("b"), &Value::from("a")),
            Ok(Comparison::Ordered(Ordering::Greater))
        ));
        assert!(matches!(
            py_cmp(&Value::Int(1), &Value::from("a")),
            Ok(Comparison::Unsupported)
        ));
        assert!(matches!(
            py_cmp(&Value::Float(f64::NAN), &Value::Int(1)),
            Ok(Comparison::Unordered)
        ));
    }

    #[test]
    fn test_bindings() {
        let dict = Value::new_dict(vec![
            (Value::Int(1), Value::new_list(vec![Value::Bool(true)])),
            (Value::None, Value::new_tuple(vec![])),
        ]);
        assert_eq!(
            dict.to_binding(),
            Binding::Value(json!({"1": [true], "null": []}))
        );
        assert!(matches!(
            Value::Float(f64::NAN).to_binding(),
            Binding::Opaque(_)
        ));
        assert_eq!(Value::Module("math").to_binding(), Binding::Module);
        assert_eq!(
            Value::Cancel(CancelToken::new()).to_binding(),
            Binding::CancelHandle
        );
    }

    #[test]
    fn test_range_len() {
        let range = |start, stop, step| Value::Range { start, stop, step };
        assert_eq!(range_len(&range(0, 10, 1)), 10);
        assert_eq!(range_len(&range(0, 10, 3)), 4);
        assert_eq!(range_len(&range(10, 0, -2)), 5);
        assert_eq!(range_len(&range(5, 5, 1)), 0);
    }

    #[test]
    fn test_exception_message() {
        let exc = Exception::new("ValueError", vec![Value::from("x")]);
        assert_eq!(exc.message(), "x");
        assert_eq!(exc.arg_reprs(), vec!["'x'".to_string()]);
        let exc = Exception::new("KeyError", vec![Value::from("k")]);
        assert_eq!(exc.message(), "'k'");
        let exc = Exception::new("Exception", vec![Value::Int(1), Value::Int(2)]);
        assert_eq!(exc.message(), "(1, 2)");
    }

    fn nested(levels: usize, wrap: fn(Value) -> Value) -> Value {
        let mut value = Value::Int(0);
        for _ in 0..levels {
            value = wrap(value);
        }
        value
    }

    fn recursion_kind(result: Flow<impl std::fmt::Debug>) -> &'static str {
        match result {
            Err(Unwind::Exc(exc)) => exc.kind,
            other => panic!("expected an exception, got {other:?}"),
        }
    }

    #[test]
    fn test_deep_structures_drop_without_recursion() {
        // Runs on the default test thread stack.
        drop(nested(1_000_000, |inner| Value::new_list(vec![inner])));
        drop(nested(1_000_000, |inner| Value::new_tuple(vec![inner])));
        drop(nested(1_000_000, |inner| {
            Value::new_dict(vec![(Value::Int(1), inner)])
        }));
        drop(nested(1_000_000, |inner| {
            Value::Exception(Rc::new(Exception::new("ValueError", vec![inner])))
        }));
    }

    #[test]
    fn test_shared_children_survive_release() {
        let shared = Value::new_list(vec![Value::Int(7)]);
        let outer = Value::new_list(vec![shared.clone(), shared.clone()]);
        drop(outer);
        assert_eq!(shared.repr(), "[7]");
    }

    #[test]
    fn test_cyclic_comparison_raises_recursion_error() {
        let cyclic = || {
            let list = Value::new_list(Vec::new());
            if let Value::List(items) = &list {
                items.borrow_mut().push(list.clone());
            }
            list
        };
        let (a, b) = (cyclic(), cyclic());
        assert!(py_eq(&a, &a).unwrap());
        assert_eq!(recursion_kind(py_eq(&a, &b)), "RecursionError");
        assert_eq!(recursion_kind(py_cmp(&a, &b)), "RecursionError");
    }

    #[test]
    fn test_deep_values_render_and_hash() {
        let tuple = nested(100_000, |inner| Value::new_tuple(vec![inner]));
        assert!(tuple.is_hashable());
        assert!(tuple.repr().ends_with("...,),),)"));
        assert!(matches!(tuple.to_binding(), Binding::Opaque(_)));

        let exc = nested(100_000, |inner| {
            Value::Exception(Rc::new(Exception::new("ValueError", vec![inner])))
        });
        assert_eq!(exc.str(), "...");
        assert!(exc.repr().starts_with("ValueError(ValueError("));
    }
}
