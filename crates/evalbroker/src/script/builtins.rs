//! Builtin functions, exception classes, methods and the `math`/`time` modules.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::num::IntErrorKind;
use std::rc::Rc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use once_cell::sync::Lazy;

use super::ast::BinOp;
use super::interp::{overflow, type_error, Flow, Interp, Unwind};
use super::ops;
use super::value::{
    position_of, py_eq, py_repr_str, Builtin, BuiltinFn, Dict, Items, Kwargs, List, Value,
    TYPE_NAMES,
};

/// Exception classes with their base class.
const EXCEPTIONS: &[(&str, &str)] = &[
    ("BaseException", ""),
    ("Exception", "BaseException"),
    ("ArithmeticError", "Exception"),
    ("ZeroDivisionError", "ArithmeticError"),
    ("OverflowError", "ArithmeticError"),
    ("LookupError", "Exception"),
    ("IndexError", "LookupError"),
    ("KeyError", "LookupError"),
    ("ValueError", "Exception"),
    ("TypeError", "Exception"),
    ("NameError", "Exception"),
    ("UnboundLocalError", "NameError"),
    ("AttributeError", "Exception"),
    ("RuntimeError", "Exception"),
    ("RecursionError", "RuntimeError"),
    ("NotImplementedError", "RuntimeError"),
    ("AssertionError", "Exception"),
    ("StopIteration", "Exception"),
    ("ImportError", "Exception"),
    ("ModuleNotFoundError", "ImportError"),
    ("SyntaxError", "Exception"),
    ("IndentationError", "SyntaxError"),
    ("MemoryError", "Exception"),
    ("SystemError", "Exception"),
];

const LIST_METHODS: &[&str] = &[
    "append", "extend", "pop", "insert", "remove", "index", "count", "reverse", "sort", "clear",
    "copy",
];

const STR_METHODS: &[&str] = &[
    "upper", "lower", "strip", "lstrip", "rstrip", "split", "join", "replace", "startswith",
    "endswith", "find", "count", "isdigit", "isalpha",
];

const DICT_METHODS: &[&str] = &[
    "get", "keys", "values", "items", "pop", "setdefault", "update", "clear", "copy",
];

fn register(table: &mut HashMap<&'static str, BuiltinFn>, name: &'static str, func: BuiltinFn) {
    table.insert(name, func);
}

static BUILTINS: Lazy<HashMap<&'static str, BuiltinFn>> = Lazy::new(|| {
    let mut table = HashMap::new();
    register(&mut table, "len", len);
    register(&mut table, "range", range);
    register(&mut table, "abs", abs);
    register(&mut table, "min", min);
    register(&mut table, "max", max);
    register(&mut table, "sum", sum);
    register(&mut table, "int", to_int);
    register(&mut table, "float", to_float);
    register(&mut table, "str", to_str);
    register(&mut table, "bool", to_bool);
    register(&mut table, "list", to_list);
    register(&mut table, "tuple", to_tuple);
    register(&mut table, "dict", to_dict);
    register(&mut table, "sorted", sorted);
    register(&mut table, "reversed", reversed);
    register(&mut table, "round", round);
    register(&mut table, "enumerate", enumerate);
    register(&mut table, "zip", zip);
    register(&mut table, "print", print);
    register(&mut table, "isinstance", isinstance);
    register(&mut table, "any", any);
    register(&mut table, "all", all);
    register(&mut table, "pow", pow);
    register(&mut table, "divmod", divmod);
    register(&mut table, "repr", repr);
    table
});

static MATH: Lazy<HashMap<&'static str, BuiltinFn>> = Lazy::new(|| {
    let mut table = HashMap::new();
    register(&mut table, "sqrt", math_sqrt);
    register(&mut table, "exp", math_exp);
    register(&mut table, "log", math_log);
    register(&mut table, "log10", math_log10);
    register(&mut table, "log2", math_log2);
    register(&mut table, "sin", math_sin);
    register(&mut table, "cos", math_cos);
    register(&mut table, "tan", math_tan);
    register(&mut table, "asin", math_asin);
    register(&mut table, "acos", math_acos);
    register(&mut table, "atan", math_atan);
    register(&mut table, "atan2", math_atan2);
    register(&mut table, "hypot", math_hypot);
    register(&mut table, "fabs", math_fabs);
    register(&mut table, "pow", math_pow);
    register(&mut table, "floor", math_floor);
    register(&mut table, "ceil", math_ceil);
    register(&mut table, "trunc", math_trunc);
    register(&mut table, "isnan", math_isnan);
    register(&mut table, "isinf", math_isinf);
    register(&mut table, "isfinite", math_isfinite);
    register(&mut table, "factorial", math_factorial);
    register(&mut table, "gcd", math_gcd);
    table
});

static TIME: Lazy<HashMap<&'static str, BuiltinFn>> = Lazy::new(|| {
    let mut table = HashMap::new();
    register(&mut table, "sleep", time_sleep);
    register(&mut table, "time", time_time);
    register(&mut table, "monotonic", time_monotonic);
    register(&mut table, "perf_counter", time_monotonic);
    table
});

static CLOCK_ORIGIN: Lazy<Instant> = Lazy::new(Instant::now);

fn builtin_value(table: &HashMap<&'static str, BuiltinFn>, name: &str) -> Option<Value> {
    table
        .get_key_value(name)
        .map(|(name, func)| Value::Builtin(Builtin { name: *name, func: *func }))
}

/// Resolves a name that is not bound in any scope.
pub(crate) fn lookup(name: &str) -> Option<Value> {
    builtin_value(&BUILTINS, name).or_else(|| exception_type(name).map(Value::ExcType))
}

pub(crate) fn exception_type(name: &str) -> Option<&'static str> {
    EXCEPTIONS
        .iter()
        .find(|(kind, _)| *kind == name)
        .map(|(kind, _)| *kind)
}

pub(crate) fn is_subclass(kind: &str, parent: &str) -> bool {
    let mut current = kind;
    loop {
        if current == parent {
            return true;
        }
        match EXCEPTIONS.iter().find(|(name, _)| *name == current) {
            Some((_, base)) if !base.is_empty() => current = *base,
            _ => return false,
        }
    }
}

pub(crate) fn module(name: &str) -> Option<Value> {
    match name {
        "math" => Some(Value::Module("math")),
        "time" => Some(Value::Module("time")),
        _ => None,
    }
}

pub(crate) fn module_attr(module: &str, attr: &str) -> Option<Value> {
    match (module, attr) {
        ("math", "pi") => Some(Value::Float(std::f64::consts::PI)),
        ("math", "e") => Some(Value::Float(std::f64::consts::E)),
        ("math", "tau") => Some(Value::Float(std::f64::consts::TAU)),
        ("math", "inf") => Some(Value::Float(f64::INFINITY)),
        ("math", "nan") => Some(Value::Float(f64::NAN)),
        ("math", _) => builtin_value(&MATH, attr),
        ("time", _) => builtin_value(&TIME, attr),
        _ => None,
    }
}

pub(crate) fn method_name(receiver: &Value, attr: &str) -> Option<&'static str> {
    let methods = match receiver {
        Value::List(_) => LIST_METHODS,
        Value::Str(_) => STR_METHODS,
        Value::Dict(_) => DICT_METHODS,
        _ => return None,
    };
    methods.iter().copied().find(|name| *name == attr)
}

pub(crate) fn call_method(
    interp: &mut Interp,
    receiver: &Value,
    name: &str,
    args: Vec<Value>,
    kwargs: Kwargs,
) -> Flow<Value> {
    match receiver {
        Value::List(items) => list_method(interp, items, name, args, kwargs),
        Value::Str(s) => {
            no_kwargs(name, &kwargs)?;
            str_method(s, name, args)
        }
        Value::Dict(entries) => {
            no_kwargs(name, &kwargs)?;
            dict_method(entries, name, args)
        }
        other => Err(Unwind::error(
            "AttributeError",
            format!("'{}' object has no attribute '{}'", other.type_name(), name),
        )),
    }
}

fn no_kwargs(name: &str, kwargs: &Kwargs) -> Flow<()> {
    if kwargs.is_empty() {
        Ok(())
    } else {
        Err(type_error(format!("{name}() takes no keyword arguments")))
    }
}

fn take_kwarg(kwargs: &mut Kwargs, key: &str) -> Option<Value> {
    let position = kwargs.iter().position(|(name, _)| name == key)?;
    Some(kwargs.remove(position).1)
}

fn finish_kwargs(name: &str, kwargs: Kwargs) -> Flow<()> {
    match kwargs.first() {
        None => Ok(()),
        Some((key, _)) => Err(type_error(format!(
            "'{key}' is an invalid keyword argument for {name}()"
        ))),
    }
}

/// Exactly `N` positional arguments and no keywords.
fn exact<const N: usize>(name: &str, args: Vec<Value>, kwargs: Kwargs) -> Flow<[Value; N]> {
    no_kwargs(name, &kwargs)?;
    let given = args.len();
    args.try_into().map_err(|_| {
        type_error(format!(
            "{}() takes exactly {} argument{} ({} given)",
            name,
            N,
            if N == 1 { "" } else { "s" },
            given
        ))
    })
}

/// Between `min` and `max` positional arguments.
fn between(name: &str, args: &[Value], min: usize, max: usize) -> Flow<()> {
    if args.len() < min {
        return Err(type_error(format!(
            "{} expected at least {} argument{}, got {}",
            name,
            min,
            if min == 1 { "" } else { "s" },
            args.len()
        )));
    }
    if args.len() > max {
        return Err(type_error(format!(
            "{} expected at most {} argument{}, got {}",
            name,
            max,
            if max == 1 { "" } else { "s" },
            args.len()
        )));
    }
    Ok(())
}

fn int_arg(value: &Value) -> Flow<i64> {
    value.as_int().ok_or_else(|| {
        type_error(format!(
            "'{}' object cannot be interpreted as an integer",
            value.type_name()
        ))
    })
}

fn float_arg(value: &Value) -> Flow<f64> {
    value
        .as_float()
        .ok_or_else(|| type_error(format!("must be real number, not {}", value.type_name())))
}

fn float_to_int(f: f64) -> Flow<i64> {
    if f.is_nan() {
        return Err(Unwind::error("ValueError", "cannot convert float NaN to integer"));
    }
    if f.is_infinite() {
        return Err(Unwind::error(
            "OverflowError",
            "cannot convert float infinity to integer",
        ));
    }
    let truncated = f.trunc();
    if truncated < i64::MIN as f64 || truncated >= i64::MAX as f64 {
        return Err(overflow());
    }
    Ok(truncated as i64)
}

fn call_key(interp: &mut Interp, key: &Option<Value>, item: &Value) -> Flow<Value> {
    match key {
        Some(func) if !matches!(func, Value::None) => interp.call(func, vec![item.clone()], Vec::new()),
        _ => Ok(item.clone()),
    }
}

/// Stable merge sort on precomputed keys; comparison errors propagate.
fn merge_sort(mut items: Vec<(Value, Value)>, reverse: bool) -> Flow<Vec<(Value, Value)>> {
    if items.len() <= 1 {
        return Ok(items);
    }
    let right = items.split_off(items.len() / 2);
    let left = merge_sort(items, reverse)?;
    let right = merge_sort(right, reverse)?;

    let mut merged = Vec::with_capacity(left.len() + right.len());
    let mut left = left.into_iter().peekable();
    let mut right = right.into_iter().peekable();
    while let (Some(l), Some(r)) = (left.peek(), right.peek()) {
        let take_right = if reverse {
            ops::sort_order(&l.0, &r.0)? == Ordering::Less
        } else {
            ops::sort_order(&r.0, &l.0)? == Ordering::Less
        };
        let next = if take_right { right.next() } else { left.next() };
        merged.extend(next);
    }
    merged.extend(left);
    merged.extend(right);
    Ok(merged)
}

fn sort_values(
    interp: &mut Interp,
    items: Vec<Value>,
    key: Option<Value>,
    reverse: bool,
) -> Flow<Vec<Value>> {
    let mut keyed = Vec::with_capacity(items.len());
    for item in items {
        keyed.push((call_key(interp, &key, &item)?, item));
    }
    Ok(merge_sort(keyed, reverse)?
        .into_iter()
        .map(|(_, item)| item)
        .collect())
}

fn sort_options(kwargs: &mut Kwargs) -> (Option<Value>, bool) {
    let key = take_kwarg(kwargs, "key");
    let reverse = take_kwarg(kwargs, "reverse").is_some_and(|v| v.truthy());
    (key, reverse)
}

fn len(_: &mut Interp, args: Vec<Value>, kwargs: Kwargs) -> Flow<Value> {
    let [value] = exact::<1>("len", args, kwargs)?;
    let len = match &value {
        Value::Str(s) => s.chars().count() as i64,
        Value::List(items) => items.borrow().len() as i64,
        Value::Tuple(items) => items.len() as i64,
        Value::Dict(entries) => entries.borrow().len() as i64,
        Value::Range { .. } => super::value::range_len(&value),
        other => {
            return Err(type_error(format!(
                "object of type '{}' has no len()",
                other.type_name()
            )))
        }
    };
    Ok(Value::Int(len))
}

fn range(_: &mut Interp, args: Vec<Value>, kwargs: Kwargs) -> Flow<Value> {
    no_kwargs("range", &kwargs)?;
    between("range", &args, 1, 3)?;
    let ints = args.iter().map(int_arg).collect::<Flow<Vec<i64>>>()?;
    let (start, stop, step) = match ints.as_slice() {
        [stop] => (0, *stop, 1),
        [start, stop] => (*start, *stop, 1),
        [start, stop, step] => (*start, *stop, *step),
        _ => return Err(type_error("range expected at most 3 arguments")),
    };
    if step == 0 {
        return Err(Unwind::error("ValueError", "range() arg 3 must not be zero"));
    }
    Ok(Value::Range { start, stop, step })
}

fn abs(_: &mut Interp, args: Vec<Value>, kwargs: Kwargs) -> Flow<Value> {
    let [value] = exact::<1>("abs", args, kwargs)?;
    match value {
        Value::Float(f) => Ok(Value::Float(f.abs())),
        other => match other.as_int() {
            Some(i) => i.checked_abs().map(Value::Int).ok_or_else(overflow),
            None => Err(type_error(format!(
                "bad operand type for abs(): '{}'",
                other.type_name()
            ))),
        },
    }
}

fn extremum(
    interp: &mut Interp,
    name: &str,
    args: Vec<Value>,
    mut kwargs: Kwargs,
    wanted: Ordering,
) -> Flow<Value> {
    let key = take_kwarg(&mut kwargs, "key");
    let default = take_kwarg(&mut kwargs, "default");
    finish_kwargs(name, kwargs)?;

    let items = match args.len() {
        0 => {
            return Err(type_error(format!(
                "{name} expected at least 1 argument, got 0"
            )))
        }
        1 => ops::collect(&args[0])?,
        _ => args,
    };

    let mut best: Option<(Value, Value)> = None;
    for item in items {
        let item_key = call_key(interp, &key, &item)?;
        best = match best {
            Some((best_key, best_item)) => {
                if ops::sort_order(&item_key, &best_key)? == wanted {
                    Some((item_key, item))
                } else {
                    Some((best_key, best_item))
                }
            }
            None => Some((item_key, item)),
        };
    }
    match best {
        Some((_, item)) => Ok(item),
        None => default.ok_or_else(|| {
            Unwind::error("ValueError", format!("{name}() arg is an empty sequence"))
        }),
    }
}

fn min(interp: &mut Interp, args: Vec<Value>, kwargs: Kwargs) -> Flow<Value> {
    extremum(interp, "min", args, kwargs, Ordering::Less)
}

fn max(interp: &mut Interp, args: Vec<Value>, kwargs: Kwargs) -> Flow<Value> {
    extremum(interp, "max", args, kwargs, Ordering::Greater)
}

fn sum(interp: &mut Interp, mut args: Vec<Value>, mut kwargs: Kwargs) -> Flow<Value> {
    let start = take_kwarg(&mut kwargs, "start");
    finish_kwargs("sum", kwargs)?;
    between("sum", &args, 1, 2)?;
    let mut total = match (args.len(), start) {
        (2, _) => args.remove(1),
        (_, Some(start)) => start,
        _ => Value::Int(0),
    };
    if matches!(total, Value::Str(_)) {
        return Err(type_error("sum() can't sum strings [use ''.join(seq) instead]"));
    }
    for item in ops::iterate(&args[0])? {
        interp.poll()?;
        total = ops::binary(BinOp::Add, &total, &item)?;
    }
    Ok(total)
}

fn parse_int(text: &str, base: u32) -> Flow<i64> {
    let invalid = || {
        Unwind::error(
            "ValueError",
            format!(
                "invalid literal for int() with base {}: {}",
                base,
                py_repr_str(text)
            ),
        )
    };
    let trimmed = text.trim();
    let digits = if trimmed.contains('_') {
        if trimmed.starts_with('_') || trimmed.ends_with('_') || trimmed.contains("__") {
            return Err(invalid());
        }
        trimmed.replace('_', "")
    } else {
        trimmed.to_string()
    };
    i64::from_str_radix(&digits, base).map_err(|err| match err.kind() {
        IntErrorKind::PosOverflow | IntErrorKind::NegOverflow => overflow(),
        _ => invalid(),
    })
}

fn to_int(_: &mut Interp, args: Vec<Value>, mut kwargs: Kwargs) -> Flow<Value> {
    let base = take_kwarg(&mut kwargs, "base");
    finish_kwargs("int", kwargs)?;
    between("int", &args, 0, 2)?;
    let base = match (args.get(1), base.as_ref()) {
        (Some(base), _) | (None, Some(base)) => Some(int_arg(base)?),
        _ => None,
    };
    let Some(value) = args.first() else {
        return Ok(Value::Int(0));
    };

    if let Some(base) = base {
        let Value::Str(text) = value else {
            return Err(type_error("int() can't convert non-string with explicit base"));
        };
        if !(2..=36).contains(&base) {
            return Err(Unwind::error("ValueError", "int() base must be >= 2 and <= 36, or 0"));
        }
        return parse_int(text, base as u32).map(Value::Int);
    }

    match value {
        Value::Int(i) => Ok(Value::Int(*i)),
        Value::Bool(b) => Ok(Value::Int(*b as i64)),
        Value::Float(f) => float_to_int(*f).map(Value::Int),
        Value::Str(text) => parse_int(text, 10).map(Value::Int),
        other => Err(type_error(format!(
            "int() argument must be a string, a bytes-like object or a real number, not '{}'",
            other.type_name()
        ))),
    }
}

fn to_float(_: &mut Interp, args: Vec<Value>, kwargs: Kwargs) -> Flow<Value> {
    no_kwargs("float", &kwargs)?;
    between("float", &args, 0, 1)?;
    let Some(value) = args.first() else {
        return Ok(Value::Float(0.0));
    };
    match value {
        Value::Str(text) => text.trim().parse::<f64>().map(Value::Float).map_err(|_| {
            Unwind::error(
                "ValueError",
                format!("could not convert string to float: {}", py_repr_str(text)),
            )
        }),
        other => other.as_float().map(Value::Float).ok_or_else(|| {
            type_error(format!(
                "float() argument must be a string or a real number, not '{}'",
                other.type_name()
            ))
        }),
    }
}

fn to_str(_: &mut Interp, args: Vec<Value>, kwargs: Kwargs) -> Flow<Value> {
    no_kwargs("str", &kwargs)?;
    between("str", &args, 0, 1)?;
    Ok(Value::from(args.first().map(Value::str).unwrap_or_default()))
}

fn to_bool(_: &mut Interp, args: Vec<Value>, kwargs: Kwargs) -> Flow<Value> {
    no_kwargs("bool", &kwargs)?;
    between("bool", &args, 0, 1)?;
    Ok(Value::Bool(args.first().is_some_and(Value::truthy)))
}

fn to_list(_: &mut Interp, args: Vec<Value>, kwargs: Kwargs) -> Flow<Value> {
    no_kwargs("list", &kwargs)?;
    between("list", &args, 0, 1)?;
    match args.first() {
        Some(iterable) => Ok(Value::new_list(ops::collect(iterable)?)),
        None => Ok(Value::new_list(Vec::new())),
    }
}

fn to_tuple(_: &mut Interp, args: Vec<Value>, kwargs: Kwargs) -> Flow<Value> {
    no_kwargs("tuple", &kwargs)?;
    between("tuple", &args, 0, 1)?;
    match args.first() {
        Some(Value::Tuple(items)) => Ok(Value::Tuple(items.clone())),
        Some(iterable) => Ok(Value::new_tuple(ops::collect(iterable)?)),
        None => Ok(Value::new_tuple(Vec::new())),
    }
}

/// Adds `source` (a mapping or an iterable of pairs) to `target`.
fn dict_update(target: &Dict, source: &Value) -> Flow<()> {
    if let Value::Dict(entries) = source {
        let entries = entries.borrow().clone();
        for (key, value) in entries {
            ops::dict_set(target, key, value)?;
        }
        return Ok(());
    }
    for (i, pair) in ops::collect(source)?.into_iter().enumerate() {
        let pair = ops::collect(&pair).map_err(|_| {
            type_error(format!(
                "cannot convert dictionary update sequence element #{} to a sequence",
                i
            ))
        })?;
        let [key, value]: [Value; 2] = pair.try_into().map_err(|pair: Vec<Value>| {
            Unwind::error(
                "ValueError",
                format!(
                    "dictionary update sequence element #{} has length {}; 2 is required",
                    i,
                    pair.len()
                ),
            )
        })?;
        ops::dict_set(target, key, value)?;
    }
    Ok(())
}

fn to_dict(_: &mut Interp, args: Vec<Value>, kwargs: Kwargs) -> Flow<Value> {
    between("dict", &args, 0, 1)?;
    let dict = Value::new_dict(Vec::new());
    if let Value::Dict(entries) = &dict {
        if let Some(source) = args.first() {
            dict_update(entries, source)?;
        }
        for (key, value) in kwargs {
            ops::dict_set(entries, Value::from(key), value)?;
        }
    }
    Ok(dict)
}

fn sorted(interp: &mut Interp, args: Vec<Value>, mut kwargs: Kwargs) -> Flow<Value> {
    let (key, reverse) = sort_options(&mut kwargs);
    finish_kwargs("sorted", kwargs)?;
    let [iterable] = exact::<1>("sorted", args, Vec::new())?;
    let items = ops::collect(&iterable)?;
    Ok(Value::new_list(sort_values(interp, items, key, reverse)?))
}

fn reversed(_: &mut Interp, args: Vec<Value>, kwargs: Kwargs) -> Flow<Value> {
    let [sequence] = exact::<1>("reversed", args, kwargs)?;
    if matches!(sequence, Value::Dict(_)) {
        return Err(type_error("'dict' object is not reversible"));
    }
    let mut items = ops::collect(&sequence)?;
    items.reverse();
    Ok(Value::new_list(items))
}

fn round_half_even(f: f64) -> f64 {
    if (f - f.trunc()).abs() == 0.5 {
        2.0 * (f / 2.0).round()
    } else {
        f.round()
    }
}

fn round(_: &mut Interp, args: Vec<Value>, mut kwargs: Kwargs) -> Flow<Value> {
    let ndigits = take_kwarg(&mut kwargs, "ndigits");
    finish_kwargs("round", kwargs)?;
    between("round", &args, 1, 2)?;
    let ndigits = match args.get(1).or(ndigits.as_ref()) {
        None | Some(Value::None) => None,
        Some(n) => Some(int_arg(n)?),
    };

    match (&args[0], ndigits) {
        (Value::Float(f), None) => float_to_int(round_half_even(*f)).map(Value::Int),
        (Value::Float(f), Some(n)) => {
            let scale = 10f64.powi(n.clamp(-400, 400) as i32);
            if !f.is_finite() || !scale.is_finite() || scale == 0.0 {
                return Ok(Value::Float(*f));
            }
            Ok(Value::Float(round_half_even(f * scale) / scale))
        }
        (value, _) => match value.as_int() {
            Some(i) => Ok(Value::Int(i)),
            None => Err(type_error(format!(
                "type {} doesn't define __round__ method",
                value.type_name()
            ))),
        },
    }
}

fn enumerate(_: &mut Interp, args: Vec<Value>, mut kwargs: Kwargs) -> Flow<Value> {
    let start = take_kwarg(&mut kwargs, "start");
    finish_kwargs("enumerate", kwargs)?;
    between("enumerate", &args, 1, 2)?;
    let start = match args.get(1).or(start.as_ref()) {
        Some(start) => int_arg(start)?,
        None => 0,
    };
    let mut pairs = Vec::new();
    for (offset, item) in ops::iterate(&args[0])?.enumerate() {
        let index = start.checked_add(offset as i64).ok_or_else(overflow)?;
        pairs.push(Value::new_tuple(vec![Value::Int(index), item]));
    }
    Ok(Value::new_list(pairs))
}

fn zip(_: &mut Interp, args: Vec<Value>, kwargs: Kwargs) -> Flow<Value> {
    no_kwargs("zip", &kwargs)?;
    let columns = args.iter().map(ops::collect).collect::<Flow<Vec<_>>>()?;
    let rows = columns.iter().map(Vec::len).min().unwrap_or(0);
    let zipped = (0..rows)
        .map(|row| Value::new_tuple(columns.iter().map(|column| column[row].clone()).collect()))
        .collect();
    Ok(Value::new_list(zipped))
}

fn print(_: &mut Interp, args: Vec<Value>, mut kwargs: Kwargs) -> Flow<Value> {
    let sep = take_kwarg(&mut kwargs, "sep");
    let end = take_kwarg(&mut kwargs, "end");
    finish_kwargs("print", kwargs)?;
    let sep = match sep {
        Some(Value::Str(s)) => s.to_string(),
        _ => " ".to_string(),
    };
    let mut line: String = args.iter().map(Value::str).collect::<Vec<_>>().join(&sep);
    if let Some(Value::Str(end)) = end {
        line.push_str(end.trim_end_matches('\n'));
    }
    // Stdout carries the protocol, so script output goes to the log.
    tracing::debug!("script output: {}", line);
    Ok(Value::None)
}

fn instance_of(value: &Value, class: &Value) -> Flow<bool> {
    let mut pending = vec![class];
    while let Some(class) = pending.pop() {
        let matched = match class {
            Value::ExcType(kind) => {
                matches!(value, Value::Exception(exc) if is_subclass(exc.kind, kind))
            }
            Value::Builtin(builtin) if TYPE_NAMES.contains(&builtin.name) => match builtin.name {
                "int" => matches!(value, Value::Int(_) | Value::Bool(_)),
                name => value.type_name() == name,
            },
            Value::Tuple(classes) => {
                pending.extend(classes.iter().rev());
                false
            }
            _ => {
                return Err(type_error(
                    "isinstance() arg 2 must be a type or tuple of types",
                ))
            }
        };
        if matched {
            return Ok(true);
        }
    }
    Ok(false)
}

fn isinstance(_: &mut Interp, args: Vec<Value>, kwargs: Kwargs) -> Flow<Value> {
    let [value, class] = exact::<2>("isinstance", args, kwargs)?;
    instance_of(&value, &class).map(Value::Bool)
}

fn any(_: &mut Interp, args: Vec<Value>, kwargs: Kwargs) -> Flow<Value> {
    let [iterable] = exact::<1>("any", args, kwargs)?;
    Ok(Value::Bool(ops::iterate(&iterable)?.any(|v| v.truthy())))
}

fn all(_: &mut Interp, args: Vec<Value>, kwargs: Kwargs) -> Flow<Value> {
    let [iterable] = exact::<1>("all", args, kwargs)?;
    Ok(Value::Bool(ops::iterate(&iterable)?.all(|v| v.truthy())))
}

fn pow(_: &mut Interp, args: Vec<Value>, kwargs: Kwargs) -> Flow<Value> {
    let [base, exponent] = exact::<2>("pow", args, kwargs)?;
    ops::binary(BinOp::Pow, &base, &exponent)
}

fn divmod(_: &mut Interp, args: Vec<Value>, kwargs: Kwargs) -> Flow<Value> {
    let [a, b] = exact::<2>("divmod", args, kwargs)?;
    let quotient = ops::binary(BinOp::FloorDiv, &a, &b)?;
    let remainder = ops::binary(BinOp::Mod, &a, &b)?;
    Ok(Value::new_tuple(vec![quotient, remainder]))
}

fn repr(_: &mut Interp, args: Vec<Value>, kwargs: Kwargs) -> Flow<Value> {
    let [value] = exact::<1>("repr", args, kwargs)?;
    Ok(Value::from(value.repr()))
}

fn list_method(
    interp: &mut Interp,
    items: &List,
    name: &str,
    args: Vec<Value>,
    mut kwargs: Kwargs,
) -> Flow<Value> {
    if name != "sort" {
        no_kwargs(name, &kwargs)?;
    }
    match name {
        "append" => {
            let [item] = exact::<1>("append", args, Vec::new())?;
            items.borrow_mut().push(item);
            Ok(Value::None)
        }
        "extend" => {
            let [iterable] = exact::<1>("extend", args, Vec::new())?;
            let extra = ops::collect(&iterable)?;
            items.borrow_mut().extend(extra);
            Ok(Value::None)
        }
        "pop" => {
            between("pop", &args, 0, 1)?;
            let len = items.borrow().len() as i64;
            if len == 0 {
                return Err(Unwind::error("IndexError", "pop from empty list"));
            }
            let index = match args.first() {
                Some(index) => int_arg(index)?,
                None => -1,
            };
            let index = if index < 0 { index + len } else { index };
            if index < 0 || index >= len {
                return Err(Unwind::error("IndexError", "pop index out of range"));
            }
            Ok(items.borrow_mut().remove(index as usize))
        }
        "insert" => {
            let [index, item] = exact::<2>("insert", args, Vec::new())?;
            let len = items.borrow().len() as i64;
            let index = int_arg(&index)?;
            let index = if index < 0 { (index + len).max(0) } else { index.min(len) };
            items.borrow_mut().insert(index as usize, item);
            Ok(Value::None)
        }
        "remove" => {
            let [item] = exact::<1>("remove", args, Vec::new())?;
            let position = position_of(&items.borrow(), &item)?;
            match position {
                Some(i) => {
                    items.borrow_mut().remove(i);
                    Ok(Value::None)
                }
                None => Err(Unwind::error("ValueError", "list.remove(x): x not in list")),
            }
        }
        "index" => {
            let [item] = exact::<1>("index", args, Vec::new())?;
            let position = position_of(&items.borrow(), &item)?;
            position
                .map(|i| Value::Int(i as i64))
                .ok_or_else(|| Unwind::error("ValueError", format!("{} is not in list", item.repr())))
        }
        "count" => {
            let [item] = exact::<1>("count", args, Vec::new())?;
            let mut count = 0;
            for candidate in items.borrow().iter() {
                if py_eq(candidate, &item)? {
                    count += 1;
                }
            }
            Ok(Value::Int(count))
        }
        "reverse" => {
            exact::<0>("reverse", args, Vec::new())?;
            items.borrow_mut().reverse();
            Ok(Value::None)
        }
        "sort" => {
            let (key, reverse) = sort_options(&mut kwargs);
            finish_kwargs("sort", kwargs)?;
            exact::<0>("sort", args, Vec::new())?;
            let current = items.borrow().clone();
            let sorted = sort_values(interp, current, key, reverse)?;
            *items.borrow_mut() = Items::from(sorted);
            Ok(Value::None)
        }
        "clear" => {
            exact::<0>("clear", args, Vec::new())?;
            items.borrow_mut().clear();
            Ok(Value::None)
        }
        "copy" => {
            exact::<0>("copy", args, Vec::new())?;
            Ok(Value::new_list(items.borrow().clone()))
        }
        other => Err(Unwind::error(
            "AttributeError",
            format!("'list' object has no attribute '{other}'"),
        )),
    }
}

fn str_arg<'a>(name: &str, value: &'a Value) -> Flow<&'a str> {
    match value {
        Value::Str(s) => Ok(&**s),
        other => Err(type_error(format!(
            "{}() argument must be str, not {}",
            name,
            other.type_name()
        ))),
    }
}

fn strip_chars(args: &[Value], name: &str) -> Flow<Option<Vec<char>>> {
    between(name, args, 0, 1)?;
    match args.first() {
        None | Some(Value::None) => Ok(None),
        Some(chars) => Ok(Some(str_arg(name, chars)?.chars().collect())),
    }
}

fn str_method(s: &Rc<str>, name: &str, args: Vec<Value>) -> Flow<Value> {
    match name {
        "upper" => Ok(Value::from(s.to_uppercase())),
        "lower" => Ok(Value::from(s.to_lowercase())),
        "strip" | "lstrip" | "rstrip" => {
            let chars = strip_chars(&args, name)?;
            let matches = |c: char| match &chars {
                Some(set) => set.contains(&c),
                None => c.is_whitespace(),
            };
            let stripped = match name {
                "strip" => s.trim_matches(matches),
                "lstrip" => s.trim_start_matches(matches),
                _ => s.trim_end_matches(matches),
            };
            Ok(Value::from(stripped))
        }
        "split" => {
            between("split", &args, 0, 2)?;
            let limit = match args.get(1) {
                Some(limit) => int_arg(limit)?,
                None => -1,
            };
            let parts: Vec<String> = match args.first() {
                None | Some(Value::None) => {
                    let mut parts: Vec<String> = Vec::new();
                    let mut rest = s.trim_start();
                    while !rest.is_empty() {
                        if limit >= 0 && parts.len() as i64 == limit {
                            parts.push(rest.trim_end().to_string());
                            break;
                        }
                        let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
                        parts.push(rest[..end].to_string());
                        rest = rest[end..].trim_start();
                    }
                    parts
                }
                Some(sep) => {
                    let sep = str_arg("split", sep)?;
                    if sep.is_empty() {
                        return Err(Unwind::error("ValueError", "empty separator"));
                    }
                    if limit < 0 {
                        s.split(sep).map(str::to_string).collect()
                    } else {
                        s.splitn(limit as usize + 1, sep).map(str::to_string).collect()
                    }
                }
            };
            Ok(Value::new_list(parts.into_iter().map(Value::from).collect()))
        }
        "join" => {
            let [iterable] = exact::<1>("join", args, Vec::new())?;
            let mut pieces = Vec::new();
            for (i, item) in ops::iterate(&iterable)?.enumerate() {
                match item {
                    Value::Str(piece) => pieces.push(piece.to_string()),
                    other => {
                        return Err(type_error(format!(
                            "sequence item {}: expected str instance, {} found",
                            i,
                            other.type_name()
                        )))
                    }
                }
            }
            Ok(Value::from(pieces.join(&**s)))
        }
        "replace" => {
            let [old, new] = exact::<2>("replace", args, Vec::new())?;
            Ok(Value::from(
                s.replace(str_arg("replace", &old)?, str_arg("replace", &new)?),
            ))
        }
        "startswith" | "endswith" => {
            let [affix] = exact::<1>(name, args, Vec::new())?;
            let affix = str_arg(name, &affix)?;
            Ok(Value::Bool(if name == "startswith" {
                s.starts_with(affix)
            } else {
                s.ends_with(affix)
            }))
        }
        "find" => {
            let [sub] = exact::<1>("find", args, Vec::new())?;
            let sub = str_arg("find", &sub)?;
            Ok(Value::Int(match s.find(sub) {
                Some(byte) => s[..byte].chars().count() as i64,
                None => -1,
            }))
        }
        "count" => {
            let [sub] = exact::<1>("count", args, Vec::new())?;
            let sub = str_arg("count", &sub)?;
            let count = if sub.is_empty() {
                s.chars().count() + 1
            } else {
                s.matches(sub).count()
            };
            Ok(Value::Int(count as i64))
        }
        "isdigit" => Ok(Value::Bool(
            !s.is_empty() && s.chars().all(|c| c.is_ascii_digit()),
        )),
        "isalpha" => Ok(Value::Bool(
            !s.is_empty() && s.chars().all(char::is_alphabetic),
        )),
        other => Err(Unwind::error(
            "AttributeError",
            format!("'str' object has no attribute '{other}'"),
        )),
    }
}

fn dict_method(entries: &Dict, name: &str, args: Vec<Value>) -> Flow<Value> {
    match name {
        "get" => {
            between("get", &args, 1, 2)?;
            let found = ops::dict_get(entries, &args[0])?;
            Ok(found.unwrap_or_else(|| args.get(1).cloned().unwrap_or(Value::None)))
        }
        "keys" => Ok(Value::new_list(
            entries.borrow().iter().map(|(k, _)| k.clone()).collect(),
        )),
        "values" => Ok(Value::new_list(
            entries.borrow().iter().map(|(_, v)| v.clone()).collect(),
        )),
        "items" => Ok(Value::new_list(
            entries
                .borrow()
                .iter()
                .map(|(k, v)| Value::new_tuple(vec![k.clone(), v.clone()]))
                .collect(),
        )),
        "pop" => {
            between("pop", &args, 1, 2)?;
            match ops::dict_remove(entries, &args[0])? {
                Some(value) => Ok(value),
                None => args.get(1).cloned().ok_or_else(|| {
                    Unwind::Exc(Rc::new(super::value::Exception::new(
                        "KeyError",
                        vec![args[0].clone()],
                    )))
                }),
            }
        }
        "setdefault" => {
            between("setdefault", &args, 1, 2)?;
            if let Some(existing) = ops::dict_get(entries, &args[0])? {
                return Ok(existing);
            }
            let default = args.get(1).cloned().unwrap_or(Value::None);
            ops::dict_set(entries, args[0].clone(), default.clone())?;
            Ok(default)
        }
        "update" => {
            between("update", &args, 0, 1)?;
            if let Some(source) = args.first() {
                dict_update(entries, source)?;
            }
            Ok(Value::None)
        }
        "clear" => {
            exact::<0>("clear", args, Vec::new())?;
            entries.borrow_mut().clear();
            Ok(Value::None)
        }
        "copy" => {
            exact::<0>("copy", args, Vec::new())?;
            Ok(Value::new_dict(entries.borrow().clone()))
        }
        other => Err(Unwind::error(
            "AttributeError",
            format!("'dict' object has no attribute '{other}'"),
        )),
    }
}

fn math_domain() -> Unwind {
    Unwind::error("ValueError", "math domain error")
}

fn unary_math(
    name: &str,
    args: Vec<Value>,
    kwargs: Kwargs,
    f: fn(f64) -> f64,
    in_domain: fn(f64) -> bool,
) -> Flow<Value> {
    let [x] = exact::<1>(name, args, kwargs)?;
    let x = float_arg(&x)?;
    if !in_domain(x) {
        return Err(math_domain());
    }
    let r = f(x);
    if r.is_infinite() && x.is_finite() {
        return Err(Unwind::error("OverflowError", "math range error"));
    }
    Ok(Value::Float(r))
}

fn anywhere(_: f64) -> bool {
    true
}

fn math_sqrt(_: &mut Interp, args: Vec<Value>, kwargs: Kwargs) -> Flow<Value> {
    unary_math("sqrt", args, kwargs, f64::sqrt, |x| !(x < 0.0))
}

fn math_exp(_: &mut Interp, args: Vec<Value>, kwargs: Kwargs) -> Flow<Value> {
    unary_math("exp", args, kwargs, f64::exp, anywhere)
}

fn math_log(_: &mut Interp, args: Vec<Value>, kwargs: Kwargs) -> Flow<Value> {
    no_kwargs("log", &kwargs)?;
    between("log", &args, 1, 2)?;
    let x = float_arg(&args[0])?;
    if x <= 0.0 {
        return Err(math_domain());
    }
    match args.get(1) {
        None => Ok(Value::Float(x.ln())),
        Some(base) => {
            let base = float_arg(base)?;
            if base <= 0.0 {
                return Err(math_domain());
            }
            if base == 1.0 {
                return Err(Unwind::error("ZeroDivisionError", "float division by zero"));
            }
            Ok(Value::Float(x.ln() / base.ln()))
        }
    }
}

fn math_log10(_: &mut Interp, args: Vec<Value>, kwargs: Kwargs) -> Flow<Value> {
    unary_math("log10", args, kwargs, f64::log10, |x| !(x <= 0.0))
}

fn math_log2(_: &mut Interp, args: Vec<Value>, kwargs: Kwargs) -> Flow<Value> {
    unary_math("log2", args, kwargs, f64::log2, |x| !(x <= 0.0))
}

fn math_sin(_: &mut Interp, args: Vec<Value>, kwargs: Kwargs) -> Flow<Value> {
    unary_math("sin", args, kwargs, f64::sin, |x| !x.is_infinite())
}

fn math_cos(_: &mut Interp, args: Vec<Value>, kwargs: Kwargs) -> Flow<Value> {
    unary_math("cos", args, kwargs, f64::cos, |x| !x.is_infinite())
}

fn math_tan(_: &mut Interp, args: Vec<Value>, kwargs: Kwargs) -> Flow<Value> {
    unary_math("tan", args, kwargs, f64::tan, |x| !x.is_infinite())
}

fn math_asin(_: &mut Interp, args: Vec<Value>, kwargs: Kwargs) -> Flow<Value> {
    unary_math("asin", args, kwargs, f64::asin, |x| !(x.abs() > 1.0))
}

fn math_acos(_: &mut Interp, args: Vec<Value>, kwargs: Kwargs) -> Flow<Value> {
    unary_math("acos", args, kwargs, f64::acos, |x| !(x.abs() > 1.0))
}

fn math_atan(_: &mut Interp, args: Vec<Value>, kwargs: Kwargs) -> Flow<Value> {
    unary_math("atan", args, kwargs, f64::atan, anywhere)
}

fn math_fabs(_: &mut Interp, args: Vec<Value>, kwargs: Kwargs) -> Flow<Value> {
    unary_math("fabs", args, kwargs, f64::abs, anywhere)
}

fn math_atan2(_: &mut Interp, args: Vec<Value>, kwargs: Kwargs) -> Flow<Value> {
    let [y, x] = exact::<2>("atan2", args, kwargs)?;
    Ok(Value::Float(float_arg(&y)?.atan2(float_arg(&x)?)))
}

fn math_hypot(_: &mut Interp, args: Vec<Value>, kwargs: Kwargs) -> Flow<Value> {
    let [x, y] = exact::<2>("hypot", args, kwargs)?;
    Ok(Value::Float(float_arg(&x)?.hypot(float_arg(&y)?)))
}

fn math_pow(_: &mut Interp, args: Vec<Value>, kwargs: Kwargs) -> Flow<Value> {
    let [x, y] = exact::<2>("pow", args, kwargs)?;
    let (x, y) = (float_arg(&x)?, float_arg(&y)?);
    if x == 0.0 && y < 0.0 {
        return Err(math_domain());
    }
    ops::float_pow(x, y).map(Value::Float)
}

fn rounding(name: &str, args: Vec<Value>, kwargs: Kwargs, f: fn(f64) -> f64) -> Flow<Value> {
    let [x] = exact::<1>(name, args, kwargs)?;
    if let Some(i) = x.as_int() {
        return Ok(Value::Int(i));
    }
    float_to_int(f(float_arg(&x)?)).map(Value::Int)
}

fn math_floor(_: &mut Interp, args: Vec<Value>, kwargs: Kwargs) -> Flow<Value> {
    rounding("floor", args, kwargs, f64::floor)
}

fn math_ceil(_: &mut Interp, args: Vec<Value>, kwargs: Kwargs) -> Flow<Value> {
    rounding("ceil", args, kwargs, f64::ceil)
}

fn math_trunc(_: &mut Interp, args: Vec<Value>, kwargs: Kwargs) -> Flow<Value> {
    rounding("trunc", args, kwargs, f64::trunc)
}

fn math_isnan(_: &mut Interp, args: Vec<Value>, kwargs: Kwargs) -> Flow<Value> {
    let [x] = exact::<1>("isnan", args, kwargs)?;
    Ok(Value::Bool(float_arg(&x)?.is_nan()))
}

fn math_isinf(_: &mut Interp, args: Vec<Value>, kwargs: Kwargs) -> Flow<Value> {
    let [x] = exact::<1>("isinf", args, kwargs)?;
    Ok(Value::Bool(float_arg(&x)?.is_infinite()))
}

fn math_isfinite(_: &mut Interp, args: Vec<Value>, kwargs: Kwargs) -> Flow<Value> {
    let [x] = exact::<1>("isfinite", args, kwargs)?;
    Ok(Value::Bool(float_arg(&x)?.is_finite()))
}

fn math_factorial(interp: &mut Interp, args: Vec<Value>, kwargs: Kwargs) -> Flow<Value> {
    let [n] = exact::<1>("factorial", args, kwargs)?;
    let n = int_arg(&n)?;
    if n < 0 {
        return Err(Unwind::error(
            "ValueError",
            "factorial() not defined for negative values",
        ));
    }
    let mut acc: i64 = 1;
    for i in 2..=n {
        interp.poll()?;
        acc = acc.checked_mul(i).ok_or_else(overflow)?;
    }
    Ok(Value::Int(acc))
}

fn math_gcd(_: &mut Interp, args: Vec<Value>, kwargs: Kwargs) -> Flow<Value> {
    no_kwargs("gcd", &kwargs)?;
    let mut acc: i64 = 0;
    for arg in &args {
        let mut b = int_arg(arg)?.checked_abs().ok_or_else(overflow)?;
        let mut a = acc;
        while b != 0 {
            let t = a % b;
            a = b;
            b = t;
        }
        acc = a;
    }
    Ok(Value::Int(acc))
}

fn time_sleep(interp: &mut Interp, args: Vec<Value>, kwargs: Kwargs) -> Flow<Value> {
    let [secs] = exact::<1>("sleep", args, kwargs)?;
    let secs = float_arg(&secs)?;
    if secs < 0.0 {
        return Err(Unwind::error("ValueError", "sleep length must be non-negative"));
    }
    let length = Duration::try_from_secs_f64(secs)
        .map_err(|_| Unwind::error("OverflowError", "sleep length is too large"))?;
    let deadline = Instant::now() + length;
    loop {
        interp.poll()?;
        let now = Instant::now();
        if now >= deadline {
            return Ok(Value::None);
        }
        std::thread::sleep((deadline - now).min(Duration::from_millis(10)));
    }
}

fn time_time(_: &mut Interp, args: Vec<Value>, kwargs: Kwargs) -> Flow<Value> {
    exact::<0>("time", args, kwargs)?;
    let elapsed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    Ok(Value::Float(elapsed.as_secs_f64()))
}

fn time_monotonic(_: &mut Interp, args: Vec<Value>, kwargs: Kwargs) -> Flow<Value> {
    exact::<0>("monotonic", args, kwargs)?;
    Ok(Value::Float(CLOCK_ORIGIN.elapsed().as_secs_f64()))
}
