//! Operators, subscripts and iteration over script values.

use std::cmp::Ordering;
use std::rc::Rc;

use super::ast::{BinOp, CmpOp, UnaryOp};
use super::interp::{overflow, type_error, Flow, Unwind};
use super::value::{
    is_same, position_of, py_cmp, py_eq, range_len, Comparison, Dict, Exception, Value,
};

/// Longest sequence a script may materialise at once.
const MAX_MATERIALIZED: i64 = 50_000_000;

pub(crate) enum PyIter {
    Range { next: i64, stop: i64, step: i64 },
    Items(std::vec::IntoIter<Value>),
}

impl Iterator for PyIter {
    type Item = Value;

    fn next(&mut self) -> Option<Value> {
        match self {
            PyIter::Range { next, stop, step } => {
                let more = if *step > 0 { *next < *stop } else { *next > *stop };
                if !more {
                    return None;
                }
                let current = *next;
                *next = next.checked_add(*step).unwrap_or(*stop);
                Some(Value::Int(current))
            }
            PyIter::Items(items) => items.next(),
        }
    }
}

pub(crate) fn iterate(value: &Value) -> Flow<PyIter> {
    let items = match value {
        Value::Range { start, stop, step } => {
            return Ok(PyIter::Range {
                next: *start,
                stop: *stop,
                step: *step,
            })
        }
        Value::List(items) => items.borrow().clone(),
        Value::Tuple(items) => items.to_vec(),
        Value::Str(s) => s.chars().map(|c| Value::from(c.to_string())).collect(),
        Value::Dict(entries) => entries.borrow().iter().map(|(k, _)| k.clone()).collect(),
        other => {
            return Err(type_error(format!(
                "'{}' object is not iterable",
                other.type_name()
            )))
        }
    };
    Ok(PyIter::Items(items.into_iter()))
}

/// Materialises an iterable into a vector.
pub(crate) fn collect(value: &Value) -> Flow<Vec<Value>> {
    if matches!(value, Value::Range { .. }) && range_len(value) > MAX_MATERIALIZED {
        return Err(Unwind::error("MemoryError", ""));
    }
    Ok(iterate(value)?.collect())
}

fn zero_division(message: &str) -> Unwind {
    Unwind::error("ZeroDivisionError", message)
}

fn unsupported(op: BinOp, a: &Value, b: &Value) -> Unwind {
    type_error(format!(
        "unsupported operand type(s) for {}: '{}' and '{}'",
        op.symbol(),
        a.type_name(),
        b.type_name()
    ))
}

pub(crate) fn binary(op: BinOp, a: &Value, b: &Value) -> Flow<Value> {
    if let (Value::Bool(p), Value::Bool(q)) = (a, b) {
        match op {
            BinOp::BitAnd => return Ok(Value::Bool(p & q)),
            BinOp::BitOr => return Ok(Value::Bool(p | q)),
            BinOp::BitXor => return Ok(Value::Bool(p ^ q)),
            _ => {}
        }
    }
    if let (Some(x), Some(y)) = (a.as_int(), b.as_int()) {
        return int_op(op, x, y);
    }
    if let (Some(x), Some(y)) = (a.as_float(), b.as_float()) {
        return float_op(op, x, y).unwrap_or_else(|| Err(unsupported(op, a, b)));
    }

    match (op, a, b) {
        (BinOp::Add, Value::Str(x), Value::Str(y)) => {
            let mut joined = String::with_capacity(x.len() + y.len());
            joined.push_str(x);
            joined.push_str(y);
            Ok(Value::from(joined))
        }
        (BinOp::Add, Value::List(x), Value::List(y)) => {
            let mut items = x.borrow().clone();
            items.extend(y.borrow().iter().cloned());
            Ok(Value::new_list(items))
        }
        (BinOp::Add, Value::Tuple(x), Value::Tuple(y)) => {
            let mut items = x.to_vec();
            items.extend(y.iter().cloned());
            Ok(Value::new_tuple(items))
        }
        (BinOp::Add, Value::Str(_) | Value::List(_) | Value::Tuple(_), other) => {
            Err(type_error(format!(
                "can only concatenate {} (not \"{}\") to {}",
                a.type_name(),
                other.type_name(),
                a.type_name()
            )))
        }
        (BinOp::Mul, seq, count) | (BinOp::Mul, count, seq) if count.as_int().is_some() => {
            repeat(seq, count.as_int().unwrap_or(0)).ok_or_else(|| unsupported(op, a, b))?
        }
        _ => Err(unsupported(op, a, b)),
    }
}

/// `seq * count`; `None` when `seq` is not a sequence.
fn repeat(seq: &Value, count: i64) -> Option<Flow<Value>> {
    let count = count.max(0) as usize;
    let len = match seq {
        Value::Str(s) => s.len(),
        Value::List(items) => items.borrow().len(),
        Value::Tuple(items) => items.len(),
        _ => return None,
    };
    if len.saturating_mul(count) > MAX_MATERIALIZED as usize {
        return Some(Err(Unwind::error("MemoryError", "")));
    }
    Some(Ok(match seq {
        Value::Str(s) => Value::from(s.repeat(count)),
        Value::List(items) => {
            let items = items.borrow();
            Value::new_list(items.iter().cloned().cycle().take(len * count).collect())
        }
        Value::Tuple(items) => {
            Value::new_tuple(items.iter().cloned().cycle().take(len * count).collect())
        }
        _ => return None,
    }))
}

fn floor_div(x: i64, y: i64) -> Option<i64> {
    let q = x.checked_div(y)?;
    if x % y != 0 && ((x < 0) != (y < 0)) {
        q.checked_sub(1)
    } else {
        Some(q)
    }
}

fn floor_mod(x: i64, y: i64) -> i64 {
    let r = x.wrapping_rem(y);
    if r != 0 && ((r < 0) != (y < 0)) {
        r + y
    } else {
        r
    }
}

fn int_op(op: BinOp, x: i64, y: i64) -> Flow<Value> {
    let checked = |r: Option<i64>| r.map(Value::Int).ok_or_else(overflow);
    match op {
        BinOp::Add => checked(x.checked_add(y)),
        BinOp::Sub => checked(x.checked_sub(y)),
        BinOp::Mul => checked(x.checked_mul(y)),
        BinOp::Div => {
            if y == 0 {
                return Err(zero_division("division by zero"));
            }
            Ok(Value::Float(x as f64 / y as f64))
        }
        BinOp::FloorDiv => {
            if y == 0 {
                return Err(zero_division("integer division or modulo by zero"));
            }
            checked(floor_div(x, y))
        }
        BinOp::Mod => {
            if y == 0 {
                return Err(zero_division("integer division or modulo by zero"));
            }
            Ok(Value::Int(floor_mod(x, y)))
        }
        BinOp::Pow => int_pow(x, y),
        BinOp::BitAnd => Ok(Value::Int(x & y)),
        BinOp::BitOr => Ok(Value::Int(x | y)),
        BinOp::BitXor => Ok(Value::Int(x ^ y)),
        BinOp::LShift => {
            if y < 0 {
                return Err(Unwind::error("ValueError", "negative shift count"));
            }
            if x == 0 {
                return Ok(Value::Int(0));
            }
            if y >= 64 || (x << y) >> y != x {
                return Err(overflow());
            }
            Ok(Value::Int(x << y))
        }
        BinOp::RShift => {
            if y < 0 {
                return Err(Unwind::error("ValueError", "negative shift count"));
            }
            if y >= 64 {
                return Ok(Value::Int(if x < 0 { -1 } else { 0 }));
            }
            Ok(Value::Int(x >> y))
        }
    }
}

fn int_pow(x: i64, y: i64) -> Flow<Value> {
    if y < 0 {
        if x == 0 {
            return Err(zero_division("0.0 cannot be raised to a negative power"));
        }
        return Ok(Value::Float((x as f64).powf(y as f64)));
    }
    match u32::try_from(y) {
        Ok(exp) => x.checked_pow(exp).map(Value::Int).ok_or_else(overflow),
        Err(_) => match x {
            0 | 1 => Ok(Value::Int(x)),
            -1 => Ok(Value::Int(if y % 2 == 0 { 1 } else { -1 })),
            _ => Err(overflow()),
        },
    }
}

/// Float arithmetic; `None` for operators floats do not support.
fn float_op(op: BinOp, x: f64, y: f64) -> Option<Flow<Value>> {
    let result = match op {
        BinOp::Add => Ok(x + y),
        BinOp::Sub => Ok(x - y),
        BinOp::Mul => Ok(x * y),
        BinOp::Div if y == 0.0 => Err(zero_division("float division by zero")),
        BinOp::Div => Ok(x / y),
        BinOp::FloorDiv if y == 0.0 => Err(zero_division("float floor division by zero")),
        BinOp::FloorDiv => Ok((x / y).floor()),
        BinOp::Mod if y == 0.0 => Err(zero_division("float modulo")),
        BinOp::Mod => {
            let r = x % y;
            Ok(if r != 0.0 && ((r < 0.0) != (y < 0.0)) { r + y } else { r })
        }
        BinOp::Pow => float_pow(x, y),
        _ => return None,
    };
    Some(result.map(Value::Float))
}

pub(crate) fn float_pow(x: f64, y: f64) -> Flow<f64> {
    if x == 0.0 && y < 0.0 {
        return Err(zero_division("0.0 cannot be raised to a negative power"));
    }
    if x < 0.0 && y.is_finite() && y.fract() != 0.0 {
        return Err(Unwind::error("ValueError", "math domain error"));
    }
    let r = x.powf(y);
    if r.is_infinite() && x.is_finite() && y.is_finite() {
        return Err(Unwind::error(
            "OverflowError",
            "(34, 'Numerical result out of range')",
        ));
    }
    Ok(r)
}

pub(crate) fn unary(op: UnaryOp, value: &Value) -> Flow<Value> {
    let symbol = match op {
        UnaryOp::Neg => "-",
        UnaryOp::Pos => "+",
        UnaryOp::Invert => "~",
    };
    match (op, value) {
        (UnaryOp::Neg, Value::Float(f)) => Ok(Value::Float(-f)),
        (UnaryOp::Pos, Value::Float(f)) => Ok(Value::Float(*f)),
        (_, v) if v.as_int().is_some() => {
            let i = v.as_int().unwrap_or(0);
            match op {
                UnaryOp::Neg => i.checked_neg().map(Value::Int).ok_or_else(overflow),
                UnaryOp::Pos => Ok(Value::Int(i)),
                UnaryOp::Invert => Ok(Value::Int(!i)),
            }
        }
        (_, v) => Err(type_error(format!(
            "bad operand type for unary {}: '{}'",
            symbol,
            v.type_name()
        ))),
    }
}

pub(crate) fn compare(op: CmpOp, a: &Value, b: &Value) -> Flow<bool> {
    match op {
        CmpOp::Eq => py_eq(a, b),
        CmpOp::NotEq => py_eq(a, b).map(|equal| !equal),
        CmpOp::Is => Ok(is_same(a, b)),
        CmpOp::IsNot => Ok(!is_same(a, b)),
        CmpOp::In => contains(b, a),
        CmpOp::NotIn => contains(b, a).map(|found| !found),
        CmpOp::Lt | CmpOp::LtE | CmpOp::Gt | CmpOp::GtE => {
            let symbol = match op {
                CmpOp::Lt => "<",
                CmpOp::LtE => "<=",
                CmpOp::Gt => ">",
                _ => ">=",
            };
            match py_cmp(a, b)? {
                Comparison::Ordered(ord) => Ok(match op {
                    CmpOp::Lt => ord == Ordering::Less,
                    CmpOp::LtE => ord != Ordering::Greater,
                    CmpOp::Gt => ord == Ordering::Greater,
                    _ => ord != Ordering::Less,
                }),
                Comparison::Unordered => Ok(false),
                Comparison::Unsupported => Err(not_orderable(symbol, a, b)),
            }
        }
    }
}

fn not_orderable(symbol: &str, a: &Value, b: &Value) -> Unwind {
    type_error(format!(
        "'{}' not supported between instances of '{}' and '{}'",
        symbol,
        a.type_name(),
        b.type_name()
    ))
}

/// Total order used by sorting; incomparable numbers count as equal.
pub(crate) fn sort_order(a: &Value, b: &Value) -> Flow<Ordering> {
    match py_cmp(a, b)? {
        Comparison::Ordered(ord) => Ok(ord),
        Comparison::Unordered => Ok(Ordering::Equal),
        Comparison::Unsupported => Err(not_orderable("<", a, b)),
    }
}

pub(crate) fn contains(container: &Value, item: &Value) -> Flow<bool> {
    match container {
        Value::List(items) => Ok(position_of(&items.borrow(), item)?.is_some()),
        Value::Tuple(items) => Ok(position_of(items, item)?.is_some()),
        Value::Str(s) => match item {
            Value::Str(sub) => Ok(s.contains(&**sub)),
            other => Err(type_error(format!(
                "'in <string>' requires string as left operand, not {}",
                other.type_name()
            ))),
        },
        Value::Dict(entries) => Ok(dict_get(entries, item)?.is_some()),
        Value::Range { start, stop, step } => Ok(match item.as_int() {
            Some(i) => {
                let in_bounds = if *step > 0 {
                    *start <= i && i < *stop
                } else {
                    *stop < i && i <= *start
                };
                in_bounds && (i as i128 - *start as i128) % (*step as i128) == 0
            }
            None => false,
        }),
        other => Err(type_error(format!(
            "argument of type '{}' is not iterable",
            other.type_name()
        ))),
    }
}

fn normalize_index(index: &Value, len: usize, kind: &str, out_of_range: &str) -> Flow<usize> {
    let i = index.as_int().ok_or_else(|| {
        type_error(format!(
            "{} indices must be integers or slices, not {}",
            kind,
            index.type_name()
        ))
    })?;
    let len = len as i64;
    let i = if i < 0 { i + len } else { i };
    if i < 0 || i >= len {
        return Err(Unwind::error("IndexError", out_of_range));
    }
    Ok(i as usize)
}

fn key_error(key: &Value) -> Unwind {
    Unwind::Exc(Rc::new(Exception::new("KeyError", vec![key.clone()])))
}

pub(crate) fn get_item(obj: &Value, index: &Value) -> Flow<Value> {
    match obj {
        Value::List(items) => {
            let items = items.borrow();
            let i = normalize_index(index, items.len(), "list", "list index out of range")?;
            Ok(items[i].clone())
        }
        Value::Tuple(items) => {
            let i = normalize_index(index, items.len(), "tuple", "tuple index out of range")?;
            Ok(items[i].clone())
        }
        Value::Str(s) => {
            let len = s.chars().count();
            let i = normalize_index(index, len, "string", "string index out of range")?;
            Ok(s.chars()
                .nth(i)
                .map(|c| Value::from(c.to_string()))
                .unwrap_or(Value::None))
        }
        Value::Dict(entries) => dict_get(entries, index)?.ok_or_else(|| key_error(index)),
        Value::Range { start, step, .. } => {
            let len = range_len(obj) as usize;
            let i = normalize_index(index, len, "range", "range object index out of range")?;
            Ok(Value::Int(start + step * i as i64))
        }
        other => Err(type_error(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

pub(crate) fn set_item(obj: &Value, index: Value, value: Value) -> Flow<()> {
    match obj {
        Value::List(items) => {
            let len = items.borrow().len();
            let i = normalize_index(&index, len, "list", "list assignment index out of range")?;
            items.borrow_mut()[i] = value;
            Ok(())
        }
        Value::Dict(entries) => dict_set(entries, index, value),
        other => Err(type_error(format!(
            "'{}' object does not support item assignment",
            other.type_name()
        ))),
    }
}

pub(crate) fn del_item(obj: &Value, index: &Value) -> Flow<()> {
    match obj {
        Value::List(items) => {
            let len = items.borrow().len();
            let i = normalize_index(index, len, "list", "list assignment index out of range")?;
            items.borrow_mut().remove(i);
            Ok(())
        }
        Value::Dict(entries) => dict_remove(entries, index)?
            .map(|_| ())
            .ok_or_else(|| key_error(index)),
        other => Err(type_error(format!(
            "'{}' object doesn't support item deletion",
            other.type_name()
        ))),
    }
}

fn slice_bound(value: &Value) -> Flow<Option<i64>> {
    match value {
        Value::None => Ok(None),
        other => other.as_int().map(Some).ok_or_else(|| {
            type_error("slice indices must be integers or None or have an __index__ method")
        }),
    }
}

fn slice_indices(len: usize, lower: Option<i64>, upper: Option<i64>, step: i64) -> Vec<usize> {
    let len = len as i64;
    let (start, stop) = if step > 0 {
        let clamp = |v: i64| if v < 0 { (v + len).max(0) } else { v.min(len) };
        (lower.map_or(0, clamp), upper.map_or(len, clamp))
    } else {
        let clamp = |v: i64| if v < 0 { (v + len).max(-1) } else { v.min(len - 1) };
        (lower.map_or(len - 1, clamp), upper.map_or(-1, clamp))
    };

    let mut picked = Vec::new();
    let mut i = start;
    while (step > 0 && i < stop) || (step < 0 && i > stop) {
        picked.push(i as usize);
        match i.checked_add(step) {
            Some(next) => i = next,
            None => break,
        }
    }
    picked
}

pub(crate) fn get_slice(obj: &Value, lower: &Value, upper: &Value, step: &Value) -> Flow<Value> {
    let step = slice_bound(step)?.unwrap_or(1);
    if step == 0 {
        return Err(Unwind::error("ValueError", "slice step cannot be zero"));
    }
    let (lower, upper) = (slice_bound(lower)?, slice_bound(upper)?);

    match obj {
        Value::List(items) => {
            let items = items.borrow();
            let picked = slice_indices(items.len(), lower, upper, step)
                .into_iter()
                .map(|i| items[i].clone())
                .collect();
            Ok(Value::new_list(picked))
        }
        Value::Tuple(items) => {
            let picked = slice_indices(items.len(), lower, upper, step)
                .into_iter()
                .map(|i| items[i].clone())
                .collect();
            Ok(Value::new_tuple(picked))
        }
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            let picked: String = slice_indices(chars.len(), lower, upper, step)
                .into_iter()
                .map(|i| chars[i])
                .collect();
            Ok(Value::from(picked))
        }
        Value::Range { .. } => {
            let items = collect(obj)?;
            let picked = slice_indices(items.len(), lower, upper, step)
                .into_iter()
                .map(|i| items[i].clone())
                .collect();
            Ok(Value::new_list(picked))
        }
        other => Err(type_error(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

fn check_hashable(key: &Value) -> Flow<()> {
    if key.is_hashable() {
        Ok(())
    } else {
        Err(type_error(format!("unhashable type: '{}'", key.type_name())))
    }
}

fn key_position(entries: &Dict, key: &Value) -> Flow<Option<usize>> {
    check_hashable(key)?;
    for (i, (candidate, _)) in entries.borrow().iter().enumerate() {
        if py_eq(candidate, key)? {
            return Ok(Some(i));
        }
    }
    Ok(None)
}

pub(crate) fn dict_get(entries: &Dict, key: &Value) -> Flow<Option<Value>> {
    let position = key_position(entries, key)?;
    Ok(position.map(|i| entries.borrow()[i].1.clone()))
}

pub(crate) fn dict_set(entries: &Dict, key: Value, value: Value) -> Flow<()> {
    let position = key_position(entries, &key)?;
    let mut entries = entries.borrow_mut();
    match position {
        Some(i) => entries[i].1 = value,
        None => entries.push((key, value)),
    }
    Ok(())
}

pub(crate) fn dict_remove(entries: &Dict, key: &Value) -> Flow<Option<Value>> {
    let position = key_position(entries, key)?;
    Ok(position.map(|i| entries.borrow_mut().remove(i).1))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int(i: i64) -> Value {
        Value::Int(i)
    }

    fn exc_kind(result: Flow<Value>) -> &'static str {
        match result {
            Err(Unwind::Exc(exc)) => exc.kind,
            _ => "no exception",
        }
    }

    #[test]
    fn test_floor_semantics() {
        assert!(py_eq(&binary(BinOp::FloorDiv, &int(-7), &int(2)).unwrap(), &int(-4)).unwrap());
        assert!(py_eq(&binary(BinOp::Mod, &int(-7), &int(2)).unwrap(), &int(1)).unwrap());
        assert!(py_eq(&binary(BinOp::Mod, &int(7), &int(-2)).unwrap(), &int(-1)).unwrap());
        let r = binary(BinOp::Mod, &Value::Float(-7.5), &int(2)).unwrap();
        assert!(py_eq(&r, &Value::Float(0.5)).unwrap());
    }

    #[test]
    fn test_true_division_yields_float() {
        let r = binary(BinOp::Div, &int(7), &int(2)).unwrap();
        assert!(matches!(r, Value::Float(f) if f == 3.5));
    }

    #[test]
    fn test_arithmetic_errors() {
        assert_eq!(exc_kind(binary(BinOp::Div, &int(1), &int(0))), "ZeroDivisionError");
        assert_eq!(exc_kind(binary(BinOp::Mul, &int(i64::MAX), &int(2))), "OverflowError");
        assert_eq!(exc_kind(binary(BinOp::Add, &int(1), &Value::from("a"))), "TypeError");
        assert_eq!(exc_kind(binary(BinOp::Pow, &int(10), &int(30))), "OverflowError");
    }

    #[test]
    fn test_sequence_ops() {
        let r = binary(BinOp::Mul, &Value::from("ab"), &int(3)).unwrap();
        assert_eq!(r.str(), "ababab");
        let r = binary(BinOp::Mul, &int(2), &Value::new_list(vec![int(1)])).unwrap();
        assert_eq!(r.repr(), "[1, 1]");
        let r = binary(BinOp::Add, &Value::new_tuple(vec![int(1)]), &Value::new_tuple(vec![int(2)])).unwrap();
        assert_eq!(r.repr(), "(1, 2)");
    }

    #[test]
    fn test_bool_bitwise_stays_bool() {
        let r = binary(BinOp::BitOr, &Value::Bool(true), &Value::Bool(false)).unwrap();
        assert!(matches!(r, Value::Bool(true)));
        let r = binary(BinOp::Add, &Value::Bool(true), &Value::Bool(true)).unwrap();
        assert!(matches!(r, Value::Int(2)));
    }

    #[test]
    fn test_slices() {
        let list = Value::new_list((0..6).map(Value::Int).collect());
        let s = get_slice(&list, &int(1), &int(-1), &Value::None).unwrap();
        assert_eq!(s.repr(), "[1, 2, 3, 4]");
        let s = get_slice(&list, &Value::None, &Value::None, &int(-2)).unwrap();
        assert_eq!(s.repr(), "[5, 3, 1]");
        let s = get_slice(&Value::from("hello"), &Value::None, &int(3), &Value::None).unwrap();
        assert_eq!(s.str(), "hel");
    }

    #[test]
    fn test_indexing() {
        let list = Value::new_list(vec![int(1), int(2)]);
        assert!(py_eq(&get_item(&list, &int(-1)).unwrap(), &int(2)).unwrap());
        assert_eq!(exc_kind(get_item(&list, &int(2))), "IndexError");
        let dict = Value::new_dict(vec![]);
        assert_eq!(exc_kind(get_item(&dict, &Value::from("k"))), "KeyError");
        assert_eq!(exc_kind(get_item(&int(1), &int(0))), "TypeError");
    }

    #[test]
    fn test_dict_keys_follow_equality() {
        let dict = Value::new_dict(vec![]);
        if let Value::Dict(entries) = &dict {
            dict_set(entries, int(1), Value::from("one")).unwrap();
            dict_set(entries, Value::Float(1.0), Value::from("uno")).unwrap();
            assert_eq!(entries.borrow().len(), 1);
            let key = Value::new_list(vec![]);
            assert!(dict_set(entries, key, Value::None).is_err());
        }
        assert_eq!(dict.repr(), "{1: 'uno'}");
    }

    #[test]
    fn test_membership() {
        let range = Value::Range {
            start: 0,
            stop: 10,
            step: 3,
        };
        assert!(contains(&range, &int(9)).unwrap());
        assert!(!contains(&range, &int(4)).unwrap());
        assert!(contains(&Value::from("hello"), &Value::from("ell")).unwrap());
        assert!(contains(&int(1), &int(1)).is_err());
    }

    #[test]
    fn test_range_iteration_stops_at_overflow() {
        let iter = iterate(&Value::Range {
            start: i64::MAX - 1,
            stop: i64::MAX,
            step: 5,
        })
        .unwrap();
        assert_eq!(iter.count(), 1);
    }
}
