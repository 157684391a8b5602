use std::collections::HashMap;
use std::rc::Rc;

use crate::cancel::CancelToken;
use crate::unit::{ExecutionFailure, Namespace, CANCEL_HANDLE_NAME};

use super::ast::{BinOp, Expr, FunctionDef, Handler, Stmt};
use super::builtins;
use super::ops::{self, PyIter};
use super::parser::MAX_NESTING;
use super::value::{Exception, Function, Kwargs, Value};

pub(crate) type Flow<T> = Result<T, Unwind>;

/// Nested `eval`/`exec` levels allowed per level of script recursion.
const NESTING_PER_CALL: usize = 8;

/// Non-local exits out of statement execution.
#[derive(Debug)]
pub(crate) enum Unwind {
    Exc(Rc<Exception>),
    /// The cancel token was observed; never caught by `except`.
    Cancelled,
    Return(Value),
    Break,
    Continue,
}

impl Unwind {
    pub fn error(kind: &'static str, message: impl Into<String>) -> Self {
        let message: String = message.into();
        Unwind::Exc(Rc::new(Exception::new(kind, vec![Value::from(message)])))
    }
}

pub(crate) fn type_error(message: impl Into<String>) -> Unwind {
    Unwind::error("TypeError", message)
}

pub(crate) fn overflow() -> Unwind {
    Unwind::error("OverflowError", "Python int too large to convert to C long")
}

pub(crate) fn recursion_error(message: &str) -> Unwind {
    Unwind::error("RecursionError", message.to_string())
}

struct Frame {
    def: Rc<FunctionDef>,
    locals: HashMap<String, Value>,
    comps: Vec<HashMap<String, Value>>,
}

pub(crate) struct Interp {
    globals: HashMap<String, Value>,
    calls: Vec<Frame>,
    module_comps: Vec<HashMap<String, Value>>,
    /// Exceptions currently being handled, innermost last.
    handling: Vec<Rc<Exception>>,
    cancel: CancelToken,
    recursion_limit: usize,
    /// Current and maximum nesting of `eval`/`exec` on the native stack.
    depth: usize,
    depth_limit: usize,
}

impl Interp {
    pub fn new(cancel: CancelToken, recursion_limit: usize) -> Self {
        let mut globals = HashMap::new();
        globals.insert(CANCEL_HANDLE_NAME.to_string(), Value::Cancel(cancel.clone()));
        Self {
            globals,
            calls: Vec::new(),
            module_comps: Vec::new(),
            handling: Vec::new(),
            cancel,
            recursion_limit,
            depth: 0,
            depth_limit: recursion_limit
                .saturating_mul(NESTING_PER_CALL)
                .saturating_add(MAX_NESTING),
        }
    }

    /// Runs a module body.
    pub fn run(&mut self, program: &[Stmt]) -> Result<(), ExecutionFailure> {
        match self.exec_block(program) {
            Ok(()) => Ok(()),
            Err(Unwind::Exc(exc)) => Err(ExecutionFailure::new(
                exc.kind,
                exc.message(),
                exc.arg_reprs(),
            )),
            Err(Unwind::Cancelled) => Err(ExecutionFailure::new(
                "CancelledError",
                "execution cancelled",
                vec!["'execution cancelled'".to_string()],
            )),
            Err(Unwind::Return(_)) => Err(syntax_failure("'return' outside function")),
            Err(Unwind::Break) => Err(syntax_failure("'break' outside loop")),
            Err(Unwind::Continue) => Err(syntax_failure("'continue' not properly in loop")),
        }
    }

    pub fn into_namespace(self) -> Namespace {
        self.globals
            .into_iter()
            .map(|(name, value)| {
                let binding = value.to_binding();
                (name, binding)
            })
            .collect()
    }

    pub fn poll(&self) -> Flow<()> {
        if self.cancel.is_cancelled() {
            Err(Unwind::Cancelled)
        } else {
            Ok(())
        }
    }

    fn comps(&self) -> &[HashMap<String, Value>] {
        match self.calls.last() {
            Some(frame) => &frame.comps,
            None => &self.module_comps,
        }
    }

    fn comps_mut(&mut self) -> &mut Vec<HashMap<String, Value>> {
        match self.calls.last_mut() {
            Some(frame) => &mut frame.comps,
            None => &mut self.module_comps,
        }
    }

    fn load(&self, name: &str) -> Flow<Value> {
        for scope in self.comps().iter().rev() {
            if let Some(value) = scope.get(name) {
                return Ok(value.clone());
            }
        }
        if let Some(frame) = self.calls.last() {
            if frame.def.locals.contains(name) {
                return frame.locals.get(name).cloned().ok_or_else(|| {
                    Unwind::error(
                        "UnboundLocalError",
                        format!("local variable '{name}' referenced before assignment"),
                    )
                });
            }
        }
        if let Some(value) = self.globals.get(name) {
            return Ok(value.clone());
        }
        builtins::lookup(name)
            .ok_or_else(|| Unwind::error("NameError", format!("name '{name}' is not defined")))
    }

    fn store(&mut self, name: &str, value: Value) {
        match self.calls.last_mut() {
            Some(frame) if frame.def.locals.contains(name) => {
                frame.locals.insert(name.to_string(), value);
            }
            _ => {
                self.globals.insert(name.to_string(), value);
            }
        }
    }

    fn unbind(&mut self, name: &str) -> Option<Value> {
        match self.calls.last_mut() {
            Some(frame) if frame.def.locals.contains(name) => frame.locals.remove(name),
            _ => self.globals.remove(name),
        }
    }

    fn exec_block(&mut self, body: &[Stmt]) -> Flow<()> {
        for stmt in body {
            self.exec(stmt)?;
        }
        Ok(())
    }

    fn enter(&mut self) -> Flow<()> {
        if self.depth >= self.depth_limit {
            return Err(recursion_error("maximum recursion depth exceeded"));
        }
        self.depth += 1;
        Ok(())
    }

    fn exec(&mut self, stmt: &Stmt) -> Flow<()> {
        self.enter()?;
        let result = self.exec_stmt(stmt);
        self.depth -= 1;
        result
    }

    fn exec_stmt(&mut self, stmt: &Stmt) -> Flow<()> {
        match stmt {
            Stmt::Expr(expr) => {
                self.eval(expr)?;
            }
            Stmt::Assign { targets, value } => {
                let value = self.eval(value)?;
                for target in targets {
                    self.assign(target, value.clone())?;
                }
            }
            Stmt::AugAssign { target, op, value } => self.exec_aug_assign(target, *op, value)?,
            Stmt::If { test, body, orelse } => {
                if self.eval(test)?.truthy() {
                    self.exec_block(body)?;
                } else {
                    self.exec_block(orelse)?;
                }
            }
            Stmt::While { test, body, orelse } => loop {
                self.poll()?;
                if !self.eval(test)?.truthy() {
                    self.exec_block(orelse)?;
                    break;
                }
                match self.exec_block(body) {
                    Ok(()) | Err(Unwind::Continue) => {}
                    Err(Unwind::Break) => break,
                    Err(other) => return Err(other),
                }
            },
            Stmt::For {
                target,
                iter,
                body,
                orelse,
            } => {
                let iterable = self.eval(iter)?;
                let items = ops::iterate(&iterable)?;
                let mut broke = false;
                for item in items {
                    self.poll()?;
                    self.assign(target, item)?;
                    match self.exec_block(body) {
                        Ok(()) | Err(Unwind::Continue) => {}
                        Err(Unwind::Break) => {
                            broke = true;
                            break;
                        }
                        Err(other) => return Err(other),
                    }
                }
                if !broke {
                    self.exec_block(orelse)?;
                }
            }
            Stmt::Break => return Err(Unwind::Break),
            Stmt::Continue => return Err(Unwind::Continue),
            Stmt::Pass | Stmt::Global(_) => {}
            Stmt::Return(value) => {
                let value = match value {
                    Some(expr) => self.eval(expr)?,
                    None => Value::None,
                };
                return Err(Unwind::Return(value));
            }
            Stmt::Raise(expr) => return Err(self.raise(expr.as_ref())?),
            Stmt::Del(targets) => {
                for target in targets {
                    self.delete(target)?;
                }
            }
            Stmt::Import(modules) => {
                for (module, alias) in modules {
                    let module = builtins::module(module).ok_or_else(|| {
                        Unwind::error("ModuleNotFoundError", format!("No module named '{module}'"))
                    })?;
                    self.store(alias, module);
                }
            }
            Stmt::FunctionDef(def) => {
                let mut defaults = Vec::new();
                for param in &def.params {
                    if let Some(default) = &param.default {
                        defaults.push(self.eval(default)?);
                    }
                }
                let function = Function {
                    def: def.clone(),
                    defaults,
                };
                self.store(&def.name, Value::Function(Rc::new(function)));
            }
            Stmt::Try {
                body,
                handlers,
                orelse,
                finalbody,
            } => self.exec_try(body, handlers, orelse, finalbody)?,
        }
        Ok(())
    }

    fn exec_aug_assign(&mut self, target: &Expr, op: BinOp, value: &Expr) -> Flow<()> {
        match target {
            Expr::Name(name) => {
                let current = self.load(name)?;
                let rhs = self.eval(value)?;
                let updated = self.inplace(op, current, &rhs)?;
                self.store(name, updated);
                Ok(())
            }
            Expr::Subscript(obj, index) => {
                let obj = self.eval(obj)?;
                let index = self.eval(index)?;
                let current = ops::get_item(&obj, &index)?;
                let rhs = self.eval(value)?;
                let updated = self.inplace(op, current, &rhs)?;
                ops::set_item(&obj, index, updated)
            }
            Expr::Attribute(obj, attr) => {
                let obj = self.eval(obj)?;
                Err(attribute_readonly(&obj, attr))
            }
            _ => Err(Unwind::error("SyntaxError", "illegal expression for augmented assignment")),
        }
    }

    /// `a op= b`; lists extend in place.
    fn inplace(&mut self, op: BinOp, current: Value, rhs: &Value) -> Flow<Value> {
        if let (BinOp::Add, Value::List(items)) = (op, &current) {
            let extra = ops::collect(rhs)?;
            items.borrow_mut().extend(extra);
            return Ok(current);
        }
        ops::binary(op, &current, rhs)
    }

    fn raise(&mut self, expr: Option<&Expr>) -> Flow<Unwind> {
        let Some(expr) = expr else {
            return Ok(match self.handling.last() {
                Some(exc) => Unwind::Exc(exc.clone()),
                None => Unwind::error("RuntimeError", "No active exception to reraise"),
            });
        };
        Ok(match self.eval(expr)? {
            Value::Exception(exc) => Unwind::Exc(exc),
            Value::ExcType(kind) => Unwind::Exc(Rc::new(Exception::new(kind, Vec::new()))),
            _ => type_error("exceptions must derive from BaseException"),
        })
    }

    fn exec_try(
        &mut self,
        body: &[Stmt],
        handlers: &[Handler],
        orelse: &[Stmt],
        finalbody: &[Stmt],
    ) -> Flow<()> {
        let mut result = self.exec_block(body);
        match &result {
            Err(Unwind::Exc(exc)) => {
                let exc = exc.clone();
                if let Some(handled) = self.run_handlers(&exc, handlers) {
                    result = handled;
                }
            }
            Ok(()) => result = self.exec_block(orelse),
            Err(_) => {}
        }
        // Cancellation skips cleanup so that a stopped unit unwinds promptly.
        if !finalbody.is_empty() && !matches!(result, Err(Unwind::Cancelled)) {
            self.exec_block(finalbody)?;
        }
        result
    }

    /// Runs the first matching handler; `None` when no handler matches.
    fn run_handlers(&mut self, exc: &Rc<Exception>, handlers: &[Handler]) -> Option<Flow<()>> {
        for handler in handlers {
            let matched = match &handler.kind {
                None => true,
                Some(kind) => match self.eval(kind).and_then(|kind| exception_matches(exc, &kind)) {
                    Ok(matched) => matched,
                    Err(err) => return Some(Err(err)),
                },
            };
            if !matched {
                continue;
            }

            if let Some(name) = &handler.name {
                self.store(name, Value::Exception(exc.clone()));
            }
            self.handling.push(exc.clone());
            let result = self.exec_block(&handler.body);
            self.handling.pop();
            if let Some(name) = &handler.name {
                self.unbind(name);
            }
            return Some(result);
        }
        None
    }

    fn assign(&mut self, target: &Expr, value: Value) -> Flow<()> {
        match target {
            Expr::Name(name) => {
                self.store(name, value);
                Ok(())
            }
            Expr::Tuple(targets) | Expr::List(targets) => {
                let items = unpack(&value, targets.len())?;
                for (target, item) in targets.iter().zip(items) {
                    self.assign(target, item)?;
                }
                Ok(())
            }
            Expr::Subscript(obj, index) => {
                let obj = self.eval(obj)?;
                if let Expr::Slice(..) = **index {
                    return Err(type_error("slice assignment is not supported"));
                }
                let index = self.eval(index)?;
                ops::set_item(&obj, index, value)
            }
            Expr::Attribute(obj, attr) => {
                let obj = self.eval(obj)?;
                Err(attribute_readonly(&obj, attr))
            }
            _ => Err(Unwind::error("SyntaxError", "cannot assign to expression")),
        }
    }

    fn assign_comp(&mut self, target: &Expr, value: Value) -> Flow<()> {
        match target {
            Expr::Name(name) => {
                if let Some(scope) = self.comps_mut().last_mut() {
                    scope.insert(name.clone(), value);
                }
                Ok(())
            }
            Expr::Tuple(targets) | Expr::List(targets) => {
                let items = unpack(&value, targets.len())?;
                for (target, item) in targets.iter().zip(items) {
                    self.assign_comp(target, item)?;
                }
                Ok(())
            }
            other => self.assign(other, value),
        }
    }

    fn delete(&mut self, target: &Expr) -> Flow<()> {
        match target {
            Expr::Name(name) => self
                .unbind(name)
                .map(|_| ())
                .ok_or_else(|| Unwind::error("NameError", format!("name '{name}' is not defined"))),
            Expr::Tuple(targets) | Expr::List(targets) => {
                for target in targets {
                    self.delete(target)?;
                }
                Ok(())
            }
            Expr::Subscript(obj, index) => {
                let obj = self.eval(obj)?;
                let index = self.eval(index)?;
                ops::del_item(&obj, &index)
            }
            Expr::Attribute(obj, attr) => {
                let obj = self.eval(obj)?;
                Err(attribute_readonly(&obj, attr))
            }
            _ => Err(Unwind::error("SyntaxError", "cannot delete expression")),
        }
    }

    pub fn eval(&mut self, expr: &Expr) -> Flow<Value> {
        self.enter()?;
        let result = self.eval_expr(expr);
        self.depth -= 1;
        result
    }

    fn eval_expr(&mut self, expr: &Expr) -> Flow<Value> {
        match expr {
            Expr::None => Ok(Value::None),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Int(i) => Ok(Value::Int(*i)),
            Expr::Float(f) => Ok(Value::Float(*f)),
            Expr::Str(s) => Ok(Value::Str(s.clone())),
            Expr::Name(name) => self.load(name),
            Expr::List(items) => Ok(Value::new_list(self.eval_all(items)?)),
            Expr::Tuple(items) => Ok(Value::new_tuple(self.eval_all(items)?)),
            Expr::Dict(entries) => {
                let dict = Value::new_dict(Vec::new());
                if let Value::Dict(map) = &dict {
                    for (key, value) in entries {
                        let key = self.eval(key)?;
                        let value = self.eval(value)?;
                        ops::dict_set(map, key, value)?;
                    }
                }
                Ok(dict)
            }
            Expr::Unary(op, operand) => {
                let operand = self.eval(operand)?;
                ops::unary(*op, &operand)
            }
            Expr::Binary(op, left, right) => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                ops::binary(*op, &left, &right)
            }
            Expr::And(left, right) => {
                let left = self.eval(left)?;
                if left.truthy() {
                    self.eval(right)
                } else {
                    Ok(left)
                }
            }
            Expr::Or(left, right) => {
                let left = self.eval(left)?;
                if left.truthy() {
                    Ok(left)
                } else {
                    self.eval(right)
                }
            }
            Expr::Not(operand) => Ok(Value::Bool(!self.eval(operand)?.truthy())),
            Expr::Compare(first, rest) => {
                let mut left = self.eval(first)?;
                for (op, right) in rest {
                    let right = self.eval(right)?;
                    if !ops::compare(*op, &left, &right)? {
                        return Ok(Value::Bool(false));
                    }
                    left = right;
                }
                Ok(Value::Bool(true))
            }
            Expr::IfExp { test, body, orelse } => {
                if self.eval(test)?.truthy() {
                    self.eval(body)
                } else {
                    self.eval(orelse)
                }
            }
            Expr::Call { func, args, kwargs } => {
                let func = self.eval(func)?;
                let args = self.eval_all(args)?;
                let mut evaluated = Vec::with_capacity(kwargs.len());
                for (name, value) in kwargs {
                    evaluated.push((name.clone(), self.eval(value)?));
                }
                self.call(&func, args, evaluated)
            }
            Expr::Attribute(obj, attr) => {
                let obj = self.eval(obj)?;
                get_attr(obj, attr)
            }
            Expr::Subscript(obj, index) => {
                let obj = self.eval(obj)?;
                if let Expr::Slice(lower, upper, step) = &**index {
                    let lower = self.eval_optional(lower.as_deref())?;
                    let upper = self.eval_optional(upper.as_deref())?;
                    let step = self.eval_optional(step.as_deref())?;
                    return ops::get_slice(&obj, &lower, &upper, &step);
                }
                let index = self.eval(index)?;
                ops::get_item(&obj, &index)
            }
            Expr::Slice(..) => Err(Unwind::error("SyntaxError", "invalid syntax")),
            Expr::ListComp {
                elt,
                target,
                iter,
                conds,
            } => {
                let iterable = self.eval(iter)?;
                let items = ops::iterate(&iterable)?;
                self.comps_mut().push(HashMap::new());
                let result = self.list_comp(elt, target, items, conds);
                self.comps_mut().pop();
                result
            }
        }
    }

    fn eval_all(&mut self, exprs: &[Expr]) -> Flow<Vec<Value>> {
        exprs.iter().map(|expr| self.eval(expr)).collect()
    }

    fn eval_optional(&mut self, expr: Option<&Expr>) -> Flow<Value> {
        match expr {
            Some(expr) => self.eval(expr),
            None => Ok(Value::None),
        }
    }

    fn list_comp(&mut self, elt: &Expr, target: &Expr, items: PyIter, conds: &[Expr]) -> Flow<Value> {
        let mut out = Vec::new();
        'items: for item in items {
            self.poll()?;
            self.assign_comp(target, item)?;
            for cond in conds {
                if !self.eval(cond)?.truthy() {
                    continue 'items;
                }
            }
            out.push(self.eval(elt)?);
        }
        Ok(Value::new_list(out))
    }

    pub fn call(&mut self, func: &Value, args: Vec<Value>, kwargs: Kwargs) -> Flow<Value> {
        self.poll()?;
        match func {
            Value::Function(function) => self.call_function(function, args, kwargs),
            Value::Builtin(builtin) => (builtin.func)(self, args, kwargs),
            Value::Method(receiver, name) => builtins::call_method(self, receiver, name, args, kwargs),
            Value::ExcType(kind) => {
                if !kwargs.is_empty() {
                    return Err(type_error(format!("{kind}() takes no keyword arguments")));
                }
                Ok(Value::Exception(Rc::new(Exception::new(*kind, args))))
            }
            other => Err(type_error(format!(
                "'{}' object is not callable",
                other.type_name()
            ))),
        }
    }

    fn call_function(&mut self, function: &Rc<Function>, args: Vec<Value>, kwargs: Kwargs) -> Flow<Value> {
        if self.calls.len() >= self.recursion_limit {
            return Err(recursion_error("maximum recursion depth exceeded"));
        }

        let def = &function.def;
        let params = &def.params;
        if args.len() > params.len() {
            return Err(type_error(format!(
                "{}() takes {} positional argument{} but {} {} given",
                def.name,
                params.len(),
                if params.len() == 1 { "" } else { "s" },
                args.len(),
                if args.len() == 1 { "was" } else { "were" },
            )));
        }

        let mut slots: Vec<Option<Value>> = args.into_iter().map(Some).collect();
        slots.resize(params.len(), None);
        for (name, value) in kwargs {
            match params.iter().position(|p| p.name == name) {
                Some(i) if slots[i].is_some() => {
                    return Err(type_error(format!(
                        "{}() got multiple values for argument '{}'",
                        def.name, name
                    )))
                }
                Some(i) => slots[i] = Some(value),
                None => {
                    return Err(type_error(format!(
                        "{}() got an unexpected keyword argument '{}'",
                        def.name, name
                    )))
                }
            }
        }

        let first_default = params.len() - function.defaults.len();
        let mut locals = HashMap::new();
        let mut missing = Vec::new();
        for (i, (param, slot)) in params.iter().zip(slots).enumerate() {
            let value = match slot {
                Some(value) => value,
                None if i >= first_default => function.defaults[i - first_default].clone(),
                None => {
                    missing.push(format!("'{}'", param.name));
                    continue;
                }
            };
            locals.insert(param.name.clone(), value);
        }
        if !missing.is_empty() {
            let names = match missing.split_last() {
                Some((last, rest)) if !rest.is_empty() => format!("{} and {}", rest.join(", "), last),
                _ => missing.join(""),
            };
            return Err(type_error(format!(
                "{}() missing {} required positional argument{}: {}",
                def.name,
                missing.len(),
                if missing.len() == 1 { "" } else { "s" },
                names
            )));
        }

        self.calls.push(Frame {
            def: def.clone(),
            locals,
            comps: Vec::new(),
        });
        let result = self.exec_block(&def.body);
        self.calls.pop();

        match result {
            Ok(()) => Ok(Value::None),
            Err(Unwind::Return(value)) => Ok(value),
            Err(Unwind::Break) => Err(Unwind::error("SyntaxError", "'break' outside loop")),
            Err(Unwind::Continue) => Err(Unwind::error(
                "SyntaxError",
                "'continue' not properly in loop",
            )),
            Err(other) => Err(other),
        }
    }
}

fn syntax_failure(message: &str) -> ExecutionFailure {
    ExecutionFailure::new(
        "SyntaxError",
        message,
        vec![super::value::py_repr_str(message)],
    )
}

fn attribute_readonly(obj: &Value, attr: &str) -> Unwind {
    match obj {
        Value::Cancel(_) if attr == "value" => {
            Unwind::error("AttributeError", "the cancellation handle is read-only")
        }
        other => Unwind::error(
            "AttributeError",
            format!(
                "'{}' object attribute '{}' is read-only",
                other.type_name(),
                attr
            ),
        ),
    }
}

fn get_attr(obj: Value, attr: &str) -> Flow<Value> {
    match (&obj, attr) {
        (Value::Cancel(token), "value") => Ok(Value::Int(token.is_cancelled() as i64)),
        (Value::Exception(exc), "args") => Ok(Value::new_tuple(exc.args.clone())),
        (Value::Module(module), _) => builtins::module_attr(module, attr).ok_or_else(|| {
            Unwind::error(
                "AttributeError",
                format!("module '{module}' has no attribute '{attr}'"),
            )
        }),
        _ => match builtins::method_name(&obj, attr) {
            Some(name) => Ok(Value::Method(Rc::new(obj), name)),
            None => Err(Unwind::error(
                "AttributeError",
                format!("'{}' object has no attribute '{}'", obj.type_name(), attr),
            )),
        },
    }
}

fn exception_matches(exc: &Exception, kind: &Value) -> Flow<bool> {
    // Nested tuples are walked in order without recursion.
    let mut pending = vec![kind];
    while let Some(kind) = pending.pop() {
        match kind {
            Value::ExcType(parent) => {
                if builtins::is_subclass(exc.kind, parent) {
                    return Ok(true);
                }
            }
            Value::Tuple(kinds) => pending.extend(kinds.iter().rev()),
            _ => {
                return Err(type_error(
                    "catching classes that do not inherit from BaseException is not allowed",
                ))
            }
        }
    }
    Ok(false)
}

fn unpack(value: &Value, expected: usize) -> Flow<Vec<Value>> {
    let items = ops::collect(value).map_err(|err| match err {
        Unwind::Exc(exc) if exc.kind == "TypeError" => type_error(format!(
            "cannot unpack non-iterable {} object",
            value.type_name()
        )),
        other => other,
    })?;
    match items.len().cmp(&expected) {
        std::cmp::Ordering::Less => Err(Unwind::error(
            "ValueError",
            format!(
                "not enough values to unpack (expected {}, got {})",
                expected,
                items.len()
            ),
        )),
        std::cmp::Ordering::Greater => Err(Unwind::error(
            "ValueError",
            format!("too many values to unpack (expected {expected})"),
        )),
        std::cmp::Ordering::Equal => Ok(items),
    }
}
