//! Built-in execution capability: a small interpreter for the Python subset
//! produced by grammar-guided program synthesis.
//!
//! Programs run against a fresh module namespace seeded with the cancellation
//! handle `stop`. Loops, calls and `time.sleep` poll the handle, so a cancelled
//! unit unwinds at the next poll point without running `except` or `finally`
//! blocks.

mod ast;
mod builtins;
mod error;
mod interp;
mod lexer;
mod ops;
mod parser;
mod value;

use crate::cancel::CancelToken;
use crate::unit::{ExecutionCapability, ExecutionFailure, Namespace};

use interp::Interp;

pub const DEFAULT_RECURSION_LIMIT: usize = 1000;

#[derive(Debug, Clone)]
pub struct ScriptCapability {
    recursion_limit: usize,
}

impl Default for ScriptCapability {
    fn default() -> Self {
        Self {
            recursion_limit: DEFAULT_RECURSION_LIMIT,
        }
    }
}

impl ScriptCapability {
    pub fn new() -> Self {
        Self::default()
    }

    /// Maximum depth of nested function calls.
    ///
    /// Each level uses native stack, so hosts run units on threads with a
    /// large stack.
    pub fn with_recursion_limit(mut self, limit: usize) -> Self {
        self.recursion_limit = limit;
        self
    }
}

impl ExecutionCapability for ScriptCapability {
    fn execute(&self, payload: &str, cancel: &CancelToken) -> Result<Namespace, ExecutionFailure> {
        let program = parser::parse(payload)?;
        let mut interp = Interp::new(cancel.clone(), self.recursion_limit);
        interp.run(&program)?;
        Ok(interp.into_namespace())
    }
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::{Duration, Instant};

    use serde_json::{json, Value as Json};

    use super::*;
    use crate::unit::Binding;

    fn run(source: &str) -> Result<Namespace, ExecutionFailure> {
        run_with_stack(source, 64 * 1024 * 1024)
    }

    fn run_with_stack(source: &str, stack_size: usize) -> Result<Namespace, ExecutionFailure> {
        let source = source.to_string();
        thread::Builder::new()
            .stack_size(stack_size)
            .spawn(move || {
                ScriptCapability::new()
                    .with_recursion_limit(100)
                    .execute(&source, &CancelToken::new())
            })
            .unwrap()
            .join()
            .unwrap()
    }

    fn value(namespace: &Namespace, name: &str) -> Json {
        match namespace.get(name) {
            Some(Binding::Value(value)) => value.clone(),
            other => panic!("`{name}` is not a plain value: {other:?}"),
        }
    }

    fn failure(source: &str) -> String {
        match run(source) {
            Err(failure) => failure.to_string(),
            Ok(namespace) => panic!("expected a failure, got {namespace:?}"),
        }
    }

    #[test]
    fn test_simple_assignment() {
        let ns = run("a = 2 + 2").unwrap();
        assert_eq!(value(&ns, "a"), json!(4));
        assert_eq!(ns.get("stop"), Some(&Binding::CancelHandle));
    }

    #[test]
    fn test_raise_matches_python_rendering() {
        assert_eq!(
            failure("raise ValueError('x')"),
            "<class 'ValueError'> x ('x',)"
        );
        assert_eq!(
            failure("x = 1 / 0"),
            "<class 'ZeroDivisionError'> division by zero ('division by zero',)"
        );
        assert_eq!(
            failure("d = {}\nd['k']"),
            "<class 'KeyError'> 'k' ('k',)"
        );
        assert_eq!(
            failure("y = undefined"),
            "<class 'NameError'> name 'undefined' is not defined (\"name 'undefined' is not defined\",)"
        );
    }

    #[test]
    fn test_syntax_error_rendering() {
        assert_eq!(
            failure("x = = 1"),
            "<class 'SyntaxError'> invalid syntax (<string>, line 1) ('invalid syntax', ('<string>', 1, 'x = = 1'))"
        );
    }

    #[test]
    fn test_generated_program_shape() {
        let source = "\
loopBreakConst = 1500
def evolve():
  global res0, b0, i0
  loopBreak = 0
  rec_counter = 0
  while b0 and loopBreak < loopBreakConst and not stop.value:
    i0 = i0 + 1
    if i0 >= 10:
      b0 = False
    loopBreak += 1
  res0 = [x * 2 for x in range(i0) if x % 2 == 0]
b0 = True
i0 = 0
res0 = []
evolve()
";
        let ns = run(source).unwrap();
        assert_eq!(value(&ns, "i0"), json!(10));
        assert_eq!(value(&ns, "b0"), json!(false));
        assert_eq!(value(&ns, "res0"), json!([0, 4, 8, 12, 16]));
        assert_eq!(ns.get("evolve"), Some(&Binding::Callable));
        // Comprehension variables do not leak.
        assert!(!ns.contains_key("x"));
    }

    #[test]
    fn test_functions_and_recursion() {
        let source = "\
def fib(n):
    if n < 2:
        return n
    return fib(n - 1) + fib(n - 2)
def greet(name, greeting='hello'):
    return greeting + ' ' + name
a = fib(15)
b = greet('bob')
c = greet('amy', greeting='hi')
";
        let ns = run(source).unwrap();
        assert_eq!(value(&ns, "a"), json!(610));
        assert_eq!(value(&ns, "b"), json!("hello bob"));
        assert_eq!(value(&ns, "c"), json!("hi amy"));
    }

    #[test]
    fn test_recursion_limit() {
        let message = failure("def f(n):\n    return f(n + 1)\nf(0)\n");
        assert!(message.starts_with("<class 'RecursionError'> maximum recursion depth exceeded"));
    }

    #[test]
    fn test_default_recursion_limit_on_large_stack() {
        let handle = thread::Builder::new()
            .stack_size(64 * 1024 * 1024)
            .spawn(|| {
                ScriptCapability::new().execute(
                    "def depth(n):\n    if n == 0:\n        return 0\n    return 1 + depth(n - 1)\nd = depth(900)\n",
                    &CancelToken::new(),
                )
            })
            .unwrap();
        let ns = handle.join().unwrap().unwrap();
        assert_eq!(value(&ns, "d"), json!(900));
    }

    #[test]
    fn test_unbound_local() {
        let message = failure("x = 1\ndef f():\n    x = x + 1\nf()\n");
        assert!(message.starts_with("<class 'UnboundLocalError'>"));
    }

    #[test]
    fn test_try_except_finally() {
        let source = "\
log = []
try:
    log.append('body')
    int('nope')
except (KeyError, ValueError) as e:
    log.append('handled')
    msg = str(e)
else:
    log.append('else')
finally:
    log.append('finally')
";
        let ns = run(source).unwrap();
        assert_eq!(value(&ns, "log"), json!(["body", "handled", "finally"]));
        assert_eq!(
            value(&ns, "msg"),
            json!("invalid literal for int() with base 10: 'nope'")
        );
        assert!(!ns.contains_key("e"));
    }

    #[test]
    fn test_bare_raise_reraises() {
        let source = "try:\n    [][1]\nexcept IndexError:\n    raise\n";
        assert!(failure(source).starts_with("<class 'IndexError'> list index out of range"));
    }

    #[test]
    fn test_containers_and_methods() {
        let source = "\
xs = [3, 1, 2]
xs.sort()
ys = sorted(xs, reverse=True)
d = {'a': 1}
d['b'] = 2
keys = list(d.keys())
t = (1, 'two', None)
words = ' a  b c '.split()
joined = '-'.join(words)
pairs = list(zip([1, 2, 3], 'ab'))
total = sum([0.5, 1.5])
m = max([4, 9, 2])
a, b = 1, 2
a, b = b, a
";
        let ns = run(source).unwrap();
        assert_eq!(value(&ns, "xs"), json!([1, 2, 3]));
        assert_eq!(value(&ns, "ys"), json!([3, 2, 1]));
        assert_eq!(value(&ns, "d"), json!({"a": 1, "b": 2}));
        assert_eq!(value(&ns, "keys"), json!(["a", "b"]));
        assert_eq!(value(&ns, "t"), json!([1, "two", null]));
        assert_eq!(value(&ns, "words"), json!(["a", "b", "c"]));
        assert_eq!(value(&ns, "joined"), json!("a-b-c"));
        assert_eq!(value(&ns, "pairs"), json!([[1, "a"], [2, "b"]]));
        assert_eq!(value(&ns, "total"), json!(2.0));
        assert_eq!(value(&ns, "m"), json!(9));
        assert_eq!((value(&ns, "a"), value(&ns, "b")), (json!(2), json!(1)));
    }

    #[test]
    fn test_math_module() {
        let ns = run("import math\nr = math.sqrt(16)\nf = math.floor(-2.5)\n").unwrap();
        approx::assert_relative_eq!(value(&ns, "r").as_f64().unwrap(), 4.0);
        assert_eq!(value(&ns, "f"), json!(-3));
        assert_eq!(ns.get("math"), Some(&Binding::Module));
        assert!(failure("import os").starts_with("<class 'ModuleNotFoundError'>"));
    }

    #[test]
    fn test_non_finite_float_is_opaque() {
        let ns = run("big = float('inf')\nsmall = 1.5\n").unwrap();
        assert!(matches!(ns.get("big"), Some(Binding::Opaque(_))));
        assert_eq!(value(&ns, "small"), json!(1.5));
    }

    #[test]
    fn test_stop_handle_is_read_only() {
        assert!(failure("stop.value = True").starts_with("<class 'AttributeError'>"));
        let ns = run("flag = stop.value").unwrap();
        assert_eq!(value(&ns, "flag"), json!(0));
    }

    #[test]
    fn test_infinite_loop_unwinds_on_cancel() {
        let cancel = CancelToken::new();
        let remote = cancel.clone();
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            remote.cancel();
        });

        let started = Instant::now();
        let result = ScriptCapability::new().execute(
            "while True:\n    try:\n        pass\n    except Exception:\n        pass\n",
            &cancel,
        );
        canceller.join().unwrap();

        assert!(started.elapsed() < Duration::from_secs(5));
        let failure = result.unwrap_err();
        assert_eq!(failure.type_name, "CancelledError");
    }

    #[test]
    fn test_sleep_observes_cancel() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let started = Instant::now();
        let result = ScriptCapability::new().execute("import time\ntime.sleep(30)\n", &cancel);
        assert!(result.is_err());
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_int_with_base() {
        let ns = run("a = int('ff', 16)\nb = int('101', base=2)\nc = int(' z ', 36)\n").unwrap();
        assert_eq!(value(&ns, "a"), json!(255));
        assert_eq!(value(&ns, "b"), json!(5));
        assert_eq!(value(&ns, "c"), json!(35));
        assert_eq!(
            failure("int('9', 2)"),
            "<class 'ValueError'> invalid literal for int() with base 2: '9' (\"invalid literal for int() with base 2: '9'\",)"
        );
        assert!(failure("int(5, 2)").starts_with("<class 'TypeError'>"));
    }

    #[test]
    fn test_deeply_nested_source_fails_cleanly() {
        let parens = format!("x = {}1{}", "(".repeat(100_000), ")".repeat(100_000));
        assert!(failure(&parens)
            .starts_with("<class 'SyntaxError'> too many nested parentheses (<string>, line 1)"));

        assert_eq!(
            failure(&format!("x = {}1", "-".repeat(100_000))),
            "<class 'RecursionError'> maximum recursion depth exceeded during compilation \
             ('maximum recursion depth exceeded during compilation',)"
        );
        assert!(failure(&format!("x = {}1", "1 + ".repeat(100_000)))
            .starts_with("<class 'RecursionError'>"));

        let mut blocks = String::new();
        for level in 0..1_000 {
            blocks.push_str(&format!("{}if True:\n", " ".repeat(level)));
        }
        blocks.push_str(&format!("{}pass\n", " ".repeat(1_000)));
        assert!(failure(&blocks)
            .starts_with("<class 'IndentationError'> too many levels of indentation"));
    }

    #[test]
    fn test_evaluation_depth_is_bounded() {
        let source = |n: usize| {
            format!(
                "def f(n):\n    if n == 0:\n        return 0\n    return {}f(n - 1)\nr = f({})\n",
                "-".repeat(300),
                n
            )
        };
        let ns = run(&source(3)).unwrap();
        assert_eq!(value(&ns, "r"), json!(0));
        // Stays under the call limit of 100 but nests too deep overall.
        assert!(failure(&source(50))
            .starts_with("<class 'RecursionError'> maximum recursion depth exceeded"));
    }

    #[test]
    fn test_deep_nesting_is_released_on_a_small_stack() {
        let source = "\
a = 0
for i in range(100000):
    a = [a]
a = 0
t = ()
for i in range(100000):
    t = (t, {'k': t})
t = 0
e = None
for i in range(100000):
    e = ValueError(e)
e = 0
def g(x=None):
    pass
for i in range(100000):
    def g(x=g):
        pass
g = 0
";
        let ns = run_with_stack(source, 4 * 1024 * 1024).unwrap();
        assert_eq!(value(&ns, "a"), json!(0));
        assert_eq!(value(&ns, "t"), json!(0));
        assert_eq!(value(&ns, "e"), json!(0));
        assert_eq!(value(&ns, "g"), json!(0));
    }

    #[test]
    fn test_deep_values_stay_opaque() {
        let source = "\
a = 0
for i in range(100000):
    a = [a]
e = None
for i in range(100000):
    e = ValueError(e)
s = str(e)
";
        let ns = run_with_stack(source, 4 * 1024 * 1024).unwrap();
        assert!(matches!(ns.get("a"), Some(Binding::Opaque(_))));
        assert_eq!(value(&ns, "s"), json!("..."));
    }

    #[test]
    fn test_cyclic_comparison_raises_recursion_error() {
        let setup = "a = []\na.append(a)\nb = []\nb.append(b)\n";
        assert!(failure(&format!("{setup}r = a == b\n")).starts_with(
            "<class 'RecursionError'> maximum recursion depth exceeded in comparison"
        ));
        let ns = run(&format!(
            "{setup}same = a == a\ntry:\n    a < b\nexcept RecursionError:\n    caught = True\n"
        ))
        .unwrap();
        assert_eq!(value(&ns, "same"), json!(true));
        assert_eq!(value(&ns, "caught"), json!(true));
    }

    #[test]
    fn test_deeply_nested_class_tuples() {
        let source = "\
kinds = ValueError
types = int
for i in range(100000):
    kinds = (KeyError, kinds)
    types = (str, types)
try:
    raise ValueError('x')
except kinds:
    caught = True
ok = isinstance(1, types)
kinds = 0
types = 0
";
        let ns = run_with_stack(source, 4 * 1024 * 1024).unwrap();
        assert_eq!(value(&ns, "caught"), json!(true));
        assert_eq!(value(&ns, "ok"), json!(true));
    }
}
