use crate::unit::ExecutionFailure;

use super::value::py_repr_str;

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SyntaxError {
    pub kind: &'static str,
    pub msg: String,
    pub line: usize,
    pub text: String,
}

impl SyntaxError {
    pub fn new(msg: &str, line: usize, text: String) -> Self {
        let kind = if msg.contains("indent") {
            "IndentationError"
        } else {
            "SyntaxError"
        };
        Self {
            kind,
            msg: msg.to_string(),
            line,
            text,
        }
    }

    /// Source nested deeper than the parser accepts.
    pub fn too_deep(line: usize, text: String) -> Self {
        Self {
            kind: "RecursionError",
            msg: "maximum recursion depth exceeded during compilation".to_string(),
            line,
            text,
        }
    }
}

impl From<SyntaxError> for ExecutionFailure {
    fn from(err: SyntaxError) -> Self {
        if err.kind == "RecursionError" {
            return ExecutionFailure::new(err.kind, err.msg.clone(), vec![py_repr_str(&err.msg)]);
        }
        ExecutionFailure::new(
            err.kind,
            format!("{} (<string>, line {})", err.msg, err.line),
            vec![
                py_repr_str(&err.msg),
                format!("('<string>', {}, {})", err.line, py_repr_str(&err.text)),
            ],
        )
    }
}
