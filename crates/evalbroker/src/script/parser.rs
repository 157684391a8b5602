use std::rc::Rc;

use super::ast::{local_names, BinOp, CmpOp, Expr, FunctionDef, Handler, Param, Stmt, UnaryOp};
use super::error::SyntaxError;
use super::lexer::{tokenize, Tok, Token};

type PResult<T> = Result<T, SyntaxError>;

/// Syntactic nesting accepted in one program: brackets, blocks, unary
/// operators and each link of an operator or postfix chain count one level.
pub(crate) const MAX_NESTING: usize = 1000;

pub(crate) fn parse(source: &str) -> PResult<Vec<Stmt>> {
    let tokens = tokenize(source)?;
    Parser {
        tokens,
        pos: 0,
        depth: 0,
        source,
    }
    .program()
}

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
    source: &'a str,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> &Tok {
        // The token stream always ends with Eof.
        &self.tokens[self.pos.min(self.tokens.len() - 1)].tok
    }

    fn peek_next(&self) -> &Tok {
        &self.tokens[(self.pos + 1).min(self.tokens.len() - 1)].tok
    }

    fn advance(&mut self) -> Tok {
        let tok = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        tok
    }

    fn check_op(&self, op: &str) -> bool {
        matches!(self.peek(), Tok::Op(o) if *o == op)
    }

    fn eat_op(&mut self, op: &str) -> bool {
        if self.check_op(op) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_op(&mut self, op: &str) -> PResult<()> {
        if self.eat_op(op) {
            Ok(())
        } else {
            Err(self.error(&format!("expected '{op}'")))
        }
    }

    fn check_kw(&self, kw: &str) -> bool {
        matches!(self.peek(), Tok::Keyword(k) if *k == kw)
    }

    fn eat_kw(&mut self, kw: &str) -> bool {
        if self.check_kw(kw) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_kw(&mut self, kw: &str) -> PResult<()> {
        if self.eat_kw(kw) {
            Ok(())
        } else {
            Err(self.error(&format!("expected '{kw}'")))
        }
    }

    fn expect_name(&mut self) -> PResult<String> {
        match self.advance() {
            Tok::Name(name) => Ok(name),
            _ => Err(self.error("invalid syntax")),
        }
    }

    fn expect_newline(&mut self) -> PResult<()> {
        match self.peek() {
            Tok::Newline => {
                self.advance();
                Ok(())
            }
            Tok::Eof => Ok(()),
            _ => Err(self.error("invalid syntax")),
        }
    }

    fn location(&self) -> (usize, String) {
        let line = self.tokens[self.pos.min(self.tokens.len() - 1)].line;
        let text = self
            .source
            .lines()
            .nth(line.saturating_sub(1))
            .unwrap_or("")
            .to_string();
        (line, text)
    }

    fn error(&self, msg: &str) -> SyntaxError {
        let (line, text) = self.location();
        SyntaxError::new(msg, line, text)
    }

    fn descend(&mut self) -> PResult<()> {
        if self.depth >= MAX_NESTING {
            let (line, text) = self.location();
            return Err(SyntaxError::too_deep(line, text));
        }
        self.depth += 1;
        Ok(())
    }

    fn ascend(&mut self, levels: usize) {
        self.depth = self.depth.saturating_sub(levels);
    }

    fn program(mut self) -> PResult<Vec<Stmt>> {
        let mut body = Vec::new();
        loop {
            match self.peek() {
                Tok::Eof => break,
                Tok::Newline => {
                    self.advance();
                }
                Tok::Indent => return Err(self.error("unexpected indent")),
                _ => body.extend(self.statement()?),
            }
        }
        Ok(body)
    }

    fn statement(&mut self) -> PResult<Vec<Stmt>> {
        let stmt = match self.peek() {
            Tok::Keyword("if") => {
                self.advance();
                self.if_rest()?
            }
            Tok::Keyword("while") => self.while_stmt()?,
            Tok::Keyword("for") => self.for_stmt()?,
            Tok::Keyword("def") => self.def_stmt()?,
            Tok::Keyword("try") => self.try_stmt()?,
            _ => return self.simple_line(),
        };
        Ok(vec![stmt])
    }

    fn simple_line(&mut self) -> PResult<Vec<Stmt>> {
        let mut stmts = vec![self.simple()?];
        while self.eat_op(";") {
            if matches!(self.peek(), Tok::Newline | Tok::Eof) {
                break;
            }
            stmts.push(self.simple()?);
        }
        self.expect_newline()?;
        Ok(stmts)
    }

    fn block(&mut self) -> PResult<Vec<Stmt>> {
        if !matches!(self.peek(), Tok::Newline) {
            return self.simple_line();
        }
        self.advance();
        if !matches!(self.peek(), Tok::Indent) {
            return Err(self.error("expected an indented block"));
        }
        self.advance();
        self.descend()?;

        let mut body = Vec::new();
        loop {
            match self.peek() {
                Tok::Dedent => {
                    self.advance();
                    break;
                }
                Tok::Eof => break,
                Tok::Newline => {
                    self.advance();
                }
                _ => body.extend(self.statement()?),
            }
        }
        self.ascend(1);
        Ok(body)
    }

    fn if_rest(&mut self) -> PResult<Stmt> {
        let test = self.test()?;
        self.expect_op(":")?;
        let body = self.block()?;
        let orelse = if self.eat_kw("elif") {
            self.descend()?;
            let nested = self.if_rest()?;
            self.ascend(1);
            vec![nested]
        } else if self.eat_kw("else") {
            self.expect_op(":")?;
            self.block()?
        } else {
            Vec::new()
        };
        Ok(Stmt::If { test, body, orelse })
    }

    fn loop_else(&mut self) -> PResult<Vec<Stmt>> {
        if self.eat_kw("else") {
            self.expect_op(":")?;
            self.block()
        } else {
            Ok(Vec::new())
        }
    }

    fn while_stmt(&mut self) -> PResult<Stmt> {
        self.expect_kw("while")?;
        let test = self.test()?;
        self.expect_op(":")?;
        let body = self.block()?;
        let orelse = self.loop_else()?;
        Ok(Stmt::While { test, body, orelse })
    }

    fn for_stmt(&mut self) -> PResult<Stmt> {
        self.expect_kw("for")?;
        let target = self.target_list()?;
        self.expect_kw("in")?;
        let iter = self.exprlist()?;
        self.expect_op(":")?;
        let body = self.block()?;
        let orelse = self.loop_else()?;
        Ok(Stmt::For {
            target,
            iter,
            body,
            orelse,
        })
    }

    fn def_stmt(&mut self) -> PResult<Stmt> {
        self.expect_kw("def")?;
        let name = self.expect_name()?;
        self.expect_op("(")?;
        let mut params = Vec::new();
        while !self.check_op(")") {
            let param = self.expect_name()?;
            let default = if self.eat_op("=") {
                Some(self.test()?)
            } else {
                None
            };
            if default.is_none() && params.iter().any(|p: &Param| p.default.is_some()) {
                return Err(self.error("non-default argument follows default argument"));
            }
            params.push(Param {
                name: param,
                default,
            });
            if !self.eat_op(",") {
                break;
            }
        }
        self.expect_op(")")?;
        if self.eat_op("->") {
            self.test()?;
        }
        self.expect_op(":")?;
        let body = self.block()?;
        let locals = local_names(&params, &body);
        Ok(Stmt::FunctionDef(Rc::new(FunctionDef {
            name,
            params,
            body,
            locals,
        })))
    }

    fn try_stmt(&mut self) -> PResult<Stmt> {
        self.expect_kw("try")?;
        self.expect_op(":")?;
        let body = self.block()?;

        let mut handlers = Vec::new();
        while self.eat_kw("except") {
            let kind = if self.check_op(":") {
                None
            } else {
                Some(self.test()?)
            };
            let name = if self.eat_kw("as") {
                Some(self.expect_name()?)
            } else {
                None
            };
            self.expect_op(":")?;
            handlers.push(Handler {
                kind,
                name,
                body: self.block()?,
            });
        }

        let orelse = if !handlers.is_empty() && self.eat_kw("else") {
            self.expect_op(":")?;
            self.block()?
        } else {
            Vec::new()
        };

        let finalbody = if self.eat_kw("finally") {
            self.expect_op(":")?;
            self.block()?
        } else {
            Vec::new()
        };

        if handlers.is_empty() && finalbody.is_empty() {
            return Err(self.error("expected 'except' or 'finally' block"));
        }

        Ok(Stmt::Try {
            body,
            handlers,
            orelse,
            finalbody,
        })
    }

    fn at_simple_end(&self) -> bool {
        matches!(self.peek(), Tok::Newline | Tok::Eof) || self.check_op(";")
    }

    fn simple(&mut self) -> PResult<Stmt> {
        match self.peek() {
            Tok::Keyword("pass") => {
                self.advance();
                Ok(Stmt::Pass)
            }
            Tok::Keyword("break") => {
                self.advance();
                Ok(Stmt::Break)
            }
            Tok::Keyword("continue") => {
                self.advance();
                Ok(Stmt::Continue)
            }
            Tok::Keyword("return") => {
                self.advance();
                if self.at_simple_end() {
                    Ok(Stmt::Return(None))
                } else {
                    Ok(Stmt::Return(Some(self.exprlist()?)))
                }
            }
            Tok::Keyword("raise") => {
                self.advance();
                if self.at_simple_end() {
                    Ok(Stmt::Raise(None))
                } else {
                    Ok(Stmt::Raise(Some(self.test()?)))
                }
            }
            Tok::Keyword("global") => {
                self.advance();
                let mut names = vec![self.expect_name()?];
                while self.eat_op(",") {
                    names.push(self.expect_name()?);
                }
                Ok(Stmt::Global(names))
            }
            Tok::Keyword("del") => {
                self.advance();
                let mut targets = vec![self.primary()?];
                while self.eat_op(",") {
                    targets.push(self.primary()?);
                }
                for target in &targets {
                    self.check_target(target)?;
                }
                Ok(Stmt::Del(targets))
            }
            Tok::Keyword("import") => {
                self.advance();
                let mut names = Vec::new();
                loop {
                    let mut module = self.expect_name()?;
                    while self.eat_op(".") {
                        module.push('.');
                        module.push_str(&self.expect_name()?);
                    }
                    let alias = if self.eat_kw("as") {
                        self.expect_name()?
                    } else {
                        module.split('.').next().unwrap_or(&module).to_string()
                    };
                    names.push((module, alias));
                    if !self.eat_op(",") {
                        break;
                    }
                }
                Ok(Stmt::Import(names))
            }
            Tok::Keyword(kw @ ("from" | "lambda" | "nonlocal")) => {
                let msg = format!("'{kw}' is not supported");
                Err(self.error(&msg))
            }
            _ => self.expr_stmt(),
        }
    }

    fn expr_stmt(&mut self) -> PResult<Stmt> {
        let first = self.exprlist()?;

        if self.check_op("=") {
            let mut targets = vec![first];
            while self.eat_op("=") {
                targets.push(self.exprlist()?);
            }
            let value = targets.pop().ok_or_else(|| self.error("invalid syntax"))?;
            for target in &targets {
                self.check_target(target)?;
            }
            return Ok(Stmt::Assign { targets, value });
        }

        let aug = match self.peek() {
            Tok::Op("+=") => Some(BinOp::Add),
            Tok::Op("-=") => Some(BinOp::Sub),
            Tok::Op("*=") => Some(BinOp::Mul),
            Tok::Op("/=") => Some(BinOp::Div),
            Tok::Op("//=") => Some(BinOp::FloorDiv),
            Tok::Op("%=") => Some(BinOp::Mod),
            Tok::Op("**=") => Some(BinOp::Pow),
            Tok::Op("&=") => Some(BinOp::BitAnd),
            Tok::Op("|=") => Some(BinOp::BitOr),
            Tok::Op("^=") => Some(BinOp::BitXor),
            Tok::Op("<<=") => Some(BinOp::LShift),
            Tok::Op(">>=") => Some(BinOp::RShift),
            _ => None,
        };

        if let Some(op) = aug {
            self.advance();
            if !matches!(first, Expr::Name(_) | Expr::Subscript(..) | Expr::Attribute(..)) {
                return Err(self.error("illegal expression for augmented assignment"));
            }
            let value = self.exprlist()?;
            return Ok(Stmt::AugAssign {
                target: first,
                op,
                value,
            });
        }

        Ok(Stmt::Expr(first))
    }

    fn check_target(&self, target: &Expr) -> PResult<()> {
        match target {
            Expr::Name(_) | Expr::Subscript(..) | Expr::Attribute(..) => Ok(()),
            Expr::Tuple(items) | Expr::List(items) => {
                for item in items {
                    self.check_target(item)?;
                }
                Ok(())
            }
            _ => Err(self.error("cannot assign to expression")),
        }
    }

    fn starts_expr(&self) -> bool {
        match self.peek() {
            Tok::Name(_) | Tok::Int(_) | Tok::Float(_) | Tok::Str(_) => true,
            Tok::Keyword(kw) => matches!(*kw, "None" | "True" | "False" | "not"),
            Tok::Op(op) => matches!(*op, "(" | "[" | "{" | "-" | "+" | "~"),
            _ => false,
        }
    }

    /// Comma separated expressions; more than one item (or a trailing comma) builds a tuple.
    fn exprlist(&mut self) -> PResult<Expr> {
        let first = self.test()?;
        if !self.check_op(",") {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_op(",") {
            if !self.starts_expr() {
                break;
            }
            items.push(self.test()?);
        }
        Ok(Expr::Tuple(items))
    }

    /// Targets of a `for` loop or comprehension; stops before `in`.
    fn target_list(&mut self) -> PResult<Expr> {
        let first = self.bitor()?;
        let target = if self.check_op(",") {
            let mut items = vec![first];
            while self.eat_op(",") {
                if self.check_kw("in") {
                    break;
                }
                items.push(self.bitor()?);
            }
            Expr::Tuple(items)
        } else {
            first
        };
        self.check_target(&target)?;
        Ok(target)
    }

    fn test(&mut self) -> PResult<Expr> {
        if self.check_kw("lambda") {
            return Err(self.error("'lambda' is not supported"));
        }
        let body = self.or_test()?;
        if self.eat_kw("if") {
            let test = self.or_test()?;
            self.expect_kw("else")?;
            self.descend()?;
            let orelse = self.test()?;
            self.ascend(1);
            return Ok(Expr::IfExp {
                test: Box::new(test),
                body: Box::new(body),
                orelse: Box::new(orelse),
            });
        }
        Ok(body)
    }

    fn or_test(&mut self) -> PResult<Expr> {
        let mut left = self.and_test()?;
        let mut chained = 0;
        while self.eat_kw("or") {
            self.descend()?;
            chained += 1;
            let right = self.and_test()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        self.ascend(chained);
        Ok(left)
    }

    fn and_test(&mut self) -> PResult<Expr> {
        let mut left = self.not_test()?;
        let mut chained = 0;
        while self.eat_kw("and") {
            self.descend()?;
            chained += 1;
            let right = self.not_test()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        self.ascend(chained);
        Ok(left)
    }

    fn not_test(&mut self) -> PResult<Expr> {
        if self.eat_kw("not") {
            self.descend()?;
            let operand = self.not_test()?;
            self.ascend(1);
            return Ok(Expr::Not(Box::new(operand)));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> PResult<Expr> {
        let left = self.bitor()?;
        let mut ops = Vec::new();
        loop {
            let op = match self.peek() {
                Tok::Op("==") => CmpOp::Eq,
                Tok::Op("!=") => CmpOp::NotEq,
                Tok::Op("<") => CmpOp::Lt,
                Tok::Op("<=") => CmpOp::LtE,
                Tok::Op(">") => CmpOp::Gt,
                Tok::Op(">=") => CmpOp::GtE,
                Tok::Keyword("in") => CmpOp::In,
                Tok::Keyword("not") if matches!(self.peek_next(), Tok::Keyword("in")) => {
                    self.advance();
                    CmpOp::NotIn
                }
                Tok::Keyword("is") => {
                    if matches!(self.peek_next(), Tok::Keyword("not")) {
                        self.advance();
                        CmpOp::IsNot
                    } else {
                        CmpOp::Is
                    }
                }
                _ => break,
            };
            self.advance();
            ops.push((op, self.bitor()?));
        }
        if ops.is_empty() {
            Ok(left)
        } else {
            Ok(Expr::Compare(Box::new(left), ops))
        }
    }

    fn binary_level(
        &mut self,
        ops: &[(&str, BinOp)],
        next: fn(&mut Self) -> PResult<Expr>,
    ) -> PResult<Expr> {
        let mut left = next(self)?;
        let mut chained = 0;
        'outer: loop {
            for (symbol, op) in ops {
                if self.eat_op(symbol) {
                    self.descend()?;
                    chained += 1;
                    let right = next(self)?;
                    left = Expr::Binary(*op, Box::new(left), Box::new(right));
                    continue 'outer;
                }
            }
            self.ascend(chained);
            return Ok(left);
        }
    }

    fn bitor(&mut self) -> PResult<Expr> {
        self.binary_level(&[("|", BinOp::BitOr)], Self::bitxor)
    }

    fn bitxor(&mut self) -> PResult<Expr> {
        self.binary_level(&[("^", BinOp::BitXor)], Self::bitand)
    }

    fn bitand(&mut self) -> PResult<Expr> {
        self.binary_level(&[("&", BinOp::BitAnd)], Self::shift)
    }

    fn shift(&mut self) -> PResult<Expr> {
        self.binary_level(&[("<<", BinOp::LShift), (">>", BinOp::RShift)], Self::arith)
    }

    fn arith(&mut self) -> PResult<Expr> {
        self.binary_level(&[("+", BinOp::Add), ("-", BinOp::Sub)], Self::term)
    }

    fn term(&mut self) -> PResult<Expr> {
        self.binary_level(
            &[
                ("*", BinOp::Mul),
                ("//", BinOp::FloorDiv),
                ("/", BinOp::Div),
                ("%", BinOp::Mod),
            ],
            Self::factor,
        )
    }

    fn factor(&mut self) -> PResult<Expr> {
        let op = match self.peek() {
            Tok::Op("-") => UnaryOp::Neg,
            Tok::Op("+") => UnaryOp::Pos,
            Tok::Op("~") => UnaryOp::Invert,
            _ => return self.power(),
        };
        self.advance();
        self.descend()?;
        let operand = self.factor()?;
        self.ascend(1);
        // Fold negative literals so that `-9223372036854775808` style constants stay ints.
        match (op, operand) {
            (UnaryOp::Neg, Expr::Int(i)) => Ok(Expr::Int(-i)),
            (UnaryOp::Neg, Expr::Float(f)) => Ok(Expr::Float(-f)),
            (op, operand) => Ok(Expr::Unary(op, Box::new(operand))),
        }
    }

    fn power(&mut self) -> PResult<Expr> {
        let base = self.primary()?;
        if self.eat_op("**") {
            self.descend()?;
            let exponent = self.factor()?;
            self.ascend(1);
            return Ok(Expr::Binary(BinOp::Pow, Box::new(base), Box::new(exponent)));
        }
        Ok(base)
    }

    fn primary(&mut self) -> PResult<Expr> {
        let mut expr = self.atom()?;
        let mut chained = 0;
        loop {
            if matches!(self.peek(), Tok::Op("(" | "[" | ".")) {
                self.descend()?;
                chained += 1;
            }
            if self.eat_op("(") {
                let (args, kwargs) = self.call_args()?;
                expr = Expr::Call {
                    func: Box::new(expr),
                    args,
                    kwargs,
                };
            } else if self.eat_op("[") {
                let index = self.subscript()?;
                self.expect_op("]")?;
                expr = Expr::Subscript(Box::new(expr), Box::new(index));
            } else if self.eat_op(".") {
                let attr = self.expect_name()?;
                expr = Expr::Attribute(Box::new(expr), attr);
            } else {
                self.ascend(chained);
                return Ok(expr);
            }
        }
    }

    fn call_args(&mut self) -> PResult<(Vec<Expr>, Vec<(String, Expr)>)> {
        let mut args = Vec::new();
        let mut kwargs: Vec<(String, Expr)> = Vec::new();
        while !self.check_op(")") {
            let is_keyword =
                matches!(self.peek(), Tok::Name(_)) && matches!(self.peek_next(), Tok::Op("="));
            if is_keyword {
                let name = self.expect_name()?;
                self.expect_op("=")?;
                kwargs.push((name, self.test()?));
            } else {
                if !kwargs.is_empty() {
                    return Err(self.error("positional argument follows keyword argument"));
                }
                args.push(self.test()?);
            }
            if !self.eat_op(",") {
                break;
            }
        }
        self.expect_op(")")?;
        Ok((args, kwargs))
    }

    fn subscript(&mut self) -> PResult<Expr> {
        let lower = if self.check_op(":") {
            None
        } else {
            Some(self.test()?)
        };

        if !self.eat_op(":") {
            let first = lower.ok_or_else(|| self.error("invalid syntax"))?;
            if self.check_op(",") {
                let mut items = vec![first];
                while self.eat_op(",") {
                    if self.check_op("]") {
                        break;
                    }
                    items.push(self.test()?);
                }
                return Ok(Expr::Tuple(items));
            }
            return Ok(first);
        }

        let upper = if self.check_op("]") || self.check_op(":") {
            None
        } else {
            Some(Box::new(self.test()?))
        };
        let step = if self.eat_op(":") && !self.check_op("]") {
            Some(Box::new(self.test()?))
        } else {
            None
        };
        Ok(Expr::Slice(lower.map(Box::new), upper, step))
    }

    fn atom(&mut self) -> PResult<Expr> {
        match self.advance() {
            Tok::Int(i) => Ok(Expr::Int(i)),
            Tok::Float(f) => Ok(Expr::Float(f)),
            Tok::Str(s) => {
                let mut text = s;
                while let Tok::Str(next) = self.peek() {
                    text.push_str(next);
                    self.advance();
                }
                Ok(Expr::Str(Rc::from(text.as_str())))
            }
            Tok::Name(name) => Ok(Expr::Name(name)),
            Tok::Keyword("True") => Ok(Expr::Bool(true)),
            Tok::Keyword("False") => Ok(Expr::Bool(false)),
            Tok::Keyword("None") => Ok(Expr::None),
            Tok::Op(open @ ("(" | "[" | "{")) => {
                self.descend()?;
                let expr = self.bracketed(open)?;
                self.ascend(1);
                Ok(expr)
            }
            _ => {
                // Report the offending token's line rather than the next one.
                self.pos = self.pos.saturating_sub(1);
                Err(self.error("invalid syntax"))
            }
        }
    }

    /// The rest of a parenthesized, list or dict display after its opening bracket.
    fn bracketed(&mut self, open: &str) -> PResult<Expr> {
        match open {
            "(" => {
                if self.eat_op(")") {
                    return Ok(Expr::Tuple(Vec::new()));
                }
                let first = self.test()?;
                if self.eat_op(")") {
                    return Ok(first);
                }
                let mut items = vec![first];
                while self.eat_op(",") {
                    if self.check_op(")") {
                        break;
                    }
                    items.push(self.test()?);
                }
                self.expect_op(")")?;
                Ok(Expr::Tuple(items))
            }
            "[" => {
                if self.eat_op("]") {
                    return Ok(Expr::List(Vec::new()));
                }
                let first = self.test()?;
                if self.eat_kw("for") {
                    let target = self.target_list()?;
                    self.expect_kw("in")?;
                    let iter = self.or_test()?;
                    let mut conds = Vec::new();
                    while self.eat_kw("if") {
                        conds.push(self.or_test()?);
                    }
                    self.expect_op("]")?;
                    return Ok(Expr::ListComp {
                        elt: Box::new(first),
                        target: Box::new(target),
                        iter: Box::new(iter),
                        conds,
                    });
                }
                let mut items = vec![first];
                while self.eat_op(",") {
                    if self.check_op("]") {
                        break;
                    }
                    items.push(self.test()?);
                }
                self.expect_op("]")?;
                Ok(Expr::List(items))
            }
            _ => {
                let mut entries = Vec::new();
                while !self.check_op("}") {
                    let key = self.test()?;
                    self.expect_op(":")?;
                    let value = self.test()?;
                    entries.push((key, value));
                    if !self.eat_op(",") {
                        break;
                    }
                }
                self.expect_op("}")?;
                Ok(Expr::Dict(entries))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_assignment() {
        let program = parse("a = 2 + 2").unwrap();
        assert_eq!(
            program,
            vec![Stmt::Assign {
                targets: vec![Expr::Name("a".into())],
                value: Expr::Binary(BinOp::Add, Box::new(Expr::Int(2)), Box::new(Expr::Int(2))),
            }]
        );
    }

    #[test]
    fn test_parse_precedence() {
        let program = parse("x = 1 + 2 * 3 ** 2").unwrap();
        let expected = Expr::Binary(
            BinOp::Add,
            Box::new(Expr::Int(1)),
            Box::new(Expr::Binary(
                BinOp::Mul,
                Box::new(Expr::Int(2)),
                Box::new(Expr::Binary(
                    BinOp::Pow,
                    Box::new(Expr::Int(3)),
                    Box::new(Expr::Int(2)),
                )),
            )),
        );
        match &program[0] {
            Stmt::Assign { value, .. } => assert_eq!(value, &expected),
            other => panic!("unexpected statement {other:?}"),
        }
    }

    #[test]
    fn test_parse_compound_statements() {
        let source = "\
def f(n, acc=0):
    while n > 0:
        acc += n
        n -= 1
    return acc
for i in range(3):
    if i == 1:
        continue
    elif i not in [0]:
        break
    else:
        pass
try:
    r = f(3)
except ValueError as e:
    r = None
finally:
    done = True
";
        let program = parse(source).unwrap();
        assert_eq!(program.len(), 3);
        match &program[0] {
            Stmt::FunctionDef(def) => {
                assert_eq!(def.name, "f");
                assert_eq!(def.params.len(), 2);
                assert!(def.locals.contains("acc"));
                assert!(def.locals.contains("n"));
            }
            other => panic!("unexpected statement {other:?}"),
        }
        assert!(matches!(program[1], Stmt::For { .. }));
        assert!(matches!(program[2], Stmt::Try { .. }));
    }

    #[test]
    fn test_global_names_are_not_locals() {
        let program = parse("def g():\n    global counter\n    counter += 1\n").unwrap();
        match &program[0] {
            Stmt::FunctionDef(def) => assert!(!def.locals.contains("counter")),
            other => panic!("unexpected statement {other:?}"),
        }
    }

    #[test]
    fn test_tuple_unpacking_and_slices() {
        let program = parse("a, b = b, a\nc = xs[1:-1]\n").unwrap();
        assert!(matches!(
            &program[0],
            Stmt::Assign { targets, .. } if matches!(targets[0], Expr::Tuple(_))
        ));
        assert!(matches!(
            &program[1],
            Stmt::Assign { value: Expr::Subscript(_, index), .. } if matches!(**index, Expr::Slice(..))
        ));
    }

    #[test]
    fn test_single_line_block() {
        let program = parse("while True: pass").unwrap();
        assert!(matches!(&program[0], Stmt::While { body, .. } if body == &vec![Stmt::Pass]));
    }

    #[test]
    fn test_syntax_errors() {
        assert!(parse("x = = 1").is_err());
        assert!(parse("1 = x").is_err());
        assert!(parse("if x\n    pass").is_err());
        assert!(parse("    x = 1").is_err());
        assert!(parse("f = lambda: 1").is_err());
        let err = parse("a = 1\nb = = 2\n").unwrap_err();
        assert_eq!(err.msg, "invalid syntax");
        assert_eq!(err.line, 2);
    }

    fn nesting_error(source: &str) -> SyntaxError {
        let err = parse(source).unwrap_err();
        assert_eq!(err.kind, "RecursionError", "{source:.40}");
        err
    }

    #[test]
    fn test_deep_nesting_is_rejected() {
        nesting_error(&format!("x = {}1", "-".repeat(100_000)));
        nesting_error(&format!("x = {}y", "not ".repeat(100_000)));
        nesting_error(&format!("x = {}1", "1 + ".repeat(100_000)));
        nesting_error(&format!("x = {}1", "y and ".repeat(5_000)));
        nesting_error(&format!("x = 2{}", " ** 2".repeat(5_000)));
        nesting_error(&format!("x = {}0", "1 if y else ".repeat(5_000)));
        nesting_error(&format!("x = f{}", "()".repeat(5_000)));
        nesting_error(&format!("x = y{}", ".real".repeat(5_000)));

        let mut chain = "if x == 0:\n    pass\n".to_string();
        for i in 1..5_000 {
            chain.push_str(&format!("elif x == {i}:\n    pass\n"));
        }
        let err = nesting_error(&chain);
        assert!(err.line > 1);
    }

    #[test]
    fn test_moderate_nesting_is_accepted() {
        let program = parse(&format!("x = {}1", "-".repeat(MAX_NESTING - 1))).unwrap();
        assert!(matches!(&program[0], Stmt::Assign { value: Expr::Int(_), .. }));
        assert!(parse(&format!("x = {}1", "1 + ".repeat(500))).is_ok());
        assert!(parse(&format!("x = {}1{}", "(".repeat(150), ")".repeat(150))).is_ok());
        // Sibling expressions do not add up.
        let line = format!("x = {}1\n", "1 + ".repeat(800));
        assert!(parse(&line.repeat(5)).is_ok());
    }
}
