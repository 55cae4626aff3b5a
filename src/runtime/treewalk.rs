//! Direct evaluation of a [`Program`], without compiling it.
//!
//! Names resolve the way the code generator resolves them: a function body
//! sees what was bound before the function was defined plus its own
//! bindings, and every binding lives on a per-qualified-name stack. Checks
//! the code generator makes up front are made here when evaluation reaches
//! the offending code.
use std::{
    collections::{HashMap, HashSet},
    rc::Rc,
};

use lasso::{Rodeo, Spur};

use super::Host;
use crate::{
    compiler::{CodegenError, PRINT_BUILTIN},
    lexer::Span,
    parser::ast::{Expr, Ident, Program, Stmt},
};

/// Every recursive program recurses forever, so this only bounds how long
/// that takes to notice.
pub const MAX_CALL_DEPTH: usize = 200;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum EvalError {
    #[error(transparent)]
    Static(#[from] CodegenError),
    #[error("call depth exceeds {limit}")]
    TooDeep { limit: usize, span: Span },
}

impl EvalError {
    pub fn span(&self) -> Span {
        match self {
            Self::Static(err) => err.span(),
            Self::TooDeep { span, .. } => span.clone(),
        }
    }
}

struct Function<'p> {
    local: Spur,
    qualified: Box<str>,
    params: &'p [Ident],
    body: &'p [Stmt],
    /// what was visible where the function was defined
    scope: Scope<'p>,
}

#[derive(Clone, Default)]
struct Scope<'p> {
    /// prepended to names bound here
    prefix: String,
    /// `(local, qualified)` pairs, innermost last
    variables: Vec<(Spur, Spur)>,
    functions: Vec<Rc<Function<'p>>>,
}

/// One executing body: the top level or a function call.
struct Frame<'p> {
    scope: Scope<'p>,
    /// index of the first variable bound by this body
    base: usize,
    defined: HashSet<Spur>,
    in_function: bool,
}

impl<'p> Frame<'p> {
    fn top_level() -> Self {
        Self {
            scope: Scope::default(),
            base: 0,
            defined: HashSet::new(),
            in_function: false,
        }
    }
}

pub struct Evaluator<H> {
    rodeo: Rodeo,
    bindings: HashMap<Spur, Vec<f64>>,
    depth: usize,
    host: H,
}

impl<H: Host> Evaluator<H> {
    pub fn new(host: H) -> Self {
        Self {
            rodeo: Rodeo::default(),
            bindings: HashMap::new(),
            depth: 0,
            host,
        }
    }

    pub fn into_host(self) -> H {
        self.host
    }

    pub fn evaluate(&mut self, program: &Program) -> Result<(), EvalError> {
        let mut frame = Frame::top_level();
        self.block(&mut frame, program.statements())?;
        Ok(())
    }

    fn bind(&mut self, frame: &mut Frame<'_>, name: &str, value: f64) {
        let local = self.rodeo.get_or_intern(name);
        let qualified = self
            .rodeo
            .get_or_intern(format!("{}{name}", frame.scope.prefix));
        frame.scope.variables.push((local, qualified));
        self.bindings.entry(qualified).or_default().push(value);
    }

    fn release(&mut self, frame: &Frame<'_>) {
        for (_, qualified) in frame.scope.variables[frame.base..].iter().rev() {
            if let Some(stack) = self.bindings.get_mut(qualified) {
                stack.pop();
                if stack.is_empty() {
                    self.bindings.remove(qualified);
                }
            }
        }
    }

    /// Runs statements until one returns.
    fn block<'p>(&mut self, frame: &mut Frame<'p>, stmts: &'p [Stmt]) -> Result<Option<f64>, EvalError> {
        for stmt in stmts {
            if let Some(value) = self.statement(frame, stmt)? {
                return Ok(Some(value));
            }
        }
        Ok(None)
    }

    fn statement<'p>(&mut self, frame: &mut Frame<'p>, stmt: &'p Stmt) -> Result<Option<f64>, EvalError> {
        match stmt {
            Stmt::FuncDef { name, params, body } => {
                for (i, param) in params.iter().enumerate() {
                    if params[..i].iter().any(|p| p.name == param.name) {
                        return Err(CodegenError::DuplicateParameter {
                            name: param.name.clone(),
                            span: param.span.clone(),
                        }
                        .into());
                    }
                }
                let local = self.rodeo.get_or_intern(&*name.name);
                if !frame.defined.insert(local) {
                    return Err(CodegenError::DuplicateFunction {
                        name: name.name.clone(),
                        span: name.span.clone(),
                    }
                    .into());
                }
                let function = Function {
                    local,
                    qualified: format!("{}{}", frame.scope.prefix, name.name).into(),
                    params,
                    body,
                    scope: frame.scope.clone(),
                };
                frame.scope.functions.push(Rc::new(function));
            }
            Stmt::Assign { target, value } => {
                let value = self.expression(frame, value)?;
                self.bind(frame, &target.name, value);
            }
            Stmt::Return { value, span } => {
                if !frame.in_function {
                    return Err(CodegenError::ReturnOutsideFunction { span: span.clone() }.into());
                }
                return self.expression(frame, value).map(Some);
            }
            Stmt::Expr(Expr::Call { callee, args }) => {
                self.call(frame, callee, args, false)?;
            }
            Stmt::Expr(expr) => {
                self.expression(frame, expr)?;
            }
        }
        Ok(None)
    }

    fn expression<'p>(&mut self, frame: &Frame<'p>, expr: &'p Expr) -> Result<f64, EvalError> {
        match expr {
            Expr::Number(value) => Ok(*value),
            Expr::Variable(ident) => {
                let value = self
                    .rodeo
                    .get(&*ident.name)
                    .and_then(|local| frame.scope.variables.iter().rev().find(|(l, _)| *l == local))
                    .and_then(|(_, qualified)| self.bindings.get(qualified))
                    .and_then(|stack| stack.last());
                value.copied().ok_or_else(|| {
                    CodegenError::UnboundVariable {
                        name: ident.name.clone(),
                        span: ident.span.clone(),
                    }
                    .into()
                })
            }
            Expr::Binary { op, lhs, rhs } => {
                // right first, so calls that print do so in compiled order
                let rhs = self.expression(frame, rhs)?;
                let lhs = self.expression(frame, lhs)?;
                Ok(op.apply(lhs, rhs))
            }
            Expr::Call { callee, args } => {
                // `print` is the only call without a value, and it is rejected here
                Ok(self.call(frame, callee, args, true)?.unwrap_or_default())
            }
        }
    }

    fn call<'p>(
        &mut self,
        frame: &Frame<'p>,
        callee: &Ident,
        args: &'p [Expr],
        needs_value: bool,
    ) -> Result<Option<f64>, EvalError> {
        let function = self.rodeo.get(&*callee.name).and_then(|local| {
            frame
                .scope
                .functions
                .iter()
                .rev()
                .find(|function| function.local == local)
                .cloned()
        });

        let arity = match &function {
            Some(function) => function.params.len(),
            None if callee.name.as_ref() == PRINT_BUILTIN => 1,
            None => {
                return Err(CodegenError::UnknownFunction {
                    name: callee.name.clone(),
                    span: callee.span.clone(),
                }
                .into())
            }
        };
        if args.len() != arity {
            return Err(CodegenError::ArityMismatch {
                name: callee.name.clone(),
                expected: arity,
                found: args.len(),
                span: callee.span.clone(),
            }
            .into());
        }

        let Some(function) = function else {
            if needs_value {
                return Err(CodegenError::PrintHasNoValue {
                    span: callee.span.clone(),
                }
                .into());
            }
            let value = self.expression(frame, &args[0])?;
            self.host.print(value);
            return Ok(None);
        };

        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(self.expression(frame, arg)?);
        }

        if self.depth >= MAX_CALL_DEPTH {
            return Err(EvalError::TooDeep {
                limit: MAX_CALL_DEPTH,
                span: callee.span.clone(),
            });
        }

        let mut scope = function.scope.clone();
        scope.prefix = format!("{}.", function.qualified);
        scope.functions.push(Rc::clone(&function));
        let mut inner = Frame {
            base: scope.variables.len(),
            scope,
            defined: HashSet::new(),
            in_function: true,
        };
        for (param, value) in function.params.iter().zip(values) {
            self.bind(&mut inner, &param.name, value);
        }

        self.depth += 1;
        let result = self.block(&mut inner, function.body);
        self.depth -= 1;
        self.release(&inner);
        Ok(Some(result?.unwrap_or(0.0)))
    }
}

/// Evaluates a whole program, printing through `host`.
pub fn evaluate<H: Host>(program: &Program, host: H) -> Result<H, EvalError> {
    let mut evaluator = Evaluator::new(host);
    evaluator.evaluate(program)?;
    Ok(evaluator.into_host())
}

#[cfg(test)]
mod tests {
    use super::{evaluate, EvalError, MAX_CALL_DEPTH};
    use crate::{compiler::CodegenError, lexer::tokenize, parser::parse};
    use assert2::{check, let_assert};

    fn printed(source: &str) -> Result<Vec<f64>, EvalError> {
        let tokens = tokenize(source).expect("test source lexes");
        let program = parse(&tokens).expect("test source parses");
        evaluate(&program, vec![])
    }

    #[test]
    fn first_parameter_gets_first_argument() {
        check!(printed("def f(a, b) { return a - b; } print(f(10, 3));") == Ok(vec![7.0]));
    }

    #[test]
    fn end_to_end_sum() {
        check!(printed("def f(a, b) { return a + b; } a = f(3, 4); print(a);") == Ok(vec![7.0]));
    }

    #[test]
    fn arithmetic_precedence() {
        check!(printed("print(1 + 2 * 3); print(10 - 3 - 2); print(-(4) / 2);") == Ok(vec![7.0, 5.0, -2.0]));
    }

    #[test]
    fn shadowed_binding_is_restored() {
        let source = "a = 1; def f(a) { a = a * 10; return a; } print(f(5)); print(a);";
        check!(printed(source) == Ok(vec![50.0, 1.0]));
    }

    #[test]
    fn nested_function_sees_enclosing_bindings() {
        let source = "def f(x) { def g(y) { return x + y; } return g(2); } print(f(40));";
        check!(printed(source) == Ok(vec![42.0]));
    }

    #[test]
    fn later_bindings_are_invisible_to_earlier_definitions() {
        let source = "x = 1; def f() { def g() { return x; } x = 5; return g(); } print(f());";
        check!(printed(source) == Ok(vec![1.0]));
    }

    #[test]
    fn global_reassignment_is_seen() {
        check!(printed("a = 1; def f() { return a; } a = 2; print(f());") == Ok(vec![2.0]));
    }

    #[test]
    fn missing_return_yields_zero() {
        check!(printed("def f(a) { b = a; } print(f(3));") == Ok(vec![0.0]));
    }

    #[test]
    fn statements_after_return_do_not_run() {
        check!(printed("def f() { return 1; print(9); } print(f());") == Ok(vec![1.0]));
    }

    #[test]
    fn static_errors_surface_when_reached() {
        let_assert!(Err(EvalError::Static(CodegenError::UnboundVariable { name, .. })) = printed("print(q);"));
        check!(name.as_ref() == "q");
        let_assert!(Err(EvalError::Static(CodegenError::PrintHasNoValue { .. })) = printed("x = print(1);"));
        let_assert!(Err(EvalError::Static(CodegenError::ReturnOutsideFunction { .. })) = printed("return 2;"));
        let_assert!(Err(EvalError::Static(CodegenError::UnknownFunction { .. })) = printed("def f() { def g() { return 1; } return 0; } x = g();"));
    }

    #[test]
    fn runaway_recursion_is_cut_off() {
        let_assert!(Err(err) = printed("def f(n) { return f(n + 1); } print(f(0));"));
        check!(err == EvalError::TooDeep { limit: MAX_CALL_DEPTH, span: 18..19 });
    }
}
