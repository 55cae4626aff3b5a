//! Compile a [`Program`] into textual stack-machine assembly.
//!
//! For example:
//!
//! ```text
//! def f(x) { a = x + 2; return a * x; }
//! v = f(4);
//! print(v);
//! ```
//!
//! compiles to
//!
//! ```text
//! jmp @f_end@
//! f:
//!     set f.x
//!     push 2
//!     get f.x
//!     add
//!     set f.a
//!     get f.x
//!     get f.a
//!     mul
//!     unset f.a
//!     unset f.x
//!     ret
//!     unset f.a
//!     unset f.x
//!     ret
//! @f_end@:
//!
//! push 4
//! call f
//! set v
//! get v
//! int 0
//! ```
//!
//! Arguments are evaluated left to right, so the last argument ends up on
//! top of the operand stack. Parameters are therefore bound last to first:
//! the first declared parameter receives the first argument.
//!
//! The `print` built-in is emitted as `int 0` directly. A `call print`
//! would reach whichever `print` label the unit defines, even one defined
//! after the call.
pub mod scope;

use core::fmt::{self, Write as _};

use scope::{AlreadyDefined, Scopes};

use crate::{
    lexer::Span,
    ops::Interrupt,
    parser::ast::{Expr, Ident, Program, Stmt},
};

/// The callee that is an interrupt unless a user function takes the name.
pub const PRINT_BUILTIN: &str = "print";

#[derive(thiserror::Error, Debug, PartialEq, Clone)]
pub enum CodegenError {
    #[error("variable '{name}' not found")]
    UnboundVariable { name: Box<str>, span: Span },
    #[error("function '{name}' not found")]
    UnknownFunction { name: Box<str>, span: Span },
    #[error("function '{name}' takes {expected} argument(s) but {found} were given")]
    ArityMismatch {
        name: Box<str>,
        expected: usize,
        found: usize,
        span: Span,
    },
    #[error("'print' does not produce a value")]
    PrintHasNoValue { span: Span },
    #[error("'return' outside of a function")]
    ReturnOutsideFunction { span: Span },
    #[error("function '{name}' is already defined")]
    DuplicateFunction { name: Box<str>, span: Span },
    #[error("parameter '{name}' is declared twice")]
    DuplicateParameter { name: Box<str>, span: Span },
}

impl CodegenError {
    pub fn span(&self) -> Span {
        match self {
            Self::UnboundVariable { span, .. }
            | Self::UnknownFunction { span, .. }
            | Self::ArityMismatch { span, .. }
            | Self::PrintHasNoValue { span }
            | Self::ReturnOutsideFunction { span }
            | Self::DuplicateFunction { span, .. }
            | Self::DuplicateParameter { span, .. } => span.clone(),
        }
    }
}

/// Accumulates assembly while tracking what is in scope.
#[derive(Debug, Default)]
pub struct CodeBuilder {
    scopes: Scopes,
    output: String,
}

impl CodeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn finish(self) -> String {
        self.output
    }

    fn line(&mut self, args: fmt::Arguments<'_>) {
        self.line_at(self.scopes.depth(), args);
    }

    fn line_at(&mut self, depth: usize, args: fmt::Arguments<'_>) {
        for _ in 0..depth {
            self.output.push_str("    ");
        }
        // writing into a String cannot fail
        let _ = self.output.write_fmt(args);
        self.output.push('\n');
    }

    fn blank(&mut self) {
        self.output.push('\n');
    }

    fn begin_function(&mut self, name: &Ident, params: &[Ident]) -> Result<(), CodegenError> {
        for (i, param) in params.iter().enumerate() {
            if params[..i].iter().any(|p| p.name == param.name) {
                return Err(CodegenError::DuplicateParameter {
                    name: param.name.clone(),
                    span: param.span.clone(),
                });
            }
        }

        let symbol = match self.scopes.enter_function(&name.name, params.len()) {
            Ok(symbol) => symbol,
            Err(AlreadyDefined) => {
                return Err(CodegenError::DuplicateFunction {
                    name: name.name.clone(),
                    span: name.span.clone(),
                })
            }
        };
        let label = self.scopes.resolve(symbol.qualified).to_owned();
        log::debug!("generating function {label}");

        // the jump and entry label belong to the enclosing scope
        self.blank();
        let depth = self.scopes.depth() - 1;
        self.line_at(depth, format_args!("jmp @{label}_end@"));
        self.line_at(depth, format_args!("{label}:"));

        for param in params.iter().rev() {
            self.bind(&param.name);
        }
        Ok(())
    }

    fn end_function(&mut self, falls_through: bool) {
        if falls_through {
            self.line(format_args!("push 0"));
        }
        self.release(self.scopes.frame_bindings());
        self.line(format_args!("ret"));
        if let Some((function, _)) = self.scopes.exit_function() {
            let label = self.scopes.resolve(function.qualified).to_owned();
            self.line(format_args!("@{label}_end@:"));
        }
        self.blank();
    }

    fn release(&mut self, bindings: Vec<scope::Symbol>) {
        for symbol in bindings {
            let name = self.scopes.resolve(symbol.qualified).to_owned();
            self.line(format_args!("unset {name}"));
        }
    }

    fn bind(&mut self, local: &str) {
        let symbol = self.scopes.bind(local);
        let name = self.scopes.resolve(symbol.qualified).to_owned();
        self.line(format_args!("set {name}"));
    }

    fn statement(&mut self, stmt: &Stmt) -> Result<(), CodegenError> {
        match stmt {
            Stmt::FuncDef { name, params, body } => {
                self.begin_function(name, params)?;
                for stmt in body {
                    self.statement(stmt)?;
                }
                let falls_through = !matches!(body.last(), Some(Stmt::Return { .. }));
                self.end_function(falls_through);
            }
            Stmt::Assign { target, value } => {
                self.expression(value)?;
                self.bind(&target.name);
            }
            Stmt::Return { value, span } => {
                if self.scopes.depth() == 0 {
                    return Err(CodegenError::ReturnOutsideFunction { span: span.clone() });
                }
                self.expression(value)?;
                self.release(self.scopes.frame_bindings());
                self.line(format_args!("ret"));
            }
            Stmt::Expr(Expr::Call { callee, args }) => {
                if self.call(callee, args, false)? {
                    self.line(format_args!("pop"));
                }
            }
            Stmt::Expr(expr) => {
                self.expression(expr)?;
                self.line(format_args!("pop"));
            }
        }
        Ok(())
    }

    fn expression(&mut self, expr: &Expr) -> Result<(), CodegenError> {
        match expr {
            Expr::Number(value) => self.line(format_args!("push {value}")),
            Expr::Variable(ident) => {
                let Some(symbol) = self.scopes.variable(&ident.name) else {
                    return Err(CodegenError::UnboundVariable {
                        name: ident.name.clone(),
                        span: ident.span.clone(),
                    });
                };
                let name = self.scopes.resolve(symbol.qualified).to_owned();
                self.line(format_args!("get {name}"));
            }
            Expr::Binary { op, lhs, rhs } => {
                // the left operand ends up on top, which is what the VM pops first
                self.expression(rhs)?;
                self.expression(lhs)?;
                self.line(format_args!("{}", op.mnemonic()));
            }
            Expr::Call { callee, args } => {
                self.call(callee, args, true)?;
            }
        }
        Ok(())
    }

    /// Emits a call, returning whether it leaves a value on the operand stack.
    fn call(&mut self, callee: &Ident, args: &[Expr], needs_value: bool) -> Result<bool, CodegenError> {
        // no target means the print interrupt
        let (target, arity) = match self.scopes.function(&callee.name) {
            Some(function) => (
                Some(self.scopes.resolve(function.symbol.qualified).to_owned()),
                function.arity,
            ),
            None if callee.name.as_ref() == PRINT_BUILTIN => (None, 1),
            None => {
                return Err(CodegenError::UnknownFunction {
                    name: callee.name.clone(),
                    span: callee.span.clone(),
                })
            }
        };

        if args.len() != arity {
            return Err(CodegenError::ArityMismatch {
                name: callee.name.clone(),
                expected: arity,
                found: args.len(),
                span: callee.span.clone(),
            });
        }
        let produces_value = target.is_some();
        if needs_value && !produces_value {
            return Err(CodegenError::PrintHasNoValue {
                span: callee.span.clone(),
            });
        }

        for arg in args {
            self.expression(arg)?;
        }
        match target {
            Some(target) => self.line(format_args!("call {target}")),
            None => self.line(format_args!("int {}", Interrupt::Print.id())),
        }
        Ok(produces_value)
    }
}

/// Generates assembly for a whole program.
pub fn generate(program: &Program) -> Result<String, CodegenError> {
    let mut builder = CodeBuilder::new();
    for stmt in program.statements() {
        builder.statement(stmt)?;
    }
    Ok(builder.finish())
}
