//! The syntax tree the parser produces and the compiler consumes.
//!
//! The node set is closed: statements and expressions are plain enums and
//! every pass over the tree is a `match`.
use core::fmt;

pub use crate::ops::BinaryOp;
use crate::lexer::Span;

/// A name as written in the source, with where it was written.
#[derive(Debug, Clone, PartialEq)]
pub struct Ident {
    pub name: Box<str>,
    pub span: Span,
}

impl Ident {
    pub fn new(name: impl AsRef<str>, span: Span) -> Self {
        Self {
            name: Box::from(name.as_ref()),
            span,
        }
    }
}

impl fmt::Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Variable(Ident),
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Call {
        callee: Ident,
        args: Vec<Expr>,
    },
}

impl Expr {
    pub fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Self {
        Self::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    FuncDef {
        name: Ident,
        params: Vec<Ident>,
        body: Vec<Stmt>,
    },
    Assign {
        target: Ident,
        value: Expr,
    },
    Return {
        value: Expr,
        span: Span,
    },
    Expr(Expr),
}

/// A whole compilation unit.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Program(pub Vec<Stmt>);

impl Program {
    pub fn statements(&self) -> &[Stmt] {
        &self.0
    }

    /// Renders the tree one node per line, children indented under their parent.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        for stmt in &self.0 {
            dump_stmt(&mut out, stmt, 0);
        }
        out
    }
}

fn dump_line(out: &mut String, depth: usize, text: impl fmt::Display) {
    for _ in 0..depth {
        out.push_str("  ");
    }
    out.push_str(&text.to_string());
    out.push('\n');
}

fn dump_stmt(out: &mut String, stmt: &Stmt, depth: usize) {
    match stmt {
        Stmt::FuncDef { name, params, body } => {
            let params = params
                .iter()
                .map(|p| p.name.as_ref())
                .collect::<Vec<_>>()
                .join(", ");
            dump_line(out, depth, format_args!("Def {name}({params})"));
            for stmt in body {
                dump_stmt(out, stmt, depth + 1);
            }
        }
        Stmt::Assign { target, value } => {
            dump_line(out, depth, format_args!("Assign {target}"));
            dump_expr(out, value, depth + 1);
        }
        Stmt::Return { value, .. } => {
            dump_line(out, depth, "Return");
            dump_expr(out, value, depth + 1);
        }
        Stmt::Expr(expr) => {
            dump_line(out, depth, "Expr");
            dump_expr(out, expr, depth + 1);
        }
    }
}

fn dump_expr(out: &mut String, expr: &Expr, depth: usize) {
    match expr {
        Expr::Number(value) => dump_line(out, depth, format_args!("Number {value}")),
        Expr::Variable(name) => dump_line(out, depth, format_args!("Var {name}")),
        Expr::Binary { op, lhs, rhs } => {
            dump_line(out, depth, format_args!("Binary {op}"));
            dump_expr(out, lhs, depth + 1);
            dump_expr(out, rhs, depth + 1);
        }
        Expr::Call { callee, args } => {
            dump_line(out, depth, format_args!("Call {callee}"));
            for arg in args {
                dump_expr(out, arg, depth + 1);
            }
        }
    }
}

// Display renders parseable source. Binary expressions are always
// parenthesized, so the output never depends on precedence.
impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(value) => write!(f, "{value}"),
            Self::Variable(name) => write!(f, "{name}"),
            Self::Binary { op, lhs, rhs } => write!(f, "({lhs} {op} {rhs})"),
            Self::Call { callee, args } => {
                write!(f, "{callee}(")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                write!(f, ")")
            }
        }
    }
}

fn write_stmt(f: &mut fmt::Formatter<'_>, stmt: &Stmt, depth: usize) -> fmt::Result {
    let indent = "    ".repeat(depth);
    match stmt {
        Stmt::FuncDef { name, params, body } => {
            let params = params
                .iter()
                .map(|p| p.name.as_ref())
                .collect::<Vec<_>>()
                .join(", ");
            writeln!(f, "{indent}def {name}({params}) {{")?;
            for stmt in body {
                write_stmt(f, stmt, depth + 1)?;
            }
            writeln!(f, "{indent}}}")
        }
        Stmt::Assign { target, value } => writeln!(f, "{indent}{target} = {value};"),
        Stmt::Return { value, .. } => writeln!(f, "{indent}return {value};"),
        Stmt::Expr(expr) => writeln!(f, "{indent}{expr};"),
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for stmt in &self.0 {
            write_stmt(f, stmt, 0)?;
        }
        Ok(())
    }
}
