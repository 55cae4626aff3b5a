//! Stage-by-stage driver: source text to assembly text to bytecode to
//! execution.
//!
//! Each stage either hands a complete artifact to the next or stops the
//! pipeline with an [`Error`] saying which stage failed and where.
use crate::{
    assembler::{AssembleError, Assembled},
    compiler::{self, CodegenError},
    diagnostic::{self, Stage},
    lexer::{self, LexError, Span},
    parser::{self, ast::Program, ParseError},
    runtime::{
        treewalk::{self, EvalError},
        vm::{RuntimeError, Vm},
        Host,
    },
};

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error(transparent)]
    Lex(#[from] LexError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Codegen(#[from] CodegenError),
    #[error(transparent)]
    Assemble(#[from] AssembleError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    #[error(transparent)]
    Eval(#[from] EvalError),
}

impl Error {
    pub fn stage(&self) -> Stage {
        match self {
            Self::Lex(_) => Stage::Lex,
            Self::Parse(_) => Stage::Parse,
            Self::Codegen(_) | Self::Eval(EvalError::Static(_)) => Stage::Codegen,
            Self::Assemble(_) => Stage::Assemble,
            Self::Runtime(_) | Self::Eval(EvalError::TooDeep { .. }) => Stage::Runtime,
        }
    }

    /// Where in the stage's input text the error was raised. Bytecode has
    /// no text, so runtime errors have no span.
    pub fn span(&self) -> Option<Span> {
        match self {
            Self::Lex(err) => Some(err.span.clone()),
            Self::Parse(err) => Some(err.span()),
            Self::Codegen(err) => Some(err.span()),
            Self::Assemble(err) => Some(err.span()),
            Self::Runtime(_) => None,
            Self::Eval(err) => Some(err.span()),
        }
    }

    /// Renders the error against the text the failing stage consumed.
    pub fn render(&self, text: &str) -> String {
        match (self, self.span()) {
            (Self::Runtime(err), _) => diagnostic::render_runtime(&err.kind, err.offset),
            (_, Some(span)) => diagnostic::render(self.stage(), self, text, span),
            (_, None) => format!("{}: {self}\n", self.stage()),
        }
    }
}

pub fn parse(source: &str) -> Result<Program, Error> {
    let tokens = lexer::tokenize(source)?;
    Ok(parser::parse(&tokens)?)
}

/// Source text to assembly text.
pub fn compile(source: &str) -> Result<String, Error> {
    let program = parse(source)?;
    let assembly = compiler::generate(&program)?;
    log::debug!("generated {} bytes of assembly", assembly.len());
    Ok(assembly)
}

/// Assembly text to bytecode.
pub fn assemble(assembly: &str) -> Result<Assembled, Error> {
    Ok(crate::assembler::assemble(assembly)?)
}

/// Runs raw bytecode to completion.
pub fn run<H: Host>(bytecode: &[u8], host: H) -> Result<H, Error> {
    let mut vm = Vm::new(bytecode, host);
    vm.run()?;
    Ok(vm.into_host())
}

/// Runs freshly assembled bytecode, naming variables in errors.
pub fn run_assembled<H: Host>(assembled: &Assembled, host: H) -> Result<H, Error> {
    let mut vm = Vm::new(&assembled.bytecode, host)
        .with_names(assembled.names.values().map(|name| &**name));
    vm.run()?;
    Ok(vm.into_host())
}

/// Every intermediate artifact of an in-memory run.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Artifacts {
    pub assembly: String,
    pub assembled: Assembled,
}

/// Compiles, assembles, and runs `source`, keeping the artifacts so that
/// an error can be rendered against the text it points into.
pub fn execute<H: Host>(source: &str, host: H) -> (Artifacts, Result<H, Error>) {
    let mut artifacts = Artifacts::default();
    let result = execute_into(source, host, &mut artifacts);
    (artifacts, result)
}

fn execute_into<H: Host>(source: &str, host: H, artifacts: &mut Artifacts) -> Result<H, Error> {
    artifacts.assembly = compile(source)?;
    artifacts.assembled = assemble(&artifacts.assembly)?;
    run_assembled(&artifacts.assembled, host)
}

/// Evaluates `source` with the tree walker instead of the VM.
pub fn interpret<H: Host>(source: &str, host: H) -> Result<H, Error> {
    let program = parse(source)?;
    Ok(treewalk::evaluate(&program, host)?)
}

#[cfg(test)]
mod tests {
    use super::{assemble, compile, execute, interpret, parse, Error};
    use crate::{
        bytecode::instructions,
        diagnostic::Stage,
        parser::{
            ast::{Expr, Ident, Program, Stmt},
            ParseError,
        },
    };
    use arbitrary::Unstructured;
    use arbtest::arbtest;
    use assert2::{check, let_assert};

    const VARIABLES: [&str; 5] = ["a", "b", "c", "x", "y"];
    const FUNCTIONS: [&str; 3] = ["f", "g", "h"];

    /// What a generated statement may refer to.
    #[derive(Clone, Default)]
    struct Env {
        variables: Vec<&'static str>,
        functions: Vec<(&'static str, usize)>,
    }

    fn ident(name: &str) -> Ident {
        Ident::new(name, 0..0)
    }

    fn arbitrary_expr(u: &mut Unstructured<'_>, env: &Env, depth: usize) -> arbitrary::Result<Expr> {
        let choice = if depth == 0 { 0 } else { u.int_in_range(0..=3)? };
        Ok(match choice {
            1 if !env.variables.is_empty() => Expr::Variable(ident(u.choose(&env.variables)?)),
            2 => Expr::binary(
                u.arbitrary()?,
                arbitrary_expr(u, env, depth - 1)?,
                arbitrary_expr(u, env, depth - 1)?,
            ),
            3 if !env.functions.is_empty() => {
                let &(name, arity) = u.choose(&env.functions)?;
                let mut args = vec![];
                for _ in 0..arity {
                    args.push(arbitrary_expr(u, env, depth - 1)?);
                }
                Expr::Call {
                    callee: ident(name),
                    args,
                }
            }
            _ => {
                let value: u8 = u.arbitrary()?;
                if u.arbitrary()? {
                    Expr::Number(f64::from(value))
                } else {
                    Expr::Number(f64::from(value) / 4.0)
                }
            }
        })
    }

    /// Statements with no free variables and no recursion: a function body
    /// never calls its own name, since the compiler registers a function
    /// before its body and the call would recurse.
    fn arbitrary_block(u: &mut Unstructured<'_>, env: &mut Env, depth: usize) -> arbitrary::Result<Vec<Stmt>> {
        let mut stmts = vec![];
        let mut defined = vec![];
        for _ in 0..u.int_in_range(0..=4)? {
            match u.int_in_range(0..=3)? {
                0 => {
                    let name = *u.choose(&VARIABLES)?;
                    let value = arbitrary_expr(u, env, 2)?;
                    env.variables.push(name);
                    stmts.push(Stmt::Assign {
                        target: ident(name),
                        value,
                    });
                }
                1 if depth > 0 => {
                    let name = *u.choose(&FUNCTIONS)?;
                    if defined.contains(&name) {
                        continue;
                    }
                    let mut params = vec![];
                    for param in VARIABLES {
                        if params.len() < 3 && u.arbitrary()? {
                            params.push(param);
                        }
                    }
                    let mut inner = env.clone();
                    // the body would resolve `name` to the function itself
                    inner.functions.retain(|(visible, _)| *visible != name);
                    inner.variables.extend(&params);
                    let mut body = arbitrary_block(u, &mut inner, depth - 1)?;
                    if u.ratio(3, 4)? {
                        body.push(Stmt::Return {
                            value: arbitrary_expr(u, &inner, 2)?,
                            span: 0..0,
                        });
                    }
                    defined.push(name);
                    // calls resolve to the innermost definition
                    env.functions.retain(|(visible, _)| *visible != name);
                    env.functions.push((name, params.len()));
                    stmts.push(Stmt::FuncDef {
                        name: ident(name),
                        params: params.into_iter().map(ident).collect(),
                        body,
                    });
                }
                2 => stmts.push(Stmt::Expr(Expr::Call {
                    callee: ident("print"),
                    args: vec![arbitrary_expr(u, env, 2)?],
                })),
                _ => stmts.push(Stmt::Expr(arbitrary_expr(u, env, 2)?)),
            }
        }
        Ok(stmts)
    }

    fn arbitrary_program(u: &mut Unstructured<'_>) -> arbitrary::Result<Program> {
        Ok(Program(arbitrary_block(u, &mut Env::default(), 2)?))
    }

    fn same_values(lhs: &[f64], rhs: &[f64]) -> bool {
        lhs.len() == rhs.len()
            && lhs
                .iter()
                .zip(rhs)
                .all(|(l, r)| l == r || (l.is_nan() && r.is_nan()))
    }

    #[test]
    fn compiled_programs_print_what_the_tree_walker_prints() {
        arbtest(|u| {
            let source = arbitrary_program(u)?.to_string();
            let expected = interpret(&source, vec![]);
            let (_, actual) = execute(&source, vec![]);
            check!(expected.is_ok(), "{source}");
            check!(actual.is_ok(), "{source}");
            if let (Ok(expected), Ok(actual)) = (expected, actual) {
                check!(same_values(&actual, &expected), "{source}\n{actual:?} != {expected:?}");
            }
            Ok(())
        });
    }

    #[test]
    fn pretty_printed_source_reparses_to_itself() {
        arbtest(|u| {
            let source = arbitrary_program(u)?.to_string();
            let_assert!(Ok(program) = parse(&source));
            check!(program.to_string() == source);
            Ok(())
        });
    }

    #[test]
    fn labels_land_on_instruction_boundaries() {
        arbtest(|u| {
            let source = arbitrary_program(u)?.to_string();
            let_assert!(Ok(assembly) = compile(&source));
            let_assert!(Ok(assembled) = assemble(&assembly));
            let mut boundaries = vec![];
            for decoded in instructions(&assembled.bytecode) {
                let_assert!(Ok((offset, _)) = decoded);
                boundaries.push(offset);
            }
            boundaries.push(assembled.bytecode.len());
            for (label, offset) in &assembled.labels {
                check!(boundaries.contains(&(*offset as usize)), "{label} at {offset}");
            }
            Ok(())
        });
    }

    #[test]
    fn sum_prints_seven() {
        let source = "def f(a,b){return a+b;} a=f(3,4); print(a);";
        let (_, result) = execute(source, vec![]);
        check!(result == Ok(vec![7.0]));
        check!(interpret(source, vec![]) == Ok(vec![7.0]));
    }

    #[test]
    fn first_argument_binds_first_parameter() {
        let (_, result) = execute("def f(a,b){return a-b;} print(f(10,3));", vec![]);
        check!(result == Ok(vec![7.0]));
    }

    #[test]
    fn failing_stage_is_reported() {
        let_assert!(Err(err) = compile("a = 1 $ 2;"));
        check!(err.stage() == Stage::Lex);
        let_assert!(Err(err) = compile("a = ;"));
        check!(err.stage() == Stage::Parse);
        let_assert!(Err(err) = compile("a = b;"));
        check!(err.stage() == Stage::Codegen);
        check!(err.span() == Some(4..5));
    }

    #[test]
    fn no_artifact_after_a_failed_stage() {
        let (artifacts, result) = execute("print(x);", vec![]);
        check!(artifacts.assembly.is_empty());
        check!(artifacts.assembled.bytecode.is_empty());
        let_assert!(Err(Error::Codegen(_)) = result);
    }

    #[test]
    fn rendered_against_the_source() {
        let source = "a = 1;\nprint(b);";
        let_assert!(Err(err) = compile(source));
        check!(err.render(source) == "CodegenError(2:7): variable 'b' not found\nprint(b);\n      ^\n");
    }

    #[test]
    fn runtime_errors_render_with_offsets() {
        let_assert!(Err(err) = super::run(&[2], vec![]));
        check!(err.stage() == Stage::Runtime);
        check!(err.span() == None);
        check!(err.render("") == "RuntimeError(0x0000): return stack is empty\n");
    }

    #[test]
    fn runaway_recursion_in_the_tree_walker_is_a_runtime_error() {
        let_assert!(Err(err) = interpret("def f() { return f(); } x = f();", vec![]));
        check!(err.stage() == Stage::Runtime);
    }

    #[test]
    fn very_long_expressions_are_rejected_not_overflowed() {
        let source = format!("x = {}; print(x);", vec!["1"; 50_000].join(" + "));
        let (artifacts, result) = execute(&source, vec![]);
        let_assert!(Err(Error::Parse(ParseError::TooDeep { .. })) = result);
        check!(artifacts.assembly.is_empty());
        let_assert!(Err(Error::Parse(ParseError::TooDeep { .. })) = interpret(&source, vec![]));
    }

    #[test]
    fn builtin_print_before_a_user_print_agrees_with_the_tree_walker() {
        let source = "def g() { print(5); return 0; } def print(v) { return v; } x = g();";
        let (_, result) = execute(source, vec![]);
        check!(result == Ok(vec![5.0]));
        check!(interpret(source, vec![]) == Ok(vec![5.0]));
    }

    #[test]
    fn nested_function_may_reuse_the_enclosing_name() {
        let source = "def h(a) { def h(a, y) { return a + y; } return h(a, 1); } print(h(2));";
        let (_, result) = execute(source, vec![]);
        check!(result == Ok(vec![3.0]));
        check!(interpret(source, vec![]) == Ok(vec![3.0]));
    }
}
