pub mod assembler;
pub mod bytecode;
pub mod compiler;
pub mod diagnostic;
pub mod lexer;
pub mod ops;
pub mod parser;
pub mod pipeline;
pub mod runtime;

pub use assembler::{assemble, AssembleError, Assembled};
pub use bytecode::{disassemble, name_hash, Instruction, Labels, Opcode};
pub use compiler::{generate, CodegenError};
pub use lexer::{tokenize, LexError, Span, Token};
pub use ops::{BinaryOp, Interrupt};
pub use parser::{
    ast::{Expr, Ident, Program, Stmt},
    parse, ParseError,
};
pub use runtime::{
    treewalk::{evaluate, EvalError},
    vm::{RuntimeError, RuntimeErrorKind, StepOutcome, Vm},
    Host, PrintedValue, StderrHost,
};
