use core::fmt;

use logos::{Lexer, Logos};

use crate::bytecode::Opcode;

fn read_number(lexer: &mut Lexer<AsmToken>) -> Result<f64, AsmLexerError> {
    lexer
        .slice()
        .parse()
        .map_err(|_| AsmLexerError::MalformedNumber)
}

fn label_name(lexer: &mut Lexer<AsmToken>) -> Box<str> {
    let slice = lexer.slice();
    Box::from(&slice[..slice.len() - 1])
}

#[derive(thiserror::Error, Debug, PartialEq, Clone, Default)]
pub enum AsmLexerError {
    #[default]
    #[error("unrecognized input")]
    Invalid,
    #[error("malformed number")]
    MalformedNumber,
}

/// Tokens of the assembly language.
#[derive(Debug, Clone, PartialEq, Logos)]
#[logos(error = AsmLexerError)]
#[logos(skip r"[ \t\r\n\f]+")]
#[logos(skip r";[^\n]*")]
pub enum AsmToken {
    #[token("jmp", |_| Opcode::Jmp)]
    #[token("call", |_| Opcode::Call)]
    #[token("ret", |_| Opcode::Ret)]
    #[token("add", |_| Opcode::Add)]
    #[token("sub", |_| Opcode::Sub)]
    #[token("mul", |_| Opcode::Mul)]
    #[token("div", |_| Opcode::Div)]
    #[token("push", |_| Opcode::Push)]
    #[token("pop", |_| Opcode::Pop)]
    #[token("set", |_| Opcode::Set)]
    #[token("get", |_| Opcode::Get)]
    #[token("unset", |_| Opcode::Unset)]
    #[token("int", |_| Opcode::Int)]
    Mnemonic(Opcode),
    /// `name:`, carrying the name without the colon.
    #[regex(r"[A-Za-z_@][A-Za-z0-9_@.]*:", label_name)]
    Label(Box<str>),
    #[regex(r"[A-Za-z_@][A-Za-z0-9_@.]*", |l| Box::from(l.slice()))]
    Name(Box<str>),
    #[regex(r"-?[0-9]+(\.[0-9]+)?([eE][+-]?[0-9]+)?", read_number)]
    Number(f64),
}

impl AsmToken {
    pub fn lexer(source: &str) -> Lexer<Self> {
        <Self as Logos>::lexer(source)
    }
}

impl fmt::Display for AsmToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mnemonic(opcode) => write!(f, "{opcode}"),
            Self::Label(name) => write!(f, "{name}:"),
            Self::Name(name) => write!(f, "{name}"),
            Self::Number(value) => write!(f, "{value}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{AsmLexerError, AsmToken};
    use crate::bytecode::Opcode;
    use assert2::check;

    fn kinds(source: &str) -> Vec<Result<AsmToken, AsmLexerError>> {
        AsmToken::lexer(source).collect()
    }

    #[test]
    fn generated_function_prologue() {
        check!(
            kinds("jmp @f.g_end@\nf.g:\n    set f.g.a ; comment\n")
                == [
                    Ok(AsmToken::Mnemonic(Opcode::Jmp)),
                    Ok(AsmToken::Name("@f.g_end@".into())),
                    Ok(AsmToken::Label("f.g".into())),
                    Ok(AsmToken::Mnemonic(Opcode::Set)),
                    Ok(AsmToken::Name("f.g.a".into())),
                ]
        );
    }

    #[test]
    fn mnemonic_prefixes_are_names() {
        check!(kinds("pops") == [Ok(AsmToken::Name("pops".into()))]);
        check!(kinds("ret:") == [Ok(AsmToken::Label("ret".into()))]);
    }

    #[test]
    fn numbers() {
        check!(
            kinds("push -2.5 push 1e3 push 0.000001")
                == [
                    Ok(AsmToken::Mnemonic(Opcode::Push)),
                    Ok(AsmToken::Number(-2.5)),
                    Ok(AsmToken::Mnemonic(Opcode::Push)),
                    Ok(AsmToken::Number(1000.0)),
                    Ok(AsmToken::Mnemonic(Opcode::Push)),
                    Ok(AsmToken::Number(0.000001)),
                ]
        );
    }

    #[test]
    fn stray_characters_are_errors() {
        check!(kinds("$") == [Err(AsmLexerError::Invalid)]);
    }
}
