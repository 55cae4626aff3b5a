use core::fmt;

pub use logos::Span;
use logos::{Lexer, Logos};

/// A value paired with the byte range it was read from.
pub type Spanned<T> = (T, Span);

fn read_number(lexer: &mut Lexer<Token>) -> Result<f64, LexerError> {
    lexer
        .slice()
        .parse::<f64>()
        .ok()
        .filter(|value: &f64| value.is_finite())
        .ok_or(LexerError::MalformedNumber)
}

#[derive(thiserror::Error, Debug, PartialEq, Clone, Default)]
pub enum LexerError {
    #[default]
    #[error("invalid token encountered")]
    Invalid,
    #[error("unknown symbol '{0}'")]
    UnknownSymbol(char),
    #[error("malformed number")]
    MalformedNumber,
}

/// A lexer failure, positioned in the source it was raised for.
#[derive(thiserror::Error, Debug, PartialEq, Clone)]
#[error("{kind}")]
pub struct LexError {
    pub kind: LexerError,
    pub span: Span,
}

/// Tokens of the source language.
#[derive(Debug, Clone, PartialEq, Logos)]
#[logos(error = LexerError)]
#[logos(skip r"[ \t\r\n\f]+")]
pub enum Token {
    #[token("def")]
    Def,
    #[token("return")]
    Return,
    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*", |l| Box::from(l.slice()))]
    Identifier(Box<str>),
    #[regex(r"[0-9]+(\.[0-9]*)?", read_number)]
    Number(f64),

    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token("=")]
    Assign,
    #[token(";")]
    Semicolon,
    #[token(",")]
    Comma,
}

impl Token {
    pub fn lexer(source: &str) -> Lexer<Self> {
        <Self as Logos>::lexer(source)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Def => write!(f, "def"),
            Self::Return => write!(f, "return"),
            Self::Identifier(name) => write!(f, "{name}"),
            Self::Number(value) => write!(f, "{value}"),
            Self::Plus => write!(f, "+"),
            Self::Minus => write!(f, "-"),
            Self::Star => write!(f, "*"),
            Self::Slash => write!(f, "/"),
            Self::LParen => write!(f, "("),
            Self::RParen => write!(f, ")"),
            Self::LBrace => write!(f, "{{"),
            Self::RBrace => write!(f, "}}"),
            Self::Assign => write!(f, "="),
            Self::Semicolon => write!(f, ";"),
            Self::Comma => write!(f, ","),
        }
    }
}

/// Lexes the whole source, stopping at the first bad token.
pub fn tokenize(source: &str) -> Result<Vec<Spanned<Token>>, LexError> {
    let mut tokens = vec![];
    for (token, span) in Token::lexer(source).spanned() {
        match token {
            Ok(token) => tokens.push((token, span)),
            // logos can't see the offending character, so recover it here
            Err(LexerError::Invalid) => {
                let found = source[span.start..].chars().next().unwrap_or('\0');
                return Err(LexError {
                    kind: LexerError::UnknownSymbol(found),
                    span,
                });
            }
            Err(kind) => return Err(LexError { kind, span }),
        }
    }
    log::trace!("lexed {} tokens", tokens.len());
    Ok(tokens)
}
