//! Plain-text error positioning.
//!
//! ```text
//! ParseError(2:1): expected ';' instead of 'b'
//! b = 2;
//! ^
//! ```
use core::fmt;

use crate::lexer::Span;

/// How many spaces a tab occupies when a line is echoed back.
pub const TAB_WIDTH: usize = 4;

/// The pipeline stage an error was raised in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Lex,
    Parse,
    Codegen,
    Assemble,
    Runtime,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Lex => "LexError",
            Self::Parse => "ParseError",
            Self::Codegen => "CodegenError",
            Self::Assemble => "AssembleError",
            Self::Runtime => "RuntimeError",
        })
    }
}

/// A 1-based line and column, counting columns in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    pub line: usize,
    pub column: usize,
}

fn floor_boundary(text: &str, offset: usize) -> usize {
    let mut offset = offset.min(text.len());
    while !text.is_char_boundary(offset) {
        offset -= 1;
    }
    offset
}

fn line_start(text: &str, offset: usize) -> usize {
    text[..offset].rfind('\n').map_or(0, |newline| newline + 1)
}

impl Location {
    pub fn of(text: &str, offset: usize) -> Self {
        let offset = floor_boundary(text, offset);
        let start = line_start(text, offset);
        Self {
            line: text[..start].matches('\n').count() + 1,
            column: text[start..offset].chars().count() + 1,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

pub fn expand_tabs(text: &str) -> String {
    text.replace('\t', &" ".repeat(TAB_WIDTH))
}

/// Renders a positioned error: a header, the offending line, and carets
/// under the part of the line `span` covers.
pub fn render(stage: Stage, message: impl fmt::Display, text: &str, span: Span) -> String {
    let start = floor_boundary(text, span.start);
    let location = Location::of(text, start);
    let line_begin = line_start(text, start);
    let line_end = text[line_begin..]
        .find('\n')
        .map_or(text.len(), |newline| line_begin + newline);
    let line = text[line_begin..line_end].trim_end_matches('\r');

    let line_limit = (line_begin + line.len()).max(start);
    let end = floor_boundary(text, span.end).clamp(start, line_limit);
    let indent = expand_tabs(&text[line_begin..start]).chars().count();
    let width = expand_tabs(&text[start..end]).chars().count().max(1);

    format!(
        "{stage}({location}): {message}\n{}\n{}{}\n",
        expand_tabs(line),
        " ".repeat(indent),
        "^".repeat(width)
    )
}

/// Runtime errors have no source text, only the offset of the instruction.
pub fn render_runtime(message: impl fmt::Display, offset: usize) -> String {
    format!("{}(0x{offset:04x}): {message}\n", Stage::Runtime)
}
