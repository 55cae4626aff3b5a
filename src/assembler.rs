//! Two-pass assembly of textual stack-machine code into bytecode.
//!
//! Pass 1 walks the instructions to assign each label the byte offset of
//! the instruction following it. Pass 2 encodes every instruction, looking
//! label operands up in that table.
pub mod lexer;

use std::collections::{BTreeMap, HashMap, HashSet};

use lexer::{AsmLexerError, AsmToken};

use crate::{
    bytecode::{name_hash, Instruction, Labels, Opcode},
    compiler::PRINT_BUILTIN,
    lexer::Span,
    ops::Interrupt,
};

#[derive(thiserror::Error, Debug, PartialEq, Clone)]
pub enum AssembleError {
    #[error("unrecognized input '{text}'")]
    InvalidToken { text: Box<str>, span: Span },
    #[error("malformed number '{text}'")]
    MalformedNumber { text: Box<str>, span: Span },
    #[error("expected an instruction or label instead of '{found}'")]
    UnexpectedToken { found: AsmToken, span: Span },
    #[error("'{opcode}' expects {expected}")]
    MissingOperand {
        opcode: Opcode,
        expected: &'static str,
        span: Span,
    },
    #[error("interrupt id must be an integer from 0 to 255")]
    InvalidInterrupt { span: Span },
    #[error("label '{name}' is defined more than once")]
    DuplicateLabel { name: Box<str>, span: Span },
    #[error("undefined label '{name}'")]
    UndefinedLabel { name: Box<str>, span: Span },
    #[error("names '{first}' and '{second}' hash to the same value")]
    HashCollision {
        first: Box<str>,
        second: Box<str>,
        span: Span,
    },
    #[error("program does not fit in a 32-bit address space")]
    AddressOverflow { span: Span },
}

impl AssembleError {
    pub fn span(&self) -> Span {
        match self {
            Self::InvalidToken { span, .. }
            | Self::MalformedNumber { span, .. }
            | Self::UnexpectedToken { span, .. }
            | Self::MissingOperand { span, .. }
            | Self::InvalidInterrupt { span }
            | Self::DuplicateLabel { span, .. }
            | Self::UndefinedLabel { span, .. }
            | Self::HashCollision { span, .. }
            | Self::AddressOverflow { span } => span.clone(),
        }
    }
}

/// The result of a successful assembly.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Assembled {
    pub bytecode: Vec<u8>,
    /// Every label defined in the unit, with the offset it resolved to.
    pub labels: Labels,
    /// Every variable name the unit refers to, by hash.
    pub names: BTreeMap<u64, Box<str>>,
}

#[derive(Debug, Clone, PartialEq)]
enum Operand {
    None,
    Name(Box<str>),
    Number(f64),
}

#[derive(Debug, Clone, PartialEq)]
enum Item {
    Label(Box<str>),
    Instruction { opcode: Opcode, operand: Operand },
}

/// Reads the token stream into labels and instructions with checked
/// operand kinds.
struct ItemReader<'s> {
    source: &'s str,
    tokens: logos::SpannedIter<'s, AsmToken>,
}

impl<'s> ItemReader<'s> {
    fn new(source: &'s str) -> Self {
        Self {
            source,
            tokens: AsmToken::lexer(source).spanned(),
        }
    }

    fn next_token(&mut self) -> Result<Option<(AsmToken, Span)>, AssembleError> {
        match self.tokens.next() {
            None => Ok(None),
            Some((Ok(token), span)) => Ok(Some((token, span))),
            Some((Err(AsmLexerError::MalformedNumber), span)) => Err(AssembleError::MalformedNumber {
                text: Box::from(&self.source[span.clone()]),
                span,
            }),
            Some((Err(AsmLexerError::Invalid), span)) => Err(AssembleError::InvalidToken {
                text: Box::from(&self.source[span.clone()]),
                span,
            }),
        }
    }

    fn read(mut self) -> Result<Vec<(Item, Span)>, AssembleError> {
        let mut items = vec![];
        while let Some((token, span)) = self.next_token()? {
            let opcode = match token {
                AsmToken::Label(name) => {
                    items.push((Item::Label(name), span));
                    continue;
                }
                AsmToken::Mnemonic(opcode) => opcode,
                found => return Err(AssembleError::UnexpectedToken { found, span }),
            };
            let (operand, end) = self.operand(opcode, &span)?;
            items.push((Item::Instruction { opcode, operand }, span.start..end));
        }
        Ok(items)
    }

    /// Reads the operand `opcode` takes, returning it with where it ends.
    fn operand(&mut self, opcode: Opcode, span: &Span) -> Result<(Operand, usize), AssembleError> {
        let missing = |expected| AssembleError::MissingOperand {
            opcode,
            expected,
            span: span.clone(),
        };
        match opcode {
            Opcode::Jmp | Opcode::Call | Opcode::Set | Opcode::Get | Opcode::Unset => {
                match self.next_token()? {
                    Some((AsmToken::Name(name), operand)) => Ok((Operand::Name(name), operand.end)),
                    // names that happen to spell a mnemonic are still names here
                    Some((AsmToken::Mnemonic(_), operand)) => Ok((
                        Operand::Name(Box::from(&self.source[operand.clone()])),
                        operand.end,
                    )),
                    _ => Err(missing("a name")),
                }
            }
            Opcode::Push | Opcode::Int => match self.next_token()? {
                Some((AsmToken::Number(value), operand)) => Ok((Operand::Number(value), operand.end)),
                _ => Err(missing("a number")),
            },
            Opcode::Ret | Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div | Opcode::Pop => {
                Ok((Operand::None, span.end))
            }
        }
    }
}

/// An instruction waiting for its label operand to be resolved.
#[derive(Debug, Clone)]
enum Pending {
    Ready(Instruction),
    Jump { opcode: Opcode, target: Box<str> },
}

impl Pending {
    fn encoded_len(&self) -> usize {
        match self {
            Self::Ready(instruction) => instruction.encoded_len(),
            Self::Jump { opcode, .. } => opcode.encoded_len(),
        }
    }
}

pub struct Assembler {
    labels: Labels,
    hashes: HashMap<u64, Box<str>>,
    hasher: fn(&str) -> u64,
}

impl Default for Assembler {
    fn default() -> Self {
        Self::with_hasher(name_hash)
    }
}

impl Assembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// An assembler that hashes variable names with `hasher` instead of
    /// [`name_hash`]. The VM only agrees with [`name_hash`].
    pub fn with_hasher(hasher: fn(&str) -> u64) -> Self {
        Self {
            labels: Labels::new(),
            hashes: HashMap::new(),
            hasher,
        }
    }

    fn hash(&mut self, name: Box<str>, span: &Span) -> Result<u64, AssembleError> {
        let hash = (self.hasher)(&name);
        match self.hashes.get(&hash) {
            Some(seen) if *seen != name => Err(AssembleError::HashCollision {
                first: seen.clone(),
                second: name,
                span: span.clone(),
            }),
            Some(_) => Ok(hash),
            None => {
                self.hashes.insert(hash, name);
                Ok(hash)
            }
        }
    }

    fn lower(
        &mut self,
        opcode: Opcode,
        operand: Operand,
        span: &Span,
        defined: &HashSet<Box<str>>,
    ) -> Result<Pending, AssembleError> {
        Ok(Pending::Ready(match (opcode, operand) {
            (Opcode::Call, Operand::Name(target))
                if target.as_ref() == PRINT_BUILTIN && !defined.contains(&target) =>
            {
                Instruction::Int(Interrupt::Print.id())
            }
            (Opcode::Jmp | Opcode::Call, Operand::Name(target)) => {
                return Ok(Pending::Jump { opcode, target })
            }
            (Opcode::Set, Operand::Name(name)) => Instruction::Set(self.hash(name, span)?),
            (Opcode::Get, Operand::Name(name)) => Instruction::Get(self.hash(name, span)?),
            (Opcode::Unset, Operand::Name(name)) => Instruction::Unset(self.hash(name, span)?),
            (Opcode::Push, Operand::Number(value)) => Instruction::Push(value),
            (Opcode::Int, Operand::Number(value)) => {
                if value.fract() != 0.0 || !(0.0..=255.0).contains(&value) {
                    return Err(AssembleError::InvalidInterrupt { span: span.clone() });
                }
                Instruction::Int(value as u8)
            }
            (Opcode::Ret, _) => Instruction::Ret,
            (Opcode::Add, _) => Instruction::Add,
            (Opcode::Sub, _) => Instruction::Sub,
            (Opcode::Mul, _) => Instruction::Mul,
            (Opcode::Div, _) => Instruction::Div,
            (Opcode::Pop, _) => Instruction::Pop,
            (opcode, _) => {
                return Err(AssembleError::MissingOperand {
                    opcode,
                    expected: "an operand",
                    span: span.clone(),
                })
            }
        }))
    }

    pub fn assemble(mut self, source: &str) -> Result<Assembled, AssembleError> {
        let items = ItemReader::new(source).read()?;

        // `call print` only reaches the interrupt when nothing else claims the name
        let defined = items
            .iter()
            .filter_map(|(item, _)| match item {
                Item::Label(name) => Some(name.clone()),
                Item::Instruction { .. } => None,
            })
            .collect::<HashSet<_>>();

        // phase 1: lower instructions and set label addresses
        let mut pending = vec![];
        let mut cursor = 0usize;
        for (item, span) in items {
            let address =
                u32::try_from(cursor).map_err(|_| AssembleError::AddressOverflow { span: span.clone() })?;
            match item {
                Item::Label(name) => {
                    log::trace!("label {name} at 0x{address:04x}");
                    if self.labels.insert(name.clone(), address).is_some() {
                        return Err(AssembleError::DuplicateLabel { name, span });
                    }
                }
                Item::Instruction { opcode, operand } => {
                    let instruction = self.lower(opcode, operand, &span, &defined)?;
                    cursor += instruction.encoded_len();
                    pending.push((instruction, span));
                }
            }
        }
        if let Some((_, span)) = pending.last() {
            // the end of the buffer is itself a valid jump target
            u32::try_from(cursor).map_err(|_| AssembleError::AddressOverflow { span: span.clone() })?;
        }

        // phase 2: resolve jump targets and serialize
        let mut bytecode = Vec::with_capacity(cursor);
        for (instruction, span) in pending {
            let instruction = match instruction {
                Pending::Ready(instruction) => instruction,
                Pending::Jump { opcode, target } => {
                    let Some(&address) = self.labels.get(&target) else {
                        return Err(AssembleError::UndefinedLabel { name: target, span });
                    };
                    if opcode == Opcode::Call {
                        Instruction::Call(address)
                    } else {
                        Instruction::Jmp(address)
                    }
                }
            };
            instruction.encode(&mut bytecode);
        }

        log::debug!(
            "assembled {} bytes with {} labels",
            bytecode.len(),
            self.labels.len()
        );
        Ok(Assembled {
            bytecode,
            labels: self.labels,
            names: self.hashes.into_iter().collect(),
        })
    }
}

/// Assembles a whole unit of assembly text.
pub fn assemble(source: &str) -> Result<Assembled, AssembleError> {
    Assembler::new().assemble(source)
}
