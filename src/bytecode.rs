//! The binary instruction format shared by the assembler and the VM.
//!
//! Every instruction is a one byte opcode tag followed by a fixed-width
//! operand. Multi-byte operands are little-endian.
//!
//! | Opcode | Operand |
//! |---|---|
//! | `jmp`, `call` | `u32` byte offset |
//! | `push` | `f64` |
//! | `set`, `get`, `unset` | `u64` name hash |
//! | `int` | `u8` interrupt id |
//! | everything else | none |
use core::fmt;
use std::collections::BTreeMap;

/// Byte offsets of named positions in a bytecode buffer.
pub type Labels = BTreeMap<Box<str>, u32>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    Jmp = 0,
    Call,
    Ret,
    Add,
    Sub,
    Mul,
    Div,
    Push,
    Pop,
    Set,
    Get,
    Unset,
    Int,
}

impl Opcode {
    pub const ALL: [Opcode; 13] = [
        Self::Jmp,
        Self::Call,
        Self::Ret,
        Self::Add,
        Self::Sub,
        Self::Mul,
        Self::Div,
        Self::Push,
        Self::Pop,
        Self::Set,
        Self::Get,
        Self::Unset,
        Self::Int,
    ];

    pub fn mnemonic(self) -> &'static str {
        match self {
            Self::Jmp => "jmp",
            Self::Call => "call",
            Self::Ret => "ret",
            Self::Add => "add",
            Self::Sub => "sub",
            Self::Mul => "mul",
            Self::Div => "div",
            Self::Push => "push",
            Self::Pop => "pop",
            Self::Set => "set",
            Self::Get => "get",
            Self::Unset => "unset",
            Self::Int => "int",
        }
    }

    /// Width in bytes of the operand following the tag.
    pub fn operand_width(self) -> usize {
        match self {
            Self::Jmp | Self::Call => 4,
            Self::Push | Self::Set | Self::Get | Self::Unset => 8,
            Self::Int => 1,
            Self::Ret | Self::Add | Self::Sub | Self::Mul | Self::Div | Self::Pop => 0,
        }
    }

    pub fn encoded_len(self) -> usize {
        1 + self.operand_width()
    }
}

impl TryFrom<u8> for Opcode {
    type Error = DecodeError;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        Self::ALL
            .get(usize::from(tag))
            .copied()
            .ok_or(DecodeError::UnknownOpcode(tag))
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    #[error("unknown opcode 0x{0:02x}")]
    UnknownOpcode(u8),
    #[error("no instruction at offset 0x{0:04x}")]
    OutOfRange(usize),
    #[error("truncated bytecode: '{opcode}' needs {needed} operand byte(s), {available} left")]
    Truncated {
        opcode: Opcode,
        needed: usize,
        available: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Instruction {
    Jmp(u32),
    Call(u32),
    Ret,
    Add,
    Sub,
    Mul,
    Div,
    Push(f64),
    Pop,
    Set(u64),
    Get(u64),
    Unset(u64),
    Int(u8),
}

impl Instruction {
    pub fn opcode(&self) -> Opcode {
        match self {
            Self::Jmp(_) => Opcode::Jmp,
            Self::Call(_) => Opcode::Call,
            Self::Ret => Opcode::Ret,
            Self::Add => Opcode::Add,
            Self::Sub => Opcode::Sub,
            Self::Mul => Opcode::Mul,
            Self::Div => Opcode::Div,
            Self::Push(_) => Opcode::Push,
            Self::Pop => Opcode::Pop,
            Self::Set(_) => Opcode::Set,
            Self::Get(_) => Opcode::Get,
            Self::Unset(_) => Opcode::Unset,
            Self::Int(_) => Opcode::Int,
        }
    }

    pub fn encoded_len(&self) -> usize {
        self.opcode().encoded_len()
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        out.push(self.opcode() as u8);
        match *self {
            Self::Jmp(address) | Self::Call(address) => out.extend_from_slice(&address.to_le_bytes()),
            Self::Push(value) => out.extend_from_slice(&value.to_le_bytes()),
            Self::Set(hash) | Self::Get(hash) | Self::Unset(hash) => {
                out.extend_from_slice(&hash.to_le_bytes())
            }
            Self::Int(id) => out.push(id),
            Self::Ret | Self::Add | Self::Sub | Self::Mul | Self::Div | Self::Pop => {}
        }
    }

    /// Decodes the instruction starting at `offset`.
    pub fn decode(bytes: &[u8], offset: usize) -> Result<Self, DecodeError> {
        let tag = *bytes.get(offset).ok_or(DecodeError::OutOfRange(offset))?;
        let opcode = Opcode::try_from(tag)?;
        let mut reader = Reader::new(bytes, offset + 1);
        Ok(match opcode {
            Opcode::Jmp => Self::Jmp(u32::from_le_bytes(reader.read_array(opcode)?)),
            Opcode::Call => Self::Call(u32::from_le_bytes(reader.read_array(opcode)?)),
            Opcode::Ret => Self::Ret,
            Opcode::Add => Self::Add,
            Opcode::Sub => Self::Sub,
            Opcode::Mul => Self::Mul,
            Opcode::Div => Self::Div,
            Opcode::Push => Self::Push(f64::from_le_bytes(reader.read_array(opcode)?)),
            Opcode::Pop => Self::Pop,
            Opcode::Set => Self::Set(u64::from_le_bytes(reader.read_array(opcode)?)),
            Opcode::Get => Self::Get(u64::from_le_bytes(reader.read_array(opcode)?)),
            Opcode::Unset => Self::Unset(u64::from_le_bytes(reader.read_array(opcode)?)),
            Opcode::Int => Self::Int(reader.read_u8(opcode)?),
        })
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let opcode = self.opcode();
        match self {
            Self::Jmp(address) | Self::Call(address) => write!(f, "{opcode} 0x{address:04x}"),
            Self::Push(value) => write!(f, "{opcode} {value}"),
            Self::Set(hash) | Self::Get(hash) | Self::Unset(hash) => {
                write!(f, "{opcode} #{hash:016x}")
            }
            Self::Int(id) => write!(f, "{opcode} {id}"),
            _ => write!(f, "{opcode}"),
        }
    }
}

/// Bounds-checked cursor over operand bytes.
struct Reader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8], offset: usize) -> Self {
        Self { bytes, offset }
    }

    fn take(&mut self, len: usize, opcode: Opcode) -> Result<&'a [u8], DecodeError> {
        let rest = self.bytes.get(self.offset..).unwrap_or_default();
        let slice = rest.get(..len).ok_or(DecodeError::Truncated {
            opcode,
            needed: len,
            available: rest.len(),
        })?;
        self.offset += len;
        Ok(slice)
    }

    fn read_u8(&mut self, opcode: Opcode) -> Result<u8, DecodeError> {
        Ok(self.take(1, opcode)?[0])
    }

    fn read_array<const N: usize>(&mut self, opcode: Opcode) -> Result<[u8; N], DecodeError> {
        let slice = self.take(N, opcode)?;
        let mut array = [0; N];
        array.copy_from_slice(slice);
        Ok(array)
    }
}

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// FNV-1a over the UTF-8 bytes of a variable name.
pub fn name_hash(name: &str) -> u64 {
    name.bytes().fold(FNV_OFFSET, |hash, byte| {
        (hash ^ u64::from(byte)).wrapping_mul(FNV_PRIME)
    })
}

/// Iterates over `(offset, instruction)` pairs until the buffer ends or an
/// instruction fails to decode.
pub fn instructions(bytes: &[u8]) -> impl Iterator<Item = Result<(usize, Instruction), DecodeError>> + '_ {
    let mut offset = 0;
    let mut failed = false;
    core::iter::from_fn(move || {
        if failed || offset >= bytes.len() {
            return None;
        }
        match Instruction::decode(bytes, offset) {
            Ok(instruction) => {
                let at = offset;
                offset += instruction.encoded_len();
                Some(Ok((at, instruction)))
            }
            Err(err) => {
                failed = true;
                Some(Err(err))
            }
        }
    })
}

/// Renders a listing of `bytes`, one instruction per line.
///
/// With a label table, label definitions are printed above the offset they
/// name and jump targets are annotated with the label they point at.
pub fn disassemble(bytes: &[u8], labels: Option<&Labels>) -> Result<String, DecodeError> {
    let mut by_offset: BTreeMap<u32, Vec<&str>> = BTreeMap::new();
    for (name, offset) in labels.into_iter().flatten() {
        by_offset.entry(*offset).or_default().push(name);
    }

    let mut out = String::new();
    for decoded in instructions(bytes) {
        let (offset, instruction) = decoded?;
        if let Some(names) = u32::try_from(offset).ok().and_then(|o| by_offset.get(&o)) {
            for name in names {
                out.push_str(&format!("{name}:\n"));
            }
        }
        out.push_str(&format!("    0x{offset:04x}  {instruction}"));
        if let Instruction::Jmp(target) | Instruction::Call(target) = instruction {
            if let Some(names) = by_offset.get(&target) {
                out.push_str(&format!("  ; {}", names.join(", ")));
            }
        }
        out.push('\n');
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::{disassemble, instructions, name_hash, DecodeError, Instruction, Labels, Opcode};
    use assert2::{check, let_assert};

    fn encode_all(program: &[Instruction]) -> Vec<u8> {
        let mut out = vec![];
        for instruction in program {
            instruction.encode(&mut out);
        }
        out
    }

    #[test]
    fn tags_follow_declaration_order() {
        for (tag, opcode) in Opcode::ALL.iter().enumerate() {
            check!(*opcode as usize == tag);
            let_assert!(Ok(decoded) = Opcode::try_from(tag as u8));
            check!(decoded == *opcode);
        }
        check!(Opcode::try_from(13) == Err(DecodeError::UnknownOpcode(13)));
    }

    #[test]
    fn encoding_is_little_endian() {
        let mut out = vec![];
        Instruction::Jmp(0x0102_0304).encode(&mut out);
        check!(out == [0, 4, 3, 2, 1]);

        out.clear();
        Instruction::Push(1.0).encode(&mut out);
        check!(out == [7, 0, 0, 0, 0, 0, 0, 0xf0, 0x3f]);

        out.clear();
        Instruction::Int(0).encode(&mut out);
        check!(out == [12, 0]);
    }

    #[test]
    fn encoded_len_matches_bytes_written() {
        let program = [
            Instruction::Call(9),
            Instruction::Ret,
            Instruction::Push(-2.5),
            Instruction::Set(name_hash("f.a")),
            Instruction::Int(0),
        ];
        for instruction in program {
            let mut out = vec![];
            instruction.encode(&mut out);
            check!(out.len() == instruction.encoded_len());
            let_assert!(Ok(decoded) = Instruction::decode(&out, 0));
            check!(decoded == instruction);
        }
    }

    #[test]
    fn truncated_operand_is_reported() {
        let bytes = [Opcode::Push as u8, 0, 0, 0];
        check!(
            Instruction::decode(&bytes, 0)
                == Err(DecodeError::Truncated {
                    opcode: Opcode::Push,
                    needed: 8,
                    available: 3
                })
        );
        check!(Instruction::decode(&bytes, 4) == Err(DecodeError::OutOfRange(4)));
    }

    #[test]
    fn iteration_stops_at_first_error() {
        let mut bytes = encode_all(&[Instruction::Add, Instruction::Pop]);
        bytes.push(0xff);
        bytes.push(Opcode::Ret as u8);
        let decoded = instructions(&bytes).collect::<Vec<_>>();
        check!(
            decoded
                == [
                    Ok((0, Instruction::Add)),
                    Ok((1, Instruction::Pop)),
                    Err(DecodeError::UnknownOpcode(0xff)),
                ]
        );
    }

    #[test]
    fn fnv1a_reference_values() {
        check!(name_hash("") == 0xcbf2_9ce4_8422_2325);
        check!(name_hash("a") == 0xaf63_dc4c_8601_ec8c);
        check!(name_hash("foobar") == 0x8594_4171_f739_67e8);
        check!(name_hash("f.a") != name_hash("a"));
    }

    #[test]
    fn listing_annotates_labels() {
        let bytes = encode_all(&[
            Instruction::Jmp(6),
            Instruction::Ret,
            Instruction::Call(5),
            Instruction::Int(0),
        ]);
        let mut labels = Labels::new();
        labels.insert("f".into(), 5);
        labels.insert("@f_end@".into(), 6);
        let_assert!(Ok(listing) = disassemble(&bytes, Some(&labels)));
        check!(
            listing
                == "    0x0000  jmp 0x0006  ; @f_end@\nf:\n    0x0005  ret\n@f_end@:\n    0x0006  call 0x0005  ; f\n    0x000b  int 0\n"
        );
    }

    #[test]
    fn listing_without_labels() {
        let bytes = encode_all(&[Instruction::Push(3.0), Instruction::Get(0xab)]);
        let_assert!(Ok(listing) = disassemble(&bytes, None));
        check!(listing == "    0x0000  push 3\n    0x0009  get #00000000000000ab\n");
    }
}
