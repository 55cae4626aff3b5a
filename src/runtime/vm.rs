//! The bytecode virtual machine.
//!
//! Execution state is an instruction pointer, an operand stack, a return
//! stack, and one binding stack per variable name hash. The machine halts
//! when the instruction pointer reaches the end of the buffer.
use std::collections::HashMap;

use super::Host;
use crate::{
    bytecode::{name_hash, DecodeError, Instruction},
    ops::{BinaryOp, Interrupt},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Continue,
    Halt,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum RuntimeErrorKind {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("operand stack is empty")]
    EmptyOperandStack,
    #[error("return stack is empty")]
    EmptyReturnStack,
    #[error("variable '{0}' not found")]
    VariableNotFound(Box<str>),
    #[error("unknown interrupt {0}")]
    UnknownInterrupt(u8),
    #[error("address 0x{0:04x} is past the end of the program")]
    AddressOutOfBounds(u32),
}

/// A fault, with the offset of the instruction that raised it.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
#[error("{kind}")]
pub struct RuntimeError {
    pub offset: usize,
    pub kind: RuntimeErrorKind,
}

pub struct Vm<'code, H> {
    code: &'code [u8],
    ip: usize,
    operands: Vec<f64>,
    returns: Vec<usize>,
    bindings: HashMap<u64, Vec<f64>>,
    /// names behind hashes, for error messages only
    names: HashMap<u64, Box<str>>,
    host: H,
}

impl<'code, H: Host> Vm<'code, H> {
    pub fn new(code: &'code [u8], host: H) -> Self {
        Self {
            code,
            ip: 0,
            operands: vec![],
            returns: vec![],
            bindings: HashMap::new(),
            names: HashMap::new(),
            host,
        }
    }

    /// Lets errors about variables name them instead of showing their hash.
    pub fn with_names<'n>(mut self, names: impl IntoIterator<Item = &'n str>) -> Self {
        self.names = names
            .into_iter()
            .map(|name| (name_hash(name), Box::from(name)))
            .collect();
        self
    }

    pub fn ip(&self) -> usize {
        self.ip
    }

    /// The operand stack, bottom first.
    pub fn operand_stack(&self) -> &[f64] {
        &self.operands
    }

    pub fn return_depth(&self) -> usize {
        self.returns.len()
    }

    /// The innermost live binding of a (qualified) variable name.
    pub fn binding(&self, name: &str) -> Option<f64> {
        self.bindings
            .get(&name_hash(name))
            .and_then(|stack| stack.last())
            .copied()
    }

    /// How many bindings of `name` are live.
    pub fn binding_depth(&self, name: &str) -> usize {
        self.bindings.get(&name_hash(name)).map_or(0, Vec::len)
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn into_host(self) -> H {
        self.host
    }

    fn describe(&self, hash: u64) -> Box<str> {
        match self.names.get(&hash) {
            Some(name) => name.clone(),
            None => format!("#{hash:016x}").into(),
        }
    }

    fn pop(&mut self) -> Result<f64, RuntimeErrorKind> {
        self.operands
            .pop()
            .ok_or(RuntimeErrorKind::EmptyOperandStack)
    }

    fn jump(&mut self, address: u32) -> Result<(), RuntimeErrorKind> {
        let target = address as usize;
        if target > self.code.len() {
            return Err(RuntimeErrorKind::AddressOutOfBounds(address));
        }
        self.ip = target;
        Ok(())
    }

    fn arithmetic(&mut self, op: BinaryOp) -> Result<(), RuntimeErrorKind> {
        // the first value popped is the left operand
        let lhs = self.pop()?;
        let rhs = self.pop()?;
        self.operands.push(op.apply(lhs, rhs));
        Ok(())
    }

    fn execute(&mut self, instruction: Instruction) -> Result<(), RuntimeErrorKind> {
        match instruction {
            Instruction::Jmp(address) => self.jump(address)?,
            Instruction::Call(address) => {
                let resume = self.ip;
                self.jump(address)?;
                self.returns.push(resume);
            }
            Instruction::Ret => {
                self.ip = self
                    .returns
                    .pop()
                    .ok_or(RuntimeErrorKind::EmptyReturnStack)?;
            }
            Instruction::Add => self.arithmetic(BinaryOp::Add)?,
            Instruction::Sub => self.arithmetic(BinaryOp::Sub)?,
            Instruction::Mul => self.arithmetic(BinaryOp::Mul)?,
            Instruction::Div => self.arithmetic(BinaryOp::Div)?,
            Instruction::Push(value) => self.operands.push(value),
            Instruction::Pop => {
                self.pop()?;
            }
            Instruction::Set(hash) => {
                let value = self.pop()?;
                self.bindings.entry(hash).or_default().push(value);
            }
            Instruction::Get(hash) => {
                let Some(&value) = self.bindings.get(&hash).and_then(|stack| stack.last()) else {
                    return Err(RuntimeErrorKind::VariableNotFound(self.describe(hash)));
                };
                self.operands.push(value);
            }
            Instruction::Unset(hash) => {
                let Some(stack) = self.bindings.get_mut(&hash) else {
                    return Err(RuntimeErrorKind::VariableNotFound(self.describe(hash)));
                };
                stack.pop();
                if stack.is_empty() {
                    self.bindings.remove(&hash);
                }
            }
            Instruction::Int(id) => match Interrupt::try_from(id) {
                Ok(Interrupt::Print) => {
                    let value = self.pop()?;
                    self.host.print(value);
                }
                Err(id) => return Err(RuntimeErrorKind::UnknownInterrupt(id)),
            },
        }
        Ok(())
    }

    /// Executes the instruction at the instruction pointer.
    pub fn step(&mut self) -> Result<StepOutcome, RuntimeError> {
        if self.ip >= self.code.len() {
            return Ok(StepOutcome::Halt);
        }

        let offset = self.ip;
        let fault = |kind: RuntimeErrorKind| RuntimeError { offset, kind };
        let instruction = Instruction::decode(self.code, offset).map_err(|err| fault(err.into()))?;
        log::trace!("0x{offset:04x}  {instruction}");

        self.ip = offset + instruction.encoded_len();
        self.execute(instruction).map_err(fault)?;

        Ok(if self.ip >= self.code.len() {
            StepOutcome::Halt
        } else {
            StepOutcome::Continue
        })
    }

    /// Steps until the program runs off the end of the buffer.
    pub fn run(&mut self) -> Result<(), RuntimeError> {
        while self.step()? == StepOutcome::Continue {}
        Ok(())
    }
}

/// Runs `code` to completion.
pub fn run<H: Host>(code: &[u8], host: H) -> Result<H, RuntimeError> {
    let mut vm = Vm::new(code, host);
    vm.run()?;
    Ok(vm.into_host())
}
