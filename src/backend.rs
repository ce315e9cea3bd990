//! The interface to a native-code backend.
//!
//! The interpreter knows only how to name registers and ask for two
//! instructions; encoding them and laying out an executable is the backend's
//! business.

use std::fmt;
use phf::phf_map;
use crate::{LispError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Register {
    Rax,
    Rcx,
    Rdx,
    Rbx,
    Rsp,
    Rbp,
    Rsi,
    Rdi,
    R8,
    R9,
    R10,
    R11,
    R12,
    R13,
    R14,
    R15,
}

static REGISTERS: phf::Map<&'static str, Register> = phf_map! {
    "rax" => Register::Rax,
    "rcx" => Register::Rcx,
    "rdx" => Register::Rdx,
    "rbx" => Register::Rbx,
    "rsp" => Register::Rsp,
    "rbp" => Register::Rbp,
    "rsi" => Register::Rsi,
    "rdi" => Register::Rdi,
    "r8" => Register::R8,
    "r9" => Register::R9,
    "r10" => Register::R10,
    "r11" => Register::R11,
    "r12" => Register::R12,
    "r13" => Register::R13,
    "r14" => Register::R14,
    "r15" => Register::R15,
};

impl Register {
    pub fn from_name(name: &str) -> Result<Self> {
        REGISTERS
            .get(name)
            .copied()
            .ok_or_else(|| LispError::UnknownRegister(name.to_owned()))
    }

    pub fn name(self) -> &'static str {
        match self {
            Register::Rax => "rax",
            Register::Rcx => "rcx",
            Register::Rdx => "rdx",
            Register::Rbx => "rbx",
            Register::Rsp => "rsp",
            Register::Rbp => "rbp",
            Register::Rsi => "rsi",
            Register::Rdi => "rdi",
            Register::R8 => "r8",
            Register::R9 => "r9",
            Register::R10 => "r10",
            Register::R11 => "r11",
            Register::R12 => "r12",
            Register::R13 => "r13",
            Register::R14 => "r14",
            Register::R15 => "r15",
        }
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Instruction {
    MovImmediate(Register, i64),
    Syscall,
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::MovImmediate(reg, imm) => write!(f, "mov {}, {}", reg, imm),
            Instruction::Syscall => write!(f, "syscall"),
        }
    }
}

/// Something that accepts instructions from evaluated `mov`/`syscall` forms.
pub trait InstructionEmitter {
    fn mov_immediate(&mut self, reg: Register, imm: i64) -> Result<()>;
    fn syscall(&mut self) -> Result<()>;
}

/// Backend that only records what it was asked to emit.
#[derive(Clone, Debug, Default)]
pub struct InstructionLog {
    instructions: Vec<Instruction>,
}

impl InstructionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }
}

impl InstructionEmitter for InstructionLog {
    fn mov_immediate(&mut self, reg: Register, imm: i64) -> Result<()> {
        self.instructions.push(Instruction::MovImmediate(reg, imm));
        Ok(())
    }
    fn syscall(&mut self) -> Result<()> {
        self.instructions.push(Instruction::Syscall);
        Ok(())
    }
}

/// Lets a caller keep a handle on a log it lent to a context.
impl InstructionEmitter for std::sync::Arc<parking_lot::Mutex<InstructionLog>> {
    fn mov_immediate(&mut self, reg: Register, imm: i64) -> Result<()> {
        self.lock().mov_immediate(reg, imm)
    }
    fn syscall(&mut self) -> Result<()> {
        self.lock().syscall()
    }
}
