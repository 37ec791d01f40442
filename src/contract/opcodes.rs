//! Application program opcodes
//!
//! Defines the instruction set shared by the assembler, the disassembler
//! and the program VM. The stack shuffles (`POP`, `DUP`, `SWAP`) and `NOP`
//! are never emitted by lowering; they exist for hand-written listings
//! assembled locally or on a node.

use serde::{Deserialize, Serialize};

/// Version byte that prefixes every assembled program
pub const PROGRAM_VERSION: u8 = 1;

/// Opcodes for application programs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum OpCode {
    // Stack operations (0x00 - 0x0F)
    /// Push a 64-bit unsigned integer
    Push = 0x00,
    /// Push a byte string (u16 length prefix)
    PushBytes = 0x01,
    /// Pop the top value from the stack
    Pop = 0x02,
    /// Duplicate the top value
    Dup = 0x03,
    /// Swap the top two values
    Swap = 0x04,

    // Arithmetic (0x10 - 0x1F)
    Add = 0x10,
    Sub = 0x11,
    Mul = 0x12,
    Div = 0x13,
    Mod = 0x14,

    // Comparison (0x20 - 0x2F)
    /// Equal: works on two uints or two byte strings
    Eq = 0x20,
    Lt = 0x21,
    Gt = 0x22,
    Le = 0x23,
    Ge = 0x24,
    /// Not equal: works on two uints or two byte strings
    Neq = 0x25,
    /// Push 1 if top is zero, 0 otherwise
    IsZero = 0x26,

    // Logic (0x30 - 0x3F)
    /// Logical AND of two uints (non-zero is true)
    And = 0x30,
    /// Logical OR of two uints (non-zero is true)
    Or = 0x31,

    // Control flow (0x40 - 0x4F)
    /// Unconditional jump
    Jump = 0x40,
    /// Conditional jump (if top of stack is non-zero)
    JumpIf = 0x41,
    /// Finish with the top of stack as verdict
    Return = 0x43,
    /// Fail the program immediately
    Err = 0x44,

    // Application global state (0x50 - 0x5F)
    /// key, value -> ()
    AppPut = 0x50,
    /// key -> value (zero if absent)
    AppGet = 0x51,
    /// key -> ()
    AppDel = 0x52,

    // Transaction fields (0x60 - 0x6F)
    /// Push a transaction field (1-byte field id)
    Txn = 0x60,
    /// Push an application call argument (1-byte index)
    TxnArg = 0x61,

    // No operation
    Nop = 0xFF,
}

impl OpCode {
    /// Convert byte to opcode
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(OpCode::Push),
            0x01 => Some(OpCode::PushBytes),
            0x02 => Some(OpCode::Pop),
            0x03 => Some(OpCode::Dup),
            0x04 => Some(OpCode::Swap),
            0x10 => Some(OpCode::Add),
            0x11 => Some(OpCode::Sub),
            0x12 => Some(OpCode::Mul),
            0x13 => Some(OpCode::Div),
            0x14 => Some(OpCode::Mod),
            0x20 => Some(OpCode::Eq),
            0x21 => Some(OpCode::Lt),
            0x22 => Some(OpCode::Gt),
            0x23 => Some(OpCode::Le),
            0x24 => Some(OpCode::Ge),
            0x25 => Some(OpCode::Neq),
            0x26 => Some(OpCode::IsZero),
            0x30 => Some(OpCode::And),
            0x31 => Some(OpCode::Or),
            0x40 => Some(OpCode::Jump),
            0x41 => Some(OpCode::JumpIf),
            0x43 => Some(OpCode::Return),
            0x44 => Some(OpCode::Err),
            0x50 => Some(OpCode::AppPut),
            0x51 => Some(OpCode::AppGet),
            0x52 => Some(OpCode::AppDel),
            0x60 => Some(OpCode::Txn),
            0x61 => Some(OpCode::TxnArg),
            0xFF => Some(OpCode::Nop),
            _ => None,
        }
    }

    /// Look up an opcode by its assembly mnemonic
    pub fn from_mnemonic(name: &str) -> Option<Self> {
        ALL_OPCODES
            .iter()
            .copied()
            .find(|op| op.name().eq_ignore_ascii_case(name))
    }

    /// Get opcode name for assembly and disassembly
    pub fn name(&self) -> &'static str {
        match self {
            OpCode::Push => "PUSH",
            OpCode::PushBytes => "PUSHB",
            OpCode::Pop => "POP",
            OpCode::Dup => "DUP",
            OpCode::Swap => "SWAP",
            OpCode::Add => "ADD",
            OpCode::Sub => "SUB",
            OpCode::Mul => "MUL",
            OpCode::Div => "DIV",
            OpCode::Mod => "MOD",
            OpCode::Eq => "EQ",
            OpCode::Lt => "LT",
            OpCode::Gt => "GT",
            OpCode::Le => "LE",
            OpCode::Ge => "GE",
            OpCode::Neq => "NEQ",
            OpCode::IsZero => "ISZERO",
            OpCode::And => "AND",
            OpCode::Or => "OR",
            OpCode::Jump => "JUMP",
            OpCode::JumpIf => "JUMPI",
            OpCode::Return => "RETURN",
            OpCode::Err => "ERR",
            OpCode::AppPut => "APPPUT",
            OpCode::AppGet => "APPGET",
            OpCode::AppDel => "APPDEL",
            OpCode::Txn => "TXN",
            OpCode::TxnArg => "TXNA",
            OpCode::Nop => "NOP",
        }
    }

    /// Cost charged by the VM for executing this opcode
    pub fn cost(&self) -> u64 {
        match self {
            OpCode::Push | OpCode::PushBytes | OpCode::Pop | OpCode::Dup | OpCode::Swap => 1,
            OpCode::Add | OpCode::Sub | OpCode::Mul => 1,
            OpCode::Div | OpCode::Mod => 2,
            OpCode::Eq | OpCode::Lt | OpCode::Gt | OpCode::Le | OpCode::Ge | OpCode::Neq => 1,
            OpCode::IsZero | OpCode::And | OpCode::Or => 1,
            OpCode::Jump | OpCode::JumpIf => 2,
            OpCode::AppPut | OpCode::AppDel => 10,
            OpCode::AppGet => 5,
            OpCode::Txn | OpCode::TxnArg => 1,
            OpCode::Return | OpCode::Err => 0,
            OpCode::Nop => 1,
        }
    }
}

const ALL_OPCODES: [OpCode; 29] = [
    OpCode::Push,
    OpCode::PushBytes,
    OpCode::Pop,
    OpCode::Dup,
    OpCode::Swap,
    OpCode::Add,
    OpCode::Sub,
    OpCode::Mul,
    OpCode::Div,
    OpCode::Mod,
    OpCode::Eq,
    OpCode::Lt,
    OpCode::Gt,
    OpCode::Le,
    OpCode::Ge,
    OpCode::Neq,
    OpCode::IsZero,
    OpCode::And,
    OpCode::Or,
    OpCode::Jump,
    OpCode::JumpIf,
    OpCode::Return,
    OpCode::Err,
    OpCode::AppPut,
    OpCode::AppGet,
    OpCode::AppDel,
    OpCode::Txn,
    OpCode::TxnArg,
    OpCode::Nop,
];

/// Transaction fields readable through `TXN`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TxnField {
    Sender = 0,
    ApplicationId = 1,
    OnCompletion = 2,
    NumAppArgs = 3,
}

impl TxnField {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(TxnField::Sender),
            1 => Some(TxnField::ApplicationId),
            2 => Some(TxnField::OnCompletion),
            3 => Some(TxnField::NumAppArgs),
            _ => None,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "Sender" => Some(TxnField::Sender),
            "ApplicationID" => Some(TxnField::ApplicationId),
            "OnCompletion" => Some(TxnField::OnCompletion),
            "NumAppArgs" => Some(TxnField::NumAppArgs),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            TxnField::Sender => "Sender",
            TxnField::ApplicationId => "ApplicationID",
            TxnField::OnCompletion => "OnCompletion",
            TxnField::NumAppArgs => "NumAppArgs",
        }
    }
}
