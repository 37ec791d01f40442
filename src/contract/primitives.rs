//! The fixed primitive table available to program sources
//!
//! This table is the whole vocabulary of the sandbox. A name that is not
//! listed here (and is not a binding of the program itself) cannot be
//! expressed.

use crate::contract::opcodes::{OpCode, TxnField};
use crate::transaction::OnComplete;
use bitflags::bitflags;

bitflags! {
    /// Capability groups a sandbox may expose
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Capabilities: u8 {
        /// Literals, sequencing, branching and verdicts
        const CONTROL = 0b0000_0001;
        /// Integer arithmetic, comparison and logic
        const ARITHMETIC = 0b0000_0010;
        /// Reading fields and arguments of the current transaction
        const TXN_FIELDS = 0b0000_0100;
        /// Reading application global state
        const GLOBAL_READ = 0b0000_1000;
        /// Writing or deleting application global state
        const GLOBAL_WRITE = 0b0001_0000;
    }
}

impl Default for Capabilities {
    fn default() -> Self {
        Capabilities::all()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Neq,
    Lt,
    Gt,
    Le,
    Ge,
    And,
    Or,
}

impl BinaryOp {
    pub fn opcode(self) -> OpCode {
        match self {
            BinaryOp::Add => OpCode::Add,
            BinaryOp::Sub => OpCode::Sub,
            BinaryOp::Mul => OpCode::Mul,
            BinaryOp::Div => OpCode::Div,
            BinaryOp::Mod => OpCode::Mod,
            BinaryOp::Eq => OpCode::Eq,
            BinaryOp::Neq => OpCode::Neq,
            BinaryOp::Lt => OpCode::Lt,
            BinaryOp::Gt => OpCode::Gt,
            BinaryOp::Le => OpCode::Le,
            BinaryOp::Ge => OpCode::Ge,
            BinaryOp::And => OpCode::And,
            BinaryOp::Or => OpCode::Or,
        }
    }

    /// `Eq` and `Neq` accept two operands of any one type
    pub fn is_equality(self) -> bool {
        matches!(self, BinaryOp::Eq | BinaryOp::Neq)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Primitive {
    Int,
    Bytes,
    Approve,
    Reject,
    Return,
    Assert,
    Seq,
    If,
    Cond,
    Binary(BinaryOp),
    Not,
    Txn(TxnField),
    TxnArg,
    GlobalGet,
    GlobalPut,
    GlobalDel,
    OnComplete(OnComplete),
}

impl Primitive {
    /// Resolve a dotted name against the table
    pub fn lookup(path: &str) -> Option<Self> {
        let primitive = match path {
            "Int" => Primitive::Int,
            "Bytes" => Primitive::Bytes,
            "Approve" => Primitive::Approve,
            "Reject" => Primitive::Reject,
            "Return" => Primitive::Return,
            "Assert" => Primitive::Assert,
            "Seq" => Primitive::Seq,
            "If" => Primitive::If,
            "Cond" => Primitive::Cond,
            "Add" => Primitive::Binary(BinaryOp::Add),
            "Sub" => Primitive::Binary(BinaryOp::Sub),
            "Mul" => Primitive::Binary(BinaryOp::Mul),
            "Div" => Primitive::Binary(BinaryOp::Div),
            "Mod" => Primitive::Binary(BinaryOp::Mod),
            "Eq" => Primitive::Binary(BinaryOp::Eq),
            "Neq" => Primitive::Binary(BinaryOp::Neq),
            "Lt" => Primitive::Binary(BinaryOp::Lt),
            "Gt" => Primitive::Binary(BinaryOp::Gt),
            "Le" => Primitive::Binary(BinaryOp::Le),
            "Ge" => Primitive::Binary(BinaryOp::Ge),
            "And" => Primitive::Binary(BinaryOp::And),
            "Or" => Primitive::Binary(BinaryOp::Or),
            "Not" => Primitive::Not,
            "Txn.sender" => Primitive::Txn(TxnField::Sender),
            "Txn.application_id" => Primitive::Txn(TxnField::ApplicationId),
            "Txn.on_completion" => Primitive::Txn(TxnField::OnCompletion),
            "Txn.num_app_args" => Primitive::Txn(TxnField::NumAppArgs),
            "Txn.application_args" => Primitive::TxnArg,
            "App.globalGet" => Primitive::GlobalGet,
            "App.globalPut" => Primitive::GlobalPut,
            "App.globalDel" => Primitive::GlobalDel,
            "OnComplete.NoOp" => Primitive::OnComplete(OnComplete::NoOp),
            "OnComplete.OptIn" => Primitive::OnComplete(OnComplete::OptIn),
            "OnComplete.CloseOut" => Primitive::OnComplete(OnComplete::CloseOut),
            "OnComplete.ClearState" => Primitive::OnComplete(OnComplete::ClearState),
            "OnComplete.UpdateApplication" => {
                Primitive::OnComplete(OnComplete::UpdateApplication)
            }
            "OnComplete.DeleteApplication" => {
                Primitive::OnComplete(OnComplete::DeleteApplication)
            }
            _ => return None,
        };
        Some(primitive)
    }

    /// Whether the primitive is used as `Name(...)` rather than a bare constant
    pub fn is_callable(self) -> bool {
        !matches!(self, Primitive::OnComplete(_))
    }

    /// Accepted argument counts (min, max)
    pub fn arity(self) -> (usize, Option<usize>) {
        match self {
            Primitive::Approve | Primitive::Reject | Primitive::Txn(_) | Primitive::OnComplete(_) => {
                (0, Some(0))
            }
            Primitive::Int
            | Primitive::Bytes
            | Primitive::Return
            | Primitive::Assert
            | Primitive::Not
            | Primitive::TxnArg
            | Primitive::GlobalGet
            | Primitive::GlobalDel => (1, Some(1)),
            Primitive::Binary(_) | Primitive::GlobalPut => (2, Some(2)),
            Primitive::If => (2, Some(3)),
            Primitive::Seq | Primitive::Cond => (1, None),
        }
    }

    /// Capability group the primitive belongs to
    pub fn capability(self) -> Capabilities {
        match self {
            Primitive::Int
            | Primitive::Bytes
            | Primitive::Approve
            | Primitive::Reject
            | Primitive::Return
            | Primitive::Assert
            | Primitive::Seq
            | Primitive::If
            | Primitive::Cond => Capabilities::CONTROL,
            Primitive::Binary(_) | Primitive::Not => Capabilities::ARITHMETIC,
            Primitive::Txn(_) | Primitive::TxnArg | Primitive::OnComplete(_) => {
                Capabilities::TXN_FIELDS
            }
            Primitive::GlobalGet => Capabilities::GLOBAL_READ,
            Primitive::GlobalPut | Primitive::GlobalDel => Capabilities::GLOBAL_WRITE,
        }
    }
}
