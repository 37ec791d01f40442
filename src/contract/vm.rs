//! Application program virtual machine
//!
//! A stack-based VM that evaluates approval programs against a call
//! context and the application's global state. Used by the in-process
//! ledger to decide whether a transaction is accepted.

use crate::contract::opcodes::{OpCode, TxnField, PROGRAM_VERSION};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Maximum stack size
const MAX_STACK_SIZE: usize = 1024;

/// Default cost budget per program evaluation
pub const DEFAULT_COST_BUDGET: u64 = 700;

/// VM execution errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum VmError {
    #[error("Stack overflow")]
    StackOverflow,
    #[error("Stack underflow")]
    StackUnderflow,
    #[error("Invalid opcode: {0:#04x}")]
    InvalidOpcode(u8),
    #[error("Truncated operand at {0}")]
    TruncatedOperand(usize),
    #[error("Unsupported program version: {0}")]
    UnsupportedVersion(u8),
    #[error("Empty program")]
    EmptyProgram,
    #[error("Cost budget exceeded")]
    BudgetExceeded,
    #[error("Invalid jump destination: {0}")]
    InvalidJump(u32),
    #[error("Division by zero")]
    DivisionByZero,
    #[error("Type mismatch: {0}")]
    TypeMismatch(&'static str),
    #[error("Invalid argument index: {0}")]
    InvalidArgument(u8),
    #[error("Unknown transaction field: {0}")]
    UnknownField(u8),
    #[error("Program failed with err")]
    Failed,
    #[error("Program ended without a verdict")]
    NoVerdict,
}

/// A value on the VM stack or in global state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StackValue {
    Uint(u64),
    Bytes(Vec<u8>),
}

impl StackValue {
    fn as_uint(&self) -> Result<u64, VmError> {
        match self {
            StackValue::Uint(v) => Ok(*v),
            StackValue::Bytes(_) => Err(VmError::TypeMismatch("expected uint64, got bytes")),
        }
    }

    fn into_bytes(self) -> Result<Vec<u8>, VmError> {
        match self {
            StackValue::Bytes(b) => Ok(b),
            StackValue::Uint(_) => Err(VmError::TypeMismatch("expected bytes, got uint64")),
        }
    }
}

/// Transaction data visible to a program
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    /// Sender address
    pub sender: String,
    /// Application id (0 while the application is being created)
    pub application_id: u64,
    /// On-completion action code
    pub on_completion: u64,
    /// Application call arguments
    pub args: Vec<Vec<u8>>,
}

/// Result of a program evaluation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Whether the program approved the transaction
    pub approved: bool,
    /// Cost consumed
    pub cost_used: u64,
    /// Global state writes: key -> new value (None = deleted)
    pub state_changes: BTreeMap<Vec<u8>, Option<StackValue>>,
}

/// The program virtual machine
pub struct VM<'a> {
    /// Stack for computation
    stack: Vec<StackValue>,
    /// Program counter
    pc: usize,
    /// Remaining cost budget
    budget: u64,
    /// Initial budget, for reporting
    budget_limit: u64,
    /// Current global state (read-through)
    state: &'a BTreeMap<Vec<u8>, StackValue>,
    /// Pending global state changes
    state_changes: BTreeMap<Vec<u8>, Option<StackValue>>,
    /// Bytecode being executed
    code: &'a [u8],
    /// Call context
    context: &'a CallContext,
    /// Verdict once RETURN executed
    verdict: Option<bool>,
}

impl<'a> VM<'a> {
    /// Create a new VM instance
    pub fn new(
        code: &'a [u8],
        state: &'a BTreeMap<Vec<u8>, StackValue>,
        context: &'a CallContext,
    ) -> Self {
        Self::with_budget(code, state, context, DEFAULT_COST_BUDGET)
    }

    pub fn with_budget(
        code: &'a [u8],
        state: &'a BTreeMap<Vec<u8>, StackValue>,
        context: &'a CallContext,
        budget: u64,
    ) -> Self {
        Self {
            stack: Vec::with_capacity(64),
            pc: 1,
            budget,
            budget_limit: budget,
            state,
            state_changes: BTreeMap::new(),
            code,
            context,
            verdict: None,
        }
    }

    /// Execute the program to completion
    pub fn execute(mut self) -> Result<ExecutionResult, VmError> {
        match self.code.first() {
            None => return Err(VmError::EmptyProgram),
            Some(&v) if v != PROGRAM_VERSION => return Err(VmError::UnsupportedVersion(v)),
            Some(_) => {}
        }

        while self.verdict.is_none() && self.pc < self.code.len() {
            self.step()?;
        }

        let approved = match self.verdict {
            Some(v) => v,
            // Falling off the end: a single uint left on the stack is the verdict
            None => match self.stack.as_slice() {
                [StackValue::Uint(v)] => *v != 0,
                _ => return Err(VmError::NoVerdict),
            },
        };

        Ok(ExecutionResult {
            approved,
            cost_used: self.budget_limit - self.budget,
            // A rejected program leaves state untouched
            state_changes: if approved {
                self.state_changes
            } else {
                BTreeMap::new()
            },
        })
    }

    /// Execute a single instruction
    fn step(&mut self) -> Result<(), VmError> {
        let opcode_byte = self.code[self.pc];
        let opcode = OpCode::from_byte(opcode_byte).ok_or(VmError::InvalidOpcode(opcode_byte))?;

        let cost = opcode.cost();
        if self.budget < cost {
            return Err(VmError::BudgetExceeded);
        }
        self.budget -= cost;

        self.pc += 1;

        match opcode {
            OpCode::Push => {
                let value = self.read_u64()?;
                self.push(StackValue::Uint(value))?;
            }
            OpCode::PushBytes => {
                let len = self.read_u16()? as usize;
                let bytes = self.read_slice(len)?.to_vec();
                self.push(StackValue::Bytes(bytes))?;
            }
            OpCode::Pop => {
                self.pop()?;
            }
            OpCode::Dup => {
                let value = self.stack.last().cloned().ok_or(VmError::StackUnderflow)?;
                self.push(value)?;
            }
            OpCode::Swap => {
                let len = self.stack.len();
                if len < 2 {
                    return Err(VmError::StackUnderflow);
                }
                self.stack.swap(len - 1, len - 2);
            }
            OpCode::Add => self.arith(|a, b| Ok(a.wrapping_add(b)))?,
            OpCode::Sub => self.arith(|a, b| Ok(a.wrapping_sub(b)))?,
            OpCode::Mul => self.arith(|a, b| Ok(a.wrapping_mul(b)))?,
            OpCode::Div => self.arith(|a, b| a.checked_div(b).ok_or(VmError::DivisionByZero))?,
            OpCode::Mod => self.arith(|a, b| a.checked_rem(b).ok_or(VmError::DivisionByZero))?,
            OpCode::Eq | OpCode::Neq => {
                let b = self.pop()?;
                let a = self.pop()?;
                if std::mem::discriminant(&a) != std::mem::discriminant(&b) {
                    return Err(VmError::TypeMismatch("comparing uint64 with bytes"));
                }
                let equal = a == b;
                let result = if opcode == OpCode::Eq { equal } else { !equal };
                self.push(StackValue::Uint(result as u64))?;
            }
            OpCode::Lt => self.arith(|a, b| Ok((a < b) as u64))?,
            OpCode::Gt => self.arith(|a, b| Ok((a > b) as u64))?,
            OpCode::Le => self.arith(|a, b| Ok((a <= b) as u64))?,
            OpCode::Ge => self.arith(|a, b| Ok((a >= b) as u64))?,
            OpCode::And => self.arith(|a, b| Ok((a != 0 && b != 0) as u64))?,
            OpCode::Or => self.arith(|a, b| Ok((a != 0 || b != 0) as u64))?,
            OpCode::IsZero => {
                let a = self.pop()?.as_uint()?;
                self.push(StackValue::Uint((a == 0) as u64))?;
            }
            OpCode::Jump => {
                let target = self.read_u32()?;
                self.jump(target)?;
            }
            OpCode::JumpIf => {
                let target = self.read_u32()?;
                let condition = self.pop()?.as_uint()?;
                if condition != 0 {
                    self.jump(target)?;
                }
            }
            OpCode::Return => {
                let verdict = self.pop()?.as_uint()?;
                self.verdict = Some(verdict != 0);
            }
            OpCode::Err => return Err(VmError::Failed),
            OpCode::AppPut => {
                let value = self.pop()?;
                let key = self.pop()?.into_bytes()?;
                self.state_changes.insert(key, Some(value));
            }
            OpCode::AppGet => {
                let key = self.pop()?.into_bytes()?;
                let value = match self.state_changes.get(&key) {
                    Some(pending) => pending.clone(),
                    None => self.state.get(&key).cloned(),
                };
                self.push(value.unwrap_or(StackValue::Uint(0)))?;
            }
            OpCode::AppDel => {
                let key = self.pop()?.into_bytes()?;
                self.state_changes.insert(key, None);
            }
            OpCode::Txn => {
                let raw = self.read_u8()?;
                let field = TxnField::from_byte(raw).ok_or(VmError::UnknownField(raw))?;
                let value = match field {
                    TxnField::Sender => StackValue::Bytes(self.context.sender.as_bytes().to_vec()),
                    TxnField::ApplicationId => StackValue::Uint(self.context.application_id),
                    TxnField::OnCompletion => StackValue::Uint(self.context.on_completion),
                    TxnField::NumAppArgs => StackValue::Uint(self.context.args.len() as u64),
                };
                self.push(value)?;
            }
            OpCode::TxnArg => {
                let index = self.read_u8()?;
                let arg = self
                    .context
                    .args
                    .get(index as usize)
                    .cloned()
                    .ok_or(VmError::InvalidArgument(index))?;
                self.push(StackValue::Bytes(arg))?;
            }
            OpCode::Nop => {}
        }

        Ok(())
    }

    fn arith(&mut self, op: impl Fn(u64, u64) -> Result<u64, VmError>) -> Result<(), VmError> {
        let b = self.pop()?.as_uint()?;
        let a = self.pop()?.as_uint()?;
        self.push(StackValue::Uint(op(a, b)?))
    }

    fn jump(&mut self, target: u32) -> Result<(), VmError> {
        if target == 0 || target as usize > self.code.len() {
            return Err(VmError::InvalidJump(target));
        }
        self.pc = target as usize;
        Ok(())
    }

    fn push(&mut self, value: StackValue) -> Result<(), VmError> {
        if self.stack.len() >= MAX_STACK_SIZE {
            return Err(VmError::StackOverflow);
        }
        self.stack.push(value);
        Ok(())
    }

    fn pop(&mut self) -> Result<StackValue, VmError> {
        self.stack.pop().ok_or(VmError::StackUnderflow)
    }

    fn read_slice(&mut self, len: usize) -> Result<&'a [u8], VmError> {
        let code: &'a [u8] = self.code;
        let end = self.pc + len;
        if end > code.len() {
            return Err(VmError::TruncatedOperand(self.pc));
        }
        let slice = &code[self.pc..end];
        self.pc = end;
        Ok(slice)
    }

    fn read_u8(&mut self) -> Result<u8, VmError> {
        Ok(self.read_slice(1)?[0])
    }

    fn read_u16(&mut self) -> Result<u16, VmError> {
        let s = self.read_slice(2)?;
        Ok(u16::from_be_bytes([s[0], s[1]]))
    }

    fn read_u32(&mut self) -> Result<u32, VmError> {
        let s = self.read_slice(4)?;
        Ok(u32::from_be_bytes([s[0], s[1], s[2], s[3]]))
    }

    fn read_u64(&mut self) -> Result<u64, VmError> {
        let s = self.read_slice(8)?;
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(s);
        Ok(u64::from_be_bytes(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::assembler::Assembler;

    fn run(listing: &str, context: &CallContext) -> Result<ExecutionResult, VmError> {
        let code = Assembler::new().assemble(listing).unwrap();
        let state = BTreeMap::new();
        VM::new(&code, &state, context).execute()
    }

    #[test]
    fn test_arithmetic_verdict() {
        let result = run("PUSH 10\nPUSH 20\nLT\nRETURN\n", &CallContext::default()).unwrap();
        assert!(result.approved);

        let result = run("PUSH 10\nPUSH 10\nSUB\nRETURN\n", &CallContext::default()).unwrap();
        assert!(!result.approved);
    }

    #[test]
    fn test_stack_shuffles_in_hand_written_listing() {
        // [1, 2] -> swap -> [2, 1] -> pop -> [2] -> dup -> [2, 2]
        let result = run(
            "PUSH 1\nPUSH 2\nSWAP\nPOP\nDUP\nNOP\nEQ\nRETURN\n",
            &CallContext::default(),
        )
        .unwrap();
        assert!(result.approved);

        assert_eq!(
            run("SWAP\n", &CallContext::default()).unwrap_err(),
            VmError::StackUnderflow
        );
    }

    #[test]
    fn test_store_argument_in_global_state() {
        let context = CallContext {
            args: vec![b"hello".to_vec()],
            ..Default::default()
        };
        let result = run(
            "PUSHB \"value\"\nTXNA 0\nAPPPUT\nPUSH 1\nRETURN\n",
            &context,
        )
        .unwrap();

        assert!(result.approved);
        assert_eq!(
            result.state_changes.get(b"value".as_slice()),
            Some(&Some(StackValue::Bytes(b"hello".to_vec())))
        );
    }

    #[test]
    fn test_reads_see_pending_writes_and_existing_state() {
        let code = Assembler::new()
            .assemble("PUSHB \"n\"\nPUSHB \"n\"\nAPPGET\nPUSH 1\nADD\nAPPPUT\nPUSHB \"n\"\nAPPGET\nRETURN\n")
            .unwrap();
        let mut state = BTreeMap::new();
        state.insert(b"n".to_vec(), StackValue::Uint(41));
        let context = CallContext::default();

        let result = VM::new(&code, &state, &context).execute().unwrap();
        assert!(result.approved);
        assert_eq!(
            result.state_changes.get(b"n".as_slice()),
            Some(&Some(StackValue::Uint(42)))
        );
    }

    #[test]
    fn test_rejection_discards_state_changes() {
        let result = run(
            "PUSHB \"k\"\nPUSH 7\nAPPPUT\nPUSH 0\nRETURN\n",
            &CallContext::default(),
        )
        .unwrap();
        assert!(!result.approved);
        assert!(result.state_changes.is_empty());
    }

    #[test]
    fn test_faults() {
        let ctx = CallContext::default();
        assert_eq!(run("ERR\n", &ctx).unwrap_err(), VmError::Failed);
        assert_eq!(run("ADD\n", &ctx).unwrap_err(), VmError::StackUnderflow);
        assert_eq!(
            run("PUSH 1\nPUSH 0\nDIV\nRETURN\n", &ctx).unwrap_err(),
            VmError::DivisionByZero
        );
        assert_eq!(run("TXNA 3\n", &ctx).unwrap_err(), VmError::InvalidArgument(3));
        assert!(matches!(
            run("PUSHB \"a\"\nPUSH 1\nEQ\nRETURN\n", &ctx),
            Err(VmError::TypeMismatch(_))
        ));
        assert_eq!(run("NOP\n", &ctx).unwrap_err(), VmError::NoVerdict);
    }

    #[test]
    fn test_budget_exceeded() {
        let code = Assembler::new().assemble(&"PUSH 1\n".repeat(50)).unwrap();
        let state = BTreeMap::new();
        let context = CallContext::default();
        let result = VM::with_budget(&code, &state, &context, 10).execute();
        assert_eq!(result.unwrap_err(), VmError::BudgetExceeded);
    }

    #[test]
    fn test_version_check() {
        let state = BTreeMap::new();
        let context = CallContext::default();
        assert_eq!(
            VM::new(&[9, 0x43], &state, &context).execute().unwrap_err(),
            VmError::UnsupportedVersion(9)
        );
        assert_eq!(
            VM::new(&[], &state, &context).execute().unwrap_err(),
            VmError::EmptyProgram
        );
    }
}
