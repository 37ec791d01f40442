//! Lowering of typed program expressions to an assembly listing

use crate::contract::opcodes::{OpCode, TxnField};
use crate::contract::primitives::BinaryOp;
use std::fmt::Write;

/// Static type of a program expression
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Uint64,
    Bytes,
    /// Either uint64 or bytes, known only at run time
    Any,
    /// Produces no value
    None,
}

impl ValueType {
    /// Whether a value of this type can stand where `expected` is required
    pub fn fits(self, expected: ValueType) -> bool {
        match (self, expected) {
            (ValueType::None, _) | (_, ValueType::None) => self == expected,
            (ValueType::Any, _) | (_, ValueType::Any) => true,
            _ => self == expected,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ValueType::Uint64 => "uint64",
            ValueType::Bytes => "bytes",
            ValueType::Any => "any",
            ValueType::None => "none",
        }
    }
}

/// A type-checked program expression
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Int(u64),
    Bytes(Vec<u8>),
    Approve,
    Reject,
    Return(Box<Expr>),
    Assert(Box<Expr>),
    Seq(Vec<Expr>),
    If(Box<Expr>, Box<Expr>, Option<Box<Expr>>),
    Cond(Vec<(Expr, Expr)>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Txn(TxnField),
    TxnArg(u8),
    GlobalGet(Box<Expr>),
    GlobalPut(Box<Expr>, Box<Expr>),
    GlobalDel(Box<Expr>),
}

/// Render a program to an assembly listing.
///
/// A uint64-typed program gets a trailing `RETURN` so its value becomes the
/// verdict.
pub fn lower_program(program: &Expr, ty: ValueType) -> String {
    let mut lowering = Lowering {
        out: String::new(),
        next_label: 0,
    };
    lowering.expr(program);
    if ty == ValueType::Uint64 {
        lowering.op(OpCode::Return);
    }
    lowering.out
}

struct Lowering {
    out: String,
    next_label: usize,
}

impl Lowering {
    fn label(&mut self, prefix: &str) -> String {
        self.next_label += 1;
        format!("{}_{}", prefix, self.next_label)
    }

    fn op(&mut self, opcode: OpCode) {
        self.out.push_str(opcode.name());
        self.out.push('\n');
    }

    fn op_with(&mut self, opcode: OpCode, operand: impl std::fmt::Display) {
        // Writing to a String cannot fail
        let _ = writeln!(self.out, "{} {}", opcode.name(), operand);
    }

    fn define(&mut self, label: &str) {
        let _ = writeln!(self.out, ":{}", label);
    }

    fn expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Int(n) => self.op_with(OpCode::Push, n),
            Expr::Bytes(b) => self.op_with(OpCode::PushBytes, format!("0x{}", hex::encode(b))),
            Expr::Approve => {
                self.op_with(OpCode::Push, 1);
                self.op(OpCode::Return);
            }
            Expr::Reject => {
                self.op_with(OpCode::Push, 0);
                self.op(OpCode::Return);
            }
            Expr::Return(value) => {
                self.expr(value);
                self.op(OpCode::Return);
            }
            Expr::Assert(cond) => {
                let ok = self.label("assert_ok");
                self.expr(cond);
                self.op_with(OpCode::JumpIf, &ok);
                self.op(OpCode::Err);
                self.define(&ok);
            }
            Expr::Seq(items) => {
                for item in items {
                    self.expr(item);
                }
            }
            Expr::If(cond, then, otherwise) => {
                let end = self.label("if_end");
                self.expr(cond);
                self.op(OpCode::IsZero);
                match otherwise {
                    Some(otherwise) => {
                        let else_label = self.label("if_else");
                        self.op_with(OpCode::JumpIf, &else_label);
                        self.expr(then);
                        self.op_with(OpCode::Jump, &end);
                        self.define(&else_label);
                        self.expr(otherwise);
                    }
                    None => {
                        self.op_with(OpCode::JumpIf, &end);
                        self.expr(then);
                    }
                }
                self.define(&end);
            }
            Expr::Cond(branches) => {
                let end = self.label("cond_end");
                let labels: Vec<String> = branches.iter().map(|_| self.label("cond_case")).collect();
                for ((cond, _), label) in branches.iter().zip(&labels) {
                    self.expr(cond);
                    self.op_with(OpCode::JumpIf, label);
                }
                // No branch matched
                self.op(OpCode::Err);
                for ((_, body), label) in branches.iter().zip(&labels) {
                    self.define(label);
                    self.expr(body);
                    self.op_with(OpCode::Jump, &end);
                }
                self.define(&end);
            }
            Expr::Binary(op, lhs, rhs) => {
                self.expr(lhs);
                self.expr(rhs);
                self.op(op.opcode());
            }
            Expr::Not(value) => {
                self.expr(value);
                self.op(OpCode::IsZero);
            }
            Expr::Txn(field) => self.op_with(OpCode::Txn, field.name()),
            Expr::TxnArg(index) => self.op_with(OpCode::TxnArg, index),
            Expr::GlobalGet(key) => {
                self.expr(key);
                self.op(OpCode::AppGet);
            }
            Expr::GlobalPut(key, value) => {
                self.expr(key);
                self.expr(value);
                self.op(OpCode::AppPut);
            }
            Expr::GlobalDel(key) => {
                self.expr(key);
                self.op(OpCode::AppDel);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::assembler::Assembler;

    #[test]
    fn test_lower_uint_program_appends_return() {
        let program = Expr::Binary(BinaryOp::Eq, Box::new(Expr::Int(1)), Box::new(Expr::Int(1)));
        let listing = lower_program(&program, ValueType::Uint64);
        assert_eq!(listing, "PUSH 1\nPUSH 1\nEQ\nRETURN\n");
    }

    #[test]
    fn test_lowered_branches_assemble() {
        let program = Expr::Cond(vec![
            (
                Expr::Binary(
                    BinaryOp::Eq,
                    Box::new(Expr::Txn(TxnField::ApplicationId)),
                    Box::new(Expr::Int(0)),
                ),
                Expr::Approve,
            ),
            (
                Expr::Int(1),
                Expr::If(
                    Box::new(Expr::Txn(TxnField::NumAppArgs)),
                    Box::new(Expr::Seq(vec![
                        Expr::GlobalPut(
                            Box::new(Expr::Bytes(b"value".to_vec())),
                            Box::new(Expr::TxnArg(0)),
                        ),
                        Expr::Approve,
                    ])),
                    Some(Box::new(Expr::Reject)),
                ),
            ),
        ]);

        let listing = lower_program(&program, ValueType::None);
        assert!(listing.contains("PUSHB 0x76616c7565"));
        assert!(listing.contains(":cond_end_1"));
        assert!(Assembler::new().assemble(&listing).is_ok());
    }

    #[test]
    fn test_type_fits() {
        assert!(ValueType::Any.fits(ValueType::Bytes));
        assert!(ValueType::Uint64.fits(ValueType::Any));
        assert!(!ValueType::Bytes.fits(ValueType::Uint64));
        assert!(!ValueType::None.fits(ValueType::Any));
        assert!(ValueType::None.fits(ValueType::None));
    }
}
